//! Mapping between messages and their graph representation
//!
//! Everything in here is pure: [`encode`] turns a [`Message`] into the
//! property bags the write path stores, [`decode`] rebuilds a message from
//! the property bags the read path loaded.

use serde_json::Value as JsonValue;

use crate::graph::{Properties, PropertyValue};
use crate::message::{
    AssistantMessage, Media, MediaData, Message, MessageKind, Metadata, ToolCall, ToolResponse,
    ToolResponseMessage, UserMessage,
};
use crate::{Error, Result};

// Relationship types
pub const HAS_MESSAGE: &str = "HAS_MESSAGE";
pub const HAS_METADATA: &str = "HAS_METADATA";
pub const HAS_TOOL_CALL: &str = "HAS_TOOL_CALL";
pub const HAS_TOOL_RESPONSE: &str = "HAS_TOOL_RESPONSE";
pub const HAS_MEDIA: &str = "HAS_MEDIA";

// Child node labels
pub const METADATA_LABEL: &str = "Metadata";
pub const TOOL_CALL_LABEL: &str = "ToolCall";
pub const TOOL_RESPONSE_LABEL: &str = "ToolResponse";
pub const MEDIA_LABEL: &str = "Media";

// Conversation properties
pub const CONVERSATION_ID: &str = "id";
pub const MESSAGE_COUNT: &str = "messageCount";
pub const CREATED_AT: &str = "createdAt";

// Message properties
pub const MESSAGE_ID: &str = "id";
pub const MESSAGE_TYPE: &str = "messageType";
pub const TEXT_CONTENT: &str = "textContent";
pub const SEQUENCE: &str = "sequence";

/// Metadata key mirroring the message kind; reserved, stripped on read
pub const METADATA_MESSAGE_TYPE: &str = "messageType";

// Child properties
const IDX: &str = "idx";
const CHILD_ID: &str = "id";
const TOOL_CALL_TYPE: &str = "type";
const TOOL_NAME: &str = "name";
const TOOL_CALL_ARGUMENTS: &str = "arguments";
const TOOL_RESPONSE_DATA: &str = "responseData";
const MEDIA_MIME_TYPE: &str = "mimeType";
const MEDIA_NAME: &str = "name";
const MEDIA_DATA_KIND: &str = "dataKind";
const MEDIA_DATA: &str = "data";

const DATA_KIND_BYTES: &str = "bytes";
const DATA_KIND_URL: &str = "url";

/// A message flattened into the property bags of its nodes
///
/// `properties` lacks the id, sequence and timestamp; those are assigned
/// by the write path.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub kind: MessageKind,
    pub properties: Properties,
    pub metadata: Option<Properties>,
    pub tool_calls: Vec<Properties>,
    pub tool_responses: Vec<Properties>,
    pub media: Vec<Properties>,
}

/// Property bags loaded for one message node, children in any order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredMessage {
    pub properties: Properties,
    pub metadata: Option<Properties>,
    pub tool_calls: Vec<Properties>,
    pub tool_responses: Vec<Properties>,
    pub media: Vec<Properties>,
}

/// Flatten a message for storage
pub fn encode(message: &Message) -> Result<MessageRecord> {
    let kind = message.kind();

    let mut properties = Properties::new();
    properties.insert(MESSAGE_TYPE.to_string(), kind.as_str().into());
    if let Some(text) = message.text() {
        properties.insert(TEXT_CONTENT.to_string(), text.into());
    }

    let metadata = if message.metadata().is_empty() {
        None
    } else {
        Some(encode_metadata(message.metadata(), kind)?)
    };

    let tool_calls = message
        .tool_calls()
        .iter()
        .enumerate()
        .map(|(idx, call)| encode_tool_call(idx, call))
        .collect();
    let tool_responses = message
        .tool_responses()
        .iter()
        .enumerate()
        .map(|(idx, response)| encode_tool_response(idx, response))
        .collect();
    let media = message
        .media()
        .iter()
        .enumerate()
        .map(|(idx, media)| encode_media(idx, media))
        .collect::<Result<Vec<_>>>()?;

    Ok(MessageRecord {
        kind,
        properties,
        metadata,
        tool_calls,
        tool_responses,
        media,
    })
}

/// Rebuild a message from its stored property bags
pub fn decode(stored: StoredMessage) -> Result<Message> {
    let kind: MessageKind = required_text(&stored.properties, MESSAGE_TYPE, "message")?.parse()?;
    let text = optional_text(&stored.properties, TEXT_CONTENT, "message")?.unwrap_or_default();
    let metadata = match &stored.metadata {
        Some(properties) => decode_metadata(properties)?,
        None => Metadata::new(),
    };

    let message = match kind {
        MessageKind::User => Message::User(UserMessage {
            text,
            media: decode_media_list(stored.media)?,
            metadata,
        }),
        MessageKind::Assistant => Message::Assistant(AssistantMessage {
            text,
            tool_calls: by_idx(stored.tool_calls)
                .iter()
                .map(decode_tool_call)
                .collect::<Result<_>>()?,
            media: decode_media_list(stored.media)?,
            metadata,
        }),
        MessageKind::ToolResponse => Message::ToolResponse(ToolResponseMessage {
            responses: by_idx(stored.tool_responses)
                .iter()
                .map(decode_tool_response)
                .collect::<Result<_>>()?,
            metadata,
        }),
    };
    Ok(message)
}

fn encode_metadata(metadata: &Metadata, kind: MessageKind) -> Result<Properties> {
    let mut properties = Properties::new();
    for (key, value) in metadata {
        properties.insert(key.clone(), serde_json::to_string(value)?.into());
    }
    properties.insert(
        METADATA_MESSAGE_TYPE.to_string(),
        serde_json::to_string(kind.as_str())?.into(),
    );
    Ok(properties)
}

fn decode_metadata(properties: &Properties) -> Result<Metadata> {
    properties
        .iter()
        .filter(|(key, _)| key.as_str() != METADATA_MESSAGE_TYPE)
        .map(|(key, value)| {
            let value = match value {
                PropertyValue::Null => JsonValue::Null,
                PropertyValue::Integer(i) => JsonValue::from(*i),
                PropertyValue::Real(f) => JsonValue::from(*f),
                // Values not written by this store may be plain strings
                PropertyValue::Text(text) => {
                    serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()))
                }
                PropertyValue::Blob(_) => {
                    return Err(Error::MalformedRecord(format!(
                        "metadata entry '{}' holds binary data",
                        key
                    )));
                }
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn encode_tool_call(idx: usize, call: &ToolCall) -> Properties {
    let mut properties = indexed(idx);
    properties.insert(CHILD_ID.to_string(), call.id.as_str().into());
    properties.insert(TOOL_CALL_TYPE.to_string(), call.call_type.as_str().into());
    properties.insert(TOOL_NAME.to_string(), call.name.as_str().into());
    properties.insert(TOOL_CALL_ARGUMENTS.to_string(), call.arguments.as_str().into());
    properties
}

fn decode_tool_call(properties: &Properties) -> Result<ToolCall> {
    Ok(ToolCall {
        id: required_text(properties, CHILD_ID, "tool call")?,
        call_type: required_text(properties, TOOL_CALL_TYPE, "tool call")?,
        name: required_text(properties, TOOL_NAME, "tool call")?,
        arguments: required_text(properties, TOOL_CALL_ARGUMENTS, "tool call")?,
    })
}

fn encode_tool_response(idx: usize, response: &ToolResponse) -> Properties {
    let mut properties = indexed(idx);
    properties.insert(CHILD_ID.to_string(), response.id.as_str().into());
    properties.insert(TOOL_NAME.to_string(), response.name.as_str().into());
    properties.insert(TOOL_RESPONSE_DATA.to_string(), response.response_data.as_str().into());
    properties
}

fn decode_tool_response(properties: &Properties) -> Result<ToolResponse> {
    Ok(ToolResponse {
        id: required_text(properties, CHILD_ID, "tool response")?,
        name: required_text(properties, TOOL_NAME, "tool response")?,
        response_data: required_text(properties, TOOL_RESPONSE_DATA, "tool response")?,
    })
}

fn encode_media(idx: usize, media: &Media) -> Result<Properties> {
    validate_mime_type(&media.mime_type)?;

    let mut properties = indexed(idx);
    if let Some(id) = &media.id {
        properties.insert(CHILD_ID.to_string(), id.as_str().into());
    }
    if let Some(name) = &media.name {
        properties.insert(MEDIA_NAME.to_string(), name.as_str().into());
    }
    properties.insert(MEDIA_MIME_TYPE.to_string(), media.mime_type.as_str().into());
    let (data_kind, data) = match &media.data {
        MediaData::Bytes(bytes) => (DATA_KIND_BYTES, PropertyValue::Blob(bytes.clone())),
        MediaData::Url(url) => (DATA_KIND_URL, PropertyValue::Text(url.to_string())),
    };
    properties.insert(MEDIA_DATA_KIND.to_string(), data_kind.into());
    properties.insert(MEDIA_DATA.to_string(), data);
    Ok(properties)
}

fn decode_media_list(media: Vec<Properties>) -> Result<Vec<Media>> {
    by_idx(media).iter().map(decode_media).collect()
}

fn decode_media(properties: &Properties) -> Result<Media> {
    let mime_type = required_text(properties, MEDIA_MIME_TYPE, "media")?;
    validate_mime_type(&mime_type)?;

    let data = properties.get(MEDIA_DATA).ok_or_else(|| {
        Error::InvalidMediaPayload("media node has no data".to_string())
    })?;
    let data_kind = optional_text(properties, MEDIA_DATA_KIND, "media")?;
    let data = match (data_kind.as_deref(), data) {
        (Some(DATA_KIND_URL), PropertyValue::Text(text)) | (None, PropertyValue::Text(text)) => {
            MediaData::Url(parse_url(text)?)
        }
        (Some(DATA_KIND_BYTES), PropertyValue::Blob(bytes)) | (None, PropertyValue::Blob(bytes)) => {
            MediaData::Bytes(bytes.clone())
        }
        (Some(DATA_KIND_BYTES), PropertyValue::Text(text)) => MediaData::Bytes(text.as_bytes().to_vec()),
        (kind, other) => {
            return Err(Error::InvalidMediaPayload(format!(
                "{} data cannot be read as {} media",
                other.type_name(),
                kind.unwrap_or("untagged")
            )));
        }
    };

    Ok(Media {
        id: optional_text(properties, CHILD_ID, "media")?,
        mime_type,
        name: optional_text(properties, MEDIA_NAME, "media")?,
        data,
    })
}

fn parse_url(text: &str) -> Result<url::Url> {
    url::Url::parse(text)
        .map_err(|e| Error::InvalidMediaPayload(format!("'{}' is not a valid URL: {}", text, e)))
}

fn validate_mime_type(mime_type: &str) -> Result<()> {
    mime_type
        .parse::<mime::Mime>()
        .map(|_| ())
        .map_err(|e| Error::InvalidMediaPayload(format!("invalid MIME type '{}': {}", mime_type, e)))
}

fn indexed(idx: usize) -> Properties {
    let mut properties = Properties::new();
    properties.insert(IDX.to_string(), PropertyValue::Integer(idx as i64));
    properties
}

/// Children in emission order; entries without an index go last
fn by_idx(mut children: Vec<Properties>) -> Vec<Properties> {
    children.sort_by_key(|p| p.get(IDX).and_then(PropertyValue::as_i64).unwrap_or(i64::MAX));
    children
}

fn required_text(properties: &Properties, key: &str, what: &str) -> Result<String> {
    optional_text(properties, key, what)?
        .ok_or_else(|| Error::MalformedRecord(format!("{} is missing '{}'", what, key)))
}

fn optional_text(properties: &Properties, key: &str, what: &str) -> Result<Option<String>> {
    match properties.get(key) {
        None | Some(PropertyValue::Null) => Ok(None),
        Some(PropertyValue::Text(text)) => Ok(Some(text.clone())),
        Some(other) => Err(Error::MalformedRecord(format!(
            "{} property '{}' is {}, expected text",
            what,
            key,
            other.type_name()
        ))),
    }
}
