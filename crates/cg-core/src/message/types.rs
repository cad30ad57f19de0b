//! Conversation message types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;

use crate::{Error, Result};

/// Free-form key/value metadata attached to a message
pub type Metadata = BTreeMap<String, JsonValue>;

/// The closed set of message kinds the store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    #[serde(rename = "tool")]
    ToolResponse,
}

impl MessageKind {
    /// Value persisted in the `messageType` property
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
            MessageKind::ToolResponse => "tool",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(MessageKind::User),
            "assistant" => Ok(MessageKind::Assistant),
            "tool" => Ok(MessageKind::ToolResponse),
            other => Err(Error::UnsupportedMessageKind(other.to_string())),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    #[serde(rename = "tool")]
    ToolResponse(ToolResponseMessage),
}

impl Message {
    /// Create a user message with text
    pub fn user(text: impl Into<String>) -> Self {
        Message::User(UserMessage::new(text))
    }

    /// Create an assistant message with text
    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::new(text))
    }

    /// Create a tool-response message
    pub fn tool_response(responses: Vec<ToolResponse>) -> Self {
        Message::ToolResponse(ToolResponseMessage::new(responses))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::User(_) => MessageKind::User,
            Message::Assistant(_) => MessageKind::Assistant,
            Message::ToolResponse(_) => MessageKind::ToolResponse,
        }
    }

    /// Text content; `None` for tool-response messages
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::User(m) => Some(&m.text),
            Message::Assistant(m) => Some(&m.text),
            Message::ToolResponse(_) => None,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Message::User(m) => &m.metadata,
            Message::Assistant(m) => &m.metadata,
            Message::ToolResponse(m) => &m.metadata,
        }
    }

    pub fn media(&self) -> &[Media] {
        match self {
            Message::User(m) => &m.media,
            Message::Assistant(m) => &m.media,
            Message::ToolResponse(_) => &[],
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant(m) => &m.tool_calls,
            _ => &[],
        }
    }

    pub fn tool_responses(&self) -> &[ToolResponse] {
        match self {
            Message::ToolResponse(m) => &m.responses,
            _ => &[],
        }
    }
}

impl From<UserMessage> for Message {
    fn from(message: UserMessage) -> Self {
        Message::User(message)
    }
}

impl From<AssistantMessage> for Message {
    fn from(message: AssistantMessage) -> Self {
        Message::Assistant(message)
    }
}

impl From<ToolResponseMessage> for Message {
    fn from(message: ToolResponseMessage) -> Self {
        Message::ToolResponse(message)
    }
}

/// Message written by the user, optionally with attachments
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl UserMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Message produced by the model; tool invocations travel here
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl AssistantMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Results of tool invocations fed back to the model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResponseMessage {
    pub responses: Vec<ToolResponse>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl ToolResponseMessage {
    pub fn new(responses: Vec<ToolResponse>) -> Self {
        Self {
            responses,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub name: String,
    /// Raw arguments as emitted by the model (usually JSON text)
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        call_type: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: call_type.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// A `function` tool call, the common case
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(id, "function", name, arguments)
    }
}

/// The result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response_data: String,
}

impl ToolResponse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, response_data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response_data: response_data.into(),
        }
    }
}

/// Non-text attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data: MediaData,
}

impl Media {
    /// Create media with an inline byte payload
    pub fn from_bytes(mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            mime_type: mime_type.into(),
            name: None,
            data: MediaData::Bytes(bytes.into()),
        }
    }

    /// Create media referencing a URL
    pub fn from_url(mime_type: impl Into<String>, url: Url) -> Self {
        Self {
            id: None,
            mime_type: mime_type.into(),
            name: None,
            data: MediaData::Url(url),
        }
    }

    /// Create media from a URL string, rejecting anything that does not parse
    ///
    /// The string is stored in its normalized WHATWG form, so
    /// `https://example.com` reads back as `https://example.com/`.
    pub fn from_url_str(mime_type: impl Into<String>, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidMediaPayload(format!("'{}' is not a valid URL: {}", url, e)))?;
        Ok(Self::from_url(mime_type, url))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Media payload: either the raw bytes or a reference to them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaData {
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Url(Url),
}

impl MediaData {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MediaData::Bytes(bytes) => Some(bytes),
            MediaData::Url(_) => None,
        }
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            MediaData::Url(url) => Some(url),
            MediaData::Bytes(_) => None,
        }
    }
}

/// Bytes travel as standard base64 in JSON
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [MessageKind::User, MessageKind::Assistant, MessageKind::ToolResponse] {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = "system".parse::<MessageKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedMessageKind(ref k) if k == "system"));
    }

    #[test]
    fn test_accessors() {
        let message: Message = AssistantMessage::new("calling")
            .with_tool_call(ToolCall::function("c1", "search", "{}"))
            .into();
        assert_eq!(message.kind(), MessageKind::Assistant);
        assert_eq!(message.text(), Some("calling"));
        assert_eq!(message.tool_calls().len(), 1);
        assert!(message.media().is_empty());

        let tool = Message::tool_response(vec![ToolResponse::new("c1", "search", "ok")]);
        assert_eq!(tool.text(), None);
        assert_eq!(tool.tool_responses()[0].response_data, "ok");
    }

    #[test]
    fn test_from_url_str_rejects_garbage() {
        let err = Media::from_url_str("image/png", "not a url").unwrap_err();
        assert!(matches!(err, Error::InvalidMediaPayload(_)));

        let media = Media::from_url_str("image/png", "https://example.com/cat.png").unwrap();
        assert_eq!(media.data.as_url().unwrap().as_str(), "https://example.com/cat.png");
    }

    #[test]
    fn test_json_shape() {
        let message: Message = UserMessage::new("look")
            .with_media(Media::from_bytes("image/png", vec![1u8, 2, 3]))
            .with_metadata("lang", "en")
            .into();

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], "user");
        assert_eq!(value["media"][0]["data"]["bytes"], "AQID");
        assert_eq!(value["metadata"]["lang"], "en");

        let parsed: Message = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_tool_message_json() {
        let parsed: Message = serde_json::from_value(json!({
            "kind": "tool",
            "responses": [{"id": "c1", "name": "weather", "response_data": "sunny"}]
        }))
        .unwrap();
        assert_eq!(parsed.kind(), MessageKind::ToolResponse);
        assert_eq!(parsed.tool_responses()[0].name, "weather");
    }
}
