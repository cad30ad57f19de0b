//! Append path

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::graph::{GraphTx, NodeId, Properties, PropertyValue};
use crate::memory::lifecycle::ChatMemoryConfig;
use crate::memory::schema::{
    self, CONVERSATION_ID, CREATED_AT, HAS_MEDIA, HAS_MESSAGE, HAS_METADATA, HAS_TOOL_CALL,
    HAS_TOOL_RESPONSE, MEDIA_LABEL, MESSAGE_COUNT, MESSAGE_ID, METADATA_LABEL, MessageRecord,
    SEQUENCE, TOOL_CALL_LABEL, TOOL_RESPONSE_LABEL,
};
use crate::message::Message;
use crate::Result;

/// Stage `messages` under the conversation, returning the sequence numbers
/// they were given
///
/// Must run inside a write transaction: the counter read and the counter
/// update are only race-free while the database write lock is held.
pub(crate) fn append(
    tx: &GraphTx<'_>,
    config: &ChatMemoryConfig,
    conversation_id: &str,
    messages: &[Message],
) -> Result<Vec<i64>> {
    // Encode everything up front so a bad message fails before any write
    let records = messages
        .iter()
        .map(schema::encode)
        .collect::<Result<Vec<_>>>()?;

    let now = Utc::now().to_rfc3339();
    let conversation = merge_conversation(tx, config, conversation_id, &now)?;
    let mut count = message_count(tx, conversation)?;

    let mut sequences = Vec::with_capacity(records.len());
    for record in records {
        count += 1;
        let message = create_message(tx, config, record, count, &now)?;
        tx.relate(conversation, HAS_MESSAGE, message)?;
        sequences.push(count);
    }
    tx.set_property(conversation, MESSAGE_COUNT, &PropertyValue::Integer(count))?;

    debug!(
        "Staged {} message(s) for conversation {} (sequence now {})",
        sequences.len(),
        conversation_id,
        count
    );
    Ok(sequences)
}

fn merge_conversation(
    tx: &GraphTx<'_>,
    config: &ChatMemoryConfig,
    conversation_id: &str,
    now: &str,
) -> Result<NodeId> {
    let (conversation, created) =
        tx.merge_node(config.session_label(), CONVERSATION_ID, &conversation_id.into())?;
    if created {
        tx.set_property(conversation, MESSAGE_COUNT, &PropertyValue::Integer(0))?;
        tx.set_property(conversation, CREATED_AT, &now.into())?;
        debug!("Created conversation node for: {}", conversation_id);
    }
    Ok(conversation)
}

/// Current value of the conversation's counter
///
/// Conversations written without a counter fall back to counting their
/// messages once; the counter is written back at the end of the append.
fn message_count(tx: &GraphTx<'_>, conversation: NodeId) -> Result<i64> {
    match tx.property(conversation, MESSAGE_COUNT)?.and_then(|v| v.as_i64()) {
        Some(count) => Ok(count),
        None => Ok(tx.related(conversation, HAS_MESSAGE)?.len() as i64),
    }
}

fn create_message(
    tx: &GraphTx<'_>,
    config: &ChatMemoryConfig,
    record: MessageRecord,
    sequence: i64,
    now: &str,
) -> Result<NodeId> {
    let mut properties = record.properties;
    properties.insert(MESSAGE_ID.to_string(), Uuid::new_v4().to_string().into());
    properties.insert(SEQUENCE.to_string(), sequence.into());
    properties.insert(CREATED_AT.to_string(), now.into());

    let message = tx.create_node(config.label_for(record.kind), &properties)?;

    if let Some(metadata) = &record.metadata {
        attach(tx, message, HAS_METADATA, METADATA_LABEL, metadata)?;
    }
    for call in &record.tool_calls {
        attach(tx, message, HAS_TOOL_CALL, TOOL_CALL_LABEL, call)?;
    }
    for response in &record.tool_responses {
        attach(tx, message, HAS_TOOL_RESPONSE, TOOL_RESPONSE_LABEL, response)?;
    }
    for media in &record.media {
        attach(tx, message, HAS_MEDIA, MEDIA_LABEL, media)?;
    }
    Ok(message)
}

fn attach(
    tx: &GraphTx<'_>,
    parent: NodeId,
    rel_type: &str,
    label: &str,
    properties: &Properties,
) -> Result<NodeId> {
    let child = tx.create_node(label, properties)?;
    tx.relate(parent, rel_type, child)?;
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDriver;
    use crate::message::{AssistantMessage, Media, ToolCall, UserMessage};

    #[test]
    fn test_append_builds_subgraph() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        let config = ChatMemoryConfig::default();
        let messages: Vec<Message> = vec![
            UserMessage::new("show me")
                .with_metadata("lang", "en")
                .with_media(Media::from_bytes("image/png", vec![1u8, 2, 3]))
                .into(),
            AssistantMessage::new("looking")
                .with_tool_call(ToolCall::function("c1", "search", "{}"))
                .into(),
        ];

        let sequences = driver.write(|tx| append(tx, &config, "conv", &messages))?;
        assert_eq!(sequences, vec![1, 2]);

        driver.read(|tx| {
            let conversation = tx.find_node("Session", CONVERSATION_ID, &"conv".into())?.unwrap();
            assert_eq!(tx.property(conversation, MESSAGE_COUNT)?, Some(PropertyValue::Integer(2)));
            assert!(tx.property(conversation, CREATED_AT)?.is_some());

            let nodes = tx.related(conversation, HAS_MESSAGE)?;
            assert_eq!(nodes.len(), 2);
            assert_eq!(tx.label(nodes[0])?.as_deref(), Some("UserMessage"));
            assert_eq!(tx.label(nodes[1])?.as_deref(), Some("AssistantMessage"));
            assert_eq!(tx.related(nodes[0], HAS_METADATA)?.len(), 1);
            assert_eq!(tx.related(nodes[0], HAS_MEDIA)?.len(), 1);
            assert_eq!(tx.related(nodes[1], HAS_TOOL_CALL)?.len(), 1);
            assert!(tx.related(nodes[1], HAS_METADATA)?.is_empty());

            let id = tx.property(nodes[0], MESSAGE_ID)?.unwrap();
            assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());
            Ok(())
        })
    }

    #[test]
    fn test_sequences_continue_across_calls() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        let config = ChatMemoryConfig::default();

        driver.write(|tx| append(tx, &config, "conv", &[Message::user("a"), Message::assistant("b")]))?;
        let sequences = driver.write(|tx| append(tx, &config, "conv", &[Message::user("c")]))?;
        assert_eq!(sequences, vec![3]);

        // Both appends landed on the same conversation node
        let total = driver.read(|tx| {
            let first = tx.find_node("Session", CONVERSATION_ID, &"conv".into())?;
            Ok(first.map(|id| tx.related(id, HAS_MESSAGE)).transpose()?.map(|m| m.len()))
        })?;
        assert_eq!(total, Some(3));
        Ok(())
    }

    #[test]
    fn test_missing_counter_falls_back_to_message_count() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        let config = ChatMemoryConfig::default();
        driver.write(|tx| {
            let (conversation, _) = tx.merge_node("Session", CONVERSATION_ID, &"legacy".into())?;
            for _ in 0..2 {
                let message = tx.create_node("UserMessage", &Properties::new())?;
                tx.relate(conversation, HAS_MESSAGE, message)?;
            }
            Ok(())
        })?;

        let sequences = driver.write(|tx| append(tx, &config, "legacy", &[Message::user("next")]))?;
        assert_eq!(sequences, vec![3]);
        Ok(())
    }

    #[test]
    fn test_bad_message_writes_nothing() -> Result<()> {
        let driver = GraphDriver::in_memory()?;
        let config = ChatMemoryConfig::default();
        let messages: Vec<Message> = vec![
            Message::user("fine"),
            UserMessage::new("broken")
                .with_media(Media::from_bytes("???", vec![0u8]))
                .into(),
        ];

        let result = driver.write(|tx| append(tx, &config, "conv", &messages));
        assert!(result.is_err());

        let conversation = driver.read(|tx| tx.find_node("Session", CONVERSATION_ID, &"conv".into()))?;
        assert!(conversation.is_none());
        Ok(())
    }
}
