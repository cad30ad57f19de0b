//! Fetch path

use tracing::debug;

use crate::graph::{GraphTx, NodeId, Properties, PropertyValue};
use crate::memory::lifecycle::ChatMemoryConfig;
use crate::memory::schema::{
    self, CONVERSATION_ID, HAS_MEDIA, HAS_MESSAGE, HAS_METADATA, HAS_TOOL_CALL, HAS_TOOL_RESPONSE,
    SEQUENCE, StoredMessage,
};
use crate::message::Message;
use crate::{Error, Result};

/// Load the latest `last_n` messages of a conversation, oldest first
///
/// Any message that cannot be rebuilt fails the whole call.
pub(crate) fn fetch(
    tx: &GraphTx<'_>,
    config: &ChatMemoryConfig,
    conversation_id: &str,
    last_n: usize,
) -> Result<Vec<Message>> {
    if last_n == 0 {
        return Ok(Vec::new());
    }
    let Some(conversation) =
        tx.find_node(config.session_label(), CONVERSATION_ID, &conversation_id.into())?
    else {
        debug!("No conversation stored for: {}", conversation_id);
        return Ok(Vec::new());
    };

    let mut nodes = tx.latest_related_by(conversation, HAS_MESSAGE, SEQUENCE, last_n)?;
    nodes.reverse();

    nodes
        .into_iter()
        .map(|node| load(tx, node).and_then(schema::decode))
        .collect()
}

fn load(tx: &GraphTx<'_>, node: NodeId) -> Result<StoredMessage> {
    let metadata = match tx.related(node, HAS_METADATA)?.first() {
        Some(metadata) => Some(tx.properties(*metadata)?),
        None => None,
    };
    let properties = tx.properties(node)?;
    if !matches!(properties.get(SEQUENCE), Some(PropertyValue::Integer(_))) {
        return Err(Error::MalformedRecord(format!(
            "message node {} has no integer '{}'",
            node, SEQUENCE
        )));
    }
    Ok(StoredMessage {
        properties,
        metadata,
        tool_calls: children(tx, node, HAS_TOOL_CALL)?,
        tool_responses: children(tx, node, HAS_TOOL_RESPONSE)?,
        media: children(tx, node, HAS_MEDIA)?,
    })
}

fn children(tx: &GraphTx<'_>, node: NodeId, rel_type: &str) -> Result<Vec<Properties>> {
    tx.related(node, rel_type)?
        .into_iter()
        .map(|child| tx.properties(child))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDriver;
    use crate::memory::schema::{MESSAGE_TYPE, TEXT_CONTENT};
    use crate::memory::write;

    fn seeded(texts: &[&str]) -> Result<(GraphDriver, ChatMemoryConfig)> {
        let driver = GraphDriver::in_memory()?;
        let config = ChatMemoryConfig::default();
        let messages: Vec<Message> = texts.iter().map(|t| Message::user(*t)).collect();
        driver.write(|tx| write::append(tx, &config, "conv", &messages))?;
        Ok((driver, config))
    }

    fn texts(messages: &[Message]) -> Vec<&str> {
        messages.iter().filter_map(Message::text).collect()
    }

    #[test]
    fn test_fetch_latest_in_chronological_order() -> Result<()> {
        let (driver, config) = seeded(&["1", "2", "3", "4", "5"])?;

        let last_two = driver.read(|tx| fetch(tx, &config, "conv", 2))?;
        assert_eq!(texts(&last_two), vec!["4", "5"]);

        let everything = driver.read(|tx| fetch(tx, &config, "conv", 100))?;
        assert_eq!(texts(&everything), vec!["1", "2", "3", "4", "5"]);
        Ok(())
    }

    #[test]
    fn test_ordering_follows_sequence_numerically() -> Result<()> {
        let texts_in: Vec<String> = (1..=12).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = texts_in.iter().map(String::as_str).collect();
        let (driver, config) = seeded(&refs)?;

        let last_three = driver.read(|tx| fetch(tx, &config, "conv", 3))?;
        assert_eq!(texts(&last_three), vec!["10", "11", "12"]);
        Ok(())
    }

    #[test]
    fn test_zero_and_unknown_are_empty() -> Result<()> {
        let (driver, config) = seeded(&["a"])?;
        assert!(driver.read(|tx| fetch(tx, &config, "conv", 0))?.is_empty());
        assert!(driver.read(|tx| fetch(tx, &config, "never-seen", 10))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_session_label_scopes_lookup() -> Result<()> {
        let (driver, _) = seeded(&["a"])?;
        let other = ChatMemoryConfig::builder().session_label("Conversation").build()?;
        assert!(driver.read(|tx| fetch(tx, &other, "conv", 10))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_kind_fails_whole_fetch() -> Result<()> {
        let (driver, config) = seeded(&["fine"])?;
        driver.write(|tx| {
            let conversation = tx
                .find_node("Session", CONVERSATION_ID, &"conv".into())?
                .ok_or_else(|| Error::MalformedRecord("missing conversation".into()))?;
            let mut properties = Properties::new();
            properties.insert(MESSAGE_TYPE.into(), "system".into());
            properties.insert(TEXT_CONTENT.into(), "be brief".into());
            properties.insert(SEQUENCE.into(), PropertyValue::Integer(2));
            let node = tx.create_node("SystemMessage", &properties)?;
            tx.relate(conversation, HAS_MESSAGE, node)?;
            Ok(())
        })?;

        let err = driver.read(|tx| fetch(tx, &config, "conv", 10)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMessageKind(ref kind) if kind == "system"));
        Ok(())
    }

    #[test]
    fn test_message_without_sequence_is_reported() -> Result<()> {
        let (driver, config) = seeded(&["1", "2", "3"])?;
        driver.write(|tx| {
            let conversation = tx
                .find_node("Session", CONVERSATION_ID, &"conv".into())?
                .ok_or_else(|| Error::MalformedRecord("missing conversation".into()))?;
            let mut properties = Properties::new();
            properties.insert(MESSAGE_TYPE.into(), "user".into());
            properties.insert(TEXT_CONTENT.into(), "orphan".into());
            let node = tx.create_node("UserMessage", &properties)?;
            tx.relate(conversation, HAS_MESSAGE, node)?;
            Ok(())
        })?;

        // Even a window of one reaches the unsequenced node
        let err = driver.read(|tx| fetch(tx, &config, "conv", 1)).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(ref reason) if reason.contains(SEQUENCE)));
        Ok(())
    }
}
