//! Graph-backed chat memory

use tracing::{debug, info};

use crate::graph::GraphDriver;
use crate::memory::lifecycle::{self, ChatMemoryConfig, RetentionPolicy};
use crate::memory::{ChatMemory, read, write};
use crate::message::Message;
use crate::{Error, Result};

/// [`ChatMemory`] stored in a labeled property graph
///
/// Cloning is cheap; clones share the driver and therefore its connections.
#[derive(Debug, Clone)]
pub struct GraphChatMemory {
    driver: GraphDriver,
    config: ChatMemoryConfig,
}

impl GraphChatMemory {
    /// Create a memory on top of an open driver
    pub fn new(driver: GraphDriver, config: ChatMemoryConfig) -> Self {
        info!(
            "GraphChatMemory ready (session label: {}, location: {})",
            config.session_label(),
            driver
                .location()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );
        Self { driver, config }
    }

    /// Create an in-memory store with default labels (useful for testing)
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(GraphDriver::in_memory()?, ChatMemoryConfig::default()))
    }

    pub fn config(&self) -> &ChatMemoryConfig {
        &self.config
    }

    /// Configured retention, for an external pruning job to act on
    pub fn retention(&self) -> &RetentionPolicy {
        self.config.retention()
    }

    pub fn driver(&self) -> &GraphDriver {
        &self.driver
    }
}

impl ChatMemory for GraphChatMemory {
    fn append(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        if conversation_id.is_empty() {
            return Err(Error::InvalidConversationId(
                "conversation id must not be empty".to_string(),
            ));
        }
        if messages.is_empty() {
            debug!("Nothing to append for conversation: {}", conversation_id);
            return Ok(());
        }

        let sequences = self
            .driver
            .write(|tx| write::append(tx, &self.config, conversation_id, messages))?;
        debug!(
            "Appended {} message(s) to conversation {} at sequences {:?}",
            sequences.len(),
            conversation_id,
            sequences
        );
        Ok(())
    }

    fn fetch(&self, conversation_id: &str, last_n: usize) -> Result<Vec<Message>> {
        if conversation_id.is_empty() {
            return Ok(Vec::new());
        }
        let messages = self
            .driver
            .read(|tx| read::fetch(tx, &self.config, conversation_id, last_n))?;
        debug!(
            "Fetched {} message(s) from conversation {}",
            messages.len(),
            conversation_id
        );
        Ok(messages)
    }

    fn clear(&self, conversation_id: &str) -> Result<()> {
        if conversation_id.is_empty() {
            return Ok(());
        }
        let removed = self
            .driver
            .write(|tx| lifecycle::clear(tx, &self.config, conversation_id))?;
        info!("Cleared {} message(s) from conversation {}", removed, conversation_id);
        Ok(())
    }
}
