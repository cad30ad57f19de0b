//! Conversation lifecycle: naming, retention and clearing

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::graph::{GraphTx, PropertyValue};
use crate::memory::schema::{
    CONVERSATION_ID, HAS_MEDIA, HAS_MESSAGE, HAS_METADATA, HAS_TOOL_CALL, HAS_TOOL_RESPONSE,
    MESSAGE_COUNT,
};
use crate::message::MessageKind;
use crate::{Error, Result};

pub const DEFAULT_SESSION_LABEL: &str = "Session";
pub const DEFAULT_USER_LABEL: &str = "UserMessage";
pub const DEFAULT_ASSISTANT_LABEL: &str = "AssistantMessage";
pub const DEFAULT_TOOL_RESPONSE_LABEL: &str = "ToolResponseMessage";

/// How long a conversation is meant to live
///
/// The store only records the value. Pruning is left to whatever scheduler
/// queries [`cutoff`](Self::cutoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    time_to_live: Option<Duration>,
}

impl RetentionPolicy {
    /// Conversations never expire
    pub fn never() -> Self {
        Self::default()
    }

    /// Conversations expire after `time_to_live`; negative durations are rejected
    pub fn expiring_after(time_to_live: Duration) -> Result<Self> {
        if time_to_live < Duration::zero() {
            return Err(Error::InvalidConfiguration(format!(
                "time-to-live must not be negative, got {}s",
                time_to_live.num_seconds()
            )));
        }
        Ok(Self {
            time_to_live: Some(time_to_live),
        })
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    pub fn time_to_live_secs(&self) -> Option<i64> {
        self.time_to_live.map(|ttl| ttl.num_seconds())
    }

    pub fn expires(&self) -> bool {
        self.time_to_live.is_some()
    }

    /// Instant before which conversations are due for pruning, if any
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.time_to_live.and_then(|ttl| now.checked_sub_signed(ttl))
    }
}

/// Labels and lifecycle settings of a [`GraphChatMemory`](crate::memory::GraphChatMemory)
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMemoryConfig {
    session_label: String,
    user_label: String,
    assistant_label: String,
    tool_response_label: String,
    retention: RetentionPolicy,
    remove_conversation_on_clear: bool,
}

impl ChatMemoryConfig {
    pub fn builder() -> ChatMemoryConfigBuilder {
        ChatMemoryConfigBuilder::default()
    }

    pub fn session_label(&self) -> &str {
        &self.session_label
    }

    pub fn user_label(&self) -> &str {
        &self.user_label
    }

    pub fn assistant_label(&self) -> &str {
        &self.assistant_label
    }

    pub fn tool_response_label(&self) -> &str {
        &self.tool_response_label
    }

    /// Node label used for messages of `kind`
    pub fn label_for(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::User => &self.user_label,
            MessageKind::Assistant => &self.assistant_label,
            MessageKind::ToolResponse => &self.tool_response_label,
        }
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    pub fn remove_conversation_on_clear(&self) -> bool {
        self.remove_conversation_on_clear
    }
}

impl Default for ChatMemoryConfig {
    fn default() -> Self {
        Self {
            session_label: DEFAULT_SESSION_LABEL.to_string(),
            user_label: DEFAULT_USER_LABEL.to_string(),
            assistant_label: DEFAULT_ASSISTANT_LABEL.to_string(),
            tool_response_label: DEFAULT_TOOL_RESPONSE_LABEL.to_string(),
            retention: RetentionPolicy::never(),
            remove_conversation_on_clear: false,
        }
    }
}

/// Builder for [`ChatMemoryConfig`]
#[derive(Debug, Clone, Default)]
pub struct ChatMemoryConfigBuilder {
    session_label: Option<String>,
    user_label: Option<String>,
    assistant_label: Option<String>,
    tool_response_label: Option<String>,
    time_to_live: Option<Duration>,
    remove_conversation_on_clear: bool,
}

impl ChatMemoryConfigBuilder {
    pub fn session_label(mut self, label: impl Into<String>) -> Self {
        self.session_label = Some(label.into());
        self
    }

    pub fn user_label(mut self, label: impl Into<String>) -> Self {
        self.user_label = Some(label.into());
        self
    }

    pub fn assistant_label(mut self, label: impl Into<String>) -> Self {
        self.assistant_label = Some(label.into());
        self
    }

    pub fn tool_response_label(mut self, label: impl Into<String>) -> Self {
        self.tool_response_label = Some(label.into());
        self
    }

    pub fn time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Some(time_to_live);
        self
    }

    /// Also delete the conversation node itself on [`clear`](crate::memory::ChatMemory::clear)
    pub fn remove_conversation_on_clear(mut self, remove: bool) -> Self {
        self.remove_conversation_on_clear = remove;
        self
    }

    pub fn build(self) -> Result<ChatMemoryConfig> {
        let retention = match self.time_to_live {
            Some(ttl) => RetentionPolicy::expiring_after(ttl)?,
            None => RetentionPolicy::never(),
        };
        let defaults = ChatMemoryConfig::default();
        Ok(ChatMemoryConfig {
            session_label: self.session_label.unwrap_or(defaults.session_label),
            user_label: self.user_label.unwrap_or(defaults.user_label),
            assistant_label: self.assistant_label.unwrap_or(defaults.assistant_label),
            tool_response_label: self.tool_response_label.unwrap_or(defaults.tool_response_label),
            retention,
            remove_conversation_on_clear: self.remove_conversation_on_clear,
        })
    }
}

/// Detach-delete every message of a conversation along with its children
///
/// Returns how many messages were removed. A conversation that does not
/// exist is left alone.
pub(crate) fn clear(tx: &GraphTx<'_>, config: &ChatMemoryConfig, conversation_id: &str) -> Result<usize> {
    let key = PropertyValue::from(conversation_id);
    let Some(conversation) = tx.find_node(config.session_label(), CONVERSATION_ID, &key)? else {
        debug!("Nothing to clear for unknown conversation: {}", conversation_id);
        return Ok(0);
    };

    let messages = tx.related(conversation, HAS_MESSAGE)?;
    for message in &messages {
        let mut children = Vec::new();
        for rel_type in [HAS_METADATA, HAS_TOOL_CALL, HAS_TOOL_RESPONSE, HAS_MEDIA] {
            children.extend(tx.related(*message, rel_type)?);
        }
        tx.detach_delete(&children)?;
    }
    let removed = tx.detach_delete(&messages)?;

    if config.remove_conversation_on_clear() {
        tx.detach_delete(&[conversation])?;
        debug!("Removed conversation node: {}", conversation_id);
    } else {
        tx.set_property(conversation, MESSAGE_COUNT, &PropertyValue::Integer(0))?;
    }
    Ok(removed)
}
