//! Conversation memory persisted as a graph
//!
//! Each conversation is a node owning its messages through `HAS_MESSAGE`
//! relationships; metadata, tool calls, tool responses and media hang off
//! the message nodes. [`GraphChatMemory`] is the [`ChatMemory`] backed by a
//! [`GraphDriver`](crate::graph::GraphDriver).

mod lifecycle;
mod read;
pub mod schema;
mod store;
mod write;

pub use lifecycle::{
    ChatMemoryConfig, ChatMemoryConfigBuilder, DEFAULT_ASSISTANT_LABEL, DEFAULT_SESSION_LABEL,
    DEFAULT_TOOL_RESPONSE_LABEL, DEFAULT_USER_LABEL, RetentionPolicy,
};
pub use store::GraphChatMemory;

use crate::message::Message;
use crate::Result;

/// Storage of ordered chat messages keyed by conversation id
///
/// Every operation is all-or-nothing: a failed call leaves no partial
/// writes behind and returns no partial results.
pub trait ChatMemory: Send + Sync {
    /// Append `messages` to the end of the conversation, in order
    fn append(&self, conversation_id: &str, messages: &[Message]) -> Result<()>;

    /// Append a single message
    fn append_one(&self, conversation_id: &str, message: Message) -> Result<()> {
        self.append(conversation_id, std::slice::from_ref(&message))
    }

    /// The most recent `last_n` messages, oldest first
    fn fetch(&self, conversation_id: &str, last_n: usize) -> Result<Vec<Message>>;

    /// Remove every message of the conversation
    fn clear(&self, conversation_id: &str) -> Result<()>;
}
