//! cg-core: chat memory persisted as a labeled property graph
//!
//! Stores ordered conversation messages (user, assistant with tool calls,
//! tool responses) together with their metadata and media attachments as
//! nodes and relationships in a SQLite-backed graph, and reads them back
//! as typed messages.

pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod message;

pub use config::{Config, GraphConfig, MemoryConfig};
pub use error::{Error, Result};
pub use graph::{GraphDriver, GraphTx};
pub use memory::{ChatMemory, ChatMemoryConfig, GraphChatMemory, RetentionPolicy};
pub use message::{
    AssistantMessage, Media, MediaData, Message, MessageKind, Metadata, ToolCall, ToolResponse,
    ToolResponseMessage, UserMessage,
};
