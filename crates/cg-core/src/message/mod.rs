//! Message model
//!
//! The closed, versioned set of message shapes that the store persists.

mod types;

pub use types::{
    AssistantMessage, Media, MediaData, Message, MessageKind, Metadata, ToolCall, ToolResponse,
    ToolResponseMessage, UserMessage,
};
