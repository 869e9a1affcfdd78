// src/models/mod.rs
pub mod conversation;

pub use conversation::{derive_title, Conversation, MessageRole, StoredMessage, TITLE_MAX_CHARS};
