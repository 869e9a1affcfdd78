// src/models/conversation.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Titles are derived from the first user message, capped at this many
/// characters.
pub const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Assistant => "ASSISTANT",
        }
    }

    /// Accepts both the stored form ("USER") and the wire form ("user").
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "USER" | "user" => Some(MessageRole::User),
            "ASSISTANT" | "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One immutable turn of a conversation as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Derives a conversation title from the first user message: the content
/// truncated to [`TITLE_MAX_CHARS`] characters, with "..." appended iff
/// the original was longer.
pub fn derive_title(first_user_content: &str) -> String {
    let mut title: String = first_user_content.chars().take(TITLE_MAX_CHARS).collect();
    if first_user_content.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}
