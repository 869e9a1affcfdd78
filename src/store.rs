// src/store.rs
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{derive_title, Conversation, MessageRole, StoredMessage};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Unknown message role in store: {0}")]
    UnknownRole(String),
}

/// Outcome of persisting a completed assistant reply: the canonical row
/// plus the conversation title, if one was just derived.
#[derive(Debug, Clone)]
pub struct FinalizedExchange {
    pub message: StoredMessage,
    pub title: Option<String>,
}

/// All SQL for the conversation/message schema lives here. Handlers and
/// the chat endpoint go through this type rather than touching the pool.
#[derive(Clone)]
pub struct ConversationStore {
    pool: PgPool,
}

impl ConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All conversations, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at
             FROM conversations
             ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    pub async fn create_conversation(&self) -> Result<Conversation, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id) VALUES ($1)
             RETURNING id, title, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    /// Reuses the given conversation if it exists, otherwise creates a
    /// fresh one. An unknown id is treated the same as no id.
    pub async fn get_or_create_conversation(
        &self,
        id: Option<Uuid>,
    ) -> Result<Conversation, StoreError> {
        if let Some(id) = id {
            if let Some(conversation) = self.get_conversation(id).await? {
                return Ok(conversation);
            }
            tracing::warn!("Conversation {} not found, creating a new one", id);
        }
        self.create_conversation().await
    }

    /// All messages for a conversation, oldest first. An unknown id
    /// yields an empty list rather than an error.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, String, DateTime<Utc>)>(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, conversation_id, role, content, created_at)| {
                let role = MessageRole::parse(&role).ok_or(StoreError::UnknownRole(role))?;
                Ok(StoredMessage {
                    id,
                    conversation_id,
                    role,
                    content,
                    created_at,
                })
            })
            .collect()
    }

    /// Appends one immutable message row and bumps the conversation's
    /// updated_at timestamp.
    pub async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO messages (id, conversation_id, role, content)
             VALUES ($1, $2, $3, $4)
             RETURNING created_at",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(StoredMessage {
            id,
            conversation_id,
            role,
            content: content.to_string(),
            created_at,
        })
    }

    /// Persists the completed assistant reply and, if the conversation
    /// just reached its second message without a title, derives one from
    /// the first user message. The whole sequence runs in a single
    /// transaction so concurrent completions cannot interleave the
    /// count/title check.
    pub async fn finalize_exchange(
        &self,
        conversation_id: Uuid,
        assistant_text: &str,
    ) -> Result<FinalizedExchange, StoreError> {
        let mut tx = self.pool.begin().await?;

        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO messages (id, conversation_id, role, content)
             VALUES ($1, $2, 'ASSISTANT', $3)
             RETURNING created_at",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(assistant_text)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        let existing_title: Option<Option<String>> = sqlx::query_scalar(
            "SELECT title FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let message_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;

        let mut title = existing_title.flatten();
        if message_count == 2 && title.is_none() {
            let first_user_content: Option<String> = sqlx::query_scalar(
                "SELECT content FROM messages
                 WHERE conversation_id = $1 AND role = 'USER'
                 ORDER BY created_at ASC
                 LIMIT 1",
            )
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(content) = first_user_content {
                let derived = derive_title(&content);
                sqlx::query("UPDATE conversations SET title = $1 WHERE id = $2")
                    .bind(&derived)
                    .bind(conversation_id)
                    .execute(&mut *tx)
                    .await?;
                title = Some(derived);
            }
        }

        tx.commit().await?;

        Ok(FinalizedExchange {
            message: StoredMessage {
                id,
                conversation_id,
                role: MessageRole::Assistant,
                content: assistant_text.to_string(),
                created_at,
            },
            title,
        })
    }

    /// Removes a conversation and its messages. Deleting an unknown id
    /// succeeds with no effect.
    pub async fn delete_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
