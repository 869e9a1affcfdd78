// src/session.rs
//
// Client-side state controller: owns the conversation list, the current
// selection, and the live transcript, and reconciles optimistic local
// appends with server-confirmed state. Page-local UI state made explicit,
// with defined creation/reset rules.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Conversation, MessageRole, StoredMessage};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Backend request failed: {0}")]
    Backend(String),
    #[error("Chat stream failed: {0}")]
    Stream(String),
}

/// Events of the chat streaming endpoint as consumed by a client.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Started {
        conversation_id: Uuid,
    },
    Delta {
        text: String,
    },
    Done {
        message_id: Option<Uuid>,
        created_at: Option<DateTime<Utc>>,
        title: Option<String>,
    },
    Error {
        message: String,
    },
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// The server surface the session talks to. The production
/// implementation speaks HTTP/SSE against the conversation and chat
/// endpoints; tests substitute an in-memory mock.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, SessionError>;
    async fn create_conversation(&self) -> Result<Conversation, SessionError>;
    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, SessionError>;
    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<(), SessionError>;
    async fn stream_chat(
        &self,
        conversation_id: Option<Uuid>,
        history: Vec<TranscriptEntry>,
    ) -> Result<ChatEventStream, SessionError>;
}

/// One turn of the locally held transcript. Optimistically appended
/// entries carry no id until the server confirms them.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub id: Option<Uuid>,
    pub role: MessageRole,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl TranscriptEntry {
    fn from_stored(message: StoredMessage) -> Self {
        Self {
            id: Some(message.id),
            role: message.role,
            content: message.content,
            created_at: Some(message.created_at),
        }
    }
}

pub struct ChatSession<B: ChatBackend> {
    backend: B,
    conversations: Vec<Conversation>,
    selected: Option<Uuid>,
    transcript: Vec<TranscriptEntry>,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            conversations: Vec::new(),
            selected: None,
            transcript: Vec::new(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Reloads the conversation list from the server.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        self.conversations = self.backend.list_conversations().await?;
        Ok(())
    }

    /// Explicit "new conversation" action: creates an empty conversation
    /// server-side and selects it.
    pub async fn new_conversation(&mut self) -> Result<Uuid, SessionError> {
        let conversation = self.backend.create_conversation().await?;
        let id = conversation.id;
        self.conversations.insert(0, conversation);
        self.selected = Some(id);
        self.transcript.clear();
        Ok(id)
    }

    /// Selects a conversation and loads its transcript. Inactive
    /// transcripts are never cached locally; the stored order is the
    /// sole source of truth on every select.
    pub async fn select(&mut self, conversation_id: Uuid) -> Result<(), SessionError> {
        let messages = self.backend.fetch_messages(conversation_id).await?;
        self.selected = Some(conversation_id);
        self.transcript = messages
            .into_iter()
            .map(TranscriptEntry::from_stored)
            .collect();
        Ok(())
    }

    /// Submits a user message: appends it optimistically, streams the
    /// assistant reply into the transcript as it arrives, and on the
    /// terminal event stamps the assistant entry with its canonical id
    /// and refreshes the conversation list (titles, timestamps).
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        self.transcript.push(TranscriptEntry {
            id: None,
            role: MessageRole::User,
            content: text.to_string(),
            created_at: None,
        });

        let history = self.transcript.clone();
        let mut events = self.backend.stream_chat(self.selected, history).await?;

        let mut assistant_index = None;
        while let Some(event) = events.next().await {
            match event {
                ChatEvent::Started { conversation_id } => {
                    // The server may have created the conversation; adopt
                    // its id so the next send continues the same thread.
                    self.selected = Some(conversation_id);
                }
                ChatEvent::Delta { text } => {
                    let index = *assistant_index.get_or_insert_with(|| {
                        self.transcript.push(TranscriptEntry {
                            id: None,
                            role: MessageRole::Assistant,
                            content: String::new(),
                            created_at: None,
                        });
                        self.transcript.len() - 1
                    });
                    self.transcript[index].content.push_str(&text);
                }
                ChatEvent::Done {
                    message_id,
                    created_at,
                    ..
                } => {
                    if let Some(index) = assistant_index {
                        self.transcript[index].id = message_id;
                        self.transcript[index].created_at = created_at;
                    }
                    self.refresh().await?;
                }
                ChatEvent::Error { message } => {
                    return Err(SessionError::Stream(message));
                }
            }
        }

        Ok(())
    }

    /// Deletes a conversation locally and remotely, clearing the
    /// selection and transcript if it was the active one.
    pub async fn delete(&mut self, conversation_id: Uuid) -> Result<(), SessionError> {
        self.backend.delete_conversation(conversation_id).await?;
        self.conversations.retain(|c| c.id != conversation_id);
        if self.selected == Some(conversation_id) {
            self.selected = None;
            self.transcript.clear();
        }
        Ok(())
    }

    /// Returns the session to its initial empty state.
    pub fn reset(&mut self) {
        self.conversations.clear();
        self.selected = None;
        self.transcript.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::derive_title;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory backend mirroring the server's persistence and title
    /// semantics: create-if-absent conversations, user message persisted
    /// from the trailing user turn, title derived on the second message.
    #[derive(Clone, Default)]
    struct MockBackend {
        state: Arc<Mutex<MockState>>,
        reply: String,
        fail_stream: bool,
    }

    #[derive(Default)]
    struct MockState {
        conversations: Vec<Conversation>,
        messages: HashMap<Uuid, Vec<StoredMessage>>,
    }

    impl MockBackend {
        fn with_reply(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Self::default()
            }
        }

        fn insert_conversation(state: &mut MockState) -> Conversation {
            let now = Utc::now();
            let conversation = Conversation {
                id: Uuid::new_v4(),
                title: None,
                created_at: now,
                updated_at: now,
            };
            state.conversations.push(conversation.clone());
            conversation
        }

        fn append(
            state: &mut MockState,
            conversation_id: Uuid,
            role: MessageRole,
            content: &str,
        ) -> StoredMessage {
            let message = StoredMessage {
                id: Uuid::new_v4(),
                conversation_id,
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            };
            state
                .messages
                .entry(conversation_id)
                .or_default()
                .push(message.clone());
            message
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        async fn list_conversations(&self) -> Result<Vec<Conversation>, SessionError> {
            let state = self.state.lock().unwrap();
            let mut conversations = state.conversations.clone();
            conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(conversations)
        }

        async fn create_conversation(&self) -> Result<Conversation, SessionError> {
            let mut state = self.state.lock().unwrap();
            Ok(Self::insert_conversation(&mut state))
        }

        async fn fetch_messages(
            &self,
            conversation_id: Uuid,
        ) -> Result<Vec<StoredMessage>, SessionError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .messages
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn delete_conversation(&self, conversation_id: Uuid) -> Result<(), SessionError> {
            let mut state = self.state.lock().unwrap();
            state.conversations.retain(|c| c.id != conversation_id);
            state.messages.remove(&conversation_id);
            Ok(())
        }

        async fn stream_chat(
            &self,
            conversation_id: Option<Uuid>,
            history: Vec<TranscriptEntry>,
        ) -> Result<ChatEventStream, SessionError> {
            let mut state = self.state.lock().unwrap();

            let existing =
                conversation_id.filter(|id| state.conversations.iter().any(|c| c.id == *id));
            let conversation_id = match existing {
                Some(id) => id,
                None => Self::insert_conversation(&mut state).id,
            };

            if let Some(last) = history.last() {
                if last.role == MessageRole::User {
                    Self::append(&mut state, conversation_id, MessageRole::User, &last.content);
                }
            }

            let mut events = vec![ChatEvent::Started { conversation_id }];

            if self.fail_stream {
                events.push(ChatEvent::Delta {
                    text: "par".to_string(),
                });
                events.push(ChatEvent::Error {
                    message: "provider unavailable".to_string(),
                });
                return Ok(Box::pin(futures::stream::iter(events)));
            }

            // Two deltas per reply so accumulation is observable.
            let split = self.reply.len() / 2;
            let (head, tail) = self.reply.split_at(split);
            for piece in [head, tail] {
                if !piece.is_empty() {
                    events.push(ChatEvent::Delta {
                        text: piece.to_string(),
                    });
                }
            }

            let stored = Self::append(
                &mut state,
                conversation_id,
                MessageRole::Assistant,
                &self.reply,
            );

            let count = state.messages.get(&conversation_id).map_or(0, Vec::len);
            let first_user = state
                .messages
                .get(&conversation_id)
                .and_then(|m| m.iter().find(|m| m.role == MessageRole::User))
                .map(|m| m.content.clone());
            let mut title = None;
            if count == 2 {
                if let Some(conversation) = state
                    .conversations
                    .iter_mut()
                    .find(|c| c.id == conversation_id)
                {
                    if conversation.title.is_none() {
                        if let Some(content) = first_user {
                            let derived = derive_title(&content);
                            conversation.title = Some(derived.clone());
                            title = Some(derived);
                        }
                    }
                }
            }

            events.push(ChatEvent::Done {
                message_id: Some(stored.id),
                created_at: Some(stored.created_at),
                title,
            });

            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    #[tokio::test]
    async fn test_empty_store_create_then_list() {
        let mut session = ChatSession::new(MockBackend::default());
        session.refresh().await.unwrap();
        assert!(session.conversations().is_empty());

        session.new_conversation().await.unwrap();
        session.refresh().await.unwrap();

        assert_eq!(session.conversations().len(), 1);
        assert!(session.conversations()[0].title.is_none());
        assert_eq!(session.selected(), Some(session.conversations()[0].id));
    }

    #[tokio::test]
    async fn test_send_streams_and_merges_by_id() {
        let mut session = ChatSession::new(MockBackend::with_reply("Hi! How can I help?"));
        session.send("Hello").await.unwrap();

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, MessageRole::User);
        assert_eq!(transcript[0].content, "Hello");
        assert_eq!(transcript[1].role, MessageRole::Assistant);
        assert_eq!(transcript[1].content, "Hi! How can I help?");
        // Canonical identity merged from the terminal event.
        assert!(transcript[1].id.is_some());
        assert!(transcript[1].created_at.is_some());

        // The conversation list was refreshed with the derived title.
        assert_eq!(session.conversations().len(), 1);
        assert_eq!(
            session.conversations()[0].title.as_deref(),
            Some("Hello")
        );
        assert_eq!(session.selected(), Some(session.conversations()[0].id));
    }

    #[tokio::test]
    async fn test_title_truncated_for_long_first_message() {
        let mut session = ChatSession::new(MockBackend::with_reply("ok"));
        let long = "x".repeat(60);
        session.send(&long).await.unwrap();

        let title = session.conversations()[0].title.clone().unwrap();
        assert_eq!(title, format!("{}...", "x".repeat(50)));
    }

    #[tokio::test]
    async fn test_title_set_only_once() {
        let mut session = ChatSession::new(MockBackend::with_reply("answer"));
        session.send("First question").await.unwrap();
        let title_after_first = session.conversations()[0].title.clone();

        session.send("Second question").await.unwrap();
        assert_eq!(session.conversations()[0].title, title_after_first);
    }

    #[tokio::test]
    async fn test_second_send_continues_same_conversation() {
        let mut session = ChatSession::new(MockBackend::with_reply("answer"));
        session.send("one").await.unwrap();
        let first_id = session.selected().unwrap();

        session.send("two").await.unwrap();
        assert_eq!(session.selected(), Some(first_id));
        assert_eq!(session.conversations().len(), 1);
        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn test_select_unknown_conversation_yields_empty_transcript() {
        let mut session = ChatSession::new(MockBackend::default());
        session.select(Uuid::new_v4()).await.unwrap();
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_select_reloads_stored_order() {
        let backend = MockBackend::with_reply("answer");
        let mut session = ChatSession::new(backend);
        session.send("one").await.unwrap();
        session.send("two").await.unwrap();
        let id = session.selected().unwrap();

        session.select(id).await.unwrap();
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 4);
        assert!(transcript.iter().all(|entry| entry.id.is_some()));
        for pair in transcript.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_delete_active_conversation_clears_selection() {
        let mut session = ChatSession::new(MockBackend::with_reply("answer"));
        session.send("hello").await.unwrap();
        let id = session.selected().unwrap();

        session.delete(id).await.unwrap();
        assert!(session.conversations().is_empty());
        assert_eq!(session.selected(), None);
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_keeps_optimistic_entries() {
        let backend = MockBackend {
            fail_stream: true,
            ..MockBackend::default()
        };
        let mut session = ChatSession::new(backend);

        let result = session.send("hello").await;
        assert!(matches!(result, Err(SessionError::Stream(_))));

        // Optimistic user turn and the partial assistant text survive.
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[0].content, "hello");
        assert_eq!(session.transcript()[1].content, "par");
        assert!(session.transcript()[1].id.is_none());
    }

    #[tokio::test]
    async fn test_reset_returns_to_initial_state() {
        let mut session = ChatSession::new(MockBackend::with_reply("answer"));
        session.send("hello").await.unwrap();

        session.reset();
        assert!(session.conversations().is_empty());
        assert_eq!(session.selected(), None);
        assert!(session.transcript().is_empty());
    }
}
