// src/handlers/chat.rs
use crate::models::MessageRole;
use crate::store::ConversationStore;
use crate::AppState;
use axum::{
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use crate::openai_client::ProviderMessage;

pub fn chat_routes() -> Router {
    Router::new().route("/api/chat", post(chat_handler))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Reused if it names an existing conversation; otherwise a fresh
    /// one is created and announced in the first stream event.
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub messages: Vec<UiTurn>,
}

#[derive(Debug, Deserialize)]
pub struct UiTurn {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<UiPart>,
}

#[derive(Debug, Deserialize)]
pub struct UiPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl UiTurn {
    /// Only "text" parts feed persistence and the provider call.
    fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// The text of the inbound user message, present iff the history's last
/// turn is a user turn. Anything else persists nothing.
fn pending_user_text(messages: &[UiTurn]) -> Option<String> {
    let last = messages.last()?;
    match MessageRole::parse(&last.role) {
        Some(MessageRole::User) => Some(last.text()),
        _ => None,
    }
}

fn provider_history(messages: &[UiTurn]) -> Vec<ProviderMessage> {
    messages
        .iter()
        .filter_map(|turn| {
            let role = match MessageRole::parse(&turn.role) {
                Some(MessageRole::User) => "user",
                Some(MessageRole::Assistant) => "assistant",
                None => {
                    tracing::warn!("Dropping turn with unknown role '{}'", turn.role);
                    return None;
                }
            };
            Some(ProviderMessage {
                role: role.to_string(),
                content: turn.text(),
            })
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatStreamEvent {
    Start {
        conversation_id: Uuid,
    },
    Delta {
        text: String,
    },
    /// Terminal event. Carries the persisted assistant message's
    /// canonical identity so the client can merge its optimistic
    /// transcript by id; the fields are null when persistence failed.
    Done {
        message_id: Option<Uuid>,
        created_at: Option<DateTime<Utc>>,
        title: Option<String>,
    },
    Error {
        message: String,
    },
}

fn sse_event(event: &ChatStreamEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_default();
    Ok(Event::default().data(data))
}

async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let Some(openai_client) = state.openai_client.clone() else {
        tracing::error!("OPENAI_API_KEY not configured, rejecting chat request");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let store = ConversationStore::new(state.db_pool.clone());

    let conversation = match store
        .get_or_create_conversation(request.conversation_id)
        .await
    {
        Ok(conversation) => conversation,
        Err(e) => {
            tracing::error!("Failed to resolve conversation: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Persisting the inbound user message is best-effort: a store
    // failure here must not cost the caller their streamed answer.
    if let Some(content) = pending_user_text(&request.messages) {
        if let Err(e) = store
            .append_message(conversation.id, MessageRole::User, &content)
            .await
        {
            tracing::error!(
                "Failed to persist user message for {}: {}",
                conversation.id,
                e
            );
        }
    }

    let token_stream = match openai_client
        .stream_chat_completion(provider_history(&request.messages))
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("OpenAI request failed: {}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let conversation_id = conversation.id;
    // Dropping this stream on client disconnect also drops the provider
    // request; no partial assistant text is persisted in that case.
    let sse = async_stream::stream! {
        yield sse_event(&ChatStreamEvent::Start { conversation_id });

        let mut assistant_text = String::new();
        let mut tokens = token_stream;
        while let Some(token) = tokens.next().await {
            match token {
                Ok(text) => {
                    assistant_text.push_str(&text);
                    yield sse_event(&ChatStreamEvent::Delta { text });
                }
                Err(e) => {
                    tracing::error!("Provider stream failed for {}: {}", conversation_id, e);
                    yield sse_event(&ChatStreamEvent::Error { message: e.to_string() });
                    return;
                }
            }
        }

        match store.finalize_exchange(conversation_id, &assistant_text).await {
            Ok(exchange) => {
                if let Some(ref title) = exchange.title {
                    tracing::info!("Set title for conversation {}: {}", conversation_id, title);
                }
                yield sse_event(&ChatStreamEvent::Done {
                    message_id: Some(exchange.message.id),
                    created_at: Some(exchange.message.created_at),
                    title: exchange.title,
                });
            }
            Err(e) => {
                // The answer already reached the client; all we can do
                // is log the missing record.
                tracing::error!(
                    "Failed to persist assistant reply for {}: {}",
                    conversation_id,
                    e
                );
                yield sse_event(&ChatStreamEvent::Done {
                    message_id: None,
                    created_at: None,
                    title: None,
                });
            }
        }
    };

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}
