// src/handlers/conversations.rs
use crate::models::{Conversation, StoredMessage};
use crate::store::ConversationStore;
use crate::AppState;
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{delete, get},
    Extension, Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub fn conversation_routes() -> Router {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/:id", delete(delete_conversation))
        .route("/api/conversations/:id/messages", get(get_messages))
}

async fn list_conversations(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    let store = ConversationStore::new(state.db_pool.clone());
    let conversations = store.list_conversations().await.map_err(|e| {
        tracing::error!("Failed to fetch conversations: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(conversations))
}

async fn create_conversation(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Conversation>, StatusCode> {
    let store = ConversationStore::new(state.db_pool.clone());
    let conversation = store.create_conversation().await.map_err(|e| {
        tracing::error!("Failed to create conversation: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!("Created conversation {}", conversation.id);
    Ok(Json(conversation))
}

/// Messages for a conversation, oldest first. An unknown id yields an
/// empty list rather than 404.
async fn get_messages(
    Path(id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<StoredMessage>>, StatusCode> {
    let store = ConversationStore::new(state.db_pool.clone());
    let messages = store.get_messages(id).await.map_err(|e| {
        tracing::error!("Failed to fetch messages for {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(messages))
}

async fn delete_conversation(
    Path(id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<StatusCode, StatusCode> {
    let store = ConversationStore::new(state.db_pool.clone());
    store.delete_conversation(id).await.map_err(|e| {
        tracing::error!("Failed to delete conversation {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!("Deleted conversation {}", id);
    Ok(StatusCode::NO_CONTENT)
}
