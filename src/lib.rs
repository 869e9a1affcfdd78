// lib.rs - Main library file that exports all modules
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod openai_client;
pub mod session;
pub mod store;

/// Shared state for all request handlers: the connection pool plus the
/// provider client, if configured.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub openai_client: Option<openai_client::OpenAiClient>,
}
