use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use chatsync::{db, handlers, middleware, openai_client::OpenAiClient, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Create the database connection pool
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    // Initialize OpenAI client if API key is provided
    let openai_client = match std::env::var("OPENAI_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            tracing::info!("Initializing OpenAI client (gpt-4o)...");
            Some(OpenAiClient::new(api_key))
        }
        _ => {
            tracing::warn!("OPENAI_API_KEY not found. Chat streaming will be disabled.");
            None
        }
    };

    let shared_state = Arc::new(AppState {
        db_pool,
        openai_client,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::conversations::conversation_routes())
        .merge(handlers::chat::chat_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!(
        "listening on {}",
        listener.local_addr().expect("listener has no local addr")
    );
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}

// Logging configuration: JSON output for production aggregation, or
// human-readable output for development, selected by LOG_FORMAT.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,chatsync=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,chatsync=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("ChatSync starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    let db_configured = std::env::var("DATABASE_URL").is_ok();
    let openai_configured = std::env::var("OPENAI_API_KEY").is_ok();
    tracing::info!(
        "Configuration - Database: {}, OpenAI: {}",
        if db_configured { "set" } else { "missing" },
        if openai_configured { "set" } else { "missing" }
    );

    Ok(())
}

// API health/status endpoint
async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let openai_status = if state.openai_client.is_some() {
        "configured"
    } else {
        "not_configured"
    };

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "openai": openai_status
        },
        "endpoints": {
            "status": "/api/status",
            "conversations": "/api/conversations",
            "chat": "/api/chat"
        }
    }))
}
