//! HTTP surface: one extraction endpoint plus liveness routes.
//!
//! ```text
//! /
//! ├── GET  /                   liveness
//! ├── GET  /health             liveness
//! └── POST /extract-bill-data  multipart upload or {"document": url}
//! ```

mod error;
mod handlers;
mod upload;

pub use error::{status_for, ApiError};
pub use handlers::ExtractionRequest;

use crate::config::ExtractionConfig;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Default request body ceiling: 20 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = crate::config::DEFAULT_MAX_DOCUMENT_BYTES;

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    /// Base configuration; per-request page selections are applied to a clone.
    pub config: ExtractionConfig,
}

/// Build the router.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/extract-bill-data", post(handlers::extract_bill_data))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>, server: &ServerConfig) -> std::io::Result<()> {
    let app = router(state, server.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port)).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
