//! Request handlers.
//!
//! `POST /extract-bill-data` accepts either body form; the `Content-Type`
//! header picks the extractor:
//!
//! * `multipart/form-data`: a `file` part (PDF or image) and optional `pages`
//! * `application/json`: `{"document": "https://…", "pages": "1-3"}`
//!
//! Anything else is answered with 415.

use super::upload;
use super::{ApiError, AppState};
use crate::error::ExtractError;
use crate::extract::{extract_bytes, extract_url};
use crate::output::ExtractionResponse;
use crate::pipeline::input::is_url;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// JSON request body: a document to download.
#[derive(Debug, Deserialize)]
pub struct ExtractionRequest {
    pub document: String,
    #[serde(default)]
    pub pages: Option<String>,
}

/// `GET /` and `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /extract-bill-data`.
pub async fn extract_bill_data(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ExtractionResponse>, ApiError> {
    let start = Instant::now();
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut config = state.config.clone();

    let output = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let form = upload::parse_multipart(multipart).await?;

        info!(
            "Received upload {:?} ({} bytes, declared {:?})",
            form.file.filename.as_deref().unwrap_or("<unnamed>"),
            form.file.data.len(),
            form.file.content_type.as_deref().unwrap_or("-")
        );
        if let Some(pages) = form.pages {
            config.pages = pages;
        }
        extract_bytes(&form.file.data, &config).await?
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<ExtractionRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        // Local paths are a CLI convenience only.
        if !is_url(&body.document) {
            return Err(ExtractError::InvalidInput {
                input: body.document,
            }
            .into());
        }
        if let Some(pages) = body.pages.as_deref() {
            config.pages = pages.parse()?;
        }
        info!("Received document URL {}", body.document);
        extract_url(&body.document, &config).await?
    } else {
        return Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!(
                "Unsupported Content-Type '{content_type}'. Send multipart/form-data with a 'file' field, or application/json with 'document'."
            ),
        ));
    };

    info!(
        "Request served: {} items, {} tokens, {}ms",
        output.data.total_item_count,
        output.token_usage.total_tokens,
        start.elapsed().as_millis()
    );
    Ok(Json(ExtractionResponse::success(output)))
}
