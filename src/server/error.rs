//! Error → HTTP response mapping.
//!
//! Every failure is answered with an [`ExtractionResponse`] body
//! (`is_success: false`) so clients parse one shape regardless of outcome.

use crate::error::{ExtractError, VlmError};
use crate::output::ExtractionResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

/// A failed request: status plus the message placed in `error`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        Self::new(status_for(&err), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        } else {
            warn!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(ExtractionResponse::failure(self.message))).into_response()
    }
}

/// HTTP status for a fatal extraction error.
pub fn status_for(err: &ExtractError) -> StatusCode {
    use ExtractError::*;
    match err {
        MissingDocument | EmptyDocument | BadRequest(_) | InvalidInput { .. } | FileNotFound { .. } => {
            StatusCode::BAD_REQUEST
        }
        UnsupportedFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        DocumentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CorruptPdf { .. }
        | ImageDecodeFailed { .. }
        | RasterisationFailed { .. }
        | TooManyPages { .. }
        | PageOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DownloadFailed { .. } => StatusCode::BAD_GATEWAY,
        DownloadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Model {
            source: VlmError::Timeout { .. },
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        Model { .. } | MalformedModelOutput { .. } => StatusCode::BAD_GATEWAY,
        ProviderNotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PopplerMissing { .. } | InvalidConfig(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
