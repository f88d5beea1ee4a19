//! Error types for the medbill-extract library.
//!
//! Two error types reflect two distinct failure scopes:
//!
//! * [`ExtractError`]: **fatal**, the request cannot produce a result
//!   (unsupported upload, corrupt PDF, the model failed after retries,
//!   unreadable model output). Returned from the top-level `extract*`
//!   functions and mapped to an HTTP status by [`crate::server`].
//!
//! * [`VlmError`]: one failed call to the vision model. The page driver in
//!   [`crate::pipeline::llm`] inspects [`VlmError::is_retryable`] to decide
//!   whether another attempt is worthwhile, and wraps the final failure in
//!   [`ExtractError::Model`].

use thiserror::Error;

/// All fatal errors returned by the medbill-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request carried no file.
    #[error("No document uploaded. Send a multipart 'file' field or a JSON body with 'document'.")]
    MissingDocument,

    /// The uploaded file has zero bytes.
    #[error("Uploaded document is empty")]
    EmptyDocument,

    /// The bytes are neither a PDF nor a decodable image.
    #[error("Unsupported file type (first bytes: {magic}). Upload a PDF or an image (PNG, JPEG, WebP, GIF, BMP, TIFF).")]
    UnsupportedFileType { magic: String },

    /// The request was syntactically wrong (bad multipart, bad JSON, bad field).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The document is larger than the configured byte ceiling.
    #[error("Document exceeds the {max}-byte limit")]
    DocumentTooLarge { max: usize },

    // ── Document errors ───────────────────────────────────────────────────
    /// poppler could not open the PDF.
    #[error("PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// The image bytes were recognised but could not be decoded.
    #[error("Image could not be decoded: {detail}")]
    ImageDecodeFailed { detail: String },

    /// pdftoppm failed on one page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A poppler tool is not on PATH.
    #[error("'{tool}' not found. Install poppler-utils (e.g. apt-get install poppler-utils).")]
    PopplerMissing { tool: String },

    /// More pages selected than the configured ceiling.
    #[error("Document has {pages} pages to process; the limit is {max}")]
    TooManyPages { pages: usize, max: usize },

    /// Selected page numbers exceed the actual page count.
    #[error("Page selection matches no page (document has {total} pages)")]
    PageOutOfRange { total: usize },

    // ── Model errors ──────────────────────────────────────────────────────
    /// No provider injected and no API key available.
    #[error("Vision model provider is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    /// The model call for a page failed after all retries.
    #[error("Vision model call failed on page {page} after {attempts} attempt(s): {source}")]
    Model {
        page: usize,
        attempts: u32,
        #[source]
        source: VlmError,
    },

    /// The model replied, but no line-item JSON could be recovered.
    #[error("Model returned malformed output for page {page}: {detail}")]
    MalformedModelOutput { page: usize, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single failed call to the vision model.
#[derive(Debug, Clone, Error)]
pub enum VlmError {
    /// TCP/TLS connection could not be established.
    #[error("model API unreachable: {detail}")]
    Unreachable { detail: String },

    /// The request did not complete within the per-call timeout.
    #[error("model API call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429; back off before retrying.
    #[error("rate limit exceeded{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401/403.
    #[error("authentication rejected (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },

    /// Any other non-success HTTP status.
    #[error("model API returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },

    /// 200 OK but the body was not a chat-completion we understand.
    #[error("invalid response from model API: {0}")]
    InvalidResponse(String),
}

impl VlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            VlmError::Unreachable { .. } | VlmError::Timeout { .. } => true,
            VlmError::RateLimited { .. } => true,
            VlmError::Api { status, .. } => *status >= 500,
            VlmError::Auth { .. } | VlmError::InvalidResponse(_) => false,
        }
    }
}
