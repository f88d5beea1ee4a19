//! Input resolution: classify uploaded bytes, or fetch a document by URL.
//!
//! The kind of a document is decided by its magic bytes alone. Filenames and
//! declared content types from clients are routinely wrong (`bill.pdf` that
//! is really a phone photo, `application/octet-stream` for everything), and
//! the downstream stages only care about what the bytes actually are.

use crate::error::ExtractError;
use image::ImageFormat;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// PDF headers may be preceded by junk; readers accept `%PDF-` within the first KiB.
const PDF_HEADER_WINDOW: usize = 1024;

/// What kind of document the bytes hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(ImageFormat),
}

/// A classified document held in memory.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub kind: DocumentKind,
}

impl Document {
    /// Classify `bytes`, rejecting empty and unsupported input.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ExtractError> {
        let kind = detect_kind(&bytes)?;
        Ok(Self { bytes, kind })
    }
}

/// Detect PDF or a decodable image format from magic bytes.
pub fn detect_kind(bytes: &[u8]) -> Result<DocumentKind, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::EmptyDocument);
    }

    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        return Ok(DocumentKind::Pdf);
    }

    match image::guess_format(bytes) {
        Ok(format) if format.reading_enabled() => Ok(DocumentKind::Image(format)),
        _ => Err(ExtractError::UnsupportedFileType {
            magic: magic_hex(bytes),
        }),
    }
}

/// First few bytes as lowercase hex, for error messages.
fn magic_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP(S) URL.
///
/// Documents larger than `max_bytes` are rejected with
/// [`ExtractError::DocumentTooLarge`].
pub async fn load(input: &str, timeout_secs: u64, max_bytes: usize) -> Result<Document, ExtractError> {
    let bytes = if is_url(input) {
        download(input, timeout_secs, max_bytes).await?
    } else {
        read_local(input, max_bytes).await?
    };
    Document::from_bytes(bytes)
}

async fn read_local(path_str: &str, max_bytes: usize) -> Result<Vec<u8>, ExtractError> {
    let path = PathBuf::from(path_str);
    let not_found_or_internal = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractError::FileNotFound {
                path: path_str.to_string(),
            }
        } else {
            ExtractError::Internal(format!("Failed to read '{}': {e}", path.display()))
        }
    };

    let meta = tokio::fs::metadata(&path).await.map_err(not_found_or_internal)?;
    if meta.len() > max_bytes as u64 {
        return Err(ExtractError::DocumentTooLarge { max: max_bytes });
    }

    let bytes = tokio::fs::read(&path).await.map_err(not_found_or_internal)?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Download a URL into memory, refusing bodies over `max_bytes`.
///
/// A declared `Content-Length` over the limit is rejected before reading;
/// otherwise the body is streamed and cut off once it passes the limit.
pub async fn download(url: &str, timeout_secs: u64, max_bytes: usize) -> Result<Vec<u8>, ExtractError> {
    if !is_url(url) || reqwest::Url::parse(url).is_err() {
        return Err(ExtractError::InvalidInput {
            input: url.to_string(),
        });
    }
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let mut response = client.get(url).send().await.map_err(to_error)?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(ExtractError::DocumentTooLarge { max: max_bytes });
        }
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(to_error)? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(ExtractError::DocumentTooLarge { max: max_bytes });
        }
        bytes.extend_from_slice(&chunk);
    }
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes)
}
