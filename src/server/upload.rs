//! Multipart form parsing for bill uploads.

use super::ApiError;
use crate::config::PageSelection;
use crate::error::ExtractError;
use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;

/// An uploaded document with its client-supplied metadata.
#[derive(Debug)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Parsed form fields from the multipart upload.
#[derive(Debug)]
pub struct FormFields {
    pub file: UploadedFile,
    pub pages: Option<PageSelection>,
}

fn field_error(what: &str, e: MultipartError) -> ApiError {
    // 413 when the body limit trips mid-stream, 400 otherwise
    ApiError::new(e.status(), format!("Failed to read {what}: {}", e.body_text()))
}

/// Parse a multipart form upload.
///
/// The document is the part named `file`, or failing that the first part
/// that carries a filename. Unknown text parts are ignored.
pub async fn parse_multipart(mut multipart: Multipart) -> Result<FormFields, ApiError> {
    let mut file: Option<UploadedFile> = None;
    let mut pages: Option<PageSelection> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| field_error("form field", e))?
    {
        let name = field.name().unwrap_or("").to_string();
        let filename = field.file_name().map(str::to_string);

        if name == "file" || (filename.is_some() && file.is_none()) {
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| field_error("file data", e))?
                .to_vec();

            // An explicit `file` part wins over an earlier anonymous one.
            if name == "file" || file.is_none() {
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
        } else if name == "pages" {
            let val = field.text().await.map_err(|e| field_error("pages", e))?;
            pages = Some(val.parse().map_err(ApiError::from)?);
        } else {
            // Drain unknown fields; a body-limit error still surfaces
            field.bytes().await.map_err(|e| field_error("form field", e))?;
        }
    }

    let file = file.ok_or(ExtractError::MissingDocument)?;

    Ok(FormFields { file, pages })
}
