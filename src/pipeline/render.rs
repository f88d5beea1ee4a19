//! PDF rasterisation via poppler, and image decoding for direct uploads.
//!
//! `pdfinfo` reports the page count and document metadata; `pdftoppm`
//! renders one page per invocation straight to PNG. Both run as child
//! processes through `tokio::process`, so the async workers never block on
//! them. Decoding and downscaling the resulting bitmaps is CPU-bound and runs
//! on `spawn_blocking`.
//!
//! Pixel count is capped independently of DPI: a 200-DPI render of an A3
//! ledger is over 3 300 px tall, well past what the vision model can use.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::output::DocumentMetadata;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

const PDFINFO: &str = "pdfinfo";
const PDFTOPPM: &str = "pdftoppm";

/// Run a poppler tool, mapping a missing binary to [`ExtractError::PopplerMissing`].
async fn run_poppler(tool: &str, args: &[&OsStr]) -> Result<Output, ExtractError> {
    Command::new(tool)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractError::PopplerMissing {
                    tool: tool.to_string(),
                }
            } else {
                ExtractError::Internal(format!("failed to run {tool}: {e}"))
            }
        })
}

fn stderr_text(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if text.is_empty() {
        format!("exit status {}", output.status)
    } else {
        text
    }
}

/// Read document metadata (including page count) with `pdfinfo`.
pub async fn extract_metadata(pdf_path: &Path) -> Result<DocumentMetadata, ExtractError> {
    let output = run_poppler(PDFINFO, &[pdf_path.as_os_str()]).await?;
    if !output.status.success() {
        return Err(ExtractError::CorruptPdf {
            detail: stderr_text(&output),
        });
    }

    let metadata = parse_pdfinfo(&String::from_utf8_lossy(&output.stdout));
    if metadata.page_count == 0 {
        return Err(ExtractError::CorruptPdf {
            detail: "pdfinfo reported no pages".into(),
        });
    }
    Ok(metadata)
}

/// Parse `pdfinfo` key/value output.
pub fn parse_pdfinfo(text: &str) -> DocumentMetadata {
    let mut meta = DocumentMetadata::default();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let non_empty = || (!value.is_empty()).then(|| value.to_string());

        match key.trim() {
            "Title" => meta.title = non_empty(),
            "Author" => meta.author = non_empty(),
            "Creator" => meta.creator = non_empty(),
            "Producer" => meta.producer = non_empty(),
            "Pages" => meta.page_count = value.parse().unwrap_or(0),
            "PDF version" => meta.pdf_version = value.to_string(),
            // "no", or "yes (print:yes copy:no …)"
            "Encrypted" => meta.is_encrypted = value.starts_with("yes"),
            _ => {}
        }
    }

    meta
}

/// Rasterise the selected pages (0-based indices) of a PDF.
///
/// # Returns
/// A vector of `(page_index_0based, DynamicImage)` tuples in input order.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, ExtractError> {
    let out_dir = tempfile::TempDir::new()
        .map_err(|e| ExtractError::Internal(format!("tempdir: {e}")))?;
    let dpi = config.dpi.to_string();

    let mut results = Vec::with_capacity(page_indices.len());

    for &idx in page_indices {
        let page = idx + 1;
        let page_str = page.to_string();
        let prefix = out_dir.path().join(format!("page-{page}"));

        let output = run_poppler(
            PDFTOPPM,
            &[
                OsStr::new("-r"),
                OsStr::new(&dpi),
                OsStr::new("-png"),
                OsStr::new("-singlefile"),
                OsStr::new("-f"),
                OsStr::new(&page_str),
                OsStr::new("-l"),
                OsStr::new(&page_str),
                pdf_path.as_os_str(),
                prefix.as_os_str(),
            ],
        )
        .await?;

        if !output.status.success() {
            return Err(ExtractError::RasterisationFailed {
                page,
                detail: stderr_text(&output),
            });
        }

        let png_path = prefix.with_extension("png");
        let bytes = tokio::fs::read(&png_path)
            .await
            .map_err(|e| ExtractError::RasterisationFailed {
                page,
                detail: format!("pdftoppm produced no image: {e}"),
            })?;

        let image = decode_image(bytes, ImageFormat::Png, config.max_rendered_pixels)
            .await
            .map_err(|e| ExtractError::RasterisationFailed {
                page,
                detail: e.to_string(),
            })?;

        debug!(
            "Rendered page {} → {}x{} px",
            page,
            image.width(),
            image.height()
        );
        results.push((idx, image));
    }

    info!("Rendered {} pages at {} DPI", results.len(), config.dpi);
    Ok(results)
}

/// Decode image bytes and cap the longest edge at `max_pixels`.
pub async fn decode_image(
    bytes: Vec<u8>,
    format: ImageFormat,
    max_pixels: u32,
) -> Result<DynamicImage, ExtractError> {
    tokio::task::spawn_blocking(move || -> Result<DynamicImage, ExtractError> {
        let img = image::load_from_memory_with_format(&bytes, format).map_err(|e| {
            ExtractError::ImageDecodeFailed {
                detail: e.to_string(),
            }
        })?;
        Ok(cap_dimensions(img, max_pixels))
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Decode task panicked: {}", e)))?
}

/// Downscale so neither edge exceeds `max_pixels`, preserving aspect ratio.
pub fn cap_dimensions(img: DynamicImage, max_pixels: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= max_pixels {
        return img;
    }
    debug!("Downscaling {}x{} to fit {} px", w, h, max_pixels);
    img.resize(max_pixels, max_pixels, FilterType::Triangle)
}
