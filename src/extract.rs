//! Full-document extraction entry points.
//!
//! Every entry point funnels into [`extract_document`]: classify, rasterise
//! (PDF) or decode (image), encode, send each page to the model with bounded
//! concurrency, and assemble the per-page line items in page order.
//!
//! A bill is only useful whole. If any page fails after retries, the request
//! fails with that page's error rather than returning a partial total.

use crate::config::{ExtractionConfig, DEFAULT_MAX_DOCUMENT_BYTES};
use crate::error::ExtractError;
use crate::output::{DocumentMetadata, ExtractionData, ExtractionOutput, ExtractionStats, TokenUsage};
use crate::pipeline::input::{self, Document, DocumentKind};
use crate::pipeline::llm::{self, PageResult};
use crate::pipeline::{encode, render};
use crate::vlm::{GroqClient, ImageData, VisionModel};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Environment variable holding the Groq API key.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Extract line items from an in-memory PDF or image.
///
/// # Example
/// ```rust,no_run
/// use medbill_extract::{extract_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("bill.jpg")?;
/// let output = extract_bytes(&bytes, &ExtractionConfig::default()).await?;
/// for page in &output.data.pagewise_line_items {
///     println!("page {}: {} items", page.page_no, page.bill_items.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let document = Document::from_bytes(bytes.to_vec())?;
    extract_document(document, config).await
}

/// Extract line items from a local path or an HTTP(S) URL.
pub async fn extract_url(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Loading document: {}", input_str);
    let document = input::load(input_str, config.download_timeout_secs, config.max_document_bytes).await?;
    extract_document(document, config).await
}

/// Read PDF metadata without calling the model.
///
/// Images are reported as a single page with no metadata.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, ExtractError> {
    let document = input::load(input_str.as_ref(), 120, DEFAULT_MAX_DOCUMENT_BYTES).await?;
    match document.kind {
        DocumentKind::Pdf => {
            let tmp = write_temp_pdf(&document.bytes)?;
            render::extract_metadata(tmp.path()).await
        }
        DocumentKind::Image(_) => Ok(DocumentMetadata {
            page_count: 1,
            ..DocumentMetadata::default()
        }),
    }
}

/// Run the whole pipeline on a classified document.
pub async fn extract_document(
    document: Document,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let total_start = Instant::now();

    // ── Step 1: Resolve provider ─────────────────────────────────────────
    // Before any rendering, so a missing key fails fast.
    let provider = resolve_provider(config)?;

    // ── Step 2: Rasterise / decode ───────────────────────────────────────
    let render_start = Instant::now();
    let (total_pages, rendered) = match document.kind {
        DocumentKind::Pdf => rasterise_pdf(&document.bytes, config).await?,
        DocumentKind::Image(format) => {
            if config.pages.to_indices(1).is_empty() {
                return Err(ExtractError::PageOutOfRange { total: 1 });
            }
            let img =
                render::decode_image(document.bytes, format, config.max_rendered_pixels).await?;
            (1, vec![(0, img)])
        }
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Prepared {} page image(s) in {}ms",
        rendered.len(),
        render_duration_ms
    );

    // ── Step 3: Encode images to base64 ──────────────────────────────────
    let encoded = encode_all(rendered, config.jpeg_quality).await?;

    // ── Step 4: Process pages through VLM ────────────────────────────────
    let llm_start = Instant::now();
    let results = process_concurrent(&provider, encoded, config).await?;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    // ── Step 5: Assemble ─────────────────────────────────────────────────
    let processed_pages = results.len();
    let (data, token_usage, retries) = assemble(results);

    let stats = ExtractionStats {
        total_pages,
        processed_pages,
        retries,
        render_duration_ms,
        llm_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} items from {}/{} pages, {} tokens, {}ms total",
        data.total_item_count,
        processed_pages,
        total_pages,
        token_usage.total_tokens,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        data,
        token_usage,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve the model client, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is. Tests inject
///    a [`MockVisionModel`](crate::vlm::MockVisionModel) here.
/// 2. **Explicit key** (`config.api_key`) → [`GroqClient`].
/// 3. **Environment** (`GROQ_API_KEY`) → [`GroqClient`].
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()));

    match key {
        Some(key) => {
            debug!("Using Groq client for model {}", config.model);
            Ok(Arc::new(GroqClient::from_config(config, key)?))
        }
        None => Err(ExtractError::ProviderNotConfigured {
            hint: format!("Set {API_KEY_ENV} or pass an API key explicitly."),
        }),
    }
}

/// Write PDF bytes to a managed temp file so poppler can read them.
fn write_temp_pdf(bytes: &[u8]) -> Result<tempfile::NamedTempFile, ExtractError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    Ok(tmp)
}

/// Returns the document's page count and the rendered selected pages.
async fn rasterise_pdf(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<(usize, Vec<(usize, DynamicImage)>), ExtractError> {
    // `tmp` is dropped (and the file deleted) on return
    let tmp = write_temp_pdf(bytes)?;

    let metadata = render::extract_metadata(tmp.path()).await?;
    let total_pages = metadata.page_count;
    info!("PDF has {} pages", total_pages);
    if metadata.is_encrypted {
        warn!("PDF is encrypted; rendering may fail");
    }

    let page_indices = config.pages.to_indices(total_pages);
    if page_indices.is_empty() {
        return Err(ExtractError::PageOutOfRange { total: total_pages });
    }
    if page_indices.len() > config.max_pages {
        return Err(ExtractError::TooManyPages {
            pages: page_indices.len(),
            max: config.max_pages,
        });
    }
    debug!("Selected {} pages for extraction", page_indices.len());

    let rendered = render::render_pages(tmp.path(), config, &page_indices).await?;
    Ok((total_pages, rendered))
}

/// JPEG-encode every page off the async runtime.
async fn encode_all(
    rendered: Vec<(usize, DynamicImage)>,
    quality: u8,
) -> Result<Vec<(usize, ImageData)>, ExtractError> {
    tokio::task::spawn_blocking(move || {
        rendered
            .iter()
            .map(|(idx, img)| {
                encode::encode_page(img, quality)
                    .map(|data| (*idx, data))
                    .map_err(|e| ExtractError::RasterisationFailed {
                        page: idx + 1,
                        detail: format!("Image encoding failed: {e}"),
                    })
            })
            .collect::<Result<Vec<_>, ExtractError>>()
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Encode task panicked: {e}")))?
}

/// Order page results by page number and total their usage.
fn assemble(mut results: Vec<PageResult>) -> (ExtractionData, TokenUsage, u32) {
    results.sort_by_key(|r| r.page_num);

    let mut token_usage = TokenUsage::default();
    let mut retries = 0;
    for r in &results {
        token_usage += r.usage;
        retries += r.retries;
    }
    let data = ExtractionData::from_pages(results.into_iter().map(|r| r.items).collect());
    (data, token_usage, retries)
}

/// Process pages with at most `config.concurrency` model calls in flight.
///
/// Stops at the first page error; in-flight calls are dropped with the stream.
async fn process_concurrent(
    provider: &Arc<dyn VisionModel>,
    pages: Vec<(usize, ImageData)>,
    config: &ExtractionConfig,
) -> Result<Vec<PageResult>, ExtractError> {
    let total = pages.len();
    let mut in_flight = stream::iter(pages.into_iter().map(|(idx, img)| {
        let provider = Arc::clone(provider);
        let config = config.clone();
        async move { llm::process_page(&provider, idx + 1, img, &config).await }
    }))
    .buffer_unordered(config.concurrency.max(1));

    let mut results = Vec::with_capacity(total);
    while let Some(result) = in_flight.next().await {
        let page = result?;
        debug!("Page {}/{} done", results.len() + 1, total);
        results.push(page);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VlmError;
    use crate::output::PageType;
    use crate::vlm::{MockReply, MockVisionModel};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    const REPLY: &str = r#"{"page_type": "Pharmacy", "bill_items": [
        {"item_name": "Paracetamol 500mg", "item_rate": 2.5, "item_quantity": 10, "item_amount": 25},
        {"item_name": "ORS Sachet", "item_rate": 20, "item_quantity": 2, "item_amount": 40}
    ]}"#;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 48, image::Rgb([250, 250, 250])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn config_with(mock: Arc<MockVisionModel>) -> ExtractionConfig {
        ExtractionConfig::builder()
            .provider(mock)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn extracts_single_image() {
        let mock = Arc::new(MockVisionModel::new(MockReply::text(REPLY)));
        let output = extract_bytes(&png_bytes(), &config_with(mock.clone()))
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 1);
        assert_eq!(output.stats.total_pages, 1);
        assert_eq!(output.data.total_item_count, 2);
        let page = &output.data.pagewise_line_items[0];
        assert_eq!(page.page_no, "1");
        assert_eq!(page.page_type, PageType::Pharmacy);
        assert_eq!(page.bill_items[1].item_name, "ORS Sachet");
        assert_eq!(output.token_usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn rejects_unsupported_bytes_before_calling_model() {
        let mock = Arc::new(MockVisionModel::new(MockReply::text(REPLY)));
        let err = extract_bytes(b"<html>not a bill</html>", &config_with(mock.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn page_failure_fails_request() {
        let mock = Arc::new(MockVisionModel::new(MockReply::Error(VlmError::Api {
            status: 500,
            detail: "boom".into(),
        })));
        let cfg = ExtractionConfig::builder()
            .provider(mock.clone())
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap();

        let err = extract_bytes(&png_bytes(), &cfg).await.unwrap_err();
        assert!(matches!(err, ExtractError::Model { page: 1, attempts: 2, .. }));
    }

    #[tokio::test]
    async fn concurrent_processing_covers_every_page() {
        let mock = Arc::new(
            MockVisionModel::new(MockReply::text(REPLY)).with_delay(std::time::Duration::from_millis(5)),
        );
        let provider: Arc<dyn VisionModel> = mock.clone();
        let cfg = ExtractionConfig::builder()
            .provider(Arc::clone(&provider))
            .concurrency(4)
            .build()
            .unwrap();

        let img = ImageData::new("QUJD", "image/jpeg");
        let pages = (0..6).map(|i| (i, img.clone())).collect();
        let mut results = process_concurrent(&provider, pages, &cfg).await.unwrap();
        assert_eq!(mock.call_count(), 6);

        results.sort_by_key(|r| r.page_num);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.page_num, i + 1);
            assert_eq!(r.items.page_no, (i + 1).to_string());
        }
    }

    /// Answers the first call slowly, so page 1 finishes after page 2.
    struct StaggeredModel {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VisionModel for StaggeredModel {
        fn name(&self) -> &str {
            "staggered"
        }

        async fn complete(
            &self,
            _request: &crate::vlm::VisionRequest,
        ) -> Result<crate::vlm::VisionResponse, VlmError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (content, total) = if n == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(80)).await;
                (r#"{"bill_items": [{"item_name": "Room Rent", "item_amount": 1000}]}"#, 100)
            } else {
                (REPLY, 300)
            };
            Ok(crate::vlm::VisionResponse {
                content: content.to_string(),
                usage: TokenUsage {
                    total_tokens: total,
                    input_tokens: total - 50,
                    output_tokens: 50,
                },
            })
        }
    }

    #[tokio::test]
    async fn assembly_orders_pages_and_sums_usage() {
        let provider: Arc<dyn VisionModel> = Arc::new(StaggeredModel {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let cfg = ExtractionConfig::builder()
            .provider(Arc::clone(&provider))
            .concurrency(2)
            .build()
            .unwrap();

        let img = ImageData::new("QUJD", "image/jpeg");
        let pages = vec![(0, img.clone()), (1, img)];
        let results = process_concurrent(&provider, pages, &cfg).await.unwrap();
        let finished: Vec<usize> = results.iter().map(|r| r.page_num).collect();
        assert_eq!(finished, vec![2, 1]);
        assert_eq!(results[0].usage.total_tokens, 300);
        assert_eq!(results[1].usage.total_tokens, 100);

        let (data, usage, retries) = assemble(results);
        let order: Vec<&str> = data.pagewise_line_items.iter().map(|p| p.page_no.as_str()).collect();
        assert_eq!(order, vec!["1", "2"]);
        assert_eq!(data.pagewise_line_items[0].bill_items[0].item_name, "Room Rent");
        assert_eq!(data.pagewise_line_items[1].bill_items.len(), 2);
        assert_eq!(data.total_item_count, 3);
        assert_eq!(usage.total_tokens, 400);
        assert_eq!(usage.input_tokens, 300);
        assert_eq!(usage.output_tokens, 100);
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn image_rejects_page_selection_past_first_page() {
        let mock = Arc::new(MockVisionModel::new(MockReply::text(REPLY)));
        let cfg = ExtractionConfig::builder()
            .provider(mock.clone())
            .pages(crate::config::PageSelection::Single(7))
            .build()
            .unwrap();

        let err = extract_bytes(&png_bytes(), &cfg).await.unwrap_err();
        assert!(matches!(err, ExtractError::PageOutOfRange { total: 1 }));
        assert_eq!(mock.call_count(), 0);

        let cfg = ExtractionConfig::builder()
            .provider(mock.clone())
            .pages(crate::config::PageSelection::Range(1, 3))
            .build()
            .unwrap();
        let output = extract_bytes(&png_bytes(), &cfg).await.unwrap();
        assert_eq!(output.data.pagewise_line_items.len(), 1);
    }

    #[test]
    fn explicit_key_builds_groq_client() {
        let cfg = ExtractionConfig::builder().api_key("gsk_test").build().unwrap();
        let provider = resolve_provider(&cfg).unwrap();
        assert_eq!(provider.name(), "groq");
    }

    #[tokio::test]
    async fn inspect_reports_images_as_one_page() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&png_bytes()).unwrap();
        let meta = inspect(tmp.path().to_str().unwrap()).await.unwrap();
        assert_eq!(meta.page_count, 1);
    }
}
