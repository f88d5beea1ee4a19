//! VLM interaction: send one page to the model and parse its reply.
//!
//! All prompt text lives in [`crate::prompts`] and all output repair in
//! [`crate::pipeline::parse`]; this module only owns the call loop.
//!
//! ## Retry Strategy
//!
//! Connection failures, timeouts, HTTP 429 and 5xx are transient under
//! concurrent load. They are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`), or after the server's `Retry-After`
//! when it sends one. Authentication failures and other 4xx are returned
//! immediately. Unparseable replies are not retried.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, VlmError};
use crate::output::{PageLineItems, TokenUsage};
use crate::pipeline::parse;
use crate::prompts::extraction_prompt;
use crate::vlm::{ImageData, VisionModel, VisionRequest};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Upper bound on a server-requested `Retry-After` wait.
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// The successful result of one page.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// 1-based page number.
    pub page_num: usize,
    pub items: PageLineItems,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub retries: u32,
}

/// Run one page through the model, retrying transient failures.
pub async fn process_page(
    provider: &Arc<dyn VisionModel>,
    page_num: usize,
    image: ImageData,
    config: &ExtractionConfig,
) -> Result<PageResult, ExtractError> {
    let start = Instant::now();
    let request = build_request(page_num, image, config);

    let mut attempt: u32 = 0;
    let response = loop {
        match provider.complete(&request).await {
            Ok(response) => break response,
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = backoff_for(&e, attempt, config.retry_backoff_ms);
                warn!(
                    "Page {}: {}; retry {}/{} after {}ms",
                    page_num,
                    e,
                    attempt,
                    config.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }
            Err(e) => {
                warn!("Page {}: giving up after {} attempt(s): {}", page_num, attempt + 1, e);
                return Err(ExtractError::Model {
                    page: page_num,
                    attempts: attempt + 1,
                    source: e,
                });
            }
        }
    };

    let parsed = parse::parse_page(&response.content).map_err(|detail| {
        ExtractError::MalformedModelOutput {
            page: page_num,
            detail,
        }
    })?;

    let duration = start.elapsed();
    debug!(
        "Page {}: {} items, {} tokens, {:?}",
        page_num,
        parsed.items.len(),
        response.usage.total_tokens,
        duration
    );

    Ok(PageResult {
        page_num,
        items: PageLineItems {
            page_no: page_num.to_string(),
            page_type: parsed.page_type,
            bill_items: parsed.items,
        },
        usage: response.usage,
        duration_ms: duration.as_millis() as u64,
        retries: attempt,
    })
}

fn build_request(page_num: usize, image: ImageData, config: &ExtractionConfig) -> VisionRequest {
    VisionRequest {
        page_num,
        prompt: extraction_prompt(config.system_prompt.as_deref()).to_string(),
        image,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        json_mode: true,
    }
}

fn backoff_for(err: &VlmError, attempt: u32, base_ms: u64) -> Duration {
    if let VlmError::RateLimited {
        retry_after_secs: Some(secs),
    } = err
    {
        return Duration::from_secs((*secs).min(MAX_RETRY_AFTER_SECS));
    }
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageType;
    use crate::vlm::{MockReply, MockVisionModel};

    const ONE_ITEM: &str =
        r#"{"page_type": "Bill Detail", "bill_items": [{"item_name": "X-Ray Chest", "item_rate": 600, "item_quantity": 1, "item_amount": 600}]}"#;

    fn config(max_retries: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn image() -> ImageData {
        ImageData::new("QUJD", "image/jpeg")
    }

    #[test]
    fn build_request_defaults() {
        let req = build_request(2, image(), &ExtractionConfig::default());
        assert_eq!(req.page_num, 2);
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.max_tokens, 4096);
        assert!(req.json_mode);
        assert_eq!(req.prompt, crate::prompts::DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn backoff_doubles_and_honours_retry_after() {
        let unreachable = VlmError::Unreachable { detail: String::new() };
        assert_eq!(backoff_for(&unreachable, 1, 500), Duration::from_millis(500));
        assert_eq!(backoff_for(&unreachable, 3, 500), Duration::from_millis(2000));

        let limited = VlmError::RateLimited { retry_after_secs: Some(120) };
        assert_eq!(backoff_for(&limited, 1, 500), Duration::from_secs(MAX_RETRY_AFTER_SECS));
    }

    #[test]
    fn success_first_try() {
        let model: Arc<dyn VisionModel> = Arc::new(MockVisionModel::new(MockReply::text(ONE_ITEM)));
        let result = tokio_test::block_on(process_page(&model, 1, image(), &config(2))).unwrap();
        assert_eq!(result.retries, 0);
        assert_eq!(result.items.page_no, "1");
        assert_eq!(result.items.page_type, PageType::BillDetail);
        assert_eq!(result.items.bill_items.len(), 1);
        assert_eq!(result.usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let mock = Arc::new(MockVisionModel::with_sequence(
            vec![
                MockReply::Error(VlmError::Api { status: 503, detail: "overloaded".into() }),
                MockReply::Error(VlmError::RateLimited { retry_after_secs: None }),
            ],
            MockReply::text(ONE_ITEM),
        ));
        let model: Arc<dyn VisionModel> = mock.clone();

        let result = process_page(&model, 1, image(), &config(2)).await.unwrap();
        assert_eq!(result.retries, 2);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let mock = Arc::new(MockVisionModel::new(MockReply::Error(VlmError::Unreachable {
            detail: "connection refused".into(),
        })));
        let model: Arc<dyn VisionModel> = mock.clone();

        let err = process_page(&model, 4, image(), &config(1)).await.unwrap_err();
        match err {
            ExtractError::Model { page, attempts, .. } => {
                assert_eq!(page, 4);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let mock = Arc::new(MockVisionModel::new(MockReply::Error(VlmError::Auth {
            status: 401,
            detail: "invalid api key".into(),
        })));
        let model: Arc<dyn VisionModel> = mock.clone();

        let err = process_page(&model, 1, image(), &config(3)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Model { attempts: 1, .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn malformed_output_surfaces_page() {
        let model: Arc<dyn VisionModel> =
            Arc::new(MockVisionModel::new(MockReply::text("Sorry, the image is blurry.")));
        let err = process_page(&model, 2, image(), &config(0)).await.unwrap_err();
        assert!(matches!(err, ExtractError::MalformedModelOutput { page: 2, .. }));
    }

    #[tokio::test]
    async fn custom_prompt_is_sent() {
        let mock = Arc::new(MockVisionModel::new(MockReply::text(ONE_ITEM)));
        let model: Arc<dyn VisionModel> = mock.clone();
        let cfg = ExtractionConfig::builder()
            .system_prompt("List pharmacy items only.")
            .build()
            .unwrap();

        process_page(&model, 1, image(), &cfg).await.unwrap();
        assert_eq!(mock.prompts(), vec!["List pharmacy items only.".to_string()]);
    }
}
