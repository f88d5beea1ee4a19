//! OpenAI-compatible chat-completions client (Groq by default).
//!
//! Sends a single user message whose content is the extraction prompt
//! followed by the page image as a `data:` URI, and asks for
//! `response_format: json_object`.

use super::{ImageData, VisionModel, VisionRequest, VisionResponse};
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, VlmError};
use crate::output::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Longest upstream error body echoed back in an error message.
const MAX_ERROR_DETAIL: usize = 300;

/// Client for `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for GroqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GroqClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ExtractError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExtractError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs,
        })
    }

    /// Build a client from the config's model, base URL and timeout.
    pub fn from_config(config: &ExtractionConfig, api_key: impl Into<String>) -> Result<Self, ExtractError> {
        Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.api_timeout_secs,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl VisionModel for GroqClient {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, VlmError> {
        let body = ChatCompletionRequest::new(&self.model, request);

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text, retry_after_secs));
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.classify_transport_error(e))?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| VlmError::InvalidResponse(format!("not a chat completion: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| VlmError::InvalidResponse("completion has no content".into()))?;

        let usage = parsed.usage.map(Usage::into_token_usage).unwrap_or_default();
        debug!(
            "Page {}: {} input tokens, {} output tokens",
            request.page_num, usage.input_tokens, usage.output_tokens
        );

        Ok(VisionResponse { content, usage })
    }
}

impl GroqClient {
    fn classify_transport_error(&self, e: reqwest::Error) -> VlmError {
        if e.is_timeout() {
            VlmError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            VlmError::Unreachable {
                detail: e.to_string(),
            }
        }
    }
}

/// Map a non-success HTTP status to a [`VlmError`].
fn classify_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> VlmError {
    let detail = error_detail(body);
    match status {
        429 => VlmError::RateLimited { retry_after_secs },
        401 | 403 => VlmError::Auth { status, detail },
        _ => VlmError::Api { status, detail },
    }
}

/// Prefer `{"error":{"message":…}}`; fall back to the (truncated) raw body.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Inner,
    }
    #[derive(Deserialize)]
    struct Inner {
        message: String,
    }

    if let Ok(env) = serde_json::from_str::<Envelope>(body) {
        return env.error.message;
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_DETAIL {
        let cut: String = trimmed.chars().take(MAX_ERROR_DETAIL).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(model: &'a str, request: &'a VisionRequest) -> Self {
        Self {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: &request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl::from(&request.image),
                    },
                ],
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl From<&ImageData> for ImageUrl {
    fn from(img: &ImageData) -> Self {
        Self {
            url: img.to_data_uri(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl Usage {
    fn into_token_usage(self) -> TokenUsage {
        let total = if self.total_tokens == 0 {
            self.prompt_tokens + self.completion_tokens
        } else {
            self.total_tokens
        };
        TokenUsage {
            total_tokens: total,
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn request() -> VisionRequest {
        VisionRequest {
            page_num: 1,
            prompt: "extract".into(),
            image: ImageData::new("QUJD", "image/jpeg"),
            temperature: 0.1,
            max_tokens: 4096,
            json_mode: true,
        }
    }

    #[test]
    fn request_body_matches_openai_vision_shape() {
        let req = request();
        let body = serde_json::to_value(ChatCompletionRequest::new("llama", &req)).unwrap();
        assert_eq!(body["model"], "llama");
        assert_eq!(body["stream"], false);
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0], json!({"type": "text", "text": "extract"}));
        assert_eq!(
            body["messages"][0]["content"][1],
            json!({"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,QUJD"}})
        );
    }

    #[test]
    fn response_format_omitted_without_json_mode() {
        let mut req = request();
        req.json_mode = false;
        let body = serde_json::to_value(ChatCompletionRequest::new("llama", &req)).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(429, "", Some(3)),
            VlmError::RateLimited { retry_after_secs: Some(3) }
        ));
        assert!(matches!(classify_status(401, "", None), VlmError::Auth { status: 401, .. }));
        match classify_status(400, r#"{"error":{"message":"bad image"}}"#, None) {
            VlmError::Api { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "bad image");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let detail = error_detail(&body);
        assert!(detail.chars().count() <= MAX_ERROR_DETAIL + 1);
    }

    #[test]
    fn usage_total_falls_back_to_sum() {
        let u = Usage { prompt_tokens: 7, completion_tokens: 3, total_tokens: 0 }.into_token_usage();
        assert_eq!(u.total_tokens, 10);
    }

    #[tokio::test]
    async fn complete_returns_content_and_usage() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_contains("data:image/jpeg;base64,QUJD");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"bill_items\": []}"}}],
                    "usage": {"prompt_tokens": 1200, "completion_tokens": 40, "total_tokens": 1240}
                }));
            })
            .await;

        let client = GroqClient::new("gsk_test", "llama", server.base_url(), 5).unwrap();
        let resp = client.complete(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(resp.content, "{\"bill_items\": []}");
        assert_eq!(resp.usage.input_tokens, 1200);
        assert_eq!(resp.usage.output_tokens, 40);
        assert_eq!(resp.usage.total_tokens, 1240);
    }

    #[tokio::test]
    async fn complete_maps_rate_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429)
                    .header("retry-after", "7")
                    .json_body(json!({"error": {"message": "slow down"}}));
            })
            .await;

        let client = GroqClient::new("k", "llama", server.base_url(), 5).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, VlmError::RateLimited { retry_after_secs: Some(7) }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn complete_rejects_empty_choices() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let client = GroqClient::new("k", "llama", server.base_url(), 5).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, VlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        // Port 9 (discard) on localhost is essentially never listening.
        let client = GroqClient::new("k", "llama", "http://127.0.0.1:9", 2).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }
}
