//! Vision-model abstraction.
//!
//! [`VisionModel`] is the seam between the extraction pipeline and whatever
//! answers the chat-completion request. Production uses [`GroqClient`]
//! (any OpenAI-compatible endpoint works); tests inject [`MockVisionModel`]
//! through [`crate::config::ExtractionConfig::provider`].

mod groq;
mod mock;

pub use groq::GroqClient;
pub use mock::{MockReply, MockVisionModel};

use crate::error::VlmError;
use crate::output::TokenUsage;
use async_trait::async_trait;

/// A base64-encoded image ready to embed in a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Base64 payload, no `data:` prefix.
    pub data: String,
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
}

impl ImageData {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// `data:<mime>;base64,<payload>` as accepted by OpenAI-style `image_url` parts.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One page worth of model input.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// 1-based page number, used for logging only.
    pub page_num: usize,
    pub prompt: String,
    pub image: ImageData,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider to constrain output to a JSON object.
    pub json_mode: bool,
}

/// The model's reply to a [`VisionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Something that can turn an image plus a prompt into text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Run one chat completion.
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, VlmError>;
}
