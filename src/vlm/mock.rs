//! Scripted vision model for tests and offline runs.

use super::{VisionModel, VisionRequest, VisionResponse};
use crate::error::VlmError;
use crate::output::TokenUsage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A configurable reply for [`MockVisionModel`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return this text with the given token usage.
    Content { text: String, usage: TokenUsage },
    /// Fail the call.
    Error(VlmError),
}

impl MockReply {
    /// A successful reply with a fixed, small token usage.
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Content {
            text: text.into(),
            usage: TokenUsage {
                total_tokens: 150,
                input_tokens: 100,
                output_tokens: 50,
            },
        }
    }
}

/// A hand-rolled [`VisionModel`] that replays scripted replies.
///
/// Returns replies from the sequence in order; once it is exhausted every
/// further call gets the fallback. Calls are counted, and the prompts seen
/// are recorded for assertions.
pub struct MockVisionModel {
    responses: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockVisionModel {
    /// A mock that always returns `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: reply,
            delay: None,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A mock that returns `replies` in order, then `fallback` forever.
    pub fn with_sequence(mut replies: Vec<MockReply>, fallback: MockReply) -> Self {
        // Reverse so pop() yields the first reply.
        replies.reverse();
        Self {
            responses: Mutex::new(replies),
            ..Self::new(fallback)
        }
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `complete()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut seq = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl VisionModel for MockVisionModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, VlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.clone());
        let reply = self.next_reply();

        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }

        match reply {
            MockReply::Content { text, usage } => Ok(VisionResponse {
                content: text,
                usage,
            }),
            MockReply::Error(e) => Err(e),
        }
    }
}
