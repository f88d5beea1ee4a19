//! # medbill-extract
//!
//! Extract line items from medical bills (PDF or image) using a hosted
//! Vision Language Model (VLM), exposed as a small HTTP service.
//!
//! The hard part, reading the bill, is delegated to the VLM. This crate does
//! the plumbing around it: accept the upload, rasterise PDF pages with
//! poppler, send each page image with an extraction prompt to an
//! OpenAI-compatible chat-completions endpoint (Groq by default), and turn
//! the model's text back into a fixed JSON schema.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload / URL
//!  │
//!  ├─ 1. Input   detect PDF vs image by magic bytes (or download a URL)
//!  ├─ 2. Render  pdfinfo + pdftoppm per page (images pass straight through)
//!  ├─ 3. Encode  RGB JPEG → base64 data URI
//!  ├─ 4. VLM     bounded-concurrency calls, retry on 429 / 5xx / timeouts
//!  ├─ 5. Parse   lenient JSON recovery → BillItem rows
//!  └─ 6. Output  ExtractionResponse (per-page items + token usage)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medbill_extract::{extract_bytes, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider is built from GROQ_API_KEY when none is injected.
//!     let config = ExtractionConfig::default();
//!     let bytes = std::fs::read("bill.pdf")?;
//!     let output = extract_bytes(&bytes, &config).await?;
//!     println!("{} items", output.data.total_item_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bill-extract` binary (clap + anyhow + tracing-subscriber + dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod keepalive;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod vlm;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::{ExtractError, VlmError};
pub use extract::{extract_bytes, extract_document, extract_url, inspect};
pub use output::{
    BillItem, DocumentMetadata, ExtractionData, ExtractionOutput, ExtractionResponse,
    ExtractionStats, PageLineItems, PageType, TokenUsage,
};
pub use server::{router, AppState, ServerConfig};
pub use vlm::{GroqClient, MockVisionModel, VisionModel, VisionRequest, VisionResponse};
