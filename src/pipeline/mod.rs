//! Pipeline stages for bill extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ parse
//! (bytes/URL) (poppler) (base64)  (VLM)   (JSON → rows)
//! ```
//!
//! 1. [`input`]  classify bytes as PDF or image; fetch URLs
//! 2. [`render`] rasterise selected PDF pages with `pdftoppm`, decode images
//! 3. [`encode`] JPEG-encode and base64-wrap each `DynamicImage`
//! 4. [`llm`]    drive the VLM call with retry/backoff; the only stage with
//!    provider I/O
//! 5. [`parse`]  recover JSON from the reply and normalise it into
//!    [`BillItem`](crate::output::BillItem) rows

pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
