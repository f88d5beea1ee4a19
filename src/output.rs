//! Response schema and per-run statistics.
//!
//! The JSON shape of [`ExtractionResponse`] is fixed by the consumers of the
//! endpoint; field names and the `page_type` strings must not change.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// A single billed charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    /// Item name exactly as written on the bill.
    pub item_name: String,
    /// Net amount of the item after discounts.
    pub item_amount: f64,
    /// Unit rate as written on the bill.
    pub item_rate: f64,
    /// Quantity as written on the bill.
    pub item_quantity: f64,
}

/// The model's classification of a bill page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageType {
    #[default]
    #[serde(rename = "Bill Detail")]
    BillDetail,
    #[serde(rename = "Final Bill")]
    FinalBill,
    #[serde(rename = "Pharmacy")]
    Pharmacy,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::BillDetail => "Bill Detail",
            PageType::FinalBill => "Final Bill",
            PageType::Pharmacy => "Pharmacy",
        }
    }
}

/// Line items extracted from one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLineItems {
    /// 1-based page number, as a string.
    pub page_no: String,
    pub page_type: PageType,
    pub bill_items: Vec<BillItem>,
}

/// Provider-reported token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.total_tokens += rhs.total_tokens;
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// The `data` payload of a successful response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionData {
    pub pagewise_line_items: Vec<PageLineItems>,
    pub total_item_count: usize,
}

impl ExtractionData {
    /// Build from page results, computing `total_item_count`.
    pub fn from_pages(pages: Vec<PageLineItems>) -> Self {
        let total_item_count = pages.iter().map(|p| p.bill_items.len()).sum();
        Self {
            pagewise_line_items: pages,
            total_item_count,
        }
    }
}

/// The body returned by `POST /extract-bill-data`, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub is_success: bool,
    pub token_usage: TokenUsage,
    pub data: Option<ExtractionData>,
    pub error: Option<String>,
}

impl ExtractionResponse {
    pub fn success(output: ExtractionOutput) -> Self {
        Self {
            is_success: true,
            token_usage: output.token_usage,
            data: Some(output.data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            token_usage: TokenUsage::default(),
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Everything an extraction run produces.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    pub data: ExtractionData,
    pub token_usage: TokenUsage,
    pub stats: ExtractionStats,
}

/// Timing and volume figures for one extraction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStats {
    /// Pages in the source document (1 for images).
    pub total_pages: usize,
    /// Pages sent to the model.
    pub processed_pages: usize,
    /// Model retries summed across pages.
    pub retries: u32,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// PDF metadata reported by `pdfinfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
    pub is_encrypted: bool,
}
