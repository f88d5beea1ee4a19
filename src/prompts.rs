//! Prompt text for VLM-based bill extraction.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided. The response parser in
//! [`crate::pipeline::parse`] enforces the same rules deterministically, so a
//! custom prompt that forgets one of them still yields schema-valid output.

/// Default prompt sent alongside each page image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert financial data extraction AI. Extract line items from this medical bill image.

OUTPUT FORMAT (Strict JSON):
{
    "page_type": "Bill Detail | Final Bill | Pharmacy",
    "bill_items": [
        {
            "item_name": "string",
            "item_rate": float,
            "item_quantity": float,
            "item_amount": float
        }
    ]
}

CRITICAL RULES:
1. EXTRACT ONLY GENUINE LINE ITEMS (services, medicines, tests).
2. IGNORE rows labeled: 'Total', 'Subtotal', 'Net Amount', 'Grand Total', 'Discount'.
3. 'item_amount' must be the NET amount (Rate x Qty).
4. If 'item_quantity' is missing, default to 1.0.
5. If 'item_rate' is missing, infer from Amount/Qty.
6. 'item_name' must be copied exactly as written on the bill.
7. 'page_type' is "Pharmacy" for medicine listings, "Final Bill" for a summary page, otherwise "Bill Detail".
8. Return ONLY valid JSON. No markdown fences, no commentary."#;

/// The prompt to use for a page, honouring an optional override.
pub fn extraction_prompt(custom: Option<&str>) -> &str {
    match custom {
        Some(p) if !p.trim().is_empty() => p,
        _ => DEFAULT_SYSTEM_PROMPT,
    }
}
