//! Lenient parsing of model output into line items.
//!
//! Even with `response_format: json_object` the model's reply is not
//! trustworthy: it wraps JSON in Markdown fences, adds a sentence before it,
//! quotes numbers as `"₹1,250.00"`, leaves out quantities, and copies the
//! bill's "Grand Total" row as if it were a charge. Each rule below fixes one
//! of those quirks. Only when no JSON value can be recovered at all does the
//! page fail.

use crate::output::{BillItem, PageType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Keys under which models put the item list.
const ITEM_KEYS: &[&str] = &["bill_items", "items", "line_items"];
const NAME_KEYS: &[&str] = &["item_name", "name", "description"];
const AMOUNT_KEYS: &[&str] = &["item_amount", "amount", "net_amount"];
const RATE_KEYS: &[&str] = &["item_rate", "rate", "unit_price"];
const QUANTITY_KEYS: &[&str] = &["item_quantity", "quantity", "qty"];

/// Longest model-output excerpt quoted in an error.
const MAX_SNIPPET: usize = 120;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").unwrap());

/// Summary rows the prompt tells the model to skip. Matches whole names only,
/// so "Total Cholesterol" stays an item.
static SUMMARY_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^(?:
            sub[\s-]*total |
            grand\s+total |
            net\s+(?:amount|payable|total|bill\s+amount) |
            total(?:\s+(?:amount|bill|bill\s+amount|payable|charges|due))? |
            amount\s+payable |
            (?:less\s+)?discount(?:\s+amount)? |
            round(?:ed)?[\s-]*off |
            balance(?:\s+due)?
        )\s*[:.\-]*$",
    )
    .unwrap()
});

/// Items and classification recovered from one page's model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    pub page_type: PageType,
    pub items: Vec<BillItem>,
}

/// Parse one page's model output.
///
/// Returns `Err(detail)` only when no JSON object or array can be recovered.
pub fn parse_page(text: &str) -> Result<ParsedPage, String> {
    let value = recover_json(text)?;

    let (page_type, raw_items): (PageType, &[Value]) = match &value {
        Value::Array(items) => (PageType::default(), items.as_slice()),
        Value::Object(obj) => (
            parse_page_type(obj.get("page_type")),
            find_items(obj).map(Vec::as_slice).unwrap_or(&[]),
        ),
        other => {
            return Err(format!(
                "expected a JSON object, got {}",
                snippet(&other.to_string())
            ))
        }
    };

    let items = raw_items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(parse_item)
        .collect();

    Ok(ParsedPage { page_type, items })
}

/// Strip fences; failing a direct parse, try the outermost `{…}` / `[…]` span.
fn recover_json(text: &str) -> Result<Value, String> {
    let cleaned = FENCE_RE.replace_all(text, "");
    let cleaned = cleaned.trim();

    if let Ok(v) = serde_json::from_str::<Value>(cleaned) {
        return Ok(v);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (cleaned.find(open), cleaned.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    Err(format!("no JSON found in model output: {}", snippet(cleaned)))
}

fn snippet(text: &str) -> String {
    if text.chars().count() > MAX_SNIPPET {
        let cut: String = text.chars().take(MAX_SNIPPET).collect();
        format!("{cut:?}…")
    } else {
        format!("{text:?}")
    }
}

fn find_items(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    ITEM_KEYS.iter().find_map(|k| obj.get(*k).and_then(Value::as_array))
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// Case/spacing-insensitive page-type match; anything else is Bill Detail.
fn parse_page_type(value: Option<&Value>) -> PageType {
    let Some(raw) = value.and_then(Value::as_str) else {
        return PageType::default();
    };
    let norm: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '|')
        .collect();

    match norm.as_str() {
        "billdetail" | "billdetails" | "detail" => PageType::BillDetail,
        "finalbill" | "final" | "summary" => PageType::FinalBill,
        "pharmacy" | "pharmacybill" => PageType::Pharmacy,
        // The prompt template echoed back verbatim is not a classification.
        n if n.contains('|') => PageType::default(),
        n if n.contains("pharmacy") => PageType::Pharmacy,
        n if n.contains("final") => PageType::FinalBill,
        _ => PageType::default(),
    }
}

/// First number in a string cell, e.g. `"Rs. 1,000/-"` or `"1,180.00 (incl. GST 18%)"`.
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap());

/// Accept JSON numbers and strings like `"₹ 1,250.00"` or `"2 Nos"`.
fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let token = NUMBER_RE.find(s)?.as_str().replace(',', "");
            token.parse().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn is_summary_row(name: &str) -> bool {
    SUMMARY_ROW_RE.is_match(name.trim())
}

/// Build one item, filling gaps from the other fields.
///
/// Rows without any monetary value, and summary rows, are dropped.
fn parse_item(obj: &Map<String, Value>) -> Option<BillItem> {
    let name = first_of(obj, NAME_KEYS)
        .map(|v| match v {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    if is_summary_row(&name) {
        return None;
    }

    let quantity = first_of(obj, QUANTITY_KEYS)
        .and_then(parse_number)
        .filter(|q| *q > 0.0)
        .unwrap_or(1.0);
    let rate = first_of(obj, RATE_KEYS).and_then(parse_number);
    let amount = first_of(obj, AMOUNT_KEYS).and_then(parse_number);

    let (amount, rate) = match (amount, rate) {
        (None, None) => return None,
        (Some(a), Some(r)) if r != 0.0 => (a, r),
        (Some(a), _) => (a, round2(a / quantity)),
        (None, Some(r)) => (round2(r * quantity), r),
    };

    Some(BillItem {
        item_name: name,
        item_amount: amount,
        item_rate: rate,
        item_quantity: quantity,
    })
}
