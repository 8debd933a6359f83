// src/heuristics/mod.rs

mod proximity;

use serde::Deserialize;
use serde::Serialize;

/// The numeric token judged most likely to be the invoice total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountMatch {
    /// Matched substring with its original punctuation (e.g. "1,234.56").
    pub raw: String,
    /// Byte offset of the numeric run in the document text.
    pub offset: usize,
    /// The keyword whose occurrence won the proximity comparison.
    pub keyword: String,
    /// Absolute start-offset distance between keyword and number.
    pub distance: usize,
}

/// Default keyword list, in priority order. Priority only affects iteration
/// order (and therefore tie-breaks); see `locate_amount`.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "INVOICE TOTAL",
    "TOTAL DUE",
    "AMOUNT DUE",
    "GRAND TOTAL",
    "BALANCE DUE",
    "TOTAL",
    "AMOUNT",
];

pub fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

/// Find the decimal number nearest any amount keyword in extracted PDF text.
///
/// Keywords are matched case-insensitively. The winner is the single
/// (keyword occurrence, number) pair with the smallest start-offset distance
/// across *all* keywords, so a later keyword in the list can win when its
/// number is closer. Equal distances resolve to the pair encountered first
/// in keyword-then-number iteration order; the tie-break is arbitrary, a
/// known limitation.
///
/// Returns `None` for empty text or when no eligible number exists.
pub fn locate_amount(text: &str, keywords: &[String]) -> Option<AmountMatch> {
    proximity::locate(text, keywords)
}
