// src/session.rs

use crate::heuristics::AmountMatch;
use crate::llm_extract::{self, DiscountOutcome};
use crate::reply::ParsedPayload;
use serde::Serialize;

/// Request-scoped results for one document inspection.
///
/// Each phase writes its result into an explicit field; `reset` clears all
/// of them. Nothing here is shared between runs — callers create one
/// context per document and drop it when done.
#[derive(Debug, Default, Serialize)]
pub struct SessionContext {
    /// Result of the keyword-proximity locator.
    pub amount: Option<AmountMatch>,
    /// Parsed payload from the model's reply.
    pub payload: Option<ParsedPayload>,
    /// Outcome of a discount-rule application.
    pub discount: Option<DiscountOutcome>,
    /// Free-form phase notes (e.g. why a phase was skipped).
    pub notes: Vec<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every field.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn note(&mut self, msg: impl Into<String>) {
        self.notes.push(msg.into());
    }

    /// The best amount gathered so far: the model's reading when present,
    /// otherwise the locator's.
    pub fn best_amount(&self) -> Option<String> {
        self.payload
            .as_ref()
            .and_then(llm_extract::amount_from_payload)
            .or_else(|| self.amount.as_ref().map(|m| m.raw.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply;

    fn heuristic_match() -> AmountMatch {
        AmountMatch {
            raw: "42.50".to_string(),
            offset: 10,
            keyword: "TOTAL".to_string(),
            distance: 4,
        }
    }

    #[test]
    fn reset_clears_all_fields() {
        let mut session = SessionContext::new();
        session.amount = Some(heuristic_match());
        session.payload = reply::extract_payload(r#"{"invoice_amount": "42.55"}"#).ok();
        session.note("model disagrees with locator");

        session.reset();
        assert!(session.amount.is_none());
        assert!(session.payload.is_none());
        assert!(session.discount.is_none());
        assert!(session.notes.is_empty());
    }

    #[test]
    fn model_reading_outranks_locator() {
        let mut session = SessionContext::new();
        session.amount = Some(heuristic_match());
        assert_eq!(session.best_amount().as_deref(), Some("42.50"));

        session.payload = reply::extract_payload(r#"{"invoice_amount": "42.55"}"#).ok();
        assert_eq!(session.best_amount().as_deref(), Some("42.55"));
    }
}
