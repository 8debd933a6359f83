// src/reply.rs

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

/// Structured payload decoded from a model reply.
pub type ParsedPayload = Map<String, Value>;

/// A model reply that could not be turned into a structured payload.
///
/// Model output is untrusted and frequently malformed, so this is an
/// expected, recoverable outcome rather than a fault.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {reason}")]
    Malformed {
        /// The candidate text that failed to parse, for diagnostic display.
        raw: String,
        reason: String,
    },
}

const FENCE: &str = "```";

/// Extract the JSON object embedded in a free-text model reply.
///
/// Replies arrive as arbitrary text: the object may be wrapped in a
/// triple-backtick fence, the fence may carry a `json` language tag, and
/// prose may surround it. Any input that does not yield a JSON object comes
/// back as `PayloadError::Malformed`; this function never panics.
pub fn extract_payload(reply: &str) -> Result<ParsedPayload, PayloadError> {
    let candidate = strip_json_tag(fenced_candidate(reply)).trim();

    if candidate.is_empty() {
        return Err(malformed(candidate, "empty candidate"));
    }

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(malformed(
            candidate,
            format!("expected a JSON object, got {}", value_kind(&other)),
        )),
        Err(e) => Err(malformed(candidate, e.to_string())),
    }
}

/// Legacy reply envelope: an object whose `content` array holds a single
/// element with a `text` field carrying the JSON string. Used by one older
/// call path; new code should call `extract_payload`.
pub fn extract_nested_payload(reply: &str) -> Result<ParsedPayload, PayloadError> {
    let envelope = extract_payload(reply)?;
    let inner = envelope
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(reply.trim(), "envelope has no content[0].text"))?;
    extract_payload(inner)
}

/// The text between the first and last fence marker, or the whole trimmed
/// reply when there is no usable fence pair.
fn fenced_candidate(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find(FENCE), trimmed.rfind(FENCE)) {
        (Some(first), Some(last)) if last >= first + FENCE.len() => {
            &trimmed[first + FENCE.len()..last]
        }
        _ => trimmed,
    }
}

/// Drop a leading `json` language tag (any case) and the whitespace after it.
fn strip_json_tag(candidate: &str) -> &str {
    let trimmed = candidate.trim();
    match trimmed.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => trimmed[4..].trim_start(),
        _ => trimmed,
    }
}

fn malformed(raw: &str, reason: impl Into<String>) -> PayloadError {
    PayloadError::Malformed {
        raw: raw.to_string(),
        reason: reason.into(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_of(err: PayloadError) -> String {
        let PayloadError::Malformed { raw, .. } = err;
        raw
    }

    #[test]
    fn fenced_json_with_tag() {
        let reply = "```json\n{\"invoice_amount\": \"10.00\"}\n```";
        let payload = extract_payload(reply).unwrap();
        assert_eq!(payload.get("invoice_amount"), Some(&json!("10.00")));
    }

    #[test]
    fn tag_case_is_ignored() {
        let reply = "```JSON\n{\"invoice_amount\": \"10.00\"}\n```";
        let payload = extract_payload(reply).unwrap();
        assert_eq!(payload.get("invoice_amount"), Some(&json!("10.00")));
    }

    #[test]
    fn bare_object_without_fences() {
        let payload = extract_payload("  {\"amount\": 42.5}  ").unwrap();
        assert_eq!(payload.get("amount"), Some(&json!(42.5)));
    }

    #[test]
    fn prose_outside_the_fence_is_ignored() {
        let reply = "Sure! Here is the result:\n```json\n{\"amount\": \"7.00\"}\n```\nLet me know if you need more.";
        let payload = extract_payload(reply).unwrap();
        assert_eq!(payload.get("amount"), Some(&json!("7.00")));
    }

    #[test]
    fn plain_text_is_malformed_and_carries_raw() {
        let err = extract_payload("  no json here  ").unwrap_err();
        assert_eq!(raw_of(err), "no json here");
    }

    #[test]
    fn empty_reply_is_malformed() {
        assert!(extract_payload("").is_err());
        assert!(extract_payload("   \n  ").is_err());
    }

    #[test]
    fn lone_fence_marker_is_malformed() {
        // A single marker is not a fence pair; the whole reply is the
        // candidate and fails to parse.
        assert!(extract_payload("``` {\"a\": 1}").is_err());
    }

    #[test]
    fn adjacent_fence_markers_do_not_panic() {
        assert!(extract_payload("``````").is_err());
        assert!(extract_payload("`````").is_err());
    }

    #[test]
    fn non_object_top_level_is_malformed() {
        assert!(extract_payload("```json\n[1, 2, 3]\n```").is_err());
        assert!(extract_payload("42").is_err());
    }

    #[test]
    fn truncated_json_is_malformed_not_a_panic() {
        let err = extract_payload("```json\n{\"amount\": \"10.\n```").unwrap_err();
        assert!(raw_of(err).starts_with("{\"amount\""));
    }

    #[test]
    fn extract_is_deterministic() {
        let reply = "```json\n{\"invoice_amount\": \"10.00\"}\n```";
        assert_eq!(
            extract_payload(reply).unwrap(),
            extract_payload(reply).unwrap()
        );
    }

    #[test]
    fn nested_envelope_payload() {
        let reply = r#"{"content": [{"text": "{\"invoice_amount\": \"99.10\"}"}]}"#;
        let payload = extract_nested_payload(reply).unwrap();
        assert_eq!(payload.get("invoice_amount"), Some(&json!("99.10")));
    }

    #[test]
    fn nested_envelope_without_text_is_malformed() {
        assert!(extract_nested_payload(r#"{"content": []}"#).is_err());
        assert!(extract_nested_payload(r#"{"other": true}"#).is_err());
    }
}
