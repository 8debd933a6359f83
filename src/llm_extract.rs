// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::document_db::{DocumentStore, StoredExtraction};
use crate::reply::{self, ParsedPayload};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// The prompt that instructs the model to extract the invoice total.
const AMOUNT_PROMPT: &str = r#"You are an invoice extraction assistant.
You are given an invoice, either as extracted PDF text or as a page image.
Extract ONLY the total invoice amount and return valid JSON in this form:
{"invoice_amount": "<amount exactly as printed>", "currency": "<ISO code or null>"}

Notes:
- The text may be garbled due to PDF column extraction issues. Do your best.
- Use null for values you cannot determine.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// The prompt for applying a natural-language discount rule.
const DISCOUNT_PROMPT: &str = r#"You are an invoice discount assistant.
You are given an extracted invoice amount and a discount rule written in
natural language. Apply the rule to the amount and return valid JSON:
{"original_amount": <number>, "final_amount": <number>, "rule_applied": "<short restatement>", "explanation": "<one sentence>"}

Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Truncate very long invoice texts to stay within context limits.
const MAX_PROMPT_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

/// Chat-completions content: plain text, or multimodal parts when a page
/// image rides along.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Outcome of a discount-rule application, decoded from the model payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountOutcome {
    pub original_amount: Option<Value>,
    pub final_amount: Option<Value>,
    pub rule_applied: Option<String>,
    pub explanation: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
pub struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
pub fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, Box<dyn std::error::Error>> {
    match llm.backend {
        LlmBackend::Openrouter => {
            let api_key = match llm.openrouter.api_key.clone() {
                Some(key) => key,
                None => std::env::var("OPENROUTER_API_KEY").map_err(|_| {
                    "OpenRouter backend needs llm.openrouter.api_key or OPENROUTER_API_KEY"
                })?,
            };
            info!(
                url = %llm.openrouter.base_url,
                model = %llm.openrouter.model,
                "Using OpenRouter backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.openrouter.base_url.clone(),
                model: llm.openrouter.model.clone(),
                api_key,
            })
        }
        LlmBackend::Ollama => {
            info!(
                url = %llm.ollama.base_url,
                model = %llm.ollama.model,
                "Using Ollama (local) backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.clone(),
                model: llm.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        LlmBackend::Remote => {
            let api_key = std::env::var("LLM_API_KEY")
                .map_err(|_| "LLM_API_KEY env var required for remote backend")?;
            info!(
                url = %llm.remote.base_url,
                model = %llm.remote.model,
                "Using remote API backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
        LlmBackend::Heuristics => {
            Err("Heuristics backend selected — model extraction not available".into())
        }
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches("/v1").trim_end_matches("/v1/");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

async fn ensure_backend_reachable(
    client: &Client,
    llm: &LlmSection,
    endpoint: &ResolvedEndpoint,
) -> Result<(), Box<dyn std::error::Error>> {
    if llm.backend == LlmBackend::Ollama && !check_ollama_health(client, &endpoint.base_url).await {
        return Err(format!(
            "Ollama is not running at {}. Start it with: ollama serve",
            endpoint.base_url
        )
        .into());
    }
    Ok(())
}

/// POST a chat request and return the first choice's content string.
async fn send_chat(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    request: &ChatRequest,
) -> Result<String, Box<dyn std::error::Error>> {
    let url = format!("{}/chat/completions", endpoint.base_url);

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", endpoint.api_key))
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("LLM API error {status}: {body}").into());
    }

    let chat_response: ChatResponse = response.json().await?;
    chat_response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| "Empty response from LLM".into())
}

/// Clip prompt text to `MAX_PROMPT_CHARS`, respecting char boundaries.
fn clip_for_prompt(text: &str) -> &str {
    if text.len() <= MAX_PROMPT_CHARS {
        return text;
    }
    let mut end = MAX_PROMPT_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Pull the amount out of a parsed payload, tolerating the string and
/// number spellings models actually produce.
pub fn amount_from_payload(payload: &ParsedPayload) -> Option<String> {
    let field = payload
        .get("invoice_amount")
        .or_else(|| payload.get("amount"))?;
    match field {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Send extracted invoice text to the model and parse its reply.
pub async fn extract_amount_from_text(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    extracted_text: &str,
) -> Result<ParsedPayload, Box<dyn std::error::Error>> {
    let text = clip_for_prompt(extracted_text);

    let request = ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(AMOUNT_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Text(format!(
                    "Extract the total amount from the following invoice text:\n\n{text}"
                )),
            },
        ],
        temperature: 0.0,
    };

    let content = send_chat(client, endpoint, &request).await?;
    parse_reply(&content)
}

/// Send a pre-rendered page image (PNG bytes) to the model and parse its
/// reply. Rendering is the caller's responsibility.
pub async fn extract_amount_from_image(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    png_bytes: &[u8],
) -> Result<ParsedPayload, Box<dyn std::error::Error>> {
    let data_url = format!("data:image/png;base64,{}", BASE64.encode(png_bytes));

    let request = ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(AMOUNT_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "Extract the total amount from this invoice page.".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ]),
            },
        ],
        temperature: 0.0,
    };

    let content = send_chat(client, endpoint, &request).await?;
    parse_reply(&content)
}

/// Ask the model to apply a natural-language discount rule to an amount.
pub async fn apply_discount(
    client: &Client,
    endpoint: &ResolvedEndpoint,
    amount: &str,
    rule: &str,
) -> Result<DiscountOutcome, Box<dyn std::error::Error>> {
    let request = ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(DISCOUNT_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Text(format!(
                    "Invoice amount: {amount}\nDiscount rule: {rule}"
                )),
            },
        ],
        temperature: 0.0,
    };

    let content = send_chat(client, endpoint, &request).await?;
    let payload = parse_reply(&content)?;
    let outcome: DiscountOutcome = serde_json::from_value(Value::Object(payload))?;
    Ok(outcome)
}

/// Run the tolerant extractor over reply content, logging failures with
/// their raw text before propagating.
fn parse_reply(content: &str) -> Result<ParsedPayload, Box<dyn std::error::Error>> {
    match reply::extract_payload(content) {
        Ok(payload) => Ok(payload),
        Err(e) => {
            warn!(error = %e, "Model reply did not contain a usable payload");
            Err(e.into())
        }
    }
}

/// Extract the amount from a single text (for the inspect flow).
pub async fn run_llm_extraction_single(
    text: &str,
    llm_config: &LlmSection,
) -> Result<ParsedPayload, Box<dyn std::error::Error>> {
    let endpoint = resolve_endpoint(llm_config)?;
    let client = Client::new();
    ensure_backend_reachable(&client, llm_config, &endpoint).await?;
    extract_amount_from_text(&client, &endpoint, text).await
}

/// Run model-based extraction on all text-classified documents.
pub async fn run_llm_extraction(
    db: &DocumentStore,
    llm_config: &LlmSection,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = resolve_endpoint(llm_config)?;
    let client = Client::new();
    ensure_backend_reachable(&client, llm_config, &endpoint).await?;

    let text_documents = db.get_text_documents()?;
    info!(
        count = text_documents.len(),
        backend = ?llm_config.backend,
        model = %endpoint.model,
        "Text documents for model extraction"
    );

    for document in &text_documents {
        let doc_id = document.id.ok_or("document must have an id from DB")?;
        let span = tracing::info_span!("llm_extract", id = doc_id, filename = %document.filename);
        let _guard = span.enter();

        let Some(ref text) = document.extracted_text else {
            warn!("No extracted text despite content_type = text");
            continue;
        };

        match extract_amount_from_text(&client, &endpoint, text).await {
            Ok(payload) => {
                let amount = amount_from_payload(&payload);
                info!(amount = ?amount, "Model extraction result");
                db.record_extraction(&StoredExtraction {
                    id: None,
                    document_id: doc_id,
                    source: "llm".to_string(),
                    amount,
                    payload_json: Some(serde_json::to_string(&payload)?),
                })?;
            }
            Err(e) => {
                tracing::error!(error = %e, "Model extraction failed for document {doc_id}");
            }
        }
    }

    Ok(())
}

/// Run model-based extraction for one stored document by id.
pub async fn run_llm_extraction_for_document(
    db: &DocumentStore,
    llm_config: &LlmSection,
    document_id: i64,
) -> Result<ParsedPayload, Box<dyn std::error::Error>> {
    let document = db
        .get_document_by_id(document_id)?
        .ok_or_else(|| format!("No document found with id {document_id}"))?;
    let text = document
        .extracted_text
        .ok_or_else(|| format!("Document {document_id} has no extracted text — run process first"))?;

    let payload = run_llm_extraction_single(&text, llm_config).await?;
    db.record_extraction(&StoredExtraction {
        id: None,
        document_id,
        source: "llm".to_string(),
        amount: amount_from_payload(&payload),
        payload_json: Some(serde_json::to_string(&payload)?),
    })?;
    Ok(payload)
}

/// Extract the amount from a caller-supplied page image, optionally
/// recording the result against a stored document.
pub async fn run_image_extraction(
    db: &DocumentStore,
    llm_config: &LlmSection,
    png_bytes: &[u8],
    document_id: Option<i64>,
) -> Result<ParsedPayload, Box<dyn std::error::Error>> {
    let endpoint = resolve_endpoint(llm_config)?;
    let client = Client::new();
    ensure_backend_reachable(&client, llm_config, &endpoint).await?;

    let payload = extract_amount_from_image(&client, &endpoint, png_bytes).await?;
    if let Some(doc_id) = document_id {
        db.record_extraction(&StoredExtraction {
            id: None,
            document_id: doc_id,
            source: "llm".to_string(),
            amount: amount_from_payload(&payload),
            payload_json: Some(serde_json::to_string(&payload)?),
        })?;
    }
    Ok(payload)
}

/// Apply a discount rule to a document's latest extracted amount and record
/// the outcome.
pub async fn run_discount(
    db: &DocumentStore,
    llm_config: &LlmSection,
    document_id: i64,
    rule: &str,
) -> Result<DiscountOutcome, Box<dyn std::error::Error>> {
    let amount = db
        .latest_amount(document_id)?
        .ok_or_else(|| format!("No extracted amount for document {document_id} — run process or llm first"))?;

    let endpoint = resolve_endpoint(llm_config)?;
    let client = Client::new();
    ensure_backend_reachable(&client, llm_config, &endpoint).await?;

    let outcome = apply_discount(&client, &endpoint, &amount, rule).await?;
    info!(
        original = ?outcome.original_amount,
        final_amount = ?outcome.final_amount,
        "Discount applied"
    );
    db.record_extraction(&StoredExtraction {
        id: None,
        document_id,
        source: "discount".to_string(),
        amount: outcome.final_amount.as_ref().map(value_as_amount),
        payload_json: Some(serde_json::to_string(&outcome)?),
    })?;
    Ok(outcome)
}

fn value_as_amount(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amount_from_payload_accepts_string_and_number() {
        let payload = reply::extract_payload(r#"{"invoice_amount": "10.00"}"#).unwrap();
        assert_eq!(amount_from_payload(&payload).as_deref(), Some("10.00"));

        let payload = reply::extract_payload(r#"{"amount": 42.5}"#).unwrap();
        assert_eq!(amount_from_payload(&payload).as_deref(), Some("42.5"));

        let payload = reply::extract_payload(r#"{"invoice_amount": null}"#).unwrap();
        assert_eq!(amount_from_payload(&payload), None);
    }

    #[test]
    fn discount_outcome_tolerates_partial_payloads() {
        let payload = reply::extract_payload(
            r#"```json
            {"original_amount": 100.0, "final_amount": 90.0, "rule_applied": "10% off"}
            ```"#,
        )
        .unwrap();
        let outcome: DiscountOutcome = serde_json::from_value(Value::Object(payload)).unwrap();
        assert_eq!(outcome.final_amount, Some(json!(90.0)));
        assert_eq!(outcome.explanation, None);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let text = "é".repeat(MAX_PROMPT_CHARS); // 2 bytes per char
        let clipped = clip_for_prompt(&text);
        assert!(clipped.len() <= MAX_PROMPT_CHARS);
        assert!(text.starts_with(clipped));
    }

    #[test]
    fn multimodal_request_serializes_to_openai_shape() {
        let request = ChatRequest {
            model: "test".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "look".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AAAA".to_string(),
                        },
                    },
                ]),
            }],
            temperature: 0.0,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["messages"][0]["content"][0]["type"], "text");
        assert_eq!(v["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            v["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }
}
