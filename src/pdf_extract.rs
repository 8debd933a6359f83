// src/pdf_extract.rs

use crate::document_db::{DocumentStore, StoredExtraction};
use crate::heuristics;
use lopdf::Document;
use tracing::{info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text, concatenated in page order.
    Text(String),
    /// The PDF appears to be scanned / image-only — needs a vision model.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Main entry point: takes raw PDF bytes and returns `PdfContent`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    // --- Phase 1: structural check with lopdf ---
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    // --- Phase 2: attempt full text extraction ---
    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            if meaningful.len() < MIN_TEXT_CHARS {
                info!(
                    chars = meaningful.len(),
                    "Extracted text too short — treating as scanned"
                );
                PdfContent::ScannedImage
            } else {
                info!(chars = meaningful.len(), "Text extracted successfully");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed — may be scanned or corrupted");
            PdfContent::ScannedImage
        }
    }
}

/// Heuristic: inspect the PDF object tree for signs that every page
/// is just a single image with no text operators.
///
/// A page whose `Resources` dictionary holds XObject images but no Font
/// entries is almost certainly a scan. If ≥80% of pages look like that,
/// the whole document is treated as scanned.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false; // Can't tell — let text extraction try
    }

    let mut image_only_pages = 0;

    for (_page_num, object_id) in &pages {
        let Ok(page_obj) = doc.get_object(*object_id) else {
            continue;
        };
        let Ok(page_dict) = page_obj.as_dict() else {
            continue;
        };

        let has_fonts = resource_entry_nonempty(doc, page_dict, b"Font");
        let has_images = resource_entry_nonempty(doc, page_dict, b"XObject");

        if has_images && !has_fonts {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    ratio >= 0.8
}

/// Whether a page's Resources dictionary has a non-empty entry under `key`
/// (e.g. b"Font", b"XObject"), following indirect references.
fn resource_entry_nonempty(doc: &Document, page_dict: &lopdf::Dictionary, key: &[u8]) -> bool {
    page_dict
        .get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(key).ok())
        .and_then(|entry| doc.dereference(entry).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|dict| !dict.is_empty())
}

/// Page count for ingest logging; 0 when the bytes don't parse.
pub fn page_count(pdf_bytes: &[u8]) -> usize {
    Document::load_mem(pdf_bytes)
        .map(|doc| doc.get_pages().len())
        .unwrap_or(0)
}

/// Iterate over unprocessed documents, classify them, and persist results.
pub fn run_text_extraction(db: &DocumentStore) -> Result<(), Box<dyn std::error::Error>> {
    let unprocessed = db.get_unprocessed_documents()?;
    info!(count = unprocessed.len(), "Unprocessed documents to extract");

    for document in &unprocessed {
        let doc_id = document.id.ok_or("document must have an id from DB")?;
        let span = tracing::info_span!("pdf", filename = %document.filename);
        let _guard = span.enter();

        match extract_text_from_pdf(&document.pdf_data) {
            PdfContent::Text(text) => {
                info!(chars = text.len(), "Extracted text from PDF");
                db.set_document_extraction(doc_id, "text", Some(&text))?;
            }
            PdfContent::ScannedImage => {
                info!("PDF is scanned — needs a vision model");
                db.set_document_extraction(doc_id, "scanned", None)?;
            }
            PdfContent::Error(e) => {
                tracing::error!(error = %e, "Failed to process PDF");
                db.set_document_extraction(doc_id, "error", Some(&e))?;
            }
        }
    }

    // Summary
    let text_count = db.get_text_documents()?.len();
    let scanned_count = db.get_scanned_documents()?.len();
    info!(
        text = text_count,
        scanned = scanned_count,
        "Extraction complete — ready for locator / vision model"
    );

    Ok(())
}

/// Run the keyword-proximity locator on all text-classified documents and
/// record the results.
pub fn run_locator(
    db: &DocumentStore,
    keywords: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let text_documents = db.get_text_documents()?;
    info!(
        count = text_documents.len(),
        "Text documents for the proximity locator"
    );

    for document in &text_documents {
        let doc_id = document.id.ok_or("document must have an id from DB")?;
        let span = tracing::info_span!("locator", id = doc_id, filename = %document.filename);
        let _guard = span.enter();

        let Some(ref text) = document.extracted_text else {
            warn!("No extracted text despite content_type = text");
            continue;
        };

        match heuristics::locate_amount(text, keywords) {
            Some(found) => {
                info!(
                    amount = %found.raw,
                    keyword = %found.keyword,
                    distance = found.distance,
                    "Locator result"
                );
                db.record_extraction(&StoredExtraction {
                    id: None,
                    document_id: doc_id,
                    source: "heuristic".to_string(),
                    amount: Some(found.raw.clone()),
                    payload_json: Some(serde_json::to_string(&found)?),
                })?;
            }
            None => {
                info!("No amount near any keyword");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn garbage_bytes_have_no_pages() {
        assert_eq!(page_count(b"this is not a pdf"), 0);
    }
}
