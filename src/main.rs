// src/main.rs

mod config;
mod document_db;
mod heuristics;
mod llm_extract;
mod pdf_extract;
mod reply;
mod session;

use clap::{Parser, Subcommand};
use config::{Config, LlmBackend};
use document_db::{DocumentStore, StoredDocument};
use session::SessionContext;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "invoice_amount", version, about = "Extract invoice totals from PDF documents")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "INVOICE_AMOUNT_CONFIG", default_value = ".config/invoice_amount.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store invoice PDFs in the document database.
    Ingest {
        /// PDF files to ingest.
        files: Vec<PathBuf>,
    },
    /// Classify stored documents, extract text, and run the keyword locator.
    Process,
    /// Extract amounts with the configured model backend.
    Llm {
        /// Restrict to one stored document.
        #[arg(long)]
        id: Option<i64>,
        /// Send a pre-rendered page image (PNG) instead of extracted text.
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Apply a natural-language discount rule to a document's amount.
    Discount {
        #[arg(long)]
        id: i64,
        /// The rule, e.g. "take 10% off totals above 100".
        #[arg(long)]
        rule: String,
    },
    /// Run every phase on one document and print the session snapshot.
    Inspect {
        #[arg(long)]
        id: i64,
    },
    /// Show document and extraction counts.
    Stats,
    /// Store an OpenRouter API key in the config file.
    SetKey { key: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;
    let db = DocumentStore::new(&cfg.db_path)?;

    match cli.command {
        Command::Ingest { files } => ingest(&db, &files)?,
        Command::Process => {
            pdf_extract::run_text_extraction(&db)?;
            pdf_extract::run_locator(&db, &cfg.locator.keywords)?;
        }
        Command::Llm { id, image } => match (id, image) {
            (doc_id, Some(image_path)) => {
                let png_bytes = std::fs::read(&image_path)?;
                let payload =
                    llm_extract::run_image_extraction(&db, &cfg.llm, &png_bytes, doc_id).await?;
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            (Some(doc_id), None) => {
                let payload =
                    llm_extract::run_llm_extraction_for_document(&db, &cfg.llm, doc_id).await?;
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            (None, None) => llm_extract::run_llm_extraction(&db, &cfg.llm).await?,
        },
        Command::Discount { id, rule } => {
            let outcome = llm_extract::run_discount(&db, &cfg.llm, id, &rule).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Inspect { id } => inspect(&db, &cfg, id).await?,
        Command::Stats => {
            let (total_docs, processed_docs, extractions) = db.get_counts()?;
            info!(
                documents_total = total_docs,
                documents_processed = processed_docs,
                extractions = extractions,
                "Database statistics"
            );
            println!("documents: {total_docs} ({processed_docs} processed), extractions: {extractions}");
        }
        Command::SetKey { key } => {
            Config::update_api_key(&cli.config, &key)?;
            info!(path = %cli.config.display(), "API key stored in config");
        }
    }

    Ok(())
}

/// Read PDF files from disk and store them.
fn ingest(db: &DocumentStore, files: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    if files.is_empty() {
        return Err("No files given — pass one or more PDF paths".into());
    }

    for path in files {
        let pdf_data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed.pdf")
            .to_string();

        let uid = DocumentStore::generate_uid(&filename, &pdf_data);
        let pages = pdf_extract::page_count(&pdf_data);

        let id = db.upsert_document(&StoredDocument {
            id: None,
            uid,
            filename: filename.clone(),
            pdf_data,
            is_processed: false,
            content_type: None,
            extracted_text: None,
        })?;

        info!(id = id, filename = %filename, pages = pages, "STORED");
    }

    let (total_docs, processed_docs, extractions) = db.get_counts()?;
    info!(
        documents_total = total_docs,
        documents_processed = processed_docs,
        extractions = extractions,
        "Database statistics"
    );

    Ok(())
}

/// Run every phase on one document through a fresh session context and
/// print the snapshot.
async fn inspect(
    db: &DocumentStore,
    cfg: &Config,
    doc_id: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = db
        .get_document_by_id(doc_id)?
        .ok_or_else(|| format!("No document found with id {doc_id}"))?;

    info!(
        id = doc_id,
        filename = %document.filename,
        content_type = ?document.content_type,
        has_text = document.extracted_text.is_some(),
        pdf_bytes = document.pdf_data.len(),
        "Loaded document from DB"
    );

    let mut session = SessionContext::new();

    // Phase 1: text extraction (re-run even if already done, for inspection)
    let extracted_text = match pdf_extract::extract_text_from_pdf(&document.pdf_data) {
        pdf_extract::PdfContent::Text(text) => {
            info!(chars = text.len(), "Extracted text from PDF");
            println!("\n--- Extracted Text (first 2000 chars) ---");
            println!("{}", text_preview(&text, 2000));
            println!("--- End ---\n");
            Some(text)
        }
        pdf_extract::PdfContent::ScannedImage => {
            session.note("document is scanned — no text phase");
            println!("\n⚠ PDF is scanned/image-only — cannot extract text.\n");
            None
        }
        pdf_extract::PdfContent::Error(e) => {
            session.note(format!("text extraction failed: {e}"));
            tracing::error!(error = %e, "PDF extraction failed");
            None
        }
    };

    if let Some(ref text) = extracted_text {
        // Phase 2: keyword-proximity locator
        println!("--- Locator ---");
        session.amount = heuristics::locate_amount(text, &cfg.locator.keywords);
        match &session.amount {
            Some(found) => println!(
                "{} (keyword {:?} at distance {})",
                found.raw, found.keyword, found.distance
            ),
            None => println!("no amount near any keyword"),
        }
        println!("--- End Locator ---\n");

        // Phase 3: model extraction
        match cfg.llm.backend {
            LlmBackend::Heuristics => {
                session.note("heuristics backend — model phase skipped");
                info!("Backend set to heuristics — skipping model extraction");
            }
            _ => {
                println!("--- Model Extraction ({:?}) ---", cfg.llm.backend);
                match llm_extract::run_llm_extraction_single(text, &cfg.llm).await {
                    Ok(payload) => {
                        println!("{}", serde_json::to_string_pretty(&payload)?);
                        session.payload = Some(payload);
                    }
                    Err(e) => {
                        session.note(format!("model extraction failed: {e}"));
                        warn!(error = %e, "Model extraction failed");
                    }
                }
                println!("--- End Model ---\n");
            }
        }
    }

    println!("--- Session ---");
    println!("{}", serde_json::to_string_pretty(&session)?);
    match session.best_amount() {
        Some(amount) => println!("best amount: {amount}"),
        None => println!("no amount found"),
    }
    println!("--- End Session ---");

    Ok(())
}

/// First `limit` bytes of `text`, clipped to a char boundary.
fn text_preview(text: &str, limit: usize) -> &str {
    let mut end = text.len().min(limit);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
