// src/document_db.rs

use rusqlite::{Connection, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub struct DocumentStore {
    conn: Connection,
}

#[derive(Debug)]
pub struct StoredDocument {
    pub id: Option<i64>,
    pub uid: String,
    pub filename: String,
    pub pdf_data: Vec<u8>,
    pub is_processed: bool,
    /// Classification after extraction: "text", "scanned", "error", or "unknown"
    pub content_type: Option<String>,
    /// Extracted plain text (populated only when content_type == "text")
    pub extracted_text: Option<String>,
}

/// One extraction result for a document. `source` records which path
/// produced it: "heuristic", "llm", or "discount".
#[derive(Debug)]
pub struct StoredExtraction {
    pub id: Option<i64>,
    pub document_id: i64,
    pub source: String,
    pub amount: Option<String>,
    pub payload_json: Option<String>,
}

impl DocumentStore {
    /// Open (or create) the document store at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        if let Some(dir) = db_path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(dir);
            }
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                pdf_data BLOB NOT NULL,
                is_processed INTEGER NOT NULL DEFAULT 0,
                content_type TEXT NOT NULL DEFAULT 'unknown',
                extracted_text TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS extractions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                source TEXT NOT NULL,
                amount TEXT,
                payload_json TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_is_processed ON documents(is_processed)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_content_type ON documents(content_type)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_extractions_document_id ON extractions(document_id)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Generate a stable unique ID from the filename and PDF bytes.
    pub fn generate_uid(filename: &str, pdf_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update(pdf_data.len().to_le_bytes());
        hasher.update(pdf_data);
        format!("{:x}", hasher.finalize())
    }

    /// Insert a document, or refresh its filename when the same bytes were
    /// ingested before. Returns the document's rowid.
    pub fn upsert_document(&self, doc: &StoredDocument) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO documents (uid, filename, pdf_data, is_processed, content_type, extracted_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(uid) DO UPDATE SET
                filename = excluded.filename",
            params![
                doc.uid,
                doc.filename,
                doc.pdf_data,
                doc.is_processed,
                doc.content_type.as_deref().unwrap_or("unknown"),
                doc.extracted_text,
            ],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM documents WHERE uid = ?1",
            params![doc.uid],
            |row| row.get(0),
        )?;
        info!(document_id = id, filename = %doc.filename, "Document stored");
        Ok(id)
    }

    /// Update a document with extraction results and mark it processed.
    pub fn set_document_extraction(
        &self,
        document_id: i64,
        content_type: &str,
        extracted_text: Option<&str>,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "UPDATE documents
             SET content_type = ?1, extracted_text = ?2, is_processed = 1
             WHERE id = ?3",
            params![content_type, extracted_text, document_id],
        )?;
        info!(
            document_id = document_id,
            content_type = content_type,
            "Document classified and marked processed"
        );
        Ok(())
    }

    /// Record one extraction result. Returns the extraction's rowid.
    pub fn record_extraction(&self, extraction: &StoredExtraction) -> SqliteResult<i64> {
        self.conn.execute(
            "INSERT INTO extractions (document_id, source, amount, payload_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                extraction.document_id,
                extraction.source,
                extraction.amount,
                extraction.payload_json,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            extraction_id = id,
            document_id = extraction.document_id,
            source = %extraction.source,
            amount = ?extraction.amount,
            "Extraction recorded"
        );
        Ok(id)
    }

    /// The most recent extraction for a document, optionally restricted to
    /// one source.
    pub fn latest_extraction(
        &self,
        document_id: i64,
        source: Option<&str>,
    ) -> SqliteResult<Option<StoredExtraction>> {
        match source {
            Some(src) => self.query_latest_extraction(
                "SELECT id, document_id, source, amount, payload_json
                 FROM extractions
                 WHERE document_id = ?1 AND source = ?2
                 ORDER BY id DESC LIMIT 1",
                params![document_id, src],
            ),
            None => self.query_latest_extraction(
                "SELECT id, document_id, source, amount, payload_json
                 FROM extractions
                 WHERE document_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![document_id],
            ),
        }
    }

    fn query_latest_extraction(
        &self,
        sql: &str,
        query_params: &[&dyn rusqlite::ToSql],
    ) -> SqliteResult<Option<StoredExtraction>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(query_params)?;
        match rows.next()? {
            Some(row) => Ok(Some(StoredExtraction {
                id: Some(row.get(0)?),
                document_id: row.get(1)?,
                source: row.get(2)?,
                amount: row.get(3)?,
                payload_json: row.get(4)?,
            })),
            None => Ok(None),
        }
    }

    /// The most recent recorded amount for a document from any source.
    pub fn latest_amount(&self, document_id: i64) -> SqliteResult<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT amount FROM extractions
             WHERE document_id = ?1 AND amount IS NOT NULL
             ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![document_id])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    /// Documents awaiting text extraction.
    pub fn get_unprocessed_documents(&self) -> SqliteResult<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uid, filename, pdf_data, is_processed, content_type, extracted_text
             FROM documents
             WHERE is_processed = 0
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| Self::row_to_document(row))?;
        rows.collect()
    }

    /// Documents with extractable text (locator and text-mode LLM input).
    pub fn get_text_documents(&self) -> SqliteResult<Vec<StoredDocument>> {
        self.get_documents_by_content_type("text")
    }

    /// Documents classified as scanned (image-mode LLM input).
    pub fn get_scanned_documents(&self) -> SqliteResult<Vec<StoredDocument>> {
        self.get_documents_by_content_type("scanned")
    }

    pub fn get_documents_by_content_type(
        &self,
        content_type: &str,
    ) -> SqliteResult<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uid, filename, pdf_data, is_processed, content_type, extracted_text
             FROM documents
             WHERE content_type = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![content_type], |row| Self::row_to_document(row))?;
        rows.collect()
    }

    pub fn get_document_by_id(&self, id: i64) -> SqliteResult<Option<StoredDocument>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uid, filename, pdf_data, is_processed, content_type, extracted_text
             FROM documents
             WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_document(row)?)),
            None => Ok(None),
        }
    }

    /// Helper: map a row with the 7-column document projection to `StoredDocument`.
    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDocument> {
        Ok(StoredDocument {
            id: Some(row.get(0)?),
            uid: row.get(1)?,
            filename: row.get(2)?,
            pdf_data: row.get(3)?,
            is_processed: row.get(4)?,
            content_type: row.get(5)?,
            extracted_text: row.get(6)?,
        })
    }

    /// Counts: (documents, processed documents, extractions)
    pub fn get_counts(&self) -> SqliteResult<(usize, usize, usize)> {
        let total_documents: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let processed_documents: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE is_processed = 1",
            [],
            |row| row.get(0),
        )?;

        let total_extractions: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM extractions", [], |row| row.get(0))?;

        Ok((total_documents, processed_documents, total_extractions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(filename: &str, bytes: &[u8]) -> StoredDocument {
        StoredDocument {
            id: None,
            uid: DocumentStore::generate_uid(filename, bytes),
            filename: filename.to_string(),
            pdf_data: bytes.to_vec(),
            is_processed: false,
            content_type: None,
            extracted_text: None,
        }
    }

    #[test]
    fn test_uid_generation() {
        let uid1 = DocumentStore::generate_uid("a.pdf", b"same bytes");
        let uid2 = DocumentStore::generate_uid("a.pdf", b"same bytes");
        let uid3 = DocumentStore::generate_uid("a.pdf", b"other bytes");

        assert_eq!(uid1, uid2); // Same inputs = same hash
        assert_ne!(uid1, uid3); // Different inputs = different hash
    }

    #[test]
    fn upsert_is_idempotent_per_uid() {
        let db = DocumentStore::open_in_memory().unwrap();
        let first = db.upsert_document(&doc("inv.pdf", b"%PDF-fake")).unwrap();
        let second = db.upsert_document(&doc("inv.pdf", b"%PDF-fake")).unwrap();
        assert_eq!(first, second);

        let (total, _, _) = db.get_counts().unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn classification_moves_document_between_queues() {
        let db = DocumentStore::open_in_memory().unwrap();
        let id = db.upsert_document(&doc("inv.pdf", b"%PDF-fake")).unwrap();
        assert_eq!(db.get_unprocessed_documents().unwrap().len(), 1);

        db.set_document_extraction(id, "text", Some("TOTAL 10.00"))
            .unwrap();

        assert!(db.get_unprocessed_documents().unwrap().is_empty());
        let texts = db.get_text_documents().unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].extracted_text.as_deref(), Some("TOTAL 10.00"));
    }

    #[test]
    fn extraction_round_trip() {
        let db = DocumentStore::open_in_memory().unwrap();
        let id = db.upsert_document(&doc("inv.pdf", b"%PDF-fake")).unwrap();

        db.record_extraction(&StoredExtraction {
            id: None,
            document_id: id,
            source: "heuristic".to_string(),
            amount: Some("42.50".to_string()),
            payload_json: None,
        })
        .unwrap();
        db.record_extraction(&StoredExtraction {
            id: None,
            document_id: id,
            source: "llm".to_string(),
            amount: Some("42.55".to_string()),
            payload_json: Some(r#"{"invoice_amount":"42.55"}"#.to_string()),
        })
        .unwrap();

        let latest = db.latest_extraction(id, None).unwrap().unwrap();
        assert_eq!(latest.source, "llm");
        assert_eq!(db.latest_amount(id).unwrap().as_deref(), Some("42.55"));

        let heuristic = db.latest_extraction(id, Some("heuristic")).unwrap().unwrap();
        assert_eq!(heuristic.amount.as_deref(), Some("42.50"));
    }
}
