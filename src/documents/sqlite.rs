use super::DocumentStore;
use crate::db::Db;
use crate::error::{KbError, Result};
use crate::models::KnowledgeDocument;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};

/// Document metadata in the `knowledge_documents` table
#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Db,
}

impl SqliteDocumentStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

/// RFC 3339 with fixed precision so text order matches time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<KnowledgeDocument> {
    let tags_json: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(KnowledgeDocument {
        document_id: row.get(0)?,
        filename: row.get(1)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        chunks_count: row.get::<_, i64>(3)? as usize,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        content_preview: row.get(6)?,
        content_hash: row.get(7)?,
    })
}

const SELECT_COLUMNS: &str = "SELECT document_id, filename, tags_json, chunks_count, created_at, \
                              updated_at, content_preview, content_hash FROM knowledge_documents";

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Option<KnowledgeDocument>> {
        let document_id = document_id.to_string();
        self.db
            .with_connection(move |conn| {
                let sql = format!("{} WHERE document_id = ?1", SELECT_COLUMNS);
                let document = conn
                    .query_row(&sql, params![document_id], row_to_document)
                    .optional()?;
                Ok(document)
            })
            .await
    }

    async fn put(&self, document: KnowledgeDocument) -> Result<()> {
        let tags_json = serde_json::to_string(&document.tags)
            .map_err(|e| KbError::InvalidInput(format!("Failed to encode tags: {}", e)))?;

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO knowledge_documents
                        (document_id, filename, tags_json, chunks_count, created_at,
                         updated_at, content_preview, content_hash)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(document_id) DO UPDATE SET
                        filename = excluded.filename,
                        tags_json = excluded.tags_json,
                        chunks_count = excluded.chunks_count,
                        created_at = excluded.created_at,
                        updated_at = excluded.updated_at,
                        content_preview = excluded.content_preview,
                        content_hash = excluded.content_hash
                    "#,
                    params![
                        document.document_id,
                        document.filename,
                        tags_json,
                        document.chunks_count as i64,
                        format_timestamp(&document.created_at),
                        format_timestamp(&document.updated_at),
                        document.content_preview,
                        document.content_hash,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, document_id: &str) -> Result<bool> {
        let document_id = document_id.to_string();
        self.db
            .with_connection(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM knowledge_documents WHERE document_id = ?1",
                    params![document_id],
                )?;
                Ok(removed > 0)
            })
            .await
    }

    async fn list(&self) -> Result<Vec<KnowledgeDocument>> {
        self.db
            .with_connection(|conn| {
                let sql = format!("{} ORDER BY created_at DESC, document_id ASC", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let documents = stmt
                    .query_map([], row_to_document)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(documents)
            })
            .await
    }
}
