use super::store::{
    cosine_similarity, encode_embedding, parse_embedding, rank, RecordRef, ScoredRecord, VectorStore,
};
use crate::db::Db;
use crate::error::{KbError, Result};
use crate::models::{RecordMetadata, VectorRecord};
use async_trait::async_trait;
use rusqlite::params;
use std::collections::BTreeSet;

/// Vector store over the `vector_records` table.
///
/// Search is a brute-force cosine scan over every stored embedding, which is
/// adequate for a support knowledge base of a few thousand chunks.
#[derive(Clone)]
pub struct SqliteVectorStore {
    db: Db,
}

impl SqliteVectorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn decode_tags(raw: &str) -> BTreeSet<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO vector_records
                            (vector_id, document_id, chunk_index, embedding, text,
                             source_offset, section, filename, tags_json)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                        ON CONFLICT(vector_id) DO UPDATE SET
                            document_id = excluded.document_id,
                            chunk_index = excluded.chunk_index,
                            embedding = excluded.embedding,
                            text = excluded.text,
                            source_offset = excluded.source_offset,
                            section = excluded.section,
                            filename = excluded.filename,
                            tags_json = excluded.tags_json
                        "#,
                    )?;
                    for record in &records {
                        let meta = &record.metadata;
                        let tags_json = serde_json::to_string(&meta.tags)
                            .map_err(|e| KbError::Index(format!("Failed to encode tags: {}", e)))?;
                        stmt.execute(params![
                            record.vector_id,
                            meta.document_id,
                            meta.chunk_index as i64,
                            encode_embedding(&record.embedding),
                            meta.text,
                            meta.source_offset as i64,
                            meta.section,
                            meta.filename,
                            tags_json,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        tag_filter: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        let query_vec = embedding.to_vec();
        let tag = tag_filter.map(String::from);

        let rows = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT seq, vector_id, document_id, chunk_index, embedding, text,
                           source_offset, section, filename, tags_json
                    FROM vector_records
                    WHERE ?1 IS NULL
                       OR EXISTS (SELECT 1 FROM json_each(vector_records.tags_json) WHERE value = ?1)
                    "#,
                )?;
                let mut rows = stmt.query(params![tag])?;
                let mut results = Vec::new();
                while let Some(row) = rows.next()? {
                    let blob: Vec<u8> = row.get(4)?;
                    let Some(stored) = parse_embedding(&blob) else {
                        continue;
                    };
                    if stored.len() != query_vec.len() {
                        continue;
                    }
                    let tags_json: String = row.get(9)?;
                    results.push(ScoredRecord {
                        score: cosine_similarity(&query_vec, &stored),
                        seq: row.get::<_, i64>(0)? as u64,
                        vector_id: row.get(1)?,
                        metadata: RecordMetadata {
                            document_id: row.get(2)?,
                            chunk_index: row.get::<_, i64>(3)? as usize,
                            text: row.get(5)?,
                            source_offset: row.get::<_, i64>(6)? as usize,
                            section: row.get(7)?,
                            filename: row.get(8)?,
                            tags: decode_tags(&tags_json),
                        },
                    });
                }
                Ok(results)
            })
            .await?;

        Ok(rank(rows, top_k))
    }

    async fn records_for_document(&self, document_id: &str) -> Result<Vec<RecordRef>> {
        let document_id = document_id.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT vector_id, chunk_index FROM vector_records
                     WHERE document_id = ?1 ORDER BY chunk_index",
                )?;
                let refs = stmt
                    .query_map(params![document_id], |row| {
                        Ok(RecordRef {
                            vector_id: row.get(0)?,
                            chunk_index: row.get::<_, i64>(1)? as usize,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(refs)
            })
            .await
    }

    async fn delete(&self, vector_ids: &[String]) -> Result<usize> {
        if vector_ids.is_empty() {
            return Ok(0);
        }

        let ids = vector_ids.to_vec();
        self.db
            .with_connection(move |conn| {
                let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let sql = format!("DELETE FROM vector_records WHERE vector_id IN ({})", placeholders);
                let removed = conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
                Ok(removed)
            })
            .await
    }

    async fn count(&self) -> Result<usize> {
        self.db
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM vector_records", [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
    }
}
