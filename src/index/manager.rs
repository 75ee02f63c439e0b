use super::single_flight::{DocumentGuard, DocumentLocks};
use super::store::{ScoredRecord, VectorStore};
use crate::config::IndexConfig;
use crate::embeddings::{embed_one, Embedder};
use crate::error::{KbError, Result};
use crate::models::{vector_id, Chunk, RecordMetadata, VectorRecord};
use crate::retry::{with_timeout, Backoff};
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of writing one document's chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertReport {
    /// Records written
    pub inserted: usize,
    /// Chunk indices whose embedding failed after retries
    pub failed_chunks: Vec<usize>,
}

/// Index-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub total_records: usize,
}

/// Writes, deletes and searches document chunks in a [`VectorStore`].
///
/// Every store call runs under the configured timeout; writes and deletes
/// are retried in batches with exponential backoff.
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: IndexConfig,
    backoff: Backoff,
    embed_concurrency: usize,
    locks: DocumentLocks,
}

impl VectorIndex {
    /// # Arguments
    ///
    /// * `store` - Storage engine
    /// * `embedder` - Embedder used for chunks; pass a rate-limited one
    /// * `config` - Batch sizes, retry and timeout settings
    /// * `embed_concurrency` - Chunks embedded in parallel
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: IndexConfig,
        embed_concurrency: usize,
    ) -> Self {
        let backoff = Backoff::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        );
        Self {
            store,
            embedder,
            config,
            backoff,
            embed_concurrency: embed_concurrency.max(1),
            locks: DocumentLocks::new(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Serialize mutations of one document; hold the guard for the whole operation
    pub async fn lock_document(&self, document_id: &str) -> DocumentGuard {
        self.locks.lock(document_id).await
    }

    /// Run one store call under the index timeout; elapsing is a retryable index error
    async fn call<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = Duration::from_secs(self.config.timeout_secs);
        with_timeout(limit, what, fut).await.map_err(|e| match e {
            KbError::Timeout(msg) => KbError::Index(msg),
            other => other,
        })
    }

    /// Embed and write `chunks` (all of one document)
    ///
    /// Chunks that fail to embed are skipped and reported; a write batch
    /// that still fails after retries fails the whole call.
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        tags: &BTreeSet<String>,
        filename: &str,
    ) -> Result<UpsertReport> {
        // `buffered` yields in input order
        let embedder = self.embedder.as_ref();
        let pending: Vec<_> = chunks
            .iter()
            .map(|chunk| embed_one(embedder, &chunk.text))
            .collect();
        let embedded: Vec<Result<Vec<f32>>> = stream::iter(pending)
            .buffered(self.embed_concurrency)
            .collect()
            .await;

        let mut records = Vec::with_capacity(chunks.len());
        let mut failed_chunks = Vec::new();
        for (chunk, embedding) in chunks.iter().zip(embedded) {
            match embedding {
                Ok(embedding) => records.push(VectorRecord {
                    vector_id: vector_id(&chunk.document_id, chunk.chunk_index),
                    embedding,
                    metadata: RecordMetadata {
                        document_id: chunk.document_id.clone(),
                        chunk_index: chunk.chunk_index,
                        tags: tags.clone(),
                        text: chunk.text.clone(),
                        source_offset: chunk.source_offset,
                        section: chunk.section.clone(),
                        filename: filename.to_string(),
                    },
                }),
                Err(e) => {
                    log::warn!(
                        "Embedding failed for {} chunk {}: {}",
                        chunk.document_id,
                        chunk.chunk_index,
                        e
                    );
                    failed_chunks.push(chunk.chunk_index);
                }
            }
        }

        let mut inserted = 0;
        for batch in records.chunks(self.config.upsert_batch_size) {
            self.backoff
                .run("vector upsert", || self.call("vector upsert", self.store.upsert(batch.to_vec())))
                .await
                .map_err(|e| KbError::Index(format!("Upsert batch failed after retries: {}", e)))?;
            inserted += batch.len();
        }

        log::debug!(
            "Upserted {} records ({} chunks failed to embed)",
            inserted,
            failed_chunks.len()
        );
        Ok(UpsertReport {
            inserted,
            failed_chunks,
        })
    }

    /// Delete every record of a document. Absent document deletes nothing.
    ///
    /// A failed run may leave part of the records behind; running it again
    /// removes the rest.
    pub async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        self.delete_where(document_id, |_| true).await
    }

    /// Delete the document's records whose chunk index is not in `keep`
    pub async fn prune_document(&self, document_id: &str, keep: &BTreeSet<usize>) -> Result<usize> {
        self.delete_where(document_id, |index| !keep.contains(&index)).await
    }

    async fn delete_where(&self, document_id: &str, select: impl Fn(usize) -> bool) -> Result<usize> {
        let refs = self
            .backoff
            .run("vector listing", || {
                self.call("vector listing", self.store.records_for_document(document_id))
            })
            .await
            .map_err(|e| KbError::Index(format!("Listing records of {} failed: {}", document_id, e)))?;

        let ids: Vec<String> = refs
            .into_iter()
            .filter(|r| select(r.chunk_index))
            .map(|r| r.vector_id)
            .collect();

        let mut deleted = 0;
        for batch in ids.chunks(self.config.delete_batch_size) {
            deleted += self
                .backoff
                .run("vector delete", || self.call("vector delete", self.store.delete(batch)))
                .await
                .map_err(|e| KbError::Index(format!("Delete batch failed after retries: {}", e)))?;
        }

        if deleted > 0 {
            log::debug!("Deleted {} records of {}", deleted, document_id);
        }
        Ok(deleted)
    }

    /// Nearest records to `embedding`
    ///
    /// # Returns
    ///
    /// At most `top_k` hits by descending similarity; ties go to the lower
    /// chunk index, then to the earlier insertion
    pub async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        tag_filter: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.call("vector query", self.store.query(embedding, top_k, tag_filter))
            .await
    }

    pub async fn count_for_document(&self, document_id: &str) -> Result<usize> {
        let refs = self
            .call("vector listing", self.store.records_for_document(document_id))
            .await?;
        Ok(refs.len())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let total_records = self.call("vector count", self.store.count()).await?;
        Ok(IndexStats { total_records })
    }
}
