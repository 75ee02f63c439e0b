//! The knowledge base facade: ingestion, deletion, listing and conversation
//! over explicitly constructed, shared components.

use crate::cache::{keys, CacheAside, CacheBackend, MemoryCacheBackend};
use crate::config::Config;
use crate::db::Db;
use crate::documents::{DocumentStore, SqliteDocumentStore};
use crate::embeddings::{Embedder, GuardedEmbedder, OpenAIEmbedder};
use crate::error::{KbError, Result};
use crate::generation::{Generator, GuardedGenerator, OpenAIChat};
use crate::guard::RateLimiter;
use crate::index::{IndexStats, SqliteVectorStore, VectorIndex, VectorStore};
use crate::ingest::{chunk_document, content_hash, content_preview, extract_tags};
use crate::models::{Caller, ConversationMessage, KnowledgeDocument};
use crate::respond::Responder;
use crate::retrieval::{ContextBundle, Retriever};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// A document to (re)ingest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub document_id: String,
    #[serde(default)]
    pub filename: String,
    pub text: String,
    /// Derived from headings when empty
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Reprocess even when content, tags and filename are unchanged
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_count: usize,
    pub failed_chunks: Vec<usize>,
    /// Content matched the stored version and nothing was rewritten
    pub unchanged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConverseReply {
    pub reply: String,
}

/// External collaborators the knowledge base is assembled from
pub struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub vectors: Arc<dyn VectorStore>,
    /// Raw embedder; rate limiting and retries are added here
    pub embedder: Arc<dyn Embedder>,
    /// Raw generator; rate limiting and the timeout are added here
    pub generator: Arc<dyn Generator>,
    pub cache: Arc<dyn CacheBackend>,
}

pub struct KnowledgeBase {
    config: Config,
    documents: Arc<dyn DocumentStore>,
    index: Arc<VectorIndex>,
    retriever: Retriever,
    responder: Responder,
    limiter: Arc<RateLimiter>,
    cache: CacheAside,
}

impl KnowledgeBase {
    /// Wire the components around `parts` using `config`
    pub fn new(config: Config, parts: Collaborators) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let cache = CacheAside::new(parts.cache);

        let guarded = GuardedEmbedder::from_config(parts.embedder, Arc::clone(&limiter), &config.embeddings);
        let query_embedder: Arc<dyn Embedder> = Arc::new(guarded.for_queries());
        let embedder: Arc<dyn Embedder> = Arc::new(guarded);
        let generator: Arc<dyn Generator> = Arc::new(GuardedGenerator::new(
            parts.generator,
            Arc::clone(&limiter),
            config.generation.model.clone(),
            Duration::from_secs(config.assistant.timeout_secs),
        ));

        let index = Arc::new(VectorIndex::new(
            parts.vectors,
            embedder,
            config.index.clone(),
            config.embeddings.concurrency,
        ));
        let retriever = Retriever::new(
            Arc::clone(&index),
            cache.clone(),
            config.retrieval.clone(),
            Duration::from_secs(config.cache.embedding_ttl_secs),
        )
        .with_query_embedder(query_embedder);
        let responder = Responder::new(generator, config.assistant.clone());

        Self {
            config,
            documents: parts.documents,
            index,
            retriever,
            responder,
            limiter,
            cache,
        }
    }

    /// Production wiring: SQLite stores, OpenAI clients, in-process cache
    pub async fn open(config: Config) -> Result<Self> {
        let db = Db::open(config.db_path()).await?;
        let parts = Collaborators {
            documents: Arc::new(SqliteDocumentStore::new(db.clone())),
            vectors: Arc::new(SqliteVectorStore::new(db)),
            embedder: Arc::new(OpenAIEmbedder::from_config(&config.embeddings)?),
            generator: Arc::new(OpenAIChat::from_config(&config.generation)?),
            cache: Arc::new(MemoryCacheBackend::new(config.cache.capacity)),
        };
        Ok(Self::new(config, parts))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared limiter for handlers that guard themselves
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Shared cache-aside layer
    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    fn require_operator(caller: &Caller, action: &str) -> Result<()> {
        if caller.is_operator() {
            Ok(())
        } else {
            log::warn!("Caller {} denied: {}", caller.id, action);
            Err(KbError::Forbidden(format!("{} requires operator access", action)))
        }
    }

    /// Chunk, embed and index a document, replacing any previous version.
    ///
    /// New records are written before stale ones are pruned, so searches
    /// keep finding the document throughout. Metadata is written last.
    pub async fn ingest_document(&self, caller: &Caller, request: IngestRequest) -> Result<IngestReport> {
        Self::require_operator(caller, "ingesting documents")?;

        let document_id = request.document_id.trim().to_string();
        if document_id.is_empty() {
            return Err(KbError::InvalidInput("documentId must not be empty".to_string()));
        }
        let filename = match request.filename.trim() {
            "" => document_id.clone(),
            name => name.to_string(),
        };

        let chunks = chunk_document(&document_id, &request.text, &self.config.chunking)?;
        let tags = if request.tags.is_empty() {
            extract_tags(&request.text, &self.config.chunking.fallback_keywords)
        } else {
            request.tags
        };
        let hash = content_hash(&request.text);

        let _guard = self.index.lock_document(&document_id).await;
        let existing = self.documents.get(&document_id).await?;

        // A stored count short of the chunk count means chunks failed last
        // time, so the same text must be reprocessed to fill the gaps.
        if let Some(stored) = &existing {
            if !request.force
                && stored.content_hash == hash
                && stored.tags == tags
                && stored.filename == filename
                && stored.chunks_count == chunks.len()
            {
                log::info!("Document {} unchanged, skipping re-ingestion", document_id);
                return Ok(IngestReport {
                    document_id,
                    chunks_count: stored.chunks_count,
                    failed_chunks: Vec::new(),
                    unchanged: true,
                });
            }
        }

        let report = self.index.upsert(&chunks, &tags, &filename).await?;
        if report.inserted == 0 {
            return Err(KbError::Index(format!(
                "All {} chunks of {} failed to embed: {:?}",
                chunks.len(),
                document_id,
                report.failed_chunks
            )));
        }

        let failed: BTreeSet<usize> = report.failed_chunks.iter().copied().collect();
        let keep: BTreeSet<usize> = chunks
            .iter()
            .map(|c| c.chunk_index)
            .filter(|i| !failed.contains(i))
            .collect();
        let pruned = self.index.prune_document(&document_id, &keep).await?;

        let now = Utc::now();
        self.documents
            .put(KnowledgeDocument {
                document_id: document_id.clone(),
                filename,
                tags,
                chunks_count: report.inserted,
                created_at: existing.as_ref().map_or(now, |d| d.created_at),
                updated_at: now,
                content_preview: content_preview(&request.text),
                content_hash: hash,
            })
            .await?;

        self.cache.invalidate(&keys::document_list()).await;
        self.cache.invalidate(&keys::document(&document_id)).await;

        if report.failed_chunks.is_empty() {
            log::info!(
                "Ingested {}: {} chunks ({} stale records pruned)",
                document_id,
                report.inserted,
                pruned
            );
        } else {
            log::warn!(
                "Ingested {} partially: {} chunks written, failed chunks {:?}",
                document_id,
                report.inserted,
                report.failed_chunks
            );
        }

        Ok(IngestReport {
            document_id,
            chunks_count: report.inserted,
            failed_chunks: report.failed_chunks,
            unchanged: false,
        })
    }

    /// Remove a document's vectors, then its metadata.
    ///
    /// If vector deletion fails the metadata stays, so the operator can see
    /// the document and retry. Deleting an unknown id reports zero.
    pub async fn delete_document(&self, caller: &Caller, document_id: &str) -> Result<DeleteReport> {
        Self::require_operator(caller, "deleting documents")?;

        let _guard = self.index.lock_document(document_id).await;
        let deleted_count = self.index.delete_by_document(document_id).await?;
        let removed_metadata = self.documents.delete(document_id).await?;

        self.cache.invalidate(&keys::document_list()).await;
        self.cache.invalidate(&keys::document(document_id)).await;

        if deleted_count > 0 || removed_metadata {
            log::info!("Deleted {} ({} records)", document_id, deleted_count);
        }
        Ok(DeleteReport { deleted_count })
    }

    /// All documents, most recent first (cached)
    pub async fn list_documents(&self, caller: &Caller) -> Result<Vec<KnowledgeDocument>> {
        Self::require_operator(caller, "listing documents")?;

        let ttl = Duration::from_secs(self.config.cache.document_list_ttl_secs);
        let documents = Arc::clone(&self.documents);
        self.cache
            .get_or_compute(&keys::document_list(), ttl, || async move { documents.list().await })
            .await
    }

    /// One document's metadata (cached)
    pub async fn get_document(&self, caller: &Caller, document_id: &str) -> Result<Option<KnowledgeDocument>> {
        Self::require_operator(caller, "reading documents")?;

        let ttl = Duration::from_secs(self.config.cache.document_list_ttl_secs);
        let documents = Arc::clone(&self.documents);
        self.cache
            .get_or_compute(&keys::document(document_id), ttl, || async move {
                documents.get(document_id).await
            })
            .await
    }

    /// Context retrieval without generation
    pub async fn search(&self, query: &str, tag: Option<&str>) -> ContextBundle {
        self.retriever
            .retrieve_filtered(query, &[], self.config.retrieval.max_context_chars, tag)
            .await
    }

    /// Answer a support question. Never fails; problems degrade to less
    /// context or the fallback reply.
    pub async fn converse(&self, message: &str, history: &[ConversationMessage]) -> ConverseReply {
        let message = message.trim();
        if message.is_empty() {
            return ConverseReply {
                reply: self.responder.fallback_reply().to_string(),
            };
        }

        let context = self
            .retriever
            .retrieve(message, history, self.config.retrieval.max_context_chars)
            .await;
        let reply = self.responder.respond(message, history, &context).await;
        ConverseReply { reply }
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.index.stats().await
    }
}
