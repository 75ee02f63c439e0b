//! Query-time retrieval: embed the question, search the index, and pack the
//! best passages into a character budget.

use crate::cache::{keys, CacheAside};
use crate::config::RetrievalConfig;
use crate::embeddings::{embed_one, Embedder};
use crate::error::Result;
use crate::index::{ScoredRecord, VectorIndex};
use crate::models::{ConversationMessage, Role};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Contiguous text from one document, built from one or more chunks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Passage {
    pub document_id: String,
    pub filename: String,
    pub section: Option<String>,
    pub chunk_indices: Vec<usize>,
    pub text: String,
    /// Best similarity among the merged chunks
    pub score: f32,
}

/// Ordered passages handed to the response assembler
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    pub passages: Vec<Passage>,
}

impl ContextBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Total passage text length in chars
    pub fn total_chars(&self) -> usize {
        self.passages.iter().map(|p| p.text.chars().count()).sum()
    }
}

pub struct Retriever {
    index: Arc<VectorIndex>,
    /// Embeds questions; defaults to the index's embedder
    query_embedder: Arc<dyn Embedder>,
    cache: CacheAside,
    config: RetrievalConfig,
    embedding_ttl: Duration,
}

impl Retriever {
    pub fn new(
        index: Arc<VectorIndex>,
        cache: CacheAside,
        config: RetrievalConfig,
        embedding_ttl: Duration,
    ) -> Self {
        Self {
            query_embedder: Arc::clone(index.embedder()),
            index,
            cache,
            config,
            embedding_ttl,
        }
    }

    /// Embed questions with `embedder` instead of the index's embedder
    pub fn with_query_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.query_embedder = embedder;
        self
    }

    /// Retrieve context for `query`, never exceeding `max_context_chars`.
    ///
    /// Failures are logged and yield an empty bundle.
    pub async fn retrieve(
        &self,
        query: &str,
        history: &[ConversationMessage],
        max_context_chars: usize,
    ) -> ContextBundle {
        self.retrieve_filtered(query, history, max_context_chars, None).await
    }

    /// [`Self::retrieve`] restricted to records carrying `tag`
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        history: &[ConversationMessage],
        max_context_chars: usize,
        tag: Option<&str>,
    ) -> ContextBundle {
        match self.try_retrieve(query, history, max_context_chars, tag).await {
            Ok(bundle) => bundle,
            Err(e) => {
                log::warn!("Retrieval failed, continuing without context: {}", e);
                ContextBundle::empty()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        history: &[ConversationMessage],
        budget: usize,
        tag: Option<&str>,
    ) -> Result<ContextBundle> {
        let text = self.query_text(query, history);
        if text.trim().is_empty() || budget == 0 {
            return Ok(ContextBundle::empty());
        }

        let embedder = Arc::clone(&self.query_embedder);
        let key = keys::embedding(embedder.model(), &text);
        let embedding: Vec<f32> = self
            .cache
            .get_or_compute(&key, self.embedding_ttl, || async {
                embed_one(embedder.as_ref(), &text).await
            })
            .await?;

        let hits: Vec<ScoredRecord> = self
            .index
            .search(&embedding, self.config.top_k, tag)
            .await?
            .into_iter()
            .filter(|hit| hit.score >= self.config.min_score)
            .collect();

        let selected = select_within_budget(hits, budget);
        let bundle = ContextBundle {
            passages: merge_adjacent(selected),
        };
        log::debug!(
            "Retrieved {} passages ({} chars) for query",
            bundle.passages.len(),
            bundle.total_chars()
        );
        Ok(bundle)
    }

    /// The query, preceded by the last `history_turns` user messages
    fn query_text(&self, query: &str, history: &[ConversationMessage]) -> String {
        if self.config.history_turns == 0 {
            return query.to_string();
        }
        let mut earlier: Vec<&str> = history
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .take(self.config.history_turns)
            .map(|m| m.content.as_str())
            .collect();
        earlier.reverse();
        earlier.push(query);
        earlier.join("\n")
    }
}

/// Walk hits in rank order, stopping at the first one that does not fit
fn select_within_budget(hits: Vec<ScoredRecord>, budget: usize) -> Vec<ScoredRecord> {
    let mut used = 0;
    let mut selected = Vec::new();
    for hit in hits {
        let len = hit.metadata.text.chars().count();
        if used + len > budget {
            break;
        }
        used += len;
        selected.push(hit);
    }
    selected
}

/// Merge chunks of one document whose indices are consecutive and whose
/// source spans overlap or touch; order passages by best score.
fn merge_adjacent(selected: Vec<ScoredRecord>) -> Vec<Passage> {
    let mut by_document: BTreeMap<String, Vec<ScoredRecord>> = BTreeMap::new();
    for hit in selected {
        by_document
            .entry(hit.metadata.document_id.clone())
            .or_default()
            .push(hit);
    }

    let mut passages = Vec::new();
    for (_, mut hits) in by_document {
        hits.sort_by_key(|h| h.metadata.chunk_index);

        // (passage, char offset just past its text in the source document)
        let mut current: Option<(Passage, usize)> = None;
        for hit in hits {
            let meta = hit.metadata;
            let start = meta.source_offset;
            let len = meta.text.chars().count();

            if let Some((passage, end)) = current.as_mut() {
                let contiguous = passage
                    .chunk_indices
                    .last()
                    .map_or(false, |&last| last + 1 == meta.chunk_index)
                    && start <= *end;
                if contiguous {
                    let skip = *end - start;
                    passage.text.extend(meta.text.chars().skip(skip));
                    passage.chunk_indices.push(meta.chunk_index);
                    passage.score = passage.score.max(hit.score);
                    *end = (*end).max(start + len);
                    continue;
                }
            }

            if let Some((done, _)) = current.take() {
                passages.push(done);
            }
            current = Some((
                Passage {
                    document_id: meta.document_id,
                    filename: meta.filename,
                    section: meta.section,
                    chunk_indices: vec![meta.chunk_index],
                    text: meta.text,
                    score: hit.score,
                },
                start + len,
            ));
        }
        if let Some((done, _)) = current {
            passages.push(done);
        }
    }

    passages.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_indices.cmp(&b.chunk_indices))
    });
    passages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::config::IndexConfig;
    use crate::index::MemoryVectorStore;
    use crate::models::{Chunk, RecordMetadata};
    use crate::testing::{FakeEmbedder, FlakyVectorStore};
    use std::collections::BTreeSet;

    fn hit(document_id: &str, chunk_index: usize, offset: usize, text: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            vector_id: format!("{}:{}", document_id, chunk_index),
            score,
            seq: chunk_index as u64,
            metadata: RecordMetadata {
                document_id: document_id.to_string(),
                chunk_index,
                tags: BTreeSet::new(),
                text: text.to_string(),
                source_offset: offset,
                section: None,
                filename: format!("{}.md", document_id),
            },
        }
    }

    #[test]
    fn test_budget_stops_at_first_misfit() {
        let hits = vec![
            hit("a", 0, 0, &"x".repeat(300), 0.9),
            hit("b", 0, 0, &"y".repeat(250), 0.8),
            hit("c", 0, 0, &"z".repeat(100), 0.7),
        ];
        let selected = select_within_budget(hits, 500);
        // "c" would fit but selection stops at "b"
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].metadata.document_id, "a");
    }

    #[test]
    fn test_adjacent_chunks_merge_without_duplicate_overlap() {
        // Source "0123456789ABCDEF": chunk 0 = [0,10), chunk 1 = [8,16)
        let merged = merge_adjacent(vec![
            hit("doc", 1, 8, "89ABCDEF", 0.6),
            hit("doc", 0, 0, "0123456789", 0.9),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "0123456789ABCDEF");
        assert_eq!(merged[0].chunk_indices, vec![0, 1]);
        assert!((merged[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_non_adjacent_chunks_stay_separate() {
        let merged = merge_adjacent(vec![
            hit("doc", 0, 0, "first", 0.5),
            hit("doc", 2, 40, "third", 0.8),
            hit("other", 0, 0, "else", 0.7),
        ]);
        assert_eq!(merged.len(), 3);
        let order: Vec<(&str, f32)> = merged.iter().map(|p| (p.text.as_str(), p.score)).collect();
        assert_eq!(order, vec![("third", 0.8), ("else", 0.7), ("first", 0.5)]);
    }

    #[test]
    fn test_consecutive_chunks_across_a_gap_stay_separate() {
        let merged = merge_adjacent(vec![
            hit("doc", 0, 0, "Billing body", 0.5),
            hit("doc", 1, 30, "Calendar body", 0.4),
        ]);
        assert_eq!(merged.len(), 2);
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            top_k: 8,
            max_context_chars: 500,
            min_score: 0.0,
            history_turns: 0,
        }
    }

    fn index_config() -> IndexConfig {
        IndexConfig {
            max_retries: 0,
            base_delay_ms: 1,
            max_delay_ms: 1,
            ..IndexConfig::default()
        }
    }

    fn chunk(document_id: &str, chunk_index: usize, text: &str) -> Chunk {
        Chunk {
            document_id: document_id.to_string(),
            chunk_index,
            text: text.to_string(),
            source_offset: chunk_index * 1000,
            section: Some("Guide".to_string()),
        }
    }

    async fn seeded(store: Arc<dyn crate::index::VectorStore>, embedder: Arc<FakeEmbedder>) -> Retriever {
        let index = Arc::new(VectorIndex::new(store, embedder, index_config(), 2));
        let texts = [
            "To export contacts open the contacts list and press export.",
            "Invite a colleague from the team settings page.",
            "Calendar sync runs every hour for connected accounts.",
        ];
        for (i, text) in texts.iter().enumerate() {
            let doc = format!("doc-{}", i);
            index
                .upsert(&[chunk(&doc, 0, text)], &BTreeSet::new(), &format!("{}.md", doc))
                .await
                .unwrap();
        }
        let cache = CacheAside::new(Arc::new(MemoryCacheBackend::new(32)));
        Retriever::new(index, cache, config(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_passage_first() {
        let embedder = Arc::new(FakeEmbedder::new(256));
        let retriever = seeded(Arc::new(MemoryVectorStore::new()), embedder).await;

        let bundle = retriever.retrieve("how do I export contacts", &[], 500).await;
        assert!(!bundle.is_empty());
        assert_eq!(bundle.passages[0].document_id, "doc-0");
        assert!(bundle.total_chars() <= 500);
    }

    #[tokio::test]
    async fn test_budget_respected_end_to_end() {
        let embedder = Arc::new(FakeEmbedder::new(64));
        let retriever = seeded(Arc::new(MemoryVectorStore::new()), embedder).await;

        for budget in [0, 10, 60, 110, 500] {
            let bundle = retriever.retrieve("export contacts calendar team", &[], budget).await;
            assert!(bundle.total_chars() <= budget);
        }
    }

    #[tokio::test]
    async fn test_query_embedding_is_cached() {
        let embedder = Arc::new(FakeEmbedder::new(64));
        let retriever = seeded(Arc::new(MemoryVectorStore::new()), embedder.clone()).await;
        let before = embedder.calls();

        retriever.retrieve("calendar sync", &[], 500).await;
        retriever.retrieve("calendar sync", &[], 500).await;
        assert_eq!(embedder.calls(), before + 1);
    }

    #[tokio::test]
    async fn test_search_failure_yields_empty_bundle() {
        let store = Arc::new(FlakyVectorStore::new());
        let retriever = seeded(store.clone(), Arc::new(FakeEmbedder::new(64))).await;
        store.fail_queries(true);

        let bundle = retriever.retrieve("export contacts", &[], 500).await;
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_yields_empty_bundle() {
        let embedder = Arc::new(FakeEmbedder::new(64));
        let retriever = seeded(Arc::new(MemoryVectorStore::new()), embedder.clone()).await;
        embedder.fail_next(1);

        assert!(retriever.retrieve("anything at all", &[], 500).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_turns_fold_into_query() {
        let embedder = Arc::new(FakeEmbedder::new(64));
        let mut retriever = seeded(Arc::new(MemoryVectorStore::new()), embedder).await;
        retriever.config.history_turns = 1;

        let history = vec![
            ConversationMessage::user("I use the calendar"),
            ConversationMessage::assistant("Great"),
        ];
        assert_eq!(retriever.query_text("why is it late?", &history), "I use the calendar\nwhy is it late?");
    }
}
