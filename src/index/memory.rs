use super::store::{cosine_similarity, rank, RecordRef, ScoredRecord, VectorStore};
use crate::error::Result;
use crate::models::VectorRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, (u64, VectorRecord)>,
    next_seq: u64,
}

/// In-process vector store
#[derive(Default)]
pub struct MemoryVectorStore {
    state: RwLock<MemoryState>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut state = self.write();
        for record in records {
            let seq = match state.records.get(&record.vector_id) {
                Some((seq, _)) => *seq,
                None => {
                    state.next_seq += 1;
                    state.next_seq
                }
            };
            state.records.insert(record.vector_id.clone(), (seq, record));
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        tag_filter: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        let state = self.read();
        let hits = state
            .records
            .values()
            .filter(|(_, r)| r.embedding.len() == embedding.len())
            .filter(|(_, r)| tag_filter.map_or(true, |tag| r.metadata.tags.contains(tag)))
            .map(|(seq, r)| ScoredRecord {
                vector_id: r.vector_id.clone(),
                score: cosine_similarity(embedding, &r.embedding),
                seq: *seq,
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn records_for_document(&self, document_id: &str) -> Result<Vec<RecordRef>> {
        let state = self.read();
        let mut refs: Vec<RecordRef> = state
            .records
            .values()
            .filter(|(_, r)| r.metadata.document_id == document_id)
            .map(|(_, r)| RecordRef {
                vector_id: r.vector_id.clone(),
                chunk_index: r.metadata.chunk_index,
            })
            .collect();
        refs.sort_by_key(|r| r.chunk_index);
        Ok(refs)
    }

    async fn delete(&self, vector_ids: &[String]) -> Result<usize> {
        let mut state = self.write();
        Ok(vector_ids
            .iter()
            .filter(|id| state.records.remove(id.as_str()).is_some())
            .count())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read().records.len())
    }
}
