use crate::error::Result;
use crate::models::{RecordMetadata, VectorRecord};
use async_trait::async_trait;
use std::cmp::Ordering;

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub vector_id: String,
    /// Cosine similarity to the query
    pub score: f32,
    /// Insertion sequence; an in-place overwrite keeps the original value
    pub seq: u64,
    pub metadata: RecordMetadata,
}

/// Id and chunk index of one stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub vector_id: String,
    pub chunk_index: usize,
}

/// Storage engine behind the vector index
///
/// Calls are individually atomic; nothing spans more than one call.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite records by `vector_id`
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Up to `top_k` records by descending similarity, optionally restricted to a tag
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        tag_filter: Option<&str>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Every record of a document, ordered by chunk index
    async fn records_for_document(&self, document_id: &str) -> Result<Vec<RecordRef>>;

    /// Delete by id; unknown ids are ignored. Returns the number removed.
    async fn delete(&self, vector_ids: &[String]) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

/// Compute cosine similarity between two vectors
///
/// # Returns
///
/// Similarity in [-1.0, 1.0]; 0.0 if either vector has zero magnitude or
/// the lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Sort hits by descending score, then lower chunk index, then earlier insertion; keep `top_k`
pub fn rank(mut hits: Vec<ScoredRecord>, top_k: usize) -> Vec<ScoredRecord> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.metadata.chunk_index.cmp(&b.metadata.chunk_index))
            .then_with(|| a.seq.cmp(&b.seq))
    });
    hits.truncate(top_k);
    hits
}

/// Encode an embedding as a little-endian f32 BLOB
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Parse a little-endian f32 BLOB; `None` if the length is not a multiple of 4
pub fn parse_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }

    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}
