pub mod guarded;
pub mod openai;

pub use guarded::GuardedEmbedder;
pub use openai::OpenAIEmbedder;

use crate::error::Result;
use async_trait::async_trait;

/// Text-to-vector capability
///
/// Implementations return exactly one embedding per input text, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier, part of embedding cache keys
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;
}

/// Embed a single text
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut embeddings = embedder.embed(&[text.to_string()]).await?;
    embeddings
        .pop()
        .ok_or_else(|| crate::error::KbError::Embedding("Empty response from embedder".to_string()))
}
