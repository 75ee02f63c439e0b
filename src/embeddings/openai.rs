use super::Embedder;
use crate::config::EmbeddingsConfig;
use crate::error::{KbError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// OpenAI accepts at most this many inputs per request
const MAX_BATCH_SIZE: usize = 2048;

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in API response
#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
///
/// Splits large inputs into API-sized batches. Retry, rate limiting and
/// timeouts are applied by [`super::GuardedEmbedder`], not here.
pub struct OpenAIEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "text-embedding-3-small")
    /// * `dimensions` - Length of the returned vectors
    /// * `batch_size` - Maximum number of texts to send per API request (max 2048)
    pub fn new(api_key: String, model: String, dimensions: usize, batch_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KbError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            dimensions,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        })
    }

    /// Create an embedder from the `[embeddings]` section, reading the key from the environment
    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            KbError::Config(format!("Environment variable {} not set", config.api_key_env))
        })?;
        Self::new(api_key, config.model.clone(), config.dimensions, config.batch_size)
    }

    /// Make a single API request
    async fn embed_batch_internal(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| KbError::Embedding(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(classify_status(status, retry_after, body));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KbError::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(KbError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        result.data.sort_by_key(|d| d.index);
        log::debug!("Embedding API call for {} texts took {:?}", texts.len(), start.elapsed());
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Map an unsuccessful status to an error that carries its retryability
fn classify_status(status: StatusCode, retry_after: Option<u64>, body: String) -> KbError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => KbError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1).max(1),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            KbError::Config(format!("OpenAI rejected the API key ({}): {}", status, body))
        }
        s if s.is_server_error() => KbError::Embedding(format!("OpenAI API error {}: {}", status, body)),
        _ => KbError::InvalidInput(format!("OpenAI API error {}: {}", status, body)),
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all_embeddings.extend(self.embed_batch_internal(batch).await?);
        }
        Ok(all_embeddings)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
