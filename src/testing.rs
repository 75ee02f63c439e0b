//! Deterministic in-process collaborators for tests.
//!
//! `FakeEmbedder` hashes words into a fixed number of buckets, so texts that
//! share vocabulary score close under cosine similarity.

use crate::embeddings::Embedder;
use crate::error::{KbError, Result};
use crate::generation::{Generator, PromptMessage};
use crate::index::{MemoryVectorStore, RecordRef, ScoredRecord, VectorStore};
use crate::models::VectorRecord;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct FakeEmbedder {
    dimensions: usize,
    calls: AtomicUsize,
    fail_next: AtomicUsize,
    fail_containing: Mutex<Option<String>>,
    delay: Option<Duration>,
}

impl FakeEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            fail_containing: Mutex::new(None),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` calls with a retryable error
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call whose input contains `needle`; `None` clears it
    pub fn fail_texts_containing(&self, needle: Option<&str>) {
        *self.fail_containing.lock().unwrap_or_else(|e| e.into_inner()) = needle.map(str::to_string);
    }

    /// Number of `embed` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector `embed` returns for `text`
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
            ]) as usize
                % self.dimensions;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(KbError::Embedding("injected failure".to_string()));
        }

        let needle = self.fail_containing.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(needle) = needle {
            if texts.iter().any(|t| t.contains(&needle)) {
                return Err(KbError::Embedding(format!("injected failure for '{}'", needle)));
            }
        }

        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        "fake-embedding"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Generator with a scripted reply (or scripted failure) that records prompts
pub struct FakeGenerator {
    reply: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl FakeGenerator {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt received so far
    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply
            .clone()
            .ok_or_else(|| KbError::Generation("model unavailable".to_string()))
    }
}

/// Memory vector store with switchable failures
#[derive(Default)]
pub struct FlakyVectorStore {
    inner: MemoryVectorStore,
    fail_next_deletes: AtomicUsize,
    deletes_allowed: Mutex<Option<usize>>,
    fail_upserts: AtomicBool,
    fail_queries: AtomicBool,
}

impl FlakyVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` delete calls
    pub fn fail_next_deletes(&self, n: usize) {
        self.fail_next_deletes.store(n, Ordering::SeqCst);
    }

    /// Let `n` more delete calls through, then fail every one
    pub fn fail_deletes_after(&self, n: usize) {
        *self.deletes_allowed.lock().unwrap_or_else(|e| e.into_inner()) = Some(n);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Clear every injected failure
    pub fn heal(&self) {
        self.fail_next_deletes.store(0, Ordering::SeqCst);
        *self.deletes_allowed.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.fail_upserts.store(false, Ordering::SeqCst);
        self.fail_queries.store(false, Ordering::SeqCst);
    }

    fn delete_should_fail(&self) -> bool {
        let pending = self.fail_next_deletes.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next_deletes.store(pending - 1, Ordering::SeqCst);
            return true;
        }
        let mut allowed = self.deletes_allowed.lock().unwrap_or_else(|e| e.into_inner());
        match allowed.as_mut() {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(KbError::Index("injected upsert failure".to_string()));
        }
        self.inner.upsert(records).await
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        tag_filter: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(KbError::Index("injected query failure".to_string()));
        }
        self.inner.query(embedding, top_k, tag_filter).await
    }

    async fn records_for_document(&self, document_id: &str) -> Result<Vec<RecordRef>> {
        self.inner.records_for_document(document_id).await
    }

    async fn delete(&self, vector_ids: &[String]) -> Result<usize> {
        if self.delete_should_fail() {
            return Err(KbError::Index("injected delete failure".to_string()));
        }
        self.inner.delete(vector_ids).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}
