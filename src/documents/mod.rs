//! Metadata store for ingested knowledge documents.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use crate::error::Result;
use crate::models::KnowledgeDocument;
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Option<KnowledgeDocument>>;

    /// Insert or replace by `document_id`
    async fn put(&self, document: KnowledgeDocument) -> Result<()>;

    /// Returns whether a record was removed
    async fn delete(&self, document_id: &str) -> Result<bool>;

    /// All documents, newest `created_at` first
    async fn list(&self) -> Result<Vec<KnowledgeDocument>>;
}
