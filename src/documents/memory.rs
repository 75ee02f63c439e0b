use super::DocumentStore;
use crate::error::Result;
use crate::models::KnowledgeDocument;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, KnowledgeDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Option<KnowledgeDocument>> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(document_id).cloned())
    }

    async fn put(&self, document: KnowledgeDocument) -> Result<()> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.insert(document.document_id.clone(), document);
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<bool> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        Ok(documents.remove(document_id).is_some())
    }

    async fn list(&self) -> Result<Vec<KnowledgeDocument>> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<KnowledgeDocument> = documents.values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        Ok(all)
    }
}
