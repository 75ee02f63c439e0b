//! Core data types shared by ingestion, indexing, retrieval and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Metadata record of an ingested knowledge document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDocument {
    pub document_id: String,
    pub filename: String,
    pub tags: BTreeSet<String>,
    pub chunks_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_preview: String,
    pub content_hash: String,
}

/// A bounded slice of a document's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    /// 0-based, contiguous within a document
    pub chunk_index: usize,
    pub text: String,
    /// Char offset of `text` inside the raw document
    pub source_offset: usize,
    pub section: Option<String>,
}

impl Chunk {
    /// Length of the chunk text in chars.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Metadata stored next to each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub tags: BTreeSet<String>,
    pub text: String,
    pub source_offset: usize,
    pub section: Option<String>,
    pub filename: String,
}

/// An embedding plus the chunk it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub vector_id: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// Deterministic record id: re-ingesting a chunk index overwrites the same record.
pub fn vector_id(document_id: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation, supplied by the caller per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }
}

/// Trust level assigned by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// May ingest, delete and list knowledge documents
    Operator,
    EndUser,
}

/// An already-verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub trust: TrustLevel,
}

impl Caller {
    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trust: TrustLevel::Operator,
        }
    }

    pub fn end_user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trust: TrustLevel::EndUser,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.trust == TrustLevel::Operator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_is_deterministic() {
        assert_eq!(vector_id("doc-1", 0), vector_id("doc-1", 0));
        assert_ne!(vector_id("doc-1", 0), vector_id("doc-1", 1));
        assert_ne!(vector_id("doc-1", 0), vector_id("doc-2", 0));
        assert_eq!(vector_id("doc-1", 0).len(), 64);
    }

    #[test]
    fn test_vector_id_separator_prevents_collisions() {
        // "doc1" + 11 must not collide with "doc11" + 1
        assert_ne!(vector_id("doc1", 11), vector_id("doc11", 1));
    }

    #[test]
    fn test_conversation_message_deserializes_without_timestamp() {
        let msg: ConversationMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hello"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_caller_trust() {
        assert!(Caller::operator("ops").is_operator());
        assert!(!Caller::end_user("u1").is_operator());
    }
}
