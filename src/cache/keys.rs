//! Namespaced cache key constructors.
//!
//! Every key the core reads or invalidates is built here so writers and
//! readers cannot drift apart.

use sha2::{Digest, Sha256};

pub const DOCUMENTS_PREFIX: &str = "documents:";
pub const EMBEDDING_PREFIX: &str = "embedding:";

/// The full document listing
pub fn document_list() -> String {
    format!("{}list", DOCUMENTS_PREFIX)
}

/// One document's metadata record
pub fn document(document_id: &str) -> String {
    format!("{}item:{}", DOCUMENTS_PREFIX, document_id)
}

/// Embedding of `text` under `model`
pub fn embedding(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{}{:x}", EMBEDDING_PREFIX, hasher.finalize())
}
