//! Document validation, section-aware chunking and tag derivation.

pub mod chunker;
pub mod sections;
pub mod tags;
pub mod walker;

pub use chunker::{chunk_sections, split_text};
pub use sections::{extract_sections, Section};
pub use tags::extract_tags;
pub use walker::{discover_files, SourceFile};

use crate::config::ChunkingConfig;
use crate::error::{KbError, Result};
use crate::models::Chunk;
use sha2::{Digest, Sha256};

/// Chars of document text kept as a listing preview
pub const PREVIEW_CHARS: usize = 200;

/// Validate and chunk a raw document.
///
/// # Errors
///
/// `KbError::Chunking` when the text is blank or exceeds
/// `config.max_document_chars`. Nothing is written in either case.
pub fn chunk_document(document_id: &str, raw_text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    if raw_text.trim().is_empty() {
        return Err(KbError::Chunking(format!("Document {} is empty", document_id)));
    }

    let len = raw_text.chars().count();
    if len > config.max_document_chars {
        return Err(KbError::Chunking(format!(
            "Document {} has {} chars, limit is {}",
            document_id, len, config.max_document_chars
        )));
    }

    let chunks = chunk_sections(document_id, raw_text, config.chunk_size, config.chunk_overlap);
    if chunks.is_empty() {
        return Err(KbError::Chunking(format!("Document {} produced no chunks", document_id)));
    }

    log::debug!("Chunked {} into {} chunks", document_id, chunks.len());
    Ok(chunks)
}

/// SHA-256 of the raw text, hex encoded
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First [`PREVIEW_CHARS`] chars of the trimmed text
pub fn content_preview(text: &str) -> String {
    text.trim().chars().take(PREVIEW_CHARS).collect()
}
