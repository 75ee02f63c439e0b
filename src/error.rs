use thiserror::Error;

/// Main error type for kbguard
#[derive(Error, Debug)]
pub enum KbError {
    /// Document text rejected before chunking (empty, too large)
    #[error("Chunking error: {0}")]
    Chunking(String),

    /// Embedding capability errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Generation capability errors
    #[error("Generation error: {0}")]
    Generation(String),

    /// Vector index errors
    #[error("Index error: {0}")]
    Index(String),

    /// Cache backend errors (logged, never surfaced to callers)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Admission denied by a rate limiter
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// An external call exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller lacks the trust level for the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl KbError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KbError::Embedding(_)
                | KbError::Index(_)
                | KbError::Timeout(_)
                | KbError::RateLimited { .. }
                | KbError::Database(_)
        )
    }
}

/// Convenient Result type using KbError
pub type Result<T> = std::result::Result<T, KbError>;
