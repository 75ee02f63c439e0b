pub mod config;
pub mod error;
pub mod db;
pub mod models;
pub mod guard;
pub mod retry;
pub mod cache;
pub mod embeddings;
pub mod generation;
pub mod index;
pub mod documents;
pub mod ingest;
pub mod retrieval;
pub mod respond;
pub mod service;
pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use error::{KbError, Result};
pub use service::{Collaborators, KnowledgeBase};
