//! Vector index: storage engines, the manager that writes and searches
//! them, and per-document single flight.

pub mod manager;
pub mod memory;
pub mod single_flight;
pub mod sqlite;
pub mod store;

pub use manager::{IndexStats, UpsertReport, VectorIndex};
pub use memory::MemoryVectorStore;
pub use single_flight::{DocumentGuard, DocumentLocks};
pub use sqlite::SqliteVectorStore;
pub use store::{RecordRef, ScoredRecord, VectorStore};
