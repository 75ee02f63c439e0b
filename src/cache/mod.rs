pub mod aside;
pub mod backend;
pub mod keys;

pub use aside::CacheAside;
pub use backend::{CacheBackend, MemoryCacheBackend};
