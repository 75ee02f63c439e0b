use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Per-document mutual exclusion for ingestion and deletion.
///
/// Operations on the same document id queue behind each other; different
/// ids never contend. Entries are removed once no one holds or waits on them.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    locks: LockMap,
}

/// Held while a document is being mutated; releases on drop
pub struct DocumentGuard {
    document_id: String,
    mutex: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `document_id` is free and take it
    pub async fn lock(&self, document_id: &str) -> DocumentGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(document_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = Arc::clone(&mutex).lock_owned().await;
        DocumentGuard {
            document_id: document_id.to_string(),
            mutex,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of documents currently locked or awaited
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl DocumentGuard {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this guard still reference the mutex
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.document_id);
        }
    }
}
