//! Opaque blob storage for serialized graphs.
//!
//! The manager persists one blob per sandbox id and restores it best-effort
//! on startup. The blob's internal shape is private to the core.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::Result;

/// Storage collaborator contract. Implementations must tolerate concurrent
/// sandboxes (distinct keys) but see at most one request at a time per key.
#[async_trait(?Send)]
pub trait CacheStorage {
    async fn save(&self, key: &str, blob: Vec<u8>) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage: the fallback when no persistent cache facility is
/// available, and the default in tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait(?Send)]
impl CacheStorage for MemoryStorage {
    async fn save(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        self.entries.lock().insert(key.to_string(), blob);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
