// src/store/memory.rs

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError, push_key, split_path, tree};
use crate::utils::clock::{Clock, SystemClock};

/// Document store kept entirely in memory.
pub struct MemoryStore {
    root: RwLock<Value>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            clock,
        }
    }

    /// Copy of the whole tree.
    pub async fn dump(&self) -> Value {
        self.root.read().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segments = split_path(path)?;
        let root = self.root.read().await;
        Ok(tree::get(&root, &segments).cloned())
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments = split_path(path)?;
        let mut root = self.root.write().await;
        tree::set(&mut root, &segments, value);
        Ok(())
    }

    async fn push_create(&self, path: &str) -> Result<String, StoreError> {
        split_path(path)?;
        Ok(format!("{}/{}", path, push_key(self.clock.now())))
    }
}
