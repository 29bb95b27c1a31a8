use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use super::RecordStore;
use crate::kernel::error::{CollaboratorError, StoreError};

type Collections = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// Volatile record store.
#[derive(Debug, Default)]
pub struct InMemoryRecords {
    collections: RwLock<Collections>,
}

impl InMemoryRecords {
    pub fn count(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }
}

fn put_into(collections: &mut Collections, collection: &str, key: &str, value: serde_json::Value) {
    collections
        .entry(collection.to_string())
        .or_default()
        .insert(key.to_string(), value);
}

fn list_of(collections: &Collections, collection: &str) -> Vec<(String, serde_json::Value)> {
    collections
        .get(collection)
        .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn delete_from(collections: &mut Collections, collection: &str, key: &str) -> bool {
    collections
        .get_mut(collection)
        .is_some_and(|c| c.remove(key).is_some())
}

#[async_trait]
impl RecordStore for InMemoryRecords {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<(), CollaboratorError> {
        put_into(&mut self.collections.write(), collection, key, value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, CollaboratorError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key).cloned()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, CollaboratorError> {
        Ok(list_of(&self.collections.read(), collection))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, CollaboratorError> {
        Ok(delete_from(&mut self.collections.write(), collection, key))
    }
}

/// Record store persisted as one pretty-printed JSON snapshot, rewritten on every
/// mutation.
#[derive(Debug)]
pub struct JsonFileRecords {
    path: PathBuf,
    collections: RwLock<Collections>,
}

impl JsonFileRecords {
    /// Opens the store, loading the snapshot when the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            collections: RwLock::default(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn load(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.path)?;
        *self.collections.write() = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), "records loaded");
        Ok(())
    }

    fn save(&self, collections: &Collections) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(collections)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileRecords {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<(), CollaboratorError> {
        let mut collections = self.collections.write();
        put_into(&mut collections, collection, key, value);
        self.save(&collections)?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, CollaboratorError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key).cloned()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, CollaboratorError> {
        Ok(list_of(&self.collections.read(), collection))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, CollaboratorError> {
        let mut collections = self.collections.write();
        let removed = delete_from(&mut collections, collection, key);
        if removed {
            self.save(&collections)?;
        }
        Ok(removed)
    }
}
