//! Shared state store handed from the producer render pass to the consumer.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::error::{CacheError, StoreError};
use super::keys::StateKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Key-value store whose whole content travels from producer to consumer.
///
/// Values are JSON so that the store can be embedded in the rendered page.
pub trait StateStore: Send + Sync {
    fn has(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed access through [`StateKey`]s.
pub trait StateStoreExt: StateStore {
    fn has_key<T>(&self, key: &StateKey<T>) -> bool {
        self.has(key.name())
    }

    fn read<T: DeserializeOwned>(&self, key: &StateKey<T>) -> Result<Option<T>, CacheError> {
        self.get(key.name())
            .map(|value| {
                serde_json::from_value(value).map_err(|err| CacheError::decode(key.name(), err))
            })
            .transpose()
    }

    fn write<T: Serialize>(&self, key: &StateKey<T>, value: &T) -> Result<(), CacheError> {
        let value =
            serde_json::to_value(value).map_err(|err| CacheError::decode(key.name(), err))?;
        self.set(key.name(), value)?;
        Ok(())
    }

    fn remove_key<T>(&self, key: &StateKey<T>) -> Result<(), StoreError> {
        self.remove(key.name())
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// In-process store, serializable to and from the handoff payload.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a payload produced by [`to_payload`](Self::to_payload).
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, Value> = serde_json::from_str(payload)?;
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Capture every key into a JSON object.
    pub fn to_payload(&self) -> String {
        Value::Object(self.to_map()).to_string()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        rw_read(&self.entries, SOURCE, "to_map")
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        rw_read(&self.entries, SOURCE, "keys").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn has(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "has").contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        rw_read(&self.entries, SOURCE, "get").get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "set").insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "remove").remove(key);
        Ok(())
    }
}
