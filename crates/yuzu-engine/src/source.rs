//! The host key space, seen from the engine.
//!
//! The engine never parses host records itself; it asks the source for
//! field values when a notification arrives (snapshotting on the main
//! thread) and when a reply needs attribute contents the indices don't
//! hold. `MemorySource` is the in-process implementation used by tests and
//! embedders without a real data store.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Read access to the primary key space.
pub trait RecordSource: Send + Sync {
    /// Current value of `identifier` on `key`. None when the key or the
    /// field is absent.
    fn field(&self, key: &[u8], identifier: &str) -> Option<Vec<u8>>;

    /// Whether `key` exists at all.
    fn exists(&self, key: &[u8]) -> bool;

    /// Walk every key, for schema backfill.
    fn scan_keys(&self, visit: &mut dyn FnMut(&[u8]));
}

/// Hash-of-hashes in-memory source.
pub struct MemorySource {
    records: RwLock<HashMap<Vec<u8>, HashMap<String, Vec<u8>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Set one field on `key`, creating the record if needed.
    pub fn put(&self, key: impl AsRef<[u8]>, identifier: &str, value: Vec<u8>) {
        self.records
            .write()
            .entry(key.as_ref().to_vec())
            .or_default()
            .insert(identifier.to_string(), value);
    }

    /// Remove one field; drops the record when it empties.
    pub fn remove_field(&self, key: impl AsRef<[u8]>, identifier: &str) {
        let mut records = self.records.write();
        if let Some(fields) = records.get_mut(key.as_ref()) {
            fields.remove(identifier);
            if fields.is_empty() {
                records.remove(key.as_ref());
            }
        }
    }

    /// Delete a whole record.
    pub fn delete(&self, key: impl AsRef<[u8]>) {
        self.records.write().remove(key.as_ref());
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSource for MemorySource {
    fn field(&self, key: &[u8], identifier: &str) -> Option<Vec<u8>> {
        self.records.read().get(key)?.get(identifier).cloned()
    }

    fn exists(&self, key: &[u8]) -> bool {
        self.records.read().contains_key(key)
    }

    fn scan_keys(&self, visit: &mut dyn FnMut(&[u8])) {
        for key in self.records.read().keys() {
            visit(key);
        }
    }
}
