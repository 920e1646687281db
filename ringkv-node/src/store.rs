//! In-memory key-value storage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// A flat map of opaque string values, safe under concurrent access from
/// the dispatcher, the maintenance loop, and the console. Cloning the
/// handle shares the underlying map.
#[derive(Clone, Default)]
pub struct LocalStore {
    data: Arc<Mutex<HashMap<String, String>>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    /// Remove if present. Idempotent.
    pub fn delete(&self, key: &str) {
        self.data.lock().remove(key);
    }

    /// An independent copy of the whole map, used for join handoff and the
    /// console status view.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites() {
        let store = LocalStore::new();
        store.put("k", "v1");
        store.put("k", "v2");
        assert_eq!(store.get("k"), Some("v2".to_string()));
    }

    #[test]
    fn get_missing_is_none() {
        let store = LocalStore::new();
        assert_eq!(store.get("nope"), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = LocalStore::new();
        store.put("k", "v");
        store.delete("k");
        store.delete("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn snapshot_is_independent() {
        let store = LocalStore::new();
        store.put("k", "v");
        let snap = store.snapshot();
        store.put("k2", "v2");
        assert_eq!(snap.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn clones_share_the_map() {
        let store = LocalStore::new();
        let other = store.clone();
        store.put("k", "v");
        assert_eq!(other.get("k"), Some("v".to_string()));
    }
}
