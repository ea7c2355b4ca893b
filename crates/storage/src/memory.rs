use std::{
    collections::HashMap,
    sync::Mutex,
};

use crate::{Entry, KeyValueStore, Result};

/// In-memory backend, the default for tests and short-lived flows.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, entry: Entry) -> Result<()> {
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.lock().remove(key))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clear(&self, prefix: &str) -> Result<usize> {
        let mut map = self.lock();
        let doomed: Vec<String> = map.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        for key in &doomed {
            map.remove(key);
        }
        Ok(doomed.len())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_roundtrip() {
        let store = MemoryStore::new();
        store
            .set("f1:state", Entry::persistent(serde_json::json!("S1")))
            .unwrap();

        let entry = store.get("f1:state").unwrap().unwrap();
        assert_eq!(entry.value, serde_json::json!("S1"));

        let removed = store.delete("f1:state").unwrap();
        assert!(removed.is_some());
        assert!(store.get("f1:state").unwrap().is_none());
        assert!(store.delete("f1:state").unwrap().is_none());
    }

    #[test]
    fn clear_removes_only_prefix() {
        let store = MemoryStore::new();
        store
            .set("f1:state", Entry::persistent(serde_json::json!("a")))
            .unwrap();
        store
            .set("f1:nonce", Entry::persistent(serde_json::json!("b")))
            .unwrap();
        store
            .set("f2:state", Entry::persistent(serde_json::json!("c")))
            .unwrap();

        assert_eq!(store.clear("f1:").unwrap(), 2);
        assert!(store.get("f2:state").unwrap().is_some());
    }

    #[test]
    fn keys_filters_by_prefix() {
        let store = MemoryStore::new();
        store
            .set("csrf:aaa", Entry::persistent(serde_json::json!(1)))
            .unwrap();
        store
            .set("csrf:bbb", Entry::persistent(serde_json::json!(2)))
            .unwrap();
        store
            .set("f1:tokens", Entry::persistent(serde_json::json!(3)))
            .unwrap();

        let mut keys = store.keys("csrf:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["csrf:aaa", "csrf:bbb"]);
    }
}
