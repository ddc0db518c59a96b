//! Persisted session storage.
//!
//! The session manager is the only writer. Storage is a flat string
//! key-value map holding exactly two keys: the bearer token and the
//! username. Reading a key that was never written yields `None`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::debug;

use super::AuthError;

/// Storage key for the bearer token
pub const KEY_AUTH_TOKEN: &str = "auth_token";

/// Storage key for the authenticated username
pub const KEY_USERNAME: &str = "username";

/// Session file name in the state directory
const SESSION_FILE: &str = "session.json";

/// String key-value storage surviving process restarts.
pub trait SessionStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), AuthError>;
    fn remove(&mut self, key: &str) -> Result<(), AuthError>;
}

/// JSON-file-backed store at `<dir>/session.json`.
pub struct FileStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl FileStore {
    /// Open the store, loading any existing session file. A missing or
    /// unreadable file starts empty rather than failing.
    pub fn open(dir: PathBuf) -> Self {
        let path = dir.join(SESSION_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(map) => map
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect(),
                Err(e) => {
                    debug!(error = %e, "Session file unparsable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, entries }
    }

    fn persist(&self) -> Result<(), AuthError> {
        if self.entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)
                    .map_err(|e| AuthError::Storage(e.to_string()))?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let contents = serde_json::to_string_pretty(&map)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| AuthError::Storage(e.to_string()))
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), AuthError> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

/// Volatile store for tests. Clones share the same map so a test can keep a
/// handle for inspecting what the session manager persisted.
#[cfg(test)]
#[derive(Default, Clone)]
pub struct MemoryStore {
    entries: std::sync::Arc<std::sync::Mutex<HashMap<String, String>>>,
}

#[cfg(test)]
impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), AuthError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("poolwatch-store-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_missing_key_reads_absent() {
        let store = MemoryStore::default();
        assert_eq!(store.get(KEY_AUTH_TOKEN), None);
        assert_eq!(store.get(KEY_USERNAME), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = MemoryStore::default();
        store.set(KEY_AUTH_TOKEN, "t1").unwrap();
        store.remove(KEY_AUTH_TOKEN).unwrap();
        store.remove(KEY_AUTH_TOKEN).unwrap();
        assert_eq!(store.get(KEY_AUTH_TOKEN), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = temp_store_dir("reopen");
        let _ = std::fs::remove_dir_all(&dir);

        {
            let mut store = FileStore::open(dir.clone());
            store.set(KEY_AUTH_TOKEN, "t1").unwrap();
            store.set(KEY_USERNAME, "admin").unwrap();
        }

        let store = FileStore::open(dir.clone());
        assert_eq!(store.get(KEY_AUTH_TOKEN).as_deref(), Some("t1"));
        assert_eq!(store.get(KEY_USERNAME).as_deref(), Some("admin"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_empty_removes_file() {
        let dir = temp_store_dir("empty");
        let _ = std::fs::remove_dir_all(&dir);

        let mut store = FileStore::open(dir.clone());
        store.set(KEY_AUTH_TOKEN, "t1").unwrap();
        assert!(dir.join(SESSION_FILE).exists());
        store.remove(KEY_AUTH_TOKEN).unwrap();
        assert!(!dir.join(SESSION_FILE).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
