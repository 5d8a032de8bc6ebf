use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key '{}'", key),
            )));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let target = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&target).map_err(|e| StoreError::Io(e.error))?;
        debug!("Wrote {} bytes to {:?}", value.len(), target);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct PersistentState<T> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    value: Mutex<T>,
}

impl<T> PersistentState<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Falls back to `initial` when the key is absent, unreadable or malformed.
    /// After a failed read nothing is written back.
    pub fn load(store: Arc<dyn KeyValueStore>, key: impl Into<String>, initial: T) -> Self {
        let key = key.into();
        let (value, write_back) = match store.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(v) => (v, true),
                Err(e) => {
                    warn!("Stored value for '{}' is malformed, using initial value: {}", key, e);
                    (initial, true)
                }
            },
            Ok(None) => (initial, true),
            Err(e) => {
                warn!("Failed to read '{}' from storage, using initial value: {}", key, e);
                (initial, false)
            }
        };

        let state = Self {
            store,
            key,
            value: Mutex::new(value),
        };
        if write_back {
            let current = state.lock();
            if let Err(e) = state.persist(&current) {
                warn!("Failed to write '{}' to storage: {}", state.key, e);
            }
        }
        state
    }

    pub fn get(&self) -> T {
        self.lock().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    pub fn set(&self, value: T) -> Result<(), StoreError> {
        let mut current = self.lock();
        self.persist(&value)?;
        *current = value;
        Ok(())
    }

    /// If the write fails the value is left as it was.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<T, StoreError> {
        let mut current = self.lock();
        let next = f(&current);
        self.persist(&next)?;
        *current = next;
        Ok(current.clone())
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(&self.key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn round_trips_through_a_fresh_instance() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = PersistentState::load(store.clone(), "watched", Vec::<String>::new());
        first.set(vec!["v1".to_string()]).unwrap();

        let second = PersistentState::load(store, "watched", Vec::<String>::new());
        assert_eq!(second.get(), vec!["v1".to_string()]);
    }

    #[test]
    fn successive_functional_updates_keep_both_items() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let state = PersistentState::load(store.clone(), "list", Vec::<String>::new());

        state
            .update(|prev| {
                let mut next = prev.clone();
                next.push("x".to_string());
                next
            })
            .unwrap();
        state
            .update(|prev| {
                let mut next = prev.clone();
                next.push("y".to_string());
                next
            })
            .unwrap();

        assert_eq!(state.get(), vec!["x".to_string(), "y".to_string()]);
        assert_eq!(store.get("list").unwrap().as_deref(), Some(r#"["x","y"]"#));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let state = Arc::new(PersistentState::load(store, "count", 0u32));

        let handles = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        state.update(|n| n + 1).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.get(), 800);
    }

    #[test]
    fn malformed_stored_value_falls_back_to_initial() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set("watched", "{not json").unwrap();

        let state = PersistentState::load(store.clone(), "watched", vec![1, 2]);
        assert_eq!(state.get(), vec![1, 2]);
        // The fallback replaces the corrupt entry.
        assert_eq!(store.get("watched").unwrap().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn absent_key_uses_initial_and_writes_it() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let state = PersistentState::load(store.clone(), "fresh", vec!["a".to_string()]);
        assert_eq!(state.get(), vec!["a".to_string()]);
        assert_eq!(store.get("fresh").unwrap().as_deref(), Some(r#"["a"]"#));
    }

    struct FlakyStore {
        inner: MemoryStore,
        failing_reads: AtomicUsize,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new(failing_reads: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                failing_reads: AtomicUsize::new(failing_reads),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let fail = self
                .failing_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(StoreError::Io(io::Error::other("disk unavailable")));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Io(io::Error::other("disk full")));
            }
            self.inner.set(key, value)
        }
    }

    #[test]
    fn read_failure_keeps_stored_value() {
        let flaky = Arc::new(FlakyStore::new(0));
        flaky.set("watched", r#"["keep-me"]"#).unwrap();
        flaky.failing_reads.store(1, Ordering::SeqCst);

        let store: Arc<dyn KeyValueStore> = flaky.clone();
        let state = PersistentState::load(store.clone(), "watched", Vec::<String>::new());
        assert!(state.get().is_empty());
        assert_eq!(store.get("watched").unwrap().as_deref(), Some(r#"["keep-me"]"#));

        let reloaded = PersistentState::load(store, "watched", Vec::<String>::new());
        assert_eq!(reloaded.get(), vec!["keep-me".to_string()]);
    }

    #[test]
    fn failed_write_leaves_value_unchanged() {
        let flaky = Arc::new(FlakyStore::new(0));
        let store: Arc<dyn KeyValueStore> = flaky.clone();
        let state = PersistentState::load(store.clone(), "list", vec!["a".to_string()]);

        flaky.fail_writes.store(true, Ordering::SeqCst);
        let err = state.update(|prev| {
            let mut next = prev.clone();
            next.push("b".to_string());
            next
        });
        assert!(matches!(err, Err(StoreError::Io(_))));
        assert!(state.set(Vec::new()).is_err());
        assert_eq!(state.get(), vec!["a".to_string()]);

        flaky.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(store.get("list").unwrap().as_deref(), Some(r#"["a"]"#));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data");

        let store = FileStore::new(&dir);
        assert_eq!(store.get("watched").unwrap(), None);
        store.set("watched", "[1]").unwrap();
        store.set("watched", "[1,2]").unwrap();

        let reopened = FileStore::new(&dir);
        assert_eq!(reopened.get("watched").unwrap().as_deref(), Some("[1,2]"));
        assert!(dir.join("watched.json").is_file());
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }
}
