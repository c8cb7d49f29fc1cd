//! Local keyed string store.
//!
//! Holds the small amount of per-install state that must survive restarts:
//! the pseudonym and the local role preference. Cleared only by an explicit
//! reset, data-clear, or uninstall.

use crate::error::{IdentityError, IdentityResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// A persistent string-to-string map.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> IdentityResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> IdentityResult<()>;
    fn remove(&self, key: &str) -> IdentityResult<()>;

    /// Atomic read-modify-write of one key.
    ///
    /// `f` sees the current value. `Some(new)` stores `new`; `None` leaves
    /// the entry as it is. Returns the value the key holds afterwards.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&str>) -> Option<String>,
    ) -> IdentityResult<Option<String>>;
}

/// In-memory store for tests. Lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> IdentityResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| IdentityError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> IdentityResult<()> {
        let mut entries = self.entries.write().map_err(|_| IdentityError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> IdentityResult<()> {
        let mut entries = self.entries.write().map_err(|_| IdentityError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&str>) -> Option<String>,
    ) -> IdentityResult<Option<String>> {
        let mut entries = self.entries.write().map_err(|_| IdentityError::LockPoisoned)?;
        match f(entries.get(key).map(String::as_str)) {
            Some(value) => {
                entries.insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => Ok(entries.get(key).cloned()),
        }
    }
}

/// Store persisted as a single JSON object on disk.
///
/// Every operation goes to the file, so any number of handles (in this
/// process or another) see each other's writes. Writes take an exclusive
/// lock on a sidecar `.lock` file, re-read the object, apply the change and
/// replace the file atomically (temp file + rename).
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// Opens the store at `path`, creating nothing until the first write.
    ///
    /// An existing file must parse.
    pub fn open(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            lock_path: path.with_extension("json.lock"),
            path,
        };
        store.read_entries()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> IdentityResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(storage(e)),
        }
    }

    /// Runs `f` on the current on-disk entries while holding the file lock.
    /// The file is rewritten only when `f` reports a change.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> IdentityResult<T> {
        let _lock = self.lock()?;

        let mut entries = self.read_entries()?;
        let (out, changed) = f(&mut entries);
        if changed {
            self.flush(&entries)?;
        }
        Ok(out)
    }

    /// Exclusive advisory lock, released when the returned file is dropped.
    fn lock(&self) -> IdentityResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(storage)?;
        file.lock().map_err(storage)?;
        Ok(file)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> IdentityResult<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(storage)?;
        std::fs::rename(&tmp, &self.path).map_err(storage)?;
        Ok(())
    }
}

fn storage(e: std::io::Error) -> IdentityError {
    IdentityError::Storage(e.to_string())
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> IdentityResult<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> IdentityResult<()> {
        self.modify(|entries| {
            let changed = entries.get(key).map(String::as_str) != Some(value);
            entries.insert(key.to_string(), value.to_string());
            ((), changed)
        })
    }

    fn remove(&self, key: &str) -> IdentityResult<()> {
        self.modify(|entries| ((), entries.remove(key).is_some()))
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&str>) -> Option<String>,
    ) -> IdentityResult<Option<String>> {
        self.modify(|entries| match f(entries.get(key).map(String::as_str)) {
            Some(value) => {
                entries.insert(key.to_string(), value.clone());
                (Some(value), true)
            }
            None => (entries.get(key).cloned(), false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_put_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn update_keeps_or_replaces() {
        let store = MemoryStore::new();
        let mut first = |cur: Option<&str>| cur.is_none().then(|| "first".to_string());
        let set = store.update("k", &mut first);
        assert_eq!(set.unwrap().as_deref(), Some("first"));

        let mut second = |cur: Option<&str>| cur.is_none().then(|| "second".to_string());
        let kept = store.update("k", &mut second);
        assert_eq!(kept.unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.put("anon_id", "anon-0123456789").unwrap();
        store.put("local_role", "RESPONDENT").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("anon_id").unwrap().as_deref(), Some("anon-0123456789"));
        assert_eq!(reopened.get("local_role").unwrap().as_deref(), Some("RESPONDENT"));
    }

    #[test]
    fn file_store_remove_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.put("anon_id", "anon-0123456789").unwrap();
        store.remove("anon_id").unwrap();
        drop(store);

        assert_eq!(JsonFileStore::open(&path).unwrap().get("anon_id").unwrap(), None);
    }

    #[test]
    fn handles_on_one_path_merge_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let a = JsonFileStore::open(&path).unwrap();
        let b = JsonFileStore::open(&path).unwrap();

        a.put("anon_id", "anon-0123456789").unwrap();
        b.put("local_role", "ADMIN").unwrap();

        assert_eq!(b.get("anon_id").unwrap().as_deref(), Some("anon-0123456789"));
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("anon_id").unwrap().as_deref(), Some("anon-0123456789"));
        assert_eq!(reopened.get("local_role").unwrap().as_deref(), Some("ADMIN"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path),
            Err(IdentityError::Serialization(_))
        ));
    }
}
