//! Durable, crash-safe mirror of a set of opaque byte blobs keyed by content
//! hash. See spec §4.1; failures on individual files are logged and the
//! file is skipped, never fatal.

use std::fs;
use std::path::{Path, PathBuf};

use manager_bolts::content_hash;
use rustc_hash::FxHashSet;

use crate::error::StoreError;

pub struct PersistentStore {
    dir: PathBuf,
    keys: FxHashSet<String>,
}

impl PersistentStore {
    /// Opens `dir` (creating it if missing), dropping any file whose name
    /// doesn't match its own content hash or that `validator` rejects.
    /// Returns the store plus the surviving `(hash, content)` pairs in a
    /// deterministic (sorted-by-name) order.
    pub fn open(
        dir: &Path,
        validator: impl Fn(&[u8]) -> bool,
    ) -> Result<(Self, Vec<(String, Vec<u8>)>), StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::OpenDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut names: Vec<String> = Vec::new();
        let read_dir = fs::read_dir(dir).map_err(|source| StoreError::OpenDir {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in read_dir {
            let Ok(entry) = entry else { continue };
            match entry.file_type() {
                Ok(ft) if ft.is_file() => {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                _ => continue,
            }
        }
        names.sort_unstable();

        let mut keys = FxHashSet::default();
        let mut surviving = Vec::new();
        for name in names {
            let path = dir.join(&name);
            let content = match fs::read(&path) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("corpus store: failed to read {path:?}: {e}");
                    continue;
                }
            };
            if content_hash(&content) != name || !validator(&content) {
                log::warn!("corpus store: dropping corrupt entry {name}");
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("corpus store: failed to remove {path:?}: {e}");
                }
                continue;
            }
            keys.insert(name.clone());
            surviving.push((name, content));
        }

        Ok((Self { dir: dir.to_path_buf(), keys }, surviving))
    }

    /// Writes `content` under its content hash unless already present.
    pub fn add(&mut self, content: &[u8]) -> Result<(), StoreError> {
        let digest = content_hash(content);
        if self.keys.contains(&digest) {
            return Ok(());
        }
        fs::write(self.dir.join(&digest), content)?;
        self.keys.insert(digest);
        Ok(())
    }

    /// Removes every file whose name is not in `keep`. Entries in `keep`
    /// that the store never had are silently ignored.
    pub fn minimize(&mut self, keep: &FxHashSet<String>) {
        let to_remove: Vec<String> = self.keys.difference(keep).cloned().collect();
        for name in to_remove {
            let path = self.dir.join(&name);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("corpus store: failed to remove {path:?} during minimize: {e}");
            }
            self.keys.remove(&name);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn contains(&self, digest: &str) -> bool {
        self.keys.contains(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_valid_entries() {
        let dir = tempdir().unwrap();
        let mut store = PersistentStore::open(dir.path(), |_| true).unwrap().0;
        store.add(b"program a").unwrap();
        store.add(b"program b").unwrap();
        assert_eq!(store.len(), 2);

        let (reopened, entries) = PersistentStore::open(dir.path(), |_| true).unwrap();
        assert_eq!(reopened.len(), 2);
        let mut contents: Vec<Vec<u8>> = entries.into_iter().map(|(_, c)| c).collect();
        contents.sort();
        assert_eq!(contents, vec![b"program a".to_vec(), b"program b".to_vec()]);
    }

    #[test]
    fn startup_drops_hash_mismatch_and_invalid_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deadbeef"), b"garbage").unwrap();
        let good = content_hash(b"good program");
        fs::write(dir.path().join(&good), b"good program").unwrap();

        let (store, entries) = PersistentStore::open(dir.path(), |_| true).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, b"good program");
        assert!(!dir.path().join("deadbeef").exists());
    }

    #[test]
    fn validator_rejection_deletes_the_file() {
        let dir = tempdir().unwrap();
        let digest = content_hash(b"unparseable");
        fs::write(dir.path().join(&digest), b"unparseable").unwrap();

        let (store, entries) = PersistentStore::open(dir.path(), |_| false).unwrap();
        assert_eq!(store.len(), 0);
        assert!(entries.is_empty());
        assert!(!dir.path().join(&digest).exists());
    }

    #[test]
    fn add_is_idempotent_for_identical_content() {
        let dir = tempdir().unwrap();
        let mut store = PersistentStore::open(dir.path(), |_| true).unwrap().0;
        store.add(b"same").unwrap();
        store.add(b"same").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn minimize_keeps_only_the_given_set() {
        let dir = tempdir().unwrap();
        let mut store = PersistentStore::open(dir.path(), |_| true).unwrap().0;
        store.add(b"keep me").unwrap();
        store.add(b"drop me").unwrap();
        let keep_digest = content_hash(b"keep me");

        let mut keep = FxHashSet::default();
        keep.insert(keep_digest.clone());
        keep.insert("nonexistent-hash-is-ignored".to_string());
        store.minimize(&keep);

        assert_eq!(store.len(), 1);
        assert!(store.contains(&keep_digest));
    }
}
