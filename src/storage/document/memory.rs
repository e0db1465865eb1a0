//! In-memory document store.
//!
//! Keeps file text in a map keyed by path. Used by tests and by embedders
//! that want the engine without a directory on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{ARCHIVE_DIR_NAME, DocumentStore, PROMPT_EXTENSION, is_prompt_file};
use crate::{Error, Result};

/// In-memory document store.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    prompts_dir: PathBuf,
    files: Mutex<BTreeMap<PathBuf, String>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Creates an empty store under the virtual directory `/memory/prompts`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prompts_dir: PathBuf::from("/memory/prompts"),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of files, archived ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the store holds no files.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn archive_dir(&self) -> PathBuf {
        self.prompts_dir.join(ARCHIVE_DIR_NAME)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, String>> {
        // A panic while holding the map cannot leave it half-updated.
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn missing(operation: &str, path: &Path) -> Error {
        Error::StorageIo {
            operation: operation.to_string(),
            path: path.to_path_buf(),
            cause: "no such file".to_string(),
        }
    }

    fn move_file(&self, from: &Path, to: PathBuf, operation: &str) -> Result<PathBuf> {
        let mut files = self.lock();
        if files.contains_key(&to) {
            return Err(Error::StorageIo {
                operation: operation.to_string(),
                path: to,
                cause: "destination already exists".to_string(),
            });
        }
        let text = files
            .remove(from)
            .ok_or_else(|| Self::missing(operation, from))?;
        files.insert(to.clone(), text);
        Ok(to)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn list_prompts(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .lock()
            .keys()
            .filter(|p| p.parent() == Some(self.prompts_dir.as_path()) && is_prompt_file(p))
            .cloned()
            .collect())
    }

    fn read_raw(&self, path: &Path) -> Result<String> {
        self.lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::missing("read_prompt", path))
    }

    fn write_raw(&self, path: &Path, text: &str) -> Result<()> {
        self.lock().insert(path.to_path_buf(), text.to_string());
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.lock().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn archive(&self, path: &Path) -> Result<PathBuf> {
        let stem = path
            .file_stem()
            .and_then(std::ffi::OsStr::to_str)
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let archive_dir = self.archive_dir();
        let mut target = archive_dir.join(format!("{stem}.{PROMPT_EXTENSION}"));
        let mut n = 1;
        while self.exists(&target) {
            target = archive_dir.join(format!("{stem}.{n}.{PROMPT_EXTENSION}"));
            n += 1;
        }
        self.move_file(path, target, "archive_prompt")
    }

    fn unarchive(&self, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let target = self.prompts_dir.join(file_name);
        self.move_file(path, target, "unarchive_prompt")
    }

    fn path_for(&self, file_stem: &str) -> PathBuf {
        self.prompts_dir
            .join(format!("{file_stem}.{PROMPT_EXTENSION}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_listing() {
        let store = MemoryDocumentStore::new();
        store.write_raw(&store.path_for("b"), "b").unwrap();
        store.write_raw(&store.path_for("a"), "a").unwrap();

        assert_eq!(
            store.list_prompts().unwrap(),
            vec![store.path_for("a"), store.path_for("b")]
        );
        assert_eq!(store.read_raw(&store.path_for("a")).unwrap(), "a");
    }

    #[test]
    fn test_read_missing_is_storage_error() {
        let store = MemoryDocumentStore::new();
        assert!(matches!(
            store.read_raw(&store.path_for("x")),
            Err(Error::StorageIo { .. })
        ));
    }

    #[test]
    fn test_archive_moves_out_of_listing() {
        let store = MemoryDocumentStore::new();
        let path = store.path_for("a");
        store.write_raw(&path, "a").unwrap();

        let archived = store.archive(&path).unwrap();
        assert!(store.list_prompts().unwrap().is_empty());
        assert_eq!(store.len(), 1);

        store.unarchive(&archived).unwrap();
        assert_eq!(store.list_prompts().unwrap(), vec![path]);
    }
}
