//! Filesystem-backed document store.
//!
//! Stores each prompt as `{prompts_dir}/{stem}.md`. Writes go to a hidden
//! temp file in the same directory and are renamed into place, so readers
//! never observe a truncated prompt.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{ARCHIVE_DIR_NAME, DocumentStore, PROMPT_EXTENSION, is_prompt_file};
use crate::{Error, Result};

/// Filesystem-based document store.
#[derive(Debug, Clone)]
pub struct FilesystemDocumentStore {
    /// Directory holding live prompt files.
    prompts_dir: PathBuf,
    /// Directory holding soft-deleted prompt files.
    archive_dir: PathBuf,
}

impl FilesystemDocumentStore {
    /// Creates a store rooted at `prompts_dir`, archiving into
    /// `{prompts_dir}/.archive`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Result<Self> {
        let prompts_dir = prompts_dir.into();
        let archive_dir = prompts_dir.join(ARCHIVE_DIR_NAME);
        Self::with_archive_dir(prompts_dir, archive_dir)
    }

    /// Creates a store with an explicit archive directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn with_archive_dir(
        prompts_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let prompts_dir = prompts_dir.into();
        let archive_dir = archive_dir.into();

        fs::create_dir_all(&prompts_dir)
            .map_err(|e| Error::io("create_prompts_dir", &prompts_dir, &e))?;
        fs::create_dir_all(&archive_dir)
            .map_err(|e| Error::io("create_archive_dir", &archive_dir, &e))?;

        Ok(Self {
            prompts_dir,
            archive_dir,
        })
    }

    /// Returns the live prompts directory.
    #[must_use]
    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    /// Returns the archive directory.
    #[must_use]
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Moves `from` to `to` without clobbering an existing file.
    fn move_file(from: &Path, to: &Path, operation: &str) -> Result<()> {
        if to.exists() {
            return Err(Error::StorageIo {
                operation: operation.to_string(),
                path: to.to_path_buf(),
                cause: "destination already exists".to_string(),
            });
        }
        fs::rename(from, to).map_err(|e| Error::io(operation, from, &e))
    }

    /// Picks a free name in `dir` for `file_name`, suffixing the current
    /// time if the plain name is taken.
    fn free_path(dir: &Path, file_name: &std::ffi::OsStr) -> PathBuf {
        let candidate = dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("prompt");
        let mut n = crate::current_timestamp();
        loop {
            let candidate = dir.join(format!("{stem}.{n}.{PROMPT_EXTENSION}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl DocumentStore for FilesystemDocumentStore {
    fn list_prompts(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.prompts_dir)
            .map_err(|e| Error::io("list_prompts", &self.prompts_dir, &e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_prompt_file(path))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn read_raw(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| Error::io("read_prompt", path, &e))
    }

    fn write_raw(&self, path: &Path, text: &str) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.prompts_dir);
        fs::create_dir_all(dir).map_err(|e| Error::io("create_prompts_dir", dir, &e))?;

        let file_name = path
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let tmp = dir.join(format!(".{file_name}.tmp"));

        {
            let mut file =
                fs::File::create(&tmp).map_err(|e| Error::io("create_temp_file", &tmp, &e))?;
            file.write_all(text.as_bytes())
                .map_err(|e| Error::io("write_temp_file", &tmp, &e))?;
            file.sync_all()
                .map_err(|e| Error::io("sync_temp_file", &tmp, &e))?;
        }

        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::io("rename_temp_file", path, &e)
        })
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("remove_prompt", path, &e)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn archive(&self, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let target = Self::free_path(&self.archive_dir, file_name);
        Self::move_file(path, &target, "archive_prompt")?;
        tracing::debug!(from = %path.display(), to = %target.display(), "Archived prompt file");
        Ok(target)
    }

    fn unarchive(&self, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let target = self.prompts_dir.join(file_name);
        Self::move_file(path, &target, "unarchive_prompt")?;
        Ok(target)
    }

    fn path_for(&self, file_stem: &str) -> PathBuf {
        self.prompts_dir
            .join(format!("{file_stem}.{PROMPT_EXTENSION}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::PromptMetadata;
    use tempfile::TempDir;

    fn store() -> (TempDir, FilesystemDocumentStore) {
        let dir = TempDir::new().unwrap();
        let store = FilesystemDocumentStore::new(dir.path().join("prompts")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_creates_directories() {
        let (_dir, store) = store();
        assert!(store.prompts_dir().is_dir());
        assert!(store.archive_dir().is_dir());
    }

    #[test]
    fn test_write_and_read_prompt() {
        let (_dir, store) = store();
        let path = store.path_for("greeting");
        let metadata = PromptMetadata {
            name: Some("greeting".to_string()),
            tags: vec!["hello".to_string()],
            ..PromptMetadata::default()
        };

        store.write_prompt(&path, &metadata, "Hello").unwrap();
        let doc = store.read_prompt(&path).unwrap();

        assert_eq!(doc.metadata, metadata);
        assert_eq!(doc.body, "Hello");
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let (_dir, store) = store();
        let path = store.path_for("a");
        store.write_raw(&path, "one").unwrap();
        store.write_raw(&path, "two").unwrap();

        let names: Vec<_> = fs::read_dir(store.prompts_dir())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
        assert_eq!(store.read_raw(&path).unwrap(), "two");
    }

    #[test]
    fn test_list_prompts_skips_other_files() {
        let (_dir, store) = store();
        store.write_raw(&store.path_for("b"), "b").unwrap();
        store.write_raw(&store.path_for("a"), "a").unwrap();
        fs::write(store.prompts_dir().join("notes.txt"), "x").unwrap();
        fs::write(store.prompts_dir().join(".hidden.md"), "x").unwrap();
        store.write_raw(&store.archive_dir().join("old.md"), "x").unwrap();

        let listed = store.list_prompts().unwrap();
        assert_eq!(listed, vec![store.path_for("a"), store.path_for("b")]);
    }

    #[test]
    fn test_read_malformed_header_is_parse_error() {
        let (_dir, store) = store();
        let path = store.path_for("bad");
        store.write_raw(&path, "---\nname: [unclosed\n---\nbody").unwrap();
        assert!(matches!(store.read_prompt(&path), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_archive_and_unarchive() {
        let (_dir, store) = store();
        let path = store.path_for("gone");
        store.write_raw(&path, "bye").unwrap();

        let archived = store.archive(&path).unwrap();
        assert!(!store.exists(&path));
        assert!(archived.starts_with(store.archive_dir()));
        assert!(store.list_prompts().unwrap().is_empty());

        let restored = store.unarchive(&archived).unwrap();
        assert_eq!(restored, path);
        assert_eq!(store.read_raw(&path).unwrap(), "bye");
    }

    #[test]
    fn test_archive_does_not_clobber() {
        let (_dir, store) = store();
        let path = store.path_for("dup");
        store.write_raw(&path, "first").unwrap();
        let first = store.archive(&path).unwrap();
        store.write_raw(&path, "second").unwrap();
        let second = store.archive(&path).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.read_raw(&first).unwrap(), "first");
        assert_eq!(store.read_raw(&second).unwrap(), "second");
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let (_dir, store) = store();
        assert!(store.remove(&store.path_for("nope")).is_ok());
    }
}
