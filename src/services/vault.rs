//! Service container for one prompt library.
//!
//! ```text
//! PromptVault
//!   ├── prompts()  → PromptService
//!   ├── sync()     → SyncService
//!   ├── versions() → VersionService
//!   └── branches() → BranchService
//! ```
//!
//! All four services share one [`Stores`] pair, so they see the same files
//! and the same index connection.

use std::sync::Arc;

use super::shared::Stores;
use super::{BranchService, PromptService, SyncService, VersionService};
use crate::config::{DEFAULT_SYNC_CONCURRENCY, VaultConfig};
use crate::storage::{DocumentStore, FilesystemDocumentStore, MemoryDocumentStore, SqliteIndex};
use crate::Result;

/// A prompt library: document store, index, and the services over them.
#[derive(Debug, Clone)]
pub struct PromptVault {
    stores: Stores,
    prompts: PromptService,
    sync: SyncService,
    versions: VersionService,
    branches: BranchService,
}

impl PromptVault {
    /// Opens the library described by `config`, creating its directories
    /// and database as needed.
    ///
    /// With `sync_on_open` set, a full sync runs before returning; its
    /// per-file errors are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or database cannot be opened, or
    /// if the opening sync cannot list files.
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let documents =
            FilesystemDocumentStore::with_archive_dir(config.prompts_dir(), config.archive_dir())?;
        let index = SqliteIndex::open(config.db_path())?;
        let vault = Self::from_parts(Arc::new(documents), Arc::new(index), config.sync_concurrency);

        tracing::info!(
            root = %config.root.display(),
            db = %config.db_path().display(),
            "Opened prompt library"
        );

        if config.sync_on_open {
            let report = vault.sync.full_sync()?;
            if !report.is_clean() {
                tracing::warn!(errors = report.errors.len(), "Opening sync reported errors");
            }
        }
        Ok(vault)
    }

    /// Opens a library kept entirely in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_parts(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(SqliteIndex::in_memory()?),
            DEFAULT_SYNC_CONCURRENCY,
        ))
    }

    /// Assembles a library from an existing document store and index.
    #[must_use]
    pub fn from_parts(
        documents: Arc<dyn DocumentStore>,
        index: Arc<SqliteIndex>,
        sync_concurrency: usize,
    ) -> Self {
        let stores = Stores::new(documents, index);
        Self {
            prompts: PromptService::new(stores.clone()),
            sync: SyncService::new(stores.clone(), sync_concurrency),
            versions: VersionService::new(stores.clone()),
            branches: BranchService::new(stores.clone()),
            stores,
        }
    }

    /// Prompt facade.
    #[must_use]
    pub const fn prompts(&self) -> &PromptService {
        &self.prompts
    }

    /// Reconciler.
    #[must_use]
    pub const fn sync(&self) -> &SyncService {
        &self.sync
    }

    /// Version ledger.
    #[must_use]
    pub const fn versions(&self) -> &VersionService {
        &self.versions
    }

    /// Branch manager.
    #[must_use]
    pub const fn branches(&self) -> &BranchService {
        &self.branches
    }

    /// The underlying document store.
    #[must_use]
    pub fn documents(&self) -> &dyn DocumentStore {
        self.stores.documents.as_ref()
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &SqliteIndex {
        &self.stores.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreatePromptRequest;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig::new().with_root(dir.path());

        let vault = PromptVault::open(&config).unwrap();
        vault
            .prompts()
            .create(CreatePromptRequest::new("hello", "world"))
            .unwrap();

        assert!(dir.path().join("prompts/hello.md").exists());
        assert!(dir.path().join("prompts/.archive").is_dir());
        assert!(dir.path().join("index.db").exists());
    }

    #[test]
    fn test_reopen_with_sync_rebuilds_lost_index() {
        let dir = TempDir::new().unwrap();
        let config = VaultConfig::new().with_root(dir.path());
        {
            let vault = PromptVault::open(&config).unwrap();
            vault
                .prompts()
                .create(CreatePromptRequest::new("hello", "world").with_tags(["a"]))
                .unwrap();
        }
        let db = config.db_path();
        std::fs::remove_file(&db).unwrap();
        for suffix in ["-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", db.display()));
        }

        let vault = PromptVault::open(&config.clone().with_sync_on_open(true)).unwrap();
        let prompt = vault.prompts().get_by_name("hello").unwrap();
        assert_eq!(prompt.content, "world");
        assert_eq!(prompt.tags, vec!["a"]);
        assert!(vault.sync().check_integrity().unwrap().is_valid);
    }
}
