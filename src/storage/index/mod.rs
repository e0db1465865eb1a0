//! Relational index: `SQLite` tables derived from the prompt files.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `prompts` | One row per prompt, keyed by id and file path |
//! | `tags`, `prompt_tags` | Tag dictionary and links |
//! | `prompts_fts` | FTS5 entry per live prompt |
//! | `prompt_versions`, `branches` | Version ledger and branch heads |
//!
//! Row-level functions live in [`prompts`], [`tags`], and [`history`] and
//! take a plain [`Connection`], so services compose them inside one
//! [`SqliteIndex::transaction`] per logical mutation.

mod connection;
pub mod history;
pub mod prompts;
pub mod tags;

pub use connection::{acquire_lock, configure_connection};
pub use prompts::SyncRow;

use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

use crate::models::{
    Branch, IndexStats, ListFilter, Prompt, PromptVersion, SearchHit, TagCount,
};
use crate::storage::migrations::{MIGRATIONS, MigrationRunner};
use crate::{Error, Result};
use connection::record_operation_metrics;

/// `SQLite`-backed prompt index with FTS5 search.
pub struct SqliteIndex {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the `SQLite` database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteIndex {
    /// Opens (creating if needed) a file-backed index and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the database cannot be opened or migrated.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("create_index_dir", parent, &e))?;
        }
        let conn = Connection::open(&db_path).map_err(|e| Error::index("open_sqlite", e))?;
        Self::initialize(conn, Some(db_path))
    }

    /// Creates an in-memory index (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::index("open_sqlite_memory", e))?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        configure_connection(&conn);
        MigrationRunner::new(&conn).run(MIGRATIONS)?;
        tracing::debug!(db_path = ?db_path, "Opened prompt index");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Runs a read against the connection, recording metrics under `operation`.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error.
    pub fn read<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            f(&conn)
        };
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(operation, start, status);
        result
    }

    /// Runs `f` inside an immediate transaction: committed if `f` returns
    /// `Ok`, rolled back otherwise.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error, or [`Error::Index`] if the
    /// transaction cannot begin or commit.
    pub fn transaction<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = (|| {
            let mut conn = acquire_lock(&self.conn);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| Error::index("begin_transaction", e))?;
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| Error::index("commit_transaction", e))?;
            Ok(value)
        })();
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(operation, start, status);
        result
    }

    /// Looks a prompt up by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn get_prompt(&self, id: &str) -> Result<Option<Prompt>> {
        self.read("get_prompt", |conn| prompts::get(conn, id))
    }

    /// Looks a prompt up by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn get_prompt_by_name(&self, name: &str) -> Result<Option<Prompt>> {
        self.read("get_prompt_by_name", |conn| prompts::get_by_name(conn, name))
    }

    /// Lists prompts matching a filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn list_prompts(&self, filter: &ListFilter) -> Result<Vec<Prompt>> {
        self.read("list_prompts", |conn| prompts::list(conn, filter))
    }

    /// Full-text search over live prompts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    #[instrument(skip(self, query), fields(query_length = query.len(), limit = limit))]
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.read("search", |conn| prompts::search(conn, query, limit))
    }

    /// Reconciliation snapshot of live rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn sync_rows(&self) -> Result<Vec<SyncRow>> {
        self.read("sync_rows", prompts::sync_rows)
    }

    /// Tags in use with their counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn list_tags(&self) -> Result<Vec<TagCount>> {
        self.read("list_tags", tags::list_tags)
    }

    /// Row counts across the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn stats(&self) -> Result<IndexStats> {
        self.read("stats", prompts::stats)
    }

    /// Versions of a branch, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn list_versions(
        &self,
        prompt_id: &str,
        branch: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PromptVersion>> {
        self.read("list_versions", |conn| {
            history::list_versions(conn, prompt_id, branch, limit)
        })
    }

    /// One version of a branch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn get_version(
        &self,
        prompt_id: &str,
        branch: &str,
        version: u32,
    ) -> Result<Option<PromptVersion>> {
        self.read("get_version", |conn| {
            history::get_version(conn, prompt_id, branch, version)
        })
    }

    /// One branch pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn get_branch(&self, prompt_id: &str, name: &str) -> Result<Option<Branch>> {
        self.read("get_branch", |conn| history::get_branch(conn, prompt_id, name))
    }

    /// Branches of a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Index`] if the query fails.
    pub fn list_branches(&self, prompt_id: &str) -> Result<Vec<Branch>> {
        self.read("list_branches", |conn| history::list_branches(conn, prompt_id))
    }
}
