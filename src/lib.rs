//! # Promptvault
//!
//! A file-backed prompt library with a derived `SQLite` index.
//!
//! Every prompt lives in its own Markdown file with a YAML front matter
//! header. The files are the source of truth; the `SQLite` database holds a
//! rebuildable index (metadata rows, a tag dictionary, an FTS5 search table)
//! plus the version history and branch pointers layered on top of each
//! prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────────────┐
//! │ PromptService│──▶│ DocumentStore │   │ SqliteIndex          │
//! │  (facade)    │──▶│  *.md files   │   │ prompts / tags / FTS │
//! └──────┬───────┘   └───────▲───────┘   │ versions / branches  │
//!        │                   │           └──────────▲───────────┘
//!        ▼                   │                      │
//! ┌──────────────┐   ┌───────┴───────┐              │
//! │VersionService│   │  SyncService  │──────────────┘
//! │BranchService │   │ (reconciler)  │
//! └──────────────┘   └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use promptvault::{CreatePromptRequest, PromptVault, VaultConfig};
//!
//! let vault = PromptVault::open(&VaultConfig::new().with_root("./library"))?;
//! let prompt = vault.prompts().create(CreatePromptRequest::new("review", "Review this diff"))?;
//! let report = vault.sync().full_sync()?;
//! assert_eq!(report.files_created, 0);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::VaultConfig;
pub use models::{
    Branch, BranchComparison, CreatePromptRequest, IntegrityReport, ListFilter, Prompt,
    PromptVersion, SearchHit, SyncError, SyncReport, UpdatePromptRequest, VersionDiff,
};
pub use services::{BranchService, PromptService, PromptVault, SyncService, VersionService};
pub use storage::{DocumentStore, FilesystemDocumentStore, MemoryDocumentStore, SqliteIndex};

/// Error type for prompt store operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty names, bad branch names, deleting `main` |
/// | `NotFound` | Prompt or tag absent from the index |
/// | `VersionNotFound` | Diff or rollback against a missing version |
/// | `BranchNotFound` | Switch, compare, merge, or delete of a missing branch |
/// | `NameConflict` | Creating or renaming onto a taken prompt name |
/// | `BranchAlreadyExists` | Creating a branch whose name is taken |
/// | `MergeConflict` | Target branch diverged from the source |
/// | `Parse` | Malformed front matter in a prompt file |
/// | `StorageIo` | Filesystem failures in the document store |
/// | `Index` | `SQLite` failures in the index |
/// | `OperationFailed` | Bad config values, logging set up twice |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A prompt or tag does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// What was looked up (`prompt`, `tag`).
        kind: &'static str,
        /// The id or name that was looked up.
        key: String,
    },

    /// A version does not exist on the given branch.
    #[error("version {version} of prompt {prompt_id} not found on branch '{branch}'")]
    VersionNotFound {
        /// The prompt id.
        prompt_id: String,
        /// The branch searched.
        branch: String,
        /// The missing version number.
        version: u32,
    },

    /// A branch does not exist.
    #[error("branch '{branch}' not found for prompt {prompt_id}")]
    BranchNotFound {
        /// The prompt id.
        prompt_id: String,
        /// The missing branch name.
        branch: String,
    },

    /// A prompt with this name already exists.
    #[error("a prompt named '{name}' already exists")]
    NameConflict {
        /// The conflicting name.
        name: String,
    },

    /// A branch with this name already exists.
    #[error("branch '{branch}' already exists for prompt {prompt_id}")]
    BranchAlreadyExists {
        /// The prompt id.
        prompt_id: String,
        /// The taken branch name.
        branch: String,
    },

    /// The target branch diverged, so no fast-forward is possible.
    ///
    /// Carries both head contents so the caller can resolve by hand.
    #[error("cannot fast-forward '{target_branch}' to '{source_branch}': branches diverged")]
    MergeConflict {
        /// Branch being merged from.
        source_branch: String,
        /// Branch being merged into.
        target_branch: String,
        /// Head content of the source branch.
        source_content: String,
        /// Head content of the target branch.
        target_content: String,
    },

    /// A prompt file has a malformed header.
    #[error("failed to parse {}: {cause}", path.display())]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// What was wrong with it.
        cause: String,
    },

    /// A filesystem operation failed.
    #[error("storage operation '{operation}' failed for {}: {cause}", path.display())]
    StorageIo {
        /// The operation that failed.
        operation: String,
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying cause.
        cause: String,
    },

    /// An index (database) operation failed.
    #[error("index operation '{operation}' failed: {cause}")]
    Index {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Configuration or logging set-up failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns `true` for the not-found family of errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::VersionNotFound { .. } | Self::BranchNotFound { .. }
        )
    }

    /// Returns `true` for name, branch, and merge conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::NameConflict { .. } | Self::BranchAlreadyExists { .. } | Self::MergeConflict { .. }
        )
    }

    /// Builds a [`Error::NotFound`] for a prompt id or name.
    pub fn prompt_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "prompt",
            key: key.into(),
        }
    }

    /// Wraps an I/O error with the operation and path it came from.
    pub fn io(operation: &str, path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::StorageIo {
            operation: operation.to_string(),
            path: path.into(),
            cause: err.to_string(),
        }
    }

    /// Wraps an index failure with the operation it came from.
    pub fn index(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Index {
            operation: operation.to_string(),
            cause: err.to_string(),
        }
    }
}

/// Result type alias for prompt store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::Index {
            operation: "insert_prompt".to_string(),
            cause: "disk I/O error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "index operation 'insert_prompt' failed: disk I/O error"
        );

        let err = Error::prompt_not_found("abc");
        assert_eq!(err.to_string(), "prompt not found: abc");
    }

    #[test]
    fn test_error_categories() {
        assert!(
            Error::BranchNotFound {
                prompt_id: "p".to_string(),
                branch: "dev".to_string(),
            }
            .is_not_found()
        );
        assert!(
            Error::NameConflict {
                name: "foo".to_string()
            }
            .is_conflict()
        );
        assert!(!Error::InvalidInput(String::new()).is_conflict());
    }
}
