//! Reconciliation reports.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One file (or index row) that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    /// File path involved.
    pub path: PathBuf,
    /// Rendered error.
    pub message: String,
}

/// Outcome of a full reconciliation run.
///
/// Counts reflect progress actually applied even when `errors` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Files found on disk.
    pub files_scanned: usize,
    /// Files indexed for the first time.
    pub files_created: usize,
    /// Files whose hash changed since the last sync.
    pub files_updated: usize,
    /// Index rows dropped because their file disappeared.
    pub files_removed: usize,
    /// Per-item failures.
    pub errors: Vec<SyncError>,
}

impl SyncReport {
    /// Returns `true` if the run changed nothing in the index.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.files_created == 0 && self.files_updated == 0 && self.files_removed == 0
    }

    /// Returns `true` if every item reconciled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of a read-only integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// `true` iff all three lists are empty.
    pub is_valid: bool,
    /// Files on disk with no index row.
    pub missing_files: Vec<PathBuf>,
    /// Index rows whose file no longer exists.
    pub orphaned_db_records: Vec<PathBuf>,
    /// Index rows whose stored hash disagrees with the file.
    pub hash_mismatches: Vec<PathBuf>,
}

impl IntegrityReport {
    /// Builds a report, deriving `is_valid` from the lists.
    #[must_use]
    pub fn new(
        missing_files: Vec<PathBuf>,
        orphaned_db_records: Vec<PathBuf>,
        hash_mismatches: Vec<PathBuf>,
    ) -> Self {
        let is_valid =
            missing_files.is_empty() && orphaned_db_records.is_empty() && hash_mismatches.is_empty();
        Self {
            is_valid,
            missing_files,
            orphaned_db_records,
            hash_mismatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_report_validity() {
        assert!(IntegrityReport::new(Vec::new(), Vec::new(), Vec::new()).is_valid);
        let report = IntegrityReport::new(Vec::new(), vec![PathBuf::from("a.md")], Vec::new());
        assert!(!report.is_valid);
    }

    #[test]
    fn test_sync_report_noop() {
        let mut report = SyncReport {
            files_scanned: 4,
            ..SyncReport::default()
        };
        assert!(report.is_noop());
        report.files_removed = 1;
        assert!(!report.is_noop());
    }
}
