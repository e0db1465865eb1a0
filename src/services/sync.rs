//! Reconciler: brings the index in line with the prompt files.
//!
//! Each run walks `Scanning → Reconciling → Done`. Files are read and
//! hashed on a bounded set of blocking tasks, then applied in path order,
//! one transaction per file, so the same files always produce the same
//! index. A bad file only ever produces an entry in [`SyncReport::errors`].
//! Rows whose file vanished are dropped afterwards against the listing
//! taken at the start of the run; their version history stays behind.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::instrument;

use super::branch::{fork, validate_branch_name};
use super::shared::{Stores, run_bounded};
use crate::models::{
    DEFAULT_BRANCH, IntegrityReport, Prompt, PromptVersion, SyncError, SyncReport, normalize_tags,
};
use crate::storage::document::frontmatter::datetime_to_timestamp;
use crate::storage::index::{SyncRow, history, prompts};
use crate::storage::{ContentHasher, DocumentStore, PromptDocument};
use crate::{Error, Result};

/// What reconciling one file did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// First time the file was indexed.
    Created,
    /// The file changed, or moved, since it was last indexed.
    Updated,
    /// The file is gone and its row was dropped.
    Removed,
    /// Nothing to do.
    Unchanged,
}

/// Service reconciling prompt files with the index.
#[derive(Debug, Clone)]
pub struct SyncService {
    stores: Stores,
    concurrency: usize,
}

impl SyncService {
    /// Creates a sync service working on up to `concurrency` files at once.
    #[must_use]
    pub fn new(stores: Stores, concurrency: usize) -> Self {
        Self {
            stores,
            concurrency: concurrency.max(1),
        }
    }

    /// Reconciles every prompt file with the index.
    ///
    /// When two files claim the same id, the one already indexed keeps it;
    /// otherwise the first in path order does. The other is reported.
    ///
    /// # Errors
    ///
    /// Only fails if the directory listing or the index snapshot cannot be
    /// loaded. Per-file failures are reported in [`SyncReport::errors`] and
    /// never undo the progress of other files.
    #[instrument(skip(self), fields(operation = "sync.full"))]
    pub fn full_sync(&self) -> Result<SyncReport> {
        let start = Instant::now();
        let result = self.run_full_sync();

        let status = match &result {
            Ok(report) if report.is_clean() => "success",
            Ok(_) => "partial",
            Err(_) => "error",
        };
        metrics::counter!("promptvault_sync_total", "status" => status).increment(1);
        metrics::histogram!("promptvault_sync_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        result
    }

    fn run_full_sync(&self) -> Result<SyncReport> {
        tracing::debug!(phase = "scanning", "Sync started");
        let mut files = self.stores.documents.list_prompts()?;
        files.sort();
        let snapshot: HashMap<PathBuf, SyncRow> = self
            .stores
            .index
            .sync_rows()?
            .into_iter()
            .map(|row| (row.file_path.clone(), row))
            .collect();
        let on_disk: HashSet<PathBuf> = files.iter().cloned().collect();

        let mut report = SyncReport {
            files_scanned: files.len(),
            ..SyncReport::default()
        };

        tracing::debug!(
            phase = "reconciling",
            files = files.len(),
            indexed = snapshot.len(),
            "Reconciling files"
        );
        let documents = Arc::clone(&self.stores.documents);
        let loaded = run_bounded(
            files.clone(),
            self.concurrency,
            move |path| load(documents.as_ref(), path),
            |_| Err(panicked("read_prompt")),
        )?;
        for (path, loaded) in files.iter().zip(loaded) {
            let outcome = loaded
                .and_then(|(doc, hash)| self.reconcile(&doc, &hash, snapshot.get(path)));
            match outcome {
                Ok(FileOutcome::Created) => report.files_created += 1,
                Ok(FileOutcome::Updated) => report.files_updated += 1,
                Ok(FileOutcome::Unchanged | FileOutcome::Removed) => {},
                Err(e) => report.errors.push(sync_error(path, &e)),
            }
        }

        // Renames above moved rows onto live paths, so orphans are read
        // after the per-file phase but judged against the opening listing.
        let orphans: Vec<SyncRow> = self
            .stores
            .index
            .sync_rows()?
            .into_iter()
            .filter(|row| !on_disk.contains(&row.file_path))
            .collect();
        let index = Arc::clone(&self.stores.index);
        let removals = run_bounded(
            orphans.clone(),
            self.concurrency,
            move |row| {
                index.transaction("remove_orphan", |tx| prompts::delete(tx, &row.id))
            },
            |_| Err(panicked("remove_orphan")),
        )?;
        for (row, removal) in orphans.iter().zip(removals) {
            match removal {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {},
                Err(e) => report.errors.push(sync_error(&row.file_path, &e)),
            }
        }

        for error in &report.errors {
            tracing::warn!(path = %error.path.display(), error = %error.message, "Failed to reconcile");
        }
        tracing::info!(
            phase = "done",
            scanned = report.files_scanned,
            created = report.files_created,
            updated = report.files_updated,
            removed = report.files_removed,
            errors = report.errors.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Reconciles a single file.
    ///
    /// A path that no longer exists drops the row that pointed at it,
    /// keeping its history.
    ///
    /// # Errors
    ///
    /// Returns the parse, storage, or index error that stopped the file from
    /// being reconciled.
    #[instrument(skip(self), fields(operation = "sync.file", path = %path.display()))]
    pub fn sync_file(&self, path: &Path) -> Result<FileOutcome> {
        if !self.stores.documents.exists(path) {
            let removed = self.stores.index.transaction("remove_orphan", |tx| {
                match prompts::get_by_path(tx, path)? {
                    Some(row) if !row.archived => prompts::delete(tx, &row.id),
                    _ => Ok(false),
                }
            })?;
            if removed {
                tracing::info!("Dropped index row of missing file");
                return Ok(FileOutcome::Removed);
            }
            return Ok(FileOutcome::Unchanged);
        }
        let (doc, hash) = load(self.stores.documents.as_ref(), path)?;
        self.reconcile(&doc, &hash, None)
    }

    /// Compares files and index without changing either.
    ///
    /// # Errors
    ///
    /// Fails if the directory listing or the index snapshot cannot be
    /// loaded. A file that cannot be read or parsed counts as a hash
    /// mismatch.
    #[instrument(skip(self), fields(operation = "sync.check_integrity"))]
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let files = self.stores.documents.list_prompts()?;
        let rows = self.stores.index.sync_rows()?;
        let on_disk: HashSet<&Path> = files.iter().map(PathBuf::as_path).collect();
        let indexed: HashSet<&Path> = rows.iter().map(|r| r.file_path.as_path()).collect();

        let missing_files: Vec<PathBuf> = files
            .iter()
            .filter(|path| !indexed.contains(path.as_path()))
            .cloned()
            .collect();

        let (present, absent): (Vec<SyncRow>, Vec<SyncRow>) = rows
            .iter()
            .cloned()
            .partition(|row| on_disk.contains(row.file_path.as_path()));
        let orphaned_db_records: Vec<PathBuf> =
            absent.into_iter().map(|row| row.file_path).collect();

        let documents = Arc::clone(&self.stores.documents);
        let checks = run_bounded(
            present,
            self.concurrency,
            move |row| {
                let matches = load(documents.as_ref(), &row.file_path)
                    .is_ok_and(|(_, hash)| hash == row.content_hash);
                (!matches).then(|| row.file_path.clone())
            },
            |row| Some(row.file_path.clone()),
        )?;
        let hash_mismatches: Vec<PathBuf> = checks.into_iter().flatten().collect();

        let report = IntegrityReport::new(missing_files, orphaned_db_records, hash_mismatches);
        tracing::info!(
            valid = report.is_valid,
            missing = report.missing_files.len(),
            orphaned = report.orphaned_db_records.len(),
            mismatched = report.hash_mismatches.len(),
            "Integrity check finished"
        );
        Ok(report)
    }

    /// Reconciles one loaded file. `known` is the row the start-of-run
    /// snapshot holds for this path, used to skip unchanged files without a
    /// transaction.
    fn reconcile(&self, doc: &PromptDocument, hash: &str, known: Option<&SyncRow>) -> Result<FileOutcome> {
        let id = doc.id();
        if let Some(row) = known
            && row.id == id
            && row.content_hash == hash
        {
            return Ok(FileOutcome::Unchanged);
        }

        let outcome = self
            .stores
            .index
            .transaction("reconcile_file", |tx| self.apply(tx, doc, &id, hash))?;

        let path = doc.path.display();
        match outcome {
            FileOutcome::Created => {
                tracing::debug!(path = %path, prompt_id = %id, "Indexed new file");
            },
            FileOutcome::Updated => {
                tracing::debug!(path = %path, prompt_id = %id, "Reindexed changed file");
            },
            FileOutcome::Unchanged | FileOutcome::Removed => {},
        }
        Ok(outcome)
    }

    fn apply(
        &self,
        tx: &rusqlite::Connection,
        doc: &PromptDocument,
        id: &str,
        hash: &str,
    ) -> Result<FileOutcome> {
        let path = doc.path.as_path();

        // Another prompt used to live at this path: the file now claims a
        // different id, so the old row goes and its history stays.
        if let Some(previous) = prompts::get_by_path(tx, path)?
            && previous.id != id
        {
            prompts::delete(tx, &previous.id)?;
        }

        let existing = prompts::get(tx, id)?;
        if let Some(row) = &existing {
            if row.file_path != path
                && !row.archived
                && self.stores.documents.exists(&row.file_path)
            {
                return Err(Error::InvalidInput(format!(
                    "duplicate prompt id {id}: also used by {}",
                    row.file_path.display()
                )));
            }
            if row.file_path == path && row.content_hash == hash && !row.archived {
                return Ok(FileOutcome::Unchanged);
            }
        }

        let branch = doc.branch();
        let now = crate::current_timestamp();
        let reason = if existing.is_some() {
            "external edit"
        } else {
            "imported from file"
        };

        // Only a body that differs from the branch head is a new version;
        // header edits and moves update the row in place.
        let mut created = 0_u64;
        let head = match branch_head(tx, id, &branch)? {
            Some(head) => head,
            None => {
                created += start_branch(tx, doc, id, &branch, now)?;
                branch_head(tx, id, &branch)?.ok_or_else(|| Error::BranchNotFound {
                    prompt_id: id.to_string(),
                    branch: branch.clone(),
                })?
            },
        };
        let version = if head.content_hash == ContentHasher::hash(&doc.body) {
            head.version
        } else {
            created += 1;
            history::append_version(tx, id, &branch, &doc.body, Some(reason), now)?.version
        };

        let metadata = &doc.metadata;
        let prompt = Prompt {
            id: id.to_string(),
            name: doc.name(),
            content: doc.body.clone(),
            description: metadata.description.clone(),
            tags: normalize_tags(&metadata.tags),
            is_template: metadata.is_template,
            is_favorite: metadata.is_favorite,
            is_pinned: metadata.is_pinned,
            favorite_order: metadata.favorite_order,
            pin_order: metadata.pin_order,
            created_at: existing
                .as_ref()
                .map(|row| row.created_at)
                .or_else(|| metadata.created.as_ref().map(datetime_to_timestamp))
                .unwrap_or(now),
            updated_at: metadata.updated.as_ref().map_or(now, datetime_to_timestamp),
            version,
            branch,
            content_hash: hash.to_string(),
            file_path: path.to_path_buf(),
            archived: false,
        };
        prompts::save(tx, &prompt)?;

        if created > 0 {
            metrics::counter!("promptvault_versions_created_total", "source" => "sync")
                .increment(created);
        }
        if existing.is_some() {
            Ok(FileOutcome::Updated)
        } else {
            Ok(FileOutcome::Created)
        }
    }
}

/// Creates the branch a file names when it has no pointer yet. History
/// always starts on `main`, which records the body as its first version
/// if it is missing; any other branch is forked from it. Returns the
/// number of versions appended.
fn start_branch(
    tx: &rusqlite::Connection,
    doc: &PromptDocument,
    id: &str,
    branch: &str,
    now: u64,
) -> Result<u64> {
    let mut created = 0;
    if history::get_branch(tx, id, DEFAULT_BRANCH)?.is_none() {
        history::append_version(tx, id, DEFAULT_BRANCH, &doc.body, Some("imported from file"), now)?;
        created += 1;
    }
    if branch != DEFAULT_BRANCH {
        validate_branch_name(branch)?;
        fork(tx, id, branch, DEFAULT_BRANCH)?;
        tracing::debug!(prompt_id = id, branch, "Forked branch named by file");
    }
    Ok(created)
}

/// Head version of a branch, `None` if the branch has no pointer.
fn branch_head(conn: &rusqlite::Connection, prompt_id: &str, branch: &str) -> Result<Option<PromptVersion>> {
    match history::get_branch(conn, prompt_id, branch)? {
        Some(pointer) => history::get_version(conn, prompt_id, branch, pointer.head_version),
        None => Ok(None),
    }
}

/// Reads and hashes a file.
fn load(documents: &dyn DocumentStore, path: &Path) -> Result<(PromptDocument, String)> {
    let doc = documents.read_prompt(path)?;
    let hash = doc.content_hash()?;
    Ok((doc, hash))
}

fn sync_error(path: &Path, err: &Error) -> SyncError {
    SyncError {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn panicked(operation: &str) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: "task panicked".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreatePromptRequest, DEFAULT_BRANCH};
    use crate::services::PromptVault;
    use crate::storage::{DocumentStore, PromptMetadata};

    fn write_file(vault: &PromptVault, stem: &str, name: &str, body: &str) -> PathBuf {
        let path = vault.documents().path_for(stem);
        let metadata = PromptMetadata {
            name: Some(name.to_string()),
            tags: vec!["t".to_string(), "t".to_string()],
            ..PromptMetadata::default()
        };
        vault
            .documents()
            .write_prompt(&path, &metadata, body)
            .unwrap();
        path
    }

    #[test]
    fn test_full_sync_imports_new_files() {
        let vault = PromptVault::in_memory().unwrap();
        let path = write_file(&vault, "hello", "Hello", "Hi there");

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.files_created, 1);
        assert!(report.is_clean());

        let prompt = vault.prompts().get_by_name("Hello").unwrap();
        assert_eq!(prompt.file_path, path);
        assert_eq!(prompt.tags, vec!["t"]);
        assert_eq!(prompt.version, 1);
        assert_eq!(prompt.branch, DEFAULT_BRANCH);
    }

    #[test]
    fn test_second_sync_is_noop() {
        let vault = PromptVault::in_memory().unwrap();
        write_file(&vault, "a", "A", "one");
        vault.prompts().create(CreatePromptRequest::new("B", "two")).unwrap();

        let first = vault.sync().full_sync().unwrap();
        assert_eq!(first.files_created, 1);
        let second = vault.sync().full_sync().unwrap();
        assert!(second.is_noop());
        assert_eq!(second.files_scanned, 2);
    }

    #[test]
    fn test_external_edit_appends_version() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault.prompts().create(CreatePromptRequest::new("foo", "Hello")).unwrap();
        let doc = vault.documents().read_prompt(&prompt.file_path).unwrap();
        vault
            .documents()
            .write_prompt(&prompt.file_path, &doc.metadata, "Hello\nWorld")
            .unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_updated, 1);

        let reloaded = vault.prompts().get_by_id(&prompt.id).unwrap();
        assert_eq!(reloaded.version, 2);
        assert_eq!(reloaded.content, "Hello\nWorld");
        let v2 = vault.versions().get_version(&prompt.id, 2, DEFAULT_BRANCH).unwrap();
        assert_eq!(v2.change_reason.as_deref(), Some("external edit"));
    }

    #[test]
    fn test_removed_file_keeps_history() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault.prompts().create(CreatePromptRequest::new("foo", "Hello")).unwrap();
        vault.documents().remove(&prompt.file_path).unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_removed, 1);
        assert!(vault.prompts().get_by_id(&prompt.id).unwrap_err().is_not_found());
        assert_eq!(
            vault
                .versions()
                .list_versions(&prompt.id, None, DEFAULT_BRANCH)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_rename_updates_path() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault.prompts().create(CreatePromptRequest::new("foo", "Hello")).unwrap();
        let text = vault.documents().read_raw(&prompt.file_path).unwrap();
        let moved = vault.documents().path_for("moved");
        vault.documents().write_raw(&moved, &text).unwrap();
        vault.documents().remove(&prompt.file_path).unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_updated, 1);
        assert_eq!(report.files_removed, 0);

        let reloaded = vault.prompts().get_by_id(&prompt.id).unwrap();
        assert_eq!(reloaded.file_path, moved);
        assert_eq!(reloaded.version, 1);
    }

    #[test]
    fn test_malformed_file_is_isolated() {
        let vault = PromptVault::in_memory().unwrap();
        write_file(&vault, "good", "Good", "fine");
        let bad = vault.documents().path_for("bad");
        vault
            .documents()
            .write_raw(&bad, "---\nname: [unclosed\n---\nbody")
            .unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_created, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, bad);
    }

    #[test]
    fn test_duplicate_id_is_reported() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault.prompts().create(CreatePromptRequest::new("foo", "Hello")).unwrap();
        let text = vault.documents().read_raw(&prompt.file_path).unwrap();
        let copy = vault.documents().path_for("copy");
        vault.documents().write_raw(&copy, &text).unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, copy);
        assert_eq!(vault.prompts().get_by_id(&prompt.id).unwrap().file_path, prompt.file_path);
    }

    #[test]
    fn test_header_only_edit_keeps_version() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault.prompts().create(CreatePromptRequest::new("foo", "Hello")).unwrap();
        let mut doc = vault.documents().read_prompt(&prompt.file_path).unwrap();
        doc.metadata.tags = vec!["fresh".to_string()];
        vault
            .documents()
            .write_prompt(&prompt.file_path, &doc.metadata, &doc.body)
            .unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_updated, 1);

        let reloaded = vault.prompts().get_by_id(&prompt.id).unwrap();
        assert_eq!(reloaded.tags, vec!["fresh"]);
        assert_eq!(reloaded.version, 1);
        let versions = vault
            .versions()
            .list_versions(&prompt.id, None, DEFAULT_BRANCH)
            .unwrap();
        assert_eq!(versions.len(), 1);
        assert!(vault.sync().check_integrity().unwrap().is_valid);
    }

    #[test]
    fn test_import_naming_a_branch_starts_from_main() {
        let vault = PromptVault::in_memory().unwrap();
        let path = vault.documents().path_for("draft");
        let metadata = PromptMetadata {
            name: Some("Draft".to_string()),
            branch: Some("dev".to_string()),
            ..PromptMetadata::default()
        };
        vault.documents().write_prompt(&path, &metadata, "text").unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_created, 1);

        let prompt = vault.prompts().get_by_name("Draft").unwrap();
        assert_eq!(prompt.branch, "dev");
        assert_eq!(prompt.version, 1);
        let branches: Vec<(String, Option<String>)> = vault
            .branches()
            .list(&prompt.id)
            .unwrap()
            .into_iter()
            .map(|b| (b.name, b.parent_branch))
            .collect();
        assert!(branches.contains(&(DEFAULT_BRANCH.to_string(), None)));
        assert!(branches.contains(&("dev".to_string(), Some(DEFAULT_BRANCH.to_string()))));

        vault.branches().create(&prompt.id, "feature", DEFAULT_BRANCH).unwrap();
    }

    #[test]
    fn test_import_with_invalid_branch_is_reported() {
        let vault = PromptVault::in_memory().unwrap();
        let path = vault.documents().path_for("bad-branch");
        let metadata = PromptMetadata {
            name: Some("Bad".to_string()),
            branch: Some("a/b".to_string()),
            ..PromptMetadata::default()
        };
        vault.documents().write_prompt(&path, &metadata, "text").unwrap();

        let report = vault.sync().full_sync().unwrap();
        assert_eq!(report.files_created, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(vault.prompts().get_by_name("Bad").is_err());
    }

    #[test]
    fn test_duplicate_new_ids_resolve_in_path_order() {
        for _ in 0..3 {
            let vault = PromptVault::in_memory().unwrap();
            let metadata = PromptMetadata {
                id: Some("shared-id".to_string()),
                name: Some("Shared".to_string()),
                ..PromptMetadata::default()
            };
            let later = vault.documents().path_for("b-copy");
            let first = vault.documents().path_for("a-original");
            vault.documents().write_prompt(&later, &metadata, "two").unwrap();
            vault.documents().write_prompt(&first, &metadata, "one").unwrap();

            let report = vault.sync().full_sync().unwrap();
            assert_eq!(report.files_created, 1);
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].path, later);
            assert_eq!(vault.prompts().get_by_id("shared-id").unwrap().file_path, first);
        }
    }

    #[test]
    fn test_sync_file_single_path() {
        let vault = PromptVault::in_memory().unwrap();
        let path = write_file(&vault, "one", "One", "1");

        assert_eq!(vault.sync().sync_file(&path).unwrap(), FileOutcome::Created);
        assert_eq!(vault.sync().sync_file(&path).unwrap(), FileOutcome::Unchanged);

        vault.documents().remove(&path).unwrap();
        assert_eq!(vault.sync().sync_file(&path).unwrap(), FileOutcome::Removed);
        assert!(vault.prompts().get_by_name("One").is_err());
    }

    #[test]
    fn test_check_integrity_reports_each_kind() {
        let vault = PromptVault::in_memory().unwrap();
        let kept = vault.prompts().create(CreatePromptRequest::new("kept", "a")).unwrap();
        let gone = vault.prompts().create(CreatePromptRequest::new("gone", "b")).unwrap();
        let loose = write_file(&vault, "loose", "Loose", "c");
        vault.documents().remove(&gone.file_path).unwrap();
        let doc = vault.documents().read_prompt(&kept.file_path).unwrap();
        vault
            .documents()
            .write_prompt(&kept.file_path, &doc.metadata, "edited")
            .unwrap();

        let report = vault.sync().check_integrity().unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.missing_files, vec![loose]);
        assert_eq!(report.orphaned_db_records, vec![gone.file_path]);
        assert_eq!(report.hash_mismatches, vec![kept.file_path]);

        vault.sync().full_sync().unwrap();
        assert!(vault.sync().check_integrity().unwrap().is_valid);
    }
}
