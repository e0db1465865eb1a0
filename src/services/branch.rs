//! Branch manager: named lines of history per prompt.
//!
//! A new branch starts with a copy of its source's versions, so every
//! branch head points at a version row of its own branch. Merges are
//! fast-forward or conflict; there is no three-way merge.

use tracing::instrument;

use super::diff::line_diff;
use super::shared::Stores;
use crate::models::{Branch, BranchComparison, DEFAULT_BRANCH, MergeOutcome, Prompt, PromptVersion};
use crate::storage::index::{history, prompts};
use crate::{Error, Result};

/// Maximum length of a branch name, in characters.
pub const MAX_BRANCH_NAME_LENGTH: usize = 100;

/// Validates a branch name.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for empty, padded, overlong names and
/// names containing `/`, `..`, or control characters.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput(
            "branch name must not be empty".to_string(),
        ));
    }
    if name.trim() != name {
        return Err(Error::InvalidInput(
            "branch name must not have leading or trailing whitespace".to_string(),
        ));
    }
    if name.chars().count() > MAX_BRANCH_NAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "branch name must not exceed {MAX_BRANCH_NAME_LENGTH} characters"
        )));
    }
    if name.contains('/') || name.contains("..") || name.chars().any(char::is_control) {
        return Err(Error::InvalidInput(format!(
            "branch name '{name}' contains forbidden characters"
        )));
    }
    Ok(())
}

fn branch_not_found(prompt_id: &str, branch: &str) -> Error {
    Error::BranchNotFound {
        prompt_id: prompt_id.to_string(),
        branch: branch.to_string(),
    }
}

/// Loads the head version of a branch.
fn head_of(conn: &rusqlite::Connection, prompt_id: &str, branch: &str) -> Result<PromptVersion> {
    let pointer =
        history::get_branch(conn, prompt_id, branch)?.ok_or_else(|| branch_not_found(prompt_id, branch))?;
    history::get_version(conn, prompt_id, branch, pointer.head_version)?.ok_or_else(|| {
        Error::VersionNotFound {
            prompt_id: prompt_id.to_string(),
            branch: branch.to_string(),
            version: pointer.head_version,
        }
    })
}

/// Starts branch `name` at the head of `from_branch`: copies the source's
/// history, inserts the pointer, and records the fork as the pair's merge
/// base. Runs inside the caller's transaction.
pub(super) fn fork(
    conn: &rusqlite::Connection,
    prompt_id: &str,
    name: &str,
    from_branch: &str,
) -> Result<Branch> {
    let source = history::get_branch(conn, prompt_id, from_branch)?
        .ok_or_else(|| branch_not_found(prompt_id, from_branch))?;
    if history::get_branch(conn, prompt_id, name)?.is_some() {
        return Err(Error::BranchAlreadyExists {
            prompt_id: prompt_id.to_string(),
            branch: name.to_string(),
        });
    }
    // Version numbers are never reused, so a deleted branch's name stays
    // taken while its rows remain.
    if history::max_version(conn, prompt_id, name)? > 0 {
        return Err(Error::InvalidInput(format!(
            "branch name '{name}' still has history from a deleted branch"
        )));
    }

    history::copy_versions(conn, prompt_id, from_branch, name, source.head_version)?;
    let branch = Branch {
        name: name.to_string(),
        prompt_id: prompt_id.to_string(),
        head_version: source.head_version,
        parent_branch: Some(from_branch.to_string()),
        created_at: crate::current_timestamp(),
    };
    history::insert_branch(conn, &branch)?;
    history::record_merge_base(
        conn,
        prompt_id,
        (from_branch, source.head_version),
        (name, source.head_version),
    )?;
    Ok(branch)
}

/// Service for creating, switching, comparing, merging, and deleting branches.
#[derive(Debug, Clone)]
pub struct BranchService {
    stores: Stores,
}

impl BranchService {
    /// Creates a branch service over shared stores.
    #[must_use]
    pub const fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Creates branch `name` from the head of `from_branch`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for a bad name, or a name whose earlier
    ///   history is still in the ledger
    /// - [`Error::NotFound`] for an unknown prompt
    /// - [`Error::BranchNotFound`] if `from_branch` does not exist
    /// - [`Error::BranchAlreadyExists`] if `name` is taken
    #[instrument(skip(self), fields(operation = "branch.create"))]
    pub fn create(&self, prompt_id: &str, name: &str, from_branch: &str) -> Result<Branch> {
        validate_branch_name(name)?;

        let branch = self.stores.index.transaction("create_branch", |tx| {
            prompts::get(tx, prompt_id)?.ok_or_else(|| Error::prompt_not_found(prompt_id))?;
            fork(tx, prompt_id, name, from_branch)
        })?;

        tracing::info!(prompt_id, branch = name, from = from_branch, "Created branch");
        Ok(branch)
    }

    /// Makes `name` the prompt's current branch.
    ///
    /// The file and row take the branch head's content; no version is
    /// appended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BranchNotFound`] if the branch does not exist.
    #[instrument(skip(self), fields(operation = "branch.switch"))]
    pub fn switch(&self, prompt_id: &str, name: &str) -> Result<Prompt> {
        let prompt = self.stores.index.transaction("switch_branch", |tx| {
            let mut prompt =
                prompts::get(tx, prompt_id)?.ok_or_else(|| Error::prompt_not_found(prompt_id))?;
            self.stores.checkout(tx, &mut prompt, name)?;
            Ok(prompt)
        })?;

        tracing::info!(prompt_id, branch = name, version = prompt.version, "Switched branch");
        Ok(prompt)
    }

    /// Branches of a prompt, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an index error if the query fails.
    pub fn list(&self, prompt_id: &str) -> Result<Vec<Branch>> {
        self.stores.index.list_branches(prompt_id)
    }

    /// The branch edits currently land on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown prompt.
    pub fn current(&self, prompt_id: &str) -> Result<Branch> {
        let prompt = self.stores.require_prompt(prompt_id)?;
        self.stores
            .index
            .get_branch(prompt_id, &prompt.branch)?
            .ok_or_else(|| branch_not_found(prompt_id, &prompt.branch))
    }

    /// Compares the heads of two branches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BranchNotFound`] if either branch does not exist.
    pub fn compare(&self, prompt_id: &str, branch_a: &str, branch_b: &str) -> Result<BranchComparison> {
        let (head_a, head_b) = self.stores.index.read("compare_branches", |conn| {
            Ok((head_of(conn, prompt_id, branch_a)?, head_of(conn, prompt_id, branch_b)?))
        })?;

        Ok(BranchComparison {
            branch_a: branch_a.to_string(),
            head_a: head_a.version,
            branch_b: branch_b.to_string(),
            head_b: head_b.version,
            diff: line_diff(&head_a.content, &head_b.content),
        })
    }

    /// Fast-forwards `target` to the head content of `source`.
    ///
    /// The merge is allowed only while the target head is still the version
    /// recorded at the pair's merge base (the fork, or the last merge), so
    /// any target edit since then conflicts, including one that restores
    /// older content. The source head is appended as a new target version.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] when `source` and `target` are the same
    /// - [`Error::BranchNotFound`] if either branch does not exist
    /// - [`Error::MergeConflict`] if the branches diverged
    #[instrument(skip(self), fields(operation = "branch.merge"))]
    pub fn merge(&self, prompt_id: &str, source: &str, target: &str) -> Result<MergeOutcome> {
        if source == target {
            return Err(Error::InvalidInput(format!(
                "cannot merge branch '{source}' into itself"
            )));
        }

        let outcome = self.stores.index.transaction("merge_branches", |tx| {
            let source_head = head_of(tx, prompt_id, source)?;
            let target_head = head_of(tx, prompt_id, target)?;

            if source_head.content_hash == target_head.content_hash {
                history::record_merge_base(
                    tx,
                    prompt_id,
                    (target, target_head.version),
                    (source, source_head.version),
                )?;
                return Ok(MergeOutcome::UpToDate {
                    head_version: target_head.version,
                });
            }

            let target_unchanged = history::merge_base(tx, prompt_id, target, source)?
                .is_some_and(|(base, _)| base == target_head.version);
            if !target_unchanged {
                return Err(Error::MergeConflict {
                    source_branch: source.to_string(),
                    target_branch: target.to_string(),
                    source_content: source_head.content,
                    target_content: target_head.content,
                });
            }

            let now = crate::current_timestamp();
            let reason = format!("Merge branch '{source}' into '{target}'");
            let version =
                history::append_version(tx, prompt_id, target, &source_head.content, Some(&reason), now)?;
            history::record_merge_base(
                tx,
                prompt_id,
                (target, version.version),
                (source, source_head.version),
            )?;

            if let Some(mut prompt) = prompts::get(tx, prompt_id)?
                && prompt.branch == target
            {
                prompt.content = version.content.clone();
                prompt.version = version.version;
                prompt.updated_at = now;
                self.stores.persist(tx, &mut prompt)?;
            }
            Ok(MergeOutcome::FastForward { version })
        });

        match &outcome {
            Ok(MergeOutcome::FastForward { version }) => {
                metrics::counter!("promptvault_versions_created_total", "source" => "merge")
                    .increment(1);
                tracing::info!(prompt_id, source, target, version = version.version, "Merged branch");
            },
            Ok(MergeOutcome::UpToDate { .. }) => {
                tracing::debug!(prompt_id, source, target, "Branches already identical");
            },
            Err(Error::MergeConflict { .. }) => {
                metrics::counter!("promptvault_merge_conflicts_total").increment(1);
                tracing::warn!(prompt_id, source, target, "Merge conflict");
            },
            Err(_) => {},
        }
        outcome
    }

    /// Deletes a branch pointer. Its versions stay in the ledger.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for `main` or the prompt's current branch
    /// - [`Error::BranchNotFound`] if the branch does not exist
    #[instrument(skip(self), fields(operation = "branch.delete"))]
    pub fn delete(&self, prompt_id: &str, name: &str) -> Result<()> {
        if name == DEFAULT_BRANCH {
            return Err(Error::InvalidInput(format!(
                "the '{DEFAULT_BRANCH}' branch cannot be deleted"
            )));
        }

        self.stores.index.transaction("delete_branch", |tx| {
            if let Some(prompt) = prompts::get(tx, prompt_id)?
                && prompt.branch == name
            {
                return Err(Error::InvalidInput(format!(
                    "branch '{name}' is current; switch away before deleting it"
                )));
            }
            if history::delete_branch(tx, prompt_id, name)? {
                Ok(())
            } else {
                Err(branch_not_found(prompt_id, name))
            }
        })?;

        tracing::info!(prompt_id, branch = name, "Deleted branch");
        Ok(())
    }
}
