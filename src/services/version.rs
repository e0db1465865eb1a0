//! Version ledger: append-only content history per prompt and branch.

use tracing::instrument;

use super::diff::line_diff;
use super::shared::Stores;
use crate::models::{DEFAULT_BRANCH, PromptVersion, VersionDiff};
use crate::storage::index::{history, prompts};
use crate::{Error, Result};

/// Service for version history, diffs, and rollbacks.
#[derive(Debug, Clone)]
pub struct VersionService {
    stores: Stores,
}

impl VersionService {
    /// Creates a version service over shared stores.
    #[must_use]
    pub const fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Appends `content` as the next version of `branch`.
    ///
    /// When `branch` is the prompt's current branch the prompt file and row
    /// follow the new head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown prompt, or an index or
    /// storage error.
    #[instrument(skip(self, content, change_reason), fields(operation = "version.create"))]
    pub fn create_version(
        &self,
        prompt_id: &str,
        content: &str,
        change_reason: Option<&str>,
        branch: &str,
    ) -> Result<PromptVersion> {
        let version = self.stores.index.transaction("create_version", |tx| {
            let mut prompt =
                prompts::get(tx, prompt_id)?.ok_or_else(|| Error::prompt_not_found(prompt_id))?;
            // Only main comes into being implicitly; other branches are
            // created through the branch manager.
            if branch != DEFAULT_BRANCH && history::get_branch(tx, prompt_id, branch)?.is_none() {
                return Err(Error::BranchNotFound {
                    prompt_id: prompt_id.to_string(),
                    branch: branch.to_string(),
                });
            }
            let now = crate::current_timestamp();
            let version =
                history::append_version(tx, prompt_id, branch, content, change_reason, now)?;

            if prompt.branch == branch {
                prompt.content = content.to_string();
                prompt.version = version.version;
                prompt.updated_at = now;
                self.stores.persist(tx, &mut prompt)?;
            }
            Ok(version)
        })?;

        metrics::counter!("promptvault_versions_created_total", "source" => "ledger").increment(1);
        tracing::debug!(prompt_id, branch, version = version.version, "Created version");
        Ok(version)
    }

    /// Versions of a branch, newest first.
    ///
    /// History outlives the prompt row: versions of a prompt whose file was
    /// removed are still listed.
    ///
    /// # Errors
    ///
    /// Returns an index error if the query fails.
    pub fn list_versions(
        &self,
        prompt_id: &str,
        limit: Option<usize>,
        branch: &str,
    ) -> Result<Vec<PromptVersion>> {
        self.stores.index.list_versions(prompt_id, branch, limit)
    }

    /// One version of a branch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if the version does not exist.
    pub fn get_version(&self, prompt_id: &str, version: u32, branch: &str) -> Result<PromptVersion> {
        self.stores
            .index
            .get_version(prompt_id, branch, version)?
            .ok_or_else(|| Error::VersionNotFound {
                prompt_id: prompt_id.to_string(),
                branch: branch.to_string(),
                version,
            })
    }

    /// Line diff from version `from` to version `to` of a branch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if either version does not exist.
    pub fn diff(&self, prompt_id: &str, from: u32, to: u32, branch: &str) -> Result<VersionDiff> {
        let old = self.get_version(prompt_id, from, branch)?;
        if from == to {
            return Ok(VersionDiff::default());
        }
        let new = self.get_version(prompt_id, to, branch)?;
        Ok(line_diff(&old.content, &new.content))
    }

    /// Restores the content of `to_version` by appending it as a new version.
    ///
    /// Nothing is rewritten or removed: the ledger grows by exactly one
    /// entry. When `branch` is the prompt's current branch the file and row
    /// are updated too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if `to_version` does not exist.
    #[instrument(skip(self, change_reason), fields(operation = "version.rollback"))]
    pub fn rollback(
        &self,
        prompt_id: &str,
        to_version: u32,
        branch: &str,
        change_reason: Option<&str>,
    ) -> Result<PromptVersion> {
        let reason = change_reason.map_or_else(
            || format!("Rollback to version {to_version}"),
            str::to_string,
        );

        let version = self.stores.index.transaction("rollback", |tx| {
            let target = history::get_version(tx, prompt_id, branch, to_version)?.ok_or_else(
                || Error::VersionNotFound {
                    prompt_id: prompt_id.to_string(),
                    branch: branch.to_string(),
                    version: to_version,
                },
            )?;
            let now = crate::current_timestamp();
            let version =
                history::append_version(tx, prompt_id, branch, &target.content, Some(&reason), now)?;

            if let Some(mut prompt) = prompts::get(tx, prompt_id)?
                && prompt.branch == branch
            {
                prompt.content = target.content;
                prompt.version = version.version;
                prompt.updated_at = now;
                self.stores.persist(tx, &mut prompt)?;
            }
            Ok(version)
        })?;

        metrics::counter!("promptvault_versions_created_total", "source" => "rollback")
            .increment(1);
        tracing::info!(
            prompt_id,
            branch,
            to_version,
            new_version = version.version,
            "Rolled back prompt"
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreatePromptRequest;
    use crate::services::PromptVault;

    #[test]
    fn test_create_version_moves_current_prompt() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault
            .prompts()
            .create(CreatePromptRequest::new("foo", "v1"))
            .unwrap();

        let v2 = vault
            .versions()
            .create_version(&prompt.id, "v2", Some("edit"), DEFAULT_BRANCH)
            .unwrap();
        assert_eq!(v2.version, 2);

        let reloaded = vault.prompts().get_by_id(&prompt.id).unwrap();
        assert_eq!(reloaded.content, "v2");
        assert_eq!(reloaded.version, 2);
        assert_ne!(reloaded.content_hash, prompt.content_hash);
    }

    #[test]
    fn test_create_version_unknown_prompt() {
        let vault = PromptVault::in_memory().unwrap();
        let err = vault
            .versions()
            .create_version("nope", "x", None, DEFAULT_BRANCH)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_diff_identity_and_missing_version() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault
            .prompts()
            .create(CreatePromptRequest::new("foo", "Hello"))
            .unwrap();

        let same = vault.versions().diff(&prompt.id, 1, 1, DEFAULT_BRANCH).unwrap();
        assert_eq!(same, VersionDiff::default());

        assert!(matches!(
            vault.versions().diff(&prompt.id, 1, 9, DEFAULT_BRANCH),
            Err(Error::VersionNotFound { version: 9, .. })
        ));
    }

    #[test]
    fn test_rollback_is_non_destructive() {
        let vault = PromptVault::in_memory().unwrap();
        let versions = vault.versions();
        let prompt = vault
            .prompts()
            .create(CreatePromptRequest::new("foo", "Hello"))
            .unwrap();
        versions
            .create_version(&prompt.id, "Hello\nWorld", None, DEFAULT_BRANCH)
            .unwrap();
        versions
            .create_version(&prompt.id, "Bye", None, DEFAULT_BRANCH)
            .unwrap();
        let before = versions.list_versions(&prompt.id, None, DEFAULT_BRANCH).unwrap();

        let restored = versions
            .rollback(&prompt.id, 1, DEFAULT_BRANCH, None)
            .unwrap();

        assert_eq!(restored.version, 4);
        assert_eq!(restored.content, "Hello");
        assert_eq!(restored.change_reason.as_deref(), Some("Rollback to version 1"));

        let after = versions.list_versions(&prompt.id, None, DEFAULT_BRANCH).unwrap();
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(&after[1..], &before[..]);
        assert_eq!(vault.prompts().get_by_id(&prompt.id).unwrap().content, "Hello");
    }

    #[test]
    fn test_rollback_missing_version() {
        let vault = PromptVault::in_memory().unwrap();
        let prompt = vault
            .prompts()
            .create(CreatePromptRequest::new("foo", "Hello"))
            .unwrap();
        let err = vault
            .versions()
            .rollback(&prompt.id, 5, DEFAULT_BRANCH, None)
            .unwrap_err();
        assert!(matches!(err, Error::VersionNotFound { version: 5, .. }));
        assert_eq!(
            vault
                .versions()
                .list_versions(&prompt.id, None, DEFAULT_BRANCH)
                .unwrap()
                .len(),
            1
        );
    }
}
