//! Prompt facade: create, update, delete, restore, and read prompts.
//!
//! Every mutation writes the file and the index rows inside one index
//! transaction, and every content change lands in the version ledger.
//! Reads only touch the index.

use tracing::instrument;

use super::shared::Stores;
use crate::models::{
    CreatePromptRequest, DEFAULT_BRANCH, IndexStats, ListFilter, Prompt, SearchHit, TagCount,
    UpdatePromptRequest, normalize_tags, validate_prompt_name,
};
use crate::storage::index::{history, prompts};
use crate::{Error, Result};

/// Facade over the document store, index, and version ledger.
#[derive(Debug, Clone)]
pub struct PromptService {
    stores: Stores,
}

impl PromptService {
    /// Creates a prompt service over shared stores.
    #[must_use]
    pub const fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Creates a prompt on `main` with version 1.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an invalid name
    /// - [`Error::NameConflict`] if the name is taken
    #[instrument(skip(self, request), fields(operation = "prompt.create", name = %request.name))]
    pub fn create(&self, request: CreatePromptRequest) -> Result<Prompt> {
        validate_prompt_name(&request.name)?;

        let prompt = self.stores.index.transaction("create_prompt", |tx| {
            if prompts::name_owner(tx, &request.name)?.is_some() {
                return Err(Error::NameConflict {
                    name: request.name.clone(),
                });
            }

            let id = uuid::Uuid::now_v7().to_string();
            let now = crate::current_timestamp();
            let version = history::append_version(
                tx,
                &id,
                DEFAULT_BRANCH,
                &request.content,
                Some("Initial version"),
                now,
            )?;

            let mut prompt = Prompt {
                file_path: self.stores.free_path_for(tx, &request.name)?,
                id,
                name: request.name.clone(),
                content: request.content.clone(),
                description: request.description.clone(),
                tags: normalize_tags(&request.tags),
                is_template: request.is_template,
                is_favorite: request.is_favorite,
                is_pinned: request.is_pinned,
                favorite_order: None,
                pin_order: None,
                created_at: now,
                updated_at: now,
                version: version.version,
                branch: DEFAULT_BRANCH.to_string(),
                content_hash: String::new(),
                archived: false,
            };
            self.stores.persist(tx, &mut prompt)?;
            Ok(prompt)
        })?;

        metrics::counter!("promptvault_prompts_created_total").increment(1);
        tracing::info!(prompt_id = %prompt.id, path = %prompt.file_path.display(), "Created prompt");
        Ok(prompt)
    }

    /// Applies a partial update.
    ///
    /// A new version is appended on the current branch only when the body
    /// changes; metadata-only edits rewrite the file and row in place, and
    /// an update that changes nothing leaves both untouched. The file keeps
    /// its path when the prompt is renamed.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown prompt
    /// - [`Error::InvalidInput`] for an archived prompt or invalid name
    /// - [`Error::NameConflict`] if the new name is taken
    #[instrument(skip(self, request), fields(operation = "prompt.update"))]
    pub fn update(&self, id: &str, request: UpdatePromptRequest) -> Result<Prompt> {
        if let Some(name) = &request.name {
            validate_prompt_name(name)?;
        }

        let (prompt, versioned) = self.stores.index.transaction("update_prompt", |tx| {
            let mut prompt = prompts::get(tx, id)?.ok_or_else(|| Error::prompt_not_found(id))?;
            if prompt.archived {
                return Err(Error::InvalidInput(format!(
                    "prompt {id} is archived; restore it before editing"
                )));
            }

            if let Some(name) = &request.name
                && prompts::name_owner(tx, name)?.is_some_and(|owner| owner != id)
            {
                return Err(Error::NameConflict { name: name.clone() });
            }

            let before = prompt.clone();
            let now = crate::current_timestamp();
            let content_changed = request
                .content
                .as_ref()
                .is_some_and(|content| *content != prompt.content);
            if content_changed && let Some(content) = &request.content {
                let version = history::append_version(
                    tx,
                    id,
                    &prompt.branch,
                    content,
                    request.change_reason.as_deref(),
                    now,
                )?;
                prompt.content.clone_from(content);
                prompt.version = version.version;
            }

            apply_metadata(&mut prompt, &request);
            if prompt == before {
                return Ok((prompt, false));
            }
            prompt.updated_at = now;
            self.stores.persist(tx, &mut prompt)?;
            Ok((prompt, content_changed))
        })?;

        if versioned {
            metrics::counter!("promptvault_versions_created_total", "source" => "update")
                .increment(1);
        }
        tracing::info!(prompt_id = id, version = prompt.version, versioned, "Updated prompt");
        Ok(prompt)
    }

    /// Deletes a prompt.
    ///
    /// A soft delete moves the file into the archive, flags the row, and
    /// drops the search entry; tags and history stay so [`Self::restore`]
    /// can bring it back. A hard delete removes the file and every row of
    /// the prompt, history included. Soft-deleting an archived prompt is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown prompt.
    #[instrument(skip(self), fields(operation = "prompt.delete"))]
    pub fn delete(&self, id: &str, hard: bool) -> Result<()> {
        let prompt = self.stores.require_prompt(id)?;

        if hard {
            self.stores.index.transaction("hard_delete_prompt", |tx| {
                prompts::delete(tx, id)?;
                history::purge(tx, id)?;
                self.stores.documents.remove(&prompt.file_path)
            })?;
            metrics::counter!("promptvault_prompts_deleted_total", "mode" => "hard").increment(1);
            tracing::info!(prompt_id = id, "Deleted prompt permanently");
            return Ok(());
        }

        if prompt.archived {
            return Ok(());
        }

        let archived_path = self.stores.documents.archive(&prompt.file_path)?;
        let result = self.stores.index.transaction("archive_prompt", |tx| {
            prompts::set_archived(tx, id, true, &archived_path)
        });
        if let Err(e) = result {
            if let Err(undo) = self.stores.documents.unarchive(&archived_path) {
                tracing::warn!(prompt_id = id, error = %undo, "Failed to move archived file back");
            }
            return Err(e);
        }

        metrics::counter!("promptvault_prompts_deleted_total", "mode" => "soft").increment(1);
        tracing::info!(prompt_id = id, path = %archived_path.display(), "Archived prompt");
        Ok(())
    }

    /// Brings a soft-deleted prompt back from the archive.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for an unknown prompt
    /// - [`Error::InvalidInput`] if the prompt is not archived
    /// - [`Error::StorageIo`] if a live file already holds its path
    #[instrument(skip(self), fields(operation = "prompt.restore"))]
    pub fn restore(&self, id: &str) -> Result<Prompt> {
        let prompt = self.stores.require_prompt(id)?;
        if !prompt.archived {
            return Err(Error::InvalidInput(format!("prompt {id} is not archived")));
        }

        let restored_path = self.stores.documents.unarchive(&prompt.file_path)?;
        let result = self.stores.index.transaction("restore_prompt", |tx| {
            prompts::set_archived(tx, id, false, &restored_path)?;
            let prompt = prompts::get(tx, id)?.ok_or_else(|| Error::prompt_not_found(id))?;
            prompts::replace_fts(tx, &prompt)?;
            Ok(prompt)
        });

        match result {
            Ok(prompt) => {
                tracing::info!(prompt_id = id, path = %restored_path.display(), "Restored prompt");
                Ok(prompt)
            },
            Err(e) => {
                if let Err(undo) = self.stores.documents.archive(&restored_path) {
                    tracing::warn!(prompt_id = id, error = %undo, "Failed to re-archive file");
                }
                Err(e)
            },
        }
    }

    /// Looks a prompt up by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no prompt has this id.
    pub fn get_by_id(&self, id: &str) -> Result<Prompt> {
        self.stores.require_prompt(id)
    }

    /// Looks a prompt up by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no prompt has this name.
    pub fn get_by_name(&self, name: &str) -> Result<Prompt> {
        self.stores
            .index
            .get_prompt_by_name(name)?
            .ok_or_else(|| Error::prompt_not_found(name))
    }

    /// Lists prompts matching a filter.
    ///
    /// # Errors
    ///
    /// Returns an index error if the query fails.
    pub fn get_all(&self, filter: &ListFilter) -> Result<Vec<Prompt>> {
        self.stores.index.list_prompts(filter)
    }

    /// Full-text search over live prompts.
    ///
    /// # Errors
    ///
    /// Returns an index error if the query fails.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.stores.index.search(query, limit)
    }

    /// Tags in use with their counts.
    ///
    /// # Errors
    ///
    /// Returns an index error if the query fails.
    pub fn list_tags(&self) -> Result<Vec<TagCount>> {
        self.stores.index.list_tags()
    }

    /// Row counts across the index.
    ///
    /// # Errors
    ///
    /// Returns an index error if the query fails.
    pub fn stats(&self) -> Result<IndexStats> {
        self.stores.index.stats()
    }
}

/// Copies the metadata fields of an update request onto a prompt.
fn apply_metadata(prompt: &mut Prompt, request: &UpdatePromptRequest) {
    if let Some(name) = &request.name {
        prompt.name.clone_from(name);
    }
    if let Some(tags) = &request.tags {
        prompt.tags = normalize_tags(tags);
    }
    if let Some(description) = &request.description {
        prompt.description.clone_from(description);
    }
    if let Some(is_template) = request.is_template {
        prompt.is_template = is_template;
    }
    if let Some(is_favorite) = request.is_favorite {
        prompt.is_favorite = is_favorite;
    }
    if let Some(is_pinned) = request.is_pinned {
        prompt.is_pinned = is_pinned;
    }
    if let Some(order) = request.favorite_order {
        prompt.favorite_order = order;
    }
    if let Some(order) = request.pin_order {
        prompt.pin_order = order;
    }
}
