//! State and helpers shared by the services.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::Prompt;
use crate::storage::document::frontmatter::timestamp_to_datetime;
use crate::storage::index::{history, prompts};
use crate::storage::{ContentHasher, DocumentStore, PromptMetadata, SqliteIndex, file_stem_for};
use crate::{Error, Result};

/// Handles every service holds: the document store and the index.
#[derive(Clone)]
pub struct Stores {
    /// Prompt files.
    pub documents: Arc<dyn DocumentStore>,
    /// Derived index.
    pub index: Arc<SqliteIndex>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Stores {
    /// Bundles a document store and an index.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>, index: Arc<SqliteIndex>) -> Self {
        Self { documents, index }
    }

    /// Loads a prompt or fails with [`Error::NotFound`].
    pub(crate) fn require_prompt(&self, id: &str) -> Result<Prompt> {
        self.index
            .get_prompt(id)?
            .ok_or_else(|| Error::prompt_not_found(id))
    }

    /// Picks a file path for a new prompt named `name`, suffixing `-2`,
    /// `-3`, ... when the plain stem is already taken on disk or in the
    /// index.
    pub(crate) fn free_path_for(&self, conn: &Connection, name: &str) -> Result<PathBuf> {
        let stem = file_stem_for(name);
        let mut candidate = self.documents.path_for(&stem);
        let mut n = 2;
        while self.documents.exists(&candidate) || prompts::path_in_use(conn, &candidate)? {
            candidate = self.documents.path_for(&format!("{stem}-{n}"));
            n += 1;
        }
        Ok(candidate)
    }

    /// Writes a prompt's row, search entry, tags, and file.
    ///
    /// Runs inside the caller's transaction. The file is written after the
    /// row so a failed row write leaves the disk untouched; `content_hash`
    /// is set to the hash of the written file.
    pub(crate) fn persist(&self, conn: &Connection, prompt: &mut Prompt) -> Result<()> {
        let metadata = metadata_for(prompt);
        prompt.content_hash = ContentHasher::hash_document(&metadata, &prompt.content)?;
        prompts::save(conn, prompt)?;
        self.documents
            .write_prompt(&prompt.file_path, &metadata, &prompt.content)?;
        Ok(())
    }

    /// Points a prompt at the head of `branch`: content, version, and branch
    /// are taken from the ledger and the file is rewritten. No version is
    /// appended.
    pub(crate) fn checkout(&self, conn: &Connection, prompt: &mut Prompt, branch: &str) -> Result<()> {
        let head = history::get_branch(conn, &prompt.id, branch)?.ok_or_else(|| {
            Error::BranchNotFound {
                prompt_id: prompt.id.clone(),
                branch: branch.to_string(),
            }
        })?;
        let version = history::get_version(conn, &prompt.id, branch, head.head_version)?
            .ok_or_else(|| Error::VersionNotFound {
                prompt_id: prompt.id.clone(),
                branch: branch.to_string(),
                version: head.head_version,
            })?;

        prompt.content = version.content;
        prompt.version = version.version;
        prompt.branch = branch.to_string();
        prompt.updated_at = crate::current_timestamp();
        self.persist(conn, prompt)
    }
}

/// Front matter describing a prompt.
#[must_use]
pub fn metadata_for(prompt: &Prompt) -> PromptMetadata {
    PromptMetadata {
        id: Some(prompt.id.clone()),
        name: Some(prompt.name.clone()),
        description: prompt.description.clone(),
        tags: prompt.tags.clone(),
        is_template: prompt.is_template,
        is_favorite: prompt.is_favorite,
        is_pinned: prompt.is_pinned,
        favorite_order: prompt.favorite_order,
        pin_order: prompt.pin_order,
        branch: Some(prompt.branch.clone()),
        created: timestamp_to_datetime(prompt.created_at),
        updated: timestamp_to_datetime(prompt.updated_at),
    }
}

/// Runs `work` over `items` as blocking tasks, at most `limit` at a time.
///
/// Each item gets a semaphore permit and a `spawn_blocking` task on a
/// `JoinSet`. Results come back in input order. A panicking item is
/// reported through `on_panic` instead of tearing down the batch.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if no runtime can be built.
pub fn run_bounded<T, R, F, P>(items: Vec<T>, limit: usize, work: F, on_panic: P) -> Result<Vec<R>>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    P: Fn(&T) -> R,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let items: Arc<[T]> = items.into();
    let work = Arc::new(work);
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let len = items.len();

    let mut slots: Vec<Option<R>> = block_on(async {
        let mut tasks = JoinSet::new();
        for i in 0..len {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::OperationFailed {
                    operation: "run_bounded_acquire".to_string(),
                    cause: e.to_string(),
                })?;
            let (items, work) = (Arc::clone(&items), Arc::clone(&work));
            tasks.spawn_blocking(move || {
                let _permit = permit;
                (i, items.get(i).map(|item| work(item)))
            });
        }

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(len).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => {
                    if let Some(slot) = slots.get_mut(i) {
                        *slot = result;
                    }
                },
                Err(e) => tracing::warn!(error = %e, "Bounded task failed"),
            }
        }
        Ok::<_, Error>(slots)
    })??;

    Ok(items
        .iter()
        .zip(slots.iter_mut())
        .map(|(item, slot)| slot.take().unwrap_or_else(|| on_panic(item)))
        .collect())
}

/// Drives a future to completion on the current multi-thread runtime, or
/// on a current-thread runtime built for the call. Must not be called from
/// inside a current-thread runtime.
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if let Ok(handle) = Handle::try_current()
        && handle.runtime_flavor() == RuntimeFlavor::MultiThread
    {
        return Ok(tokio::task::block_in_place(|| handle.block_on(future)));
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::OperationFailed {
            operation: "run_bounded_create_runtime".to_string(),
            cause: e.to_string(),
        })?;
    Ok(runtime.block_on(future))
}
