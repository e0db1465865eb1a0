//! Prompt models.
//!
//! A [`Prompt`] is the indexed view of one prompt file. The request types
//! carry caller input into [`crate::PromptService`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::{Error, Result};

/// Name of the branch every prompt starts on.
pub const DEFAULT_BRANCH: &str = "main";

/// Maximum length of a prompt name, in characters.
pub const MAX_NAME_LENGTH: usize = 200;

/// A prompt as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Opaque, immutable identifier.
    pub id: String,
    /// Unique human-facing name.
    pub name: String,
    /// Free-text body.
    pub content: String,
    /// Optional one-line description.
    pub description: Option<String>,
    /// Tags, sorted and deduplicated.
    pub tags: Vec<String>,
    /// Whether the prompt is a reusable template.
    pub is_template: bool,
    /// Whether the prompt is marked favorite.
    pub is_favorite: bool,
    /// Whether the prompt is pinned.
    pub is_pinned: bool,
    /// Position among favorites.
    pub favorite_order: Option<i64>,
    /// Position among pinned prompts.
    pub pin_order: Option<i64>,
    /// Creation time (Unix seconds).
    pub created_at: u64,
    /// Last modification time (Unix seconds).
    pub updated_at: u64,
    /// Head version of the current branch.
    pub version: u32,
    /// Branch that edits currently land on.
    pub branch: String,
    /// Hash of the serialized file (front matter + body).
    pub content_hash: String,
    /// Backing file.
    pub file_path: PathBuf,
    /// Set when the prompt has been soft-deleted into the archive.
    pub archived: bool,
}

/// Input for [`crate::PromptService::create`].
#[derive(Debug, Clone, Default)]
pub struct CreatePromptRequest {
    /// Unique name.
    pub name: String,
    /// Body text.
    pub content: String,
    /// Tags; duplicates are collapsed.
    pub tags: Vec<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Template flag.
    pub is_template: bool,
    /// Favorite flag.
    pub is_favorite: bool,
    /// Pinned flag.
    pub is_pinned: bool,
}

impl CreatePromptRequest {
    /// Creates a request with a name and content and no tags.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the prompt as a template.
    #[must_use]
    pub const fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Input for [`crate::PromptService::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UpdatePromptRequest {
    /// New name.
    pub name: Option<String>,
    /// New body.
    pub content: Option<String>,
    /// Replacement tag set.
    pub tags: Option<Vec<String>>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// Template flag.
    pub is_template: Option<bool>,
    /// Favorite flag.
    pub is_favorite: Option<bool>,
    /// Pinned flag.
    pub is_pinned: Option<bool>,
    /// Favorite ordering.
    pub favorite_order: Option<Option<i64>>,
    /// Pin ordering.
    pub pin_order: Option<Option<i64>>,
    /// Reason recorded on the new version, if one is created.
    pub change_reason: Option<String>,
}

impl UpdatePromptRequest {
    /// Request that replaces the body.
    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Request that replaces the tag set.
    #[must_use]
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(tags.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Sets the change reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.change_reason = Some(reason.into());
        self
    }
}

/// Filter for [`crate::PromptService::get_all`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only prompts carrying all of these tags.
    pub tags: Vec<String>,
    /// Only templates (`Some(true)`) or only non-templates (`Some(false)`).
    pub is_template: Option<bool>,
    /// Only favorites.
    pub favorites_only: bool,
    /// Include soft-deleted prompts.
    pub include_archived: bool,
    /// Cap on the number of rows.
    pub limit: Option<usize>,
}

/// Normalizes a tag list: trims, drops empties, dedupes, sorts.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Validates a prompt name.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for empty, padded, multi-line, or
/// overlong names.
pub fn validate_prompt_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput(
            "prompt name must not be empty".to_string(),
        ));
    }
    if name.trim() != name {
        return Err(Error::InvalidInput(
            "prompt name must not have leading or trailing whitespace".to_string(),
        ));
    }
    if name.contains(['\n', '\r']) {
        return Err(Error::InvalidInput(
            "prompt name must be a single line".to_string(),
        ));
    }
    let len = name.chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "prompt name must not exceed {MAX_NAME_LENGTH} characters, got {len}"
        )));
    }
    Ok(())
}
