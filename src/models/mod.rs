//! Data models for the prompt store.

mod prompt;
mod search;
mod sync;
mod version;

pub use prompt::{
    CreatePromptRequest, DEFAULT_BRANCH, ListFilter, MAX_NAME_LENGTH, Prompt,
    UpdatePromptRequest, normalize_tags, validate_prompt_name,
};
pub use search::{IndexStats, SearchHit, TagCount};
pub use sync::{IntegrityReport, SyncError, SyncReport};
pub use version::{Branch, BranchComparison, MergeOutcome, PromptVersion, VersionDiff};
