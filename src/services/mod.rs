//! Business logic services.
//!
//! Services orchestrate the document store and the index and provide the
//! high-level prompt operations. [`PromptVault`] wires them together.

mod branch;
mod diff;
mod prompt;
mod shared;
mod sync;
mod vault;
mod version;

pub use branch::{BranchService, MAX_BRANCH_NAME_LENGTH, validate_branch_name};
pub use diff::line_diff;
pub use prompt::PromptService;
pub use shared::{Stores, metadata_for, run_bounded};
pub use sync::{FileOutcome, SyncService};
pub use vault::PromptVault;
pub use version::VersionService;
