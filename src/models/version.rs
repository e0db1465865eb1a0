//! Version history and branch models.

use serde::{Deserialize, Serialize};

/// Immutable content snapshot of a prompt on one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVersion {
    /// Row id in the ledger.
    pub id: i64,
    /// Owning prompt.
    pub prompt_id: String,
    /// Branch the snapshot belongs to.
    pub branch: String,
    /// Version number, gap-free from 1 per `(prompt_id, branch)`.
    pub version: u32,
    /// Snapshot of the body.
    pub content: String,
    /// Hash of `content`.
    pub content_hash: String,
    /// Why the version was recorded.
    pub change_reason: Option<String>,
    /// When the snapshot was taken (Unix seconds).
    pub created_at: u64,
}

/// Named pointer into a prompt's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name, unique per prompt.
    pub name: String,
    /// Owning prompt.
    pub prompt_id: String,
    /// Latest version on this branch.
    pub head_version: u32,
    /// Branch this one was created from; `None` for `main`.
    pub parent_branch: Option<String>,
    /// Creation time (Unix seconds).
    pub created_at: u64,
}

/// Line-oriented comparison between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDiff {
    /// Lines present only in the newer snapshot.
    pub additions: usize,
    /// Lines present only in the older snapshot.
    pub deletions: usize,
    /// Unified-diff style rendering; empty when nothing changed.
    pub changes: String,
}

impl VersionDiff {
    /// Returns `true` when both sides are identical.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

/// Summary of two branch heads side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchComparison {
    /// Left-hand branch.
    pub branch_a: String,
    /// Head version of `branch_a`.
    pub head_a: u32,
    /// Right-hand branch.
    pub branch_b: String,
    /// Head version of `branch_b`.
    pub head_b: u32,
    /// Diff from `branch_a`'s head to `branch_b`'s head.
    pub diff: VersionDiff,
}

impl BranchComparison {
    /// Returns `true` when both heads hold the same content.
    #[must_use]
    pub const fn is_identical(&self) -> bool {
        self.diff.is_empty()
    }
}

/// What a successful merge did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// Heads already matched; nothing was written.
    UpToDate {
        /// Unchanged target head.
        head_version: u32,
    },
    /// Target advanced to the source head through a new version.
    FastForward {
        /// The version appended on the target.
        version: PromptVersion,
    },
}
