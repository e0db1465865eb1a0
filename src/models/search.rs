//! Search and tag listing types.

use serde::{Deserialize, Serialize};

/// A full-text search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matching prompt id.
    pub prompt_id: String,
    /// Prompt name.
    pub name: String,
    /// BM25 score normalized to 0.0..=1.0, higher is better.
    pub score: f64,
    /// Highlighted excerpt of the body.
    pub snippet: String,
}

/// A tag and how many live prompts carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    /// Tag name.
    pub name: String,
    /// Number of linked prompts.
    pub count: u64,
}

/// Row counts for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Live prompts.
    pub prompt_count: u64,
    /// Archived prompts.
    pub archived_count: u64,
    /// Version rows across all prompts and branches.
    pub version_count: u64,
    /// Branch rows.
    pub branch_count: u64,
    /// Tag dictionary entries.
    pub tag_count: u64,
}
