//! YAML front matter codec for prompt files.
//!
//! ```text
//! ---
//! id: 0192a7c4-...
//! name: code-review
//! tags:
//! - review
//! is_template: true
//! ---
//! Please review the following code.
//! ```
//!
//! The body is kept byte for byte, so `parse(serialize(m, b))` returns
//! `(m, b)` for every body, including ones with leading blank lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// The front matter delimiter line.
const DELIMITER: &str = "---";

/// Typed prompt header. Unknown keys are ignored on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptMetadata {
    /// Stable prompt id; derived from the file name when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Prompt name; the file stem when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// One-line description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Template flag.
    pub is_template: bool,
    /// Favorite flag.
    pub is_favorite: bool,
    /// Pinned flag.
    pub is_pinned: bool,
    /// Position among favorites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite_order: Option<i64>,
    /// Position among pinned prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_order: Option<i64>,
    /// Branch that edits land on; `main` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// Converts Unix seconds into a header timestamp.
#[must_use]
pub fn timestamp_to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Converts a header timestamp into Unix seconds, clamping pre-epoch dates to 0.
#[must_use]
pub fn datetime_to_timestamp(dt: &DateTime<Utc>) -> u64 {
    u64::try_from(dt.timestamp()).unwrap_or(0)
}

/// Splits a prompt file into its header and body.
///
/// A file without a leading `---` line has no header: the metadata is
/// empty and the whole text is the body.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the header is not closed or is not a valid
/// YAML mapping of the expected fields.
pub fn parse(text: &str, path: &Path) -> Result<(PromptMetadata, String)> {
    let Some(after_open) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return Ok((PromptMetadata::default(), text.to_string()));
    };

    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == DELIMITER {
            let yaml = &after_open[..offset];
            let body = &after_open[offset + line.len()..];
            let metadata = parse_header(yaml, path)?;
            return Ok((metadata, body.to_string()));
        }
        offset += line.len();
    }

    Err(Error::Parse {
        path: path.to_path_buf(),
        cause: "front matter missing closing delimiter".to_string(),
    })
}

fn parse_header(yaml: &str, path: &Path) -> Result<PromptMetadata> {
    if yaml.trim().is_empty() {
        return Ok(PromptMetadata::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        cause: format!("invalid YAML front matter: {e}"),
    })
}

/// Renders a header and body into file text.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the metadata cannot be rendered as YAML.
pub fn serialize(metadata: &PromptMetadata, body: &str) -> Result<String> {
    let yaml = serde_yaml_ng::to_string(metadata)
        .map_err(|e| Error::InvalidInput(format!("cannot serialize front matter: {e}")))?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}
