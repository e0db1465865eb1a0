//! Document store: the prompt files that are the source of truth.
//!
//! [`DocumentStore`] is the port the rest of the engine talks to. The
//! filesystem implementation keeps one Markdown file per prompt; the memory
//! implementation lets tests and embedders run without touching disk.
//!
//! # Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `{root}/prompts/*.md` | Live prompts |
//! | `{root}/prompts/.archive/*.md` | Soft-deleted prompts |

mod filesystem;
pub mod frontmatter;
mod hasher;
mod memory;

pub use filesystem::FilesystemDocumentStore;
pub use frontmatter::PromptMetadata;
pub use hasher::ContentHasher;
pub use memory::MemoryDocumentStore;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::Result;
use crate::models::DEFAULT_BRANCH;

/// File extension of prompt files.
pub const PROMPT_EXTENSION: &str = "md";

/// Name of the archive directory inside the prompts directory.
pub const ARCHIVE_DIR_NAME: &str = ".archive";

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap_or_else(|_| unreachable!()));

/// Turns a prompt name into a file stem: lowercase ASCII words joined by `-`.
///
/// # Examples
///
/// ```rust
/// use promptvault::storage::file_stem_for;
///
/// assert_eq!(file_stem_for("Code Review (v2)"), "code-review-v2");
/// assert_eq!(file_stem_for("!!!"), "prompt");
/// ```
#[must_use]
pub fn file_stem_for(name: &str) -> String {
    let lowered = name.to_lowercase();
    let slug = NON_SLUG_CHARS.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "prompt".to_string()
    } else {
        slug.to_string()
    }
}

/// Returns `true` for paths that look like prompt files.
///
/// Hidden files (including in-flight temp files) are skipped.
#[must_use]
pub fn is_prompt_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .is_some_and(|n| !n.starts_with('.'));
    visible
        && path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .is_some_and(|e| e.eq_ignore_ascii_case(PROMPT_EXTENSION))
}

/// A parsed prompt file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDocument {
    /// Where the file lives.
    pub path: PathBuf,
    /// Parsed header.
    pub metadata: PromptMetadata,
    /// Body text.
    pub body: String,
}

impl PromptDocument {
    /// Hash of the document in serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be serialized.
    pub fn content_hash(&self) -> Result<String> {
        ContentHasher::hash_document(&self.metadata, &self.body)
    }

    /// The header id, or one derived from the file name.
    #[must_use]
    pub fn id(&self) -> String {
        self.metadata.id.clone().unwrap_or_else(|| {
            let file_name = self
                .path
                .file_name()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or_default();
            ContentHasher::derive_id(file_name)
        })
    }

    /// The header name, or the file stem.
    #[must_use]
    pub fn name(&self) -> String {
        self.metadata.name.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or("unnamed")
                .to_string()
        })
    }

    /// The branch edits land on.
    #[must_use]
    pub fn branch(&self) -> String {
        self.metadata
            .branch
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }
}

/// Port to the directory of prompt files.
///
/// Implementations only move text around; parsing and hashing live in the
/// provided methods so every store behaves the same.
pub trait DocumentStore: Send + Sync {
    /// Lists live prompt files. Each call is a fresh scan.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] if the directory cannot be read.
    fn list_prompts(&self) -> Result<Vec<PathBuf>>;

    /// Reads a file as text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] if the file cannot be read.
    fn read_raw(&self, path: &Path) -> Result<String>;

    /// Replaces a file's text atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] if the file cannot be written.
    fn write_raw(&self, path: &Path, text: &str) -> Result<()>;

    /// Deletes a file permanently.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] if the file cannot be removed.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Returns `true` if the file exists.
    fn exists(&self, path: &Path) -> bool;

    /// Moves a live file into the archive and returns its new path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] if the move fails.
    fn archive(&self, path: &Path) -> Result<PathBuf>;

    /// Moves an archived file back into the prompts directory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageIo`] if the move fails or the
    /// destination is taken.
    fn unarchive(&self, path: &Path) -> Result<PathBuf>;

    /// Path a prompt file with this stem lives at.
    fn path_for(&self, file_stem: &str) -> PathBuf;

    /// Reads and parses a prompt file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Parse`] for a malformed header, or
    /// [`crate::Error::StorageIo`] if the file cannot be read.
    fn read_prompt(&self, path: &Path) -> Result<PromptDocument> {
        let text = self.read_raw(path)?;
        let (metadata, body) = frontmatter::parse(&text, path)?;
        Ok(PromptDocument {
            path: path.to_path_buf(),
            metadata,
            body,
        })
    }

    /// Serializes and writes a prompt file, returning its content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    fn write_prompt(&self, path: &Path, metadata: &PromptMetadata, body: &str) -> Result<String> {
        let text = frontmatter::serialize(metadata, body)?;
        self.write_raw(path, &text)?;
        Ok(ContentHasher::hash(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("review", "review" ; "plain")]
    #[test_case("Code Review", "code-review" ; "spaces")]
    #[test_case("  a__b  ", "a-b" ; "collapses runs")]
    #[test_case("Ünïcode", "n-code" ; "non ascii dropped")]
    #[test_case("", "prompt" ; "empty")]
    fn test_file_stem_for(name: &str, expected: &str) {
        assert_eq!(file_stem_for(name), expected);
    }

    #[test]
    fn test_is_prompt_file() {
        assert!(is_prompt_file(Path::new("p/a.md")));
        assert!(is_prompt_file(Path::new("p/a.MD")));
        assert!(!is_prompt_file(Path::new("p/a.txt")));
        assert!(!is_prompt_file(Path::new("p/.a.md.tmp")));
        assert!(!is_prompt_file(Path::new("p/.hidden.md")));
    }

    #[test]
    fn test_document_fallbacks() {
        let doc = PromptDocument {
            path: PathBuf::from("prompts/hello-world.md"),
            metadata: PromptMetadata::default(),
            body: "hi".to_string(),
        };
        assert_eq!(doc.name(), "hello-world");
        assert_eq!(doc.id(), ContentHasher::derive_id("hello-world.md"));
        assert_eq!(doc.branch(), DEFAULT_BRANCH);
    }

    #[test]
    fn test_write_prompt_hash_matches_document_hash() {
        let store = MemoryDocumentStore::new();
        let path = store.path_for("x");
        let metadata = PromptMetadata {
            name: Some("x".to_string()),
            ..PromptMetadata::default()
        };
        let written = store.write_prompt(&path, &metadata, "body").unwrap();
        let doc = store.read_prompt(&path).unwrap();
        assert_eq!(written, doc.content_hash().unwrap());
    }
}
