//! Content hashing for change detection.
//!
//! SHA-256 over the serialized document. The hash is only used to notice
//! that a file changed; it is not a security boundary.

use sha2::{Digest, Sha256};

use super::frontmatter::{self, PromptMetadata};
use crate::Result;

/// Length of ids derived from file names, in hex characters.
const DERIVED_ID_LEN: usize = 24;

/// Content hasher for prompt documents.
///
/// # Example
///
/// ```rust
/// use promptvault::storage::ContentHasher;
///
/// let hash = ContentHasher::hash("Hello");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, ContentHasher::hash("Hello"));
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the lowercase hex SHA-256 of `content`.
    #[must_use]
    pub fn hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Hashes a document in its serialized on-disk form.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be serialized.
    pub fn hash_document(metadata: &PromptMetadata, body: &str) -> Result<String> {
        let serialized = frontmatter::serialize(metadata, body)?;
        Ok(Self::hash(&serialized))
    }

    /// Derives a stable prompt id from a file name.
    ///
    /// Used for hand-written files that carry no `id` in their header, so
    /// the same file always maps to the same index row.
    #[must_use]
    pub fn derive_id(file_name: &str) -> String {
        let digest = Self::hash(file_name);
        format!("f{}", &digest[..DERIVED_ID_LEN])
    }
}
