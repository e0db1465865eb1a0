//! Storage layer.
//!
//! Two layers with a strict direction of truth:
//! - **Documents**: prompt files on disk, authoritative
//! - **Index**: `SQLite` tables derived from the files, plus the version
//!   ledger and branch pointers that only live in the database

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod document;
pub mod index;
pub mod migrations;

pub use document::{
    ContentHasher, DocumentStore, FilesystemDocumentStore, MemoryDocumentStore, PromptDocument,
    PromptMetadata, file_stem_for,
};
pub use index::{SqliteIndex, SyncRow};
