//! Persistence primitives built on the atomic writer.
//!
//! # Responsibility
//! - Claim unique file names under concurrent writers (`conflict`).
//! - Persist and deduplicate capture attachments (`media_store`).
//! - Keep a bounded history before explicit overwrites (`backup`).

pub mod backup;
pub mod conflict;
pub mod media_store;

pub use backup::{backup_before_overwrite, list_backup_paths, BackupError, BackupPolicy, BackupReport};
pub use conflict::{write_first_free, Candidate, ConflictError, Resolved, DEFAULT_MAX_NAME_ATTEMPTS};
pub use media_store::{content_digest, MediaBatch, MediaStore, MediaStoreError};
