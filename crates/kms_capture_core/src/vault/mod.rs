//! Filesystem boundary of the engine.
//!
//! # Responsibility
//! - Resolve and lazily create the vault capture/media directories.
//! - Provide the atomic writer every persisted byte goes through.
//!
//! # Invariants
//! - Directory creation precedes every write of a save call.
//! - Nothing about existing files is cached; each check hits the filesystem.

pub mod atomic;
pub mod layout;

pub use atomic::{write_atomic, write_atomic_with, AtomicWriteError, WriteMode, WriteStage};
pub use layout::{VaultLayout, VaultPathError};
