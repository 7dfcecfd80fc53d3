//! All-or-nothing file writes.
//!
//! # Invariants
//! - Content is staged in a temporary file in the target's own directory, so
//!   the final rename never crosses filesystems.
//! - `WriteMode::CreateNew` never replaces an existing target; the failure is
//!   reported as `AtomicWriteError::AlreadyExists`.
//! - On any error the temporary file is removed and the target is untouched.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// How the final rename treats an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the target already exists.
    CreateNew,
    /// Atomically replace an existing target.
    Overwrite,
}

/// Step at which an atomic write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    CreateTemp,
    Write,
    Sync,
    Rename,
}

impl WriteStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::CreateTemp => "create_temp",
            Self::Write => "write",
            Self::Sync => "sync",
            Self::Rename => "rename",
        }
    }
}

#[derive(Debug)]
pub enum AtomicWriteError {
    /// Create-only write found an existing target.
    AlreadyExists(PathBuf),
    /// Target has no parent directory or file name.
    InvalidTarget(PathBuf),
    Io {
        path: PathBuf,
        stage: WriteStage,
        source: io::Error,
    },
}

impl AtomicWriteError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl Display for AtomicWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(path) => write!(f, "`{}` already exists", path.display()),
            Self::InvalidTarget(path) => {
                write!(f, "`{}` is not a writable file path", path.display())
            }
            Self::Io {
                path,
                stage,
                source,
            } => write!(
                f,
                "atomic write to `{}` failed at {}: {source}",
                path.display(),
                stage.as_str()
            ),
        }
    }
}

impl Error for AtomicWriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Writes `bytes` to `target` atomically.
pub fn write_atomic(target: &Path, bytes: &[u8], mode: WriteMode) -> Result<(), AtomicWriteError> {
    write_atomic_with(target, mode, |file| file.write_all(bytes))
}

/// Streams content into a staged temporary file, then renames it into place.
///
/// `fill` receives the temporary file. Returning an error from `fill` aborts
/// the write and removes the temporary file.
pub fn write_atomic_with<F>(target: &Path, mode: WriteMode, fill: F) -> Result<(), AtomicWriteError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| AtomicWriteError::InvalidTarget(target.to_path_buf()))?;
    let file_name = target
        .file_name()
        .ok_or_else(|| AtomicWriteError::InvalidTarget(target.to_path_buf()))?;

    // Early check only; the no-clobber rename below is authoritative.
    if mode == WriteMode::CreateNew && std::fs::symlink_metadata(target).is_ok() {
        return Err(AtomicWriteError::AlreadyExists(target.to_path_buf()));
    }

    let io_error = |stage: WriteStage| {
        move |source: io::Error| AtomicWriteError::Io {
            path: target.to_path_buf(),
            stage,
            source,
        }
    };

    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(io_error(WriteStage::CreateTemp))?;
    fill(staged.as_file_mut()).map_err(io_error(WriteStage::Write))?;
    staged
        .as_file()
        .sync_all()
        .map_err(io_error(WriteStage::Sync))?;

    let persisted = match mode {
        WriteMode::CreateNew => staged.persist_noclobber(target),
        WriteMode::Overwrite => staged.persist(target),
    };
    if let Err(err) = persisted {
        // Dropping `err.file` deletes the staged temp file.
        if mode == WriteMode::CreateNew && err.error.kind() == io::ErrorKind::AlreadyExists {
            return Err(AtomicWriteError::AlreadyExists(target.to_path_buf()));
        }
        return Err(io_error(WriteStage::Rename)(err.error));
    }

    sync_dir(parent);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Best effort: makes the rename itself durable on crash.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
