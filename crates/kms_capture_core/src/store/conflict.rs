//! Create-only writes with bounded name regeneration.
//!
//! The no-clobber rename of the atomic writer is the only synchronization
//! primitive: of several racing writers targeting one name, exactly one
//! succeeds and the others move on to a regenerated name.

use crate::vault::{write_atomic, AtomicWriteError, WriteMode};
use log::{debug, warn};
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Default bound on create attempts per name.
pub const DEFAULT_MAX_NAME_ATTEMPTS: u32 = 10;

/// One attempt: the file name to claim and the bytes to store under it.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub file_name: String,
    pub bytes: Cow<'a, [u8]>,
}

/// Successful create-only write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    /// The name value that was finally claimed.
    pub value: T,
    pub path: PathBuf,
    /// 1 when the first candidate was free.
    pub attempts: u32,
}

#[derive(Debug)]
pub enum ConflictError {
    /// Every candidate within the bound already existed.
    NameExhausted { first: String, attempts: u32 },
    /// Non-collision I/O failure; never retried.
    Write(AtomicWriteError),
}

impl Display for ConflictError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameExhausted { first, attempts } => write!(
                f,
                "no free file name for `{first}` after {attempts} attempts"
            ),
            Self::Write(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConflictError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Write(err) => Some(err),
            Self::NameExhausted { .. } => None,
        }
    }
}

/// Writes under the first free name, regenerating on collisions.
///
/// `regenerate` always receives the first value, so each retry derives a fresh
/// alternative from the original request. `render` produces the name and
/// content for a value; it is re-run per attempt because content may embed
/// the name (capture headers carry their identifier).
///
/// # Errors
/// - `NameExhausted` after `max_attempts` collisions.
/// - `Write` on the first non-collision failure.
pub fn write_first_free<'a, T, G, R>(
    dir: &Path,
    first: T,
    max_attempts: u32,
    mut regenerate: G,
    mut render: R,
) -> Result<Resolved<T>, ConflictError>
where
    T: Clone,
    G: FnMut(&T) -> T,
    R: FnMut(&T) -> Candidate<'a>,
{
    let max_attempts = max_attempts.max(1);
    let mut first_name = String::new();
    let mut current = first.clone();

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            current = regenerate(&first);
        }
        let candidate = render(&current);
        let path = dir.join(&candidate.file_name);
        if attempt == 1 {
            first_name = candidate.file_name.clone();
        }

        match write_atomic(&path, &candidate.bytes, WriteMode::CreateNew) {
            Ok(()) => {
                debug!(
                    "event=capture_write module=store status=ok file={} attempts={}",
                    candidate.file_name, attempt
                );
                return Ok(Resolved {
                    value: current,
                    path,
                    attempts: attempt,
                });
            }
            Err(err) if err.is_already_exists() => {
                warn!(
                    "event=capture_write module=store status=retry file={} attempt={}",
                    candidate.file_name, attempt
                );
            }
            Err(err) => return Err(ConflictError::Write(err)),
        }
    }

    Err(ConflictError::NameExhausted {
        first: first_name,
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::{write_first_free, Candidate, ConflictError};
    use std::borrow::Cow;

    fn plain<'a>(name: &String) -> Candidate<'a> {
        Candidate {
            file_name: name.clone(),
            bytes: Cow::Owned(name.clone().into_bytes()),
        }
    }

    #[test]
    fn first_free_name_wins_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = write_first_free(
            dir.path(),
            "a.md".to_string(),
            10,
            |_| unreachable!("no collision expected"),
            plain,
        )
        .unwrap();
        assert_eq!(resolved.attempts, 1);
        assert_eq!(resolved.value, "a.md");
    }

    #[test]
    fn collision_regenerates_from_first_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), b"taken").unwrap();
        let mut counter = 0;
        let resolved = write_first_free(
            dir.path(),
            "a.md".to_string(),
            10,
            |first| {
                counter += 1;
                format!("{first}-{counter}")
            },
            plain,
        )
        .unwrap();
        assert_eq!(resolved.value, "a.md-1");
        assert_eq!(resolved.attempts, 2);
        assert_eq!(std::fs::read(dir.path().join("a.md")).unwrap(), b"taken");
    }

    #[test]
    fn bounded_attempts_surface_name_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), b"taken").unwrap();
        let err = write_first_free(dir.path(), "a.md".to_string(), 3, |first| first.clone(), plain)
            .unwrap_err();
        assert!(matches!(
            err,
            ConflictError::NameExhausted { ref first, attempts: 3 } if first == "a.md"
        ));
    }

    #[test]
    fn io_failures_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut regenerated = false;
        let err = write_first_free(
            &missing,
            "a.md".to_string(),
            10,
            |first| {
                regenerated = true;
                first.clone()
            },
            plain,
        )
        .unwrap_err();
        assert!(matches!(err, ConflictError::Write(_)));
        assert!(!regenerated);
    }
}
