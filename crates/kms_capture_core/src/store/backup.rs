//! Bounded, age-pruned history for explicit capture updates.
//!
//! # Responsibility
//! - Copy the current file to `{file}.backup.{n}` before an overwrite.
//! - Prune backups past the retention count (lowest index first) and past
//!   the maximum age, in the same pass.
//!
//! # Invariants
//! - Backup failures never abort the overwrite; they are returned as issues.
//! - `n` is one past the highest existing index, so indices never repeat.
//!   An index at `u64::MAX` yields `IndexExhausted` instead of wrapping.
//! - Retention `0` disables backups entirely.

use crate::vault::{write_atomic_with, AtomicWriteError, WriteMode};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_BACKUP_RETENTION: usize = 5;
pub const DEFAULT_BACKUP_MAX_AGE_DAYS: u64 = 30;
const BACKUP_MARKER: &str = ".backup.";
const MAX_INDEX_ATTEMPTS: u64 = 10;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Retention settings for one capture directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPolicy {
    /// Backups kept per file after pruning.
    pub retention: usize,
    /// Backups older than this are removed; `None` disables age pruning.
    pub max_age: Option<Duration>,
}

impl BackupPolicy {
    pub fn with_max_age_days(retention: usize, max_age_days: u64) -> Self {
        Self {
            retention,
            max_age: (max_age_days > 0)
                .then(|| Duration::from_secs(max_age_days * SECONDS_PER_DAY)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.retention > 0
    }
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self::with_max_age_days(DEFAULT_BACKUP_RETENTION, DEFAULT_BACKUP_MAX_AGE_DAYS)
    }
}

/// Non-fatal backup failure.
#[derive(Debug)]
pub enum BackupError {
    Copy {
        target: PathBuf,
        source: AtomicWriteError,
    },
    Scan {
        dir: PathBuf,
        source: io::Error,
    },
    Prune {
        path: PathBuf,
        source: io::Error,
    },
    /// The highest existing index leaves no room for another backup.
    IndexExhausted { target: PathBuf, highest: u64 },
}

impl Display for BackupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy { target, source } => {
                write!(f, "failed to back up `{}`: {source}", target.display())
            }
            Self::Scan { dir, source } => {
                write!(f, "failed to list backups in `{}`: {source}", dir.display())
            }
            Self::Prune { path, source } => {
                write!(f, "failed to remove backup `{}`: {source}", path.display())
            }
            Self::IndexExhausted { target, highest } => write!(
                f,
                "no backup index left for `{}` after `{highest}`",
                target.display()
            ),
        }
    }
}

impl Error for BackupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Copy { source, .. } => Some(source),
            Self::Scan { source, .. } | Self::Prune { source, .. } => Some(source),
            Self::IndexExhausted { .. } => None,
        }
    }
}

/// Outcome of one backup pass.
#[derive(Debug, Default)]
pub struct BackupReport {
    pub created: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
    pub issues: Vec<BackupError>,
}

impl BackupReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug)]
struct BackupEntry {
    index: u64,
    path: PathBuf,
    modified: Option<SystemTime>,
}

/// Backs up `target` if it exists, then prunes its history.
///
/// Never fails; every problem is recorded in `BackupReport::issues`.
pub fn backup_before_overwrite(target: &Path, policy: &BackupPolicy) -> BackupReport {
    let mut report = BackupReport::default();
    if !policy.is_enabled() || !target.is_file() {
        return report;
    }
    let (Some(dir), Some(file_name)) = (
        target.parent(),
        target.file_name().and_then(|name| name.to_str()),
    ) else {
        return report;
    };

    let existing = match list_backups(dir, file_name) {
        Ok(existing) => existing,
        Err(issue) => {
            report.issues.push(issue);
            return report;
        }
    };

    let highest = existing.iter().map(|entry| entry.index).max().unwrap_or(0);
    let copied = match highest.checked_add(1) {
        Some(next) => copy_to_next_free(target, dir, file_name, next),
        None => Err(BackupError::IndexExhausted {
            target: target.to_path_buf(),
            highest,
        }),
    };
    match copied {
        Ok(path) => {
            info!(
                "event=backup_create module=store status=ok path={}",
                path.display()
            );
            report.created = Some(path);
        }
        Err(issue) => {
            warn!(
                "event=backup_create module=store status=error error={}",
                issue
            );
            report.issues.push(issue);
        }
    }

    prune(dir, file_name, policy, &mut report);
    report
}

/// Lists backup paths for `file_name` in `dir`, oldest index first.
pub fn list_backup_paths(dir: &Path, file_name: &str) -> io::Result<Vec<PathBuf>> {
    list_backups(dir, file_name)
        .map(|entries| entries.into_iter().map(|entry| entry.path).collect())
        .map_err(|err| match err {
            BackupError::Scan { source, .. } => source,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        })
}

fn list_backups(dir: &Path, file_name: &str) -> Result<Vec<BackupEntry>, BackupError> {
    let scan_error = |source| BackupError::Scan {
        dir: dir.to_path_buf(),
        source,
    };
    let prefix = format!("{file_name}{BACKUP_MARKER}");
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(scan_error)? {
        let entry = entry.map_err(scan_error)?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(index) = name
            .strip_prefix(&prefix)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        else {
            continue;
        };
        let metadata = entry.metadata().ok();
        if !metadata.as_ref().is_some_and(|meta| meta.is_file()) {
            continue;
        }
        entries.push(BackupEntry {
            index,
            path: entry.path(),
            modified: metadata.and_then(|meta| meta.modified().ok()),
        });
    }
    entries.sort_by_key(|entry| entry.index);
    Ok(entries)
}

fn copy_to_next_free(
    target: &Path,
    dir: &Path,
    file_name: &str,
    first_index: u64,
) -> Result<PathBuf, BackupError> {
    let mut last_error = None;
    let indices = (0..MAX_INDEX_ATTEMPTS).map_while(|offset| first_index.checked_add(offset));
    for index in indices {
        let path = dir.join(format!("{file_name}{BACKUP_MARKER}{index}"));
        let copied = write_atomic_with(&path, WriteMode::CreateNew, |staged| {
            let mut source = File::open(target)?;
            io::copy(&mut source, staged).map(|_| ())
        });
        match copied {
            Ok(()) => return Ok(path),
            // Another updater claimed this index.
            Err(err) if err.is_already_exists() => last_error = Some(err),
            Err(err) => {
                return Err(BackupError::Copy {
                    target: target.to_path_buf(),
                    source: err,
                })
            }
        }
    }
    Err(match last_error {
        Some(source) => BackupError::Copy {
            target: target.to_path_buf(),
            source,
        },
        None => BackupError::IndexExhausted {
            target: target.to_path_buf(),
            highest: first_index,
        },
    })
}

fn prune(dir: &Path, file_name: &str, policy: &BackupPolicy, report: &mut BackupReport) {
    let entries = match list_backups(dir, file_name) {
        Ok(entries) => entries,
        Err(issue) => {
            report.issues.push(issue);
            return;
        }
    };

    let now = SystemTime::now();
    let expired = |entry: &BackupEntry| match (policy.max_age, entry.modified) {
        (Some(max_age), Some(modified)) => now
            .duration_since(modified)
            .is_ok_and(|age| age > max_age),
        _ => false,
    };

    let (stale, mut kept): (Vec<_>, Vec<_>) = entries.into_iter().partition(|entry| {
        expired(entry) && Some(&entry.path) != report.created.as_ref()
    });
    let overflow = kept.len().saturating_sub(policy.retention);
    let doomed = stale.into_iter().chain(kept.drain(..overflow));

    for entry in doomed {
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                info!(
                    "event=backup_prune module=store status=ok path={}",
                    entry.path.display()
                );
                report.pruned.push(entry.path);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                warn!(
                    "event=backup_prune module=store status=error path={} error={}",
                    entry.path.display(),
                    source
                );
                report.issues.push(BackupError::Prune {
                    path: entry.path,
                    source,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{backup_before_overwrite, list_backup_paths, BackupError, BackupPolicy};
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    #[test]
    fn missing_target_produces_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = backup_before_overwrite(&dir.path().join("a.md"), &BackupPolicy::default());
        assert!(report.created.is_none());
        assert!(report.is_clean());
    }

    #[test]
    fn backup_copies_current_content_with_next_index() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.md");
        std::fs::write(&target, b"v1").unwrap();
        std::fs::write(dir.path().join("a.md.backup.4"), b"old").unwrap();

        let report = backup_before_overwrite(&target, &BackupPolicy::default());
        let created = report.created.unwrap();
        assert_eq!(created, dir.path().join("a.md.backup.5"));
        assert_eq!(std::fs::read(created).unwrap(), b"v1");
    }

    #[test]
    fn retention_zero_disables_backups() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.md");
        std::fs::write(&target, b"v1").unwrap();
        let report = backup_before_overwrite(&target, &BackupPolicy::with_max_age_days(0, 30));
        assert!(report.created.is_none());
        assert!(list_backup_paths(dir.path(), "a.md").unwrap().is_empty());
    }

    #[test]
    fn aged_backups_are_pruned_in_the_same_pass() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.md");
        std::fs::write(&target, b"v2").unwrap();
        let stale = dir.path().join("a.md.backup.1");
        std::fs::write(&stale, b"v0").unwrap();
        let forty_days = Duration::from_secs(40 * 24 * 60 * 60);
        File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - forty_days)
            .unwrap();

        let report = backup_before_overwrite(&target, &BackupPolicy::default());
        assert_eq!(report.pruned, vec![stale]);
        assert_eq!(
            list_backup_paths(dir.path(), "a.md").unwrap(),
            vec![dir.path().join("a.md.backup.2")]
        );
    }

    #[test]
    fn highest_possible_index_is_reported_not_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.md");
        std::fs::write(&target, b"v1").unwrap();
        let last = dir.path().join(format!("a.md.backup.{}", u64::MAX));
        std::fs::write(&last, b"v0").unwrap();

        let report = backup_before_overwrite(&target, &BackupPolicy::default());
        assert!(report.created.is_none());
        assert!(matches!(
            report.issues.as_slice(),
            [BackupError::IndexExhausted { highest: u64::MAX, .. }]
        ));
        assert!(last.is_file());
    }

    #[test]
    fn copy_stops_at_the_last_index() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.md");
        std::fs::write(&target, b"v1").unwrap();
        std::fs::write(dir.path().join(format!("a.md.backup.{}", u64::MAX - 1)), b"v0").unwrap();
        std::fs::create_dir(dir.path().join(format!("a.md.backup.{}", u64::MAX))).unwrap();

        let report = backup_before_overwrite(&target, &BackupPolicy::default());
        assert!(report.created.is_none());
        assert!(matches!(report.issues.as_slice(), [BackupError::Copy { .. }]));
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.md");
        std::fs::write(&target, b"v1").unwrap();
        std::fs::write(dir.path().join("ab.md.backup.1"), b"x").unwrap();
        std::fs::write(dir.path().join("a.md.backup.tmp"), b"x").unwrap();

        let report = backup_before_overwrite(&target, &BackupPolicy::default());
        assert_eq!(report.created.unwrap(), dir.path().join("a.md.backup.1"));
    }
}
