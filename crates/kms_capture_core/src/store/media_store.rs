//! Attachment persistence with optional content-addressed deduplication.
//!
//! # Responsibility
//! - Turn attachment buffers into `MediaRef`s with media-root-relative paths.
//! - Reuse an existing blob when dedup is on and the same bytes are stored.
//! - Roll back the uniquely named blobs of a capture when any attachment fails.
//!
//! # Invariants
//! - Dedup blobs are named `{sha256}.{ext}`; the digest is the lookup key.
//! - Rollback only removes uniquely named blobs written by the failing batch.
//!   Content-addressed blobs are never removed: another capture may already
//!   link them, and an orphaned one is reused by the next identical upload.
//! - Existence checks go to the filesystem on every call.

use crate::model::media::{MediaAttachment, MediaRef};
use crate::store::conflict::{write_first_free, Candidate, ConflictError};
use crate::vault::{write_atomic, WriteMode};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MEDIA_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const MEDIA_SUFFIX_CHARS: usize = 6;

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub enum MediaStoreError {
    /// Writing one attachment failed.
    Write {
        name: String,
        source: ConflictError,
    },
    /// Media root could not be scanned for an existing digest.
    Scan { path: PathBuf, source: io::Error },
    /// A non-file entry occupies the content-addressed name.
    Blocked { name: String, path: PathBuf },
}

impl Display for MediaStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { name, source } => write!(f, "failed to store attachment `{name}`: {source}"),
            Self::Scan { path, source } => {
                write!(f, "failed to scan media root `{}`: {source}", path.display())
            }
            Self::Blocked { name, path } => write!(
                f,
                "attachment `{name}` cannot be stored: `{}` is not a regular file",
                path.display()
            ),
        }
    }
}

impl Error for MediaStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Write { source, .. } => Some(source),
            Self::Scan { source, .. } => Some(source),
            Self::Blocked { .. } => None,
        }
    }
}

/// Media persisted for one capture.
#[derive(Debug, Default)]
pub struct MediaBatch {
    pub refs: Vec<MediaRef>,
    /// Uniquely named blobs created by this batch; rollback deletes exactly these.
    written: Vec<PathBuf>,
}

impl MediaBatch {
    pub fn written_paths(&self) -> &[PathBuf] {
        &self.written
    }

    /// Deletes the blobs this batch created. Failures are logged, not returned,
    /// since rollback runs while another error is already propagating.
    pub fn rollback(self) {
        for path in &self.written {
            match std::fs::remove_file(path) {
                Ok(()) => info!(
                    "event=media_rollback module=store status=ok path={}",
                    path.display()
                ),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => error!(
                    "event=media_rollback module=store status=error path={} error={}",
                    path.display(),
                    err
                ),
            }
        }
    }
}

/// Attachment writer bound to one media root.
#[derive(Debug, Clone)]
pub struct MediaStore<'a> {
    media_dir: &'a Path,
    dedup: bool,
    max_name_attempts: u32,
}

impl<'a> MediaStore<'a> {
    pub fn new(media_dir: &'a Path, dedup: bool, max_name_attempts: u32) -> Self {
        Self {
            media_dir,
            dedup,
            max_name_attempts,
        }
    }

    /// Persists every attachment, or none of them.
    ///
    /// `stamp` names non-deduplicated blobs (`{stamp}_{kind}_{suffix}.{ext}`).
    ///
    /// # Errors
    /// Returns the first failure after removing blobs already written by this call.
    pub fn store_all(
        &self,
        attachments: &[MediaAttachment],
        stamp: DateTime<Utc>,
    ) -> Result<MediaBatch, MediaStoreError> {
        let mut batch = MediaBatch::default();
        for attachment in attachments {
            match self.store_one(attachment, stamp) {
                Ok((media_ref, written)) => {
                    batch.refs.push(media_ref);
                    batch.written.extend(written);
                }
                Err(err) => {
                    error!(
                        "event=media_write module=store status=error kind={} error={}",
                        attachment.kind.as_str(),
                        err
                    );
                    batch.rollback();
                    return Err(err);
                }
            }
        }
        Ok(batch)
    }

    fn store_one(
        &self,
        attachment: &MediaAttachment,
        stamp: DateTime<Utc>,
    ) -> Result<(MediaRef, Option<PathBuf>), MediaStoreError> {
        let digest = content_digest(&attachment.bytes);
        let extension = attachment.extension();

        if self.dedup {
            if let Some(existing) = self.find_by_digest(&digest, &extension)? {
                info!(
                    "event=media_dedup_hit module=store status=ok kind={} path={}",
                    attachment.kind.as_str(),
                    existing
                );
                return Ok((self.media_ref(attachment, existing, digest), None));
            }
            return self.store_addressed(attachment, digest, &extension);
        }

        let stamp = stamp.format(MEDIA_STAMP_FORMAT).to_string();
        let kind = attachment.kind.as_str();
        let resolved = write_first_free(
            self.media_dir,
            format!("{stamp}_{kind}_{}.{extension}", random_suffix()),
            self.max_name_attempts,
            |_| format!("{stamp}_{kind}_{}.{extension}", random_suffix()),
            |name: &String| Candidate {
                file_name: name.clone(),
                bytes: Cow::Borrowed(attachment.bytes.as_slice()),
            },
        )
        .map_err(|source| MediaStoreError::Write {
            name: attachment.name.clone(),
            source,
        })?;
        self.log_written(attachment, &resolved.value);
        Ok((
            self.media_ref(attachment, resolved.value, digest),
            Some(resolved.path),
        ))
    }

    fn store_addressed(
        &self,
        attachment: &MediaAttachment,
        digest: String,
        extension: &str,
    ) -> Result<(MediaRef, Option<PathBuf>), MediaStoreError> {
        let file_name = format!("{digest}.{extension}");
        let path = self.media_dir.join(&file_name);
        match write_atomic(&path, &attachment.bytes, WriteMode::CreateNew) {
            Ok(()) => {
                self.log_written(attachment, &file_name);
                Ok((self.media_ref(attachment, file_name, digest), None))
            }
            // A concurrent writer stored the same digest first.
            Err(err) if err.is_already_exists() => {
                if !path.is_file() {
                    return Err(MediaStoreError::Blocked {
                        name: attachment.name.clone(),
                        path,
                    });
                }
                debug!(
                    "event=media_dedup_hit module=store status=ok path={} race=true",
                    file_name
                );
                Ok((self.media_ref(attachment, file_name, digest), None))
            }
            Err(err) => Err(MediaStoreError::Write {
                name: attachment.name.clone(),
                source: ConflictError::Write(err),
            }),
        }
    }

    /// Finds a stored regular file whose name stem is `digest`.
    ///
    /// `{digest}.{extension}` is checked directly; the directory scan only runs
    /// on a miss, to reuse the same bytes stored under another extension.
    fn find_by_digest(
        &self,
        digest: &str,
        extension: &str,
    ) -> Result<Option<String>, MediaStoreError> {
        let exact = format!("{digest}.{extension}");
        let exact_path = self.media_dir.join(&exact);
        if std::fs::symlink_metadata(exact_path).is_ok_and(|meta| meta.is_file()) {
            return Ok(Some(exact));
        }

        let scan_error = |source| MediaStoreError::Scan {
            path: self.media_dir.to_path_buf(),
            source,
        };
        for entry in std::fs::read_dir(self.media_dir).map_err(scan_error)? {
            let entry = entry.map_err(scan_error)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.split('.').next() != Some(digest) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => return Ok(Some(name)),
                Ok(_) => {}
                Err(err) => warn!(
                    "event=media_scan module=store status=error file={} error={}",
                    name, err
                ),
            }
        }
        Ok(None)
    }

    fn media_ref(&self, attachment: &MediaAttachment, file_name: String, digest: String) -> MediaRef {
        MediaRef {
            name: attachment.name.clone(),
            kind: attachment.kind,
            relative_path: file_name,
            content_hash: Some(digest),
        }
    }

    fn log_written(&self, attachment: &MediaAttachment, file_name: &str) {
        info!(
            "event=media_write module=store status=ok kind={} path={} bytes={}",
            attachment.kind.as_str(),
            file_name,
            attachment.bytes.len()
        );
    }
}

fn random_suffix() -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    entropy[..MEDIA_SUFFIX_CHARS].to_string()
}

#[cfg(test)]
mod tests {
    use super::{content_digest, MediaStore, MediaStoreError};
    use crate::model::media::{MediaAttachment, MediaKind};
    use chrono::Utc;

    #[test]
    fn digest_is_lowercase_sha256_hex() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn non_dedup_names_carry_stamp_kind_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), false, 10);
        let batch = store
            .store_all(
                &[MediaAttachment::new("voice", MediaKind::Audio, vec![1, 2, 3])],
                Utc::now(),
            )
            .unwrap();
        let path = &batch.refs[0].relative_path;
        assert!(path.contains("_audio_"));
        assert!(path.ends_with(".wav"));
        assert_eq!(batch.written_paths().len(), 1);
    }

    #[test]
    fn non_dedup_stores_identical_bytes_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), false, 10);
        let blob = MediaAttachment::new("a.png", MediaKind::Image, vec![7; 16]);
        let stamp = Utc::now();
        let first = store.store_all(&[blob.clone()], stamp).unwrap();
        let second = store.store_all(&[blob], stamp).unwrap();
        assert_ne!(first.refs[0].relative_path, second.refs[0].relative_path);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn blocked_digest_fails_and_keeps_content_addressed_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), true, 10);
        let blocked_bytes = vec![9u8; 8];
        let blocker = dir.path().join(format!("{}.png", content_digest(&blocked_bytes)));
        std::fs::create_dir(&blocker).unwrap();

        let err = store
            .store_all(
                &[
                    MediaAttachment::new("ok.wav", MediaKind::Audio, vec![1, 2]),
                    MediaAttachment::new("shot.png", MediaKind::Screenshot, blocked_bytes),
                ],
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, MediaStoreError::Blocked { .. }));
        let stored = dir.path().join(format!("{}.wav", content_digest(&[1, 2])));
        assert!(stored.is_file());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn rollback_keeps_blob_reused_by_another_capture() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), true, 10);
        let blob = MediaAttachment::new("a.png", MediaKind::Image, vec![4u8; 12]);

        let first = store.store_all(&[blob.clone()], Utc::now()).unwrap();
        let second = store.store_all(&[blob], Utc::now()).unwrap();
        assert_eq!(first.refs[0].relative_path, second.refs[0].relative_path);

        first.rollback();
        assert!(dir.path().join(&second.refs[0].relative_path).is_file());
    }

    #[test]
    fn rollback_removes_uniquely_named_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), false, 10);
        let batch = store
            .store_all(
                &[
                    MediaAttachment::new("a.wav", MediaKind::Audio, vec![1]),
                    MediaAttachment::new("b.bin", MediaKind::File, vec![2]),
                ],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(batch.written_paths().len(), 2);

        batch.rollback();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn same_bytes_under_another_extension_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), true, 10);
        let bytes = vec![8u8; 6];
        let png = store
            .store_all(
                &[MediaAttachment::new("a.png", MediaKind::Image, bytes.clone())],
                Utc::now(),
            )
            .unwrap();
        let jpg = store
            .store_all(
                &[MediaAttachment::new("a.jpg", MediaKind::Image, bytes)],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(png.refs[0].relative_path, jpg.refs[0].relative_path);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
