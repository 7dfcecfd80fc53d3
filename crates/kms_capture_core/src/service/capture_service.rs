//! Capture use-case service.
//!
//! # Responsibility
//! - Provide the `save` entry point and its explicit `update` variant.
//! - Sequence validation, directory creation, media persistence, rendering
//!   and the final markdown write.
//! - Read capture files back for front-ends.
//!
//! # Invariants
//! - `save` never touches an existing capture file.
//! - A failed save leaves no capture file and no media written by that call.
//! - Backup problems during `update` are reported, never returned as `Err`.
//! - The engine holds configuration only; every existence check hits disk.

use crate::config::EngineConfig;
use crate::frontmatter::{parse_capture, render_capture, FrontmatterParseError, ParsedCapture};
use crate::model::capture::{CaptureRecord, CaptureValidationError};
use crate::model::capture_id::CaptureId;
use crate::model::media::{MediaAttachment, MediaRef};
use crate::store::backup::{backup_before_overwrite, BackupError, BackupPolicy, BackupReport};
use crate::store::conflict::{write_first_free, Candidate, ConflictError};
use crate::store::media_store::{MediaBatch, MediaStore, MediaStoreError};
use crate::vault::{write_atomic, AtomicWriteError, VaultLayout, VaultPathError, WriteMode};
use log::{error, info, warn};
use std::borrow::Cow;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

const CAPTURE_EXTENSION: &str = "md";

/// Engine-level failure. Every variant means nothing was saved.
#[derive(Debug)]
pub enum CaptureError {
    /// Vault root or a subdirectory is invalid or cannot be created.
    InvalidPath(VaultPathError),
    /// Record failed validation before any file was touched.
    InvalidRecord(CaptureValidationError),
    /// Every regenerated identifier collided.
    NameExhausted { first: String, attempts: u32 },
    /// The markdown write failed; the target is unchanged.
    WriteFailed(AtomicWriteError),
    /// An attachment failed; media written by this call were removed.
    MediaWriteFailed(MediaStoreError),
    /// A capture file could not be read back.
    ReadFailed { path: PathBuf, source: io::Error },
    /// A capture file was read but is not a valid capture document.
    Malformed {
        path: PathBuf,
        source: FrontmatterParseError,
    },
}

impl CaptureError {
    /// Stable machine-readable kind, used in log lines and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid_path",
            Self::InvalidRecord(_) => "invalid_record",
            Self::NameExhausted { .. } => "name_exhausted",
            Self::WriteFailed(_) => "write_failed",
            Self::MediaWriteFailed(_) => "media_write_failed",
            Self::ReadFailed { .. } => "read_failed",
            Self::Malformed { .. } => "malformed",
        }
    }
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(err) => write!(f, "invalid vault path: {err}"),
            Self::InvalidRecord(err) => write!(f, "invalid capture: {err}"),
            Self::NameExhausted { first, attempts } => write!(
                f,
                "could not find a free capture name for `{first}` after {attempts} attempts"
            ),
            Self::WriteFailed(err) => write!(f, "capture write failed: {err}"),
            Self::MediaWriteFailed(err) => write!(f, "media write failed: {err}"),
            Self::ReadFailed { path, source } => {
                write!(f, "failed to read capture `{}`: {source}", path.display())
            }
            Self::Malformed { path, source } => {
                write!(f, "capture `{}` is malformed: {source}", path.display())
            }
        }
    }
}

impl Error for CaptureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPath(err) => Some(err),
            Self::InvalidRecord(err) => Some(err),
            Self::NameExhausted { .. } => None,
            Self::WriteFailed(err) => Some(err),
            Self::MediaWriteFailed(err) => Some(err),
            Self::ReadFailed { source, .. } => Some(source),
            Self::Malformed { source, .. } => Some(source),
        }
    }
}

impl From<VaultPathError> for CaptureError {
    fn from(value: VaultPathError) -> Self {
        Self::InvalidPath(value)
    }
}

impl From<CaptureValidationError> for CaptureError {
    fn from(value: CaptureValidationError) -> Self {
        Self::InvalidRecord(value)
    }
}

impl From<MediaStoreError> for CaptureError {
    fn from(value: MediaStoreError) -> Self {
        Self::MediaWriteFailed(value)
    }
}

impl From<ConflictError> for CaptureError {
    fn from(value: ConflictError) -> Self {
        match value {
            ConflictError::NameExhausted { first, attempts } => {
                Self::NameExhausted { first, attempts }
            }
            ConflictError::Write(err) => Self::WriteFailed(err),
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Successful save or update.
#[derive(Debug)]
pub struct SavedCapture {
    /// Final identifier; differs from the requested one after a collision.
    pub id: CaptureId,
    pub path: PathBuf,
    /// Every media ref rendered into the file: refs already on the record,
    /// then the ones stored by this call in attachment order.
    pub media: Vec<MediaRef>,
    /// Present for `update` only.
    pub backup: Option<BackupReport>,
}

impl SavedCapture {
    /// Non-fatal backup problems ("saved, with a warning").
    pub fn backup_issues(&self) -> &[BackupError] {
        self.backup
            .as_ref()
            .map(|report| report.issues.as_slice())
            .unwrap_or_default()
    }
}

/// Stateless capture persistence engine bound to one vault.
#[derive(Debug, Clone)]
pub struct CaptureEngine {
    layout: VaultLayout,
    dedup_media: bool,
    max_name_attempts: u32,
    backup_policy: BackupPolicy,
}

impl CaptureEngine {
    /// Builds an engine from resolved configuration. Touches no files.
    ///
    /// # Errors
    /// Returns `InvalidPath` when the configured directories are malformed.
    pub fn new(config: &EngineConfig) -> CaptureResult<Self> {
        Ok(Self {
            layout: config.layout()?,
            dedup_media: config.dedup_media,
            max_name_attempts: config.max_name_attempts.max(1),
            backup_policy: config.backup_policy(),
        })
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    /// Path a capture with `id` is stored under.
    pub fn capture_path(&self, id: &CaptureId) -> PathBuf {
        self.layout.capture_dir().join(id.file_name())
    }

    /// Persists a new capture and its attachments.
    ///
    /// # Contract
    /// - Never overwrites: on a name collision the identifier is regenerated.
    /// - Attachments are stored first so the document can link them; a failed
    ///   markdown write removes the uniquely named blobs this call
    ///   wrote. Content-addressed blobs stay for later reuse.
    ///
    /// # Errors
    /// `InvalidRecord`, `InvalidPath`, `MediaWriteFailed`, `NameExhausted`
    /// or `WriteFailed`. In every case no capture file was created.
    pub fn save(
        &self,
        record: &CaptureRecord,
        attachments: &[MediaAttachment],
    ) -> CaptureResult<SavedCapture> {
        let started = Instant::now();
        let result = self.save_inner(record, attachments);
        match &result {
            Ok(saved) => info!(
                "event=capture_save module=service status=ok id={} media={} duration_ms={}",
                saved.id,
                saved.media.len(),
                started.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=capture_save module=service status=error id={} error_code={} error={}",
                record.id,
                err.code(),
                err
            ),
        }
        result
    }

    fn save_inner(
        &self,
        record: &CaptureRecord,
        attachments: &[MediaAttachment],
    ) -> CaptureResult<SavedCapture> {
        let batch = self.prepare(record, attachments)?;
        let mut draft = record.clone();
        draft.media.extend(batch.refs.iter().cloned());
        let link_base = self.layout.media_link_base();

        let written = write_first_free(
            self.layout.capture_dir(),
            record.id.clone(),
            self.max_name_attempts,
            CaptureId::regenerate,
            |id: &CaptureId| {
                draft.id = id.clone();
                let rendered = render_capture(&draft, link_base);
                Candidate {
                    file_name: rendered.file_name,
                    bytes: Cow::Owned(rendered.text.into_bytes()),
                }
            },
        );

        match written {
            Ok(resolved) => Ok(SavedCapture {
                id: resolved.value,
                path: resolved.path,
                media: draft.media,
                backup: None,
            }),
            Err(err) => {
                batch.rollback();
                Err(err.into())
            }
        }
    }

    /// Overwrites an existing capture after backing it up.
    ///
    /// The file is chosen by `record.id`; when it does not exist yet it is
    /// written fresh and no backup is taken. `last_edited_date` is written as
    /// given.
    ///
    /// # Errors
    /// Same kinds as `save`, except `NameExhausted`. Backup failures are in
    /// `SavedCapture::backup_issues`.
    pub fn update(
        &self,
        record: &CaptureRecord,
        attachments: &[MediaAttachment],
    ) -> CaptureResult<SavedCapture> {
        let started = Instant::now();
        let result = self.update_inner(record, attachments);
        match &result {
            Ok(saved) => {
                let issues = saved.backup_issues();
                if !issues.is_empty() {
                    warn!(
                        "event=capture_update module=service status=degraded id={} backup_issues={}",
                        saved.id,
                        issues.len()
                    );
                }
                info!(
                    "event=capture_update module=service status=ok id={} backup_created={} duration_ms={}",
                    saved.id,
                    saved
                        .backup
                        .as_ref()
                        .is_some_and(|report| report.created.is_some()),
                    started.elapsed().as_millis()
                );
            }
            Err(err) => error!(
                "event=capture_update module=service status=error id={} error_code={} error={}",
                record.id,
                err.code(),
                err
            ),
        }
        result
    }

    fn update_inner(
        &self,
        record: &CaptureRecord,
        attachments: &[MediaAttachment],
    ) -> CaptureResult<SavedCapture> {
        let batch = self.prepare(record, attachments)?;
        let mut draft = record.clone();
        draft.media.extend(batch.refs.iter().cloned());
        let rendered = render_capture(&draft, self.layout.media_link_base());
        let path = self.layout.capture_dir().join(&rendered.file_name);

        let report = backup_before_overwrite(&path, &self.backup_policy);
        if let Err(err) = write_atomic(&path, rendered.text.as_bytes(), WriteMode::Overwrite) {
            batch.rollback();
            return Err(CaptureError::WriteFailed(err));
        }
        Ok(SavedCapture {
            id: draft.id,
            path,
            media: draft.media,
            backup: Some(report),
        })
    }

    fn prepare(
        &self,
        record: &CaptureRecord,
        attachments: &[MediaAttachment],
    ) -> CaptureResult<MediaBatch> {
        record.validate()?;
        self.layout.ensure()?;
        let store = MediaStore::new(
            self.layout.media_dir(),
            self.dedup_media,
            self.max_name_attempts,
        );
        Ok(store.store_all(attachments, record.timestamp)?)
    }

    /// Reads and parses the capture stored under `id`.
    pub fn read_capture(&self, id: &CaptureId) -> CaptureResult<ParsedCapture> {
        let path = self.capture_path(id);
        read_capture_file(&path)
    }

    /// Reads the capture stored under `id` back into a record.
    pub fn load_record(&self, id: &CaptureId) -> CaptureResult<CaptureRecord> {
        self.read_capture(id)
            .map(|parsed| parsed.to_record(self.layout.media_link_base()))
    }

    /// Lists capture files, most recently modified first.
    ///
    /// A missing capture directory means no captures yet.
    pub fn list_captures(&self) -> CaptureResult<Vec<PathBuf>> {
        let dir = self.layout.capture_dir();
        let read_error = |source| CaptureError::ReadFailed {
            path: dir.to_path_buf(),
            source,
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(read_error(err)),
        };

        let mut captures: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(read_error)?;
            let path = entry.path();
            if !is_capture_file(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_file() {
                captures.push((metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH), path));
            }
        }
        captures.sort_by(|left, right| right.cmp(left));
        Ok(captures.into_iter().map(|(_, path)| path).collect())
    }
}

fn is_capture_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| !name.starts_with('.'));
    visible && path.extension().and_then(|ext| ext.to_str()) == Some(CAPTURE_EXTENSION)
}

/// Reads and parses one capture file.
pub fn read_capture_file(path: &Path) -> CaptureResult<ParsedCapture> {
    let text = std::fs::read_to_string(path).map_err(|source| CaptureError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    parse_capture(&text).map_err(|source| CaptureError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::{CaptureEngine, CaptureError};
    use crate::config::EngineConfig;
    use crate::model::capture::CaptureRecord;
    use crate::model::capture_id::CaptureId;

    fn engine(root: &std::path::Path) -> CaptureEngine {
        CaptureEngine::new(&EngineConfig::for_vault(root)).unwrap()
    }

    #[test]
    fn save_creates_directories_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir.path().join("vault"));
        assert!(engine.list_captures().unwrap().is_empty());

        let saved = engine.save(&CaptureRecord::now("hi"), &[]).unwrap();
        assert!(saved.path.starts_with(engine.layout().capture_dir()));
        assert!(engine.layout().media_dir().is_dir());
        assert!(saved.backup_issues().is_empty());
    }

    #[test]
    fn invalid_record_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut record = CaptureRecord::now("hi");
        record.importance = Some(1.5);

        let err = engine.save(&record, &[]).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidRecord(_)));
        assert_eq!(err.code(), "invalid_record");
        assert!(!engine.layout().capture_dir().exists());
    }

    #[test]
    fn missing_capture_is_read_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let id = CaptureId::parse("20250101_000000_000").unwrap();
        assert!(matches!(
            engine.read_capture(&id),
            Err(CaptureError::ReadFailed { .. })
        ));
    }

    #[test]
    fn list_skips_hidden_and_non_markdown_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let saved = engine.save(&CaptureRecord::now("hi"), &[]).unwrap();
        let capture_dir = engine.layout().capture_dir();
        std::fs::write(capture_dir.join(".a.md.123.tmp"), b"x").unwrap();
        std::fs::write(capture_dir.join(".hidden.md"), b"x").unwrap();
        std::fs::write(capture_dir.join("a.md.backup.1"), b"x").unwrap();

        assert_eq!(engine.list_captures().unwrap(), vec![saved.path]);
    }
}
