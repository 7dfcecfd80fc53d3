//! Capture record domain model.
//!
//! # Responsibility
//! - Define the in-memory record handed to the engine by front-ends.
//! - Normalize tag/source sets and validate record-level invariants.
//!
//! # Invariants
//! - Tags and sources are case-insensitive sets; the first spelling wins.
//! - `importance`, when set, is a finite number in `[0, 1]`.
//! - `timestamp` is stored in UTC.

use crate::model::capture_id::{CaptureId, CaptureIdError};
use crate::model::media::{MediaAttachment, MediaKind, MediaRef};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Closed vocabulary of capture modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    Text,
    Clipboard,
    Screenshot,
    Audio,
    SystemAudio,
    File,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Clipboard => "clipboard",
            Self::Screenshot => "screenshot",
            Self::Audio => "audio",
            Self::SystemAudio => "system-audio",
            Self::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "clipboard" => Some(Self::Clipboard),
            "screenshot" => Some(Self::Screenshot),
            "audio" => Some(Self::Audio),
            "system-audio" | "system_audio" => Some(Self::SystemAudio),
            "file" | "files" => Some(Self::File),
            _ => None,
        }
    }
}

/// Downstream processing state of a capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Raw,
    Processed,
    Archived,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
            Self::Archived => "archived",
        }
    }
}

/// Ordered set of labels compared case-insensitively.
///
/// Blank entries are dropped and surrounding whitespace is trimmed. The first
/// spelling of a label is kept, so `["ML", "ml"]` collapses to `["ML"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    items: Vec<String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one label. Returns `false` for blanks and case-insensitive duplicates.
    pub fn insert(&mut self, value: impl AsRef<str>) -> bool {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() || self.contains(trimmed) {
            return false;
        }
        self.items.push(trimmed.to_string());
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        let needle = value.trim().to_lowercase();
        self.items.iter().any(|item| item.to_lowercase() == needle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }
}

impl<S: AsRef<str>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

impl From<Vec<String>> for LabelSet {
    fn from(value: Vec<String>) -> Self {
        value.into_iter().collect()
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(value: LabelSet) -> Self {
        value.items
    }
}

/// Record-level validation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureValidationError {
    InvalidId(CaptureIdError),
    ImportanceOutOfRange(f64),
    /// A media reference carries an absolute or parent-escaping path.
    InvalidMediaPath(String),
}

impl Display for CaptureValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidId(err) => write!(f, "{err}"),
            Self::ImportanceOutOfRange(value) => {
                write!(f, "importance must be a finite number in [0, 1], got {value}")
            }
            Self::InvalidMediaPath(path) => {
                write!(f, "media path `{path}` must be relative to the media root")
            }
        }
    }
}

impl Error for CaptureValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidId(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CaptureIdError> for CaptureValidationError {
    fn from(value: CaptureIdError) -> Self {
        Self::InvalidId(value)
    }
}

/// One user-authored capture, built transiently by a front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub id: CaptureId,
    /// Capture instant, normalized to UTC.
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Clipboard text captured alongside the note, if any.
    pub clipboard: Option<String>,
    pub modalities: BTreeSet<Modality>,
    /// Context entities (activity, project, place); exact-match deduplicated.
    pub context: Vec<String>,
    pub tags: LabelSet,
    pub sources: LabelSet,
    /// Persisted attachments. Filled by the engine during save.
    pub media: Vec<MediaRef>,
    pub status: ProcessingStatus,
    pub importance: Option<f64>,
    /// Opaque location payload passed through to the header.
    pub location: Option<serde_json::Value>,
    /// Opaque metadata map passed through to the header.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_date: NaiveDate,
    pub last_edited_date: NaiveDate,
}

impl CaptureRecord {
    /// Creates a text capture with an identifier derived from `timestamp`.
    ///
    /// # Invariants
    /// - `created_date` and `last_edited_date` default to the UTC capture date.
    /// - Modalities start as `{Text}`; every other collection starts empty.
    pub fn new<Tz: TimeZone>(timestamp: DateTime<Tz>, content: impl Into<String>) -> Self {
        let timestamp = timestamp.with_timezone(&Utc);
        Self::with_id(CaptureId::generate(timestamp), timestamp, content)
    }

    /// Creates a text capture stamped with the current time.
    pub fn now(content: impl Into<String>) -> Self {
        Self::new(Utc::now(), content)
    }

    /// Creates a capture with a caller-provided identifier.
    pub fn with_id<Tz: TimeZone>(
        id: CaptureId,
        timestamp: DateTime<Tz>,
        content: impl Into<String>,
    ) -> Self {
        let timestamp = timestamp.with_timezone(&Utc);
        let date = timestamp.date_naive();
        Self {
            id,
            timestamp,
            content: content.into(),
            clipboard: None,
            modalities: BTreeSet::from([Modality::Text]),
            context: Vec::new(),
            tags: LabelSet::new(),
            sources: LabelSet::new(),
            media: Vec::new(),
            status: ProcessingStatus::default(),
            importance: None,
            location: None,
            metadata: serde_json::Map::new(),
            created_date: date,
            last_edited_date: date,
        }
    }

    /// Adds one context entity, ignoring blanks and exact duplicates.
    pub fn add_context(&mut self, value: impl AsRef<str>) {
        let trimmed = value.as_ref().trim();
        if !trimmed.is_empty() && !self.context.iter().any(|item| item == trimmed) {
            self.context.push(trimmed.to_string());
        }
    }

    /// Validates record invariants before any file is touched.
    pub fn validate(&self) -> Result<(), CaptureValidationError> {
        CaptureId::parse(self.id.as_str())?;
        if let Some(value) = self.importance {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CaptureValidationError::ImportanceOutOfRange(value));
            }
        }
        for media in &self.media {
            if !is_portable_relative_path(&media.relative_path) {
                return Err(CaptureValidationError::InvalidMediaPath(
                    media.relative_path.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Lists selected modalities that have nothing to show for them.
    ///
    /// `attachments` are the buffers about to be saved with this record; media
    /// already referenced by the record also count.
    pub fn missing_modality_content(&self, attachments: &[MediaAttachment]) -> Vec<Modality> {
        let has_kind = |kind: MediaKind| {
            self.media.iter().any(|media| media.kind == kind)
                || attachments.iter().any(|attachment| attachment.kind == kind)
        };
        self.modalities
            .iter()
            .copied()
            .filter(|modality| match modality {
                Modality::Text => self.content.trim().is_empty(),
                Modality::Clipboard => false,
                Modality::Screenshot => !has_kind(MediaKind::Screenshot),
                Modality::Audio | Modality::SystemAudio => !has_kind(MediaKind::Audio),
                Modality::File => !has_kind(MediaKind::File) && !has_kind(MediaKind::Image),
            })
            .collect()
    }
}

fn is_portable_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains(':')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
