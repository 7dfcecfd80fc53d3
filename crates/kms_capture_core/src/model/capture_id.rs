//! Capture identifier generation.
//!
//! # Responsibility
//! - Derive filesystem-safe capture identifiers from a capture timestamp.
//! - Provide a higher-entropy regeneration used by the conflict resolver.
//!
//! # Invariants
//! - A `CaptureId` never contains path separators or control characters.
//! - Generated identifiers have millisecond resolution (`YYYYMMDD_HHMMSS_mmm`).
//! - Generation is pure: no I/O, no failure for any valid timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const MAX_ID_BYTES: usize = 120;
const REGENERATED_SUFFIX_CHARS: usize = 8;
const FORBIDDEN_ID_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Identifier validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureIdError {
    Empty,
    TooLong(usize),
    ForbiddenChar(char),
    ControlChar,
    /// Leading dot would produce hidden or relative (`.`, `..`) file names.
    LeadingDot,
}

impl Display for CaptureIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "capture id cannot be empty"),
            Self::TooLong(len) => {
                write!(f, "capture id is {len} bytes; at most {MAX_ID_BYTES} allowed")
            }
            Self::ForbiddenChar(ch) => write!(f, "capture id contains forbidden character `{ch}`"),
            Self::ControlChar => write!(f, "capture id contains a control character"),
            Self::LeadingDot => write!(f, "capture id cannot start with `.`"),
        }
    }
}

impl Error for CaptureIdError {}

/// Filesystem-safe capture identifier, also the stem of the capture file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaptureId(String);

impl CaptureId {
    /// Derives the canonical identifier for a capture started at `timestamp`.
    pub fn generate(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.format(ID_TIMESTAMP_FORMAT).to_string())
    }

    /// Parses and validates a caller-provided identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, CaptureIdError> {
        let value = value.into();
        validate_id(&value)?;
        Ok(Self(value))
    }

    /// Returns a new identifier derived from this one with a random suffix.
    ///
    /// Repeated calls on the same base yield independent suffixes, so the
    /// conflict resolver always regenerates from the original base id.
    pub fn regenerate(&self) -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        let suffix = &entropy[..REGENERATED_SUFFIX_CHARS];
        let mut base = self.0.clone();
        let budget = MAX_ID_BYTES - REGENERATED_SUFFIX_CHARS - 1;
        if base.len() > budget {
            let mut cut = budget;
            while !base.is_char_boundary(cut) {
                cut -= 1;
            }
            base.truncate(cut);
        }
        Self(format!("{base}-{suffix}"))
    }

    /// File name of the markdown document for this capture.
    pub fn file_name(&self) -> String {
        format!("{}.md", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CaptureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CaptureId {
    type Error = CaptureIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CaptureId> for String {
    fn from(value: CaptureId) -> Self {
        value.0
    }
}

fn validate_id(value: &str) -> Result<(), CaptureIdError> {
    if value.trim().is_empty() {
        return Err(CaptureIdError::Empty);
    }
    if value.len() > MAX_ID_BYTES {
        return Err(CaptureIdError::TooLong(value.len()));
    }
    if value.starts_with('.') {
        return Err(CaptureIdError::LeadingDot);
    }
    for ch in value.chars() {
        if ch.is_control() {
            return Err(CaptureIdError::ControlChar);
        }
        if FORBIDDEN_ID_CHARS.contains(&ch) {
            return Err(CaptureIdError::ForbiddenChar(ch));
        }
    }
    Ok(())
}
