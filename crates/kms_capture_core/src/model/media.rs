//! Media attachment model.
//!
//! # Invariants
//! - `MediaRef::relative_path` is relative to the vault media root, never absolute.
//! - `MediaAttachment` carries already-produced bytes; the engine never invokes
//!   capture tools itself.

use serde::{Deserialize, Serialize};

const MAX_EXTENSION_CHARS: usize = 8;

/// Declared kind of an attached blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Screenshot,
    Audio,
    Image,
    File,
}

impl MediaKind {
    /// All kinds, in the order their body sections are rendered.
    pub const ALL: [MediaKind; 4] = [Self::Screenshot, Self::Audio, Self::Image, Self::File];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Fallback extension used when the attachment name carries none.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Screenshot | Self::Image => "png",
            Self::Audio => "wav",
            Self::File => "bin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "screenshot" => Some(Self::Screenshot),
            "audio" | "system-audio" | "system_audio" => Some(Self::Audio),
            "image" => Some(Self::Image),
            "file" | "files" => Some(Self::File),
            _ => None,
        }
    }
}

/// Reference to a persisted attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Display name supplied by the caller.
    pub name: String,
    pub kind: MediaKind,
    /// Path relative to the media root, using `/` separators.
    pub relative_path: String,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub content_hash: Option<String>,
}

/// One attachment handed to the engine alongside a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub name: String,
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
}

impl MediaAttachment {
    pub fn new(name: impl Into<String>, kind: MediaKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes: bytes.into(),
        }
    }

    /// Extension for the stored file: the display name's extension when it is
    /// short and alphanumeric, the kind default otherwise. Always lowercase.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| {
                !ext.is_empty()
                    && ext.len() <= MAX_EXTENSION_CHARS
                    && ext.chars().all(|ch| ch.is_ascii_alphanumeric())
            })
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| self.kind.default_extension().to_string())
    }
}
