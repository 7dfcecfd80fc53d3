//! Capture persistence engine for a markdown knowledge vault.
//! This crate is the single source of truth for capture file invariants.

pub mod config;
pub mod frontmatter;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;
pub mod vault;

pub use config::{BackupConfig, ConfigError, EngineConfig};
pub use frontmatter::{parse_capture, render_capture, CaptureHeader, ParsedCapture};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::capture::{CaptureRecord, CaptureValidationError, LabelSet, Modality, ProcessingStatus};
pub use model::capture_id::{CaptureId, CaptureIdError};
pub use model::media::{MediaAttachment, MediaKind, MediaRef};
pub use service::capture_service::{
    read_capture_file, CaptureEngine, CaptureError, CaptureResult, SavedCapture,
};
pub use store::backup::{BackupError, BackupPolicy, BackupReport};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
