//! Capture document format.
//!
//! # Responsibility
//! - Render a `CaptureRecord` into `{identifier}.md` with a metadata header.
//! - Parse capture documents back into typed headers and records.
//!
//! # Invariants
//! - Header field order is fixed; list fields render as sequences even when empty.
//! - No blank line follows the closing separator.
//! - Body sections appear only when their data is non-empty.
//! - Rendering cannot fail for a validated record.

pub mod parse;
pub mod render;

pub use parse::{parse_capture, CaptureHeader, FrontmatterParseError, ParsedCapture};
pub use render::{media_link, render_capture, RenderedCapture};
