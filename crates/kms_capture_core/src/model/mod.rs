//! Capture domain model.
//!
//! # Responsibility
//! - Define the capture record, its identifier and its media references.
//! - Keep modality and media vocabularies closed so new variants are
//!   compile-time visible to the serializer.
//!
//! # Invariants
//! - Every capture is identified by a filesystem-safe `CaptureId`.
//! - Media references are relative to the vault media root.

pub mod capture;
pub mod capture_id;
pub mod media;
