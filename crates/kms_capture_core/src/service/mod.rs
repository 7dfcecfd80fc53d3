//! Engine use-case services.
//!
//! # Responsibility
//! - Expose the capture engine entry points to front-ends.
//! - Keep CLI and server collaborators decoupled from file layout details.

pub mod capture_service;
