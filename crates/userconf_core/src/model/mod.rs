//! Domain and storage models.
//!
//! # Responsibility
//! - Define the document envelope shared by every collection.
//! - Define the user configuration value type and its input shape.
//!
//! # Invariants
//! - Every stored document is identified by a stable `DocumentId`.

pub mod document;
pub mod user;
