//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the generic document CRUD contract.
//! - Isolate SQLite/JSON query details from service orchestration.
//!
//! # Invariants
//! - Repository failures are returned to the caller, never downgraded.
//! - Not-found is `None` or an empty result, not an error.

pub mod document_repo;
pub mod query;
pub mod user_repo;
