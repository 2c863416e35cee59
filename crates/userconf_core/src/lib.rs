//! Core of the user configuration store.
//! Document repository, cache client and the user service built on them.

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use cache::{CacheAside, CacheClient, CacheError, CacheOptions, TTL_MISSING, TTL_PERSISTENT};
pub use codec::{CodecError, JsonSerializer, MessagePackSerializer, Serializer};
pub use config::{ConfigError, Settings};
pub use context::{AppContext, ContextError, ContextResult};
pub use logging::{default_log_level, init_logging, init_logging_from, logging_status};
pub use model::document::{Document, DocumentId};
pub use model::user::{UserConfig, UserInput};
pub use repo::document_repo::{
    BatchFailure, BatchUpdate, CreateManyOutcome, DocumentRepository, RepoError, RepoResult,
    SqliteDocumentRepository, UpdateManyOutcome,
};
pub use repo::query::{Criterion, Patch, Query, SortOrder};
pub use service::cached_user_service::CachedUserService;
pub use service::user_service::UserService;

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
