//! Explicit application context owning the store and cache connections.
//!
//! # Responsibility
//! - Open the document store and, when enabled, the cache from `Settings`.
//! - Hand out user services bound to the owned connections.
//! - Release both connections on shutdown.
//!
//! # Invariants
//! - A failed cache connect releases the already-open store before returning.
//! - The store connection outlives every service borrowed from the context.

use crate::cache::{CacheClient, CacheError};
use crate::config::{ConfigError, Settings};
use crate::db::{open_db_in_memory, open_db_with, DbError};
use crate::model::document::Document;
use crate::model::user::{UserConfig, UserInput};
use crate::repo::document_repo::RepoResult;
use crate::repo::user_repo::{user_repository, SqliteUserRepository};
use crate::service::cached_user_service::CachedUserService;
use crate::service::user_service::UserService;
use log::{error, info};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Debug)]
pub enum ContextError {
    Config(ConfigError),
    Db(DbError),
    Cache(CacheError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Db(err) => write!(f, "document store unavailable: {err}"),
            Self::Cache(err) => write!(f, "cache unavailable: {err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Cache(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ContextError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for ContextError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<CacheError> for ContextError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}

/// Connections shared by one process.
pub struct AppContext {
    settings: Settings,
    db: Connection,
    cache: Option<CacheClient>,
}

impl AppContext {
    /// Opens the store, then the cache when `settings.cache.enabled`.
    ///
    /// # Errors
    /// - `ContextError::Db` when the store cannot be opened or migrated.
    /// - `ContextError::Cache` when the cache cannot connect; the store is
    ///   closed first.
    pub fn open(settings: &Settings) -> ContextResult<Self> {
        let started_at = Instant::now();
        let db = match settings.database.path.as_ref() {
            Some(path) => open_db_with(path, settings.db_options())?,
            None => open_db_in_memory()?,
        };

        let cache = if settings.cache.enabled {
            let mut client = CacheClient::new(settings.cache_options());
            if let Err(err) = client.connect() {
                error!(
                    "event=context_open module=context status=error stage=cache duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                close_store(db);
                return Err(err.into());
            }
            Some(client)
        } else {
            None
        };

        info!(
            "event=context_open module=context status=ok cache={} duration_ms={}",
            cache.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            settings: settings.clone(),
            db,
            cache,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn connection(&self) -> &Connection {
        &self.db
    }

    /// Connected cache, or `None` when caching is disabled.
    pub fn cache(&self) -> Option<&CacheClient> {
        self.cache.as_ref()
    }

    /// Uncached user service over the owned store.
    pub fn user_service(&self) -> RepoResult<UserService<SqliteUserRepository<'_>>> {
        Ok(UserService::new(user_repository(&self.db)?))
    }

    /// Cached user service, or `None` when caching is disabled.
    pub fn cached_user_service(
        &self,
    ) -> RepoResult<Option<CachedUserService<'_, SqliteUserRepository<'_>>>> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(None);
        };
        let service = self.user_service()?;
        Ok(Some(CachedUserService::new(
            service,
            cache,
            self.settings.cache.default_ttl_secs,
        )))
    }

    /// Looks a user up, through the cache when one is configured.
    pub fn get_user(&self, client_id: &str) -> RepoResult<Option<Document<UserConfig>>> {
        match self.cached_user_service()? {
            Some(service) => service.get_user(client_id),
            None => self.user_service()?.get_user(client_id),
        }
    }

    /// Creates a user, invalidating its cache entry when a cache is configured.
    pub fn create_user(&self, input: UserInput) -> RepoResult<Option<Document<UserConfig>>> {
        match self.cached_user_service()? {
            Some(service) => service.create(input),
            None => self.user_service()?.create(input),
        }
    }

    /// Closes the cache, then the store.
    pub fn shutdown(mut self) {
        if let Some(mut cache) = self.cache.take() {
            cache.close();
        }
        close_store(self.db);
        info!("event=context_shutdown module=context status=ok");
    }
}

fn close_store(conn: Connection) {
    if let Err((_, err)) = conn.close() {
        error!(
            "event=db_close module=context status=error error={}",
            err
        );
    }
}
