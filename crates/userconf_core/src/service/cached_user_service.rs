//! Cache-aside decorator for `UserService`.
//!
//! # Responsibility
//! - Serve `get_user` through the cache under `user:<client_id>`.
//! - Invalidate the client's key whenever a user is created.
//!
//! # Invariants
//! - Absent users are not cached, so a later create is visible at once.

use crate::cache::{CacheAside, CacheClient};
use crate::codec::{MessagePackSerializer, Serializer};
use crate::model::document::Document;
use crate::model::user::{UserConfig, UserInput};
use crate::repo::document_repo::{DocumentRepository, RepoResult};
use crate::repo::query::Query;
use crate::service::user_service::UserService;

pub const USER_CACHE_PREFIX: &str = "user:";

/// `UserService` with cache-aside reads.
pub struct CachedUserService<'c, R, S = MessagePackSerializer> {
    inner: UserService<R>,
    cache: CacheAside<'c, S>,
}

impl<'c, R, S> CachedUserService<'c, R, S>
where
    R: DocumentRepository<Value = UserConfig, Query = Query>,
    S: Serializer,
{
    /// Wraps `inner`; cached entries live for `ttl` seconds (`None` = forever).
    pub fn new(inner: UserService<R>, cache: &'c CacheClient<S>, ttl: Option<u64>) -> Self {
        Self {
            inner,
            cache: CacheAside::new(cache, USER_CACHE_PREFIX, ttl),
        }
    }

    pub fn get_user(&self, client_id: &str) -> RepoResult<Option<Document<UserConfig>>> {
        self.cache
            .fetch(client_id, || self.inner.get_user(client_id))
    }

    pub fn create(&self, input: UserInput) -> RepoResult<Option<Document<UserConfig>>> {
        let client_id = input.client_id.clone();
        let created = self.inner.create(input)?;
        self.cache.invalidate(&client_id);
        Ok(created)
    }

    /// Drops the cached entry for one client.
    pub fn invalidate(&self, client_id: &str) -> bool {
        self.cache.invalidate(client_id)
    }

    pub fn inner(&self) -> &UserService<R> {
        &self.inner
    }
}
