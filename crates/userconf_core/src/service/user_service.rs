//! User configuration use-case service.
//!
//! # Responsibility
//! - Look users up by their external `client_id`.
//! - Create users from caller input with unset fields stripped.
//!
//! # Invariants
//! - Service APIs never bypass repository persistence contracts.
//! - No caching happens here; see `CachedUserService` for the opt-in variant.

use crate::model::document::Document;
use crate::model::user::{UserConfig, UserInput};
use crate::repo::document_repo::{DocumentRepository, RepoResult};
use crate::repo::query::Query;
use crate::repo::user_repo::client_id_query;
use log::info;

/// Use-case facade over one user repository.
pub struct UserService<R> {
    repo: R,
}

impl<R> UserService<R>
where
    R: DocumentRepository<Value = UserConfig, Query = Query>,
{
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns the first user whose `client_id` matches.
    pub fn get_user(&self, client_id: &str) -> RepoResult<Option<Document<UserConfig>>> {
        self.repo.select(&client_id_query(client_id))
    }

    /// Creates a user; blank strings and unset flags are not stored.
    pub fn create(&self, input: UserInput) -> RepoResult<Option<Document<UserConfig>>> {
        let config = input.into_config();
        let created = self.repo.create(&config)?;
        if let Some(document) = created.as_ref() {
            info!(
                "event=user_create module=service status=ok collection={} id={}",
                self.repo.collection(),
                document.id
            );
        }
        Ok(created)
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }
}
