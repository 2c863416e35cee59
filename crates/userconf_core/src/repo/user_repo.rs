//! `users` collection bindings.
//!
//! # Responsibility
//! - Name the collection holding user configurations.
//! - Build the natural-key query used by the user service.

use crate::model::user::{UserConfig, CLIENT_ID_FIELD};
use crate::repo::document_repo::{RepoResult, SqliteDocumentRepository};
use crate::repo::query::Query;
use rusqlite::Connection;

pub const USERS_COLLECTION: &str = "users";

pub type SqliteUserRepository<'conn> = SqliteDocumentRepository<'conn, UserConfig>;

/// Opens the `users` repository on a migrated connection.
pub fn user_repository(conn: &Connection) -> RepoResult<SqliteUserRepository<'_>> {
    SqliteDocumentRepository::try_new(conn, USERS_COLLECTION)
}

/// Query matching a user by its external `client_id`.
pub fn client_id_query(client_id: &str) -> Query {
    Query::new().eq(CLIENT_ID_FIELD, client_id)
}
