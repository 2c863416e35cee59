//! Generic document repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide typed, collection-scoped CRUD over the `documents` table.
//! - Keep SQL and JSON-path details inside the persistence boundary.
//!
//! # Invariants
//! - Identifiers are generated on insert and never rewritten.
//! - Single-document updates resolve the target id first, then write and
//!   re-read by that id.
//! - A patch is committed only if every document it changed still decodes
//!   as the repository's value type.
//! - `delete` reports exactly the documents it removed.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::document::{Document, DocumentId, ID_FIELD};
use crate::repo::query::{json_kind, Patch, Query};
use log::{debug, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

const DOCUMENT_SELECT_SQL: &str = "SELECT id, body FROM documents";

/// Upper bound of ids bound into one `IN (...)` list.
const ID_CHUNK_SIZE: usize = 500;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for document persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Query references an unusable field or comparison.
    InvalidQuery(String),
    /// Patch is not an object or touches the identifier.
    InvalidPatch(String),
    /// Value or persisted row does not have the expected shape.
    InvalidData(String),
    Serialization(String),
    InvalidCollection(String),
    MissingRequiredTable(&'static str),
    SchemaVersionMismatch { expected: u32, actual: u32 },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::InvalidPatch(message) => write!(f, "invalid patch: {message}"),
            Self::InvalidData(message) => write!(f, "invalid document data: {message}"),
            Self::Serialization(message) => write!(f, "document serialization failed: {message}"),
            Self::InvalidCollection(name) => write!(f, "invalid collection name `{name}`"),
            Self::MissingRequiredTable(table) => {
                write!(f, "document repository requires table `{table}`")
            }
            Self::SchemaVersionMismatch { expected, actual } => write!(
                f,
                "document store schema version {actual} does not match expected {expected}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One item of a batch update. Items missing either part are skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdate<Q = Query> {
    pub query: Option<Q>,
    pub patch: Option<Patch>,
}

impl<Q> BatchUpdate<Q> {
    pub fn new(query: Q, patch: Patch) -> Self {
        Self {
            query: Some(query),
            patch: Some(patch),
        }
    }
}

/// Failure of one batch item, identified by its input position.
#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: RepoError,
}

/// Result of `create_many`: inserted documents plus per-item failures.
#[derive(Debug)]
pub struct CreateManyOutcome<T> {
    /// Inserted documents in input order.
    pub created: Vec<Document<T>>,
    pub failed: Vec<BatchFailure>,
}

/// Result of `update_many`.
#[derive(Debug, Default)]
pub struct UpdateManyOutcome {
    /// Documents whose body changed, summed over items.
    pub modified: u64,
    /// Items without a usable query or patch.
    pub skipped: usize,
    pub failed: Vec<BatchFailure>,
}

/// Typed CRUD contract over one collection of a document store.
pub trait DocumentRepository {
    type Value;
    type Query;

    fn collection(&self) -> &str;
    /// Inserts one value and returns it re-read from the store.
    fn create(&self, value: &Self::Value) -> RepoResult<Option<Document<Self::Value>>>;
    /// Inserts values independently; failures do not roll back earlier items.
    fn create_many(&self, values: &[Self::Value]) -> RepoResult<CreateManyOutcome<Self::Value>>;
    fn select(&self, query: &Self::Query) -> RepoResult<Option<Document<Self::Value>>>;
    fn select_many(
        &self,
        query: &Self::Query,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> RepoResult<Vec<Document<Self::Value>>>;
    /// Merge-patches the first match and returns its post-update view.
    fn update(
        &self,
        query: &Self::Query,
        patch: &Patch,
    ) -> RepoResult<Option<Document<Self::Value>>>;
    fn update_by_id(
        &self,
        id: &DocumentId,
        patch: &Patch,
    ) -> RepoResult<Option<Document<Self::Value>>>;
    /// Applies every item to all of its matches independently.
    fn update_many(&self, batch: &[BatchUpdate<Self::Query>]) -> RepoResult<UpdateManyOutcome>;
    /// Deletes all matches and returns their pre-deletion snapshot.
    fn delete(&self, query: &Self::Query) -> RepoResult<Vec<Document<Self::Value>>>;
    fn exists(&self, query: &Self::Query) -> RepoResult<bool>;
    fn count(&self, query: &Self::Query) -> RepoResult<u64>;
}

/// SQLite-backed document repository for values of type `T`.
pub struct SqliteDocumentRepository<'conn, T> {
    conn: &'conn Connection,
    collection: String,
    _value: PhantomData<fn() -> T>,
}

impl<'conn, T> SqliteDocumentRepository<'conn, T> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection, collection: impl Into<String>) -> RepoResult<Self> {
        let collection = collection.into();
        if collection.trim().is_empty() || collection.trim() != collection {
            return Err(RepoError::InvalidCollection(collection));
        }
        ensure_document_connection_ready(conn)?;
        Ok(Self {
            conn,
            collection,
            _value: PhantomData,
        })
    }

    /// Returns a repository over the same collection decoding into `U`.
    pub fn with_model<U>(&self) -> SqliteDocumentRepository<'conn, U> {
        SqliteDocumentRepository {
            conn: self.conn,
            collection: self.collection.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> SqliteDocumentRepository<'_, T>
where
    T: Serialize + DeserializeOwned,
{
    fn insert_one(&self, value: &T) -> RepoResult<Option<DocumentId>> {
        let body = encode_body(value)?;
        let id = DocumentId::generate();
        let changed = self.conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, json(?3));",
            params![self.collection.as_str(), id.as_str(), body],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(id))
    }

    fn find_by_id(&self, id: &DocumentId) -> RepoResult<Option<Document<T>>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DOCUMENT_SELECT_SQL}
             WHERE collection = ?1
               AND id = ?2;"
        ))?;

        let mut rows = stmt.query(params![self.collection.as_str(), id.as_str()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_document_row(row)?));
        }

        Ok(None)
    }

    fn find_by_ids(&self, ids: &[DocumentId]) -> RepoResult<Vec<Document<T>>> {
        let mut documents = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let query = Query::new().is_in(ID_FIELD, chunk.iter().map(DocumentId::as_str));
            documents.extend(self.query_documents(&query, None, None)?);
        }
        Ok(documents)
    }

    fn query_documents(
        &self,
        query: &Query,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> RepoResult<Vec<Document<T>>> {
        let compiled = query.compile()?;
        let mut sql = format!(
            "{DOCUMENT_SELECT_SQL} WHERE collection = ?{}{}",
            compiled.predicate, compiled.order
        );
        let mut bind_values = vec![SqlValue::Text(self.collection.clone())];
        bind_values.extend(compiled.predicate_binds);
        bind_values.extend(compiled.order_binds);

        match (limit, offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                bind_values.push(SqlValue::Integer(i64::from(limit)));
                if let Some(offset) = offset.filter(|offset| *offset > 0) {
                    sql.push_str(" OFFSET ?");
                    bind_values.push(SqlValue::Integer(i64::from(offset)));
                }
            }
            (None, Some(offset)) if offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                bind_values.push(SqlValue::Integer(i64::from(offset)));
            }
            (None, _) => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }

        Ok(documents)
    }

    fn first_id(&self, query: &Query) -> RepoResult<Option<DocumentId>> {
        let compiled = query.compile()?;
        let sql = format!(
            "SELECT id FROM documents WHERE collection = ?{}{} LIMIT 1",
            compiled.predicate, compiled.order
        );
        let mut bind_values = vec![SqlValue::Text(self.collection.clone())];
        bind_values.extend(compiled.predicate_binds);
        bind_values.extend(compiled.order_binds);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        if let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            return Ok(Some(DocumentId::from(id)));
        }
        Ok(None)
    }

    /// Patches every match whose body would actually change.
    ///
    /// Commits only when every patched body still decodes as `T`.
    fn patch_matching(&self, query: &Query, patch: &Patch) -> RepoResult<u64> {
        let patch_json = patch.to_json()?;
        let compiled = query.compile()?;
        let sql = format!(
            "UPDATE documents
             SET
                body = json_patch(body, json(?)),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE collection = ?
               AND body != json_patch(body, json(?)){}
             RETURNING id, body",
            compiled.predicate
        );
        let mut bind_values = vec![
            SqlValue::Text(patch_json.clone()),
            SqlValue::Text(self.collection.clone()),
            SqlValue::Text(patch_json),
        ];
        bind_values.extend(compiled.predicate_binds);

        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0_u64;
        {
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            while let Some(row) = rows.next()? {
                parse_document_row::<T>(row)?;
                changed += 1;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn scalar_query(&self, select: &str, query: &Query) -> RepoResult<i64> {
        let compiled = query.compile()?;
        let sql = format!(
            "SELECT {select} FROM documents WHERE collection = ?{}",
            compiled.predicate
        );
        let mut bind_values = vec![SqlValue::Text(self.collection.clone())];
        bind_values.extend(compiled.predicate_binds);

        let value = self
            .conn
            .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(value)
    }
}

impl<T> DocumentRepository for SqliteDocumentRepository<'_, T>
where
    T: Serialize + DeserializeOwned,
{
    type Value = T;
    type Query = Query;

    fn collection(&self) -> &str {
        self.collection.as_str()
    }

    fn create(&self, value: &T) -> RepoResult<Option<Document<T>>> {
        let Some(id) = self.insert_one(value)? else {
            return Ok(None);
        };
        debug!(
            "event=repo_create module=repo status=ok collection={} id={}",
            self.collection, id
        );
        self.find_by_id(&id)
    }

    fn create_many(&self, values: &[T]) -> RepoResult<CreateManyOutcome<T>> {
        let mut ids = Vec::with_capacity(values.len());
        let mut failed = Vec::new();

        for (index, value) in values.iter().enumerate() {
            match self.insert_one(value) {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => failed.push(BatchFailure {
                    index,
                    error: RepoError::InvalidData("insert reported no assigned id".to_string()),
                }),
                Err(error) => {
                    warn!(
                        "event=repo_create_many module=repo status=item_error collection={} index={} error={}",
                        self.collection, index, error
                    );
                    failed.push(BatchFailure { index, error });
                }
            }
        }

        let created = self.find_by_ids(&ids)?;
        debug!(
            "event=repo_create_many module=repo status=ok collection={} created={} failed={}",
            self.collection,
            created.len(),
            failed.len()
        );
        Ok(CreateManyOutcome { created, failed })
    }

    fn select(&self, query: &Query) -> RepoResult<Option<Document<T>>> {
        Ok(self.query_documents(query, None, Some(1))?.into_iter().next())
    }

    fn select_many(
        &self,
        query: &Query,
        offset: Option<u32>,
        limit: Option<u32>,
    ) -> RepoResult<Vec<Document<T>>> {
        self.query_documents(query, offset, limit)
    }

    fn update(&self, query: &Query, patch: &Patch) -> RepoResult<Option<Document<T>>> {
        // Validate the patch before resolving the target.
        patch.to_json()?;
        let Some(id) = self.first_id(query)? else {
            return Ok(None);
        };
        self.update_by_id(&id, patch)
    }

    fn update_by_id(&self, id: &DocumentId, patch: &Patch) -> RepoResult<Option<Document<T>>> {
        let patch_json = patch.to_json()?;
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE documents
             SET
                body = json_patch(body, json(?3)),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE collection = ?1
               AND id = ?2;",
            params![self.collection.as_str(), id.as_str(), patch_json],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        // Reject the write when the patched body no longer decodes.
        let updated = self.find_by_id(id)?;
        tx.commit()?;
        debug!(
            "event=repo_update module=repo status=ok collection={} id={}",
            self.collection, id
        );
        Ok(updated)
    }

    fn update_many(&self, batch: &[BatchUpdate]) -> RepoResult<UpdateManyOutcome> {
        let mut outcome = UpdateManyOutcome::default();

        for (index, item) in batch.iter().enumerate() {
            let (Some(query), Some(patch)) = (item.query.as_ref(), item.patch.as_ref()) else {
                outcome.skipped += 1;
                continue;
            };
            if query.is_empty() || patch.is_empty() {
                outcome.skipped += 1;
                continue;
            }

            match self.patch_matching(query, patch) {
                Ok(modified) => outcome.modified += modified,
                Err(error) => {
                    warn!(
                        "event=repo_update_many module=repo status=item_error collection={} index={} error={}",
                        self.collection, index, error
                    );
                    outcome.failed.push(BatchFailure { index, error });
                }
            }
        }

        debug!(
            "event=repo_update_many module=repo status=ok collection={} modified={} skipped={} failed={}",
            self.collection,
            outcome.modified,
            outcome.skipped,
            outcome.failed.len()
        );
        Ok(outcome)
    }

    fn delete(&self, query: &Query) -> RepoResult<Vec<Document<T>>> {
        let tx = self.conn.unchecked_transaction()?;
        let snapshot = self.query_documents(query, None, None)?;

        let ids: Vec<&str> = snapshot.iter().map(|document| document.id.as_str()).collect();
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM documents WHERE collection = ? AND id IN ({placeholders});"
            );
            let mut bind_values = vec![SqlValue::Text(self.collection.clone())];
            bind_values.extend(chunk.iter().map(|id| SqlValue::Text((*id).to_string())));
            tx.execute(&sql, params_from_iter(bind_values))?;
        }
        tx.commit()?;

        debug!(
            "event=repo_delete module=repo status=ok collection={} count={}",
            self.collection,
            snapshot.len()
        );
        Ok(snapshot)
    }

    fn exists(&self, query: &Query) -> RepoResult<bool> {
        let compiled = query.compile()?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = ?{})",
            compiled.predicate
        );
        let mut bind_values = vec![SqlValue::Text(self.collection.clone())];
        bind_values.extend(compiled.predicate_binds);

        let exists: i64 = self
            .conn
            .query_row(&sql, params_from_iter(bind_values), |row| row.get(0))?;
        Ok(exists == 1)
    }

    fn count(&self, query: &Query) -> RepoResult<u64> {
        let count = self.scalar_query("COUNT(*)", query)?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative document count `{count}`")))
    }
}

/// Serializes a value to a JSON object body without an `_id` key.
fn encode_body<T: Serialize>(value: &T) -> RepoResult<String> {
    let json =
        serde_json::to_value(value).map_err(|err| RepoError::Serialization(err.to_string()))?;
    match json {
        serde_json::Value::Object(mut fields) => {
            fields.remove(ID_FIELD);
            serde_json::to_string(&fields).map_err(|err| RepoError::Serialization(err.to_string()))
        }
        other => Err(RepoError::InvalidData(format!(
            "value must serialize to a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn parse_document_row<T: DeserializeOwned>(row: &Row<'_>) -> RepoResult<Document<T>> {
    let id: String = row.get("id")?;
    let body: String = row.get("body")?;
    let value = serde_json::from_str::<T>(&body).map_err(|err| {
        RepoError::InvalidData(format!("document `{id}` cannot be decoded: {err}"))
    })?;
    Ok(Document::new(DocumentId::from(id), value))
}

fn ensure_document_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected = latest_version();
    let actual = current_user_version(conn)?;
    if actual != expected {
        return Err(RepoError::SchemaVersionMismatch { expected, actual });
    }

    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'documents'
        );",
        [],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(RepoError::MissingRequiredTable("documents"));
    }
    Ok(())
}
