//! Best-effort key/value cache over a dedicated SQLite database.
//!
//! # Responsibility
//! - Store serialized values with optional expiry.
//! - Offer single-key, batch and pattern operations.
//!
//! # Invariants
//! - Expired entries are never returned, counted or reported as present.
//! - Apart from `connect`, operations never return errors: failures are
//!   logged and converted to the operation's safe default.
//! - `close` is idempotent.

use crate::codec::{CodecError, MessagePackSerializer, Serializer};
use crate::db::{open_db_in_memory, open_db_with, DbError, DbOptions};
use log::{debug, error, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// `ttl` result for a key without expiry.
pub const TTL_PERSISTENT: i64 = -1;
/// `ttl` result for a missing or expired key.
pub const TTL_MISSING: i64 = -2;

const LIVE_PREDICATE: &str = "(expires_at IS NULL OR expires_at > ?)";
const KEY_CHUNK_SIZE: usize = 500;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug)]
pub enum CacheError {
    /// Cache database could not be opened or bootstrapped.
    Connection(DbError),
    NotConnected,
    Db(rusqlite::Error),
    Codec(CodecError),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(err) => write!(f, "cache connection failed: {err}"),
            Self::NotConnected => write!(f, "cache client is not connected"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connection(err) => Some(err),
            Self::NotConnected => None,
            Self::Db(err) => Some(err),
            Self::Codec(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(value)
    }
}

impl From<CodecError> for CacheError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

/// Where the cache lives and how its connection is tuned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Database file; `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    pub db: DbOptions,
}

/// Cache client with pluggable value codec.
///
/// TTL arguments are whole seconds. A TTL of `0` passed to `set` or
/// `set_many` means "no expiry".
pub struct CacheClient<S = MessagePackSerializer> {
    options: CacheOptions,
    serializer: S,
    conn: Option<Connection>,
}

impl CacheClient<MessagePackSerializer> {
    pub fn new(options: CacheOptions) -> Self {
        Self::with_serializer(options, MessagePackSerializer)
    }
}

impl<S: Serializer> CacheClient<S> {
    pub fn with_serializer(options: CacheOptions, serializer: S) -> Self {
        Self {
            options,
            serializer,
            conn: None,
        }
    }

    /// Opens the cache database, checks it answers a query and purges
    /// expired entries. Calling it while connected is a no-op.
    ///
    /// # Errors
    /// - Returns `CacheError::Connection` when the database cannot be opened,
    ///   migrated or queried.
    pub fn connect(&mut self) -> CacheResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let (conn, mode) = match self.options.path.as_ref() {
            Some(path) => (open_db_with(path, self.options.db), "file"),
            None => (open_db_in_memory(), "memory"),
        };
        let conn = conn.map_err(|err| {
            error!(
                "event=cache_connect module=cache status=error mode={} error={}",
                mode, err
            );
            CacheError::Connection(err)
        })?;
        if let Err(err) = conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0)) {
            error!(
                "event=cache_connect module=cache status=error mode={} stage=ping error={}",
                mode, err
            );
            return Err(CacheError::Connection(err.into()));
        }
        self.conn = Some(conn);

        let purged = self.purge_expired();
        info!(
            "event=cache_connect module=cache status=ok mode={} codec={} purged={}",
            mode,
            self.serializer.name(),
            purged
        );
        Ok(())
    }

    /// Releases the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close() {
                Ok(()) => info!("event=cache_close module=cache status=ok"),
                Err((_, err)) => error!(
                    "event=cache_close module=cache status=error error={}",
                    err
                ),
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns whether the cache database answers a trivial query.
    pub fn ping(&self) -> bool {
        let result = self.conn().and_then(|conn| {
            conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0))
                .map_err(CacheError::from)
        });
        downgrade("ping", "-", result.map(|_| true), false)
    }

    /// Reads and decodes one value; `None` when missing, expired or broken.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        downgrade("get", key, self.try_get(key), None)
    }

    /// Stores one value, replacing any previous value and expiry.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> bool {
        downgrade("set", key, self.try_set(key, value, ttl), false)
    }

    /// Removes a live key. Returns `false` when the key was absent.
    pub fn delete(&self, key: &str) -> bool {
        let result = self.try_delete_keys(&[key]).map(|removed| removed > 0);
        downgrade("delete", key, result, false)
    }

    pub fn exists(&self, key: &str) -> bool {
        downgrade("exists", key, self.try_exists(key), false)
    }

    /// Sets a new expiry on a live key. `ttl = 0` expires it immediately.
    pub fn expire(&self, key: &str, ttl: u64) -> bool {
        downgrade("expire", key, self.try_expire(key, ttl), false)
    }

    /// Seconds until expiry, `TTL_PERSISTENT` or `TTL_MISSING`.
    pub fn ttl(&self, key: &str) -> i64 {
        downgrade("ttl", key, self.try_ttl(key), TTL_MISSING)
    }

    /// Reads several keys; missing and expired keys are omitted.
    pub fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> HashMap<String, T> {
        if keys.is_empty() {
            return HashMap::new();
        }
        downgrade("get_many", "-", self.try_get_many(keys), HashMap::new())
    }

    /// Stores several values in one transaction.
    ///
    /// With a TTL every key receives that expiry; otherwise all keys are
    /// written without expiry.
    pub fn set_many<T: Serialize>(&self, entries: &HashMap<String, T>, ttl: Option<u64>) -> bool {
        if entries.is_empty() {
            return true;
        }
        downgrade("set_many", "-", self.try_set_many(entries, ttl), false)
    }

    /// Removes several keys and returns how many live keys were removed.
    pub fn delete_many(&self, keys: &[&str]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        downgrade("delete_many", "-", self.try_delete_keys(keys), 0)
    }

    /// Removes every live key matching a glob (`*`, `?`, `[...]`).
    ///
    /// Maintenance operation: it scans the whole key space and is not
    /// coordinated with writers on other connections.
    pub fn clear_pattern(&self, pattern: &str) -> u64 {
        downgrade("clear_pattern", pattern, self.try_clear_pattern(pattern), 0)
    }

    /// Physically removes expired rows and returns how many were dropped.
    pub fn purge_expired(&self) -> u64 {
        downgrade("purge_expired", "-", self.try_purge_expired(), 0)
    }

    fn conn(&self) -> CacheResult<&Connection> {
        self.conn.as_ref().ok_or(CacheError::NotConnected)
    }

    fn try_get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let conn = self.conn()?;
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                &format!("SELECT value FROM cache_entries WHERE key = ? AND {LIVE_PREDICATE};"),
                params![key, now_millis()],
                |row| row.get(0),
            )
            .optional()?;

        match bytes {
            Some(bytes) => Ok(Some(self.serializer.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> CacheResult<bool> {
        let conn = self.conn()?;
        let bytes = self.serializer.encode(value)?;
        upsert_entry(conn, key, &bytes, expiry_from_ttl(ttl))?;
        Ok(true)
    }

    fn try_exists(&self, key: &str) -> CacheResult<bool> {
        let conn = self.conn()?;
        let exists: i64 = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM cache_entries WHERE key = ? AND {LIVE_PREDICATE});"),
            params![key, now_millis()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn try_expire(&self, key: &str, ttl: u64) -> CacheResult<bool> {
        let conn = self.conn()?;
        let now = now_millis();
        let changed = conn.execute(
            &format!("UPDATE cache_entries SET expires_at = ? WHERE key = ? AND {LIVE_PREDICATE};"),
            params![now.saturating_add(ttl_millis(ttl)), key, now],
        )?;
        Ok(changed > 0)
    }

    fn try_ttl(&self, key: &str) -> CacheResult<i64> {
        let conn = self.conn()?;
        let now = now_millis();
        let expires_at: Option<Option<i64>> = conn
            .query_row(
                &format!("SELECT expires_at FROM cache_entries WHERE key = ? AND {LIVE_PREDICATE};"),
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match expires_at {
            None => TTL_MISSING,
            Some(None) => TTL_PERSISTENT,
            Some(Some(expires_at)) => ((expires_at - now) + 500) / 1000,
        })
    }

    fn try_get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> CacheResult<HashMap<String, T>> {
        let conn = self.conn()?;
        let now = now_millis();
        let mut found = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(KEY_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT key, value FROM cache_entries WHERE key IN ({placeholders}) AND {LIVE_PREDICATE};"
            );
            let mut bind_values: Vec<SqlValue> = chunk
                .iter()
                .map(|key| SqlValue::Text((*key).to_string()))
                .collect();
            bind_values.push(SqlValue::Integer(now));

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                found.insert(key, self.serializer.decode(&bytes)?);
            }
        }

        Ok(found)
    }

    fn try_set_many<T: Serialize>(
        &self,
        entries: &HashMap<String, T>,
        ttl: Option<u64>,
    ) -> CacheResult<bool> {
        let conn = self.conn()?;
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((key.as_str(), self.serializer.encode(value)?));
        }

        let expires_at = expiry_from_ttl(ttl);
        let tx = conn.unchecked_transaction()?;
        for (key, bytes) in &encoded {
            upsert_entry(&tx, key, bytes, expires_at)?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn try_delete_keys(&self, keys: &[&str]) -> CacheResult<u64> {
        let conn = self.conn()?;
        let now = now_millis();
        let mut removed = 0_u64;

        for chunk in keys.chunks(KEY_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM cache_entries WHERE key IN ({placeholders}) AND {LIVE_PREDICATE};"
            );
            let mut bind_values: Vec<SqlValue> = chunk
                .iter()
                .map(|key| SqlValue::Text((*key).to_string()))
                .collect();
            bind_values.push(SqlValue::Integer(now));
            removed += conn.execute(&sql, params_from_iter(bind_values))? as u64;
        }

        Ok(removed)
    }

    fn try_clear_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let conn = self.conn()?;
        let removed = conn.execute(
            &format!("DELETE FROM cache_entries WHERE key GLOB ? AND {LIVE_PREDICATE};"),
            params![pattern, now_millis()],
        )?;
        debug!(
            "event=cache_clear_pattern module=cache status=ok pattern={} removed={}",
            pattern, removed
        );
        Ok(removed as u64)
    }

    fn try_purge_expired(&self) -> CacheResult<u64> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1;",
            [now_millis()],
        )?;
        Ok(removed as u64)
    }
}

impl<S> Drop for CacheClient<S> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            debug!("event=cache_close module=cache status=ok reason=drop");
        }
    }
}

fn upsert_entry(
    conn: &Connection,
    key: &str,
    bytes: &[u8],
    expires_at: Option<i64>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO cache_entries (key, value, expires_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            expires_at = excluded.expires_at;",
        params![key, bytes, expires_at],
    )
}

fn downgrade<T>(operation: &str, key: &str, result: CacheResult<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            error!(
                "event=cache_{} module=cache status=error key={} error={}",
                operation, key, err
            );
            fallback
        }
    }
}

fn expiry_from_ttl(ttl: Option<u64>) -> Option<i64> {
    ttl.filter(|seconds| *seconds > 0)
        .map(|seconds| now_millis().saturating_add(ttl_millis(seconds)))
}

fn ttl_millis(seconds: u64) -> i64 {
    i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
