//! Cache-aside helper.
//!
//! # Responsibility
//! - Serve reads from the cache, falling back to a caller-supplied loader.
//! - Populate the cache on miss and expose explicit invalidation.
//!
//! # Invariants
//! - `None` loader results are never cached.
//! - Loader errors propagate unchanged; cache failures only cost a miss.

use crate::cache::client::CacheClient;
use crate::codec::{MessagePackSerializer, Serializer};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Namespaced cache-aside view over a connected `CacheClient`.
pub struct CacheAside<'c, S = MessagePackSerializer> {
    cache: &'c CacheClient<S>,
    prefix: String,
    ttl: Option<u64>,
}

impl<'c, S: Serializer> CacheAside<'c, S> {
    /// `prefix` is prepended to every key; `ttl` applies to populated entries.
    pub fn new(cache: &'c CacheClient<S>, prefix: impl Into<String>, ttl: Option<u64>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Full cache key for `key`.
    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Returns the cached value or loads, caches and returns it.
    pub fn fetch<T, E, F>(&self, key: &str, load: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        let cache_key = self.key(key);
        if let Some(hit) = self.cache.get::<T>(&cache_key) {
            debug!("event=cache_aside module=cache status=hit key={}", cache_key);
            return Ok(Some(hit));
        }

        let loaded = load()?;
        match loaded.as_ref() {
            Some(value) => {
                let stored = self.cache.set(&cache_key, value, self.ttl);
                debug!(
                    "event=cache_aside module=cache status=miss key={} stored={}",
                    cache_key, stored
                );
            }
            None => debug!(
                "event=cache_aside module=cache status=miss key={} stored=false",
                cache_key
            ),
        }
        Ok(loaded)
    }

    /// Drops one cached entry.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.delete(&self.key(key))
    }

    /// Drops every entry under this prefix.
    pub fn invalidate_all(&self) -> u64 {
        self.cache
            .clear_pattern(&format!("{}*", escape_glob(&self.prefix)))
    }
}

/// Escapes glob metacharacters so `value` matches literally.
fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' | '?' | '[' => {
                escaped.push('[');
                escaped.push(ch);
                escaped.push(']');
            }
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_glob;

    #[test]
    fn escape_glob_wraps_metacharacters() {
        assert_eq!(escape_glob("user:"), "user:");
        assert_eq!(escape_glob("a*b?[c"), "a[*]b[?][[]c");
    }
}
