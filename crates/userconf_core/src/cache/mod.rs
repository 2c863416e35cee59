//! Cache layer: key/value client and the opt-in cache-aside wrapper.
//!
//! # Responsibility
//! - Keep cache access separate from document persistence.
//! - Let callers decide explicitly where cached reads are acceptable.
//!
//! # Invariants
//! - Nothing in the repository layer reads or invalidates the cache.

pub mod aside;
pub mod client;

pub use aside::CacheAside;
pub use client::{
    CacheClient, CacheError, CacheOptions, CacheResult, TTL_MISSING, TTL_PERSISTENT,
};
