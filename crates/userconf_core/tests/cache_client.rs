use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::thread::sleep;
use std::time::Duration;
use userconf_core::{
    CacheClient, CacheError, CacheOptions, JsonSerializer, Serializer, TTL_MISSING,
    TTL_PERSISTENT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    hits: u32,
}

fn connected() -> CacheClient {
    let mut cache = CacheClient::new(CacheOptions::default());
    cache.connect().unwrap();
    cache
}

fn session(user: &str) -> Session {
    Session {
        user: user.to_string(),
        hits: 1,
    }
}

#[test]
fn set_then_get_returns_value() {
    let cache = connected();

    assert!(cache.set("session:1", &session("ann"), None));
    assert_eq!(cache.get::<Session>("session:1"), Some(session("ann")));
    assert_eq!(cache.get::<Session>("session:missing"), None);
    assert!(cache.exists("session:1"));
    assert_eq!(cache.ttl("session:1"), TTL_PERSISTENT);
}

#[test]
fn zero_ttl_on_set_means_no_expiry() {
    let cache = connected();
    assert!(cache.set("k", &1_u32, Some(0)));
    assert_eq!(cache.ttl("k"), TTL_PERSISTENT);
}

#[test]
fn entries_expire_after_ttl() {
    let cache = connected();
    assert!(cache.set("short", &"v", Some(1)));
    assert_eq!(cache.ttl("short"), 1);

    sleep(Duration::from_millis(1100));

    assert_eq!(cache.get::<String>("short"), None);
    assert!(!cache.exists("short"));
    assert_eq!(cache.ttl("short"), TTL_MISSING);
    assert!(!cache.delete("short"));
}

#[test]
fn expire_sets_new_deadline_and_zero_expires_immediately() {
    let cache = connected();
    cache.set("a", &1_u32, None);
    cache.set("b", &2_u32, None);

    assert!(cache.expire("a", 60));
    let ttl = cache.ttl("a");
    assert!((59..=60).contains(&ttl), "unexpected ttl {ttl}");

    assert!(cache.expire("b", 0));
    assert!(!cache.exists("b"));
    assert!(!cache.expire("missing", 10));
}

#[test]
fn set_overwrites_value_and_expiry() {
    let cache = connected();
    cache.set("k", &1_u32, Some(60));
    cache.set("k", &2_u32, None);

    assert_eq!(cache.get::<u32>("k"), Some(2));
    assert_eq!(cache.ttl("k"), TTL_PERSISTENT);
}

#[test]
fn get_many_omits_missing_keys() {
    let cache = connected();
    let entries: HashMap<String, Session> = [
        ("session:1".to_string(), session("ann")),
        ("session:2".to_string(), session("bob")),
    ]
    .into_iter()
    .collect();
    assert!(cache.set_many(&entries, Some(60)));
    assert!(cache.ttl("session:2") > 0);

    let found = cache.get_many::<Session>(&["session:1", "session:2", "session:3"]);
    assert_eq!(found.len(), 2);
    assert_eq!(found["session:2"], session("bob"));

    assert!(cache.get_many::<Session>(&[]).is_empty());
}

#[test]
fn delete_and_delete_many_report_removed_keys() {
    let cache = connected();
    for key in ["a", "b", "c"] {
        cache.set(key, &key, None);
    }

    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    assert_eq!(cache.delete_many(&["b", "c", "zzz"]), 2);
    assert_eq!(cache.delete_many(&[]), 0);
}

#[test]
fn clear_pattern_removes_matching_keys_only() {
    let cache = connected();
    cache.set("session:1", &1_u32, None);
    cache.set("session:2", &2_u32, None);
    cache.set("user:1", &3_u32, None);

    assert_eq!(cache.clear_pattern("session:*"), 2);
    assert!(!cache.exists("session:1"));
    assert!(cache.exists("user:1"));
    assert_eq!(cache.clear_pattern("nothing:*"), 0);
}

#[test]
fn undecodable_value_reads_as_miss() {
    let cache = connected();
    cache.set("k", &"text", None);
    assert_eq!(cache.get::<Session>("k"), None);
}

#[test]
fn disconnected_client_returns_safe_defaults() {
    let cache = CacheClient::new(CacheOptions::default());

    assert!(!cache.is_connected());
    assert!(!cache.ping());
    assert_eq!(cache.get::<u32>("k"), None);
    assert!(!cache.set("k", &1_u32, None));
    assert!(!cache.delete("k"));
    assert!(!cache.exists("k"));
    assert!(!cache.expire("k", 10));
    assert_eq!(cache.ttl("k"), TTL_MISSING);
    assert!(cache.get_many::<u32>(&["k"]).is_empty());
    assert_eq!(cache.delete_many(&["k"]), 0);
    assert_eq!(cache.clear_pattern("*"), 0);
}

#[test]
fn close_is_idempotent_and_disconnects() {
    let mut cache = connected();
    assert!(cache.ping());

    cache.close();
    cache.close();
    assert!(!cache.is_connected());
    assert!(!cache.set("k", &1_u32, None));

    cache.connect().unwrap();
    assert!(cache.ping());
}

#[test]
fn file_backed_cache_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let options = CacheOptions {
        path: Some(dir.path().join("cache.sqlite3")),
        ..CacheOptions::default()
    };

    let mut first = CacheClient::new(options.clone());
    first.connect().unwrap();
    first.set("keep", &session("ann"), None);
    first.set("drop", &session("bob"), Some(1));
    first.close();

    sleep(Duration::from_millis(1100));

    let mut second = CacheClient::new(options);
    second.connect().unwrap();
    assert_eq!(second.get::<Session>("keep"), Some(session("ann")));
    assert_eq!(second.get::<Session>("drop"), None);
}

#[test]
fn purge_expired_drops_dead_rows() {
    let cache = connected();
    cache.set("a", &1_u32, Some(1));
    cache.set("b", &2_u32, None);

    sleep(Duration::from_millis(1100));
    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.purge_expired(), 0);
}

#[test]
fn json_serializer_client_round_trips_values() {
    let serializer = JsonSerializer;
    assert_eq!(serializer.name(), "json");

    let mut cache = CacheClient::with_serializer(CacheOptions::default(), serializer);
    cache.connect().unwrap();
    cache.set("k", &session("ann"), None);
    assert_eq!(cache.get::<Session>("k"), Some(session("ann")));
}

#[test]
fn connect_answers_ping_or_fails_with_connection_error() {
    let cache = connected();
    assert!(cache.ping());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-database.sqlite3");
    std::fs::write(&path, b"plain text, not a SQLite header at all.........").unwrap();

    let mut broken = CacheClient::new(CacheOptions {
        path: Some(path),
        ..CacheOptions::default()
    });
    let err = broken.connect().unwrap_err();
    assert!(matches!(err, CacheError::Connection(_)));
    assert!(!broken.is_connected());
}
