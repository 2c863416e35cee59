use userconf_core::{AppContext, Settings, UserInput};

fn file_settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::from_toml_str(&format!(
        "[database]\npath = {:?}\n\n[cache]\npath = {:?}\ndefault_ttl_secs = 30\n",
        dir.join("documents.sqlite3"),
        dir.join("cache.sqlite3"),
    ))
    .unwrap();
    settings.logging.dir = None;
    settings
}

fn acme() -> UserInput {
    UserInput {
        client_id: "acme".to_string(),
        crm_url: "https://x".to_string(),
        active: Some(true),
        ..UserInput::default()
    }
}

#[test]
fn context_round_trips_users_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::open(&file_settings(dir.path())).unwrap();

    let created = context.create_user(acme()).unwrap().unwrap();
    let fetched = context.get_user("acme").unwrap().unwrap();
    assert_eq!(fetched, created);

    let cache = context.cache().unwrap();
    assert!(cache.exists("user:acme"));
    let ttl = cache.ttl("user:acme");
    assert!((1..=30).contains(&ttl), "unexpected ttl {ttl}");
    context.shutdown();
}

#[test]
fn store_survives_context_restart() {
    let dir = tempfile::tempdir().unwrap();
    let settings = file_settings(dir.path());

    let first = AppContext::open(&settings).unwrap();
    first.create_user(acme()).unwrap();
    first.shutdown();

    let second = AppContext::open(&settings).unwrap();
    assert!(second.get_user("acme").unwrap().is_some());
    assert!(second.get_user("other").unwrap().is_none());
}

#[test]
fn disabled_cache_reads_store_directly() {
    let mut settings = Settings::default();
    settings.cache.enabled = false;

    let context = AppContext::open(&settings).unwrap();
    assert!(context.cache().is_none());
    context.create_user(acme()).unwrap();
    assert!(context.get_user("acme").unwrap().is_some());
}
