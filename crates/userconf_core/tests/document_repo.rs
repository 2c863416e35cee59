use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use userconf_core::db::open_db_in_memory;
use userconf_core::{
    BatchUpdate, DocumentRepository, Patch, Query, RepoError, SortOrder, SqliteDocumentRepository,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    name: String,
    qty: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

fn item(name: &str, qty: i64) -> Item {
    Item {
        name: name.to_string(),
        qty,
        tag: None,
    }
}

fn items_repo(conn: &Connection) -> SqliteDocumentRepository<'_, Item> {
    SqliteDocumentRepository::try_new(conn, "items").unwrap()
}

#[test]
fn create_assigns_id_and_reads_back() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);

    let created = repo.create(&item("bolt", 3)).unwrap().unwrap();
    assert!(!created.id.as_str().is_empty());
    assert_eq!(created.value, item("bolt", 3));

    let selected = repo.select(&Query::by_id(&created.id)).unwrap().unwrap();
    assert_eq!(selected, created);
}

#[test]
fn create_many_returns_documents_in_input_order() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);

    let outcome = repo
        .create_many(&[item("a", 1), item("b", 2), item("c", 3)])
        .unwrap();
    assert!(outcome.failed.is_empty());
    let names: Vec<&str> = outcome
        .created
        .iter()
        .map(|doc| doc.value.name.as_str())
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    let empty = repo.create_many(&[]).unwrap();
    assert!(empty.created.is_empty());
}

#[test]
fn create_many_reports_non_object_values() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteDocumentRepository::<serde_json::Value>::try_new(&conn, "raw").unwrap();

    let outcome = repo
        .create_many(&[json!({"a": 1}), json!([1, 2]), json!({"b": 2})])
        .unwrap();
    assert_eq!(outcome.created.len(), 2);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 1);
    assert!(matches!(outcome.failed[0].error, RepoError::InvalidData(_)));
}

#[test]
fn select_many_applies_offset_and_limit_in_insertion_order() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    for qty in 0..10 {
        repo.create(&item("x", qty)).unwrap();
    }

    let page = repo.select_many(&Query::new(), Some(2), Some(3)).unwrap();
    let qtys: Vec<i64> = page.iter().map(|doc| doc.value.qty).collect();
    assert_eq!(qtys, vec![2, 3, 4]);

    let tail = repo.select_many(&Query::new(), Some(8), None).unwrap();
    assert_eq!(tail.len(), 2);

    let sorted = repo
        .select_many(
            &Query::new().gte("qty", 7).sort_by("qty", SortOrder::Descending),
            None,
            None,
        )
        .unwrap();
    let qtys: Vec<i64> = sorted.iter().map(|doc| doc.value.qty).collect();
    assert_eq!(qtys, vec![9, 8, 7]);
}

#[test]
fn collections_are_isolated() {
    let conn = open_db_in_memory().unwrap();
    let items = items_repo(&conn);
    let others = SqliteDocumentRepository::<Item>::try_new(&conn, "others").unwrap();

    items.create(&item("a", 1)).unwrap();
    assert_eq!(items.count(&Query::new()).unwrap(), 1);
    assert_eq!(others.count(&Query::new()).unwrap(), 0);
    assert!(others.select(&Query::new().eq("name", "a")).unwrap().is_none());
}

#[test]
fn update_returns_post_update_view_when_queried_field_changes() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    let created = repo.create(&item("old", 1)).unwrap().unwrap();

    let updated = repo
        .update(&Query::new().eq("name", "old"), &Patch::new().set("name", "new"))
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.value.name, "new");
    assert_eq!(updated.value.qty, 1);

    let missing = repo
        .update(&Query::new().eq("name", "old"), &Patch::new().set("qty", 5))
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn update_by_id_merges_and_unsets_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    let created = repo
        .create(&Item {
            name: "a".to_string(),
            qty: 1,
            tag: Some("red".to_string()),
        })
        .unwrap()
        .unwrap();

    let updated = repo
        .update_by_id(&created.id, &Patch::new().set("qty", 9).unset("tag"))
        .unwrap()
        .unwrap();
    assert_eq!(updated.value, item("a", 9));
}

#[test]
fn update_rejects_patch_on_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create(&item("a", 1)).unwrap();

    let err = repo
        .update(&Query::new().eq("name", "a"), &Patch::new().set("_id", "x"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidPatch(_)));
}

#[test]
fn update_many_counts_only_changed_documents() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create_many(&[item("a", 1), item("a", 2), item("b", 2)])
        .unwrap();

    let outcome = repo
        .update_many(&[
            BatchUpdate::new(Query::new().eq("name", "a"), Patch::new().set("qty", 2)),
            BatchUpdate::new(Query::new().eq("qty", 2), Patch::new().set("tag", "two")),
            BatchUpdate {
                query: None,
                patch: Some(Patch::new().set("qty", 0)),
            },
            BatchUpdate::new(Query::new(), Patch::new().set("qty", 0)),
        ])
        .unwrap();

    // First item changes only the qty=1 document; second touches all three.
    assert_eq!(outcome.modified, 4);
    assert_eq!(outcome.skipped, 2);
    assert!(outcome.failed.is_empty());
    assert_eq!(repo.count(&Query::new().eq("tag", "two")).unwrap(), 3);
}

#[test]
fn update_many_reports_invalid_items_and_keeps_going() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create(&item("a", 1)).unwrap();

    let outcome = repo
        .update_many(&[
            BatchUpdate::new(Query::new().eq("bad field", 1), Patch::new().set("qty", 2)),
            BatchUpdate::new(Query::new().eq("name", "a"), Patch::new().set("qty", 2)),
        ])
        .unwrap();
    assert_eq!(outcome.modified, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 0);
    assert!(matches!(outcome.failed[0].error, RepoError::InvalidQuery(_)));
}

#[test]
fn delete_returns_snapshot_of_removed_documents() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create_many(&[item("a", 1), item("b", 2), item("c", 3)])
        .unwrap();

    let removed = repo.delete(&Query::new().lt("qty", 3)).unwrap();
    let names: Vec<&str> = removed.iter().map(|doc| doc.value.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(repo.count(&Query::new()).unwrap(), 1);

    assert!(repo.delete(&Query::new().eq("name", "zzz")).unwrap().is_empty());
}

#[test]
fn exists_and_count_follow_criteria() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create_many(&[item("a", 1), item("b", 2)]).unwrap();
    repo.create(&Item {
        name: "c".to_string(),
        qty: 3,
        tag: Some("red".to_string()),
    })
    .unwrap();

    assert!(repo.exists(&Query::new().eq("name", "b")).unwrap());
    assert!(!repo.exists(&Query::new().eq("name", "z")).unwrap());
    assert_eq!(repo.count(&Query::new().is_in("name", ["a", "c"])).unwrap(), 2);
    assert_eq!(repo.count(&Query::new().exists("tag", true)).unwrap(), 1);
    assert_eq!(repo.count(&Query::new().ne("tag", "red")).unwrap(), 2);
    assert_eq!(
        repo.count(&Query::new().is_in("name", Vec::<String>::new()))
            .unwrap(),
        0
    );
}

#[test]
fn with_model_reads_same_collection_as_another_type() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    let created = repo.create(&item("a", 1)).unwrap().unwrap();

    let raw = repo.with_model::<serde_json::Value>();
    let doc = raw.select(&Query::by_id(&created.id)).unwrap().unwrap();
    assert_eq!(doc.value, json!({"name": "a", "qty": 1}));
}

#[test]
fn invalid_field_name_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);

    let err = repo
        .select(&Query::new().eq("name'); DROP TABLE documents; --", 1))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQuery(_)));
}

#[test]
fn try_new_rejects_blank_collection_and_unmigrated_connection() {
    let conn = open_db_in_memory().unwrap();
    assert!(matches!(
        SqliteDocumentRepository::<Item>::try_new(&conn, " "),
        Err(RepoError::InvalidCollection(_))
    ));

    let raw = Connection::open_in_memory().unwrap();
    assert!(matches!(
        SqliteDocumentRepository::<Item>::try_new(&raw, "items"),
        Err(RepoError::SchemaVersionMismatch { actual: 0, .. })
    ));
}

#[test]
fn update_that_breaks_value_type_is_rolled_back() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    let created = repo.create(&item("a", 1)).unwrap().unwrap();

    let err = repo
        .update_by_id(&created.id, &Patch::new().unset("name"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));

    let err = repo
        .update(&Query::new().eq("name", "a"), &Patch::new().set("qty", "many"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));

    let stored = repo
        .with_model::<serde_json::Value>()
        .select(&Query::by_id(&created.id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, json!({"name": "a", "qty": 1}));
    assert_eq!(repo.select_many(&Query::new(), None, None).unwrap().len(), 1);
}

#[test]
fn update_many_rolls_back_items_that_break_value_type() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create_many(&[item("a", 1), item("a", 2), item("b", 3)])
        .unwrap();

    let outcome = repo
        .update_many(&[
            BatchUpdate::new(Query::new().eq("name", "a"), Patch::new().unset("name")),
            BatchUpdate::new(Query::new().eq("name", "b"), Patch::new().set("qty", 30)),
        ])
        .unwrap();

    assert_eq!(outcome.modified, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].index, 0);
    assert!(matches!(outcome.failed[0].error, RepoError::InvalidData(_)));
    assert_eq!(repo.count(&Query::new().eq("name", "a")).unwrap(), 2);
    assert_eq!(repo.count(&Query::new().eq("qty", 30)).unwrap(), 1);
}

#[test]
fn delete_ignores_documents_inserted_during_delete_phase() {
    let conn = open_db_in_memory().unwrap();
    let repo = items_repo(&conn);
    repo.create_many(&[item("a", 1), item("b", 2), item("c", 5)])
        .unwrap();

    // Each deleted row inserts a fresh matching row mid-delete.
    conn.execute_batch(
        "CREATE TEMP TRIGGER insert_during_delete
         AFTER DELETE ON documents
         WHEN OLD.collection = 'items' AND OLD.id NOT LIKE 'late-%'
         BEGIN
             INSERT INTO documents (collection, id, body)
             VALUES ('items', 'late-' || OLD.id, json('{\"name\":\"late\",\"qty\":0}'));
         END;",
    )
    .unwrap();

    let removed = repo.delete(&Query::new().lt("qty", 3)).unwrap();
    let names: Vec<&str> = removed.iter().map(|doc| doc.value.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);

    conn.execute_batch("DROP TRIGGER insert_during_delete;")
        .unwrap();
    assert_eq!(repo.count(&Query::new().eq("name", "late")).unwrap(), 2);
    assert_eq!(repo.count(&Query::new().lt("qty", 3)).unwrap(), 2);
}
