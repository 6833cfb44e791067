use remb_api::Tokens;
use remb_core::ErrorKind;
use remb_fs::init_data_dir;
use remb_store::{LocalNote, NewNote, Store, user_record_key};
use serde_json::{Value, json};
use std::fs;

fn open_store(temp: &tempfile::TempDir) -> Store {
    let init = init_data_dir(Some(&temp.path().join("data"))).expect("init data dir");
    Store::open(&init.paths).expect("open store")
}

fn record(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().expect("object literal").clone()
}

#[test]
fn tokens_round_trip_and_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(&temp);

    assert!(store.load_tokens().expect("empty load").is_none());

    let tokens = Tokens {
        access: "access-1".to_string(),
        refresh: "refresh-1".to_string(),
    };
    store.save_tokens(&tokens).expect("save tokens");

    let loaded = store.load_tokens().expect("load").expect("tokens present");
    assert_eq!(loaded.access, "access-1");
    assert_eq!(loaded.refresh, "refresh-1");

    store.clear_tokens().expect("clear tokens");
    assert!(store.load_tokens().expect("load after clear").is_none());
}

#[test]
fn cookie_round_trip_and_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(&temp);

    assert!(store.load_cookie().expect("empty load").is_none());

    store.save_cookie(42).expect("save cookie");
    assert_eq!(store.load_cookie().expect("load"), Some(42));

    store.save_cookie(43).expect("overwrite cookie");
    assert_eq!(store.load_cookie().expect("reload"), Some(43));

    store.clear_cookie().expect("clear cookie");
    assert!(store.load_cookie().expect("load after clear").is_none());
}

#[test]
fn user_records_round_trip_and_email_lookup() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(&temp);

    assert!(store.user_email("abc").expect("absent user").is_none());

    store
        .put_user(
            &user_record_key("abc"),
            &record(json!({"email": "user@example.com", "plan": "pro"})),
        )
        .expect("put user");
    assert_eq!(
        store.user_email("abc").expect("email lookup").as_deref(),
        Some("user@example.com")
    );

    store
        .put_user(&user_record_key("broken"), &record(json!({"plan": "free"})))
        .expect("put malformed user");
    let error = store
        .user_email("broken")
        .expect_err("record without email should be rejected");
    assert_eq!(error.kind, ErrorKind::Content);

    store.delete_user(&user_record_key("abc")).expect("delete");
    assert!(store.user_email("abc").expect("after delete").is_none());

    store
        .put_user(&user_record_key("one"), &record(json!({"email": "a@b.c"})))
        .expect("put one");
    store
        .put_user(&user_record_key("two"), &record(json!({"email": "d@e.f"})))
        .expect("put two");
    store.clear_users().expect("clear users");
    assert!(store.user_email("one").expect("one cleared").is_none());
    assert!(store.user_email("two").expect("two cleared").is_none());
}

#[test]
fn clearing_users_leaves_other_cells_alone() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(&temp);

    store
        .save_tokens(&Tokens {
            access: "a".to_string(),
            refresh: "r".to_string(),
        })
        .expect("save tokens");
    store.save_cookie(7).expect("save cookie");
    store
        .put_user(&user_record_key("abc"), &record(json!({"email": "x@y.z"})))
        .expect("put user");

    store.clear_users().expect("clear users");

    assert!(store.load_tokens().expect("tokens survive").is_some());
    assert_eq!(store.load_cookie().expect("cookie survives"), Some(7));
}

#[test]
fn note_lifecycle_add_update_remove() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(&temp);

    store
        .add_notes(&[
            NewNote {
                guid: "item-a".to_string(),
                link: "https://www.rember.com/r/item-a".to_string(),
                note_text: "alpha".to_string(),
                content: json!({"id": "item-a"}),
                slots: vec!["crop-1-default".to_string()],
            },
            NewNote {
                guid: "item-b".to_string(),
                link: "https://www.rember.com/r/item-b".to_string(),
                note_text: "beta".to_string(),
                content: json!({"id": "item-b"}),
                slots: vec![],
            },
        ])
        .expect("add notes");

    let index = store.note_guid_index().expect("index");
    assert_eq!(index.len(), 2);
    let id_a = index["item-a"];
    let id_b = index["item-b"];
    assert_ne!(id_a, id_b);
    assert_eq!(store.note_count().expect("count"), 2);

    let note_a = store.get_note(id_a).expect("get").expect("note present");
    assert_eq!(note_a.guid, "item-a");
    assert_eq!(note_a.note_text, "alpha");
    assert_eq!(note_a.slots, vec!["crop-1-default".to_string()]);

    store
        .update_notes(&[LocalNote {
            note_text: "alpha v2".to_string(),
            slots: vec!["crop-1-default".to_string(), "crop-2-default".to_string()],
            ..note_a.clone()
        }])
        .expect("update note");

    let updated = store.get_note(id_a).expect("get").expect("note present");
    assert_eq!(updated.id, id_a);
    assert_eq!(updated.note_text, "alpha v2");
    assert_eq!(updated.slots.len(), 2);

    store.remove_notes(&[id_b]).expect("remove note");
    assert!(store.get_note(id_b).expect("load removed").is_none());
    assert_eq!(store.note_count().expect("count"), 1);
    assert_eq!(store.note_guid_index().expect("index").len(), 1);
}

#[test]
fn duplicate_guid_insert_is_a_store_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = open_store(&temp);

    let note = NewNote {
        guid: "item-a".to_string(),
        link: "https://www.rember.com/r/item-a".to_string(),
        note_text: "alpha".to_string(),
        content: json!({"id": "item-a"}),
        slots: vec![],
    };
    store.add_notes(std::slice::from_ref(&note)).expect("first insert");

    let error = store
        .add_notes(std::slice::from_ref(&note))
        .expect_err("second insert should violate the guid constraint");
    assert_eq!(error.kind, ErrorKind::Store);
}

#[test]
fn corrupt_state_db_returns_actionable_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = init_data_dir(Some(&temp.path().join("data"))).expect("init data dir");

    fs::write(&init.paths.state_db_path, "this is not sqlite").expect("write corrupt db bytes");
    let error = Store::open(&init.paths).expect_err("corrupt db should fail");
    assert_eq!(error.kind, ErrorKind::Store);
    assert!(error.message.contains("is corrupted"));
    assert!(error.message.contains("remb pull"));
}
