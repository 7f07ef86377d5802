use loom_storage::{
    Envelope, FileBackend, MemoryBackend, Removal, SetOptions, StorageBackend, StorageManager,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn manager() -> (Arc<MemoryBackend>, StorageManager) {
    let backend = Arc::new(MemoryBackend::new());
    let storage = StorageManager::new(backend.clone(), "loom4");
    (backend, storage)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[test]
fn values_are_wrapped_in_an_envelope() {
    let (backend, storage) = manager();
    assert!(storage.set("theme", &json!("dark")));

    let raw = backend.get_item("loom4_theme").unwrap().unwrap();
    let envelope: Envelope = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope.value, json!("dark"));
    assert_eq!(envelope.expires, None);
    assert_eq!(envelope.version, 1);
    assert_eq!(storage.get("theme"), Some(json!("dark")));
}

#[test]
fn expired_entries_read_as_absent_and_are_removed() {
    let (backend, storage) = manager();
    let options = SetOptions {
        expires: Some(now_ms() - 1_000),
        ..SetOptions::default()
    };
    storage.set_with("session", &json!({"token": "t"}), options);
    assert!(storage.has("session"));
    assert_eq!(storage.get("session"), None);
    assert_eq!(backend.get_item("loom4_session").unwrap(), None);
}

#[test]
fn ttl_in_the_future_is_readable() {
    let (_, storage) = manager();
    storage.set_with_ttl("cache", &json!(1), Duration::from_secs(60));
    assert_eq!(storage.get("cache"), Some(json!(1)));
}

#[test]
fn corrupt_entries_fall_back_to_default() {
    let (backend, storage) = manager();
    backend.set_item("loom4_projects", "{broken").unwrap();
    assert_eq!(storage.get("projects"), None);
    assert_eq!(storage.get_or("projects", json!([])), json!([]));
}

#[test]
fn quota_exceeded_triggers_cleanup_and_retry() {
    let backend = Arc::new(MemoryBackend::with_quota(200));
    let storage = StorageManager::new(backend.clone(), "loom4");

    let stale = Envelope {
        value: json!("x".repeat(80)),
        timestamp: now_ms() - 10_000,
        expires: Some(now_ms() - 5_000),
        version: 1,
    };
    backend
        .set_item("loom4_stale", &serde_json::to_string(&stale).unwrap())
        .unwrap();

    assert!(storage.set("fresh", &json!("y".repeat(80))));
    assert_eq!(storage.keys(), vec!["fresh".to_string()]);
}

#[test]
fn write_that_never_fits_fails() {
    let storage = StorageManager::new(Arc::new(MemoryBackend::with_quota(16)), "loom4");
    assert!(!storage.set("big", &json!("z".repeat(64))));
    assert!(!storage.has("big"));
}

#[test]
fn keys_and_clear_respect_prefix() {
    let (backend, storage) = manager();
    storage.set("a", &json!(1));
    storage.set("b", &json!(2));
    backend.set_item("other_c", "3").unwrap();

    let mut keys = storage.keys();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);

    assert!(storage.clear());
    assert!(storage.keys().is_empty());
    assert_eq!(backend.get_item("other_c").unwrap(), Some("3".to_string()));
}

#[test]
fn cleanup_by_age() {
    let (backend, storage) = manager();
    let old = Envelope {
        value: json!(1),
        timestamp: now_ms() - 60_000,
        expires: None,
        version: 1,
    };
    backend
        .set_item("loom4_old", &serde_json::to_string(&old).unwrap())
        .unwrap();
    backend.set_item("loom4_junk", "not json").unwrap();
    storage.set("new", &json!(2));

    assert_eq!(storage.cleanup(None), 1);
    assert_eq!(storage.cleanup(Some(Duration::from_secs(30))), 1);
    assert_eq!(storage.keys(), vec!["new".to_string()]);
}

#[test]
fn export_then_import_elsewhere() {
    let (_, source) = manager();
    source.set("projects", &json!([{"id": "p1"}]));
    source.set("theme", &json!("dark"));
    let document = source.export();
    assert_eq!(document["version"], json!(1));
    assert!(document["exportDate"].is_string());

    let (_, target) = manager();
    target.set("theme", &json!("light"));
    assert!(target.import(&document, false));
    assert_eq!(target.get("theme"), Some(json!("light")));
    assert_eq!(target.get("projects"), Some(json!([{"id": "p1"}])));

    assert!(target.import(&document, true));
    assert_eq!(target.get("theme"), Some(json!("dark")));

    assert!(!target.import(&json!({"nope": 1}), true));
}

#[test]
fn scoped_managers_share_the_backend() {
    let (backend, storage) = manager();
    let scoped = storage.scope("chat");
    scoped.set("draft", &json!("hi"));
    assert_eq!(scoped.prefix(), "loom4_chat");
    assert!(backend.get_item("loom4_chat_draft").unwrap().is_some());
    assert_eq!(storage.keys(), vec!["chat_draft".to_string()]);
}

#[test]
fn increment_push_and_pull() {
    let (_, storage) = manager();
    assert_eq!(storage.increment("visits", 1), 1);
    assert_eq!(storage.increment("visits", 4), 5);
    storage.set("label", &json!("text"));
    assert_eq!(storage.increment("label", 2), 2);

    storage.push("recent", json!(1), Some(2));
    storage.push("recent", json!(2), Some(2));
    let recent = storage.push("recent", json!(3), Some(2));
    assert_eq!(recent, vec![json!(2), json!(3)]);

    let left = storage.pull("recent", Removal::Value(&json!(2)));
    assert_eq!(left, vec![json!(3)]);
    let left = storage.pull("recent", Removal::Where(&|v: &Value| v.as_i64() == Some(3)));
    assert!(left.is_empty());
}

#[test]
fn typed_round_trip_and_shape_mismatch() {
    let (_, storage) = manager();
    assert!(storage.set_as("ids", &vec![1u32, 2, 3]));
    assert_eq!(storage.get_as::<Vec<u32>>("ids"), Some(vec![1, 2, 3]));
    assert_eq!(storage.get_as::<String>("ids"), None);
}

#[test]
fn size_counts_keys_and_values() {
    let (backend, storage) = manager();
    storage.set("k", &json!(true));
    let raw = backend.get_item("loom4_k").unwrap().unwrap();
    let size = storage.size();
    assert_eq!(size.entries, 1);
    assert_eq!(size.used, "loom4_k".len() + raw.len());
}

#[test]
fn file_backed_manager_persists_between_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loom.json");
    {
        let storage = StorageManager::new(Arc::new(FileBackend::open(&path).unwrap()), "loom4");
        storage.set("chats", &json!([{"id": "c1"}]));
    }
    let storage = StorageManager::new(Arc::new(FileBackend::open(&path).unwrap()), "loom4");
    assert_eq!(storage.get("chats"), Some(json!([{"id": "c1"}])));
}
