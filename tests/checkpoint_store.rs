//! Checkpoint Store Tests
//!
//! SQLite checkpoints on disk: persistence across reopen and per-store tables.

use tempfile::TempDir;

use image_watcher::core::{CheckpointStore, SqliteCheckpointStore};

#[test]
fn test_checkpoints_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("state").join("checkpoints.db");

    {
        let store = SqliteCheckpointStore::open(&db, "harness-ci-image-versions").unwrap();
        store.record_version("harness/ci-addon", "1.16.4").unwrap();
        store.record_version("harness/ci-addon", "1.16.5").unwrap();
        store
            .record_version("harness/ci-lite-engine", "1.16.5")
            .unwrap();
    }

    let store = SqliteCheckpointStore::open(&db, "harness-ci-image-versions").unwrap();
    assert_eq!(
        store.last_version("harness/ci-addon").unwrap(),
        Some("1.16.5".to_string())
    );

    let all = store.list().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].image_name, "harness/ci-addon");
    assert_eq!(all[1].image_name, "harness/ci-lite-engine");
}

#[test]
fn test_store_names_are_separate_tables() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("checkpoints.db");

    let prod = SqliteCheckpointStore::open(&db, "prod-versions").unwrap();
    let staging = SqliteCheckpointStore::open(&db, "staging-versions").unwrap();

    prod.record_version("harness/ci-addon", "1.16.5").unwrap();

    assert_eq!(
        prod.last_version("harness/ci-addon").unwrap(),
        Some("1.16.5".to_string())
    );
    assert_eq!(staging.last_version("harness/ci-addon").unwrap(), None);
}

#[test]
fn test_remove_then_absent() {
    let temp = TempDir::new().unwrap();
    let store =
        SqliteCheckpointStore::open(&temp.path().join("checkpoints.db"), "versions").unwrap();

    store.record_version("harness/ci-addon", "1.16.5").unwrap();
    assert!(store.remove("harness/ci-addon").unwrap());
    assert!(!store.remove("harness/ci-addon").unwrap());
    assert_eq!(store.last_version("harness/ci-addon").unwrap(), None);
    assert!(store.list().unwrap().is_empty());
}
