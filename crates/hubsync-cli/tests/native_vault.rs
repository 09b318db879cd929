//! Sync runs against a real directory on disk.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use hubsync_cli::NativeFs;
use hubsync_core::{FileSystem, InMemoryRemote, SyncEngine};
use tempfile::TempDir;

#[tokio::test]
async fn test_pull_rename_and_archive_on_disk() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    let engine = SyncEngine::new(NativeFs::new(dir.path().to_path_buf()), Arc::clone(&remote));
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let garden = remote.insert("Garden", None);
    let beds = remote.insert("Beds", Some(&garden));
    let soil = remote.insert("Soil", Some(&beds));
    engine.pull_at(now).await.unwrap();

    assert!(dir.path().join("Garden/Beds/Soil/Soil.md").is_file());
    assert!(dir.path().join(".sync/sync_log.json").is_file());

    remote.set_title(&beds, "Raised Beds");
    engine.pull_at(now).await.unwrap();

    assert!(!dir.path().join("Garden/Beds").exists());
    assert!(dir.path().join("Garden/Raised Beds/Raised Beds.md").is_file());
    let soil_doc = std::fs::read_to_string(dir.path().join("Garden/Raised Beds/Soil/Soil.md")).unwrap();
    assert!(soil_doc.contains("[[Garden/Raised Beds/Raised Beds]]"));

    remote.archive(&soil);
    engine.pull_at(now).await.unwrap();

    assert!(!dir.path().join("Garden/Raised Beds/Soil").exists());
    assert!(engine.fs().exists("Garden/Raised Beds/Raised Beds.md").await.unwrap());
}

#[tokio::test]
async fn test_push_from_disk() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("Kitchen/Pantry")).unwrap();
    std::fs::write(dir.path().join("Kitchen/Pantry/Pantry.md"), "# Pantry\nflour\n").unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    let engine = SyncEngine::new(NativeFs::new(dir.path().to_path_buf()), Arc::clone(&remote));

    let report = engine.push().await.unwrap();

    // Kitchen gets a hub stub, then both are pushed
    assert_eq!(report.hubs_created, 1);
    assert_eq!(report.created.len(), 2);
    let hub = std::fs::read_to_string(dir.path().join("Kitchen/Kitchen.md")).unwrap();
    assert!(hub.contains("remote_id:"));
    assert_eq!(remote.create_count(), 2);
}
