//! End-to-end pull runs against the in-memory vault and remote.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hubsync_core::markdown;
use hubsync_core::sync_log::{DEFAULT_LOG_PATH, SyncLogStore};
use hubsync_core::{FileSystem, InMemoryFs, InMemoryRemote, NodeId, SyncEngine, SyncLog};

type Engine = SyncEngine<Arc<InMemoryFs>, Arc<InMemoryRemote>>;

struct Harness {
    fs: Arc<InMemoryFs>,
    remote: Arc<InMemoryRemote>,
    engine: Engine,
}

fn harness() -> Harness {
    let fs = Arc::new(InMemoryFs::new());
    let remote = Arc::new(InMemoryRemote::new());
    let engine = SyncEngine::new(Arc::clone(&fs), Arc::clone(&remote));
    Harness { fs, remote, engine }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

async fn load_log(fs: &InMemoryFs) -> SyncLog {
    SyncLogStore::new(fs, DEFAULT_LOG_PATH).load().await.unwrap()
}

fn documents(fs: &InMemoryFs) -> Vec<String> {
    fs.file_paths()
        .into_iter()
        .filter(|path| path.ends_with(".md"))
        .collect()
}

fn latest_edit(remote: &InMemoryRemote) -> DateTime<Utc> {
    remote
        .nodes()
        .iter()
        .map(|node| node.last_edited)
        .max()
        .unwrap()
}

#[tokio::test]
async fn test_bootstrap_materializes_whole_tree() {
    let h = harness();
    let garden = h.remote.insert("Garden", None);
    h.remote.insert("Beds", Some(&garden));
    h.remote.insert("Tools", Some(&garden));

    let report = h.engine.pull_at(now()).await.unwrap();

    assert_eq!(report.created, 3);
    assert!(report.failed.is_empty());
    assert_eq!(
        documents(&h.fs),
        vec!["Garden/Beds/Beds.md", "Garden/Garden.md", "Garden/Tools/Tools.md"]
    );

    let log = load_log(&h.fs).await;
    assert_eq!(log.entries.len(), 3);
    assert_eq!(log.watermark, Some(latest_edit(&h.remote) - Duration::seconds(1)));
    assert_eq!(log.last_full_scan, Some(now()));

    let beds = h.fs.text("Garden/Beds/Beds.md").unwrap();
    assert!(beds.contains("*Parent*: [[Garden/Garden]]"));
    let hub = h.fs.text("Garden/Garden.md").unwrap();
    assert!(hub.ends_with("### Children\n- [[Garden/Beds/Beds]]\n- [[Garden/Tools/Tools]]\n"));
}

#[tokio::test]
async fn test_second_pull_touches_nothing() {
    let h = harness();
    let garden = h.remote.insert("Garden", None);
    h.remote.insert("Beds", Some(&garden));
    h.engine.pull_at(now()).await.unwrap();

    let writes = h.fs.mutation_count();
    let patches = h.remote.patch_count();
    let report = h.engine.pull_at(now()).await.unwrap();

    assert!(report.idle);
    assert_eq!(report.created + report.updated + report.moved, 0);
    assert_eq!(h.fs.mutation_count(), writes);
    assert_eq!(h.remote.patch_count(), patches);

    // Still idle on later runs; the watermark overlap does not count as a change
    assert!(h.engine.pull_at(now()).await.unwrap().idle);
    assert_eq!(h.fs.mutation_count(), writes);
}

#[tokio::test]
async fn test_rename_moves_subtree_and_rewrites_links() {
    let h = harness();
    let a = h.remote.insert("A", None);
    let b = h.remote.insert("B", Some(&a));
    h.engine.pull_at(now()).await.unwrap();
    h.fs
        .write("Index.md", b"See [[A/A]] and [[A/B/B|bee]].\n")
        .await
        .unwrap();

    h.remote.set_title(&a, "Alpha");
    let report = h.engine.pull_at(now()).await.unwrap();

    assert_eq!(report.moved, 1);
    assert_eq!(
        documents(&h.fs),
        vec!["Alpha/Alpha.md", "Alpha/B/B.md", "Index.md"]
    );
    assert_eq!(
        h.fs.text("Index.md").unwrap(),
        "See [[Alpha/Alpha]] and [[Alpha/B/B|bee]].\n"
    );
    assert!(h.fs.text("Alpha/B/B.md").unwrap().contains("*Parent*: [[Alpha/Alpha]]"));

    let log = load_log(&h.fs).await;
    assert_eq!(log.get(&b).unwrap().path, "Alpha/B/B.md");
    assert_eq!(log.get(&a).unwrap().path, "Alpha/Alpha.md");
}

#[tokio::test]
async fn test_reparent_moves_single_document() {
    let h = harness();
    let a = h.remote.insert("A", None);
    let c = h.remote.insert("C", None);
    let b = h.remote.insert("B", Some(&a));
    h.engine.pull_at(now()).await.unwrap();

    h.remote.set_parent(&b, Some(&c));
    h.engine.pull_at(now()).await.unwrap();

    assert!(!h.fs.exists("A/B").await.unwrap());
    let moved = h.fs.text("C/B/B.md").unwrap();
    assert!(moved.contains("*Parent*: [[C/C]]"));
    assert!(!h.fs.text("A/A.md").unwrap().contains("[[A/B/B]]"));
    assert!(h.fs.text("C/C.md").unwrap().contains("- [[C/B/B]]"));
}

#[tokio::test]
async fn test_archive_removes_document_but_keeps_canvas() {
    let h = harness();
    let a = h.remote.insert("A", None);
    let b = h.remote.insert("B", Some(&a));
    h.remote.set_canvas(&b, true);
    h.engine.pull_at(now()).await.unwrap();
    assert!(h.fs.exists("A/B/B.canvas").await.unwrap());

    h.remote.archive(&b);
    let report = h.engine.pull_at(now()).await.unwrap();

    assert_eq!(report.deleted, 1);
    assert!(!h.fs.exists("A/B/B.md").await.unwrap());
    assert!(h.fs.exists("A/B/B.canvas").await.unwrap());
    assert!(!h.fs.text("A/A.md").unwrap().contains("### Children"));
    assert!(load_log(&h.fs).await.get(&b).is_none());
}

#[tokio::test]
async fn test_replacement_record_keeps_archived_records_path() {
    let h = harness();
    let old = h.remote.insert("Notes", None);
    h.engine.pull_at(now()).await.unwrap();

    h.remote.archive(&old);
    let new = h.remote.insert("Notes", None);
    let report = h.engine.pull_at(now()).await.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 0);
    let doc = markdown::parse(&h.fs.text("Notes/Notes.md").unwrap());
    assert_eq!(doc.get_str("remote_id"), Some(new.as_str()));

    let log = load_log(&h.fs).await;
    assert!(log.get(&old).is_none());
    assert_eq!(log.get(&new).unwrap().path, "Notes/Notes.md");
}

#[tokio::test]
async fn test_children_of_archived_parent_move_up() {
    let h = harness();
    let a = h.remote.insert("A", None);
    let b = h.remote.insert("B", Some(&a));
    let c = h.remote.insert("C", Some(&b));
    h.engine.pull_at(now()).await.unwrap();
    assert!(h.fs.exists("A/B/C/C.md").await.unwrap());

    h.remote.archive(&b);
    let report = h.engine.pull_at(now()).await.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(documents(&h.fs), vec!["A/A.md", "C/C.md"]);
    assert!(!h.fs.text("C/C.md").unwrap().contains("*Parent*"));
    let log = load_log(&h.fs).await;
    assert_eq!(log.get(&c).unwrap().parent_id, None);
}

#[tokio::test]
async fn test_root_hubs_link_forward_in_creation_order() {
    let h = harness();
    for name in ["X", "Y", "Z"] {
        h.remote.insert(name, None);
    }

    h.engine.pull_at(now()).await.unwrap();

    assert!(h.fs.text("X/X.md").unwrap().contains("### Siblings\n- [[Y/Y]]"));
    assert!(h.fs.text("Y/Y.md").unwrap().contains("### Siblings\n- [[Z/Z]]"));
    assert!(!h.fs.text("Z/Z.md").unwrap().contains("### Siblings"));
}

#[tokio::test]
async fn test_cycle_fails_only_its_members() {
    let h = harness();
    let a = h.remote.insert("A", None);
    let b = h.remote.insert("B", Some(&a));
    h.remote.set_parent(&a, Some(&b));
    h.remote.insert("Fine", None);

    let report = h.engine.pull_at(now()).await.unwrap();

    let failed: Vec<&NodeId> = report.failed.iter().map(|(id, _)| id).collect();
    assert!(failed.contains(&&a));
    assert!(failed.contains(&&b));
    assert!(h.fs.exists("Fine/Fine.md").await.unwrap());

    // Failed nodes keep the watermark unset so the next run retries
    assert_eq!(load_log(&h.fs).await.watermark, None);
}

#[tokio::test]
async fn test_failed_rename_holds_back_descendants() {
    let h = harness();
    let a = h.remote.insert("A", None);
    let b = h.remote.insert("B", Some(&a));
    h.engine.pull_at(now()).await.unwrap();
    h.fs.write("Q/Q.md", b"Someone else's note\n").await.unwrap();

    h.remote.set_title(&a, "Q");
    h.remote.set_title(&b, "Bee");
    let report = h.engine.pull_at(now()).await.unwrap();

    let failed: Vec<&NodeId> = report.failed.iter().map(|(id, _)| id).collect();
    assert_eq!(failed, vec![&a, &b]);
    assert_eq!(documents(&h.fs), vec!["A/A.md", "A/B/B.md", "Q/Q.md"]);
    assert_eq!(h.fs.text("Q/Q.md").unwrap(), "Someone else's note\n");
    assert!(h.fs.text("A/B/B.md").unwrap().contains("*Parent*: [[A/A]]"));

    // Once the occupant is gone the whole subtree follows
    h.fs.delete("Q/Q.md").await.unwrap();
    h.fs.delete("Q").await.unwrap();
    let report = h.engine.pull_at(now()).await.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(documents(&h.fs), vec!["Q/Bee/Bee.md", "Q/Q.md"]);
    assert!(h.fs.text("Q/Bee/Bee.md").unwrap().contains("*Parent*: [[Q/Q]]"));
}

#[tokio::test]
async fn test_transient_failure_keeps_watermark_until_recovery() {
    let h = harness();
    let a = h.remote.insert("A", None);
    h.engine.pull_at(now()).await.unwrap();
    let watermark = load_log(&h.fs).await.watermark;

    h.remote.set_title(&a, "Renamed");
    h.remote.fail_patches_for(&a);
    let report = h.engine.pull_at(now()).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(load_log(&h.fs).await.watermark, watermark);

    h.remote.clear_failures();
    let report = h.engine.pull_at(now()).await.unwrap();

    assert!(report.failed.is_empty());
    let log = load_log(&h.fs).await;
    assert!(log.watermark > watermark);
    assert_eq!(log.get(&a).unwrap().path, "Renamed/Renamed.md");
    assert_eq!(log.get(&a).unwrap().last_edited, h.remote.node(&a).unwrap().last_edited);
}

#[tokio::test]
async fn test_user_section_survives_remote_edit() {
    let h = harness();
    let a = h.remote.insert("A", None);
    h.engine.pull_at(now()).await.unwrap();

    let text = h.fs.text("A/A.md").unwrap();
    h.fs
        .write("A/A.md", format!("{}My own notes\n", text).as_bytes())
        .await
        .unwrap();
    h.remote.set_canvas(&a, true);
    h.engine.pull_at(now()).await.unwrap();

    let text = h.fs.text("A/A.md").unwrap();
    assert!(text.contains("*Canvas*: [[A/A.canvas]]"));
    assert!(text.contains("My own notes"));
    assert!(h.fs.exists("A/A.canvas").await.unwrap());
}

#[tokio::test]
async fn test_hygiene_scan_repairs_deleted_document() {
    let h = harness();
    h.remote.insert("A", None);
    h.remote.insert("B", None);
    h.engine.pull_at(now()).await.unwrap();
    h.fs.delete("A/A.md").await.unwrap();

    // A is older than the watermark, so an incremental run does not see it
    h.engine.pull_at(now()).await.unwrap();
    assert!(!h.fs.exists("A/A.md").await.unwrap());

    h.engine.pull_at(now() + Duration::hours(25)).await.unwrap();
    assert!(h.fs.exists("A/A.md").await.unwrap());
    assert!(h.fs.text("A/A.md").unwrap().contains("### Siblings\n- [[B/B]]"));
}
