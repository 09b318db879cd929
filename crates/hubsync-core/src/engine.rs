//! The sync engine: ties change detection, tree resolution, moves, writes,
//! deletions and navigation into pull and push runs.

use crate::delta::detect;
use crate::deletion::reconcile_deletions;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::fs::FileSystem;
use crate::materialize::{materialize, needs_materialization};
use crate::moves::{MoveKind, reconcile_move};
use crate::navigation::rebuild_navigation;
use crate::node::{NodeId, RemoteNode};
use crate::options::SyncOptions;
use crate::push::{PushReport, push};
use crate::remote::RemoteStore;
use crate::seed::{SeedPayload, SeedReport, seed};
use crate::sync_log::{SyncLog, SyncLogEntry, SyncLogStore};
use crate::tree::{Resolution, ResolvedNode, TreeResolver};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Pull,
    Push,
    Both,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Documents written for records that had never been synced
    pub created: usize,
    /// Existing documents rewritten
    pub updated: usize,
    /// Nodes whose files were relocated
    pub moved: usize,
    pub deleted: usize,
    pub hubs_relinked: usize,
    pub failed: Vec<(NodeId, String)>,
    /// Deletion or navigation passes that could not complete
    pub pass_errors: Vec<String>,
    /// Nothing changed remotely; the run exited early
    pub idle: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub pull: Option<PullReport>,
    pub push: Option<PushReport>,
}

/// What happened to one node during a pull
#[derive(Debug, Default)]
struct NodeOutcome {
    created: bool,
    updated: bool,
    moved: bool,
    last_edited: Option<DateTime<Utc>>,
}

/// Bidirectional sync between a local vault and a remote record tree.
///
/// Runs are strictly sequential; one engine per vault.
pub struct SyncEngine<F: FileSystem, R: RemoteStore> {
    fs: F,
    remote: R,
    options: SyncOptions,
    events: Arc<EventBus>,
}

impl<F: FileSystem, R: RemoteStore> SyncEngine<F, R> {
    pub fn new(fs: F, remote: R) -> Self {
        Self::with_options(fs, remote, SyncOptions::default())
    }

    pub fn with_options(fs: F, remote: R, options: SyncOptions) -> Self {
        Self {
            fs,
            remote,
            options,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Event bus for progress and per-node outcomes
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub async fn sync(&self, direction: Direction) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if matches!(direction, Direction::Pull | Direction::Both) {
            report.pull = Some(self.pull().await?);
        }
        if matches!(direction, Direction::Push | Direction::Both) {
            report.push = Some(self.push().await?);
        }
        Ok(report)
    }

    pub async fn pull(&self) -> Result<PullReport> {
        self.pull_at(Utc::now()).await
    }

    /// Pull remote changes into the vault, using `now` as the local clock.
    pub async fn pull_at(&self, now: DateTime<Utc>) -> Result<PullReport> {
        self.events.emit(SyncEvent::RunStarted {
            direction: "pull".to_string(),
        });
        let store = SyncLogStore::new(&self.fs, &self.options.log_path);
        let mut log = store.load().await?;
        let mut report = PullReport::default();

        let changes = detect(&log, &self.remote, now, self.options.hygiene_interval).await?;
        if changes.is_idle() {
            debug!("Nothing changed since {:?}", changes.watermark);
            report.idle = true;
            self.finish("pull", 0);
            return Ok(report);
        }

        let delta = self.widen_delta(&log, &changes.snapshot, changes.delta, changes.full_scan);
        let mut max_seen = changes
            .snapshot
            .iter()
            .chain(delta.iter())
            .map(|node| node.last_edited)
            .max();

        let mut resolver = TreeResolver::new(&changes.snapshot, &self.options.extension);
        let resolution = resolver.expand(&delta, &self.remote).await;
        for (id, error) in &resolution.failed {
            self.fail(&mut report, id, error);
        }

        // Parents come first, so a failure is known before any descendant runs
        let mut failed: HashSet<NodeId> = resolution
            .failed
            .iter()
            .map(|(id, _)| id.clone())
            .collect();

        let total = resolution.len();
        for (done, resolved) in resolution.ordered().enumerate() {
            let id = &resolved.node.id;
            let failed_parent = resolved
                .effective_parent
                .as_ref()
                .filter(|parent| failed.contains(*parent));
            let result = match failed_parent {
                Some(parent) => Err(SyncError::AncestorFailed {
                    id: id.clone(),
                    ancestor: parent.clone(),
                }),
                None => self.sync_node(&mut log, &resolution, resolved, now).await,
            };
            match result {
                Ok(outcome) => {
                    report.created += usize::from(outcome.created);
                    report.updated += usize::from(outcome.updated);
                    report.moved += usize::from(outcome.moved);
                    max_seen = max_seen.max(outcome.last_edited);
                }
                Err(e) if e.is_node_scoped() => {
                    failed.insert(id.clone());
                    self.fail(&mut report, id, &e);
                }
                Err(e) => return Err(e),
            }
            self.events.emit(SyncEvent::Progress {
                done: done + 1,
                total,
            });
        }

        match reconcile_deletions(&self.fs, &mut log, &changes.snapshot).await {
            Ok(deleted) => {
                report.deleted = deleted.iter().filter(|d| d.removed).count();
                for gone in deleted {
                    self.events.emit(SyncEvent::NodeDeleted {
                        id: gone.id,
                        path: gone.path,
                    });
                }
            }
            Err(e) => {
                warn!("Deletion pass failed: {}", e);
                report.pass_errors.push(format!("deletion: {}", e));
            }
        }

        match rebuild_navigation(
            &self.fs,
            &mut log,
            &changes.snapshot,
            &self.options.extension,
            &failed,
        )
        .await
        {
            Ok(relinked) => report.hubs_relinked = relinked.len(),
            Err(e) => {
                warn!("Navigation rebuild failed: {}", e);
                report.pass_errors.push(format!("navigation: {}", e));
            }
        }

        if report.failed.is_empty() && report.pass_errors.is_empty() {
            // Step back a second so records edited within the same second are seen again
            if let Some(max_seen) = max_seen {
                let candidate = max_seen - Duration::seconds(1);
                log.watermark = Some(log.watermark.map_or(candidate, |old| old.max(candidate)));
            }
            if changes.full_scan {
                log.last_full_scan = Some(now);
            }
        } else {
            warn!(
                "{} nodes failed, keeping watermark {:?}",
                report.failed.len() + report.pass_errors.len(),
                log.watermark
            );
        }

        store.commit(&log).await?;
        info!(
            "Pull finished: {} created, {} updated, {} moved, {} deleted, {} failed",
            report.created,
            report.updated,
            report.moved,
            report.deleted,
            report.failed.len()
        );
        self.finish("pull", report.failed.len());
        Ok(report)
    }

    pub async fn push(&self) -> Result<PushReport> {
        self.push_at(Utc::now()).await
    }

    /// Create remote records for local documents that have none.
    pub async fn push_at(&self, now: DateTime<Utc>) -> Result<PushReport> {
        self.events.emit(SyncEvent::RunStarted {
            direction: "push".to_string(),
        });
        let store = SyncLogStore::new(&self.fs, &self.options.log_path);
        let mut log = store.load().await?;

        let report = push(&self.fs, &self.remote, &mut log, &self.options, now).await?;
        for (id, path) in &report.created {
            self.events.emit(SyncEvent::NodeCreated {
                id: id.clone(),
                path: path.clone(),
            });
        }
        store.commit(&log).await?;

        info!(
            "Push finished: {} created, {} hubs stubbed, {} already synced, {} failed",
            report.created.len(),
            report.hubs_created,
            report.skipped,
            report.failed.len()
        );
        self.finish("push", report.failed.len());
        Ok(report)
    }

    /// Build the remote tree described by `payload`, filling in ids.
    pub async fn seed(&self, payload: &mut SeedPayload) -> Result<SeedReport> {
        seed(&self.remote, payload, &self.options).await
    }

    /// Add nodes that need processing beyond the remote delta.
    fn widen_delta(
        &self,
        log: &SyncLog,
        snapshot: &[RemoteNode],
        mut delta: Vec<RemoteNode>,
        full_scan: bool,
    ) -> Vec<RemoteNode> {
        let live: HashSet<&NodeId> = snapshot.iter().map(|node| &node.id).collect();
        let mut included: HashSet<NodeId> = delta.iter().map(|node| node.id.clone()).collect();

        for node in snapshot {
            if included.contains(&node.id) {
                continue;
            }
            // Children of a record that disappeared have to move up
            let orphaned = log
                .get(&node.id)
                .and_then(|entry| entry.parent_id.as_ref())
                .is_some_and(|parent| !live.contains(parent));
            if full_scan || orphaned {
                included.insert(node.id.clone());
                delta.push(node.clone());
            }
        }
        delta
    }

    async fn sync_node(
        &self,
        log: &mut SyncLog,
        resolution: &Resolution,
        resolved: &ResolvedNode,
        now: DateTime<Utc>,
    ) -> Result<NodeOutcome> {
        let id = &resolved.node.id;
        let document = &resolved.path.document;
        let entry: Option<SyncLogEntry> = log.get(id).cloned();

        let moved = reconcile_move(&self.fs, log, resolved, &self.options.extension).await?;
        if moved.kind.relocated() {
            if let Some(current) = log.entries.get_mut(id) {
                current.path = document.clone();
            }
            self.events.emit(SyncEvent::NodeMoved {
                id: id.clone(),
                from: moved.from.clone().unwrap_or_default(),
                to: document.clone(),
                subtree: moved.kind == MoveKind::Subtree,
            });
        }
        for (path, count) in &moved.rewritten {
            self.events.emit(SyncEvent::LinksRewritten {
                path: path.clone(),
                count: *count,
            });
        }

        let exists = self.fs.exists(document).await?;
        if !needs_materialization(entry.as_ref(), &resolved.node, moved.kind, exists) {
            return Ok(NodeOutcome {
                moved: moved.kind.relocated(),
                last_edited: Some(resolved.node.last_edited),
                ..Default::default()
            });
        }

        let parent = resolved
            .effective_parent
            .as_ref()
            .and_then(|parent| resolution.get(parent))
            .map(|parent| &parent.path);
        let written = materialize(
            &self.fs,
            &self.remote,
            entry.as_ref(),
            resolved,
            parent,
            &self.options,
            now,
        )
        .await?;

        if written.written {
            self.events.emit(SyncEvent::NodeMaterialized {
                id: id.clone(),
                path: document.clone(),
            });
        }
        if written.patched > 0 {
            self.events.emit(SyncEvent::RemotePatched {
                id: id.clone(),
                fields: written.patched,
            });
        }

        log.upsert(
            id.clone(),
            SyncLogEntry {
                parent_id: resolved.effective_parent.clone(),
                last_edited: written.last_edited,
                path: document.clone(),
                fingerprint: written.fingerprint,
                synced_at: now,
            },
        );

        Ok(NodeOutcome {
            created: entry.is_none(),
            updated: entry.is_some() && written.written,
            moved: moved.kind.relocated(),
            last_edited: Some(written.last_edited),
        })
    }

    fn fail(&self, report: &mut PullReport, id: &NodeId, error: &SyncError) {
        warn!("Failed to sync {}: {}", id, error);
        report.failed.push((id.clone(), error.to_string()));
        self.events.emit(SyncEvent::NodeFailed {
            id: id.clone(),
            error: error.to_string(),
        });
    }

    fn finish(&self, direction: &str, failed: usize) {
        self.events.emit(SyncEvent::RunFinished {
            direction: direction.to_string(),
            failed,
        });
    }
}
