//! Change detection against the remote store.

use crate::error::Result;
use crate::node::{NodeId, RemoteNode};
use crate::remote::RemoteStore;
use crate::sync_log::SyncLog;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::debug;

/// What changed remotely since the last run.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Every live (non-archived) record
    pub snapshot: Vec<RemoteNode>,
    /// Records to process this run, deduplicated by id
    pub delta: Vec<RemoteNode>,
    /// Whether every live record should be re-verified
    pub full_scan: bool,
    /// Whether the log still tracks records that are no longer live
    pub pending_deletions: bool,
    /// The watermark this change set was derived from
    pub watermark: Option<DateTime<Utc>>,
}

impl ChangeSet {
    /// True when the run can exit without touching anything.
    pub fn is_idle(&self) -> bool {
        self.watermark.is_some()
            && self.delta.is_empty()
            && !self.full_scan
            && !self.pending_deletions
    }
}

/// Whether the periodic full pass is due.
pub fn hygiene_due(log: &SyncLog, now: DateTime<Utc>, interval: Duration) -> bool {
    match log.last_full_scan {
        None => true,
        Some(last) => now - last >= interval,
    }
}

/// Compute the change set for a pull.
pub async fn detect<R: RemoteStore + ?Sized>(
    log: &SyncLog,
    remote: &R,
    now: DateTime<Utc>,
    hygiene_interval: Duration,
) -> Result<ChangeSet> {
    let snapshot = remote.list_all(false).await?;

    let Some(watermark) = log.watermark else {
        debug!("No watermark, bootstrapping {} nodes", snapshot.len());
        return Ok(ChangeSet {
            delta: snapshot.clone(),
            pending_deletions: has_pending_deletions(log, &snapshot),
            snapshot,
            full_scan: true,
            watermark: None,
        });
    };

    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    let mut delta = Vec::new();

    for node in remote.list_modified_after(watermark).await? {
        if node.archived {
            continue;
        }
        // The watermark trails by a second, so already-synced edits come back
        let unchanged = log
            .get(&node.id)
            .is_some_and(|entry| entry.last_edited == node.last_edited);
        if unchanged {
            continue;
        }
        if seen.insert(node.id.clone()) {
            delta.push(node);
        }
    }

    // Records created with a backdated timestamp would slip under the watermark
    for node in &snapshot {
        if log.get(&node.id).is_none() && seen.insert(node.id.clone()) {
            delta.push(node.clone());
        }
    }

    let full_scan = hygiene_due(log, now, hygiene_interval);
    debug!(
        "Detected {} changed nodes since {} (full scan: {})",
        delta.len(),
        watermark,
        full_scan
    );

    Ok(ChangeSet {
        pending_deletions: has_pending_deletions(log, &snapshot),
        snapshot,
        delta,
        full_scan,
        watermark: Some(watermark),
    })
}

fn has_pending_deletions(log: &SyncLog, snapshot: &[RemoteNode]) -> bool {
    let live: BTreeSet<&NodeId> = snapshot.iter().map(|node| &node.id).collect();
    log.entries.keys().any(|id| !live.contains(id))
}
