//! Removes documents whose records are gone.
//!
//! A record that is archived, trashed or deleted remotely drops out of the live
//! snapshot. Its document is removed and empty folders above it pruned; canvas
//! files are left alone, so a folder that still holds one survives.

use crate::error::Result;
use crate::fs::{FileSystem, FsError, prune_empty_dirs};
use crate::node::{NodeId, RemoteNode};
use crate::paths::parent_dir;
use crate::sync_log::SyncLog;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Deleted {
    pub id: NodeId,
    pub path: String,
    /// Whether a document was actually removed from disk
    pub removed: bool,
}

/// Drop every log entry whose record is no longer live, removing its document.
pub async fn reconcile_deletions<F: FileSystem + ?Sized>(
    fs: &F,
    log: &mut SyncLog,
    snapshot: &[RemoteNode],
) -> Result<Vec<Deleted>> {
    let live: HashSet<&NodeId> = snapshot
        .iter()
        .filter(|node| !node.archived)
        .map(|node| &node.id)
        .collect();
    let gone: Vec<NodeId> = log
        .entries
        .keys()
        .filter(|id| !live.contains(id))
        .cloned()
        .collect();

    let mut deleted = Vec::new();
    for id in gone {
        let Some(entry) = log.remove(&id) else {
            continue;
        };
        // A live record may have taken over the path this run
        if let Some(owner) = log.id_for_path(&entry.path) {
            debug!(
                "Dropped log entry for {}; {} now belongs to {}",
                id, entry.path, owner
            );
            deleted.push(Deleted {
                id,
                path: entry.path,
                removed: false,
            });
            continue;
        }
        let removed = match fs.delete(&entry.path).await {
            Ok(()) => true,
            Err(FsError::NotFound(_)) => false,
            Err(e) => {
                // Keep the entry so the next run retries
                log.upsert(id, entry);
                return Err(e.into());
            }
        };
        prune_empty_dirs(fs, parent_dir(&entry.path)).await;
        if removed {
            info!("Removed {} ({} is gone remotely)", entry.path, id);
        } else {
            debug!("Dropped log entry for {}; {} was already gone", id, entry.path);
        }
        deleted.push(Deleted {
            id,
            path: entry.path,
            removed,
        });
    }

    Ok(deleted)
}
