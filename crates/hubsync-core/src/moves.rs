//! Move and rename propagation.
//!
//! When a record's parent or title changes remotely its document has to follow.
//! A node that owns nothing but its document (and canvas) is moved file by file;
//! a node with children moves its whole folder. Either way, wiki links elsewhere in
//! the vault that pointed at the old location are retargeted afterwards.

use crate::content_hash::ContentHash;
use crate::error::{Result, SyncError};
use crate::fs::{FileSystem, FsError, prune_empty_dirs, walk_files};
use crate::markdown::{self, REMOTE_ID_KEY};
use crate::node::NodeId;
use crate::paths::{NodePath, file_name, is_under, parent_dir, strip_extension};
use crate::sync_log::SyncLog;
use crate::tree::ResolvedNode;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Not previously synced, or nothing changed
    Unchanged,
    /// Parent changed but the path did not; only the breadcrumb needs updating
    ParentOnly,
    /// The old document is gone; the node is written fresh at its new path
    Fresh,
    SingleFile,
    Subtree,
}

impl MoveKind {
    /// Whether the node must be re-rendered because of this move
    pub fn needs_render(self) -> bool {
        !matches!(self, MoveKind::Unchanged)
    }

    /// Whether files were relocated
    pub fn relocated(self) -> bool {
        matches!(self, MoveKind::SingleFile | MoveKind::Subtree)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub kind: MoveKind,
    /// Previous document path, when the node had one
    pub from: Option<String>,
    /// Documents whose links were retargeted, with the number of links changed
    pub rewritten: Vec<(String, usize)>,
}

impl MoveOutcome {
    fn unchanged() -> Self {
        Self {
            kind: MoveKind::Unchanged,
            from: None,
            rewritten: Vec::new(),
        }
    }
}

/// Bring the node's files to its resolved path.
pub async fn reconcile_move<F: FileSystem + ?Sized>(
    fs: &F,
    log: &mut SyncLog,
    resolved: &ResolvedNode,
    extension: &str,
) -> Result<MoveOutcome> {
    let id = &resolved.node.id;
    let Some(entry) = log.get(id) else {
        return Ok(MoveOutcome::unchanged());
    };
    let old = NodePath::from_document(&entry.path);
    let new = &resolved.path;

    if old.document == new.document {
        let kind = if entry.parent_id != resolved.effective_parent {
            MoveKind::ParentOnly
        } else {
            MoveKind::Unchanged
        };
        return Ok(MoveOutcome {
            kind,
            from: Some(old.document),
            rewritten: Vec::new(),
        });
    }

    if !fs.exists(&old.document).await? {
        debug!("{} no longer exists, writing {} fresh", old.document, new.document);
        return Ok(MoveOutcome {
            kind: MoveKind::Fresh,
            from: Some(old.document),
            rewritten: Vec::new(),
        });
    }

    let old_name = strip_extension(file_name(&old.document)).to_string();
    let old_canvas = format!("{}/{}.canvas", old.dir, old_name);

    let kind = if owns_other_content(fs, &old, &old_name).await? {
        move_subtree(fs, log, id, &old, &old_name, new, extension).await?;
        MoveKind::Subtree
    } else {
        move_single(fs, id, &old, &old_canvas, new).await?;
        MoveKind::SingleFile
    };
    info!("Moved {} -> {} ({:?})", old.document, new.document, kind);

    let mapping = LinkMapping {
        old_document: strip_extension(&old.document).to_string(),
        new_document: new.link_target(),
        old_canvas,
        new_canvas: new.canvas(),
        old_dir: (kind == MoveKind::Subtree).then(|| old.dir.clone()),
        new_dir: new.dir.clone(),
    };
    let rewritten = rewrite_links(fs, log, &mapping, extension).await?;

    Ok(MoveOutcome {
        kind,
        from: Some(old.document),
        rewritten,
    })
}

/// Whether the node's folder holds anything besides its own document and canvas
async fn owns_other_content<F: FileSystem + ?Sized>(
    fs: &F,
    old: &NodePath,
    old_name: &str,
) -> Result<bool> {
    if old.dir.is_empty() {
        return Ok(false);
    }
    let own_document = file_name(&old.document);
    let own_canvas = format!("{}.canvas", old_name);
    Ok(fs
        .list(&old.dir)
        .await?
        .iter()
        .any(|entry| entry.is_dir || (entry.name != own_document && entry.name != own_canvas)))
}

async fn move_single<F: FileSystem + ?Sized>(
    fs: &F,
    id: &NodeId,
    old: &NodePath,
    old_canvas: &str,
    new: &NodePath,
) -> Result<()> {
    clear_destination(fs, id, &new.document).await?;
    fs.mkdir(&new.dir).await?;
    fs.rename(&old.document, &new.document).await?;
    if fs.exists(old_canvas).await? {
        fs.rename(old_canvas, &new.canvas()).await?;
    }
    prune_empty_dirs(fs, &old.dir).await;
    Ok(())
}

async fn move_subtree<F: FileSystem + ?Sized>(
    fs: &F,
    log: &mut SyncLog,
    id: &NodeId,
    old: &NodePath,
    old_name: &str,
    new: &NodePath,
    extension: &str,
) -> Result<()> {
    if fs.exists(&new.dir).await? {
        clear_destination(fs, id, &new.document).await?;
        if !fs.list(&new.dir).await?.is_empty() {
            return Err(SyncError::Conflict {
                path: new.dir.clone(),
                reason: "destination folder is not empty".to_string(),
            });
        }
        fs.delete(&new.dir).await?;
    }

    let new_parent = parent_dir(&new.dir);
    if !new_parent.is_empty() {
        fs.mkdir(new_parent).await?;
    }
    fs.rename(&old.dir, &new.dir).await?;

    // The folder now carries the new name; the files inside may still carry the old one
    if old_name != new.name() {
        let moved_document = format!("{}/{}.{}", new.dir, old_name, extension);
        fs.rename(&moved_document, &new.document).await?;
        let moved_canvas = format!("{}/{}.canvas", new.dir, old_name);
        if fs.exists(&moved_canvas).await? {
            fs.rename(&moved_canvas, &new.canvas()).await?;
        }
    }

    let rebased = log.rebase_prefix(&old.dir, &new.dir);
    debug!("Rebased {} log entries from {} to {}", rebased, old.dir, new.dir);
    prune_empty_dirs(fs, parent_dir(&old.dir)).await;
    Ok(())
}

/// Make room at `document`.
///
/// A stale copy of the same record is removed; anything else is a conflict.
async fn clear_destination<F: FileSystem + ?Sized>(
    fs: &F,
    id: &NodeId,
    document: &str,
) -> Result<()> {
    let content = match fs.read_string(document).await {
        Ok(content) => content,
        Err(FsError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let occupant = markdown::parse(&content);
    match occupant.get_str(REMOTE_ID_KEY) {
        Some(remote_id) if remote_id == id.as_str() => {
            debug!("Removing stale duplicate of {} at {}", id, document);
            fs.delete(document).await?;
            Ok(())
        }
        other => Err(SyncError::Conflict {
            path: document.to_string(),
            reason: match other {
                Some(remote_id) => format!("occupied by record {}", remote_id),
                None => "occupied by an unsynced document".to_string(),
            },
        }),
    }
}

/// Old and new link targets for one move, all without the `.md` extension.
#[derive(Debug, Clone)]
struct LinkMapping {
    old_document: String,
    new_document: String,
    old_canvas: String,
    new_canvas: String,
    /// Set for subtree moves
    old_dir: Option<String>,
    new_dir: String,
}

impl LinkMapping {
    /// New target for a link, if it pointed at something that moved
    fn retarget(&self, target: &str) -> Option<String> {
        if target == self.old_canvas {
            return Some(self.new_canvas.clone());
        }
        if target == self.old_document || is_segment_suffix(target, &self.old_document) {
            return Some(self.new_document.clone());
        }
        let old_dir = self.old_dir.as_deref()?;
        if is_under(target, old_dir) {
            return Some(format!("{}{}", self.new_dir, &target[old_dir.len()..]));
        }
        None
    }
}

/// `B/B` is a segment suffix of `A/B/B`; `B/B` is not one of `A/BB/B`
fn is_segment_suffix(candidate: &str, path: &str) -> bool {
    !candidate.is_empty()
        && path.len() > candidate.len()
        && path.ends_with(candidate)
        && path.as_bytes()[path.len() - candidate.len() - 1] == b'/'
}

/// Retarget links across every document in the vault.
async fn rewrite_links<F: FileSystem + ?Sized>(
    fs: &F,
    log: &mut SyncLog,
    mapping: &LinkMapping,
    extension: &str,
) -> Result<Vec<(String, usize)>> {
    let suffix = format!(".{}", extension);
    let mut rewritten = Vec::new();

    for path in walk_files(fs, "").await? {
        if !path.ends_with(&suffix) {
            continue;
        }
        let content = fs.read_string(&path).await?;
        let mut count = 0;
        let updated = wiki_links::rewrite_links(&content, |link| {
            let target = mapping.retarget(&link.note_target())?;
            count += 1;
            Some(target)
        });
        if let Some(updated) = updated {
            fs.write(&path, updated.as_bytes()).await?;
            let fingerprint = ContentHash::from_content(&markdown::parse(&updated).body);
            log.refresh_fingerprint(&path, fingerprint);
            debug!("Rewrote {} links in {}", count, path);
            rewritten.push((path, count));
        }
    }

    Ok(rewritten)
}
