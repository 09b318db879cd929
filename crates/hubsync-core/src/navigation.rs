//! Navigation blocks on hub documents.
//!
//! Every root record's document (its hub) ends with a `### Siblings` block linking
//! forward to the next root and a `### Children` block listing its direct children.
//! Rebuilding strips the previous blocks first, so running it twice changes nothing.

use crate::error::Result;
use crate::fs::{FileSystem, FsError};
use crate::markdown;
use crate::node::{NodeId, RemoteNode};
use crate::paths::{NodePath, sanitize_title};
use crate::sync_log::SyncLog;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

pub const SIBLINGS_HEADING: &str = "### Siblings";
pub const CHILDREN_HEADING: &str = "### Children";

/// A root record and the hub path it lives at.
#[derive(Debug, Clone)]
pub struct Hub {
    pub id: NodeId,
    pub path: NodePath,
    /// Link targets of direct children, sorted case-insensitively
    pub children: Vec<String>,
}

/// Roots of the live tree ordered by `(created_time, id)`, with their children.
///
/// A record whose parent is not live counts as a root.
pub fn collect_hubs(snapshot: &[RemoteNode], extension: &str) -> Vec<Hub> {
    let live: HashMap<&NodeId, &RemoteNode> = snapshot
        .iter()
        .filter(|node| !node.archived)
        .map(|node| (&node.id, node))
        .collect();

    let mut roots: Vec<&RemoteNode> = live
        .values()
        .filter(|node| match &node.parent {
            None => true,
            Some(parent) => !live.contains_key(parent),
        })
        .copied()
        .collect();
    roots.sort_by(|a, b| (a.created_time, &a.id).cmp(&(b.created_time, &b.id)));

    roots
        .into_iter()
        .map(|root| {
            let path = NodePath::new(None, &sanitize_title(&root.title, &root.id), extension);
            let mut seen = HashSet::new();
            let mut children: Vec<(String, String)> = live
                .values()
                .filter(|node| node.parent.as_ref() == Some(&root.id))
                .map(|child| {
                    let name = sanitize_title(&child.title, &child.id);
                    let target = NodePath::new(Some(&path.dir), &name, extension).link_target();
                    (name.to_lowercase(), target)
                })
                .filter(|(_, target)| seen.insert(target.clone()))
                .collect();
            children.sort();
            Hub {
                id: root.id.clone(),
                children: children.into_iter().map(|(_, target)| target).collect(),
                path,
            }
        })
        .collect()
}

/// Remove previously generated navigation blocks and collapse blank-line runs.
pub fn strip_navigation(body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_block = false;

    for line in body.lines() {
        let trimmed = line.trim_end();
        if trimmed == SIBLINGS_HEADING || trimmed == CHILDREN_HEADING {
            in_block = true;
            continue;
        }
        if in_block && trimmed.starts_with("- ") {
            continue;
        }
        in_block = false;
        if trimmed.is_empty() && kept.last().is_some_and(|prev| prev.trim().is_empty()) {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n")
}

fn link_block(heading: &str, targets: &[String]) -> Option<String> {
    if targets.is_empty() {
        return None;
    }
    let mut block = heading.to_string();
    for target in targets {
        block.push_str(&format!("\n- [[{}]]", target));
    }
    Some(block)
}

/// Body with fresh navigation blocks appended.
pub fn with_navigation(body: &str, next_sibling: Option<&str>, children: &[String]) -> String {
    let mut out = strip_navigation(body).trim_end().to_string();
    let siblings: Vec<String> = next_sibling.map(str::to_string).into_iter().collect();
    let blocks = [
        link_block(SIBLINGS_HEADING, &siblings),
        link_block(CHILDREN_HEADING, children),
    ];
    for block in blocks.into_iter().flatten() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&block);
    }
    out.push('\n');
    out
}

/// Rewrite navigation on every hub that needs it.
///
/// Hubs of records in `skip` (failed this run) are left out of the chain, since
/// their documents may not be where their titles say. Returns the hub documents
/// that were written.
pub async fn rebuild_navigation<F: FileSystem + ?Sized>(
    fs: &F,
    log: &mut SyncLog,
    snapshot: &[RemoteNode],
    extension: &str,
    skip: &HashSet<NodeId>,
) -> Result<Vec<String>> {
    let hubs: Vec<Hub> = collect_hubs(snapshot, extension)
        .into_iter()
        .filter(|hub| !skip.contains(&hub.id))
        .collect();
    let mut written = Vec::new();
    let mut relinked: BTreeSet<&str> = BTreeSet::new();

    for (index, hub) in hubs.iter().enumerate() {
        let next = hubs.get(index + 1).map(|next| next.path.link_target());
        let document = &hub.path.document;

        let text = match fs.read_string(document).await {
            Ok(text) => text,
            Err(FsError::NotFound(_)) => {
                debug!("Hub {} not materialized, skipping navigation", document);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut parsed = markdown::parse(&text);
        parsed.body = with_navigation(&parsed.body, next.as_deref(), &hub.children);
        let updated = parsed.to_markdown()?;
        if updated != text && relinked.insert(document) {
            fs.write(document, updated.as_bytes()).await?;
            log.refresh_fingerprint(document, parsed.fingerprint());
            debug!("Relinked hub {}", document);
            written.push(document.clone());
        }
    }

    Ok(written)
}
