//! Rebuilds the folder tree from flat parent relations.
//!
//! Every node's path depends on its whole ancestor chain, so the resolver walks
//! chains iteratively, memoizes each result, and fetches ancestors that are not
//! in the snapshot on demand. Broken chains (cycles, runaway depth) fail only the
//! nodes on them.

use crate::error::SyncError;
use crate::node::{NodeId, RemoteNode};
use crate::paths::{NodePath, sanitize_title};
use crate::remote::RemoteStore;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Upper bound on ancestor chain length
pub const MAX_DEPTH: usize = 256;

/// A node with its position in the local tree.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub node: RemoteNode,
    /// Parent as used for layout; `None` when the real parent is unreachable
    pub effective_parent: Option<NodeId>,
    /// Number of ancestors
    pub depth: usize,
    pub path: NodePath,
}

#[derive(Debug, Default)]
pub struct Resolution {
    nodes: Vec<ResolvedNode>,
    /// Position of each node in `nodes`
    index: HashMap<NodeId, usize>,
    pub failed: Vec<(NodeId, SyncError)>,
}

impl Resolution {
    /// Nodes ordered by `(depth, path)`, parents before children
    pub fn ordered(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter()
    }

    pub fn get(&self, id: &NodeId) -> Option<&ResolvedNode> {
        self.index.get(id).and_then(|&at| self.nodes.get(at))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Placement {
    effective_parent: Option<NodeId>,
    depth: usize,
    path: NodePath,
}

pub struct TreeResolver {
    table: HashMap<NodeId, RemoteNode>,
    placements: HashMap<NodeId, Result<Placement, String>>,
    /// Ancestors that could not be fetched this run
    unreachable: HashSet<NodeId>,
    extension: String,
}

impl TreeResolver {
    pub fn new(snapshot: &[RemoteNode], extension: &str) -> Self {
        let table = snapshot
            .iter()
            .filter(|node| !node.archived)
            .map(|node| (node.id.clone(), node.clone()))
            .collect();
        Self {
            table,
            placements: HashMap::new(),
            unreachable: HashSet::new(),
            extension: extension.to_string(),
        }
    }

    /// Resolve the delta plus every ancestor of every delta node.
    pub async fn expand<R: RemoteStore + ?Sized>(
        &mut self,
        delta: &[RemoteNode],
        remote: &R,
    ) -> Resolution {
        // Delta records may be fresher than the snapshot
        for node in delta {
            if !node.archived {
                self.table.insert(node.id.clone(), node.clone());
            }
        }

        let mut included: HashSet<NodeId> = HashSet::new();
        let mut resolution = Resolution::default();

        for node in delta {
            if node.archived || included.contains(&node.id) {
                continue;
            }
            self.place(&node.id, remote).await;

            // Walk the memoized chain, stopping at anything already included
            let mut cursor = Some(node.id.clone());
            while let Some(id) = cursor.take() {
                if !included.insert(id.clone()) {
                    break;
                }
                match self.placements.get(&id) {
                    Some(Ok(placement)) => {
                        if let Some(found) = self.table.get(&id) {
                            resolution.nodes.push(ResolvedNode {
                                node: found.clone(),
                                effective_parent: placement.effective_parent.clone(),
                                depth: placement.depth,
                                path: placement.path.clone(),
                            });
                        }
                        cursor = placement.effective_parent.clone();
                    }
                    Some(Err(reason)) => {
                        warn!("Skipping {}: {}", id, reason);
                        resolution.failed.push((
                            id.clone(),
                            SyncError::DataIntegrity {
                                id: id.clone(),
                                reason: reason.clone(),
                            },
                        ));
                    }
                    None => {}
                }
            }
        }

        resolution
            .nodes
            .sort_by(|a, b| (a.depth, &a.path).cmp(&(b.depth, &b.path)));
        resolution.index = resolution
            .nodes
            .iter()
            .enumerate()
            .map(|(at, resolved)| (resolved.node.id.clone(), at))
            .collect();
        debug!(
            "Resolved {} nodes ({} failed)",
            resolution.nodes.len(),
            resolution.failed.len()
        );
        resolution
    }

    /// Compute and memoize the placement of `id` and every ancestor on its chain.
    async fn place<R: RemoteStore + ?Sized>(&mut self, id: &NodeId, remote: &R) {
        // Nodes visited on this walk, child first
        let mut walk: Vec<NodeId> = Vec::new();
        let mut on_walk: HashSet<NodeId> = HashSet::new();
        let mut cursor = id.clone();

        // Placement of the node just above the top of the walk
        let base: Result<Option<Placement>, String> = loop {
            if let Some(known) = self.placements.get(&cursor) {
                break match known {
                    Ok(placement) => Ok(Some(placement.clone())),
                    Err(_) => Err(format!("ancestor {} has a broken parent chain", cursor)),
                };
            }
            if !on_walk.insert(cursor.clone()) {
                break Err(format!("parent chain cycles through {}", cursor));
            }
            walk.push(cursor.clone());

            let parent = self.table.get(&cursor).and_then(|node| node.parent.clone());
            match parent {
                Some(parent) if self.ensure_loaded(&parent, remote).await => cursor = parent,
                _ => break Ok(None),
            }
        };

        let mut above = match base {
            Ok(placement) => placement,
            Err(reason) => {
                for node in walk {
                    self.placements.insert(node, Err(reason.clone()));
                }
                return;
            }
        };

        // Unwind from the top of the walk down to `id`
        while let Some(node_id) = walk.pop() {
            let (name, parent_id) = match self.table.get(&node_id) {
                Some(node) => (sanitize_title(&node.title, &node.id), node.parent.clone()),
                None => (node_id.as_str().to_string(), None),
            };
            let placement = match &above {
                Some(parent) if parent.depth + 1 > MAX_DEPTH => {
                    let reason = format!("parent chain deeper than {}", MAX_DEPTH);
                    self.placements.insert(node_id, Err(reason.clone()));
                    for below in walk.drain(..) {
                        self.placements.insert(below, Err(reason.clone()));
                    }
                    return;
                }
                Some(parent) => Placement {
                    effective_parent: parent_id,
                    depth: parent.depth + 1,
                    path: NodePath::new(Some(&parent.path.dir), &name, &self.extension),
                },
                None => Placement {
                    effective_parent: None,
                    depth: 0,
                    path: NodePath::new(None, &name, &self.extension),
                },
            };
            self.placements.insert(node_id, Ok(placement.clone()));
            above = Some(placement);
        }
    }

    /// Make sure `id` is in the table, fetching it if needed.
    ///
    /// Returns false when the ancestor is missing, archived or could not be fetched,
    /// in which case its child is laid out as a root for this run.
    async fn ensure_loaded<R: RemoteStore + ?Sized>(&mut self, id: &NodeId, remote: &R) -> bool {
        if self.table.contains_key(id) {
            return true;
        }
        if self.unreachable.contains(id) {
            return false;
        }
        match remote.get_by_id(id).await {
            Ok(Some(node)) if !node.archived => {
                debug!("Fetched ancestor {} outside the snapshot", id);
                self.table.insert(id.clone(), node);
                true
            }
            Ok(_) => {
                debug!("Ancestor {} is missing or archived, treating child as root", id);
                self.unreachable.insert(id.clone());
                false
            }
            Err(e) => {
                warn!("Could not fetch ancestor {}: {}", id, e);
                self.unreachable.insert(id.clone());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;

    async fn resolve_all(remote: &InMemoryRemote) -> Resolution {
        let snapshot = remote.list_all(false).await.unwrap();
        let mut resolver = TreeResolver::new(&snapshot, "md");
        resolver.expand(&snapshot, remote).await
    }

    fn documents(resolution: &Resolution) -> Vec<String> {
        resolution
            .ordered()
            .map(|r| r.path.document.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_paths_follow_ancestor_titles() {
        let remote = InMemoryRemote::new();
        let a = remote.insert("A", None);
        let b = remote.insert("B", Some(&a));
        let c = remote.insert("C", Some(&b));

        let resolution = resolve_all(&remote).await;

        assert_eq!(documents(&resolution), vec!["A/A.md", "A/B/B.md", "A/B/C/C.md"]);
        let leaf = resolution.get(&c).unwrap();
        assert_eq!(leaf.depth, 2);
        assert_eq!(leaf.effective_parent, Some(b));
    }

    #[tokio::test]
    async fn test_path_is_independent_of_delta_order() {
        let remote = InMemoryRemote::new();
        let a = remote.insert("A", None);
        let b = remote.insert("B", Some(&a));
        remote.insert("C", Some(&b));

        let mut snapshot = remote.list_all(false).await.unwrap();
        snapshot.reverse();
        let mut resolver = TreeResolver::new(&snapshot, "md");
        let resolution = resolver.expand(&snapshot, &remote).await;

        assert_eq!(documents(&resolution), vec!["A/A.md", "A/B/B.md", "A/B/C/C.md"]);
        // Lookup by id still finds each node after sorting
        for node in &snapshot {
            assert_eq!(resolution.get(&node.id).unwrap().node.id, node.id);
        }
        assert_eq!(resolution.get(&b).unwrap().path.document, "A/B/B.md");
        assert!(resolution.get(&NodeId::new("missing")).is_none());
    }

    #[tokio::test]
    async fn test_ancestors_of_delta_are_included() {
        let remote = InMemoryRemote::new();
        let a = remote.insert("A", None);
        let b = remote.insert("B", Some(&a));
        let c = remote.insert("C", Some(&b));
        remote.insert("Unrelated", None);

        let snapshot = remote.list_all(false).await.unwrap();
        let delta = vec![remote.node(&c).unwrap()];
        let mut resolver = TreeResolver::new(&snapshot, "md");
        let resolution = resolver.expand(&delta, &remote).await;

        assert_eq!(documents(&resolution), vec!["A/A.md", "A/B/B.md", "A/B/C/C.md"]);
    }

    #[tokio::test]
    async fn test_missing_ancestor_is_fetched_once() {
        let remote = InMemoryRemote::new();
        let a = remote.insert("A", None);
        let b = remote.insert("B", Some(&a));
        let c = remote.insert("C", Some(&a));

        // Snapshot without A, e.g. a filtered listing
        let snapshot = vec![remote.node(&b).unwrap(), remote.node(&c).unwrap()];
        let mut resolver = TreeResolver::new(&snapshot, "md");
        let resolution = resolver.expand(&snapshot, &remote).await;

        assert_eq!(remote.get_count(), 1);
        assert_eq!(resolution.get(&b).unwrap().path.document, "A/B/B.md");
        assert_eq!(resolution.get(&c).unwrap().path.document, "A/C/C.md");
    }

    #[tokio::test]
    async fn test_archived_ancestor_makes_child_a_root() {
        let remote = InMemoryRemote::new();
        let a = remote.insert("A", None);
        let b = remote.insert("B", Some(&a));
        remote.archive(&a);

        let resolution = resolve_all(&remote).await;

        let resolved = resolution.get(&b).unwrap();
        assert_eq!(resolved.path.document, "B/B.md");
        assert_eq!(resolved.effective_parent, None);
        assert_eq!(resolved.depth, 0);
    }

    #[tokio::test]
    async fn test_unfetchable_ancestor_makes_child_a_root() {
        let remote = InMemoryRemote::new();
        let a = remote.insert("A", None);
        let b = remote.insert("B", Some(&a));
        remote.fail_gets_for(&a);

        let snapshot = vec![remote.node(&b).unwrap()];
        let mut resolver = TreeResolver::new(&snapshot, "md");
        let resolution = resolver.expand(&snapshot, &remote).await;

        assert_eq!(resolution.get(&b).unwrap().path.document, "B/B.md");
        assert!(resolution.failed.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_fails_only_affected_nodes() {
        let remote = InMemoryRemote::new();
        let x = remote.insert("X", None);
        let y = remote.insert("Y", Some(&x));
        let z = remote.insert("Z", Some(&y));
        remote.set_parent(&x, Some(&y));
        let ok = remote.insert("Ok", None);

        let resolution = resolve_all(&remote).await;

        let failed: HashSet<NodeId> = resolution.failed.iter().map(|(id, _)| id.clone()).collect();
        assert!(failed.contains(&x));
        assert!(failed.contains(&y));
        assert!(failed.contains(&z));
        assert!(matches!(
            resolution.failed[0].1,
            SyncError::DataIntegrity { .. }
        ));
        assert_eq!(resolution.get(&ok).unwrap().path.document, "Ok/Ok.md");
        assert_eq!(resolution.len(), 1);
    }

    #[tokio::test]
    async fn test_depth_overflow_is_reported() {
        let remote = InMemoryRemote::new();
        let mut parent = remote.insert("L0", None);
        for level in 1..=MAX_DEPTH + 1 {
            parent = remote.insert(&format!("L{}", level), Some(&parent));
        }

        let resolution = resolve_all(&remote).await;

        assert!(resolution.failed.iter().any(|(id, _)| id == &parent));
        assert!(resolution.ordered().all(|r| r.depth <= MAX_DEPTH));
    }
}
