//! RemoteStore trait abstraction for the remote record tree.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing, with a deterministic clock
//! - `NotionRemote` (in hubsync-cli) - Notion REST API

use crate::node::{Field, NewNode, NodeId, PropertyMap, PropertyValue, RemoteNode};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failures, rate limits, 5xx responses
    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote record not found: {0}")]
    NotFound(NodeId),

    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Could not decode remote response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Record CRUD against the remote tree.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every record, optionally including archived ones
    async fn list_all(&self, include_archived: bool) -> Result<Vec<RemoteNode>>;

    /// Records whose `last_edited` is strictly after `ts`
    async fn list_modified_after(&self, ts: DateTime<Utc>) -> Result<Vec<RemoteNode>>;

    /// Fetch one record; `None` if it does not exist
    async fn get_by_id(&self, id: &NodeId) -> Result<Option<RemoteNode>>;

    async fn create(&self, node: NewNode) -> Result<RemoteNode>;

    /// Merge the given properties into the record
    async fn patch_properties(&self, id: &NodeId, properties: PropertyMap) -> Result<()>;
}

#[async_trait]
impl<T: RemoteStore + Send + Sync> RemoteStore for std::sync::Arc<T> {
    async fn list_all(&self, include_archived: bool) -> Result<Vec<RemoteNode>> {
        (**self).list_all(include_archived).await
    }

    async fn list_modified_after(&self, ts: DateTime<Utc>) -> Result<Vec<RemoteNode>> {
        (**self).list_modified_after(ts).await
    }

    async fn get_by_id(&self, id: &NodeId) -> Result<Option<RemoteNode>> {
        (**self).get_by_id(id).await
    }

    async fn create(&self, node: NewNode) -> Result<RemoteNode> {
        (**self).create(node).await
    }

    async fn patch_properties(&self, id: &NodeId, properties: PropertyMap) -> Result<()> {
        (**self).patch_properties(id, properties).await
    }
}

struct RemoteState {
    nodes: BTreeMap<NodeId, RemoteNode>,
    clock: DateTime<Utc>,
    next_id: u64,
    failing_patches: BTreeSet<NodeId>,
    failing_gets: BTreeSet<NodeId>,
}

impl RemoteState {
    /// Advance the logical clock by one second
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut RemoteNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.clone()))
    }
}

/// In-memory remote store for testing.
///
/// Every mutation advances a logical clock by one second and stamps the touched
/// record with it, so `last_edited` values are strictly increasing.
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    patches: AtomicUsize,
    creates: AtomicUsize,
    gets: AtomicUsize,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let epoch = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            state: Mutex::new(RemoteState {
                nodes: BTreeMap::new(),
                clock: epoch,
                next_id: 1,
                failing_patches: BTreeSet::new(),
                failing_gets: BTreeSet::new(),
            }),
            patches: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current value of the logical clock
    pub fn now(&self) -> DateTime<Utc> {
        self.lock().clock
    }

    /// Insert a record directly, bypassing the call counters
    pub fn insert(&self, title: &str, parent: Option<&NodeId>) -> NodeId {
        let mut state = self.lock();
        let id = NodeId::new(format!("n{}", state.next_id));
        state.next_id += 1;
        let at = state.tick();
        state.nodes.insert(
            id.clone(),
            RemoteNode {
                id: id.clone(),
                title: title.to_string(),
                parent: parent.cloned(),
                created_time: at,
                last_edited: at,
                url: Some(format!("https://remote.test/{}", id)),
                properties: PropertyMap::new(),
                archived: false,
            },
        );
        id
    }

    pub fn node(&self, id: &NodeId) -> Option<RemoteNode> {
        self.lock().nodes.get(id).cloned()
    }

    pub fn nodes(&self) -> Vec<RemoteNode> {
        self.lock().nodes.values().cloned().collect()
    }

    fn edit(&self, id: &NodeId, f: impl FnOnce(&mut RemoteNode)) {
        let mut state = self.lock();
        let at = state.tick();
        if let Some(node) = state.nodes.get_mut(id) {
            f(node);
            node.last_edited = at;
        }
    }

    pub fn set_title(&self, id: &NodeId, title: &str) {
        self.edit(id, |node| node.title = title.to_string());
    }

    pub fn set_parent(&self, id: &NodeId, parent: Option<&NodeId>) {
        self.edit(id, |node| node.parent = parent.cloned());
    }

    pub fn archive(&self, id: &NodeId) {
        self.edit(id, |node| node.archived = true);
    }

    pub fn set_canvas(&self, id: &NodeId, enabled: bool) {
        self.edit(id, |node| {
            node.properties.insert(Field::Canvas, PropertyValue::Flag(enabled));
        });
    }

    /// Make every `patch_properties` call for `id` fail with a transient error
    pub fn fail_patches_for(&self, id: &NodeId) {
        self.lock().failing_patches.insert(id.clone());
    }

    /// Make every `get_by_id` call for `id` fail with a transient error
    pub fn fail_gets_for(&self, id: &NodeId) {
        self.lock().failing_gets.insert(id.clone());
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_patches.clear();
        state.failing_gets.clear();
    }

    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn list_all(&self, include_archived: bool) -> Result<Vec<RemoteNode>> {
        Ok(self
            .lock()
            .nodes
            .values()
            .filter(|node| include_archived || !node.archived)
            .cloned()
            .collect())
    }

    async fn list_modified_after(&self, ts: DateTime<Utc>) -> Result<Vec<RemoteNode>> {
        Ok(self
            .lock()
            .nodes
            .values()
            .filter(|node| node.last_edited > ts)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: &NodeId) -> Result<Option<RemoteNode>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        if state.failing_gets.contains(id) {
            return Err(RemoteError::Transient(format!("get {} failed", id)));
        }
        Ok(state.nodes.get(id).cloned())
    }

    async fn create(&self, node: NewNode) -> Result<RemoteNode> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if let Some(parent) = &node.parent {
            if !state.nodes.contains_key(parent) {
                return Err(RemoteError::Rejected(format!("unknown parent {}", parent)));
            }
        }
        let id = NodeId::new(format!("n{}", state.next_id));
        state.next_id += 1;
        let at = state.tick();
        let created = RemoteNode {
            id: id.clone(),
            title: node.title,
            parent: node.parent,
            created_time: at,
            last_edited: at,
            url: Some(format!("https://remote.test/{}", id)),
            properties: node.properties,
            archived: false,
        };
        state.nodes.insert(id, created.clone());
        Ok(created)
    }

    async fn patch_properties(&self, id: &NodeId, properties: PropertyMap) -> Result<()> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.failing_patches.contains(id) {
            return Err(RemoteError::Transient(format!("patch {} failed", id)));
        }
        let at = state.tick();
        let node = state.node_mut(id)?;
        node.properties.extend(properties);
        node.last_edited = at;
        Ok(())
    }
}
