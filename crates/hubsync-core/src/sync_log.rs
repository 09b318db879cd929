//! Persisted sync log.
//!
//! Records, per remote node, where its document lives locally and what the remote
//! looked like when it was last written. Stored at `.sync/sync_log.json` within
//! the vault and replaced atomically on commit.

use crate::content_hash::ContentHash;
use crate::error::{Result, SyncError};
use crate::fs::{FileSystem, FsError};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_LOG_PATH: &str = ".sync/sync_log.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub parent_id: Option<NodeId>,
    /// Remote `last_edited` as of the last write (after bookkeeping patches)
    pub last_edited: DateTime<Utc>,
    /// Vault-relative document path
    pub path: String,
    /// Fingerprint of the document body as last written
    pub fingerprint: ContentHash,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    /// Lower bound for incremental change queries; `None` before the first pull
    pub watermark: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_full_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: BTreeMap<NodeId, SyncLogEntry>,
}

impl SyncLog {
    pub fn get(&self, id: &NodeId) -> Option<&SyncLogEntry> {
        self.entries.get(id)
    }

    pub fn upsert(&mut self, id: NodeId, entry: SyncLogEntry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<SyncLogEntry> {
        self.entries.remove(id)
    }

    /// Reverse lookup from a document path
    pub fn id_for_path(&self, path: &str) -> Option<&NodeId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.path == path)
            .map(|(id, _)| id)
    }

    /// Rewrite every entry path under `old_dir/` to live under `new_dir/`.
    ///
    /// Returns the number of entries changed.
    pub fn rebase_prefix(&mut self, old_dir: &str, new_dir: &str) -> usize {
        let prefix = format!("{}/", old_dir);
        let mut changed = 0;
        for entry in self.entries.values_mut() {
            if let Some(rest) = entry.path.strip_prefix(&prefix) {
                entry.path = format!("{}/{}", new_dir, rest);
                changed += 1;
            }
        }
        changed
    }

    /// Update the fingerprint of whichever entry owns `path`
    pub fn refresh_fingerprint(&mut self, path: &str, fingerprint: ContentHash) {
        if let Some(entry) = self.entries.values_mut().find(|entry| entry.path == path) {
            entry.fingerprint = fingerprint;
        }
    }
}

/// Loads and atomically commits the sync log through a `FileSystem`.
pub struct SyncLogStore<'a, F: FileSystem> {
    fs: &'a F,
    path: &'a str,
}

impl<'a, F: FileSystem> SyncLogStore<'a, F> {
    pub fn new(fs: &'a F, path: &'a str) -> Self {
        Self { fs, path }
    }

    /// Load the log, or an empty one if none has been committed yet.
    ///
    /// A log that exists but cannot be decoded is an error: treating it as empty
    /// would silently re-bootstrap the whole vault.
    pub async fn load(&self) -> Result<SyncLog> {
        match self.fs.read(self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::Log(format!("{}: {}", self.path, e))),
            Err(FsError::NotFound(_)) => {
                debug!("No sync log at {}, starting empty", self.path);
                Ok(SyncLog::default())
            }
            Err(e) => Err(SyncError::Log(format!("{}: {}", self.path, e))),
        }
    }

    /// Persist the log. Skips the write when the file already holds the same bytes.
    ///
    /// Returns whether anything was written.
    pub async fn commit(&self, log: &SyncLog) -> Result<bool> {
        let content = serde_json::to_vec_pretty(log)
            .map_err(|e| SyncError::Log(format!("serialize: {}", e)))?;

        if let Ok(existing) = self.fs.read(self.path).await {
            if existing == content {
                debug!("Sync log unchanged, skipping commit");
                return Ok(false);
            }
        }

        self.atomic_write(&content)
            .await
            .map_err(|e| SyncError::Log(format!("{}: {}", self.path, e)))?;
        debug!("Committed sync log with {} entries", log.entries.len());
        Ok(true)
    }

    fn random_hex() -> String {
        let bytes: [u8; 8] = rand::rng().random();
        hex::encode(bytes)
    }

    /// Write to a temp file next to the target, then rename over it.
    async fn atomic_write(&self, content: &[u8]) -> std::result::Result<(), FsError> {
        let temp_path = format!("{}.{}.tmp", self.path, Self::random_hex());

        if let Err(e) = self.fs.write(&temp_path, content).await {
            let _ = self.fs.delete(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = self.fs.rename(&temp_path, self.path).await {
            let _ = self.fs.delete(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use chrono::TimeZone;

    fn entry(path: &str) -> SyncLogEntry {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        SyncLogEntry {
            parent_id: None,
            last_edited: at,
            path: path.to_string(),
            fingerprint: ContentHash::from_content(path),
            synced_at: at,
        }
    }

    #[tokio::test]
    async fn test_load_missing_log_is_empty() {
        let fs = InMemoryFs::new();
        let log = SyncLogStore::new(&fs, DEFAULT_LOG_PATH).load().await.unwrap();
        assert_eq!(log, SyncLog::default());
        assert!(log.watermark.is_none());
    }

    #[tokio::test]
    async fn test_commit_and_reload() {
        let fs = InMemoryFs::new();
        let store = SyncLogStore::new(&fs, DEFAULT_LOG_PATH);

        let mut log = SyncLog::default();
        log.watermark = Some(Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap());
        log.upsert(NodeId::new("a"), entry("A/A.md"));

        assert!(store.commit(&log).await.unwrap());
        assert_eq!(store.load().await.unwrap(), log);

        // Temp files are renamed away
        assert_eq!(fs.file_paths(), vec![DEFAULT_LOG_PATH.to_string()]);
    }

    #[tokio::test]
    async fn test_commit_skips_unchanged_log() {
        let fs = InMemoryFs::new();
        let store = SyncLogStore::new(&fs, DEFAULT_LOG_PATH);
        let mut log = SyncLog::default();
        log.upsert(NodeId::new("a"), entry("A/A.md"));

        store.commit(&log).await.unwrap();
        let before = fs.mutation_count();

        assert!(!store.commit(&log).await.unwrap());
        assert_eq!(fs.mutation_count(), before);
    }

    #[tokio::test]
    async fn test_corrupt_log_is_an_error() {
        let fs = InMemoryFs::new();
        fs.write(DEFAULT_LOG_PATH, b"{not json").await.unwrap();

        let err = SyncLogStore::new(&fs, DEFAULT_LOG_PATH)
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Log(_)));
        assert!(!err.is_node_scoped());
    }

    #[test]
    fn test_rebase_prefix_only_touches_subtree() {
        let mut log = SyncLog::default();
        log.upsert(NodeId::new("a"), entry("A/A.md"));
        log.upsert(NodeId::new("b"), entry("A/B/B.md"));
        log.upsert(NodeId::new("c"), entry("A/B/C/C.md"));
        log.upsert(NodeId::new("d"), entry("A/BB/BB.md"));

        assert_eq!(log.rebase_prefix("A/B", "X/B"), 2);

        assert_eq!(log.get(&NodeId::new("a")).unwrap().path, "A/A.md");
        assert_eq!(log.get(&NodeId::new("b")).unwrap().path, "X/B/B.md");
        assert_eq!(log.get(&NodeId::new("c")).unwrap().path, "X/B/C/C.md");
        assert_eq!(log.get(&NodeId::new("d")).unwrap().path, "A/BB/BB.md");
    }

    #[test]
    fn test_id_for_path() {
        let mut log = SyncLog::default();
        log.upsert(NodeId::new("a"), entry("A/A.md"));
        assert_eq!(log.id_for_path("A/A.md"), Some(&NodeId::new("a")));
        assert_eq!(log.id_for_path("B/B.md"), None);
    }
}
