use crate::sync_log::DEFAULT_LOG_PATH;
use chrono::Duration;

/// Tunables for a sync engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Vault-relative location of the sync log
    pub log_path: String,
    /// Document extension, without the dot
    pub extension: String,
    /// How often a pull re-verifies every live node even when nothing changed
    pub hygiene_interval: Duration,
    /// Status written to records after a successful sync
    pub status_complete: String,
    /// Status given to records created by seeding
    pub status_new: String,
    /// Label of the generated link back to the remote record
    pub remote_link_label: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            log_path: DEFAULT_LOG_PATH.to_string(),
            extension: "md".to_string(),
            hygiene_interval: Duration::hours(24),
            status_complete: "Sync Complete".to_string(),
            status_new: "Not Synced".to_string(),
            remote_link_label: "Open in Notion".to_string(),
        }
    }
}
