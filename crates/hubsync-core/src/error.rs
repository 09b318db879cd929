//! Engine-level errors.

use crate::fs::FsError;
use crate::markdown::CodecError;
use crate::node::NodeId;
use crate::remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    /// Broken relation data (cycle, runaway depth) for one node
    #[error("Data integrity error for {id}: {reason}")]
    DataIntegrity { id: NodeId, reason: String },

    /// Destination occupied by a document that belongs to another record
    #[error("Conflict at {path}: {reason}")]
    Conflict { path: String, reason: String },

    /// An ancestor failed earlier in the run, so this node's path is not trustworthy
    #[error("Skipped {id}: ancestor {ancestor} failed")]
    AncestorFailed { id: NodeId, ancestor: NodeId },

    #[error("Sync log error: {0}")]
    Log(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl SyncError {
    /// Whether this error only affects the node being processed.
    ///
    /// A corrupt or unwritable sync log aborts the whole run.
    pub fn is_node_scoped(&self) -> bool {
        !matches!(self, SyncError::Log(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_scoped_classification() {
        assert!(SyncError::Remote(RemoteError::Transient("timeout".into())).is_node_scoped());
        assert!(
            SyncError::DataIntegrity {
                id: NodeId::new("a"),
                reason: "cycle".into()
            }
            .is_node_scoped()
        );
        assert!(
            SyncError::AncestorFailed {
                id: NodeId::new("b"),
                ancestor: NodeId::new("a")
            }
            .is_node_scoped()
        );
        assert!(!SyncError::Log("corrupt".into()).is_node_scoped());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Conflict {
            path: "A/A.md".into(),
            reason: "occupied by b".into(),
        };
        assert_eq!(err.to_string(), "Conflict at A/A.md: occupied by b");
    }
}
