//! hubsync-core: incremental two-way sync between a markdown vault and a remote
//! record tree.
//!
//! This crate provides:
//! - Change detection against a watermark, with periodic full scans
//! - Resolution of remote parent links into vault paths
//! - File and folder moves with wiki-link rewriting
//! - Document rendering, canvas companions and hub navigation
//! - Pushing local documents and seeding trees from outlines
//! - FileSystem and RemoteStore trait abstractions with in-memory fakes

pub mod canvas;
pub mod content_hash;
pub mod deletion;
pub mod delta;
pub mod engine;
pub mod error;
pub mod events;
pub mod fs;
pub mod markdown;
pub mod materialize;
pub mod moves;
pub mod navigation;
pub mod node;
pub mod options;
pub mod paths;
pub mod push;
pub mod remote;
pub mod seed;
pub mod sync_log;
pub mod tree;

pub use content_hash::ContentHash;
pub use engine::{Direction, PullReport, SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use events::{EventBus, Subscription, SyncEvent};
pub use fs::{FileEntry, FileSystem, FsError, InMemoryFs};
pub use node::{Field, NewNode, NodeId, PropertyMap, PropertyValue, RemoteNode};
pub use options::SyncOptions;
pub use push::PushReport;
pub use remote::{InMemoryRemote, RemoteError, RemoteStore};
pub use seed::{SeedNode, SeedPayload, SeedReport};
pub use sync_log::{SyncLog, SyncLogEntry};
