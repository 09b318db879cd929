//! hubsync-cli library: native adapters and configuration behind the `hubsync` binary.
//!
//! Exposed as a library so integration tests can reach the adapters directly.

pub mod config;
pub mod native_fs;
pub mod notion;

pub use config::{Config, ConfigError, PropertyNames, RemoteConfig, VaultConfig};
pub use native_fs::NativeFs;
pub use notion::NotionRemote;
