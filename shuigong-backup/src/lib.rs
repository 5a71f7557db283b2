//! Shuigong backup engine
//!
//! Snapshots the construction-log database, its configuration and the image
//! and video trees into a single zip archive, restores them back, and keeps
//! the number of archives on disk bounded.

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod fs;
pub mod retention;
pub mod service;
pub mod sources;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use archive::{ArchiveReader, ArchiveWriter, BackupMetadata, BackupType, Component};
pub use config::Config;
pub use coordinator::{
    should_auto_backup, BackupCoordinator, BackupSettings, RestoreCoordinator, RestoreRecord,
    StatusSnapshot, SyncState, SyncStatus,
};
pub use retention::{BackupRecord, RetentionPolicy};
pub use service::{AutoBackupSettings, BackupService};
pub use sources::DataSources;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
