//! Backup and restore coordinators.
//!
//! Both coordinators run archive I/O on tokio's blocking pool and publish
//! progress through a shared [`SyncStatus`]. Coordinators built over the same
//! status exclude each other: while one operation runs, every other caller
//! gets [`BackupError::OperationInProgress`](crate::BackupError) immediately.

pub mod backup;
pub mod restore;
pub mod status;

pub use backup::{should_auto_backup, should_auto_backup_at, BackupCoordinator, BackupSettings};
pub use restore::{RestoreCoordinator, RestoreRecord};
pub use status::{OperationGuard, StatusSnapshot, SyncState, SyncStatus};
