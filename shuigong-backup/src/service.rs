//! Caller-facing entry point bundling both coordinators.

use std::path::Path;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::{
    BackupCoordinator, BackupSettings, RestoreCoordinator, RestoreRecord, StatusSnapshot, SyncStatus,
};
use crate::retention::{BackupRecord, RetentionPolicy};
use crate::sources::DataSources;
use crate::utils::errors::{BackupError, Result};

/// Auto-backup schedule.
#[derive(Debug, Clone, Copy)]
pub struct AutoBackupSettings {
    pub enabled: bool,
    pub interval_days: u32,
}

impl Default for AutoBackupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_days: 1,
        }
    }
}

/// One backup engine per application. Backup and restore share a single
/// status, so at most one of them runs at a time.
#[derive(Clone)]
pub struct BackupService {
    backup: BackupCoordinator,
    restore: RestoreCoordinator,
    status: SyncStatus,
    auto: AutoBackupSettings,
}

impl BackupService {
    pub fn new(sources: DataSources, settings: BackupSettings, auto: AutoBackupSettings) -> Self {
        let status = SyncStatus::new();
        Self {
            backup: BackupCoordinator::new(sources.clone(), settings, status.clone()),
            restore: RestoreCoordinator::new(sources, status.clone()),
            status,
            auto,
        }
    }

    /// Service over the file-backed sources described by `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            DataSources::from_config(config),
            BackupSettings {
                app_version: config.backup.app_version.clone(),
                max_backups: config.backup.max_backups,
            },
            AutoBackupSettings {
                enabled: config.backup.auto_backup_enabled,
                interval_days: config.backup.auto_backup_interval_days,
            },
        )
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn current(&self) -> StatusSnapshot {
        self.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub async fn create_full_backup(&self) -> Result<BackupRecord> {
        self.backup.create_full_backup().await
    }

    pub async fn create_full_backup_with_cancel(&self, cancel: CancellationToken) -> Result<BackupRecord> {
        self.backup.create_full_backup_with_cancel(cancel).await
    }

    pub async fn restore_backup(&self, path: &Path) -> Result<RestoreRecord> {
        self.restore.restore_backup(path).await
    }

    pub async fn restore_backup_with_cancel(&self, path: &Path, cancel: CancellationToken) -> Result<RestoreRecord> {
        self.restore.restore_backup_with_cancel(path, cancel).await
    }

    /// Readable archives, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let retention = self.backup.retention();
        tokio::task::spawn_blocking(move || retention.list_backups())
            .await
            .map_err(|e| BackupError::read_failure("list backups", e))?
    }

    pub async fn delete_backup(&self, record: &BackupRecord) -> Result<()> {
        let retention = self.backup.retention();
        let record = record.clone();
        tokio::task::spawn_blocking(move || retention.delete_backup(&record))
            .await
            .map_err(|e| BackupError::write_failure("delete backup", e))?
    }

    /// Apply retention outside of a backup. Returns the number of archives
    /// removed.
    pub async fn prune(&self) -> Result<usize> {
        let retention: RetentionPolicy = self.backup.retention();
        tokio::task::spawn_blocking(move || retention.prune().len())
            .await
            .map_err(|e| BackupError::write_failure("prune backups", e))
    }

    /// Whether the configured schedule calls for a backup now.
    pub fn should_auto_backup(&self) -> bool {
        self.backup
            .should_auto_backup(self.auto.interval_days, self.auto.enabled)
    }
}
