//! Full backup orchestration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status::{OperationGuard, SyncState, SyncStatus};
use crate::archive::{
    ArchiveWriter, BackupMetadata, Component, MediaKind, CONFIG_ENTRY, DATABASE_ENTRY,
};
use crate::retention::{backup_file_name, BackupRecord, RetentionPolicy};
use crate::sources::DataSources;
use crate::utils::errors::{BackupError, Result};
use crate::utils::format::{format_bytes, format_duration};

const MS_PER_DAY: i64 = 86_400_000;

/// Give up on finding a free archive name after this many same-second
/// collisions.
const MAX_NAME_COLLISIONS: usize = 100;

/// Settings that shape a backup.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Written into the metadata `version` field
    pub app_version: String,
    pub max_backups: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            max_backups: crate::retention::DEFAULT_MAX_BACKUPS,
        }
    }
}

/// `enabled && now - last_backup >= interval_days` days, all in epoch-ms.
pub fn should_auto_backup_at(last_backup_ms: i64, interval_days: u32, enabled: bool, now_ms: i64) -> bool {
    enabled && now_ms.saturating_sub(last_backup_ms) >= i64::from(interval_days) * MS_PER_DAY
}

/// [`should_auto_backup_at`] against the current clock.
pub fn should_auto_backup(last_backup_ms: i64, interval_days: u32, enabled: bool) -> bool {
    should_auto_backup_at(last_backup_ms, interval_days, enabled, Utc::now().timestamp_millis())
}

struct BackupContext {
    sources: DataSources,
    settings: BackupSettings,
}

/// Creates full backups on the blocking pool. Cloning is cheap; clones share
/// the same status.
#[derive(Clone)]
pub struct BackupCoordinator {
    ctx: Arc<BackupContext>,
    status: SyncStatus,
}

impl BackupCoordinator {
    pub fn new(sources: DataSources, settings: BackupSettings, status: SyncStatus) -> Self {
        Self {
            ctx: Arc::new(BackupContext { sources, settings }),
            status,
        }
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.ctx.sources.backup_dir.root_path(), self.ctx.settings.max_backups)
    }

    pub async fn create_full_backup(&self) -> Result<BackupRecord> {
        self.create_full_backup_with_cancel(CancellationToken::new()).await
    }

    /// Like [`create_full_backup`](Self::create_full_backup); `cancel` is
    /// checked before each entry.
    pub async fn create_full_backup_with_cancel(&self, cancel: CancellationToken) -> Result<BackupRecord> {
        let guard = self.status.try_begin(SyncState::BackingUp)?;
        let ctx = Arc::clone(&self.ctx);

        let handle = tokio::task::spawn_blocking(move || {
            let result = run_full_backup(&ctx, &guard, &cancel);
            match &result {
                Ok(_) => guard.complete(),
                Err(_) => guard.fail(),
            }
            result
        });

        handle
            .await
            .map_err(|e| BackupError::write_failure("backup worker", e))?
    }

    /// Evaluate the auto-backup predicate against the stored last-backup time.
    pub fn should_auto_backup(&self, interval_days: u32, enabled: bool) -> bool {
        should_auto_backup(self.ctx.sources.last_backup.get(), interval_days, enabled)
    }
}

fn run_full_backup(ctx: &BackupContext, guard: &OperationGuard, cancel: &CancellationToken) -> Result<BackupRecord> {
    let start_time = Instant::now();
    let sources = &ctx.sources;
    let backup_dir = sources.backup_dir.root_path();
    info!("Starting full backup into {}", backup_dir.display());

    fs::create_dir_all(&backup_dir)
        .map_err(|e| BackupError::write_failure(format!("create {}", backup_dir.display()), e))?;

    // Probe both snapshots before the metadata is written so the include
    // flags describe what the archive actually holds.
    let database = sources
        .database
        .read_snapshot()
        .map_err(|e| BackupError::unavailable(Component::Database, e))?;
    if database.is_none() {
        warn!("No database snapshot available, backing up without it");
    }
    let config = sources
        .config
        .read_snapshot()
        .map_err(|e| BackupError::unavailable(Component::Config, e))?;
    if config.is_none() {
        warn!("No config snapshot available, backing up without it");
    }

    let now = Local::now();
    let mut metadata = BackupMetadata::full(
        ctx.settings.app_version.clone(),
        now.timestamp_millis(),
        sources.device.describe(),
    );
    metadata.include_database = database.is_some();
    metadata.include_config = config.is_some();

    let mut writer = ArchiveWriter::create_in(&backup_dir)?;
    writer.write_metadata(&metadata)?;
    guard.advance(10);

    if let Some(mut snapshot) = database {
        check_cancelled(cancel)?;
        let size_hint = snapshot.size_hint();
        writer.write_entry(DATABASE_ENTRY, &mut snapshot.reader, size_hint)?;
    }
    guard.advance(30);

    if let Some(mut snapshot) = config {
        check_cancelled(cancel)?;
        let size_hint = snapshot.size_hint();
        writer.write_entry(CONFIG_ENTRY, &mut snapshot.reader, size_hint)?;
    }
    guard.advance(40);

    let images = write_media(ctx, &mut writer, MediaKind::Images, guard, (40, 70), cancel)?;
    let videos = write_media(ctx, &mut writer, MediaKind::Videos, guard, (70, 90), cancel)?;

    let target = finish_archive(writer, &backup_dir, &now)?;
    let record = BackupRecord::from_archive(&target)?;

    let pruned = RetentionPolicy::new(&backup_dir, ctx.settings.max_backups).prune_except(&target);
    if !pruned.is_empty() {
        info!("Pruned {} old backup(s)", pruned.len());
    }

    if let Err(e) = sources.last_backup.set(metadata.timestamp) {
        warn!("Failed to record last backup time: {}", e);
    }

    info!(
        "Backup completed: {} ({}, {} images, {} videos) in {}",
        record.file_name,
        format_bytes(record.size_bytes),
        images,
        videos,
        format_duration(start_time.elapsed())
    );
    Ok(record)
}

/// Stream one media tree into the archive. Returns the number of files
/// written.
fn write_media(
    ctx: &BackupContext,
    writer: &mut ArchiveWriter,
    kind: MediaKind,
    guard: &OperationGuard,
    (from, to): (u8, u8),
    cancel: &CancellationToken,
) -> Result<usize> {
    let source = ctx.sources.media(kind);
    let files = source
        .enumerate_files()
        .map_err(|e| BackupError::unavailable(kind.component(), e))?;
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    debug!("Scanned {} ({} files, {})", source.root_path().display(), files.len(), format_bytes(total_bytes));

    let mut written = 0;
    let mut skipped = 0;
    for (index, file) in files.iter().enumerate() {
        check_cancelled(cancel)?;

        let Some(name) = kind.entry_name(&file.relative_path) else {
            warn!("Skipping {}: file name is not valid UTF-8", file.path.display());
            skipped += 1;
            continue;
        };
        let mut content = source
            .open(file)
            .map_err(|e| BackupError::unavailable(kind.component(), e))?;
        writer.write_entry(&name, &mut content, file.size)?;
        written += 1;
        guard.advance_between(from, to, index + 1, files.len());
    }

    if skipped > 0 {
        warn!("Skipped {} {} file(s) with non UTF-8 names", skipped, kind.component());
    }
    guard.advance(to);
    Ok(written)
}

fn finish_archive(writer: ArchiveWriter, backup_dir: &Path, now: &DateTime<Local>) -> Result<PathBuf> {
    let collision = (0..MAX_NAME_COLLISIONS)
        .find(|n| !backup_dir.join(backup_file_name(now, *n)).exists())
        .ok_or_else(|| BackupError::write_failure("name archive", "too many backups within one second"))?;

    writer.finish(&backup_dir.join(backup_file_name(now, collision)))
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        info!("Backup cancelled");
        return Err(BackupError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::StatusSnapshot;
    use crate::test_support::{archive_count, Fixture};

    #[test]
    fn test_should_auto_backup() {
        let now = 10 * MS_PER_DAY;
        assert!(should_auto_backup_at(0, 1, true, now));
        assert!(!should_auto_backup_at(0, 1, false, now));
        assert!(should_auto_backup_at(now - MS_PER_DAY, 1, true, now));
        assert!(!should_auto_backup_at(now - MS_PER_DAY + 1, 1, true, now));
        assert!(should_auto_backup_at(now, 0, true, now));
        assert!(!should_auto_backup_at(now - 6 * MS_PER_DAY, 7, true, now));
    }

    #[tokio::test]
    async fn test_full_backup_record_and_metadata() {
        let fixture = Fixture::new();
        fixture.seed_database(b"SQLite format 3\0rows");
        fixture.seed_config(br#"{"theme":"dark"}"#);
        fixture.seed_image("2024-01-01/a.jpg", 10 * 1024);
        fixture.seed_video("site.mp4", 2048);

        let coordinator = fixture.backup_coordinator();
        let record = coordinator.create_full_backup().await.unwrap();

        assert!(record.file_name.starts_with("shuigong_backup_"));
        assert!(record.file_path.exists());
        assert!(record.metadata.include_database);
        assert!(record.metadata.include_config);
        assert_eq!(record.metadata.device_info.get("model").map(String::as_str), Some("test-device"));
        assert_eq!(coordinator.status().state(), SyncState::Idle);
        assert_eq!(coordinator.status().progress(), 100);
        assert_eq!(fixture.last_backup(), record.created_at);
        assert!(!coordinator.should_auto_backup(1, true));
    }

    #[tokio::test]
    async fn test_missing_database_is_recorded() {
        let fixture = Fixture::new();
        fixture.seed_config(b"{}");

        let record = fixture.backup_coordinator().create_full_backup().await.unwrap();
        assert!(!record.metadata.include_database);
        assert!(record.metadata.include_config);
    }

    #[tokio::test]
    async fn test_failing_image_leaves_no_archive() {
        let fixture = Fixture::new();
        fixture.seed_database(b"db");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            fixture.seed_image(name, 1024);
        }

        let coordinator = fixture.backup_coordinator_failing_image(1);
        let err = coordinator.create_full_backup().await.unwrap_err();

        assert!(matches!(err, BackupError::ArchiveWriteFailure { .. }));
        assert_eq!(coordinator.status().state(), SyncState::Failed);
        assert_eq!(archive_count(&fixture.backup_dir()), 0);
        assert_eq!(std::fs::read_dir(fixture.backup_dir()).unwrap().count(), 0);
        assert_eq!(fixture.last_backup(), 0);

        // Failed is advisory; the next attempt runs normally.
        let healthy = fixture.backup_coordinator();
        healthy.create_full_backup().await.unwrap();
        assert_eq!(archive_count(&fixture.backup_dir()), 1);
    }

    #[tokio::test]
    async fn test_concurrent_backup_is_rejected() {
        let fixture = Fixture::new();
        let (coordinator, gate) = fixture.backup_coordinator_gated();

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.create_full_backup().await })
        };

        let mut rx = coordinator.status().subscribe();
        rx.wait_for(|s| s.state == SyncState::BackingUp).await.unwrap();

        let err = coordinator.create_full_backup().await.unwrap_err();
        assert!(matches!(err, BackupError::OperationInProgress { current: SyncState::BackingUp }));

        gate.send(()).unwrap();
        let record = first.await.unwrap().unwrap();
        assert!(record.file_path.exists());
        assert_eq!(archive_count(&fixture.backup_dir()), 1);
        assert_eq!(coordinator.status().state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_backup_cleans_up() {
        let fixture = Fixture::new();
        fixture.seed_database(b"db");
        fixture.seed_image("a.jpg", 16);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let coordinator = fixture.backup_coordinator();
        let err = coordinator.create_full_backup_with_cancel(cancel).await.unwrap_err();

        assert!(matches!(err, BackupError::Cancelled));
        assert_eq!(std::fs::read_dir(fixture.backup_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_backup_prunes_old_archives() {
        let fixture = Fixture::new();
        fixture.seed_database(b"db");
        let coordinator = fixture.backup_coordinator_with_max(2);

        for _ in 0..3 {
            coordinator.create_full_backup().await.unwrap();
        }

        assert_eq!(archive_count(&fixture.backup_dir()), 2);
    }

    #[tokio::test]
    async fn test_new_archive_survives_zero_limit() {
        let fixture = Fixture::new();
        fixture.seed_database(b"db");
        let coordinator = fixture.backup_coordinator_with_max(0);

        coordinator.create_full_backup().await.unwrap();
        let record = coordinator.create_full_backup().await.unwrap();

        assert!(record.file_path.exists());
        assert_eq!(archive_count(&fixture.backup_dir()), 1);
    }

    #[tokio::test]
    async fn test_database_of_unknown_length_round_trips() {
        let fixture = Fixture::new();
        let db_bytes: Vec<u8> = (0..100_000u32).map(|i| (i % 13) as u8).collect();

        let record = fixture
            .backup_coordinator_streaming_database(&db_bytes)
            .create_full_backup()
            .await
            .unwrap();
        assert!(record.metadata.include_database);

        let target = Fixture::new();
        target.restore_coordinator().restore_backup(&record.file_path).await.unwrap();
        assert_eq!(target.read_database(), db_bytes);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_media_names_are_skipped() {
        use crate::archive::ArchiveReader;
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fixture = Fixture::new();
        fixture.seed_image("ok.jpg", 64);
        for raw in [&b"a\xff.jpg"[..], &b"a\xfe.jpg"[..]] {
            std::fs::write(fixture.images_root().join(OsStr::from_bytes(raw)), b"odd").unwrap();
        }

        let record = fixture.backup_coordinator().create_full_backup().await.unwrap();

        let mut reader = ArchiveReader::open(&record.file_path).unwrap();
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            names.push(entry.name.clone());
        }
        assert_eq!(names, vec!["backup_metadata.json", "images/ok.jpg"]);
    }

    #[tokio::test]
    async fn test_progress_never_goes_down() {
        let fixture = Fixture::new();
        fixture.seed_config(b"{}");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            fixture.seed_image(name, 256);
        }
        fixture.seed_video("site.mp4", 256);

        let (coordinator, gate) = fixture.backup_coordinator_gated();
        let mut rx = coordinator.status().subscribe();
        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.create_full_backup().await })
        };

        rx.wait_for(|s| s.state == SyncState::BackingUp).await.unwrap();
        let mut seen = vec![*rx.borrow_and_update()];
        gate.send(()).unwrap();
        while seen.last().is_some_and(|s| s.state.is_busy()) {
            rx.changed().await.unwrap();
            seen.push(*rx.borrow_and_update());
        }
        run.await.unwrap().unwrap();

        assert_eq!(seen[0].progress, 0);
        assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress), "{seen:?}");
        assert_eq!(seen.last(), Some(&StatusSnapshot { state: SyncState::Idle, progress: 100 }));
    }
}
