//! Restore orchestration.
//!
//! Entries are applied in archive order. A failing entry aborts the restore;
//! files written before it stay in place and the error lists the components
//! that were already restored.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status::{OperationGuard, SyncState, SyncStatus};
use crate::archive::{
    ArchiveEntry, ArchiveReader, BackupMetadata, Component, EntryKind, MediaKind, IMAGES_PREFIX,
    VIDEOS_PREFIX,
};
use crate::sources::DataSources;
use crate::utils::errors::{BackupError, Result};

/// Outcome of a successful restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreRecord {
    pub backup_file_name: String,
    /// Milliseconds since the Unix epoch
    pub restored_at: i64,
    pub restored_components: BTreeSet<Component>,
    pub source_metadata: BackupMetadata,
}

#[derive(Clone)]
pub struct RestoreCoordinator {
    sources: Arc<DataSources>,
    status: SyncStatus,
}

impl RestoreCoordinator {
    pub fn new(sources: DataSources, status: SyncStatus) -> Self {
        Self {
            sources: Arc::new(sources),
            status,
        }
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub async fn restore_backup(&self, path: &Path) -> Result<RestoreRecord> {
        self.restore_backup_with_cancel(path, CancellationToken::new()).await
    }

    pub async fn restore_backup_with_cancel(&self, path: &Path, cancel: CancellationToken) -> Result<RestoreRecord> {
        self.status.ensure_available()?;
        if !path.is_file() {
            return Err(BackupError::ArchiveNotFound(path.to_path_buf()));
        }

        let guard = self.status.try_begin(SyncState::Restoring)?;
        let sources = Arc::clone(&self.sources);
        let path = path.to_path_buf();

        let handle = tokio::task::spawn_blocking(move || {
            let result = run_restore(&sources, &path, &guard, &cancel);
            match &result {
                Ok(_) => guard.complete(),
                Err(_) => guard.fail(),
            }
            result
        });

        handle
            .await
            .map_err(|e| BackupError::read_failure("restore worker", e))?
    }
}

/// Per-restore bookkeeping for progress and restored components.
struct RestoreProgress<'a> {
    guard: &'a OperationGuard,
    restored: BTreeSet<Component>,
    image_total: usize,
    video_total: usize,
    images_done: usize,
    videos_done: usize,
}

impl RestoreProgress<'_> {
    fn media_done(&mut self, kind: MediaKind) {
        self.restored.insert(kind.component());
        match kind {
            MediaKind::Images => {
                self.images_done += 1;
                self.guard.advance_between(50, 80, self.images_done, self.image_total);
            }
            MediaKind::Videos => {
                self.videos_done += 1;
                self.guard.advance_between(80, 90, self.videos_done, self.video_total);
            }
        }
    }

    fn abort(&self, source: BackupError) -> BackupError {
        BackupError::PartialRestoreFailure {
            restored: self.restored.clone(),
            source: Box::new(source),
        }
    }
}

fn run_restore(
    sources: &DataSources,
    path: &Path,
    guard: &OperationGuard,
    cancel: &CancellationToken,
) -> Result<RestoreRecord> {
    info!("Restoring backup {}", path.display());

    let mut reader = ArchiveReader::open(path)?;
    let source_metadata = reader.metadata().clone();
    guard.advance(10);

    let mut progress = RestoreProgress {
        guard,
        restored: BTreeSet::new(),
        image_total: reader.count_with_prefix(IMAGES_PREFIX),
        video_total: reader.count_with_prefix(VIDEOS_PREFIX),
        images_done: 0,
        videos_done: 0,
    };

    loop {
        if cancel.is_cancelled() {
            info!("Restore cancelled");
            return Err(progress.abort(BackupError::Cancelled));
        }

        let mut entry = match reader.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => return Err(progress.abort(e)),
        };

        if let Err(e) = restore_entry(sources, &mut entry, &mut progress) {
            warn!("Restore of {} failed: {}", entry.name, e);
            return Err(progress.abort(e));
        }
    }
    guard.advance(90);

    let backup_file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    info!(
        "Restore of {} completed: [{}]",
        backup_file_name,
        progress.restored.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
    );

    Ok(RestoreRecord {
        backup_file_name,
        restored_at: Utc::now().timestamp_millis(),
        restored_components: progress.restored,
        source_metadata,
    })
}

fn restore_entry(sources: &DataSources, entry: &mut ArchiveEntry<'_>, progress: &mut RestoreProgress<'_>) -> Result<()> {
    let name = entry.name.clone();
    match entry.kind.clone() {
        EntryKind::Metadata => {}
        EntryKind::Database => {
            let written = sources
                .database
                .write_snapshot(entry)
                .map_err(|e| BackupError::read_failure(name, e))?;
            debug!("Restored database ({} bytes)", written);
            progress.restored.insert(Component::Database);
            progress.guard.advance(40);
        }
        EntryKind::Config => {
            let mut payload = Vec::with_capacity(entry.size as usize);
            entry
                .read_to_end(&mut payload)
                .map_err(|e| BackupError::read_failure(name.clone(), e))?;

            match serde_json::from_slice::<serde_json::Value>(&payload) {
                Ok(_) => {
                    sources
                        .config
                        .write_snapshot(&payload)
                        .map_err(|e| BackupError::read_failure(name, e))?;
                    progress.restored.insert(Component::Config);
                }
                Err(e) => warn!("Skipping unparseable {}: {}", name, e),
            }
            progress.guard.advance(50);
        }
        EntryKind::Media(kind, relative_path) => {
            sources
                .media(kind)
                .restore_file(&relative_path, entry)
                .map_err(|e| BackupError::read_failure(name, e))?;
            progress.media_done(kind);
        }
    }
    Ok(())
}
