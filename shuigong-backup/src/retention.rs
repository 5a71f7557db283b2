//! Archive naming, listing and retention.
//!
//! The backup directory is the only source of truth: records are rebuilt by
//! scanning it and reading each archive's metadata entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::{read_metadata, BackupMetadata};
use crate::utils::errors::{BackupError, Result};

pub const BACKUP_PREFIX: &str = "shuigong_backup_";
pub const BACKUP_EXTENSION: &str = ".zip";
pub const DEFAULT_MAX_BACKUPS: usize = 10;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

/// A backup found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub file_name: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    /// Milliseconds since the Unix epoch, from the archive metadata
    pub created_at: i64,
    pub metadata: BackupMetadata,
}

impl BackupRecord {
    /// Build a record by reading the archive's metadata entry.
    pub fn from_archive(path: &Path) -> Result<Self> {
        let metadata = read_metadata(path)?;
        let size_bytes = fs::metadata(path)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            file_name,
            file_path: path.to_path_buf(),
            size_bytes,
            created_at: metadata.timestamp,
            metadata,
        })
    }
}

/// `shuigong_backup_<yyyyMMdd_HHmmss>.zip`, with `_<n>` appended for the
/// `n`-th archive created within the same second.
pub fn backup_file_name(at: &DateTime<Local>, collision: usize) -> String {
    let stamp = at.format(STAMP_FORMAT);
    if collision == 0 {
        format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_EXTENSION)
    } else {
        format!("{}{}_{}{}", BACKUP_PREFIX, stamp, collision, BACKUP_EXTENSION)
    }
}

/// Local wall-clock time encoded in a backup file name, or `None` if the
/// name does not follow the convention. The time is not resolved against the
/// current time zone, so names that fall in a DST gap still parse.
pub fn parse_backup_file_name(name: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_EXTENSION)?;
    if rest.len() < STAMP_LEN || !rest.is_char_boundary(STAMP_LEN) {
        return None;
    }

    let (stamp, suffix) = rest.split_at(STAMP_LEN);
    if !suffix.is_empty() {
        let counter = suffix.strip_prefix('_')?;
        if counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}

/// Keeps the number of archives in a directory bounded.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    backup_dir: PathBuf,
    max_backups: usize,
}

impl RetentionPolicy {
    pub fn new(backup_dir: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            max_backups,
        }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Files following the naming convention, newest modification first.
    pub fn candidates(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<(PathBuf, String, SystemTime)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                parse_backup_file_name(&name)?;
                let modified = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some((e.path(), name, modified))
            })
            .collect();

        files.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.1.cmp(&a.1)));

        Ok(files.into_iter().map(|(path, _, _)| path).collect())
    }

    /// Delete every archive beyond the newest `max_backups`. Individual
    /// deletion failures are logged and skipped. Returns the deleted paths.
    pub fn prune(&self) -> Vec<PathBuf> {
        self.prune_protecting(None)
    }

    /// Like [`prune`](Self::prune), but `keep` is never deleted and counts
    /// toward the limit.
    pub fn prune_except(&self, keep: &Path) -> Vec<PathBuf> {
        self.prune_protecting(Some(keep))
    }

    fn prune_protecting(&self, keep: Option<&Path>) -> Vec<PathBuf> {
        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Failed to scan {} for pruning: {}", self.backup_dir.display(), e);
                return Vec::new();
            }
        };

        let before = candidates.len();
        let others: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|path| Some(path.as_path()) != keep)
            .collect();
        let slots = if others.len() < before {
            self.max_backups.saturating_sub(1)
        } else {
            self.max_backups
        };

        let mut deleted = Vec::new();
        for old in others.into_iter().skip(slots) {
            match fs::remove_file(&old) {
                Ok(()) => {
                    info!("Removed old backup: {}", old.display());
                    deleted.push(old);
                }
                Err(e) => warn!("Failed to remove old backup {}: {}", old.display(), e),
            }
        }

        if !deleted.is_empty() {
            debug!(deleted = deleted.len(), keep = self.max_backups, "Retention applied");
        }
        deleted
    }

    /// Readable archives, newest first. Corrupt or unreadable archives are
    /// logged and left out.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let mut records: Vec<_> = self
            .candidates()?
            .into_iter()
            .filter_map(|path| match BackupRecord::from_archive(&path) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable backup {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(records)
    }

    /// Delete one archive. Only files named by convention directly inside the
    /// backup directory can be deleted.
    pub fn delete_backup(&self, record: &BackupRecord) -> Result<()> {
        let path = self.backup_dir.join(&record.file_name);
        let in_dir = Path::new(&record.file_name).file_name().map(|n| n == record.file_name.as_str());
        if in_dir != Some(true) || parse_backup_file_name(&record.file_name).is_none() || !path.is_file() {
            return Err(BackupError::ArchiveNotFound(path));
        }

        fs::remove_file(&path)?;
        info!("Deleted backup: {}", record.file_name);
        Ok(())
    }
}
