//! Data sources the coordinators read snapshots from and restore into.
//!
//! The application plugs its own implementations in; [`files`] provides
//! file-backed ones used by the CLI and tests.

pub mod device;
pub mod files;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use device::HostDeviceDescriptor;
pub use files::{DirectoryMediaSource, FileConfigSource, FileDatabaseSource, FixedBackupDirectory, JsonTimestampStore};

/// Boxed snapshot stream handed to the archive writer.
pub type SnapshotReader = Box<dyn Read + Send>;

/// A snapshot stream and its length, if the source knows it.
pub struct Snapshot {
    pub reader: SnapshotReader,
    pub len: Option<u64>,
}

impl Snapshot {
    pub fn new(reader: impl Read + Send + 'static, len: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            len,
        }
    }

    /// Size hint for the archive writer. An unknown length counts as large
    /// so the entry always gets zip64 headers.
    pub fn size_hint(&self) -> u64 {
        self.len.unwrap_or(u64::MAX)
    }
}

/// Relational store snapshot.
pub trait DatabaseSource: Send + Sync {
    /// `Ok(None)` when there is no database to back up yet.
    fn read_snapshot(&self) -> io::Result<Option<Snapshot>>;

    /// Replace the live store with `snapshot`.
    fn write_snapshot(&self, snapshot: &mut dyn Read) -> io::Result<u64>;
}

/// Configuration blob (UTF-8 JSON).
pub trait ConfigSource: Send + Sync {
    fn read_snapshot(&self) -> io::Result<Option<Snapshot>>;

    /// Apply an already validated configuration payload.
    fn write_snapshot(&self, snapshot: &[u8]) -> io::Result<()>;
}

/// A file discovered under a media root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub size: u64,
}

/// One media tree (images or videos).
pub trait MediaSource: Send + Sync {
    fn root_path(&self) -> PathBuf;

    /// Every file under the root. A missing root yields an empty list.
    fn enumerate_files(&self) -> io::Result<Vec<MediaFile>>;

    fn open(&self, file: &MediaFile) -> io::Result<SnapshotReader> {
        Ok(Box::new(fs::File::open(&file.path)?))
    }

    /// Write `content` to `relative_path` under the root, creating parent
    /// directories as needed.
    fn restore_file(&self, relative_path: &Path, content: &mut dyn Read) -> io::Result<u64> {
        let target = self.root_path().join(relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&target)?;
        io::copy(content, &mut file)
    }
}

/// Where archives live.
pub trait BackupDirectory: Send + Sync {
    fn root_path(&self) -> PathBuf;
}

/// Persists the time of the last successful backup (epoch-ms).
pub trait LastBackupStore: Send + Sync {
    /// `0` when no backup was ever recorded.
    fn get(&self) -> i64;
    fn set(&self, timestamp: i64) -> io::Result<()>;
}

/// Opaque key/value description of the device, stored in archive metadata.
pub trait DeviceDescriptor: Send + Sync {
    fn describe(&self) -> BTreeMap<String, String>;
}

/// Everything the coordinators talk to.
#[derive(Clone)]
pub struct DataSources {
    pub database: Arc<dyn DatabaseSource>,
    pub config: Arc<dyn ConfigSource>,
    pub images: Arc<dyn MediaSource>,
    pub videos: Arc<dyn MediaSource>,
    pub backup_dir: Arc<dyn BackupDirectory>,
    pub last_backup: Arc<dyn LastBackupStore>,
    pub device: Arc<dyn DeviceDescriptor>,
}

impl DataSources {
    /// File-backed sources for the paths in `config`.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let sources = &config.sources;
        Self {
            database: Arc::new(FileDatabaseSource::new(&sources.database)),
            config: Arc::new(FileConfigSource::new(&sources.config)),
            images: Arc::new(DirectoryMediaSource::new(&sources.images)),
            videos: Arc::new(DirectoryMediaSource::new(&sources.videos)),
            backup_dir: Arc::new(FixedBackupDirectory::new(&config.backup.directory)),
            last_backup: Arc::new(JsonTimestampStore::new(&sources.last_backup_file)),
            device: Arc::new(HostDeviceDescriptor),
        }
    }

    pub(crate) fn media(&self, kind: crate::archive::MediaKind) -> &Arc<dyn MediaSource> {
        match kind {
            crate::archive::MediaKind::Images => &self.images,
            crate::archive::MediaKind::Videos => &self.videos,
        }
    }
}
