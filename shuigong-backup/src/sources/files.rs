//! File-backed data sources.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    BackupDirectory, ConfigSource, DatabaseSource, LastBackupStore, MediaFile, MediaSource,
    Snapshot,
};
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::fs::write_atomic;

/// Database stored as a single file.
#[derive(Debug, Clone)]
pub struct FileDatabaseSource {
    path: PathBuf,
}

impl FileDatabaseSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatabaseSource for FileDatabaseSource {
    fn read_snapshot(&self) -> io::Result<Option<Snapshot>> {
        open_optional(&self.path)
    }

    fn write_snapshot(&self, snapshot: &mut dyn Read) -> io::Result<u64> {
        write_atomic(&self.path, snapshot)
    }
}

/// JSON configuration file.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn read_snapshot(&self) -> io::Result<Option<Snapshot>> {
        open_optional(&self.path)
    }

    fn write_snapshot(&self, snapshot: &[u8]) -> io::Result<()> {
        write_atomic(&self.path, &mut &snapshot[..]).map(|_| ())
    }
}

/// Media tree rooted at a directory.
#[derive(Debug, Clone)]
pub struct DirectoryMediaSource {
    root: PathBuf,
    options: WalkOptions,
}

impl DirectoryMediaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            options: WalkOptions::default(),
        }
    }

    pub fn with_options(root: impl Into<PathBuf>, options: WalkOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }
}

impl MediaSource for DirectoryMediaSource {
    fn root_path(&self) -> PathBuf {
        self.root.clone()
    }

    fn enumerate_files(&self) -> io::Result<Vec<MediaFile>> {
        walk_directory(&self.root, &self.options)
    }
}

#[derive(Debug, Clone)]
pub struct FixedBackupDirectory {
    root: PathBuf,
}

impl FixedBackupDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BackupDirectory for FixedBackupDirectory {
    fn root_path(&self) -> PathBuf {
        self.root.clone()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TimestampFile {
    last_backup_ms: i64,
}

/// Last-backup time kept in a small JSON file.
#[derive(Debug, Clone)]
pub struct JsonTimestampStore {
    path: PathBuf,
}

impl JsonTimestampStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LastBackupStore for JsonTimestampStore {
    fn get(&self) -> i64 {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return 0;
            }
        };

        match serde_json::from_slice::<TimestampFile>(&content) {
            Ok(file) => file.last_backup_ms,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", self.path.display(), e);
                0
            }
        }
    }

    fn set(&self, timestamp: i64) -> io::Result<()> {
        let json = serde_json::to_vec(&TimestampFile { last_backup_ms: timestamp })?;
        write_atomic(&self.path, &mut json.as_slice()).map(|_| ())
    }
}

fn open_optional(path: &Path) -> io::Result<Option<Snapshot>> {
    match fs::File::open(path) {
        Ok(file) => {
            let len = file.metadata()?.len();
            Ok(Some(Snapshot::new(file, Some(len))))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
