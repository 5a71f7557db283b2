//! Shared fixtures for coordinator tests.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tempfile::TempDir;

use crate::config::Config;
use crate::coordinator::{BackupCoordinator, BackupSettings, RestoreCoordinator, SyncStatus};
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::retention::{BACKUP_EXTENSION, BACKUP_PREFIX};
use crate::service::{AutoBackupSettings, BackupService};
use crate::sources::{
    DataSources, DatabaseSource, DeviceDescriptor, DirectoryMediaSource, JsonTimestampStore,
    LastBackupStore, MediaFile, MediaSource, Snapshot, SnapshotReader,
};

/// Data directory and backup directory in a throwaway location.
pub struct Fixture {
    _temp_dir: TempDir,
    config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(temp_dir.path());
        fs::create_dir_all(&config.backup.directory).unwrap();
        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config.backup.directory.clone()
    }

    pub fn seed_database(&self, content: &[u8]) {
        write_file(&self.config.sources.database, content);
    }

    pub fn seed_config(&self, content: &[u8]) {
        write_file(&self.config.sources.config, content);
    }

    pub fn seed_image(&self, relative: &str, size: usize) {
        write_file(&self.config.sources.images.join(relative), &pattern(relative, size));
    }

    pub fn seed_video(&self, relative: &str, size: usize) {
        write_file(&self.config.sources.videos.join(relative), &pattern(relative, size));
    }

    pub fn read_database(&self) -> Vec<u8> {
        fs::read(&self.config.sources.database).unwrap()
    }

    pub fn read_config(&self) -> Vec<u8> {
        fs::read(&self.config.sources.config).unwrap()
    }

    pub fn images_root(&self) -> PathBuf {
        self.config.sources.images.clone()
    }

    pub fn read_image(&self, relative: &str) -> Vec<u8> {
        fs::read(self.config.sources.images.join(relative)).unwrap()
    }

    /// `("images/<relative path>", size)` for every media file on disk.
    pub fn media_files(&self) -> Vec<(String, u64)> {
        let options = WalkOptions::default();
        let mut files = Vec::new();
        for (prefix, root) in [("images", &self.config.sources.images), ("videos", &self.config.sources.videos)] {
            for file in walk_directory(root, &options).unwrap() {
                let relative = file
                    .relative_path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((format!("{prefix}/{relative}"), file.size));
            }
        }
        files
    }

    pub fn last_backup(&self) -> i64 {
        JsonTimestampStore::new(&self.config.sources.last_backup_file).get()
    }

    fn sources(&self) -> DataSources {
        DataSources {
            device: Arc::new(TestDevice),
            ..DataSources::from_config(&self.config)
        }
    }

    pub fn backup_coordinator(&self) -> BackupCoordinator {
        BackupCoordinator::new(self.sources(), BackupSettings::default(), SyncStatus::new())
    }

    pub fn backup_coordinator_with_max(&self, max_backups: usize) -> BackupCoordinator {
        let settings = BackupSettings {
            max_backups,
            ..BackupSettings::default()
        };
        BackupCoordinator::new(self.sources(), settings, SyncStatus::new())
    }

    /// Reading the image at `fail_at` (in enumeration order) fails midway.
    pub fn backup_coordinator_failing_image(&self, fail_at: usize) -> BackupCoordinator {
        let sources = DataSources {
            images: Arc::new(FailingMediaSource {
                inner: DirectoryMediaSource::new(&self.config.sources.images),
                fail_at,
                opened: AtomicUsize::new(0),
            }),
            ..self.sources()
        };
        BackupCoordinator::new(sources, BackupSettings::default(), SyncStatus::new())
    }

    /// The database snapshot blocks until the returned sender fires.
    pub fn backup_coordinator_gated(&self) -> (BackupCoordinator, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let sources = DataSources {
            database: Arc::new(GatedDatabase { gate: Mutex::new(rx) }),
            ..self.sources()
        };
        (
            BackupCoordinator::new(sources, BackupSettings::default(), SyncStatus::new()),
            tx,
        )
    }

    /// The database is a stream that does not report its length.
    pub fn backup_coordinator_streaming_database(&self, content: &[u8]) -> BackupCoordinator {
        let sources = DataSources {
            database: Arc::new(StreamingDatabase {
                content: content.to_vec(),
            }),
            ..self.sources()
        };
        BackupCoordinator::new(sources, BackupSettings::default(), SyncStatus::new())
    }

    pub fn restore_coordinator(&self) -> RestoreCoordinator {
        RestoreCoordinator::new(self.sources(), SyncStatus::new())
    }

    /// Every video restore fails.
    pub fn restore_coordinator_failing_videos(&self) -> RestoreCoordinator {
        let sources = DataSources {
            videos: Arc::new(ReadOnlyMediaSource {
                inner: DirectoryMediaSource::new(&self.config.sources.videos),
            }),
            ..self.sources()
        };
        RestoreCoordinator::new(sources, SyncStatus::new())
    }

    pub fn service(&self) -> BackupService {
        BackupService::new(self.sources(), BackupSettings::default(), AutoBackupSettings::default())
    }
}

/// Number of backup archives in `dir`.
pub fn archive_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_EXTENSION)
        })
        .count()
}

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Deterministic content that differs between files.
fn pattern(seed: &str, size: usize) -> Vec<u8> {
    let offset = seed.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    (0..size).map(|i| (i as u8).wrapping_mul(31).wrapping_add(offset)).collect()
}

struct TestDevice;

impl DeviceDescriptor for TestDevice {
    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("model".to_string(), "test-device".to_string()),
            ("os".to_string(), "test-os".to_string()),
        ])
    }
}

struct FailingMediaSource {
    inner: DirectoryMediaSource,
    fail_at: usize,
    opened: AtomicUsize,
}

impl MediaSource for FailingMediaSource {
    fn root_path(&self) -> PathBuf {
        self.inner.root_path()
    }

    fn enumerate_files(&self) -> io::Result<Vec<MediaFile>> {
        self.inner.enumerate_files()
    }

    fn open(&self, file: &MediaFile) -> io::Result<SnapshotReader> {
        let index = self.opened.fetch_add(1, Ordering::SeqCst);
        let content = self.inner.open(file)?;
        if index == self.fail_at {
            Ok(Box::new(content.take(8).chain(BrokenReader)))
        } else {
            Ok(content)
        }
    }
}

struct BrokenReader;

impl Read for BrokenReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("device removed"))
    }
}

struct GatedDatabase {
    gate: Mutex<mpsc::Receiver<()>>,
}

impl DatabaseSource for GatedDatabase {
    fn read_snapshot(&self) -> io::Result<Option<Snapshot>> {
        self.gate
            .lock()
            .unwrap()
            .recv()
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Some(Snapshot::new(io::Cursor::new(b"gated".to_vec()), None)))
    }

    fn write_snapshot(&self, _snapshot: &mut dyn Read) -> io::Result<u64> {
        Err(io::Error::other("read only"))
    }
}

struct StreamingDatabase {
    content: Vec<u8>,
}

impl DatabaseSource for StreamingDatabase {
    fn read_snapshot(&self) -> io::Result<Option<Snapshot>> {
        Ok(Some(Snapshot::new(io::Cursor::new(self.content.clone()), None)))
    }

    fn write_snapshot(&self, _snapshot: &mut dyn Read) -> io::Result<u64> {
        Err(io::Error::other("read only"))
    }
}

struct ReadOnlyMediaSource {
    inner: DirectoryMediaSource,
}

impl MediaSource for ReadOnlyMediaSource {
    fn root_path(&self) -> PathBuf {
        self.inner.root_path()
    }

    fn enumerate_files(&self) -> io::Result<Vec<MediaFile>> {
        self.inner.enumerate_files()
    }

    fn restore_file(&self, relative_path: &Path, _content: &mut dyn Read) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is read only", relative_path.display()),
        ))
    }
}
