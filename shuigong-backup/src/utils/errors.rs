//! Error types for the backup engine.

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::Component;
use crate::coordinator::SyncState;

/// Boxed underlying cause carried by archive errors.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Another operation is already in progress ({current})")]
    OperationInProgress { current: SyncState },

    #[error("{component} source unavailable: {source}")]
    SourceUnavailable {
        component: Component,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive write failed ({context}): {source}")]
    ArchiveWriteFailure {
        context: String,
        #[source]
        source: Cause,
    },

    #[error("Archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    #[error("Archive is corrupt ({}): {source}", path.display())]
    ArchiveCorrupt {
        path: PathBuf,
        #[source]
        source: Cause,
    },

    #[error("Archive read failed ({context}): {source}")]
    ArchiveReadFailure {
        context: String,
        #[source]
        source: Cause,
    },

    #[error("Restore aborted after restoring [{}]: {source}", join_components(restored))]
    PartialRestoreFailure {
        restored: BTreeSet<Component>,
        #[source]
        source: Box<BackupError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub(crate) fn write_failure(context: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::ArchiveWriteFailure {
            context: context.into(),
            source: source.into(),
        }
    }

    pub(crate) fn read_failure(context: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::ArchiveReadFailure {
            context: context.into(),
            source: source.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, source: impl Into<Cause>) -> Self {
        Self::ArchiveCorrupt {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn unavailable(component: Component, source: std::io::Error) -> Self {
        Self::SourceUnavailable { component, source }
    }
}

fn join_components(components: &BTreeSet<Component>) -> String {
    components
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, BackupError>;
