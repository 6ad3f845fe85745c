use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::HymnNumber;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Archive unreadable: {}: {source}", .path.display())]
    ArchiveUnreadable {
        path: PathBuf,
        #[source]
        source: ArchiveFault,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveFault {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Corrupt statistics data: {0}")]
    CorruptData(String),

    #[error("Failed to write statistics file {}: {source}", .path.display())]
    PersistenceWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read statistics file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Hymn #{0} is outside the statistics range")]
    UnknownItem(HymnNumber),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid hymn number: {0:?} (expected up to three digits)")]
pub struct ParseHymnNumberError(pub String);
