//! Error types for sector stores and transfers.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use sealgrid_core::{Cancelled, FileType, PathType, SectorId, StorageId};
use sealgrid_index::IndexError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by `Store` operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("sector {sector} ({file_type}) not found")]
    SectorNotFound { sector: SectorId, file_type: FileType },

    #[error("storage path not found: {0}")]
    PathNotFound(StorageId),

    #[error("no local {0:?} path can hold new sector files")]
    NoAllocPath(PathType),

    #[error("failed to acquire {file_type} of sector {sector} from remote: {failures}")]
    Fetch {
        sector: SectorId,
        file_type: FileType,
        failures: FetchFailures,
    },

    #[error("{context}: {source}")]
    Local {
        context: &'static str,
        #[source]
        source: Box<StoreError>,
    },

    #[error("remote stat of {id} failed: {message}")]
    RemoteStat { id: StorageId, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl StoreError {
    pub(crate) fn local(context: &'static str, source: StoreError) -> Self {
        StoreError::Local {
            context,
            source: Box::new(source),
        }
    }
}

/// Failure of a single HTTP exchange with a peer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid request for {url}: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("{url} returned non-200 status {status}")]
    Status { url: String, status: u16 },

    #[error("{url}: cannot parse content type {value:?}")]
    ContentType { url: String, value: String },

    #[error("{url}: unknown content type {media_type:?}")]
    UnknownContentType { url: String, media_type: String },

    #[error("{url}: reading body: {message}")]
    Body { url: String, message: String },

    #[error("{url}: request timed out")]
    Timeout { url: String },

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// One failed fetch attempt.
#[derive(Debug)]
pub struct FetchFailure {
    pub url: String,
    pub storage: StorageId,
    pub dest: PathBuf,
    pub error: TransferError,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch {} (storage {}) -> {}: {}",
            self.url,
            self.storage,
            self.dest.display(),
            self.error
        )
    }
}

/// Every failure collected while trying the candidate URLs of a sector file.
#[derive(Debug, Default)]
pub struct FetchFailures(pub Vec<FetchFailure>);

impl FetchFailures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, failure: FetchFailure) {
        self.0.push(failure);
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchFailure> {
        self.0.iter()
    }
}

impl fmt::Display for FetchFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no candidate urls");
        }
        write!(f, "{} attempt(s) failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}
