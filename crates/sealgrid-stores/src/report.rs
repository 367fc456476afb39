//! Best-effort failures that do not fail the calling operation.

use std::fmt;
use std::sync::Arc;

use sealgrid_core::{FileType, SectorId, StorageId};

/// A failure that was logged and skipped rather than returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonFatal {
    /// A fetch succeeded only after earlier candidate URLs failed.
    FetchRetried {
        sector: SectorId,
        file_type: FileType,
        url: String,
        failures: Vec<String>,
    },
    /// Recording a fetched copy in the index failed.
    Declare {
        sector: SectorId,
        file_type: FileType,
        storage: StorageId,
        error: String,
    },
    /// Deleting the superseded source after a move failed.
    SourceDelete {
        sector: SectorId,
        file_type: FileType,
        url: String,
        error: String,
    },
    /// Deleting one holder's copy during remove failed at this URL.
    Remove { sector: SectorId, url: String, error: String },
}

impl fmt::Display for NonFatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonFatal::FetchRetried {
                sector,
                file_type,
                url,
                failures,
            } => write!(
                f,
                "fetched {file_type} of {sector} from {url} after {} failed attempt(s): {}",
                failures.len(),
                failures.join("; ")
            ),
            NonFatal::Declare {
                sector,
                file_type,
                storage,
                error,
            } => write!(f, "declaring {file_type} of {sector} in {storage} failed: {error}"),
            NonFatal::SourceDelete {
                sector,
                file_type,
                url,
                error,
            } => write!(f, "deleting moved {file_type} of {sector} at {url} failed: {error}"),
            NonFatal::Remove { sector, url, error } => write!(f, "removing {sector} at {url} failed: {error}"),
        }
    }
}

/// Receives every `NonFatal` event a `Remote` reports.
pub type NonFatalCallback = Arc<dyn Fn(&NonFatal) + Send + Sync>;
