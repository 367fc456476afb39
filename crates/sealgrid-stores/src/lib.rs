//! sealgrid-stores: where sector files live and how they move.
//!
//! Two `Store` implementations stack on top of each other:
//!
//! - `LocalDir` owns this node's storage directories and keeps the index in
//!   step with what is on disk.
//! - `Remote` wraps a local store; whatever the local store lacks is fetched
//!   from peer nodes over HTTP, one transfer per sector at a time.
//!
//! # Architecture
//!
//! ```text
//! Remote
//!   ├── FetchLocks (per-sector single-flight)
//!   ├── SectorIndex (who holds what, with weights)
//!   ├── Transport (hyper client, auth headers, timeouts)
//!   │   ├── application/x-tar → TarExtractor → directory
//!   │   └── application/octet-stream → file
//!   ├── NonFatal reports (declare / delete failures)
//!   └── LocalDir
//!       └── <root>/<kind>/<sector> per storage path
//! ```

pub mod error;
pub mod fsutil;
pub mod local;
pub mod movecache;
pub mod remote;
pub mod report;
pub mod singleflight;
pub mod store;
pub mod tarutil;
pub mod transport;

pub use error::{FetchFailure, FetchFailures, StoreError, StoreResult, TransferError};
pub use local::LocalDir;
pub use remote::Remote;
pub use report::{NonFatal, NonFatalCallback};
pub use singleflight::{FetchGuard, FetchLocks};
pub use store::Store;
pub use transport::{OCTET_CONTENT_TYPE, TAR_CONTENT_TYPE, Transport};
