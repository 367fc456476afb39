//! sealgrid-index: which storage locations hold which sector files.
//!
//! The `SectorIndex` trait is the narrow query/declare interface the stores
//! consume. `RedbIndex` implements it over a single redb database, the same
//! way the node keeps the rest of its durable state.
//!
//! # Tables
//!
//! | Table     | Key                 | Value                       |
//! |-----------|---------------------|-----------------------------|
//! | `storage` | `{storage_id}`      | `StorageInfo` (JSON)        |
//! | `sectors` | `{sector}:{kind}`   | holders + primary flag (JSON) |

pub mod error;
pub mod index;
pub mod store;
pub mod tables;

pub use error::{IndexError, IndexResult};
pub use index::SectorIndex;
pub use store::RedbIndex;
