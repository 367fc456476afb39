//! Shared vocabulary of the sealgrid workspace.
//!
//! Sector and storage identifiers, file-type masks, worker capacity and job
//! requirement records, node configuration, and the `CancelScope` that every
//! blocking operation in the other crates observes.

pub mod cancel;
pub mod config;
pub mod resources;
pub mod types;

pub use cancel::{CancelHandle, CancelScope, Cancelled};
pub use config::NodeConfig;
pub use resources::*;
pub use types::*;
