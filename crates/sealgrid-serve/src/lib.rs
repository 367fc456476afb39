//! sealgrid-serve: HTTP endpoint other nodes fetch sector files from.
//!
//! Serves a node's `Store` (normally its `LocalDir`) using the wire format
//! `Remote` speaks.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/remote/stat/{id}` | `FsStat` of a local storage path as JSON |
//! | GET | `/remote/{kind}/{sector}` | Sector file: tar for directories, octet-stream for files |
//! | DELETE | `/remote/{kind}/{sector}` | Remove the local copy |

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use sealgrid_core::SealProof;
use sealgrid_stores::Store;

pub use error::{ServeError, ServeResult};

/// Shared state for the peer handlers.
#[derive(Clone)]
pub struct ServeState {
    pub store: Arc<dyn Store>,
    /// Seal proof of the sectors this node holds.
    pub proof: SealProof,
}

/// Routes relative to a storage URL, e.g. `http://host:port/remote`.
pub fn remote_routes(state: ServeState) -> Router {
    Router::new()
        .route("/stat/{id}", get(handlers::stat_storage))
        .route(
            "/{kind}/{sector}",
            get(handlers::get_sector).delete(handlers::delete_sector),
        )
        .with_state(state)
}

/// Build the complete peer router, mounted under `/remote`.
pub fn build_router(store: Arc<dyn Store>, proof: SealProof) -> Router {
    Router::new().nest("/remote", remote_routes(ServeState { store, proof }))
}
