//! At most one in-flight acquire per sector.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use sealgrid_core::{CancelScope, Cancelled, SectorId};

/// Per-sector single-flight markers.
///
/// The holder's guard owns the only sender of a `watch` channel; waiters hold
/// receivers. Dropping the guard removes the marker and then the sender, so
/// every waiter wakes with `changed()` failing and retries.
#[derive(Debug, Default)]
pub struct FetchLocks {
    inflight: Mutex<HashMap<SectorId, watch::Receiver<()>>>,
}

/// Held while a sector is being acquired. Releases on drop.
#[derive(Debug)]
pub struct FetchGuard<'a> {
    locks: &'a FetchLocks,
    sector: SectorId,
    _released: watch::Sender<()>,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.locks.inflight.lock().remove(&self.sector);
    }
}

impl FetchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `sector`, then take it.
    pub async fn lock(&self, sector: SectorId, scope: &CancelScope) -> Result<FetchGuard<'_>, Cancelled> {
        loop {
            let mut waiting = {
                let mut inflight = self.inflight.lock();
                match inflight.get(&sector) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(());
                        inflight.insert(sector, rx);
                        return Ok(FetchGuard {
                            locks: self,
                            sector,
                            _released: tx,
                        });
                    }
                }
            };

            debug!(%sector, "waiting for in-flight acquire");
            tokio::select! {
                _ = waiting.changed() => {}
                reason = scope.cancelled() => return Err(reason),
            }
        }
    }

    pub fn is_locked(&self, sector: SectorId) -> bool {
        self.inflight.lock().contains_key(&sector)
    }
}
