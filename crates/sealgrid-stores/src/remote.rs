//! Remote: a local store that pulls missing sector files from peers.
//!
//! `acquire_sector` first asks the local store; every `existing` kind it
//! does not have is located through the index and fetched from the
//! lowest-weight holder that answers. Acquires of one sector are serialized
//! through `FetchLocks`, so concurrent callers see the first caller's result
//! instead of downloading the same files again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use tracing::{debug, info, warn};

use sealgrid_core::config::RemoteConfig;
use sealgrid_core::{
    AcquireMode, CancelScope, FileType, FsStat, PathType, SealProof, SectorId, SectorPaths, SectorStores,
    StorageId, join_url,
};
use sealgrid_index::SectorIndex;

use crate::error::{FetchFailure, FetchFailures, StoreError, StoreResult, TransferError};
use crate::local::{check_disjoint, check_single_kind};
use crate::movecache;
use crate::report::{NonFatal, NonFatalCallback};
use crate::singleflight::FetchLocks;
use crate::store::Store;
use crate::transport::Transport;

pub struct Remote {
    local: Arc<dyn Store>,
    index: Arc<dyn SectorIndex>,
    transport: Transport,
    fetching: FetchLocks,
    cache_root: Option<PathBuf>,
    on_non_fatal: Option<NonFatalCallback>,
}

/// Cancellation ends the operation; every other transfer failure is data.
fn transfer_error(e: TransferError) -> StoreError {
    match e {
        TransferError::Cancelled(reason) => StoreError::Cancelled(reason),
        other => StoreError::Transfer(other),
    }
}

impl Remote {
    pub fn new(local: Arc<dyn Store>, index: Arc<dyn SectorIndex>, config: &RemoteConfig) -> StoreResult<Self> {
        let timeout = config
            .request_timeout()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        let transport = Transport::new(&config.headers, timeout).map_err(StoreError::Config)?;
        Ok(Self {
            local,
            index,
            transport,
            fetching: FetchLocks::new(),
            cache_root: config.cache_root.clone(),
            on_non_fatal: None,
        })
    }

    /// Receive every best-effort failure in addition to the warn log.
    pub fn with_non_fatal(mut self, callback: NonFatalCallback) -> Self {
        self.on_non_fatal = Some(callback);
        self
    }

    pub fn local(&self) -> &Arc<dyn Store> {
        &self.local
    }

    fn report(&self, event: NonFatal) {
        warn!(%event, "best-effort step failed");
        if let Some(callback) = &self.on_non_fatal {
            callback(&event);
        }
    }

    /// Fetch one kind of a sector into a freshly allocated local path.
    ///
    /// Returns the local path, the storage it belongs to and the URL the
    /// data came from.
    async fn acquire_from_remote(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        proof: SealProof,
        kind: FileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> StoreResult<(PathBuf, StorageId, String)> {
        let mut holders = self.index.storage_find_sector(sector, kind, false).await?;
        if holders.is_empty() {
            return Err(StoreError::SectorNotFound {
                sector,
                file_type: kind,
            });
        }
        holders.sort_by_key(|h| h.weight);

        let (paths, ids) = self
            .local
            .acquire_sector(scope, sector, proof, FileType::NONE, kind, path_type, mode)
            .await
            .map_err(|e| StoreError::local("allocate local sector for fetching", e))?;
        let (Some(dest), Some(storage)) = (paths.path(kind).map(Path::to_path_buf), ids.get(kind).cloned()) else {
            return Err(StoreError::NoAllocPath(path_type));
        };

        let mut failures = FetchFailures::default();
        for holder in &holders {
            for url in &holder.urls {
                match self.transport.fetch(scope, url, &dest).await {
                    Ok(()) => {
                        if !failures.is_empty() {
                            self.report(NonFatal::FetchRetried {
                                sector,
                                file_type: kind,
                                url: url.clone(),
                                failures: failures.iter().map(ToString::to_string).collect(),
                            });
                        }
                        return Ok((dest, storage, url.clone()));
                    }
                    Err(TransferError::Cancelled(reason)) => return Err(reason.into()),
                    Err(error) => {
                        debug!(%sector, %kind, %url, %error, "fetch attempt failed");
                        failures.push(FetchFailure {
                            url: url.clone(),
                            storage: holder.id.clone(),
                            dest: dest.clone(),
                            error,
                        });
                    }
                }
            }
        }

        Err(StoreError::Fetch {
            sector,
            file_type: kind,
            failures,
        })
    }
}

#[async_trait]
impl Store for Remote {
    async fn acquire_sector(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        proof: SealProof,
        existing: FileType,
        allocate: FileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> StoreResult<(SectorPaths, SectorStores)> {
        check_disjoint(existing, allocate)?;
        let cache_root = match mode {
            AcquireMode::MoveCache => Some(self.cache_root.as_deref().ok_or_else(|| {
                StoreError::Config("cache_root must be configured to acquire with MoveCache".to_string())
            })?),
            _ => None,
        };

        let _inflight = self.fetching.lock(sector, scope).await?;

        let (mut paths, mut stores) = self
            .local
            .acquire_sector(scope, sector, proof, existing, allocate, path_type, mode)
            .await
            .map_err(|e| StoreError::local("local acquire", e))?;

        for kind in existing.iter() {
            if paths.get(kind).is_some() {
                continue;
            }

            let (dest, storage, url) = self
                .acquire_from_remote(scope, sector, proof, kind, path_type, mode)
                .await?;
            info!(%sector, %kind, %url, dest = %dest.display(), "fetched from remote");
            paths.set(kind, dest);
            stores.set(kind, storage.clone());

            if let Err(e) = self
                .index
                .storage_declare_sector(&storage, sector, kind, mode.is_move())
                .await
            {
                // An undeclared copy must not cost the source its copy.
                self.report(NonFatal::Declare {
                    sector,
                    file_type: kind,
                    storage,
                    error: e.to_string(),
                });
                continue;
            }

            if mode.is_move() {
                if let Err(e) = self.transport.delete(scope, &url).await {
                    self.report(NonFatal::SourceDelete {
                        sector,
                        file_type: kind,
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(cache_root) = cache_root {
            for kind in existing.iter() {
                let Some(path) = paths.path(kind) else {
                    continue;
                };
                movecache::move_and_link(path, kind, cache_root)
                    .await
                    .map_err(|e| StoreError::local("move into cache", e.into()))?;
            }
        }

        Ok((paths, stores))
    }

    async fn remove(&self, scope: &CancelScope, sector: SectorId, ft: FileType, force: bool) -> StoreResult<()> {
        check_single_kind(ft)?;

        self.local
            .remove(scope, sector, ft, force)
            .await
            .map_err(|e| StoreError::local("remove from local", e))?;

        let holders = self.index.storage_find_sector(sector, ft, false).await?;
        for holder in holders {
            for url in &holder.urls {
                match self.transport.delete(scope, url).await {
                    Ok(()) => break,
                    Err(TransferError::Cancelled(reason)) => return Err(reason.into()),
                    Err(e) => self.report(NonFatal::Remove {
                        sector,
                        url: url.clone(),
                        error: e.to_string(),
                    }),
                }
            }
        }
        Ok(())
    }

    async fn remove_copies(&self, scope: &CancelScope, sector: SectorId, ft: FileType) -> StoreResult<()> {
        // Copies on other nodes are cleaned up by the workers that pulled them.
        self.local.remove_copies(scope, sector, ft).await
    }

    async fn move_storage(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        proof: SealProof,
        ft: FileType,
    ) -> StoreResult<()> {
        self.acquire_sector(scope, sector, proof, ft, FileType::NONE, PathType::Storage, AcquireMode::Move)
            .await?;
        self.local.move_storage(scope, sector, proof, ft).await
    }

    async fn fs_stat(&self, scope: &CancelScope, id: &StorageId) -> StoreResult<FsStat> {
        match self.local.fs_stat(scope, id).await {
            Ok(stat) => return Ok(stat),
            Err(StoreError::PathNotFound(_)) => {}
            Err(e) => return Err(StoreError::local("local stat", e)),
        }

        let info = self.index.storage_info(id).await?;
        let Some(base) = info.urls.first() else {
            debug!(%id, "storage has no known urls");
            return Err(StoreError::PathNotFound(id.clone()));
        };
        let url = join_url(base, &["stat", id.as_str()]);

        let (status, body) = self
            .transport
            .get_bytes(scope, &url)
            .await
            .map_err(transfer_error)?;
        match status {
            StatusCode::OK => serde_json::from_slice(&body).map_err(|e| StoreError::RemoteStat {
                id: id.clone(),
                message: format!("decoding stat: {e}"),
            }),
            StatusCode::NOT_FOUND => Err(StoreError::PathNotFound(id.clone())),
            StatusCode::INTERNAL_SERVER_ERROR => Err(StoreError::RemoteStat {
                id: id.clone(),
                message: String::from_utf8_lossy(&body).into_owned(),
            }),
            other => Err(StoreError::Transfer(TransferError::Status {
                url,
                status: other.as_u16(),
            })),
        }
    }
}
