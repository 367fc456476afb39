//! LocalDir: sector files in local storage directories.
//!
//! Each configured storage path is laid out as `<root>/<kind>/<sector>`.
//! Which path holds what is tracked in the `SectorIndex`; the directories
//! are scanned and declared when the store is opened.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use sealgrid_core::config::StorageConfig;
use sealgrid_core::{
    AcquireMode, CancelScope, FileType, FsStat, PathType, SealProof, SectorId, SectorPaths, SectorStores,
    StorageId, StorageInfo,
};
use sealgrid_index::SectorIndex;

use crate::error::{StoreError, StoreResult};
use crate::fsutil;
use crate::store::Store;

#[derive(Debug, Clone)]
struct LocalPath {
    info: StorageInfo,
    root: PathBuf,
}

impl LocalPath {
    fn sector_path(&self, sector: SectorId, kind: FileType) -> PathBuf {
        self.root
            .join(kind.name().unwrap_or("none"))
            .join(sector.to_string())
    }

    fn accepts(&self, path_type: PathType) -> bool {
        match path_type {
            PathType::Sealing => self.info.can_seal,
            PathType::Storage => self.info.can_store,
        }
    }
}

/// `Store` over the storage directories of this node.
pub struct LocalDir {
    index: Arc<dyn SectorIndex>,
    paths: Vec<LocalPath>,
}

impl LocalDir {
    /// Attach every configured path to the index and declare the sector
    /// files already present in it.
    pub async fn open(index: Arc<dyn SectorIndex>, storage: &[StorageConfig]) -> StoreResult<Self> {
        let mut paths = Vec::with_capacity(storage.len());
        for cfg in storage {
            let path = LocalPath {
                info: cfg.info(),
                root: cfg.path.clone(),
            };
            for kind in FileType::ALL {
                tokio::fs::create_dir_all(path.root.join(kind.name().unwrap_or("none"))).await?;
            }
            index.storage_attach(path.info.clone()).await?;
            let declared = Self::declare_existing(index.as_ref(), &path).await?;
            info!(id = %path.info.id, root = %path.root.display(), declared, "storage path opened");
            paths.push(path);
        }
        Ok(Self { index, paths })
    }

    async fn declare_existing(index: &dyn SectorIndex, path: &LocalPath) -> StoreResult<usize> {
        let mut declared = 0;
        for kind in FileType::ALL {
            let dir = path.root.join(kind.name().unwrap_or("none"));
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(sector) = name.to_str().and_then(|n| n.parse::<SectorId>().ok()) else {
                    warn!(path = %entry.path().display(), "skipping unrecognised file in storage path");
                    continue;
                };
                index.storage_declare_sector(&path.info.id, sector, kind, false).await?;
                declared += 1;
            }
        }
        Ok(declared)
    }

    /// Ids of the storage paths this store owns.
    pub fn storage_ids(&self) -> Vec<StorageId> {
        self.paths.iter().map(|p| p.info.id.clone()).collect()
    }

    pub fn index(&self) -> &Arc<dyn SectorIndex> {
        &self.index
    }

    fn path(&self, id: &StorageId) -> Option<&LocalPath> {
        self.paths.iter().find(|p| &p.info.id == id)
    }

    /// Local path a sector file would have in storage `id`.
    pub fn sector_path(&self, id: &StorageId, sector: SectorId, kind: FileType) -> Option<PathBuf> {
        self.path(id).map(|p| p.sector_path(sector, kind))
    }

    /// Storage path with the most free space accepting `path_type`.
    fn best_alloc(&self, path_type: PathType) -> Option<&LocalPath> {
        self.paths
            .iter()
            .filter(|p| p.accepts(path_type))
            .map(|p| {
                let available = match fsutil::statvfs(&p.root) {
                    Ok(stat) => stat.available,
                    Err(e) => {
                        warn!(id = %p.info.id, error = %e, "stat failed while allocating");
                        0
                    }
                };
                (p, available)
            })
            .max_by_key(|(_, available)| *available)
            .map(|(p, _)| p)
    }

    async fn remove_local(&self, path: &LocalPath, sector: SectorId, kind: FileType) -> StoreResult<()> {
        let file = path.sector_path(sector, kind);
        info!(%sector, %kind, id = %path.info.id, path = %file.display(), "removing sector file");
        self.index
            .storage_drop_sector(&path.info.id, sector, kind)
            .await?;
        fsutil::remove_path(&file).await?;
        Ok(())
    }
}

pub(crate) fn check_disjoint(existing: FileType, allocate: FileType) -> StoreResult<()> {
    if existing.intersects(allocate) {
        return Err(StoreError::InvalidRequest(format!(
            "cannot both find and allocate {}",
            existing & allocate
        )));
    }
    Ok(())
}

pub(crate) fn check_single_kind(ft: FileType) -> StoreResult<()> {
    if ft.count() != 1 {
        return Err(StoreError::InvalidRequest(format!(
            "expected exactly one file type, got {ft}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Store for LocalDir {
    async fn acquire_sector(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        _proof: SealProof,
        existing: FileType,
        allocate: FileType,
        path_type: PathType,
        _mode: AcquireMode,
    ) -> StoreResult<(SectorPaths, SectorStores)> {
        check_disjoint(existing, allocate)?;
        scope.check()?;

        let mut paths = SectorPaths::default();
        let mut stores = SectorStores::default();

        for kind in existing.iter() {
            let holders = self.index.storage_find_sector(sector, kind, false).await?;
            if let Some((path, id)) = holders
                .iter()
                .find_map(|h| self.path(&h.id).map(|p| (p.sector_path(sector, kind), h.id.clone())))
            {
                debug!(%sector, %kind, %id, "found local copy");
                paths.set(kind, path);
                stores.set(kind, id);
            }
        }

        for kind in allocate.iter() {
            let best = self
                .best_alloc(path_type)
                .ok_or(StoreError::NoAllocPath(path_type))?;
            debug!(%sector, %kind, id = %best.info.id, "allocated local path");
            paths.set(kind, best.sector_path(sector, kind));
            stores.set(kind, best.info.id.clone());
        }

        Ok((paths, stores))
    }

    async fn remove(&self, scope: &CancelScope, sector: SectorId, ft: FileType, force: bool) -> StoreResult<()> {
        check_single_kind(ft)?;
        scope.check()?;

        let holders = self.index.storage_find_sector(sector, ft, false).await?;
        if holders.is_empty() && !force {
            return Err(StoreError::SectorNotFound {
                sector,
                file_type: ft,
            });
        }

        for holder in &holders {
            if let Some(path) = self.path(&holder.id) {
                self.remove_local(path, sector, ft).await?;
            }
        }
        Ok(())
    }

    async fn remove_copies(&self, scope: &CancelScope, sector: SectorId, ft: FileType) -> StoreResult<()> {
        scope.check()?;
        for kind in ft.iter() {
            let holders = self.index.storage_find_sector(sector, kind, false).await?;
            if !holders.iter().any(|h| h.primary) {
                warn!(%sector, %kind, "no primary copy declared, keeping all copies");
                continue;
            }
            for holder in holders.iter().filter(|h| !h.primary) {
                if let Some(path) = self.path(&holder.id) {
                    self.remove_local(path, sector, kind).await?;
                }
            }
        }
        Ok(())
    }

    async fn move_storage(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        proof: SealProof,
        ft: FileType,
    ) -> StoreResult<()> {
        let (src, src_ids) = self
            .acquire_sector(scope, sector, proof, ft, FileType::NONE, PathType::Storage, AcquireMode::Move)
            .await?;
        let (dst, dst_ids) = self
            .acquire_sector(scope, sector, proof, FileType::NONE, ft, PathType::Storage, AcquireMode::Move)
            .await?;

        for kind in ft.iter() {
            let (Some(src_path), Some(src_id)) = (src.path(kind), src_ids.get(kind)) else {
                return Err(StoreError::SectorNotFound {
                    sector,
                    file_type: kind,
                });
            };
            let (Some(dst_path), Some(dst_id)) = (dst.path(kind), dst_ids.get(kind)) else {
                return Err(StoreError::NoAllocPath(PathType::Storage));
            };

            if src_id == dst_id {
                debug!(%sector, %kind, id = %src_id, "already in destination storage");
                continue;
            }
            if self.path(src_id).is_some_and(|p| p.info.can_store) {
                debug!(%sector, %kind, id = %src_id, "already in long-term storage");
                continue;
            }

            scope.check()?;
            info!(%sector, %kind, from = %src_id, to = %dst_id, "moving sector file");
            self.index.storage_drop_sector(src_id, sector, kind).await?;
            fsutil::move_path(src_path, dst_path).await?;
            self.index
                .storage_declare_sector(dst_id, sector, kind, true)
                .await?;
        }
        Ok(())
    }

    async fn fs_stat(&self, _scope: &CancelScope, id: &StorageId) -> StoreResult<FsStat> {
        let path = self
            .path(id)
            .ok_or_else(|| StoreError::PathNotFound(id.clone()))?;
        Ok(fsutil::statvfs(&path.root)?)
    }
}
