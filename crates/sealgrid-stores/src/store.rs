//! The `Store` trait shared by the local and remote-aware stores.

use async_trait::async_trait;

use sealgrid_core::{
    AcquireMode, CancelScope, FileType, FsStat, PathType, SealProof, SectorId, SectorPaths, SectorStores,
    StorageId,
};

use crate::error::StoreResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// Locate the `existing` kinds of a sector and allocate paths for the
    /// `allocate` kinds. The two masks must not overlap.
    ///
    /// Returns the path and the owning storage of every kind resolved.
    #[allow(clippy::too_many_arguments)]
    async fn acquire_sector(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        proof: SealProof,
        existing: FileType,
        allocate: FileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> StoreResult<(SectorPaths, SectorStores)>;

    /// Delete every copy of one kind of a sector. `ft` must name exactly one
    /// kind. Without `force`, a sector nobody holds is an error.
    async fn remove(&self, scope: &CancelScope, sector: SectorId, ft: FileType, force: bool) -> StoreResult<()>;

    /// Delete non-primary local copies of the given kinds.
    async fn remove_copies(&self, scope: &CancelScope, sector: SectorId, ft: FileType) -> StoreResult<()>;

    /// Move the given kinds into long-term storage.
    async fn move_storage(
        &self,
        scope: &CancelScope,
        sector: SectorId,
        proof: SealProof,
        ft: FileType,
    ) -> StoreResult<()>;

    /// Capacity of a storage location.
    async fn fs_stat(&self, scope: &CancelScope, id: &StorageId) -> StoreResult<FsStat>;
}
