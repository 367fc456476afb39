//! The query/declare interface stores use to find each other's sectors.

use async_trait::async_trait;

use sealgrid_core::{FileType, SectorId, SectorStorageInfo, StorageId, StorageInfo};

use crate::error::IndexResult;

/// Directory of storage locations and the sector files each one holds.
///
/// `ft` arguments may carry several kinds; each kind is handled separately.
#[async_trait]
pub trait SectorIndex: Send + Sync {
    /// Register a storage location, or refresh an existing registration.
    ///
    /// URLs of a re-attached location are merged with the ones already known.
    async fn storage_attach(&self, info: StorageInfo) -> IndexResult<()>;

    async fn storage_info(&self, id: &StorageId) -> IndexResult<StorageInfo>;

    async fn storage_list(&self) -> IndexResult<Vec<StorageInfo>>;

    /// Record that `id` holds the given kinds of `sector`.
    async fn storage_declare_sector(
        &self,
        id: &StorageId,
        sector: SectorId,
        ft: FileType,
        primary: bool,
    ) -> IndexResult<()>;

    /// Forget that `id` holds the given kinds of `sector`.
    async fn storage_drop_sector(&self, id: &StorageId, sector: SectorId, ft: FileType) -> IndexResult<()>;

    /// Locations holding any of the kinds in `ft`, with per-sector URLs.
    ///
    /// With `allow_fetch`, attached locations that do not hold the sector
    /// but accept sealing or storage are appended as non-primary entries.
    async fn storage_find_sector(
        &self,
        sector: SectorId,
        ft: FileType,
        allow_fetch: bool,
    ) -> IndexResult<Vec<SectorStorageInfo>>;
}
