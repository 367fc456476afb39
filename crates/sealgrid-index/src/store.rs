//! RedbIndex: redb-backed `SectorIndex`.
//!
//! Storage records and sector declarations are JSON-serialized into redb's
//! `&[u8]` value columns. Both on-disk and in-memory backends are supported
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sealgrid_core::{FileType, SectorId, SectorStorageInfo, StorageId, StorageInfo, sector_url};

use crate::error::{IndexError, IndexResult};
use crate::index::SectorIndex;
use crate::tables::*;

/// Convert any `Display` error into an `IndexError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| IndexError::$variant(e.to_string())
    };
}

/// One holder of a sector file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Declaration {
    storage: StorageId,
    primary: bool,
}

fn sector_key(sector: SectorId, ft: FileType) -> String {
    format!("{sector}:{}", ft.name().unwrap_or("none"))
}

/// Thread-safe sector index backed by redb.
#[derive(Clone)]
pub struct RedbIndex {
    db: Arc<Database>,
}

impl RedbIndex {
    /// Open (or create) a persistent index at the given path.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let index = Self { db: Arc::new(db) };
        index.ensure_tables()?;
        debug!(?path, "sector index opened");
        Ok(index)
    }

    /// Create an ephemeral in-memory index (for testing).
    pub fn open_in_memory() -> IndexResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let index = Self { db: Arc::new(db) };
        index.ensure_tables()?;
        debug!("in-memory sector index opened");
        Ok(index)
    }

    fn ensure_tables(&self) -> IndexResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(STORAGE).map_err(map_err!(Table))?;
        txn.open_table(SECTORS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Storage ────────────────────────────────────────────────────

    fn attach(&self, info: StorageInfo) -> IndexResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STORAGE).map_err(map_err!(Table))?;
            let existing = match table.get(info.id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<StorageInfo>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            let mut merged = info;
            if let Some(prev) = existing {
                for url in prev.urls {
                    if !merged.urls.contains(&url) {
                        merged.urls.push(url);
                    }
                }
            }

            let value = serde_json::to_vec(&merged).map_err(map_err!(Serialize))?;
            table
                .insert(merged.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            debug!(id = %merged.id, urls = ?merged.urls, "storage attached");
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn info(&self, id: &StorageId) -> IndexResult<Option<StorageInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STORAGE).map_err(map_err!(Table))?;
        match table.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let info: StorageInfo =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> IndexResult<Vec<StorageInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STORAGE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let info: StorageInfo =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(info);
        }
        Ok(results)
    }

    // ── Sectors ────────────────────────────────────────────────────

    fn declare(&self, id: &StorageId, sector: SectorId, ft: FileType, primary: bool) -> IndexResult<()> {
        if self.info(id)?.is_none() {
            return Err(IndexError::StorageNotFound(id.to_string()));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SECTORS).map_err(map_err!(Table))?;
            for kind in ft.iter() {
                let key = sector_key(sector, kind);
                let mut decls: Vec<Declaration> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    None => Vec::new(),
                };

                match decls.iter_mut().find(|d| &d.storage == id) {
                    Some(d) if primary && !d.primary => d.primary = true,
                    Some(_) => {
                        debug!(%sector, %kind, storage = %id, "sector already declared");
                        continue;
                    }
                    None => decls.push(Declaration {
                        storage: id.clone(),
                        primary,
                    }),
                }

                let value = serde_json::to_vec(&decls).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                debug!(%sector, %kind, storage = %id, primary, "sector declared");
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn drop_sector(&self, id: &StorageId, sector: SectorId, ft: FileType) -> IndexResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SECTORS).map_err(map_err!(Table))?;
            for kind in ft.iter() {
                let key = sector_key(sector, kind);
                let decls: Vec<Declaration> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    None => continue,
                };

                let before = decls.len();
                let remaining: Vec<Declaration> = decls.into_iter().filter(|d| &d.storage != id).collect();
                if remaining.len() == before {
                    continue;
                }

                if remaining.is_empty() {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                } else {
                    let value = serde_json::to_vec(&remaining).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
                debug!(%sector, %kind, storage = %id, "sector dropped");
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn find(&self, sector: SectorId, ft: FileType, allow_fetch: bool) -> IndexResult<Vec<SectorStorageInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let sectors = txn.open_table(SECTORS).map_err(map_err!(Table))?;
        let storage = txn.open_table(STORAGE).map_err(map_err!(Table))?;

        let load_storage = |id: &StorageId| -> IndexResult<Option<StorageInfo>> {
            match storage.get(id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Ok(Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                )),
                None => Ok(None),
            }
        };

        let mut found: Vec<SectorStorageInfo> = Vec::new();
        for kind in ft.iter() {
            let key = sector_key(sector, kind);
            let decls: Vec<Declaration> = match sectors.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => continue,
            };

            for decl in decls {
                let Some(info) = load_storage(&decl.storage)? else {
                    warn!(%sector, %kind, storage = %decl.storage, "declared on unattached storage");
                    continue;
                };
                let urls = info.urls.iter().map(|u| sector_url(u, kind, sector));
                match found.iter_mut().find(|f| f.id == decl.storage) {
                    Some(entry) => {
                        entry.urls.extend(urls);
                        entry.primary |= decl.primary;
                    }
                    None => found.push(SectorStorageInfo {
                        urls: urls.collect(),
                        id: info.id,
                        weight: info.weight,
                        can_seal: info.can_seal,
                        can_store: info.can_store,
                        primary: decl.primary,
                    }),
                }
            }
        }

        if allow_fetch {
            for entry in storage.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let info: StorageInfo =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if !(info.can_seal || info.can_store) || found.iter().any(|f| f.id == info.id) {
                    continue;
                }
                let urls = ft
                    .iter()
                    .flat_map(|kind| info.urls.iter().map(move |u| sector_url(u, kind, sector)))
                    .collect();
                found.push(SectorStorageInfo {
                    urls,
                    id: info.id,
                    weight: info.weight,
                    can_seal: info.can_seal,
                    can_store: info.can_store,
                    primary: false,
                });
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl SectorIndex for RedbIndex {
    async fn storage_attach(&self, info: StorageInfo) -> IndexResult<()> {
        self.attach(info)
    }

    async fn storage_info(&self, id: &StorageId) -> IndexResult<StorageInfo> {
        self.info(id)?
            .ok_or_else(|| IndexError::StorageNotFound(id.to_string()))
    }

    async fn storage_list(&self) -> IndexResult<Vec<StorageInfo>> {
        self.list()
    }

    async fn storage_declare_sector(
        &self,
        id: &StorageId,
        sector: SectorId,
        ft: FileType,
        primary: bool,
    ) -> IndexResult<()> {
        self.declare(id, sector, ft, primary)
    }

    async fn storage_drop_sector(&self, id: &StorageId, sector: SectorId, ft: FileType) -> IndexResult<()> {
        self.drop_sector(id, sector, ft)
    }

    async fn storage_find_sector(
        &self,
        sector: SectorId,
        ft: FileType,
        allow_fetch: bool,
    ) -> IndexResult<Vec<SectorStorageInfo>> {
        self.find(sector, ft, allow_fetch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(id: &str, url: &str, weight: u64) -> StorageInfo {
        StorageInfo {
            id: StorageId::new(id),
            urls: vec![url.to_string()],
            weight,
            can_seal: true,
            can_store: false,
        }
    }

    const SECTOR: SectorId = SectorId { miner: 1000, number: 42 };

    // ── Storage ────────────────────────────────────────────────────

    #[tokio::test]
    async fn attach_and_get_storage() {
        let index = RedbIndex::open_in_memory().unwrap();
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();

        let info = index.storage_info(&StorageId::new("a")).await.unwrap();
        assert_eq!(info.weight, 10);
        assert_eq!(index.storage_list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_storage_is_not_found() {
        let index = RedbIndex::open_in_memory().unwrap();
        let err = index.storage_info(&StorageId::new("nope")).await.unwrap_err();
        assert!(matches!(err, IndexError::StorageNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn reattach_merges_urls() {
        let index = RedbIndex::open_in_memory().unwrap();
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
        index.storage_attach(storage("a", "http://a:2/remote", 5)).await.unwrap();

        let info = index.storage_info(&StorageId::new("a")).await.unwrap();
        assert_eq!(info.weight, 5);
        assert_eq!(info.urls, vec!["http://a:2/remote", "http://a:1/remote"]);
    }

    // ── Sectors ────────────────────────────────────────────────────

    #[tokio::test]
    async fn declare_and_find_expands_urls() {
        let index = RedbIndex::open_in_memory().unwrap();
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
        index
            .storage_declare_sector(&StorageId::new("a"), SECTOR, FileType::SEALED, true)
            .await
            .unwrap();

        let found = index.storage_find_sector(SECTOR, FileType::SEALED, false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].urls, vec!["http://a:1/remote/sealed/s-t01000-42"]);
        assert_eq!(found[0].weight, 10);
        assert!(found[0].primary);

        assert!(index.storage_find_sector(SECTOR, FileType::CACHE, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn declare_on_unattached_storage_fails() {
        let index = RedbIndex::open_in_memory().unwrap();
        let err = index
            .storage_declare_sector(&StorageId::new("ghost"), SECTOR, FileType::SEALED, false)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn redeclare_upgrades_to_primary() {
        let index = RedbIndex::open_in_memory().unwrap();
        let a = StorageId::new("a");
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
        index.storage_declare_sector(&a, SECTOR, FileType::CACHE, false).await.unwrap();
        index.storage_declare_sector(&a, SECTOR, FileType::CACHE, true).await.unwrap();
        index.storage_declare_sector(&a, SECTOR, FileType::CACHE, false).await.unwrap();

        let found = index.storage_find_sector(SECTOR, FileType::CACHE, false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].primary);
    }

    #[tokio::test]
    async fn multi_kind_declare_and_drop() {
        let index = RedbIndex::open_in_memory().unwrap();
        let a = StorageId::new("a");
        let b = StorageId::new("b");
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
        index.storage_attach(storage("b", "http://b:1/remote", 20)).await.unwrap();

        index
            .storage_declare_sector(&a, SECTOR, FileType::SEALED | FileType::CACHE, false)
            .await
            .unwrap();
        index.storage_declare_sector(&b, SECTOR, FileType::SEALED, false).await.unwrap();

        let sealed = index.storage_find_sector(SECTOR, FileType::SEALED, false).await.unwrap();
        assert_eq!(sealed.len(), 2);

        index
            .storage_drop_sector(&a, SECTOR, FileType::SEALED | FileType::CACHE)
            .await
            .unwrap();
        let sealed = index.storage_find_sector(SECTOR, FileType::SEALED, false).await.unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].id, b);
        assert!(index.storage_find_sector(SECTOR, FileType::CACHE, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_merges_kinds_per_storage() {
        let index = RedbIndex::open_in_memory().unwrap();
        let a = StorageId::new("a");
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
        index
            .storage_declare_sector(&a, SECTOR, FileType::SEALED | FileType::CACHE, false)
            .await
            .unwrap();

        let found = index
            .storage_find_sector(SECTOR, FileType::SEALED | FileType::CACHE, false)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].urls,
            vec![
                "http://a:1/remote/sealed/s-t01000-42",
                "http://a:1/remote/cache/s-t01000-42",
            ]
        );
    }

    #[tokio::test]
    async fn allow_fetch_appends_candidates() {
        let index = RedbIndex::open_in_memory().unwrap();
        let a = StorageId::new("a");
        index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
        index.storage_attach(storage("b", "http://b:1/remote", 20)).await.unwrap();
        let mut cold = storage("cold", "http://c:1/remote", 1);
        cold.can_seal = false;
        index.storage_attach(cold).await.unwrap();
        index.storage_declare_sector(&a, SECTOR, FileType::SEALED, true).await.unwrap();

        let found = index.storage_find_sector(SECTOR, FileType::SEALED, true).await.unwrap();
        let ids: Vec<_> = found.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!found[1].primary);
        assert_eq!(found[1].urls, vec!["http://b:1/remote/sealed/s-t01000-42"]);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.redb");

        {
            let index = RedbIndex::open(&db_path).unwrap();
            index.storage_attach(storage("a", "http://a:1/remote", 10)).await.unwrap();
            index
                .storage_declare_sector(&StorageId::new("a"), SECTOR, FileType::UNSEALED, true)
                .await
                .unwrap();
        }

        let index = RedbIndex::open(&db_path).unwrap();
        let found = index.storage_find_sector(SECTOR, FileType::UNSEALED, false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, StorageId::new("a"));
    }

    #[tokio::test]
    async fn empty_index_operations() {
        let index = RedbIndex::open_in_memory().unwrap();
        assert!(index.storage_list().await.unwrap().is_empty());
        assert!(index.storage_find_sector(SECTOR, FileType::SEALED, true).await.unwrap().is_empty());
        index
            .storage_drop_sector(&StorageId::new("a"), SECTOR, FileType::SEALED)
            .await
            .unwrap();
    }
}
