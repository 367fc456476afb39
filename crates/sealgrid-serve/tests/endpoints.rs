//! Peer endpoint tests: requests go through the full router.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use sealgrid_core::config::StorageConfig;
use sealgrid_core::{FileType, FsStat, SealProof, SectorId};
use sealgrid_index::{RedbIndex, SectorIndex};
use sealgrid_serve::build_router;
use sealgrid_stores::LocalDir;

const SECTOR: SectorId = SectorId { miner: 1000, number: 3 };

struct Node {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    index: Arc<dyn SectorIndex>,
    router: Router,
}

async fn node() -> Node {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::create_dir_all(root.join("sealed")).unwrap();
    std::fs::create_dir_all(root.join("cache").join(SECTOR.to_string())).unwrap();
    std::fs::write(root.join("sealed").join(SECTOR.to_string()), vec![7u8; 200_000]).unwrap();
    std::fs::write(root.join("cache").join(SECTOR.to_string()).join("p_aux"), b"aux").unwrap();
    std::fs::write(root.join("cache").join(SECTOR.to_string()).join("t_aux"), b"tree").unwrap();

    let index: Arc<dyn SectorIndex> = Arc::new(RedbIndex::open_in_memory().unwrap());
    let cfg = StorageConfig {
        id: "store-1".to_string(),
        path: root.clone(),
        urls: vec!["http://127.0.0.1:1/remote".to_string()],
        weight: 10,
        can_seal: false,
        can_store: true,
    };
    let local = LocalDir::open(index.clone(), &[cfg]).await.unwrap();
    let router = build_router(Arc::new(local), SealProof::StackedDrg2KiB);
    Node {
        _dir: dir,
        root,
        index,
        router,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn content_type(resp: &axum::response::Response) -> String {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn file_is_served_as_octet_stream() {
    let node = node().await;

    let resp = node
        .router
        .oneshot(get(&format!("/remote/sealed/{SECTOR}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(content_type(&resp), "application/octet-stream");
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "200000");

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let on_disk = std::fs::read(node.root.join("sealed").join(SECTOR.to_string())).unwrap();
    assert_eq!(&body[..], &on_disk[..]);
}

#[tokio::test]
async fn directory_is_served_as_tar() {
    let node = node().await;

    let resp = node
        .router
        .oneshot(get(&format!("/remote/cache/{SECTOR}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(content_type(&resp), "application/x-tar");

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let out = tempfile::tempdir().unwrap();
    tar::Archive::new(&body[..]).unpack(out.path()).unwrap();
    assert_eq!(std::fs::read(out.path().join("p_aux")).unwrap(), b"aux");
    assert_eq!(std::fs::read(out.path().join("t_aux")).unwrap(), b"tree");
}

#[tokio::test]
async fn missing_sector_is_404() {
    let node = node().await;
    let other = SectorId::new(1000, 99);

    let resp = node
        .router
        .oneshot(get(&format!("/remote/sealed/{other}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_path_is_400() {
    let node = node().await;

    let resp = node
        .router
        .clone()
        .oneshot(get(&format!("/remote/journal/{SECTOR}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = node
        .router
        .oneshot(get("/remote/sealed/not-a-sector"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_removes_file_and_declaration() {
    let node = node().await;
    let path = node.root.join("sealed").join(SECTOR.to_string());

    let resp = node
        .router
        .clone()
        .oneshot(delete(&format!("/remote/sealed/{SECTOR}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!path.exists());
    let holders = node
        .index
        .storage_find_sector(SECTOR, FileType::SEALED, false)
        .await
        .unwrap();
    assert!(holders.is_empty());

    // Nothing left to delete.
    let resp = node
        .router
        .oneshot(delete(&format!("/remote/sealed/{SECTOR}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stat_known_and_unknown_storage() {
    let node = node().await;

    let resp = node
        .router
        .clone()
        .oneshot(get("/remote/stat/store-1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(raw.get("Capacity").is_some());
    let stat: FsStat = serde_json::from_slice(&body).unwrap();
    assert!(stat.capacity > 0);
    assert!(stat.available <= stat.capacity);

    let resp = node
        .router
        .oneshot(get("/remote/stat/elsewhere"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
