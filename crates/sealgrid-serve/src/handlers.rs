//! Peer endpoint handlers.
//!
//! Each handler resolves the request against the node's `Store` and streams
//! the result; sector files are never buffered whole.

use std::io;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use sealgrid_core::{AcquireMode, CancelScope, FileType, PathType, SectorId, StorageId};
use sealgrid_stores::tarutil::tar_directory;
use sealgrid_stores::{OCTET_CONTENT_TYPE, TAR_CONTENT_TYPE};

use crate::ServeState;
use crate::error::{ServeError, ServeResult};

const READ_CHUNK: usize = 64 * 1024;

fn parse_target(kind: &str, sector: &str) -> ServeResult<(FileType, SectorId)> {
    let kind: FileType = kind
        .parse()
        .map_err(|e: sealgrid_core::ParseError| ServeError::BadRequest(e.to_string()))?;
    let sector: SectorId = sector
        .parse()
        .map_err(|e: sealgrid_core::ParseError| ServeError::BadRequest(e.to_string()))?;
    Ok((kind, sector))
}

/// Stream a regular file in fixed-size chunks.
fn file_chunks(mut file: tokio::fs::File) -> mpsc::Receiver<io::Result<bytes::Bytes>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            match file.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(buf.freeze())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
    rx
}

/// GET /remote/{kind}/{sector}
///
/// Directories go out as `application/x-tar`, files as
/// `application/octet-stream`.
pub async fn get_sector(
    State(state): State<ServeState>,
    Path((kind, sector)): Path<(String, String)>,
) -> ServeResult<Response> {
    let (kind, sector) = parse_target(&kind, &sector)?;
    let scope = CancelScope::background();

    let (paths, _) = state
        .store
        .acquire_sector(
            &scope,
            sector,
            state.proof,
            kind,
            FileType::NONE,
            PathType::Storage,
            AcquireMode::Copy,
        )
        .await?;
    let path = paths
        .path(kind)
        .ok_or_else(|| ServeError::NotFound(format!("{kind} of {sector}")))?;

    let meta = tokio::fs::metadata(path).await?;
    info!(%sector, %kind, path = %path.display(), dir = meta.is_dir(), "serving sector file");

    if meta.is_dir() {
        let body = Body::from_stream(ReceiverStream::new(tar_directory(path)));
        Ok(([(header::CONTENT_TYPE, TAR_CONTENT_TYPE)], body).into_response())
    } else {
        let file = tokio::fs::File::open(path).await?;
        let body = Body::from_stream(ReceiverStream::new(file_chunks(file)));
        Ok((
            [
                (header::CONTENT_TYPE, OCTET_CONTENT_TYPE.to_string()),
                (header::CONTENT_LENGTH, meta.len().to_string()),
            ],
            body,
        )
            .into_response())
    }
}

/// DELETE /remote/{kind}/{sector}
pub async fn delete_sector(
    State(state): State<ServeState>,
    Path((kind, sector)): Path<(String, String)>,
) -> ServeResult<StatusCode> {
    let (kind, sector) = parse_target(&kind, &sector)?;
    info!(%sector, %kind, "peer requested delete");
    state
        .store
        .remove(&CancelScope::background(), sector, kind, false)
        .await?;
    Ok(StatusCode::OK)
}

/// GET /remote/stat/{id}
pub async fn stat_storage(
    State(state): State<ServeState>,
    Path(id): Path<String>,
) -> ServeResult<impl IntoResponse> {
    let id = StorageId::new(id);
    let stat = state.store.fs_stat(&CancelScope::background(), &id).await?;
    debug!(%id, capacity = stat.capacity, available = stat.available, "stat");
    Ok(Json(stat))
}
