//! HTTP transport to peer storage nodes.
//!
//! Every request carries the configured header set and observes the caller's
//! `CancelScope`. An optional per-request timeout bounds each exchange
//! separately, so a slow peer fails over to the next URL instead of
//! consuming the caller's whole deadline.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use sealgrid_core::CancelScope;

use crate::error::TransferError;
use crate::fsutil;
use crate::tarutil::TarExtractor;

pub const TAR_CONTENT_TYPE: &str = "application/x-tar";
pub const OCTET_CONTENT_TYPE: &str = "application/octet-stream";

/// Pooled HTTP/1 client with fixed request headers.
#[derive(Clone)]
pub struct Transport {
    client: Client<HttpConnector, Empty<Bytes>>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl Transport {
    /// Build a transport. Header names or values that are not valid HTTP
    /// are rejected.
    pub fn new(headers: &HashMap<String, String>, timeout: Option<Duration>) -> Result<Self, String> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| format!("header name {name:?}: {e}"))?;
            let value = HeaderValue::from_str(value).map_err(|e| format!("header {name}: {e}"))?;
            map.insert(name, value);
        }
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            client,
            headers: map,
            timeout,
        })
    }

    async fn send(&self, scope: &CancelScope, method: Method, url: &str) -> Result<Response<Incoming>, TransferError> {
        let mut builder = Request::builder().method(method).uri(url);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let req = builder.body(Empty::<Bytes>::new()).map_err(|e| TransferError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let exchange = self.client.request(req);
        let resp = self.bounded(scope, url, exchange).await?;
        resp.map_err(|e| TransferError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Run `fut` under the scope and the per-request timeout.
    async fn bounded<F: Future>(&self, scope: &CancelScope, url: &str, fut: F) -> Result<F::Output, TransferError> {
        match self.timeout {
            Some(limit) => match scope.run(tokio::time::timeout(limit, fut)).await? {
                Ok(out) => Ok(out),
                Err(_) => Err(TransferError::Timeout { url: url.to_string() }),
            },
            None => Ok(scope.run(fut).await?),
        }
    }

    /// GET `url` into `dest`, replacing whatever is there.
    ///
    /// Tar bodies are unpacked into `dest` as a directory; octet-stream
    /// bodies are written to `dest` as a single file.
    pub async fn fetch(&self, scope: &CancelScope, url: &str, dest: &Path) -> Result<(), TransferError> {
        info!(%url, dest = %dest.display(), "fetch");

        let resp = self.send(scope, Method::GET, url).await?;
        if resp.status() != StatusCode::OK {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let raw = resp
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| v.to_str().unwrap_or_default().to_string())
            .unwrap_or_default();
        let media_type = parse_media_type(&raw).ok_or_else(|| TransferError::ContentType {
            url: url.to_string(),
            value: raw.clone(),
        })?;

        fsutil::remove_path(dest).await.map_err(|source| TransferError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let body = resp.into_body();
        match media_type.as_str() {
            TAR_CONTENT_TYPE => self.bounded(scope, url, receive_tar(url, body, dest)).await?,
            OCTET_CONTENT_TYPE => self.bounded(scope, url, receive_file(url, body, dest)).await?,
            other => Err(TransferError::UnknownContentType {
                url: url.to_string(),
                media_type: other.to_string(),
            }),
        }
    }

    /// DELETE `url`; anything but 200 is a failure.
    pub async fn delete(&self, scope: &CancelScope, url: &str) -> Result<(), TransferError> {
        info!(%url, "delete");

        let resp = self.send(scope, Method::DELETE, url).await?;
        if resp.status() != StatusCode::OK {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// GET `url` and buffer the whole body, whatever the status.
    pub async fn get_bytes(&self, scope: &CancelScope, url: &str) -> Result<(StatusCode, Bytes), TransferError> {
        let resp = self.send(scope, Method::GET, url).await?;
        let status = resp.status();
        let collected = self.bounded(scope, url, resp.into_body().collect()).await?;
        let body = collected
            .map_err(|e| TransferError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_bytes();
        debug!(%url, %status, len = body.len(), "get");
        Ok((status, body))
    }
}

/// Media type of a Content-Type value, without parameters, lowercased.
fn parse_media_type(raw: &str) -> Option<String> {
    let essence = raw.split(';').next()?.trim();
    let (kind, sub) = essence.split_once('/')?;
    if kind.is_empty() || sub.is_empty() || sub.contains('/') {
        return None;
    }
    Some(essence.to_ascii_lowercase())
}

async fn receive_tar(url: &str, mut body: Incoming, dest: &Path) -> Result<(), TransferError> {
    let extractor = TarExtractor::spawn(dest.to_path_buf());
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| TransferError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let Ok(chunk) = frame.into_data() else {
            continue;
        };
        if extractor.send(chunk).await.is_err() {
            break;
        }
    }
    extractor.finish().await.map_err(|source| TransferError::Io {
        path: dest.to_path_buf(),
        source,
    })
}

async fn receive_file(url: &str, mut body: Incoming, dest: &Path) -> Result<(), TransferError> {
    let io_err = |source| TransferError::Io {
        path: dest.to_path_buf(),
        source,
    };
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| TransferError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if let Ok(chunk) = frame.into_data() {
            file.write_all(&chunk).await.map_err(io_err)?;
        }
    }
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)
}
