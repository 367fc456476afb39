//! Relocation of freshly moved sector files under the cache root.

use std::io;
use std::path::Path;

use tracing::{debug, info};

use sealgrid_core::FileType;

use crate::fsutil;

/// Move `path` to `<cache_root>/<kind>/<name>` and leave a symlink behind.
///
/// A path that already is a symlink has been relocated before and is left
/// alone. When the cache already holds a file of that name, the local copy
/// is dropped and only the link is created.
pub async fn move_and_link(path: &Path, kind: FileType, cache_root: &Path) -> io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.file_type().is_symlink() {
        debug!(path = %path.display(), "already linked into cache");
        return Ok(());
    }

    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "sector path has no file name"))?;
    let target = cache_root.join(kind.name().unwrap_or("none")).join(name);

    match tokio::fs::symlink_metadata(&target).await {
        Ok(_) => {
            debug!(target = %target.display(), "cache already holds this file, dropping local copy");
            fsutil::remove_path(path).await?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fsutil::move_path(path, &target).await?;
        }
        Err(e) => return Err(e),
    }

    tokio::fs::symlink(&target, path).await?;
    info!(path = %path.display(), target = %target.display(), "moved into cache");
    Ok(())
}
