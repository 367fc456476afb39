//! Filesystem helpers: capacity queries, moves across devices, removal.

use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use sealgrid_core::FsStat;

/// Capacity and free space of the filesystem holding `path`.
pub fn statvfs(path: &Path) -> io::Result<FsStat> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    let frsize = stat.fragment_size() as u64;
    Ok(FsStat {
        capacity: (stat.blocks() as u64).saturating_mul(frsize),
        available: (stat.blocks_available() as u64).saturating_mul(frsize),
        reserved: 0,
    })
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
pub async fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// Move `src` to `dst`, copying when the two are on different devices.
///
/// `dst` must not exist yet; its parent directory is created.
pub async fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(src = %src.display(), dst = %dst.display(), "rename crosses devices, copying");
            let (from, to) = (src.to_path_buf(), dst.to_path_buf());
            tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                .await
                .map_err(io::Error::other)??;
            remove_path(src).await
        }
        Err(e) => Err(e),
    }
}

/// Copy `src` (a file or a directory tree) to `dst`. Symlinks are
/// recreated, not followed.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = if rel.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(rel)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
