//! Streaming tar packing and unpacking for sector directories.
//!
//! `tar` works on blocking `Read`/`Write`, while HTTP bodies are async
//! streams of `Bytes`. Both directions bridge the two through a bounded
//! channel and a blocking task, so a whole sector never sits in memory.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Chunks buffered between the async side and the blocking tar task.
const CHANNEL_DEPTH: usize = 16;

/// Size of the chunks `tar_directory` emits.
const CHUNK_SIZE: usize = 64 * 1024;

struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

/// Feeds an archive being unpacked into a directory.
///
/// Push body chunks with `send`, then call `finish` to wait for the unpack
/// to complete. The archive is unpacked into a staging directory next to
/// `dest` and renamed into place by `finish`; an extractor dropped before
/// that leaves `dest` untouched and its staging directory is removed once
/// the blocking task sees the input end.
pub struct TarExtractor {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<io::Result<TempDir>>,
    dest: PathBuf,
}

impl TarExtractor {
    /// Start unpacking for `dest`. Its parent directory is created if needed.
    pub fn spawn(dest: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let parent = dest.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let task = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&parent)?;
            let staging = tempfile::Builder::new().prefix(".unpack-").tempdir_in(&parent)?;
            let reader = ChannelReader {
                rx,
                current: Bytes::new(),
            };
            let mut archive = tar::Archive::new(reader);
            archive.set_preserve_permissions(false);
            archive.unpack(staging.path())?;
            Ok(staging)
        });
        Self { tx, task, dest }
    }

    /// Hand one chunk to the unpacker.
    ///
    /// Fails when the unpacker has stopped; `finish` then reports why.
    pub async fn send(&self, chunk: Bytes) -> Result<(), Bytes> {
        self.tx.send(chunk).await.map_err(|e| e.0)
    }

    /// Signal end of input, wait for the unpack and move the result to `dest`.
    pub async fn finish(self) -> io::Result<()> {
        drop(self.tx);
        let staging = self.task.await.map_err(io::Error::other)??;
        // Inline so the rename cannot outlive this future.
        std::fs::rename(staging.path(), &self.dest)
    }
}

struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn push(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE)));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tar stream receiver dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buf.len();
        let n = data.len().min(room);
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= CHUNK_SIZE {
            self.push()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.push()
    }
}

/// Stream `dir` as a tar archive.
///
/// Entries are named relative to `dir`. A packing error is delivered as the
/// last item of the stream.
pub fn tar_directory(dir: &Path) -> mpsc::Receiver<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let err_tx = tx.clone();
        let writer = ChannelWriter {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        };
        let result = (|| {
            let mut builder = tar::Builder::new(writer);
            builder.follow_symlinks(true);
            builder.append_dir_all(".", &dir)?;
            let mut writer = builder.into_inner()?;
            writer.flush()
        })();
        if let Err(e) = result {
            let _ = err_tx.blocking_send(Err(e));
        }
    });
    rx
}
