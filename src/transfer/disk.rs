//! The local disk side of a transfer.
//!
//! Every transfer gets its own disk task, connected to the session task by
//! a bounded queue of chunks. Chunks are written or read strictly in
//! order, and the session task joins the disk task before reporting the
//! transfer.

use super::Error;

use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{spawn, JoinHandle};
use tracing::warn;

fn unable_to_write(path: &Path, source: io::Error) -> Error {
    Error::UnableToOpenLocalFileForWriting {
        path: path.to_owned(),
        source,
    }
}

fn unable_to_read(path: &Path, source: io::Error) -> Error {
    Error::UnableToOpenLocalFileForReading {
        path: path.to_owned(),
        source,
    }
}

/// Check that `path` can be created or overwritten, without touching it.
pub(super) async fn check_writable(path: &Path) -> Result<(), Error> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => {
            return Err(unable_to_write(
                path,
                io::Error::new(io::ErrorKind::Other, "target is a directory"),
            ))
        }
        Ok(metadata) if metadata.permissions().readonly() => {
            return Err(unable_to_write(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "target is read only"),
            ))
        }
        Ok(_) => return Ok(()),
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(unable_to_write(path, err)),
        Err(_) => (),
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let metadata = fs::metadata(parent)
        .await
        .map_err(|err| unable_to_write(path, err))?;

    if metadata.is_dir() {
        Ok(())
    } else {
        Err(unable_to_write(
            path,
            io::Error::new(io::ErrorKind::Other, "parent is not a directory"),
        ))
    }
}

pub(super) async fn create(path: &Path) -> Result<fs::File, Error> {
    fs::File::create(path)
        .await
        .map_err(|err| unable_to_write(path, err))
}

/// Open `path` for reading and return it with its length.
pub(super) async fn open(path: &Path) -> Result<(fs::File, u64), Error> {
    let file = fs::File::open(path)
        .await
        .map_err(|err| unable_to_read(path, err))?;

    let metadata = file
        .metadata()
        .await
        .map_err(|err| unable_to_read(path, err))?;

    if !metadata.is_file() {
        return Err(unable_to_read(
            path,
            io::Error::new(io::ErrorKind::Other, "source is not a regular file"),
        ));
    }

    Ok((file, metadata.len()))
}

/// Remove a partially written local file.
pub(super) async fn remove_partial(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => {
            warn!(path = %path.display(), error = %source, "failed to remove partial file");

            Err(Error::LocalIo {
                path: path.to_owned(),
                source,
            })
        }
    }
}

/// Spawn a task appending every chunk received to `file`.
///
/// Dropping the sender ends the task, which then flushes `file` and
/// returns the number of bytes written.
pub(super) fn spawn_writer(
    mut file: fs::File,
    path: PathBuf,
    queue_depth: usize,
) -> (mpsc::Sender<Bytes>, JoinHandle<Result<u64, Error>>) {
    let (tx, mut rx) = mpsc::channel::<Bytes>(queue_depth);

    let handle = spawn(async move {
        let local_io = |source: io::Error| Error::LocalIo {
            path: path.clone(),
            source,
        };

        let mut written = 0;

        while let Some(chunk) = rx.recv().await {
            file.write_all(&chunk).await.map_err(local_io)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(local_io)?;
        file.sync_all().await.map_err(local_io)?;

        Ok::<_, Error>(written)
    });

    (tx, handle)
}

/// Spawn a task reading `file` in chunks of at most `chunk_size` bytes.
///
/// The first read error is sent as the last item. Dropping the receiver
/// ends the task.
pub(super) fn spawn_reader(
    mut file: fs::File,
    path: PathBuf,
    chunk_size: usize,
    queue_depth: usize,
) -> (mpsc::Receiver<Result<Bytes, Error>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_depth);

    let handle = spawn(async move {
        loop {
            let mut buffer = BytesMut::with_capacity(chunk_size);

            let res = (&mut file)
                .take(chunk_size as u64)
                .read_buf(&mut buffer)
                .await;

            let item = match res {
                Ok(0) => break,
                Ok(_) => Ok(buffer.freeze()),
                Err(source) => Err(Error::LocalIo {
                    path: path.clone(),
                    source,
                }),
            };

            let failed = item.is_err();

            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    (rx, handle)
}
