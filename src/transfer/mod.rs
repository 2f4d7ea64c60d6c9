use super::{
    lowlevel::RemoteFile,
    retry::Retry,
    session::SessionCore,
    Connector, Error, RemoteEntry,
};

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod disk;
mod download;
mod upload;

/// Invoked with `(transferred, total)` after every chunk, return `false`
/// to cancel the transfer.
pub(super) type ProgressFn = Box<dyn FnMut(u64, u64) -> bool + Send>;

/// Direction of a transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Download,
    Upload,
}

/// A transfer waiting in the queue.
pub(super) struct TransferJob {
    pub(super) direction: Direction,
    pub(super) remote_path: String,
    pub(super) local_path: PathBuf,
    pub(super) progress: ProgressFn,
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    direction: Direction,
    entry: RemoteEntry,
    transferred: u64,
    started: SystemTime,
    finished: SystemTime,
}

impl TransferOutcome {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The remote file after the transfer.
    pub fn entry(&self) -> &RemoteEntry {
        &self.entry
    }

    pub fn into_entry(self) -> RemoteEntry {
        self.entry
    }

    /// Bytes moved, as reported to the last progress callback.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn started(&self) -> SystemTime {
        self.started
    }

    pub fn finished(&self) -> SystemTime {
        self.finished
    }
}

/// Where the chunk loop of a transfer stopped.
enum Halt {
    Finished,
    Cancelled,
    Failed(Error),
}

/// Per-transfer bookkeeping shared by both directions.
struct Progress {
    cancel: CancellationToken,
    callback: ProgressFn,
    transferred: u64,
    total: u64,
}

impl Progress {
    /// Account for `n` more bytes and report them.
    ///
    /// Return where the transfer has to stop, if it has to. A panicking
    /// callback fails the transfer instead of the session task.
    fn advance(&mut self, n: usize) -> Option<Halt> {
        self.transferred += n as u64;

        if self.cancel.is_cancelled() {
            return Some(Halt::Cancelled);
        }

        let (transferred, total) = (self.transferred, self.total);
        let callback = &mut self.callback;

        match panic::catch_unwind(AssertUnwindSafe(|| callback(transferred, total))) {
            Ok(true) => None,
            Ok(false) => {
                self.cancel.cancel();
                Some(Halt::Cancelled)
            }
            Err(_panic) => {
                error!(transferred, total, "progress callback panicked");

                Some(Halt::Failed(Error::BackgroundTaskFailure(
                    "progress callback panicked",
                )))
            }
        }
    }
}

/// Attach the failure of a cleanup step, if any, to `err`.
fn with_cleanup(err: Error, cleanup: Result<(), Error>) -> Error {
    match cleanup {
        Ok(()) => err,
        Err(cleanup_err) => err.error_on_cleanup(cleanup_err),
    }
}

/// Combine the result of a transfer with the result of a cleanup step
/// that ran after it.
fn chain_cleanup<T>(res: Result<T, Error>, cleanup: Result<(), Error>) -> Result<T, Error> {
    match (res, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(err), cleanup) => Err(with_cleanup(err, cleanup)),
    }
}

async fn close_file<F: RemoteFile>(retry: &Retry<'_>, file: &mut F) -> Result<(), Error> {
    retry
        .run(|| file.close())
        .await
        .map_err(|err| err.into_error(Error::UnableToCloseFile))
}

impl<C: Connector> SessionCore<C> {
    pub(super) async fn transfer(&mut self, job: TransferJob) -> Result<TransferOutcome, Error> {
        let cancel = CancellationToken::new();

        let auxiliary = Arc::clone(&self.auxiliary);
        auxiliary.begin_transfer(cancel.clone());
        let _active = scopeguard::guard(auxiliary, |auxiliary| auxiliary.end_transfer());

        let TransferJob {
            direction,
            remote_path,
            local_path,
            progress,
        } = job;

        let progress = Progress {
            cancel,
            callback: progress,
            transferred: 0,
            total: 0,
        };

        let started = SystemTime::now();

        let res = match direction {
            Direction::Download => self.download(&remote_path, &local_path, progress).await,
            Direction::Upload => self.upload(&remote_path, &local_path, progress).await,
        };

        match res {
            Ok((entry, transferred)) => {
                let finished = SystemTime::now();

                info!(
                    ?direction,
                    remote = %remote_path,
                    local = %local_path.display(),
                    bytes = transferred,
                    "transfer completed"
                );

                Ok(TransferOutcome {
                    direction,
                    entry,
                    transferred,
                    started,
                    finished,
                })
            }
            Err(err) => {
                warn!(
                    ?direction,
                    remote = %remote_path,
                    local = %local_path.display(),
                    error = %err,
                    "transfer failed"
                );

                Err(err)
            }
        }
    }
}
