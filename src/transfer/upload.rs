use super::{
    chain_cleanup, close_file, disk, with_cleanup, Halt, Progress, RemoteEntry,
};
use crate::{
    lowlevel::{OpenMode, RemoteFile, SftpChannel},
    retry::{Interrupted, Retry},
    session::SessionCore,
    Connector, Error,
};

use std::io;
use std::path::Path;

use bytes::Buf;
use tracing::{debug, warn};

impl<C: Connector> SessionCore<C> {
    /// Return the uploaded remote file and the number of bytes sent.
    pub(super) async fn upload(
        &mut self,
        remote_path: &str,
        local_path: &Path,
        mut progress: Progress,
    ) -> Result<(RemoteEntry, u64), Error> {
        let timeout = self.options.get_readiness_timeout();
        let chunk_size = self.options.get_chunk_size();
        let queue_depth = self.options.get_disk_queue_depth();
        let file_mode = self.options.get_file_mode();

        // Nothing remote is touched if the local side cannot be read.
        let (local_file, len) = disk::open(local_path).await?;
        progress.total = len;

        let cancel = progress.cancel.clone();
        let (socket, sftp) = self.ready()?;
        let retry = Retry::new(socket, timeout);
        let cancellable = retry.cancellable(&cancel);

        let mut file = cancellable
            .run(|| sftp.open_file(remote_path, OpenMode::WriteTruncate(file_mode)))
            .await
            .map_err(|err| err.into_error(Error::UnableToOpenFile))?;

        debug!(remote_path, total = progress.total, "upload started");

        let (mut chunks, reader) =
            disk::spawn_reader(local_file, local_path.to_owned(), chunk_size, queue_depth);

        let halt = 'transfer: loop {
            let mut chunk = match chunks.recv().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => break Halt::Failed(err),
                None => break Halt::Finished,
            };
            let n = chunk.len();

            // The remote side may accept less than a whole chunk per write.
            while chunk.has_remaining() {
                match cancellable.run(|| file.write(&chunk)).await {
                    Ok(0) => {
                        break 'transfer Halt::Failed(Error::SocketError(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "remote file accepted no data",
                        )))
                    }
                    Ok(written) => chunk.advance(written),
                    Err(Interrupted::Cancelled) => break 'transfer Halt::Cancelled,
                    Err(err) => {
                        break 'transfer Halt::Failed(err.into_error(Error::UnableToWriteFile))
                    }
                }
            }

            if let Some(halt) = progress.advance(n) {
                break halt;
            }
        };

        drop(chunks);
        let joined = reader
            .await
            .map_err(|_join_error| Error::BackgroundTaskFailure("disk reader task failed"));

        let res = match halt {
            Halt::Finished => match joined {
                Ok(()) => retry
                    .run(|| file.fstat())
                    .await
                    .map_err(|err| err.into_error(Error::UnableToStatFile)),
                Err(err) => Err(err),
            },
            Halt::Cancelled => Err(Error::CancelledByUser),
            Halt::Failed(err) => Err(err),
        };

        let res = chain_cleanup(res, close_file(&retry, &mut file).await);

        match res {
            Ok(stat) => Ok((RemoteEntry::new(remote_path.to_owned(), stat), progress.transferred)),
            Err(err) => {
                // Do not leave a truncated file behind.
                let removed = retry
                    .run(|| sftp.unlink(remote_path))
                    .await
                    .map_err(|err| err.into_error(Error::UnableToRemoveFile));

                if let Err(rm_err) = &removed {
                    warn!(remote_path, error = %rm_err, "failed to remove partial remote file");
                }

                Err(with_cleanup(err, removed))
            }
        }
    }
}
