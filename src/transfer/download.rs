use super::{
    chain_cleanup, close_file, disk, with_cleanup, Halt, Progress, RemoteEntry,
};
use crate::{
    lowlevel::{OpenMode, RemoteFile, SftpChannel},
    retry::{Interrupted, Retry},
    session::SessionCore,
    Connector, Error,
};

use std::path::Path;

use bytes::BytesMut;
use tracing::debug;

impl<C: Connector> SessionCore<C> {
    /// Return the downloaded remote file and the number of bytes written.
    pub(super) async fn download(
        &mut self,
        remote_path: &str,
        local_path: &Path,
        mut progress: Progress,
    ) -> Result<(RemoteEntry, u64), Error> {
        let timeout = self.options.get_readiness_timeout();
        let chunk_size = self.options.get_chunk_size();
        let queue_depth = self.options.get_disk_queue_depth();

        // Nothing remote is touched if the local side cannot be written.
        disk::check_writable(local_path).await?;

        let cancel = progress.cancel.clone();
        let (socket, sftp) = self.ready()?;
        let retry = Retry::new(socket, timeout);
        let cancellable = retry.cancellable(&cancel);

        let mut file = cancellable
            .run(|| sftp.open_file(remote_path, OpenMode::Read))
            .await
            .map_err(|err| err.into_error(Error::UnableToOpenFile))?;

        let stat = match cancellable.run(|| file.fstat()).await {
            Ok(stat) => stat,
            Err(err) => {
                let err = err.into_error(Error::UnableToStatFile);
                return Err(with_cleanup(err, close_file(&retry, &mut file).await));
            }
        };
        progress.total = stat.size.unwrap_or(0);

        let local_file = match disk::create(local_path).await {
            Ok(local_file) => local_file,
            Err(err) => return Err(with_cleanup(err, close_file(&retry, &mut file).await)),
        };

        debug!(remote_path, total = progress.total, "download started");

        let (chunks, writer) = disk::spawn_writer(local_file, local_path.to_owned(), queue_depth);

        let mut buffer = BytesMut::with_capacity(chunk_size);

        let halt = loop {
            buffer.resize(chunk_size, 0);

            let n = match cancellable.run(|| file.read(&mut buffer)).await {
                Ok(0) => break Halt::Finished,
                Ok(n) => n,
                Err(Interrupted::Cancelled) => break Halt::Cancelled,
                Err(err) => break Halt::Failed(err.into_error(Error::UnableToReadFile)),
            };

            if chunks.send(buffer.split_to(n).freeze()).await.is_err() {
                // The writer only stops early on error, which the join
                // below picks up.
                break Halt::Finished;
            }

            if let Some(halt) = progress.advance(n) {
                break halt;
            }
        };

        // Hand the queue over and wait for every queued chunk to hit the
        // disk before the transfer is reported.
        drop(chunks);
        let written = match writer.await {
            Ok(res) => res,
            Err(_join_error) => Err(Error::BackgroundTaskFailure("disk writer task failed")),
        };

        let res = match halt {
            Halt::Finished => written.map(|_| ()),
            Halt::Cancelled => Err(Error::CancelledByUser),
            Halt::Failed(err) => Err(err),
        };

        let res = chain_cleanup(res, close_file(&retry, &mut file).await);

        match res {
            Ok(()) => Ok((RemoteEntry::new(remote_path.to_owned(), stat), progress.transferred)),
            Err(err) => Err(with_cleanup(err, disk::remove_partial(local_path).await)),
        }
    }
}
