//! Directory and path operations run by the session task.

use super::{
    lowlevel::{RemoteDir, SftpChannel},
    retry::{Interrupted, Retry},
    session::SessionCore,
    Connector, Error, RemoteEntry,
};

use tracing::debug;

impl<C: Connector> SessionCore<C> {
    pub(super) async fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, Error> {
        let timeout = self.options.get_readiness_timeout();
        let (socket, sftp) = self.ready()?;
        let retry = Retry::new(socket, timeout);

        let mut dir = retry
            .run(|| sftp.open_dir(path))
            .await
            .map_err(|err| err.into_error(Error::UnableToOpenDirectory))?;

        let mut entries = Vec::new();

        let res: Result<(), Interrupted> = loop {
            match retry.run(|| dir.read_entry()).await {
                Ok(Some((name, _stat))) if name == "." || name == ".." => (),
                Ok(Some((name, stat))) => {
                    entries.push(RemoteEntry::in_directory(path, &name, stat))
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        let closed = retry.run(|| dir.close()).await;

        match (res, closed) {
            (Ok(()), Ok(())) => (),
            (Ok(()), Err(close_err)) => {
                return Err(close_err.into_error(Error::UnableToCloseDirectory))
            }
            (Err(read_err), Ok(())) => {
                return Err(read_err.into_error(Error::UnableToReadDirectory))
            }
            (Err(read_err), Err(close_err)) => {
                return Err(read_err
                    .into_error(Error::UnableToReadDirectory)
                    .error_on_cleanup(close_err.into_error(Error::UnableToCloseDirectory)))
            }
        }

        entries.sort_unstable_by(|x, y| x.path().cmp(y.path()));

        debug!(path, entries = entries.len(), "listed directory");

        Ok(entries)
    }

    pub(super) async fn create_dir(&mut self, path: &str) -> Result<RemoteEntry, Error> {
        let timeout = self.options.get_readiness_timeout();
        let mode = self.options.get_directory_mode();
        let (socket, sftp) = self.ready()?;
        let retry = Retry::new(socket, timeout);

        retry
            .run(|| sftp.mkdir(path, mode))
            .await
            .map_err(|err| err.into_error(Error::UnableToMakeDirectory))?;

        let stat = retry
            .run(|| sftp.stat(path))
            .await
            .map_err(|err| err.into_error(Error::UnableToStatFile))?;

        debug!(path, mode, "created directory");

        Ok(RemoteEntry::new(path.to_owned(), stat))
    }

    pub(super) async fn rename(&mut self, from: &str, to: &str) -> Result<RemoteEntry, Error> {
        let timeout = self.options.get_readiness_timeout();
        let (socket, sftp) = self.ready()?;
        let retry = Retry::new(socket, timeout);

        retry
            .run(|| sftp.rename(from, to))
            .await
            .map_err(|err| err.into_error(Error::UnableToRename))?;

        let stat = retry
            .run(|| sftp.stat(to))
            .await
            .map_err(|err| err.into_error(Error::UnableToStatFile))?;

        debug!(from, to, "renamed");

        Ok(RemoteEntry::new(to.to_owned(), stat))
    }

    pub(super) async fn remove_file(&mut self, path: &str) -> Result<(), Error> {
        let timeout = self.options.get_readiness_timeout();
        let (socket, sftp) = self.ready()?;

        Retry::new(socket, timeout)
            .run(|| sftp.unlink(path))
            .await
            .map_err(|err| err.into_error(Error::UnableToRemoveFile))
    }

    pub(super) async fn remove_dir(&mut self, path: &str) -> Result<(), Error> {
        let timeout = self.options.get_readiness_timeout();
        let (socket, sftp) = self.ready()?;

        Retry::new(socket, timeout)
            .run(|| sftp.rmdir(path))
            .await
            .map_err(|err| err.into_error(Error::UnableToRemoveDirectory))
    }

    pub(super) async fn metadata(&mut self, path: &str) -> Result<RemoteEntry, Error> {
        let timeout = self.options.get_readiness_timeout();
        let (socket, sftp) = self.ready()?;

        let stat = Retry::new(socket, timeout)
            .run(|| sftp.stat(path))
            .await
            .map_err(|err| err.into_error(Error::UnableToStatFile))?;

        Ok(RemoteEntry::new(path.to_owned(), stat))
    }
}
