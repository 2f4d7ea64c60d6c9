use super::{
    auxiliary::Auxiliary,
    request::{Reply, Request},
    session::SessionCore,
    tasks::create_session_task,
    transfer::{Direction, TransferJob},
    ConnectionConfig, Connector, Error, RemoteEntry, SessionOptions, SessionState,
    TransferOutcome,
};

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

fn task_terminated() -> Error {
    Error::BackgroundTaskFailure("session task terminated")
}

fn non_empty<'a>(value: &'a str, what: &'static str) -> Result<&'a str, Error> {
    if value.is_empty() {
        Err(Error::InvalidArguments(what))
    } else {
        Ok(value)
    }
}

/// A single sftp session to a remote host.
///
/// Every operation is queued for one background task owning the session,
/// which runs them strictly one at a time in the order they were issued.
/// Each returned future resolves exactly once, on the caller's task.
///
/// Argument and state errors are returned before anything is queued.
///
/// Dropping a [`Connection`] cancels the active transfer and tears the
/// session down once the already queued operations have run.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    auxiliary: Arc<Auxiliary>,
    requests: mpsc::UnboundedSender<Request>,
    session_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Create a disconnected [`Connection`] using `connector` as the
    /// transport engine.
    ///
    /// # Panics
    ///
    /// If called outside of a tokio runtime.
    pub fn new<C: Connector>(config: ConnectionConfig, connector: C) -> Self {
        Self::with_options(config, connector, SessionOptions::new())
    }

    /// Same as [`Connection::new`] with non-default options.
    ///
    /// # Panics
    ///
    /// If called outside of a tokio runtime.
    pub fn with_options<C: Connector>(
        config: ConnectionConfig,
        connector: C,
        options: SessionOptions,
    ) -> Self {
        let auxiliary = Arc::new(Auxiliary::new());
        let (requests, rx) = mpsc::unbounded_channel();

        let core = SessionCore::new(connector, config.clone(), options, Arc::clone(&auxiliary));
        let session_task = create_session_task(core, rx);

        Self {
            config,
            auxiliary,
            requests,
            session_task: Some(session_task),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current state of the session.
    pub fn state(&self) -> SessionState {
        self.auxiliary.state()
    }

    /// Return `true` while a socket is open, regardless of whether
    /// authentication has completed.
    pub fn is_connected(&self) -> bool {
        self.auxiliary.is_socket_open()
    }

    fn enqueue(&self, request: Request) -> Result<(), Error> {
        self.requests.send(request).map_err(|_| task_terminated())
    }

    async fn submit<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(request(tx))?;

        rx.await.map_err(|_| task_terminated())?
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        match self.state() {
            SessionState::Ready | SessionState::Cancelling => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Connect, handshake, authenticate and start the sftp subsystem.
    ///
    /// Password authentication is preferred, keyboard-interactive is used
    /// if it is the only supported method offered. The server's host key
    /// is not verified.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.auxiliary.is_connect_pending() {
            return Err(Error::OperationInProgress);
        }

        self.config.validate()?;

        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        if !self.auxiliary.try_begin_connect() {
            return Err(Error::OperationInProgress);
        }

        let (tx, rx) = oneshot::channel();

        if let Err(err) = self.enqueue(Request::Connect(tx)) {
            self.auxiliary.finish_connect();
            return Err(err);
        }

        rx.await.map_err(|_| task_terminated())?
    }

    /// Shut down the sftp subsystem, disconnect the session and close the
    /// socket.
    ///
    /// An active transfer is cancelled first. Calling this on a
    /// disconnected [`Connection`] does nothing.
    pub async fn disconnect(&self) {
        self.cancel_transfer();

        let (tx, rx) = oneshot::channel();

        if self.requests.send(Request::Disconnect(tx)).is_ok() {
            // The task only goes away once the session is torn down.
            let _ = rx.await;
        }
    }

    /// Disconnect and wait for the session task to exit.
    pub async fn close(mut self) -> Result<(), Error> {
        self.disconnect().await;

        let session_task = self.session_task.take();
        drop(self);

        match session_task {
            Some(session_task) => session_task
                .await
                .map_err(|_join_error| Error::BackgroundTaskFailure("session task panicked")),
            None => Ok(()),
        }
    }

    /// List the entries of the remote directory `path`, sorted by path.
    ///
    /// `.` and `..` are not included.
    pub async fn list_files_in_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, Error> {
        let path = non_empty(path, "path is empty")?.to_owned();
        self.ensure_ready()?;

        self.submit(|reply| Request::ReadDir { path, reply }).await
    }

    /// Create the remote directory `path`.
    pub async fn make_directory(&self, path: &str) -> Result<RemoteEntry, Error> {
        let path = non_empty(path, "path is empty")?.to_owned();
        self.ensure_ready()?;

        self.submit(|reply| Request::CreateDir { path, reply }).await
    }

    /// Rename or move `from` to `to`.
    pub async fn rename_or_move_item(&self, from: &str, to: &str) -> Result<RemoteEntry, Error> {
        let from = non_empty(from, "source path is empty")?.to_owned();
        let to = non_empty(to, "destination path is empty")?.to_owned();
        self.ensure_ready()?;

        self.submit(|reply| Request::Rename { from, to, reply }).await
    }

    /// Remove the remote file `path`.
    pub async fn remove_file(&self, path: &str) -> Result<(), Error> {
        let path = non_empty(path, "path is empty")?.to_owned();
        self.ensure_ready()?;

        self.submit(|reply| Request::RemoveFile { path, reply }).await
    }

    /// Remove the empty remote directory `path`.
    pub async fn remove_directory(&self, path: &str) -> Result<(), Error> {
        let path = non_empty(path, "path is empty")?.to_owned();
        self.ensure_ready()?;

        self.submit(|reply| Request::RemoveDir { path, reply }).await
    }

    /// Query the attributes of `path`, following symlinks.
    pub async fn metadata(&self, path: &str) -> Result<RemoteEntry, Error> {
        let path = non_empty(path, "path is empty")?.to_owned();
        self.ensure_ready()?;

        self.submit(|reply| Request::Metadata { path, reply }).await
    }

    async fn transfer(
        &self,
        direction: Direction,
        remote_path: &str,
        local_path: &Path,
        progress: impl FnMut(u64, u64) -> bool + Send + 'static,
    ) -> Result<TransferOutcome, Error> {
        let remote_path = non_empty(remote_path, "remote path is empty")?.to_owned();

        if local_path.as_os_str().is_empty() {
            return Err(Error::InvalidArguments("local path is empty"));
        }

        self.ensure_ready()?;

        let job = TransferJob {
            direction,
            remote_path,
            local_path: local_path.to_owned(),
            progress: Box::new(progress),
        };

        self.submit(|reply| Request::Transfer { job, reply }).await
    }

    /// Download `remote_path` into `local_path`, replacing it.
    ///
    /// `progress` is called with `(transferred, total)` after every chunk
    /// has been queued for the disk, returning `false` cancels the
    /// download. It runs on the session task and must not block.
    ///
    /// On failure the partially written local file is removed.
    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
        progress: impl FnMut(u64, u64) -> bool + Send + 'static,
    ) -> Result<TransferOutcome, Error> {
        self.transfer(Direction::Download, remote_path, local_path.as_ref(), progress)
            .await
    }

    /// Upload `local_path` to `remote_path`, replacing it.
    ///
    /// `progress` is called with `(transferred, total)` after every chunk
    /// has been written remotely, returning `false` cancels the upload. It
    /// runs on the session task and must not block.
    ///
    /// On failure or cancellation the partially written remote file is
    /// removed.
    pub async fn upload_file(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
        progress: impl FnMut(u64, u64) -> bool + Send + 'static,
    ) -> Result<TransferOutcome, Error> {
        self.transfer(Direction::Upload, remote_path, local_path.as_ref(), progress)
            .await
    }

    /// Request cancellation of the transfer currently running, if any.
    ///
    /// Cancellation is cooperative: the transfer stops at its next wait or
    /// chunk boundary and then fails with [`Error::CancelledByUser`].
    /// Transfers still waiting in the queue are not affected.
    pub fn cancel_transfer(&self) {
        if self.auxiliary.cancel_active_transfer() {
            tracing::info!("transfer cancellation requested");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Dropping `requests` lets the session task drain the queue and
        // tear the session down on its own.
        self.cancel_transfer();
    }
}
