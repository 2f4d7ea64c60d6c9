#![forbid(unsafe_code)]

use std::{fmt, io, path::PathBuf};

use thiserror::Error as ThisError;

/// Status reported by the transport engine for a failed primitive.
///
/// `code` is the engine's last-error code (negative for session errors,
/// positive sftp status codes for subsystem errors), `message` its
/// last-error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Underlying numeric code.
    pub code: i32,
    /// Human readable message, may be empty.
    pub message: String,
}

impl EngineStatus {
    /// Create a new status.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

/// Coarse classification of [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or invalid input, rejected before any work is scheduled.
    Argument,
    /// The connection is in the wrong state for the requested operation.
    State,
    /// Socket, session, handshake or authentication failure.
    Transport,
    /// A sftp subsystem primitive failed.
    SftpProtocol,
    /// The local file could not be opened, read, written or removed.
    LocalIo,
    /// The transfer was stopped by the progress callback or
    /// `cancel_transfer`.
    Cancelled,
}

/// Error returned by `sftp-session` and `sftp-session-lowlevel`.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum Error {
    /// A connect is already pending on this connection.
    #[error("Another connect operation is already in progress.")]
    OperationInProgress,

    /// An argument was empty or zero.
    #[error("Invalid arguments: {0}.")]
    InvalidArguments(&'static str),

    /// `connect` was called on a connection that already holds a socket.
    #[error("Already connected.")]
    AlreadyConnected,

    /// The tcp connection to the server could not be established.
    #[error("Unable to connect to {host}:{port}: {source}.")]
    UnableToConnect {
        /// Host that was dialed.
        host: String,
        /// Port that was dialed.
        port: u16,
        /// Error returned by the os.
        #[source]
        source: io::Error,
    },

    /// The transport engine refused to bind a session to the socket.
    #[error("Unable to initialize session: {0}.")]
    UnableToInitializeSession(EngineStatus),

    /// The ssh handshake failed.
    #[error("Handshake failed: {0}.")]
    HandshakeFailed(EngineStatus),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}.")]
    AuthenticationFailed(EngineStatus),

    /// The server offers neither password nor keyboard-interactive.
    #[error("No supported authentication method, server offers {methods:?}.")]
    NoSupportedAuthMethod {
        /// Comma separated list of methods offered by the server.
        methods: String,
    },

    /// The operation requires an authenticated session.
    #[error("Not connected.")]
    NotConnected,

    /// The sftp subsystem could not be started.
    #[error("Unable to initialize sftp subsystem: {0}.")]
    UnableToInitializeSftp(EngineStatus),

    /// Opening a remote directory failed.
    #[error("Unable to open directory: {0}.")]
    UnableToOpenDirectory(EngineStatus),

    /// Reading entries from a remote directory failed.
    #[error("Unable to read directory: {0}.")]
    UnableToReadDirectory(EngineStatus),

    /// Closing a remote directory handle failed.
    #[error("Unable to close directory: {0}.")]
    UnableToCloseDirectory(EngineStatus),

    /// Opening a remote file failed.
    #[error("Unable to open file: {0}.")]
    UnableToOpenFile(EngineStatus),

    /// Reading from a remote file failed.
    #[error("Unable to read file: {0}.")]
    UnableToReadFile(EngineStatus),

    /// Writing to a remote file failed.
    #[error("Unable to write file: {0}.")]
    UnableToWriteFile(EngineStatus),

    /// Closing a remote file handle failed.
    #[error("Unable to close file: {0}.")]
    UnableToCloseFile(EngineStatus),

    /// Querying attributes of a remote path failed.
    #[error("Unable to stat file: {0}.")]
    UnableToStatFile(EngineStatus),

    /// Creating a remote directory failed.
    #[error("Unable to make directory: {0}.")]
    UnableToMakeDirectory(EngineStatus),

    /// Removing a remote directory failed.
    #[error("Unable to remove directory: {0}.")]
    UnableToRemoveDirectory(EngineStatus),

    /// Removing a remote file failed.
    #[error("Unable to remove file: {0}.")]
    UnableToRemoveFile(EngineStatus),

    /// Renaming or moving a remote item failed.
    #[error("Unable to rename: {0}.")]
    UnableToRename(EngineStatus),

    /// The local download target cannot be created or written.
    #[error("Unable to open local file {path:?} for writing: {source}.")]
    UnableToOpenLocalFileForWriting {
        /// Local path.
        path: PathBuf,
        /// Underlying os error.
        #[source]
        source: io::Error,
    },

    /// The local upload source cannot be opened or stat'ed.
    #[error("Unable to open local file {path:?} for reading: {source}.")]
    UnableToOpenLocalFileForReading {
        /// Local path.
        path: PathBuf,
        /// Underlying os error.
        #[source]
        source: io::Error,
    },

    /// Local read, write, flush or removal failed mid-transfer.
    #[error("Local io on {path:?} failed: {source}.")]
    LocalIo {
        /// Local path.
        path: PathBuf,
        /// Underlying os error.
        #[source]
        source: io::Error,
    },

    /// The transfer was cancelled.
    #[error("Cancelled by user.")]
    CancelledByUser,

    /// Waiting for socket readiness failed.
    #[error("Socket error (Excluding `io::ErrorKind::WouldBlock`): {0}.")]
    SocketError(#[source] io::Error),

    /// The session task terminated, or a disk task or progress callback
    /// panicked.
    #[error("Background task failed: {0}.")]
    BackgroundTaskFailure(&'static str),

    /// Raised 2 errors when cleaning up.
    #[error(transparent)]
    RecursiveErrors(Box<RecursiveError>),
}

#[derive(Debug, ThisError)]
#[error("OriginalError: {original_error}, curr err raised when cleaning up: {occuring_error}.")]
pub struct RecursiveError {
    /// Original error
    pub original_error: Error,

    /// Current error raised when performing cleanup
    /// for original error.
    #[source]
    pub occuring_error: Error,
}

impl Error {
    /// Classify the error.
    ///
    /// For [`Error::RecursiveErrors`], the kind of the original error is
    /// returned.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;

        match self {
            InvalidArguments(_) => ErrorKind::Argument,

            OperationInProgress | AlreadyConnected | NotConnected | BackgroundTaskFailure(_) => {
                ErrorKind::State
            }

            UnableToConnect { .. }
            | UnableToInitializeSession(_)
            | HandshakeFailed(_)
            | AuthenticationFailed(_)
            | NoSupportedAuthMethod { .. }
            | SocketError(_) => ErrorKind::Transport,

            UnableToInitializeSftp(_)
            | UnableToOpenDirectory(_)
            | UnableToReadDirectory(_)
            | UnableToCloseDirectory(_)
            | UnableToOpenFile(_)
            | UnableToReadFile(_)
            | UnableToWriteFile(_)
            | UnableToCloseFile(_)
            | UnableToStatFile(_)
            | UnableToMakeDirectory(_)
            | UnableToRemoveDirectory(_)
            | UnableToRemoveFile(_)
            | UnableToRename(_) => ErrorKind::SftpProtocol,

            UnableToOpenLocalFileForWriting { .. }
            | UnableToOpenLocalFileForReading { .. }
            | LocalIo { .. } => ErrorKind::LocalIo,

            CancelledByUser => ErrorKind::Cancelled,

            RecursiveErrors(err) => err.original_error.kind(),
        }
    }

    /// Underlying engine or os error code, if there is one.
    pub fn code(&self) -> Option<i32> {
        use Error::*;

        match self {
            UnableToInitializeSession(status)
            | HandshakeFailed(status)
            | AuthenticationFailed(status)
            | UnableToInitializeSftp(status)
            | UnableToOpenDirectory(status)
            | UnableToReadDirectory(status)
            | UnableToCloseDirectory(status)
            | UnableToOpenFile(status)
            | UnableToReadFile(status)
            | UnableToWriteFile(status)
            | UnableToCloseFile(status)
            | UnableToStatFile(status)
            | UnableToMakeDirectory(status)
            | UnableToRemoveDirectory(status)
            | UnableToRemoveFile(status)
            | UnableToRename(status) => Some(status.code),

            UnableToConnect { source, .. }
            | UnableToOpenLocalFileForWriting { source, .. }
            | UnableToOpenLocalFileForReading { source, .. }
            | LocalIo { source, .. }
            | SocketError(source) => source.raw_os_error(),

            RecursiveErrors(err) => err.original_error.code(),

            _ => None,
        }
    }

    /// Chain `occuring_error`, raised while cleaning up after `self`.
    pub fn error_on_cleanup(self, occuring_error: Error) -> Self {
        Error::RecursiveErrors(Box::new(RecursiveError {
            original_error: self,
            occuring_error,
        }))
    }
}
