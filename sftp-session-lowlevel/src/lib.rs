//! This crate defines the seam between `sftp-session` and the transport
//! engine that actually speaks ssh and sftp.
//!
//! The engine is a non-blocking state machine: every primitive either
//! completes, fails with an [`EngineStatus`], or returns
//! [`EngineError::WouldBlock`] carrying the socket direction it is waiting
//! on. Callers are expected to park on socket readiness and call the very
//! same primitive again.
//!
//! None of the primitives here are thread safe in the sense of being
//! callable concurrently: a [`Transport`] and everything obtained from it
//! must only be driven from one execution context at a time.
//!
//! With feature `ssh2` enabled, [`ssh2_engine::Ssh2Connector`] implements
//! the traits on top of libssh2.

#![forbid(unsafe_code)]

use std::net::TcpStream;

pub use sftp_session_error::{EngineStatus, Error};

mod stat;
pub use stat::{FileStat, OpenMode};

#[cfg(feature = "ssh2")]
pub mod ssh2_engine;

/// Default size of buffer for up/download in openssh-portable
pub const OPENSSH_PORTABLE_DEFAULT_COPY_BUFLEN: usize = 32768;

/// Auth method name for password authentication.
pub const AUTH_METHOD_PASSWORD: &str = "password";

/// Auth method name for keyboard-interactive authentication.
pub const AUTH_METHOD_KEYBOARD_INTERACTIVE: &str = "keyboard-interactive";

/// Socket direction(s) the engine needs before a blocked primitive can
/// make progress.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlockDirections {
    /// The engine did not report a direction.
    None,
    /// Waiting for the socket to become readable.
    Inbound,
    /// Waiting for the socket to become writable.
    Outbound,
    /// Waiting for either direction.
    Both,
}

/// Result of a single engine primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The would-block sentinel: no progress can be made without blocking.
    #[error("Operation would block on {0:?}.")]
    WouldBlock(BlockDirections),

    /// A real failure with the engine's last-error code and message.
    #[error("{0}")]
    Failed(EngineStatus),
}

impl EngineError {
    /// Shortcut for `EngineError::Failed(EngineStatus::new(code, message))`.
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        EngineError::Failed(EngineStatus::new(code, message))
    }

    /// Return `true` for the would-block sentinel.
    pub fn is_would_block(&self) -> bool {
        matches!(self, EngineError::WouldBlock(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Creates transport sessions bound to freshly connected sockets.
pub trait Connector: Send + Sync + 'static {
    /// The session type produced by this connector.
    type Transport: Transport;

    /// Bind a new session to `socket`.
    ///
    /// `socket` has already been switched to non-blocking mode and is owned
    /// by the session from now on. Binding does no socket I/O, so it cannot
    /// report would-block.
    fn bind(&self, socket: TcpStream) -> Result<Self::Transport, EngineStatus>;
}

/// A secure-channel session.
pub trait Transport: Send + 'static {
    /// The sftp subsystem type opened on this session.
    type Sftp: SftpChannel;

    /// Perform the ssh handshake.
    fn handshake(&mut self) -> EngineResult<()>;

    /// Query the comma separated list of authentication methods the server
    /// accepts for `username`.
    fn auth_methods(&mut self, username: &str) -> EngineResult<String>;

    /// Authenticate with a password.
    fn authenticate_password(&mut self, username: &str, password: &str) -> EngineResult<()>;

    /// Authenticate with keyboard-interactive.
    ///
    /// Implementations must answer the server's prompts with
    /// [`keyboard_interactive_responses`].
    fn authenticate_keyboard_interactive(
        &mut self,
        username: &str,
        password: &str,
    ) -> EngineResult<()>;

    /// Start the sftp subsystem.
    fn open_sftp(&mut self) -> EngineResult<Self::Sftp>;

    /// Send a disconnect message to the server.
    ///
    /// The session is freed when the value is dropped.
    fn disconnect(&mut self, description: &str) -> EngineResult<()>;
}

/// A started sftp subsystem.
///
/// Remote paths are plain `/` separated strings.
pub trait SftpChannel: Send + 'static {
    /// Remote file handle.
    type File: RemoteFile;
    /// Remote directory handle.
    type Dir: RemoteDir;

    fn open_dir(&mut self, path: &str) -> EngineResult<Self::Dir>;

    fn open_file(&mut self, path: &str, mode: OpenMode) -> EngineResult<Self::File>;

    fn stat(&mut self, path: &str) -> EngineResult<FileStat>;

    fn mkdir(&mut self, path: &str, mode: u32) -> EngineResult<()>;

    fn rmdir(&mut self, path: &str) -> EngineResult<()>;

    /// Atomically rename `from` to `to`, overwriting `to` if the server
    /// supports it.
    fn rename(&mut self, from: &str, to: &str) -> EngineResult<()>;

    fn unlink(&mut self, path: &str) -> EngineResult<()>;

    /// Shut the subsystem down.
    fn shutdown(&mut self) -> EngineResult<()>;
}

/// An open remote directory.
pub trait RemoteDir: Send + 'static {
    /// Read the next entry, `Ok(None)` once the directory is exhausted.
    ///
    /// Entries are returned as reported by the server, including `.` and
    /// `..`.
    fn read_entry(&mut self) -> EngineResult<Option<(String, FileStat)>>;

    fn close(&mut self) -> EngineResult<()>;
}

/// An open remote file.
pub trait RemoteFile: Send + 'static {
    /// Read into `buf`, `Ok(0)` on end of file.
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize>;

    /// Write from `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> EngineResult<usize>;

    fn fstat(&mut self) -> EngineResult<FileStat>;

    fn close(&mut self) -> EngineResult<()>;
}

/// Build the responses for a keyboard-interactive round.
///
/// Only the first prompt is answered with `password`, every other prompt
/// receives an empty response.
pub fn keyboard_interactive_responses(prompts: usize, password: &str) -> Vec<String> {
    (0..prompts)
        .map(|i| {
            if i == 0 {
                password.to_owned()
            } else {
                String::new()
            }
        })
        .collect()
}

/// Return `true` if `methods` (comma separated) contains `method`.
pub fn offers_auth_method(methods: &str, method: &str) -> bool {
    methods.split(',').any(|m| m.trim() == method)
}
