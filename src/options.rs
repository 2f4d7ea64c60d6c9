use super::lowlevel;

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use super::Error;

/// Options when creating [`super::Connection`].
#[derive(Debug, Copy, Clone, Default)]
pub struct SessionOptions {
    readiness_timeout: Option<Duration>,
    chunk_size: Option<NonZeroUsize>,
    disk_queue_depth: Option<NonZeroUsize>,
    directory_mode: Option<u32>,
    file_mode: Option<u32>,
}

impl SessionOptions {
    /// Create [`SessionOptions`] with default values.
    pub const fn new() -> Self {
        Self {
            readiness_timeout: None,
            chunk_size: None,
            disk_queue_depth: None,
            directory_mode: None,
            file_mode: None,
        }
    }

    /// Set `readiness_timeout`, the longest a single wait for socket
    /// readiness may last before the blocked primitive is attempted again.
    ///
    /// It does not bound the total duration of an operation: a blocked
    /// primitive is retried until it succeeds, fails or is cancelled.
    ///
    /// Default value is 10s.
    #[must_use]
    pub const fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = Some(timeout);
        self
    }

    pub(super) fn get_readiness_timeout(&self) -> Duration {
        self.readiness_timeout.unwrap_or(Duration::from_secs(10))
    }

    /// Set `chunk_size`, the number of bytes read from or written to the
    /// remote file per primitive call during transfers.
    ///
    /// Default value is [`lowlevel::OPENSSH_PORTABLE_DEFAULT_COPY_BUFLEN`].
    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub(super) fn get_chunk_size(&self) -> usize {
        self.chunk_size
            .map(NonZeroUsize::get)
            .unwrap_or(lowlevel::OPENSSH_PORTABLE_DEFAULT_COPY_BUFLEN)
    }

    /// Set `disk_queue_depth`, the number of chunks that may be in flight
    /// between the session task and the local disk task of a transfer.
    ///
    /// Default value is 8.
    #[must_use]
    pub const fn disk_queue_depth(mut self, depth: NonZeroUsize) -> Self {
        self.disk_queue_depth = Some(depth);
        self
    }

    pub(super) fn get_disk_queue_depth(&self) -> usize {
        self.disk_queue_depth.map(NonZeroUsize::get).unwrap_or(8)
    }

    /// Set permission bits of directories created by
    /// [`super::Connection::make_directory`].
    ///
    /// Default value is `0o755`.
    #[must_use]
    pub const fn directory_mode(mut self, mode: u32) -> Self {
        self.directory_mode = Some(mode);
        self
    }

    pub(super) fn get_directory_mode(&self) -> u32 {
        self.directory_mode.unwrap_or(0o755)
    }

    /// Set permission bits of remote files created by uploads.
    ///
    /// Default value is `0o644`.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    pub(super) fn get_file_mode(&self) -> u32 {
        self.file_mode.unwrap_or(0o644)
    }
}

/// Where and as whom to connect.
#[derive(Clone)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl ConnectionConfig {
    /// Port used unless [`ConnectionConfig::with_port`] says otherwise.
    pub const DEFAULT_PORT: u16 = 22;

    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(super) fn password(&self) -> &str {
        &self.password
    }

    pub(super) fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            Err(Error::InvalidArguments("host is empty"))
        } else if self.port == 0 {
            Err(Error::InvalidArguments("port is zero"))
        } else if self.username.is_empty() {
            Err(Error::InvalidArguments("username is empty"))
        } else if self.password.is_empty() {
            Err(Error::InvalidArguments("password is empty"))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = SessionOptions::new();

        assert_eq!(options.get_readiness_timeout(), Duration::from_secs(10));
        assert_eq!(options.get_chunk_size(), 32768);
        assert_eq!(options.get_disk_queue_depth(), 8);
        assert_eq!(options.get_directory_mode(), 0o755);
        assert_eq!(options.get_file_mode(), 0o644);

        assert_eq!(ConnectionConfig::new("h", "u", "p").port(), 22);
    }

    #[test]
    fn config_debug_redacts_password() {
        let config = ConnectionConfig::new("example.com", "alice", "hunter2");

        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn config_validation() {
        for config in [
            ConnectionConfig::new("", "u", "p"),
            ConnectionConfig::new("h", "", "p"),
            ConnectionConfig::new("h", "u", ""),
            ConnectionConfig::new("h", "u", "p").with_port(0),
        ] {
            assert!(matches!(config.validate(), Err(Error::InvalidArguments(_))));
        }

        assert!(ConnectionConfig::new("h", "u", "p").validate().is_ok());
    }
}
