//! Async sftp client driving a single non-blocking ssh session.
//!
//! A [`Connection`] owns one session, bound to a tcp socket and driven by a
//! background task. All operations are queued and executed strictly one at a
//! time, in the order they were issued.
//!
//! The engine underneath never blocks: every primitive either completes,
//! fails, or reports which socket direction it is waiting on. The session
//! task then parks on socket readiness, bounded by
//! [`SessionOptions::readiness_timeout`], and calls the very same primitive
//! again.
//!
//! Transfers move the file in chunks. The local side of a transfer is
//! handled by a dedicated disk task, so slow disks never stall the session
//! beyond the bounded queue between the two.
//!
//! Cancelling a future returned by [`Connection`] does not cancel the
//! operation, it has already been queued and will still run. Use
//! [`Connection::cancel_transfer`] or the progress callback to stop a
//! transfer.
//!
//! With feature `ssh2` enabled, [`Ssh2Connector`] provides an engine backed
//! by libssh2.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use sftp_session_error::{EngineStatus, Error, ErrorKind, RecursiveError};
pub use sftp_session_lowlevel as lowlevel;

pub use lowlevel::Connector;

#[cfg(feature = "ssh2")]
pub use lowlevel::ssh2_engine::Ssh2Connector;

mod auxiliary;
use auxiliary::Auxiliary;
pub use auxiliary::SessionState;

mod options;
pub use options::{ConnectionConfig, SessionOptions};

mod unix_timestamp;
pub use unix_timestamp::UnixTimeStamp;

mod metadata;
pub use metadata::{FileType, Permissions, RemoteEntry};

mod retry;
mod session;
mod request;
mod tasks;

mod fs;

mod transfer;
pub use transfer::{Direction, TransferOutcome};

mod connection;
pub use connection::Connection;
