use super::{
    lowlevel::{BlockDirections, EngineError, EngineResult, EngineStatus},
    Error,
};

use std::io;
use std::time::Duration;

use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Why [`Retry::run`] stopped without a value.
#[derive(Debug)]
pub(super) enum Interrupted {
    /// The primitive itself failed.
    Engine(EngineStatus),
    /// The transfer this primitive belongs to was cancelled.
    Cancelled,
    /// Waiting on the socket failed.
    Socket(io::Error),
    /// The primitive was still blocked after the allowed number of waits.
    Exhausted,
}

impl Interrupted {
    /// Convert into [`Error`], using `on_engine` for failures reported by
    /// the engine.
    pub(super) fn into_error(self, on_engine: impl FnOnce(EngineStatus) -> Error) -> Error {
        match self {
            Interrupted::Engine(status) => on_engine(status),
            Interrupted::Cancelled => Error::CancelledByUser,
            Interrupted::Socket(err) => Error::SocketError(err),
            Interrupted::Exhausted => Error::SocketError(io::Error::new(
                io::ErrorKind::TimedOut,
                "peer did not become ready",
            )),
        }
    }
}

fn interest_for(directions: BlockDirections) -> Interest {
    match directions {
        BlockDirections::Inbound => Interest::READABLE,
        BlockDirections::Outbound => Interest::WRITABLE,
        // Nothing reported, wait for whichever comes first.
        BlockDirections::None | BlockDirections::Both => Interest::READABLE | Interest::WRITABLE,
    }
}

/// Drives a non-blocking engine primitive to completion.
///
/// The primitive is attempted once. While it reports would-block, the
/// socket is awaited in the reported directions for at most `timeout` and
/// the primitive attempted again, whether the wait ended in readiness or
/// in a timeout.
#[derive(Debug, Copy, Clone)]
pub(super) struct Retry<'a> {
    socket: &'a TcpStream,
    timeout: Duration,
    cancel: Option<&'a CancellationToken>,
    max_waits: Option<usize>,
}

impl<'a> Retry<'a> {
    pub(super) fn new(socket: &'a TcpStream, timeout: Duration) -> Self {
        Self {
            socket,
            timeout,
            cancel: None,
            max_waits: None,
        }
    }

    /// Stop with [`Interrupted::Cancelled`] once `token` is cancelled.
    ///
    /// It is checked before every wait and raced against the wait itself.
    #[must_use]
    pub(super) fn cancellable(self, token: &'a CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self
        }
    }

    /// Stop with [`Interrupted::Exhausted`] after `max_waits` waits.
    #[must_use]
    pub(super) fn bounded(self, max_waits: usize) -> Self {
        Self {
            max_waits: Some(max_waits),
            ..self
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.map_or(false, CancellationToken::is_cancelled)
    }

    /// Return `true` if the socket became ready, `false` on timeout.
    async fn wait(&self, interest: Interest) -> Result<bool, Interrupted> {
        let ready = time::timeout(self.timeout, self.socket.ready(interest));

        let res = match self.cancel {
            Some(token) => tokio::select! {
                biased;

                _ = token.cancelled() => return Err(Interrupted::Cancelled),
                res = ready => res,
            },
            None => ready.await,
        };

        match res {
            Ok(Ok(_ready)) => Ok(true),
            Ok(Err(err)) => Err(Interrupted::Socket(err)),
            Err(_elapsed) => Ok(false),
        }
    }

    pub(super) async fn run<T, F>(&self, mut op: F) -> Result<T, Interrupted>
    where
        F: FnMut() -> EngineResult<T>,
    {
        let mut directions = match op() {
            Ok(value) => return Ok(value),
            Err(EngineError::WouldBlock(directions)) => directions,
            Err(EngineError::Failed(status)) => return Err(Interrupted::Engine(status)),
        };

        let mut waits = 0;

        loop {
            if self.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }

            if self.max_waits.map_or(false, |max_waits| waits >= max_waits) {
                return Err(Interrupted::Exhausted);
            }
            waits += 1;

            let interest = interest_for(directions);

            let res = if self.wait(interest).await? {
                // Run the primitive through `try_io` so that a would-block
                // clears the readiness it consumed and the next wait parks.
                let mut blocked_on = None;
                let attempt = self.socket.try_io(interest, || match op() {
                    Err(EngineError::WouldBlock(directions)) => {
                        blocked_on = Some(directions);
                        Err(io::ErrorKind::WouldBlock.into())
                    }
                    res => Ok(res),
                });

                match attempt {
                    Ok(res) => res,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        // Either the primitive blocked again or the
                        // readiness was spurious and it did not run.
                        if let Some(blocked_on) = blocked_on {
                            directions = blocked_on;
                        }
                        continue;
                    }
                    Err(err) => return Err(Interrupted::Socket(err)),
                }
            } else {
                op()
            };

            match res {
                Ok(value) => return Ok(value),
                Err(EngineError::WouldBlock(blocked_on)) => directions = blocked_on,
                Err(EngineError::Failed(status)) => return Err(Interrupted::Engine(status)),
            }
        }
    }
}
