use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Lifecycle state of the session owned by a [`crate::Connection`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// No socket is open.
    Disconnected = 0,
    /// The socket is connected and the ssh session is being bound to it.
    ///
    /// While the tcp connection itself is still being established the
    /// state stays [`SessionState::Disconnected`].
    Connecting = 1,
    /// Handshake, authentication and sftp startup are in progress.
    Authenticating = 2,
    /// Authenticated with the sftp subsystem running.
    Ready = 3,
    /// A cancellation of the active transfer was requested and is being
    /// unwound. Returns to [`SessionState::Ready`] once the transfer
    /// resolved.
    Cancelling = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Authenticating,
            3 => SessionState::Ready,
            4 => SessionState::Cancelling,
            _ => SessionState::Disconnected,
        }
    }
}

/// State shared between the [`crate::Connection`] handle and its session
/// task.
///
/// Only the session task changes `state` and `socket_open`, the handle
/// reads them for the up-front checks.
#[derive(Debug)]
pub(super) struct Auxiliary {
    state: AtomicU8,
    socket_open: AtomicBool,

    /// Set while a connect request is queued or running.
    connect_pending: AtomicBool,

    /// Token of the transfer currently driven by the session task.
    active_transfer: Mutex<Option<CancellationToken>>,
}

impl Auxiliary {
    pub(super) fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            socket_open: AtomicBool::new(false),
            connect_pending: AtomicBool::new(false),
            active_transfer: Mutex::new(None),
        }
    }

    pub(super) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: SessionState) {
        let previous = self.state.swap(state as u8, Ordering::AcqRel);

        if previous != state as u8 {
            tracing::debug!(from = ?SessionState::from_u8(previous), to = ?state, "session state");
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(from = ?from, to = ?to, "session state");
        }
    }

    pub(super) fn is_socket_open(&self) -> bool {
        self.socket_open.load(Ordering::Acquire)
    }

    pub(super) fn set_socket_open(&self, open: bool) {
        self.socket_open.store(open, Ordering::Release);
    }

    pub(super) fn is_connect_pending(&self) -> bool {
        self.connect_pending.load(Ordering::Acquire)
    }

    /// Return `false` if another connect is already pending.
    pub(super) fn try_begin_connect(&self) -> bool {
        self.connect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(super) fn finish_connect(&self) {
        self.connect_pending.store(false, Ordering::Release);
    }

    fn lock_transfer(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.active_transfer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn begin_transfer(&self, token: CancellationToken) {
        *self.lock_transfer() = Some(token);
    }

    pub(super) fn end_transfer(&self) {
        let mut active = self.lock_transfer();
        *active = None;
        self.transition(SessionState::Cancelling, SessionState::Ready);
    }

    /// Cancel the active transfer, if any.
    ///
    /// Return `true` if there was one.
    pub(super) fn cancel_active_transfer(&self) -> bool {
        let active = self.lock_transfer();

        match &*active {
            Some(token) => {
                token.cancel();
                self.transition(SessionState::Ready, SessionState::Cancelling);
                true
            }
            None => false,
        }
    }
}
