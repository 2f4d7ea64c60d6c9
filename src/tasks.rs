use super::{request::Request, session::SessionCore, Connector, SessionState};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{spawn, JoinHandle};
use tracing::debug;

/// Resolve `reply`, ignoring callers that stopped waiting.
fn resolve<T>(reply: oneshot::Sender<T>, value: T) {
    // The caller's future was dropped, nobody is interested in the result.
    let _ = reply.send(value);
}

impl<C: Connector> SessionCore<C> {
    async fn handle(&mut self, request: Request) {
        match request {
            Request::Connect(reply) => {
                let res = self.connect().await;
                self.auxiliary.finish_connect();
                resolve(reply, res);
            }
            Request::Disconnect(reply) => {
                self.teardown().await;
                resolve(reply, ());
            }
            Request::ReadDir { path, reply } => {
                let res = self.read_dir(&path).await;
                resolve(reply, res);
            }
            Request::CreateDir { path, reply } => {
                let res = self.create_dir(&path).await;
                resolve(reply, res);
            }
            Request::Rename { from, to, reply } => {
                let res = self.rename(&from, &to).await;
                resolve(reply, res);
            }
            Request::RemoveFile { path, reply } => {
                let res = self.remove_file(&path).await;
                resolve(reply, res);
            }
            Request::RemoveDir { path, reply } => {
                let res = self.remove_dir(&path).await;
                resolve(reply, res);
            }
            Request::Metadata { path, reply } => {
                let res = self.metadata(&path).await;
                resolve(reply, res);
            }
            Request::Transfer { job, reply } => {
                let res = self.transfer(job).await;
                resolve(reply, res);
            }
        }
    }
}

/// Spawn the task that owns the session and runs `requests` one at a
/// time.
///
/// Once every sender is dropped, the queued requests are still run and the
/// session is torn down before the task exits.
pub(super) fn create_session_task<C: Connector>(
    mut core: SessionCore<C>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) -> JoinHandle<()> {
    spawn(async move {
        // However the task ends, the session ends with it. A panic drops it
        // without teardown.
        let _ended = scopeguard::guard(Arc::clone(&core.auxiliary), |auxiliary| {
            auxiliary.set_socket_open(false);
            auxiliary.set_state(SessionState::Disconnected);
            auxiliary.finish_connect();
        });

        while let Some(request) = requests.recv().await {
            core.handle(request).await;
        }

        debug!("connection dropped, tearing down session");

        core.teardown().await;
    })
}
