use super::{transfer::TransferJob, Error, RemoteEntry, TransferOutcome};

use tokio::sync::oneshot;

pub(super) type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// Work queued for the session task, executed strictly in arrival order.
pub(super) enum Request {
    Connect(Reply<()>),
    Disconnect(oneshot::Sender<()>),
    ReadDir {
        path: String,
        reply: Reply<Vec<RemoteEntry>>,
    },
    CreateDir {
        path: String,
        reply: Reply<RemoteEntry>,
    },
    Rename {
        from: String,
        to: String,
        reply: Reply<RemoteEntry>,
    },
    RemoveFile {
        path: String,
        reply: Reply<()>,
    },
    RemoveDir {
        path: String,
        reply: Reply<()>,
    },
    Metadata {
        path: String,
        reply: Reply<RemoteEntry>,
    },
    Transfer {
        job: TransferJob,
        reply: Reply<TransferOutcome>,
    },
}
