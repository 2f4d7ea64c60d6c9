mod common;
use common::*;

use sftp_session::{
    lowlevel::{BlockDirections, EngineStatus},
    Connection, ConnectionConfig, Connector, Error, ErrorKind, SessionState,
};

use std::net::TcpStream as StdTcpStream;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tokio::time;

use pretty_assertions::assert_eq;

#[tokio::test]
async fn connect_and_disconnect() {
    let h = harness(MockServer::new(), test_options()).await;

    assert_eq!(h.conn.state(), SessionState::Disconnected);
    assert!(!h.conn.is_connected());

    h.conn.connect().await.unwrap();

    assert_eq!(h.conn.state(), SessionState::Ready);
    assert!(h.conn.is_connected());
    assert_eq!(h.server.binds(), 1);

    h.conn.disconnect().await;

    assert_eq!(h.conn.state(), SessionState::Disconnected);
    assert!(!h.conn.is_connected());
}

#[tokio::test]
/// The sftp channel goes first, then the session, then the socket.
async fn teardown_order() {
    let h = connected(MockServer::new()).await;

    h.conn.disconnect().await;

    assert_eq!(
        h.server.events(),
        [
            "sftp.open",
            "sftp.shutdown",
            "sftp.drop",
            "transport.disconnect",
            "transport.drop",
        ]
    );
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let h = harness(MockServer::new(), test_options()).await;

    // Never connected.
    h.conn.disconnect().await;
    assert_eq!(h.conn.state(), SessionState::Disconnected);

    h.conn.connect().await.unwrap();
    h.conn.disconnect().await;
    h.conn.disconnect().await;

    assert_eq!(h.conn.state(), SessionState::Disconnected);
    assert_eq!(
        h.server
            .events()
            .iter()
            .filter(|event| **event == "transport.disconnect")
            .count(),
        1
    );
}

#[tokio::test]
async fn reconnect_after_disconnect() {
    let h = connected(MockServer::new()).await;

    h.conn.disconnect().await;
    h.conn.connect().await.unwrap();

    assert_eq!(h.conn.state(), SessionState::Ready);
    assert_eq!(h.server.binds(), 2);
}

#[tokio::test]
async fn invalid_arguments_are_rejected_up_front() {
    let server = MockServer::new();
    let (port, _listener) = spawn_listener().await;

    for config in [
        ConnectionConfig::new("", USERNAME, PASSWORD).with_port(port),
        ConnectionConfig::new("127.0.0.1", "", PASSWORD).with_port(port),
        ConnectionConfig::new("127.0.0.1", USERNAME, "").with_port(port),
        ConnectionConfig::new("127.0.0.1", USERNAME, PASSWORD).with_port(0),
    ] {
        let conn = Connection::new(config, server.connector());

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(conn.state(), SessionState::Disconnected);
    }

    assert_eq!(server.binds(), 0);
}

#[tokio::test]
async fn connect_twice() {
    let h = connected(MockServer::new()).await;

    let err = h.conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected), "{err:?}");

    // The existing session is untouched.
    assert_eq!(h.conn.state(), SessionState::Ready);
    assert_eq!(h.server.binds(), 1);
}

#[tokio::test]
async fn concurrent_connect() {
    let server = MockServer::new();
    server.stall_handshake(3);

    let h = harness(server, test_options()).await;

    let (first, second) = tokio::join!(h.conn.connect(), h.conn.connect());

    first.unwrap();
    let err = second.unwrap_err();
    assert!(matches!(err, Error::OperationInProgress), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::State);

    assert_eq!(h.server.binds(), 1);
}

#[tokio::test]
/// The socket is reported open as soon as tcp is up, long before the
/// session is usable.
async fn connected_while_authenticating() {
    let server = MockServer::new();
    server.stall_handshake(4);

    let h = harness(server, test_options()).await;

    let (res, (state, is_connected)) = tokio::join!(h.conn.connect(), async {
        time::sleep(Duration::from_millis(60)).await;
        (h.conn.state(), h.conn.is_connected())
    });

    res.unwrap();
    assert_eq!(state, SessionState::Authenticating);
    assert!(is_connected);
}

#[tokio::test]
async fn stalled_handshake_is_retried_after_timeouts() {
    let server = MockServer::new();
    server.stall_handshake(3);

    let h = connected(server).await;

    assert_eq!(h.conn.state(), SessionState::Ready);
    assert_eq!(h.server.would_block_count(), 3);
}

#[tokio::test]
async fn would_block_during_connect() {
    let server = MockServer::new();
    server.set_would_block(2, BlockDirections::Outbound);

    let h = connected(server).await;

    assert_eq!(h.conn.state(), SessionState::Ready);
    assert!(h.server.would_block_count() > 0);
}

#[tokio::test]
async fn connection_refused() {
    let port = refused_port().await;
    let server = MockServer::new();
    let conn = Connection::with_options(config(port), server.connector(), test_options());

    let err = conn.connect().await.unwrap_err();

    match &err {
        Error::UnableToConnect {
            host, port: dialed, ..
        } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(*dialed, port);
        }
        err => panic!("unexpected error {err:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!conn.is_connected());
    assert_eq!(conn.state(), SessionState::Disconnected);
    assert_eq!(server.binds(), 0);
}

#[tokio::test]
async fn bind_failure() {
    let server = MockServer::new();
    server.fail_bind(-6);

    let h = harness(server, test_options()).await;

    let err = h.conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::UnableToInitializeSession(_)), "{err:?}");
    assert_eq!(err.code(), Some(-6));
    assert_eq!(err.kind(), ErrorKind::Transport);

    assert!(!h.conn.is_connected());
    assert_eq!(h.conn.state(), SessionState::Disconnected);
    assert_eq!(h.server.binds(), 0);
}

/// Records what the handle reports while the session is being bound.
struct Observing {
    inner: MockConnector,
    conn: Arc<OnceLock<Weak<Connection>>>,
    seen: Arc<Mutex<Vec<(SessionState, bool)>>>,
}

impl Connector for Observing {
    type Transport = MockTransport;

    fn bind(&self, socket: StdTcpStream) -> Result<Self::Transport, EngineStatus> {
        if let Some(conn) = self.conn.get().and_then(Weak::upgrade) {
            self.seen
                .lock()
                .unwrap()
                .push((conn.state(), conn.is_connected()));
        }

        self.inner.bind(socket)
    }
}

#[tokio::test]
/// The state only leaves `Disconnected` together with the socket opening.
async fn socket_is_open_once_connecting() {
    let server = MockServer::new();
    let (port, _listener) = spawn_listener().await;

    let slot = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let conn = Arc::new(Connection::with_options(
        config(port),
        Observing {
            inner: server.connector(),
            conn: Arc::clone(&slot),
            seen: Arc::clone(&seen),
        },
        test_options(),
    ));
    slot.set(Arc::downgrade(&conn)).unwrap();

    conn.connect().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), [(SessionState::Connecting, true)]);
    assert_eq!(conn.state(), SessionState::Ready);
    assert!(conn.is_connected());
}

#[tokio::test]
async fn handshake_failure() {
    let server = MockServer::new();
    server.fail_handshake(LIBSSH2_ERROR_KEX_FAILURE);

    let h = harness(server, test_options()).await;

    let err = h.conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::HandshakeFailed(_)), "{err:?}");
    assert_eq!(err.code(), Some(LIBSSH2_ERROR_KEX_FAILURE));

    assert!(!h.conn.is_connected());
    assert_eq!(h.conn.state(), SessionState::Disconnected);
    assert_eq!(h.server.events(), ["transport.drop"]);
}

#[tokio::test]
async fn wrong_password() {
    let server = MockServer::new();
    server.set_password("something else");

    let h = harness(server, test_options()).await;

    let err = h.conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)), "{err:?}");
    assert_eq!(err.code(), Some(LIBSSH2_ERROR_AUTHENTICATION_FAILED));
    assert!(!h.conn.is_connected());

    // A failed connect does not prevent the next one.
    h.server.set_password(PASSWORD);
    h.conn.connect().await.unwrap();
}

#[tokio::test]
async fn keyboard_interactive_answers_first_prompt_only() {
    let server = MockServer::new();
    server
        .set_auth_methods("publickey,keyboard-interactive")
        .set_keyboard_prompts(3);

    let h = connected(server).await;

    assert_eq!(h.conn.state(), SessionState::Ready);
    assert_eq!(h.server.last_keyboard_responses(), [PASSWORD, "", ""]);
}

#[tokio::test]
async fn password_is_preferred_over_keyboard_interactive() {
    let server = MockServer::new();
    server.set_auth_methods("keyboard-interactive,password");

    let h = connected(server).await;

    assert!(h.server.last_keyboard_responses().is_empty());
}

#[tokio::test]
async fn no_supported_auth_method() {
    let server = MockServer::new();
    server.set_auth_methods("publickey,hostbased");

    let h = harness(server, test_options()).await;

    let err = h.conn.connect().await.unwrap_err();
    match &err {
        Error::NoSupportedAuthMethod { methods } => assert_eq!(methods, "publickey,hostbased"),
        err => panic!("unexpected error {err:?}"),
    }
    assert!(!h.conn.is_connected());
}

#[tokio::test]
async fn sftp_init_failure() {
    let server = MockServer::new();
    server.fail_sftp_init(-31);

    let h = harness(server, test_options()).await;

    let err = h.conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::UnableToInitializeSftp(_)), "{err:?}");
    assert_eq!(err.code(), Some(-31));
    assert_eq!(err.kind(), ErrorKind::SftpProtocol);
    assert!(!h.conn.is_connected());
    assert_eq!(h.conn.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn operations_require_a_session() {
    let h = harness(MockServer::new(), test_options()).await;

    let err = h.conn.list_files_in_directory("/").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected), "{err:?}");

    let err = h.conn.make_directory("/dir").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected), "{err:?}");

    // Arguments are checked before the state.
    let err = h.conn.remove_file("").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArguments(_)), "{err:?}");

    let err = h
        .conn
        .download_file("/a", "/tmp/a", |_, _| true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected), "{err:?}");
}

#[tokio::test]
async fn close_waits_for_teardown() {
    let server = MockServer::new();
    let (port, _listener) = spawn_listener().await;

    let conn = Connection::with_options(config(port), server.connector(), test_options());
    conn.connect().await.unwrap();

    conn.close().await.unwrap();

    assert_eq!(server.events().last(), Some(&"transport.drop"));
}

#[tokio::test]
async fn dropping_the_connection_tears_down() {
    let h = connected(MockServer::new()).await;
    let server = h.server.clone();

    drop(h);

    eventually(|| server.events().contains(&"transport.drop")).await;
    assert!(server.events().contains(&"sftp.shutdown"));
}
