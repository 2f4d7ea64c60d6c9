#![allow(dead_code)]

pub use sftp_test_common::*;

use sftp_session::{Connection, ConnectionConfig, SessionOptions};

use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time;

pub const USERNAME: &str = "tester";
pub const PASSWORD: &str = "secret";

/// Options with a readiness timeout short enough for stalls to be cheap.
pub fn test_options() -> SessionOptions {
    SessionOptions::new().readiness_timeout(Duration::from_millis(50))
}

pub fn config(port: u16) -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1", USERNAME, PASSWORD).with_port(port)
}

/// A connection to a fresh loopback listener, not yet connected.
pub struct Harness {
    pub server: MockServer,
    pub conn: Connection,
    pub port: u16,
    listener: JoinHandle<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

pub async fn harness(server: MockServer, options: SessionOptions) -> Harness {
    let (port, listener) = spawn_listener().await;
    let conn = Connection::with_options(config(port), server.connector(), options);

    Harness {
        server,
        conn,
        port,
        listener,
    }
}

/// A connected [`Harness`] using [`test_options`].
pub async fn connected(server: MockServer) -> Harness {
    connected_with(server, test_options()).await
}

pub async fn connected_with(server: MockServer, options: SessionOptions) -> Harness {
    let harness = harness(server, options).await;
    harness.conn.connect().await.unwrap();
    harness
}

/// Poll `cond` until it holds, for at most a second.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }

    panic!("condition not met within a second");
}

/// A fresh directory for local files, removed on drop.
pub fn local_dir() -> TempDir {
    let root = get_path_for_tmp_files();
    std::fs::create_dir_all(&root).unwrap();

    tempfile::Builder::new()
        .prefix("transfer")
        .tempdir_in(root)
        .unwrap()
}

/// `len` bytes of recognisable, non-repeating-per-chunk content.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
