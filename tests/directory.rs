mod common;
use common::*;

use sftp_session::{lowlevel::BlockDirections, Error, ErrorKind, UnixTimeStamp};

use pretty_assertions::assert_eq;

fn populated() -> MockServer {
    let server = MockServer::new();
    server
        .add_dir("/base")
        .add_file("/base/b.txt", "bbbb")
        .add_file("/base/a.txt", "a")
        .add_dir("/base/sub")
        .add_file("/base/sub/nested", "nested");
    server
}

fn paths(entries: &[sftp_session::RemoteEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.path()).collect()
}

#[tokio::test]
async fn list_is_sorted_without_dot_entries() {
    let h = connected(populated()).await;

    let entries = h.conn.list_files_in_directory("/base").await.unwrap();

    assert_eq!(paths(&entries), ["/base/a.txt", "/base/b.txt", "/base/sub"]);

    let names: Vec<_> = entries.iter().map(|entry| entry.name()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "sub"]);

    assert_eq!(entries[1].len(), 4);
    assert!(entries[1].is_file());
    assert!(entries[2].is_dir());
    assert_eq!(entries[0].uid(), Some(MOCK_UID));
    assert_eq!(entries[0].gid(), Some(MOCK_GID));
    assert_eq!(entries[0].modified(), Some(UnixTimeStamp::from_raw(MOCK_MTIME)));

    assert_eq!(h.server.open_handles(), 0);
}

#[tokio::test]
async fn list_root_and_nested() {
    let h = connected(populated()).await;

    let entries = h.conn.list_files_in_directory("/").await.unwrap();
    assert_eq!(paths(&entries), ["/base"]);

    let entries = h.conn.list_files_in_directory("/base/sub").await.unwrap();
    assert_eq!(paths(&entries), ["/base/sub/nested"]);
}

#[tokio::test]
async fn list_empty_directory() {
    let server = MockServer::new();
    server.add_dir("/empty");

    let h = connected(server).await;

    assert!(h
        .conn
        .list_files_in_directory("/empty")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn list_missing_directory() {
    let h = connected(populated()).await;

    let err = h
        .conn
        .list_files_in_directory("/missing")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnableToOpenDirectory(_)), "{err:?}");
    assert_eq!(err.code(), Some(SSH_FX_NO_SUCH_FILE));
    assert_eq!(err.kind(), ErrorKind::SftpProtocol);
}

#[tokio::test]
/// A failed read still closes the directory handle.
async fn list_read_failure_closes_handle() {
    let server = populated();
    server.fail_readdir(SSH_FX_FAILURE);

    let h = connected(server).await;

    let err = h.conn.list_files_in_directory("/base").await.unwrap_err();

    assert!(matches!(err, Error::UnableToReadDirectory(_)), "{err:?}");
    assert_eq!(err.code(), Some(SSH_FX_FAILURE));
    assert_eq!(h.server.open_handles(), 0);
}

#[tokio::test]
async fn list_with_would_block() {
    let server = populated();
    server.set_would_block(3, BlockDirections::Outbound);

    let h = connected(server).await;

    let entries = h.conn.list_files_in_directory("/base").await.unwrap();

    assert_eq!(paths(&entries), ["/base/a.txt", "/base/b.txt", "/base/sub"]);
    assert!(h.server.would_block_count() > 0);
}

#[tokio::test]
async fn make_directory() {
    let h = connected(populated()).await;

    let entry = h.conn.make_directory("/base/new").await.unwrap();

    assert_eq!(entry.path(), "/base/new");
    assert_eq!(entry.name(), "new");
    assert!(entry.is_dir());
    assert_eq!(entry.permissions().unwrap().bits(), 0o755);
    assert_eq!(h.server.mode("/base/new"), Some(0o755));

    let err = h.conn.make_directory("/base/new").await.unwrap_err();
    assert!(matches!(err, Error::UnableToMakeDirectory(_)), "{err:?}");
    assert_eq!(err.code(), Some(SSH_FX_FAILURE));
}

#[tokio::test]
async fn make_directory_with_custom_mode() {
    let h = connected_with(populated(), test_options().directory_mode(0o700)).await;

    h.conn.make_directory("/base/private").await.unwrap();

    assert_eq!(h.server.mode("/base/private"), Some(0o700));
}

#[tokio::test]
async fn rename_or_move_item() {
    let h = connected(populated()).await;

    let entry = h
        .conn
        .rename_or_move_item("/base/a.txt", "/base/sub/moved.txt")
        .await
        .unwrap();

    assert_eq!(entry.path(), "/base/sub/moved.txt");
    assert_eq!(entry.len(), 1);
    assert!(!h.server.exists("/base/a.txt"));
    assert_eq!(h.server.file("/base/sub/moved.txt").unwrap(), b"a");

    let err = h
        .conn
        .rename_or_move_item("/base/a.txt", "/base/c.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnableToRename(_)), "{err:?}");
    assert_eq!(err.code(), Some(SSH_FX_NO_SUCH_FILE));
}

#[tokio::test]
async fn remove_file_and_directory() {
    let h = connected(populated()).await;

    h.conn.remove_file("/base/sub/nested").await.unwrap();
    assert!(!h.server.exists("/base/sub/nested"));

    h.conn.remove_directory("/base/sub").await.unwrap();
    assert!(!h.server.exists("/base/sub"));

    let err = h.conn.remove_file("/base/sub/nested").await.unwrap_err();
    assert!(matches!(err, Error::UnableToRemoveFile(_)), "{err:?}");

    // Not empty.
    let err = h.conn.remove_directory("/base").await.unwrap_err();
    assert!(matches!(err, Error::UnableToRemoveDirectory(_)), "{err:?}");
    assert!(h.server.exists("/base"));
}

#[tokio::test]
async fn metadata() {
    let h = connected(populated()).await;

    let entry = h.conn.metadata("/base/b.txt").await.unwrap();
    assert_eq!(entry.path(), "/base/b.txt");
    assert_eq!(entry.len(), 4);
    assert_eq!(entry.permissions().unwrap().bits(), 0o644);

    let err = h.conn.metadata("/nope").await.unwrap_err();
    assert!(matches!(err, Error::UnableToStatFile(_)), "{err:?}");
}

#[tokio::test]
async fn empty_paths_are_rejected() {
    let h = connected(populated()).await;

    for err in [
        h.conn.list_files_in_directory("").await.unwrap_err(),
        h.conn.make_directory("").await.unwrap_err(),
        h.conn.rename_or_move_item("", "/x").await.unwrap_err(),
        h.conn.rename_or_move_item("/x", "").await.unwrap_err(),
        h.conn.remove_directory("").await.unwrap_err(),
        h.conn.metadata("").await.unwrap_err(),
    ] {
        assert!(matches!(err, Error::InvalidArguments(_)), "{err:?}");
    }
}

#[tokio::test]
/// Operations issued together run one at a time in issue order.
async fn operations_run_in_issue_order() {
    let h = connected(MockServer::new()).await;

    let (created, renamed, listed, removed) = tokio::join!(
        h.conn.make_directory("/first"),
        h.conn.rename_or_move_item("/first", "/second"),
        h.conn.list_files_in_directory("/"),
        h.conn.remove_directory("/second"),
    );

    created.unwrap();
    assert_eq!(renamed.unwrap().path(), "/second");
    assert_eq!(paths(&listed.unwrap()), ["/second"]);
    removed.unwrap();

    assert!(!h.server.exists("/second"));
}
