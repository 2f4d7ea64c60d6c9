//! Scripted in-memory transport engine for tests.
//!
//! [`MockServer`] holds a tiny remote filesystem and a script describing
//! how the engine misbehaves: how often primitives return the would-block
//! sentinel, which auth methods are offered, which primitives fail.
//! [`MockServer::connector`] hands out a [`MockConnector`] implementing
//! the `sftp-session-lowlevel` traits on top of it.

use std::collections::{BTreeMap, VecDeque};
use std::env;
use std::net::TcpStream as StdTcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub use sftp_session_lowlevel as lowlevel;

use lowlevel::{
    keyboard_interactive_responses, offers_auth_method, BlockDirections, Connector, EngineError,
    EngineResult, EngineStatus, FileStat, OpenMode, RemoteDir, RemoteFile, SftpChannel, Transport,
    AUTH_METHOD_KEYBOARD_INTERACTIVE, AUTH_METHOD_PASSWORD,
};

/// `SSH_FX_NO_SUCH_FILE`
pub const SSH_FX_NO_SUCH_FILE: i32 = 2;
/// `SSH_FX_FAILURE`
pub const SSH_FX_FAILURE: i32 = 4;
/// `LIBSSH2_ERROR_AUTHENTICATION_FAILED`
pub const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
/// `LIBSSH2_ERROR_KEX_FAILURE`
pub const LIBSSH2_ERROR_KEX_FAILURE: i32 = -5;

/// Modification time reported for every node.
pub const MOCK_MTIME: u64 = 1_700_000_000;
pub const MOCK_UID: u32 = 1000;
pub const MOCK_GID: u32 = 1000;

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

#[derive(Debug, Clone)]
enum Node {
    Dir { mode: u32 },
    File { mode: u32, data: Vec<u8> },
}

impl Node {
    fn stat(&self) -> FileStat {
        let (size, perm) = match self {
            Node::Dir { mode } => (4096, S_IFDIR | mode),
            Node::File { mode, data } => (data.len() as u64, S_IFREG | mode),
        };

        FileStat {
            size: Some(size),
            uid: Some(MOCK_UID),
            gid: Some(MOCK_GID),
            perm: Some(perm),
            atime: Some(MOCK_MTIME),
            mtime: Some(MOCK_MTIME),
        }
    }
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<String, Node>,

    password: String,
    auth_methods: String,
    keyboard_prompts: usize,
    last_keyboard_responses: Vec<String>,

    bind_error: Option<i32>,
    handshake_error: Option<i32>,
    handshake_stalls: usize,
    read_stalls: usize,
    sftp_init_error: Option<i32>,
    read_error_after: Option<u64>,
    readdir_error: Option<i32>,
    close_error: Option<i32>,

    would_block_every: usize,
    would_block_direction: BlockDirections,
    calls: usize,
    would_block_count: usize,

    binds: usize,
    open_handles: usize,
    events: Vec<&'static str>,
}

/// Shared handle to the scripted server.
#[derive(Debug, Clone)]
pub struct MockServer(Arc<Mutex<State>>);

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// A server with an empty `/` directory, accepting password `secret`
    /// through the `password` method.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), Node::Dir { mode: 0o755 });

        Self(Arc::new(Mutex::new(State {
            nodes,

            password: "secret".to_owned(),
            auth_methods: AUTH_METHOD_PASSWORD.to_owned(),
            keyboard_prompts: 1,
            last_keyboard_responses: Vec::new(),

            bind_error: None,
            handshake_error: None,
            handshake_stalls: 0,
            read_stalls: 0,
            sftp_init_error: None,
            read_error_after: None,
            readdir_error: None,
            close_error: None,

            would_block_every: 0,
            would_block_direction: BlockDirections::Outbound,
            calls: 0,
            would_block_count: 0,

            binds: 0,
            open_handles: 0,
            events: Vec::new(),
        })))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector(self.clone())
    }

    pub fn set_password(&self, password: &str) -> &Self {
        self.state().password = password.to_owned();
        self
    }

    pub fn set_auth_methods(&self, methods: &str) -> &Self {
        self.state().auth_methods = methods.to_owned();
        self
    }

    pub fn set_keyboard_prompts(&self, prompts: usize) -> &Self {
        self.state().keyboard_prompts = prompts;
        self
    }

    pub fn fail_bind(&self, code: i32) -> &Self {
        self.state().bind_error = Some(code);
        self
    }

    pub fn fail_handshake(&self, code: i32) -> &Self {
        self.state().handshake_error = Some(code);
        self
    }

    /// The handshake returns would-block on [`BlockDirections::Inbound`]
    /// `stalls` times before completing. Nothing ever arrives on the
    /// socket, so every stall lasts one full readiness timeout.
    pub fn stall_handshake(&self, stalls: usize) -> &Self {
        self.state().handshake_stalls = stalls;
        self
    }

    pub fn fail_sftp_init(&self, code: i32) -> &Self {
        self.state().sftp_init_error = Some(code);
        self
    }

    /// File reads return would-block on [`BlockDirections::Inbound`]
    /// `stalls` times before reading anything, each stall lasting one full
    /// readiness timeout.
    pub fn stall_reads(&self, stalls: usize) -> &Self {
        self.state().read_stalls = stalls;
        self
    }

    /// Reads fail once the file offset reaches `offset`.
    pub fn fail_reads_after(&self, offset: u64) -> &Self {
        self.state().read_error_after = Some(offset);
        self
    }

    pub fn fail_readdir(&self, code: i32) -> &Self {
        self.state().readdir_error = Some(code);
        self
    }

    pub fn fail_close(&self, code: i32) -> &Self {
        self.state().close_error = Some(code);
        self
    }

    /// Every `every`-th primitive call returns the would-block sentinel
    /// with `direction`. `0` disables injection.
    pub fn set_would_block(&self, every: usize, direction: BlockDirections) -> &Self {
        let mut state = self.state();
        state.would_block_every = every;
        state.would_block_direction = direction;
        self
    }

    pub fn add_dir(&self, path: &str) -> &Self {
        self.state()
            .nodes
            .insert(path.to_owned(), Node::Dir { mode: 0o755 });
        self
    }

    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) -> &Self {
        self.state().nodes.insert(
            path.to_owned(),
            Node::File {
                mode: 0o644,
                data: data.into(),
            },
        );
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state().nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().nodes.contains_key(path)
    }

    /// Mode bits of a node, without the file type bits.
    pub fn mode(&self, path: &str) -> Option<u32> {
        match self.state().nodes.get(path)? {
            Node::Dir { mode } | Node::File { mode, .. } => Some(*mode),
        }
    }

    /// Number of would-block sentinels returned so far.
    pub fn would_block_count(&self) -> usize {
        self.state().would_block_count
    }

    /// Number of sessions bound so far.
    pub fn binds(&self) -> usize {
        self.state().binds
    }

    /// Number of file and directory handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }

    pub fn last_keyboard_responses(&self) -> Vec<String> {
        self.state().last_keyboard_responses.clone()
    }

    /// Lifecycle events recorded in order, e.g. `"sftp.shutdown"`.
    pub fn events(&self) -> Vec<&'static str> {
        self.state().events.clone()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn no_such_file() -> EngineError {
    EngineError::failed(SSH_FX_NO_SUCH_FILE, "No such file")
}

impl State {
    /// Decide whether the current primitive call returns the sentinel.
    ///
    /// Must be called before the primitive has any side effect.
    fn maybe_block(&mut self) -> EngineResult<()> {
        self.calls += 1;

        if self.would_block_every != 0 && self.calls % self.would_block_every == 0 {
            self.would_block_count += 1;
            Err(EngineError::WouldBlock(self.would_block_direction))
        } else {
            Ok(())
        }
    }

    fn require_parent_dir(&self, path: &str) -> EngineResult<()> {
        match self.nodes.get(parent_of(path)) {
            Some(Node::Dir { .. }) => Ok(()),
            _ => Err(no_such_file()),
        }
    }
}

pub struct MockConnector(MockServer);

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn bind(&self, _socket: StdTcpStream) -> Result<Self::Transport, EngineStatus> {
        let mut state = self.0.state();

        if let Some(code) = state.bind_error {
            return Err(EngineStatus::new(code, "Unable to create session"));
        }
        state.binds += 1;
        drop(state);

        Ok(MockTransport {
            server: self.0.clone(),
        })
    }
}

pub struct MockTransport {
    server: MockServer,
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.server.state().events.push("transport.drop");
    }
}

impl Transport for MockTransport {
    type Sftp = MockSftp;

    fn handshake(&mut self) -> EngineResult<()> {
        let mut state = self.server.state();

        if state.handshake_stalls > 0 {
            state.handshake_stalls -= 1;
            state.would_block_count += 1;
            return Err(EngineError::WouldBlock(BlockDirections::Inbound));
        }

        state.maybe_block()?;

        match state.handshake_error {
            Some(code) => Err(EngineError::failed(code, "Unable to exchange encryption keys")),
            None => Ok(()),
        }
    }

    fn auth_methods(&mut self, _username: &str) -> EngineResult<String> {
        let mut state = self.server.state();
        state.maybe_block()?;
        Ok(state.auth_methods.clone())
    }

    fn authenticate_password(&mut self, _username: &str, password: &str) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;

        if !offers_auth_method(&state.auth_methods, AUTH_METHOD_PASSWORD) {
            return Err(EngineError::failed(
                LIBSSH2_ERROR_AUTHENTICATION_FAILED,
                "Method not offered",
            ));
        }

        if state.password == password {
            Ok(())
        } else {
            Err(EngineError::failed(
                LIBSSH2_ERROR_AUTHENTICATION_FAILED,
                "Authentication failed (username/password)",
            ))
        }
    }

    fn authenticate_keyboard_interactive(
        &mut self,
        _username: &str,
        password: &str,
    ) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;

        let responses = keyboard_interactive_responses(state.keyboard_prompts, password);
        let accepted = responses.first() == Some(&state.password);
        state.last_keyboard_responses = responses;

        if offers_auth_method(&state.auth_methods, AUTH_METHOD_KEYBOARD_INTERACTIVE) && accepted {
            Ok(())
        } else {
            Err(EngineError::failed(
                LIBSSH2_ERROR_AUTHENTICATION_FAILED,
                "Authentication failed (keyboard-interactive)",
            ))
        }
    }

    fn open_sftp(&mut self) -> EngineResult<Self::Sftp> {
        let mut state = self.server.state();
        state.maybe_block()?;

        match state.sftp_init_error {
            Some(code) => Err(EngineError::failed(code, "Unable to startup channel")),
            None => {
                state.events.push("sftp.open");
                Ok(MockSftp {
                    server: self.server.clone(),
                })
            }
        }
    }

    fn disconnect(&mut self, _description: &str) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;
        state.events.push("transport.disconnect");
        Ok(())
    }
}

pub struct MockSftp {
    server: MockServer,
}

impl Drop for MockSftp {
    fn drop(&mut self) {
        self.server.state().events.push("sftp.drop");
    }
}

impl SftpChannel for MockSftp {
    type File = MockFile;
    type Dir = MockDir;

    fn open_dir(&mut self, path: &str) -> EngineResult<Self::Dir> {
        let mut state = self.server.state();
        state.maybe_block()?;

        let stat = match state.nodes.get(path) {
            Some(node @ Node::Dir { .. }) => node.stat(),
            _ => return Err(no_such_file()),
        };

        let mut entries = VecDeque::new();
        entries.push_back((".".to_owned(), stat));
        entries.push_back(("..".to_owned(), stat));

        // Newest first so that callers cannot rely on server ordering.
        for (child, node) in state.nodes.iter().rev() {
            if child != "/" && parent_of(child) == path {
                let name = &child[child.rfind('/').map_or(0, |idx| idx + 1)..];
                entries.push_back((name.to_owned(), node.stat()));
            }
        }

        state.open_handles += 1;

        Ok(MockDir {
            server: self.server.clone(),
            entries,
            reads: 0,
        })
    }

    fn open_file(&mut self, path: &str, mode: OpenMode) -> EngineResult<Self::File> {
        let mut state = self.server.state();
        state.maybe_block()?;

        match mode {
            OpenMode::Read => match state.nodes.get(path) {
                Some(Node::File { .. }) => (),
                _ => return Err(no_such_file()),
            },
            OpenMode::WriteTruncate(mode) => {
                state.require_parent_dir(path)?;
                if let Some(Node::Dir { .. }) = state.nodes.get(path) {
                    return Err(EngineError::failed(SSH_FX_FAILURE, "Is a directory"));
                }
                state.nodes.insert(
                    path.to_owned(),
                    Node::File {
                        mode,
                        data: Vec::new(),
                    },
                );
            }
        }

        state.open_handles += 1;

        Ok(MockFile {
            server: self.server.clone(),
            path: path.to_owned(),
            offset: 0,
        })
    }

    fn stat(&mut self, path: &str) -> EngineResult<FileStat> {
        let mut state = self.server.state();
        state.maybe_block()?;

        state.nodes.get(path).map(Node::stat).ok_or_else(no_such_file)
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;

        state.require_parent_dir(path)?;
        if state.nodes.contains_key(path) {
            return Err(EngineError::failed(SSH_FX_FAILURE, "File exists"));
        }
        state.nodes.insert(path.to_owned(), Node::Dir { mode });
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;

        match state.nodes.get(path) {
            Some(Node::Dir { .. }) => (),
            _ => return Err(no_such_file()),
        }
        if state.nodes.keys().any(|child| parent_of(child) == path && child != path) {
            return Err(EngineError::failed(SSH_FX_FAILURE, "Directory not empty"));
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;

        state.require_parent_dir(to)?;
        let node = state.nodes.remove(from).ok_or_else(no_such_file)?;

        // Move children along with a renamed directory.
        let prefix = format!("{}/", from);
        let children: Vec<String> = state
            .nodes
            .keys()
            .filter(|child| child.starts_with(&prefix))
            .cloned()
            .collect();
        for child in children {
            if let Some(child_node) = state.nodes.remove(&child) {
                let moved = format!("{}/{}", to, &child[prefix.len()..]);
                state.nodes.insert(moved, child_node);
            }
        }

        state.nodes.insert(to.to_owned(), node);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;

        match state.nodes.get(path) {
            Some(Node::File { .. }) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(EngineError::failed(SSH_FX_FAILURE, "Is a directory")),
            None => Err(no_such_file()),
        }
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;
        state.events.push("sftp.shutdown");
        Ok(())
    }
}

pub struct MockDir {
    server: MockServer,
    entries: VecDeque<(String, FileStat)>,
    reads: usize,
}

impl RemoteDir for MockDir {
    fn read_entry(&mut self) -> EngineResult<Option<(String, FileStat)>> {
        let mut state = self.server.state();
        state.maybe_block()?;

        // Fail right after `.` and `..`, if scripted to.
        self.reads += 1;
        if let Some(code) = state.readdir_error {
            if self.reads > 2 {
                return Err(EngineError::failed(code, "Failure reading directory"));
            }
        }

        Ok(self.entries.pop_front())
    }

    fn close(&mut self) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;
        state.open_handles -= 1;
        Ok(())
    }
}

pub struct MockFile {
    server: MockServer,
    path: String,
    offset: u64,
}

impl RemoteFile for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        let mut state = self.server.state();

        if state.read_stalls > 0 {
            state.read_stalls -= 1;
            state.would_block_count += 1;
            return Err(EngineError::WouldBlock(BlockDirections::Inbound));
        }

        state.maybe_block()?;

        if let Some(limit) = state.read_error_after {
            if self.offset >= limit {
                return Err(EngineError::failed(SSH_FX_FAILURE, "Failure reading file"));
            }
        }

        let data = match state.nodes.get(&self.path) {
            Some(Node::File { data, .. }) => data,
            _ => return Err(no_such_file()),
        };

        let start = (self.offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.offset += n as u64;

        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> EngineResult<usize> {
        let mut state = self.server.state();
        state.maybe_block()?;

        let data = match state.nodes.get_mut(&self.path) {
            Some(Node::File { data, .. }) => data,
            _ => return Err(no_such_file()),
        };

        // Accept at most 1000 bytes per call to exercise partial writes.
        let n = buf.len().min(1000);
        let start = self.offset as usize;
        if data.len() < start + n {
            data.resize(start + n, 0);
        }
        data[start..start + n].copy_from_slice(&buf[..n]);
        self.offset += n as u64;

        Ok(n)
    }

    fn fstat(&mut self) -> EngineResult<FileStat> {
        let mut state = self.server.state();
        state.maybe_block()?;

        state
            .nodes
            .get(&self.path)
            .map(Node::stat)
            .ok_or_else(no_such_file)
    }

    fn close(&mut self) -> EngineResult<()> {
        let mut state = self.server.state();
        state.maybe_block()?;
        state.open_handles -= 1;

        match state.close_error {
            Some(code) => Err(EngineError::failed(code, "Failure closing file")),
            None => Ok(()),
        }
    }
}

/// Accept loopback connections forever, keeping every accepted socket
/// open so that the client side stays connected.
pub async fn spawn_listener() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut accepted: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            accepted.push(stream);
        }
    });

    (port, handle)
}

/// A loopback port nothing listens on.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn get_tmp_path() -> &'static Path {
    Path::new(if cfg!(target_os = "macos") {
        "/private/tmp"
    } else {
        "/tmp"
    })
}

pub fn get_path_for_tmp_files() -> PathBuf {
    static RUNTIME_DIR: OnceCell<Option<Box<Path>>> = OnceCell::new();

    RUNTIME_DIR
        .get_or_init(|| {
            env::var_os("RUNTIME_DIR").map(|os_str| {
                let pathbuf: PathBuf = os_str.into();
                pathbuf
                    .canonicalize()
                    .expect("Failed to canonicalize $RUNTIME_DIR")
                    .into_boxed_path()
            })
        })
        .as_deref()
        .unwrap_or_else(get_tmp_path)
        .join("sftp_session")
}
