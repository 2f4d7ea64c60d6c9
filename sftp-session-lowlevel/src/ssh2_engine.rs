//! Transport engine backed by libssh2 through the `ssh2` crate.
//!
//! The session is switched to non-blocking mode right after it is bound,
//! so `LIBSSH2_ERROR_EAGAIN` surfaces as [`EngineError::WouldBlock`] with
//! the directions reported by `libssh2_session_block_directions`.

use super::{
    keyboard_interactive_responses, BlockDirections, Connector, EngineError, EngineResult,
    EngineStatus, FileStat, OpenMode, RemoteDir, RemoteFile, SftpChannel, Transport,
};

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;

use ssh2::{ErrorCode, KeyboardInteractivePrompt, OpenFlags, OpenType, Prompt, Session};

const LIBSSH2_ERROR_EAGAIN: i32 = -37;

/// Returned by `libssh2_sftp_readdir` once the directory is exhausted.
const LIBSSH2_ERROR_FILE: i32 = -16;

fn block_directions(session: &Session) -> BlockDirections {
    match session.block_directions() {
        ssh2::BlockDirections::None => BlockDirections::None,
        ssh2::BlockDirections::Inbound => BlockDirections::Inbound,
        ssh2::BlockDirections::Outbound => BlockDirections::Outbound,
        ssh2::BlockDirections::Both => BlockDirections::Both,
    }
}

fn raw_code(err: &ssh2::Error) -> i32 {
    match err.code() {
        ErrorCode::Session(code) => code,
        ErrorCode::SFTP(code) => code,
    }
}

fn map_err(session: &Session, err: ssh2::Error) -> EngineError {
    match raw_code(&err) {
        LIBSSH2_ERROR_EAGAIN => EngineError::WouldBlock(block_directions(session)),
        code => EngineError::failed(code, err.message()),
    }
}

/// `Read`/`Write` on ssh2 files go through `io::Error`, so the engine code
/// is recovered from the session's last error.
fn map_io_err(session: &Session, err: io::Error) -> EngineError {
    if err.kind() == io::ErrorKind::WouldBlock {
        return EngineError::WouldBlock(block_directions(session));
    }

    match ssh2::Error::last_session_error(session) {
        Some(last) => EngineError::failed(raw_code(&last), last.message()),
        None => EngineError::failed(err.raw_os_error().unwrap_or(-1), err.to_string()),
    }
}

fn convert_stat(stat: ssh2::FileStat) -> FileStat {
    FileStat {
        size: stat.size,
        uid: stat.uid,
        gid: stat.gid,
        perm: stat.perm,
        atime: stat.atime,
        mtime: stat.mtime,
    }
}

/// Creates libssh2 sessions.
#[derive(Debug, Default, Copy, Clone)]
pub struct Ssh2Connector;

impl Connector for Ssh2Connector {
    type Transport = Ssh2Transport;

    fn bind(&self, socket: TcpStream) -> Result<Self::Transport, EngineStatus> {
        let mut session =
            Session::new().map_err(|err| EngineStatus::new(raw_code(&err), err.message()))?;

        session.set_tcp_stream(socket);
        session.set_blocking(false);

        Ok(Ssh2Transport { session })
    }
}

/// A libssh2 session in non-blocking mode.
pub struct Ssh2Transport {
    session: Session,
}

struct FirstPromptPassword<'p> {
    password: &'p str,
}

impl KeyboardInteractivePrompt for FirstPromptPassword<'_> {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'a>],
    ) -> Vec<String> {
        keyboard_interactive_responses(prompts.len(), self.password)
    }
}

impl Transport for Ssh2Transport {
    type Sftp = Ssh2Sftp;

    fn handshake(&mut self) -> EngineResult<()> {
        let session = &mut self.session;
        session.handshake().map_err(|err| map_err(session, err))
    }

    fn auth_methods(&mut self, username: &str) -> EngineResult<String> {
        let session = &self.session;
        session
            .auth_methods(username)
            .map(str::to_owned)
            .map_err(|err| map_err(session, err))
    }

    fn authenticate_password(&mut self, username: &str, password: &str) -> EngineResult<()> {
        let session = &self.session;
        session
            .userauth_password(username, password)
            .map_err(|err| map_err(session, err))
    }

    fn authenticate_keyboard_interactive(
        &mut self,
        username: &str,
        password: &str,
    ) -> EngineResult<()> {
        let session = &self.session;
        let mut prompter = FirstPromptPassword { password };
        session
            .userauth_keyboard_interactive(username, &mut prompter)
            .map_err(|err| map_err(session, err))
    }

    fn open_sftp(&mut self) -> EngineResult<Self::Sftp> {
        let session = &self.session;
        let sftp = session.sftp().map_err(|err| map_err(session, err))?;

        Ok(Ssh2Sftp {
            session: session.clone(),
            sftp,
        })
    }

    fn disconnect(&mut self, description: &str) -> EngineResult<()> {
        let session = &self.session;
        session
            .disconnect(None, description, None)
            .map_err(|err| map_err(session, err))
    }
}

/// The sftp subsystem of a [`Ssh2Transport`].
pub struct Ssh2Sftp {
    session: Session,
    sftp: ssh2::Sftp,
}

impl SftpChannel for Ssh2Sftp {
    type File = Ssh2File;
    type Dir = Ssh2File;

    fn open_dir(&mut self, path: &str) -> EngineResult<Self::Dir> {
        let file = self
            .sftp
            .opendir(Path::new(path))
            .map_err(|err| map_err(&self.session, err))?;

        Ok(Ssh2File {
            session: self.session.clone(),
            file,
        })
    }

    fn open_file(&mut self, path: &str, mode: OpenMode) -> EngineResult<Self::File> {
        let (flags, perm) = match mode {
            OpenMode::Read => (OpenFlags::READ, 0),
            OpenMode::WriteTruncate(perm) => (
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                perm as i32,
            ),
        };

        let file = self
            .sftp
            .open_mode(Path::new(path), flags, perm, OpenType::File)
            .map_err(|err| map_err(&self.session, err))?;

        Ok(Ssh2File {
            session: self.session.clone(),
            file,
        })
    }

    fn stat(&mut self, path: &str) -> EngineResult<FileStat> {
        self.sftp
            .stat(Path::new(path))
            .map(convert_stat)
            .map_err(|err| map_err(&self.session, err))
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> EngineResult<()> {
        self.sftp
            .mkdir(Path::new(path), mode as i32)
            .map_err(|err| map_err(&self.session, err))
    }

    fn rmdir(&mut self, path: &str) -> EngineResult<()> {
        self.sftp
            .rmdir(Path::new(path))
            .map_err(|err| map_err(&self.session, err))
    }

    fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        self.sftp
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|err| map_err(&self.session, err))
    }

    fn unlink(&mut self, path: &str) -> EngineResult<()> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|err| map_err(&self.session, err))
    }

    fn shutdown(&mut self) -> EngineResult<()> {
        self.sftp
            .shutdown()
            .map_err(|err| map_err(&self.session, err))
    }
}

/// A remote file or directory handle.
pub struct Ssh2File {
    session: Session,
    file: ssh2::File,
}

impl RemoteDir for Ssh2File {
    fn read_entry(&mut self) -> EngineResult<Option<(String, FileStat)>> {
        match self.file.readdir() {
            Ok((name, stat)) => Ok(Some((name.to_string_lossy().into_owned(), convert_stat(stat)))),
            Err(err) if raw_code(&err) == LIBSSH2_ERROR_FILE => Ok(None),
            Err(err) => Err(map_err(&self.session, err)),
        }
    }

    fn close(&mut self) -> EngineResult<()> {
        self.file
            .close()
            .map_err(|err| map_err(&self.session, err))
    }
}

impl RemoteFile for Ssh2File {
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize> {
        self.file
            .read(buf)
            .map_err(|err| map_io_err(&self.session, err))
    }

    fn write(&mut self, buf: &[u8]) -> EngineResult<usize> {
        self.file
            .write(buf)
            .map_err(|err| map_io_err(&self.session, err))
    }

    fn fstat(&mut self) -> EngineResult<FileStat> {
        self.file
            .stat()
            .map(convert_stat)
            .map_err(|err| map_err(&self.session, err))
    }

    fn close(&mut self) -> EngineResult<()> {
        self.file
            .close()
            .map_err(|err| map_err(&self.session, err))
    }
}
