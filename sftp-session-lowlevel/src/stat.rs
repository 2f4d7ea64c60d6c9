/// Attributes of a remote path as reported by the server.
///
/// Every field is optional since sftp v3 lets the server omit any of them.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileStat {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Permission and file type bits, as in `st_mode`.
    pub perm: Option<u32>,
    /// Seconds since the unix epoch.
    pub atime: Option<u64>,
    /// Seconds since the unix epoch.
    pub mtime: Option<u64>,
}

/// How a remote file is opened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Read only.
    Read,
    /// Write only, created with the given permission bits if missing and
    /// truncated if present.
    WriteTruncate(u32),
}
