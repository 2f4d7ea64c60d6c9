use super::{lowlevel::FileStat, UnixTimeStamp};

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// A remote file or directory, as returned by listings, directory
/// operations and transfers.
///
/// It is a snapshot of the attributes the server reported at the time,
/// nothing about it is refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    path: String,
    stat: FileStat,
}

#[allow(clippy::len_without_is_empty)]
impl RemoteEntry {
    pub(super) fn new(path: String, stat: FileStat) -> Self {
        Self { path, stat }
    }

    pub(super) fn in_directory(directory: &str, name: &str, stat: FileStat) -> Self {
        Self::new(join_path(directory, name), stat)
    }

    /// Full remote path of the entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last component of [`RemoteEntry::path`].
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');

        match trimmed.rfind('/') {
            Some(index) => &trimmed[index + 1..],
            None if trimmed.is_empty() => &self.path,
            None => trimmed,
        }
    }

    /// Returns the size of the file in bytes, `0` if the server did not
    /// return it.
    pub fn len(&self) -> u64 {
        self.stat.size.unwrap_or(0)
    }

    /// Modification time, if the server sent one.
    pub fn modified(&self) -> Option<UnixTimeStamp> {
        self.stat.mtime.map(UnixTimeStamp::from_raw)
    }

    /// Access time, if the server sent one.
    pub fn accessed(&self) -> Option<UnixTimeStamp> {
        self.stat.atime.map(UnixTimeStamp::from_raw)
    }

    pub fn uid(&self) -> Option<u32> {
        self.stat.uid
    }

    pub fn gid(&self) -> Option<u32> {
        self.stat.gid
    }

    /// Raw `st_mode` bits, file type included.
    pub fn mode(&self) -> Option<u32> {
        self.stat.perm
    }

    /// Permission bits of [`RemoteEntry::mode`].
    pub fn permissions(&self) -> Option<Permissions> {
        self.stat.perm.map(Permissions::from)
    }

    /// Type bits of [`RemoteEntry::mode`], `None` if absent or unknown.
    pub fn file_type(&self) -> Option<FileType> {
        self.stat.perm.and_then(FileType::from_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type().map_or(false, |file_type| file_type.is_dir())
    }

    pub fn is_file(&self) -> bool {
        self.file_type().map_or(false, |file_type| file_type.is_file())
    }
}

/// Append `name` to `directory` with exactly one separator in between.
pub(super) fn join_path(directory: &str, name: &str) -> String {
    if directory.ends_with('/') {
        format!("{directory}{name}")
    } else {
        format!("{directory}/{name}")
    }
}

/// The `S_IFMT` part of a mode, see [`RemoteEntry::file_type`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FileType(u32);

impl FileType {
    fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFSOCK | S_IFLNK | S_IFREG | S_IFBLK | S_IFDIR | S_IFCHR | S_IFIFO => {
                Some(Self(mode & S_IFMT))
            }
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.0 == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.0 == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.0 == S_IFLNK
    }

    pub fn is_fifo(&self) -> bool {
        self.0 == S_IFIFO
    }

    pub fn is_socket(&self) -> bool {
        self.0 == S_IFSOCK
    }

    pub fn is_block_device(&self) -> bool {
        self.0 == S_IFBLK
    }

    pub fn is_char_device(&self) -> bool {
        self.0 == S_IFCHR
    }
}

/// Permission and special mode bits of a remote file.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Permissions(u32);

macro_rules! impl_getter {
    ($getter_name:ident, $bit:expr, $variant_name:expr) => {
        #[doc = "Tests whether "]
        #[doc = $variant_name]
        #[doc = " bit is set."]
        pub fn $getter_name(&self) -> bool {
            self.0 & $bit != 0
        }
    };
}

impl Permissions {
    impl_getter!(suid, 0o4000, "set-user-id");
    impl_getter!(sgid, 0o2000, "set-group-id");
    impl_getter!(svtx, 0o1000, "set-sticky-bit");

    impl_getter!(read_by_owner, 0o400, "read by owner");
    impl_getter!(write_by_owner, 0o200, "write by owner");
    impl_getter!(execute_by_owner, 0o100, "execute by owner");

    impl_getter!(read_by_group, 0o40, "read by group");
    impl_getter!(write_by_group, 0o20, "write by group");
    impl_getter!(execute_by_group, 0o10, "execute by group");

    impl_getter!(read_by_other, 0o4, "read by other");
    impl_getter!(write_by_other, 0o2, "write by other");
    impl_getter!(execute_by_other, 0o1, "execute by other");

    /// No write bit is set for anyone.
    pub fn readonly(&self) -> bool {
        !self.write_by_owner() && !self.write_by_group() && !self.write_by_other()
    }

    /// Permission bits without the file type, e.g. `0o755`.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Permissions {
    /// Keep the permission and special mode bits of an `st_mode`, dropping
    /// the file type.
    fn from(mode: u32) -> Self {
        Self(mode & 0o7777)
    }
}
