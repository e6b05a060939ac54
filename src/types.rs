//! # Core Types
//!
//! Fundamental types shared by every layer.
//!
//! ## Quick Reference
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`FileStat`] | POSIX-style stat record: mode, owner, size, times |
//! | [`FileType`] | Enum: File, Directory, or Symlink |
//! | [`AccessMode`] | Access-check mask (`F_OK`/`R_OK`/`W_OK`/`X_OK`) |
//! | [`OpenFlags`] | How to open a file (read/write/create/truncate/append) |
//! | [`Features`] | Capability set a layer advertises |
//! | [`mode`] | Mode-bit constants (`S_IFDIR`, `S_ISGID`, ...) |
//!
//! ## Serde Support
//!
//! [`FileStat`] and [`FileType`] support serialization when the `serde`
//! feature is enabled.

use std::time::SystemTime;

/// POSIX mode-bit constants used in [`FileStat::mode`].
///
/// The high bits encode the object type, the low bits the permission
/// set (user/group/other rwx plus setuid/setgid/sticky).
pub mod mode {
    /// Mask selecting the type bits.
    pub const S_IFMT: u32 = 0o170000;
    /// Regular file.
    pub const S_IFREG: u32 = 0o100000;
    /// Directory.
    pub const S_IFDIR: u32 = 0o040000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0o120000;
    /// Set-group-id bit.
    pub const S_ISGID: u32 = 0o2000;
    /// Mask selecting the settable permission bits.
    pub const S_IMODE: u32 = 0o7777;
}

/// The type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    /// Regular file containing data.
    File,
    /// Directory containing other entries.
    Directory,
    /// Symbolic link pointing to another path.
    Symlink,
}

impl FileType {
    /// Decode the type bits of a mode value, if they name a supported type.
    pub const fn from_mode(m: u32) -> Option<FileType> {
        match m & mode::S_IFMT {
            mode::S_IFREG => Some(FileType::File),
            mode::S_IFDIR => Some(FileType::Directory),
            mode::S_IFLNK => Some(FileType::Symlink),
            _ => None,
        }
    }

    /// The `S_IF*` bits for this type.
    pub const fn as_mode(self) -> u32 {
        match self {
            FileType::File => mode::S_IFREG,
            FileType::Directory => mode::S_IFDIR,
            FileType::Symlink => mode::S_IFLNK,
        }
    }
}

/// Stat record for a filesystem entry.
///
/// `mode` carries both the type bits and the permission bits, the way
/// `stat(2)` reports them; [`permissions`](FileStat::permissions) and
/// [`file_type`](FileStat::file_type) split them apart.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileStat {
    /// Type and permission bits.
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Size in bytes.
    pub size: u64,
    /// Last access time.
    #[cfg_attr(feature = "serde", serde(with = "system_time_serde"))]
    pub atime: SystemTime,
    /// Last modification time.
    #[cfg_attr(feature = "serde", serde(with = "system_time_serde"))]
    pub mtime: SystemTime,
    /// Last status change time.
    #[cfg_attr(feature = "serde", serde(with = "system_time_serde"))]
    pub ctime: SystemTime,
}

impl FileStat {
    /// Returns `true` if this is a regular file.
    #[inline]
    pub const fn is_file(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFREG
    }

    /// Returns `true` if this is a directory.
    #[inline]
    pub const fn is_dir(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFDIR
    }

    /// Returns `true` if this is a symbolic link.
    #[inline]
    pub const fn is_symlink(&self) -> bool {
        self.mode & mode::S_IFMT == mode::S_IFLNK
    }

    /// The entry type, if the mode names a supported one.
    pub const fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    /// The settable permission bits of the mode.
    #[inline]
    pub const fn permissions(&self) -> u32 {
        self.mode & mode::S_IMODE
    }
}

bitflags::bitflags! {
    /// Access-check mask for [`Vfs::access`](crate::Vfs::access).
    ///
    /// The empty mask is `F_OK`: "does the path exist at all".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u8 {
        /// `R_OK` — read permission.
        const READ = 0b001;
        /// `W_OK` — write permission.
        const WRITE = 0b010;
        /// `X_OK` — execute/search permission.
        const EXECUTE = 0b100;
    }
}

impl AccessMode {
    /// `F_OK` — existence only, no permission bits requested.
    pub const EXISTS: AccessMode = AccessMode::empty();
}

bitflags::bitflags! {
    /// Capabilities a layer advertises through
    /// [`Vfs::features`](crate::Vfs::features).
    ///
    /// Wrappers report their own features unioned with their inner
    /// filesystem's; a union reports `READONLY` iff it has no writable
    /// branch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u8 {
        /// All write operations fail with `EROFS`.
        const READONLY = 0b01;
        /// Deletions are recorded as whiteout marks rather than forwarded.
        const WHITEOUT = 0b10;
    }
}

/// Flags for opening a file.
///
/// The predefined constants mirror the classic stdio mode strings:
///
/// | Constant | stdio | Behavior |
/// |----------|-------|----------|
/// | [`OpenFlags::READ`] | `r` | Read, file must exist |
/// | [`OpenFlags::WRITE`] | `w` | Write, create, truncate |
/// | [`OpenFlags::APPEND`] | `a` | Write, create, writes go to the end |
/// | [`OpenFlags::READ_WRITE`] | `r+` | Read and write, file must exist |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Truncate the file to zero length.
    pub truncate: bool,
    /// Every write goes to the end of the file.
    pub append: bool,
}

impl OpenFlags {
    /// Read-only access; the file must exist.
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
        truncate: false,
        append: false,
    };

    /// Write access with create and truncate.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: true,
        append: false,
    };

    /// Append mode — writes go to the end, creating the file if needed.
    pub const APPEND: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: false,
        append: true,
    };

    /// Read and write access; the file must exist.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        truncate: false,
        append: false,
    };

    /// Whether this mode carries no write intent at all.
    ///
    /// Read-only modes pass through read-only layers; anything else is
    /// rejected there with `EROFS`.
    pub const fn is_read_only(&self) -> bool {
        !self.write && !self.create && !self.truncate && !self.append
    }

    /// Whether this mode writes to the file.
    pub const fn writes(&self) -> bool {
        self.write || self.append || self.truncate
    }
}

/// Serde support for SystemTime (when the serde feature is enabled).
#[cfg(feature = "serde")]
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        (duration.as_secs(), duration.subsec_nanos()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (secs, nanos): (u64, u32) = Deserialize::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_with_mode(m: u32) -> FileStat {
        FileStat {
            mode: m,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn file_type_round_trips_through_mode_bits() {
        for ft in [FileType::File, FileType::Directory, FileType::Symlink] {
            assert_eq!(FileType::from_mode(ft.as_mode() | 0o644), Some(ft));
        }
        assert_eq!(FileType::from_mode(0o644), None);
    }

    #[test]
    fn stat_type_predicates() {
        assert!(stat_with_mode(mode::S_IFREG | 0o644).is_file());
        assert!(stat_with_mode(mode::S_IFDIR | 0o755).is_dir());
        assert!(stat_with_mode(mode::S_IFLNK | 0o777).is_symlink());
        assert!(!stat_with_mode(mode::S_IFDIR | 0o755).is_file());
    }

    #[test]
    fn stat_permissions_strip_type_bits() {
        let st = stat_with_mode(mode::S_IFDIR | mode::S_ISGID | 0o755);
        assert_eq!(st.permissions(), mode::S_ISGID | 0o755);
    }

    #[test]
    fn access_mode_exists_is_empty() {
        assert!(AccessMode::EXISTS.is_empty());
        assert!(AccessMode::READ.contains(AccessMode::READ));
    }

    #[test]
    fn open_flags_read_only() {
        assert!(OpenFlags::READ.is_read_only());
        assert!(!OpenFlags::WRITE.is_read_only());
        assert!(!OpenFlags::APPEND.is_read_only());
        assert!(!OpenFlags::READ_WRITE.is_read_only());
    }

    #[test]
    fn open_flags_constants() {
        assert!(OpenFlags::WRITE.create);
        assert!(OpenFlags::WRITE.truncate);
        assert!(OpenFlags::APPEND.append);
        assert!(!OpenFlags::APPEND.truncate);
        assert!(OpenFlags::READ_WRITE.read && OpenFlags::READ_WRITE.write);
        assert!(!OpenFlags::READ_WRITE.create);
    }
}
