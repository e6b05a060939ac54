//! # Error Types
//!
//! Errno-kinded errors for all filesystem operations.
//!
//! ## Overview
//!
//! All layer operations return `Result<T, FsError>`. Each [`FsError`]
//! variant corresponds to one POSIX errno kind and carries the offending
//! path, so an error surfacing through several layers of composition
//! still names the path the caller asked about.
//!
//! | Variant | Errno |
//! |---------|-------|
//! | `NotFound` | `ENOENT` |
//! | `Deleted` | `ENOENT` (distinguished whiteout marker) |
//! | `PermissionDenied` | `EACCES` |
//! | `AlreadyExists` | `EEXIST` |
//! | `NotADirectory` | `ENOTDIR` |
//! | `IsADirectory` | `EISDIR` |
//! | `DirectoryNotEmpty` | `ENOTEMPTY` |
//! | `ReadOnly` | `EROFS` |
//! | `Busy` | `EBUSY` |
//! | `InvalidArgument` | `EINVAL` |
//! | `Io` | mapped from the wrapped `std::io::Error` |
//!
//! [`FsError::Deleted`] is how a whiteout layer reports a shadowed path;
//! a union scanning its branches treats it differently from a plain
//! `NotFound` (the shadow halts the scan instead of falling through to
//! deeper branches).
//!
//! Misuse of the composition API itself — duplicate branch names, rank
//! collisions, bad mounts — is a [`ValidationError`], kept separate from
//! the errno taxonomy because it reports a programming mistake, not a
//! filesystem condition.

use std::io;
use std::path::{Path, PathBuf};

/// Convenient result alias used by all filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// POSIX errno kind of an [`FsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Errno {
    EACCES,
    EBUSY,
    EEXIST,
    EINVAL,
    EISDIR,
    ENOENT,
    ENOTDIR,
    ENOTEMPTY,
    EROFS,
    EIO,
}

impl Errno {
    /// The conventional symbolic name, e.g. `"ENOENT"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Errno::EACCES => "EACCES",
            Errno::EBUSY => "EBUSY",
            Errno::EEXIST => "EEXIST",
            Errno::EINVAL => "EINVAL",
            Errno::EISDIR => "EISDIR",
            Errno::ENOENT => "ENOENT",
            Errno::ENOTDIR => "ENOTDIR",
            Errno::ENOTEMPTY => "ENOTEMPTY",
            Errno::EROFS => "EROFS",
            Errno::EIO => "EIO",
        }
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem error with an errno kind and the offending path.
///
/// # Display Format
///
/// Messages follow the classic strerror phrasing plus the path:
///
/// ```rust
/// use stackfs::FsError;
/// use std::path::PathBuf;
///
/// let err = FsError::NotFound { path: PathBuf::from("/missing") };
/// assert_eq!(err.to_string(), "no such file or directory: /missing");
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("no such file or directory: {path}")]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// Path is shadowed by a whiteout mark.
    ///
    /// Carries `ENOENT` like [`NotFound`](FsError::NotFound), but lets a
    /// union distinguish "deleted at a higher layer" from "never existed".
    #[error("no such file or directory (deleted): {path}")]
    Deleted {
        /// The shadowed path.
        path: PathBuf,
    },

    /// Permission bits deny the operation.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// The path where permission was denied.
        path: PathBuf,
    },

    /// Path already exists when it must not.
    #[error("file exists: {path}")]
    AlreadyExists {
        /// The path that already exists.
        path: PathBuf,
    },

    /// Expected a directory but found something else.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The path that is not a directory.
        path: PathBuf,
    },

    /// Expected a non-directory but found a directory.
    #[error("is a directory: {path}")]
    IsADirectory {
        /// The path that is a directory.
        path: PathBuf,
    },

    /// Directory is not empty when it must be.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The path to the non-empty directory.
        path: PathBuf,
    },

    /// The layer rejects all writes.
    #[error("read-only file system: {path}")]
    ReadOnly {
        /// The path the write was attempted on.
        path: PathBuf,
    },

    /// The resource is in use, e.g. a directory anchoring a mount.
    #[error("device or resource busy: {path}")]
    Busy {
        /// The busy path.
        path: PathBuf,
    },

    /// The operation does not apply to this path.
    #[error("invalid argument: {path} ({reason})")]
    InvalidArgument {
        /// The rejected path.
        path: PathBuf,
        /// What made the argument invalid.
        reason: &'static str,
    },

    /// I/O error from a host-backed layer, with path context.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved in the operation.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// The POSIX errno kind of this error.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::NotFound { .. } | FsError::Deleted { .. } => Errno::ENOENT,
            FsError::PermissionDenied { .. } => Errno::EACCES,
            FsError::AlreadyExists { .. } => Errno::EEXIST,
            FsError::NotADirectory { .. } => Errno::ENOTDIR,
            FsError::IsADirectory { .. } => Errno::EISDIR,
            FsError::DirectoryNotEmpty { .. } => Errno::ENOTEMPTY,
            FsError::ReadOnly { .. } => Errno::EROFS,
            FsError::Busy { .. } => Errno::EBUSY,
            FsError::InvalidArgument { .. } => Errno::EINVAL,
            FsError::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => Errno::ENOENT,
                io::ErrorKind::PermissionDenied => Errno::EACCES,
                io::ErrorKind::AlreadyExists => Errno::EEXIST,
                _ => Errno::EIO,
            },
        }
    }

    /// The path the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            FsError::NotFound { path }
            | FsError::Deleted { path }
            | FsError::PermissionDenied { path }
            | FsError::AlreadyExists { path }
            | FsError::NotADirectory { path }
            | FsError::IsADirectory { path }
            | FsError::DirectoryNotEmpty { path }
            | FsError::ReadOnly { path }
            | FsError::Busy { path }
            | FsError::InvalidArgument { path, .. }
            | FsError::Io { path, .. } => path,
        }
    }

    /// Map an `std::io::Error` onto the errno taxonomy, keeping the path.
    pub(crate) fn from_io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => FsError::NotFound { path },
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists { path },
            io::ErrorKind::NotADirectory => FsError::NotADirectory { path },
            io::ErrorKind::IsADirectory => FsError::IsADirectory { path },
            io::ErrorKind::DirectoryNotEmpty => FsError::DirectoryNotEmpty { path },
            io::ErrorKind::ReadOnlyFilesystem => FsError::ReadOnly { path },
            io::ErrorKind::ResourceBusy => FsError::Busy { path },
            _ => FsError::Io {
                operation,
                path,
                source,
            },
        }
    }
}

/// Misuse of the composition API, distinct from filesystem errors.
///
/// These indicate a programming mistake while assembling layers — the
/// equivalent of an invalid-argument error — and never carry an errno.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A union branch name was registered twice.
    #[error("branch name already in use: {name}")]
    DuplicateBranch {
        /// The colliding branch name.
        name: String,
    },

    /// Two union branches were given the same rank.
    #[error("branch rank already in use: {rank}")]
    RankInUse {
        /// The colliding rank.
        rank: u32,
    },

    /// A writable branch must advertise whiteout support.
    #[error("writable branch does not support whiteouts: {name}")]
    BranchNotWhiteout {
        /// The offending branch name.
        name: String,
    },

    /// A writable branch must not be read-only.
    #[error("writable branch is read-only: {name}")]
    BranchReadOnly {
        /// The offending branch name.
        name: String,
    },

    /// No branch is registered under this name.
    #[error("no branch named {name}")]
    UnknownBranch {
        /// The unknown branch name.
        name: String,
    },

    /// The first mount of a mount tree must be at the root.
    #[error("first mount point must be /, got {path}")]
    FirstMountNotRoot {
        /// The rejected mount point.
        path: PathBuf,
    },

    /// A filesystem is already mounted at this path.
    #[error("mount point already in use: {path}")]
    DuplicateMount {
        /// The colliding mount point.
        path: PathBuf,
    },

    /// A mount point must be an existing directory of the composite view.
    #[error("mount point is not an existing directory: {path}")]
    MountPointNotDirectory {
        /// The rejected mount point.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = FsError::NotFound {
            path: PathBuf::from("/missing"),
        };
        assert_eq!(err.to_string(), "no such file or directory: /missing");
        assert_eq!(err.errno(), Errno::ENOENT);
    }

    #[test]
    fn deleted_is_enoent_but_distinguishable() {
        let err = FsError::Deleted {
            path: PathBuf::from("/gone"),
        };
        assert_eq!(err.errno(), Errno::ENOENT);
        assert!(matches!(err, FsError::Deleted { .. }));
    }

    #[test]
    fn every_variant_reports_its_path() {
        let err = FsError::DirectoryNotEmpty {
            path: PathBuf::from("/full"),
        };
        assert_eq!(err.path(), Path::new("/full"));
    }

    #[test]
    fn io_not_found_maps_to_enoent() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let err = FsError::from_io("stat", Path::new("/x"), io_err);
        assert!(matches!(err, FsError::NotFound { .. }));
    }

    #[test]
    fn io_other_keeps_source() {
        let io_err = io::Error::other("test");
        let err = FsError::from_io("open", Path::new("/x"), io_err);
        assert!(matches!(err, FsError::Io { .. }));
        assert_eq!(err.errno(), Errno::EIO);
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError::RankInUse { rank: 7 };
        assert_eq!(err.to_string(), "branch rank already in use: 7");
    }

    #[test]
    fn errno_names() {
        assert_eq!(Errno::ENOTEMPTY.as_str(), "ENOTEMPTY");
        assert_eq!(Errno::EROFS.to_string(), "EROFS");
    }
}
