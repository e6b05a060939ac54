//! # The Uniform Filesystem Contract
//!
//! Every backend and every wrapper implements the single [`Vfs`] trait,
//! which makes composition free-form: a union branch can be a memory
//! tree, a chrooted host directory, or another union, and nothing along
//! the way needs to know.
//!
//! ## Contract Notes
//!
//! - Paths are forward-slash absolute. Callers are expected to pass
//!   normalized paths, and every implementation normalizes again on
//!   entry, so layers can rewrite paths without trusting each other.
//! - Methods take `&self`; implementations with state use interior
//!   mutability. All implementations are `Send + Sync`.
//! - The trait is object-safe: layers hold `Box<dyn Vfs>` or
//!   `Arc<dyn Vfs>` inners.

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::error::FsResult;
use crate::types::{AccessMode, Features, FileStat, OpenFlags};

/// An open file stream returned by [`Vfs::open`].
///
/// Streams are positioned byte streams over the backing storage. Writes
/// take effect before the call returns — there is no layer-side write
/// buffering — and dropping the stream never destroys the backing data
/// (an in-memory file's buffer outlives every stream opened on it).
///
/// Streams opened without the matching intent reject the mismatched
/// direction with an `std::io` permission error, the way a file
/// descriptor opened `O_RDONLY` rejects `write(2)`.
pub trait VfsFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send + ?Sized> VfsFile for T {}

/// The uniform operation set of every filesystem layer.
///
/// Implementations report failures as [`FsError`](crate::FsError) values
/// from the errno taxonomy; errors cross layer boundaries unchanged
/// unless a layer's contract says otherwise (whiteout shadowing, union
/// status scanning, `access` swallowing).
pub trait Vfs: Send + Sync {
    /// The capability set this layer advertises.
    ///
    /// Wrappers union their own features with their inner filesystem's.
    fn features(&self) -> Features {
        Features::empty()
    }

    /// Whether this layer advertises every feature in `feature`.
    fn has_feature(&self, feature: Features) -> bool {
        self.features().contains(feature)
    }

    /// Whether `path` exists and satisfies the access mask.
    ///
    /// Never fails for a missing path, a non-directory component, or a
    /// permission denial — those all yield `Ok(false)`. Other errors
    /// propagate. The empty mask ([`AccessMode::EXISTS`]) tests bare
    /// existence.
    fn access(&self, path: &Path, mode: AccessMode) -> FsResult<bool>;

    /// Stat the entry at `path`, following symlinks.
    fn stat(&self, path: &Path) -> FsResult<FileStat>;

    /// Stat the entry at `path` without following a final symlink.
    fn lstat(&self, path: &Path) -> FsResult<FileStat>;

    /// The set of child names of the directory at `path`.
    fn listdir(&self, path: &Path) -> FsResult<Vec<String>>;

    /// The target of the symlink at `path`.
    ///
    /// Fails `EINVAL` if the entry is not a symlink.
    fn readlink(&self, path: &Path) -> FsResult<PathBuf>;

    /// Open the file at `path` as a byte stream.
    ///
    /// Modes with create intent create the file when it is absent and
    /// the parent directory exists; read-only modes fail `ENOENT` on an
    /// absent file.
    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>>;

    /// Set the permission bits of the entry at `path`.
    ///
    /// Only the settable bits (`0o7777`) are applied; type bits are
    /// preserved.
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Set the owning uid and gid of the entry at `path`.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> FsResult<()>;

    /// Create an empty directory at `path`; the parent must exist and be
    /// a directory.
    fn mkdir(&self, path: &Path) -> FsResult<()>;

    /// Create a symlink named `link` pointing at `target`.
    ///
    /// The target is stored verbatim and resolved at use time; it does
    /// not have to exist.
    fn symlink(&self, link: &Path, target: &Path) -> FsResult<()>;

    /// Remove the empty directory at `path`.
    fn rmdir(&self, path: &Path) -> FsResult<()>;

    /// Remove the non-directory entry at `path`.
    fn unlink(&self, path: &Path) -> FsResult<()>;
}
