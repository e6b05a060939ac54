//! # Read-Only Shield
//!
//! [`ReadOnlyFs`] forwards every read to its inner filesystem and
//! rejects every write with `EROFS`. It advertises the `READONLY`
//! feature, which a union uses to refuse such a filesystem as a
//! writable branch.

use std::path::{Path, PathBuf};

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{AccessMode, Features, FileStat, OpenFlags};

/// Wrapper that turns any filesystem into a read-only one.
///
/// An open mode passes through iff it carries no write intent; all
/// mutation operations fail `EROFS` without consulting the inner
/// filesystem.
pub struct ReadOnlyFs<B> {
    inner: B,
}

impl<B: Vfs> ReadOnlyFs<B> {
    /// Shield `inner` behind a read-only layer.
    pub fn new(inner: B) -> Self {
        ReadOnlyFs { inner }
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn reject<T>(path: &Path) -> FsResult<T> {
        Err(FsError::ReadOnly {
            path: path::normalize(path),
        })
    }
}

impl<B: Vfs> Vfs for ReadOnlyFs<B> {
    fn features(&self) -> Features {
        Features::READONLY | self.inner.features()
    }

    fn access(&self, path: &Path, mode: AccessMode) -> FsResult<bool> {
        self.inner.access(path, mode)
    }

    fn stat(&self, path: &Path) -> FsResult<FileStat> {
        self.inner.stat(path)
    }

    fn lstat(&self, path: &Path) -> FsResult<FileStat> {
        self.inner.lstat(path)
    }

    fn listdir(&self, path: &Path) -> FsResult<Vec<String>> {
        self.inner.listdir(path)
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        self.inner.readlink(path)
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        if !flags.is_read_only() {
            return Self::reject(path);
        }
        self.inner.open(path, flags)
    }

    fn chmod(&self, path: &Path, _mode: u32) -> FsResult<()> {
        Self::reject(path)
    }

    fn chown(&self, path: &Path, _uid: u32, _gid: u32) -> FsResult<()> {
        Self::reject(path)
    }

    fn mkdir(&self, path: &Path) -> FsResult<()> {
        Self::reject(path)
    }

    fn symlink(&self, link: &Path, _target: &Path) -> FsResult<()> {
        Self::reject(link)
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        Self::reject(path)
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        Self::reject(path)
    }
}
