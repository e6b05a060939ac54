//! # Chroot-Style Remapper
//!
//! [`ChrootFs`] exposes a subtree of its inner filesystem under a
//! different prefix. A path entering the wrapper must live under
//! `external_root` (else `EACCES`); the prefix is swapped for
//! `internal_root` before forwarding. Path-valued results travel the
//! inverse substitution on the way out.

use std::path::{Path, PathBuf};

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{AccessMode, Features, FileStat, OpenFlags};

/// Wrapper rewriting paths between an external and an internal prefix.
pub struct ChrootFs<B> {
    inner: B,
    external_root: PathBuf,
    internal_root: PathBuf,
}

impl<B: Vfs> ChrootFs<B> {
    /// Map `external_root` on the caller side onto `internal_root` of
    /// the wrapped filesystem.
    pub fn new(
        inner: B,
        external_root: impl Into<PathBuf>,
        internal_root: impl Into<PathBuf>,
    ) -> Self {
        ChrootFs {
            inner,
            external_root: path::normalize(&external_root.into()),
            internal_root: path::normalize(&internal_root.into()),
        }
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn map_in(&self, outside: &Path) -> FsResult<PathBuf> {
        let normalized = path::normalize(outside);
        if !path::is_ancestor(&self.external_root, &normalized) {
            return Err(FsError::PermissionDenied { path: normalized });
        }
        let relative = normalized
            .strip_prefix(&self.external_root)
            .expect("checked ancestor relation")
            .to_path_buf();
        Ok(path::normalize(&self.internal_root.join(relative)))
    }

    fn map_out(&self, inside: &Path) -> FsResult<PathBuf> {
        let normalized = path::normalize(inside);
        if !path::is_ancestor(&self.internal_root, &normalized) {
            return Err(FsError::PermissionDenied { path: normalized });
        }
        let relative = normalized
            .strip_prefix(&self.internal_root)
            .expect("checked ancestor relation")
            .to_path_buf();
        Ok(path::normalize(&self.external_root.join(relative)))
    }
}

impl<B: Vfs> Vfs for ChrootFs<B> {
    fn features(&self) -> Features {
        self.inner.features()
    }

    fn access(&self, outside: &Path, mode: AccessMode) -> FsResult<bool> {
        match self.map_in(outside) {
            Ok(inside) => self.inner.access(&inside, mode),
            Err(FsError::PermissionDenied { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn stat(&self, outside: &Path) -> FsResult<FileStat> {
        self.inner.stat(&self.map_in(outside)?)
    }

    fn lstat(&self, outside: &Path) -> FsResult<FileStat> {
        self.inner.lstat(&self.map_in(outside)?)
    }

    fn listdir(&self, outside: &Path) -> FsResult<Vec<String>> {
        self.inner.listdir(&self.map_in(outside)?)
    }

    fn readlink(&self, outside: &Path) -> FsResult<PathBuf> {
        let target = self.inner.readlink(&self.map_in(outside)?)?;
        if target.is_absolute() {
            self.map_out(&target)
        } else {
            Ok(target)
        }
    }

    fn open(&self, outside: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        self.inner.open(&self.map_in(outside)?, flags)
    }

    fn chmod(&self, outside: &Path, mode: u32) -> FsResult<()> {
        self.inner.chmod(&self.map_in(outside)?, mode)
    }

    fn chown(&self, outside: &Path, uid: u32, gid: u32) -> FsResult<()> {
        self.inner.chown(&self.map_in(outside)?, uid, gid)
    }

    fn mkdir(&self, outside: &Path) -> FsResult<()> {
        self.inner.mkdir(&self.map_in(outside)?)
    }

    fn symlink(&self, link: &Path, target: &Path) -> FsResult<()> {
        let link = self.map_in(link)?;
        let target = if target.is_absolute() {
            self.map_in(target)?
        } else {
            target.to_path_buf()
        };
        self.inner.symlink(&link, &target)
    }

    fn rmdir(&self, outside: &Path) -> FsResult<()> {
        self.inner.rmdir(&self.map_in(outside)?)
    }

    fn unlink(&self, outside: &Path) -> FsResult<()> {
        self.inner.unlink(&self.map_in(outside)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFs;
    use std::io::{Read, Write};

    fn fixture() -> ChrootFs<MemoryFs> {
        let fs = MemoryFs::new();
        fs.mkdir(Path::new("/data")).unwrap();
        fs.mkdir(Path::new("/data/sub")).unwrap();
        let mut f = fs.open(Path::new("/data/sub/f"), OpenFlags::WRITE).unwrap();
        f.write_all(b"inside").unwrap();
        drop(f);
        ChrootFs::new(fs, "/jail", "/data")
    }

    #[test]
    fn paths_are_remapped() {
        let chroot = fixture();
        assert_eq!(chroot.listdir(Path::new("/jail")).unwrap(), vec!["sub"]);
        assert_eq!(chroot.stat(Path::new("/jail/sub/f")).unwrap().size, 6);
        let mut data = Vec::new();
        chroot
            .open(Path::new("/jail/sub/f"), OpenFlags::READ)
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"inside");
    }

    #[test]
    fn writes_land_in_the_internal_subtree() {
        let chroot = fixture();
        chroot.mkdir(Path::new("/jail/fresh")).unwrap();
        assert!(chroot
            .inner()
            .stat(Path::new("/data/fresh"))
            .unwrap()
            .is_dir());
    }

    #[test]
    fn escaping_the_external_root_is_eacces() {
        let chroot = fixture();
        assert!(matches!(
            chroot.stat(Path::new("/elsewhere")),
            Err(FsError::PermissionDenied { .. })
        ));
        // Dot-dot cannot climb out either: normalization collapses first.
        assert!(matches!(
            chroot.stat(Path::new("/jail/../etc")),
            Err(FsError::PermissionDenied { .. })
        ));
        assert!(!chroot
            .access(Path::new("/elsewhere"), AccessMode::EXISTS)
            .unwrap());
    }

    #[test]
    fn absolute_readlink_targets_are_mapped_back() {
        let chroot = fixture();
        chroot
            .inner()
            .symlink(Path::new("/data/l"), Path::new("/data/sub/f"))
            .unwrap();
        assert_eq!(
            chroot.readlink(Path::new("/jail/l")).unwrap(),
            PathBuf::from("/jail/sub/f")
        );
    }

    #[test]
    fn relative_symlink_targets_pass_through() {
        let chroot = fixture();
        chroot
            .symlink(Path::new("/jail/rel"), Path::new("sub/f"))
            .unwrap();
        assert_eq!(
            chroot.readlink(Path::new("/jail/rel")).unwrap(),
            PathBuf::from("sub/f")
        );
    }
}
