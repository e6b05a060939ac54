//! # Mount Tree
//!
//! [`MountFs`] attaches independent filesystems at mount points and
//! routes every operation to the sub-filesystem with the longest
//! matching prefix, rewriting the path relative to that mount point.
//!
//! Mount invariants: the first mount claims `/`; later mounts must land
//! on an existing directory of the composite view and must not collide.
//! Unmounting `/`, a mount with descendant mounts, or a path that is
//! not a mount point fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult, ValidationError};
use crate::path::{self, ROOT};
use crate::types::{AccessMode, FileStat, OpenFlags};

struct Mount {
    at: PathBuf,
    fs: Arc<dyn Vfs>,
}

/// Prefix-routed tree of mounted filesystems.
///
/// The mount table is kept sorted by descending `(path length, path)`,
/// so the first ancestor match during dispatch is the longest one.
/// Mount management takes `&mut self`; configure the tree before
/// handing it out.
#[derive(Default)]
pub struct MountFs {
    mounts: Vec<Mount>,
}

impl MountFs {
    /// An empty mount tree. Every operation fails until `/` is mounted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `fs` at the mount point `at`.
    ///
    /// The first mount must be at `/`. Any later mount point must be an
    /// existing directory of the composite view and must not already be
    /// in use.
    pub fn mount_fs(&mut self, fs: Arc<dyn Vfs>, at: &Path) -> Result<(), ValidationError> {
        let at = path::normalize(at);
        if self.mounts.is_empty() {
            if at != Path::new(ROOT) {
                return Err(ValidationError::FirstMountNotRoot { path: at });
            }
        } else {
            if self.mounts.iter().any(|m| m.at == at) {
                return Err(ValidationError::DuplicateMount { path: at });
            }
            match self.stat(&at) {
                Ok(st) if st.is_dir() => {}
                _ => return Err(ValidationError::MountPointNotDirectory { path: at }),
            }
        }
        debug!(at = %at.display(), "mounted filesystem");
        self.mounts.push(Mount { at, fs });
        self.mounts.sort_by(|a, b| {
            (b.at.as_os_str().len(), &b.at).cmp(&(a.at.as_os_str().len(), &a.at))
        });
        Ok(())
    }

    /// Detach the filesystem mounted at `at`.
    ///
    /// Fails `EINVAL` for `/` or for a path that is not a mount point,
    /// and `EBUSY` when descendant mounts still exist.
    pub fn umount_fs(&mut self, at: &Path) -> FsResult<()> {
        let at = path::normalize(at);
        if at == Path::new(ROOT) {
            return Err(FsError::InvalidArgument {
                path: at,
                reason: "cannot unmount the root",
            });
        }
        let index = self
            .mounts
            .iter()
            .position(|m| m.at == at)
            .ok_or_else(|| FsError::InvalidArgument {
                path: at.clone(),
                reason: "not a mount point",
            })?;
        // Snapshot the anchors before mutating the table.
        let anchors: Vec<PathBuf> = self.mounts.iter().map(|m| m.at.clone()).collect();
        if anchors
            .iter()
            .any(|anchor| anchor != &at && path::is_ancestor(&at, anchor))
        {
            return Err(FsError::Busy { path: at });
        }
        debug!(at = %at.display(), "unmounted filesystem");
        self.mounts.remove(index);
        Ok(())
    }

    /// The longest-prefix mount for `path`, plus the path rewritten
    /// relative to its mount point.
    fn route(&self, raw: &Path) -> FsResult<(&Mount, PathBuf)> {
        let normalized = path::normalize(raw);
        for mount in &self.mounts {
            if path::is_ancestor(&mount.at, &normalized) {
                let relative = normalized
                    .strip_prefix(&mount.at)
                    .expect("checked ancestor relation");
                return Ok((mount, Path::new(ROOT).join(relative)));
            }
        }
        Err(FsError::NotFound { path: normalized })
    }
}

impl Vfs for MountFs {
    fn access(&self, raw: &Path, mode: AccessMode) -> FsResult<bool> {
        match self.route(raw) {
            Ok((mount, inside)) => mount.fs.access(&inside, mode),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn stat(&self, raw: &Path) -> FsResult<FileStat> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.stat(&inside)
    }

    fn lstat(&self, raw: &Path) -> FsResult<FileStat> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.lstat(&inside)
    }

    fn listdir(&self, raw: &Path) -> FsResult<Vec<String>> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.listdir(&inside)
    }

    fn readlink(&self, raw: &Path) -> FsResult<PathBuf> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.readlink(&inside)
    }

    fn open(&self, raw: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.open(&inside, flags)
    }

    fn chmod(&self, raw: &Path, mode: u32) -> FsResult<()> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.chmod(&inside, mode)
    }

    fn chown(&self, raw: &Path, uid: u32, gid: u32) -> FsResult<()> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.chown(&inside, uid, gid)
    }

    fn mkdir(&self, raw: &Path) -> FsResult<()> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.mkdir(&inside)
    }

    fn symlink(&self, link: &Path, target: &Path) -> FsResult<()> {
        let (mount, link_inside) = self.route(link)?;
        let target_inside = if target.is_absolute() {
            let (target_mount, inside) = self.route(target)?;
            if target_mount.at != mount.at {
                return Err(FsError::InvalidArgument {
                    path: path::normalize(link),
                    reason: "cross-filesystem symlink",
                });
            }
            inside
        } else {
            target.to_path_buf()
        };
        mount.fs.symlink(&link_inside, &target_inside)
    }

    fn rmdir(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        if self
            .mounts
            .iter()
            .any(|m| path::is_ancestor(&normalized, &m.at))
        {
            return Err(FsError::Busy { path: normalized });
        }
        let (mount, inside) = self.route(&normalized)?;
        mount.fs.rmdir(&inside)
    }

    fn unlink(&self, raw: &Path) -> FsResult<()> {
        let (mount, inside) = self.route(raw)?;
        mount.fs.unlink(&inside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFs;
    use std::io::{Read, Write};

    fn write_all(fs: &dyn Vfs, path: &str, data: &[u8]) {
        let mut stream = fs.open(Path::new(path), OpenFlags::WRITE).unwrap();
        stream.write_all(data).unwrap();
    }

    fn read_all(fs: &dyn Vfs, path: &str) -> Vec<u8> {
        let mut stream = fs.open(Path::new(path), OpenFlags::READ).unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        data
    }

    fn fixture() -> (MountFs, Arc<dyn Vfs>, Arc<dyn Vfs>) {
        let root: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
        let sub: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
        let mut mounts = MountFs::new();
        mounts.mount_fs(Arc::clone(&root), Path::new("/")).unwrap();
        mounts.mkdir(Path::new("/mnt")).unwrap();
        mounts.mount_fs(Arc::clone(&sub), Path::new("/mnt")).unwrap();
        (mounts, root, sub)
    }

    #[test]
    fn dispatch_rewrites_paths_per_mount() {
        let (mounts, root, sub) = fixture();
        write_all(&mounts, "/mnt/a", b"sub data");
        // The write landed in the sub filesystem at /a.
        assert_eq!(read_all(&*sub, "/a"), b"sub data");
        assert!(!root.access(Path::new("/a"), AccessMode::EXISTS).unwrap());
        write_all(&mounts, "/top", b"root data");
        assert_eq!(read_all(&*root, "/top"), b"root data");
    }

    #[test]
    fn the_mounted_fs_covers_the_anchor_directory() {
        let (mounts, root, _) = fixture();
        write_all(&*root, "/mnt/hidden", b"x");
        // Routed listing shows the (empty) sub filesystem, not the anchor.
        assert_eq!(mounts.listdir(Path::new("/mnt")).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn first_mount_must_be_root() {
        let mut mounts = MountFs::new();
        assert!(matches!(
            mounts.mount_fs(Arc::new(MemoryFs::new()), Path::new("/mnt")),
            Err(ValidationError::FirstMountNotRoot { .. })
        ));
    }

    #[test]
    fn mount_points_must_be_existing_directories() {
        let (mut mounts, _, _) = fixture();
        assert!(matches!(
            mounts.mount_fs(Arc::new(MemoryFs::new()), Path::new("/missing")),
            Err(ValidationError::MountPointNotDirectory { .. })
        ));
        assert!(matches!(
            mounts.mount_fs(Arc::new(MemoryFs::new()), Path::new("/mnt")),
            Err(ValidationError::DuplicateMount { .. })
        ));
    }

    #[test]
    fn umount_rules() {
        let (mut mounts, _, _) = fixture();
        // A mount below /mnt pins it.
        mounts.mkdir(Path::new("/mnt/deep")).unwrap();
        mounts
            .mount_fs(Arc::new(MemoryFs::new()), Path::new("/mnt/deep"))
            .unwrap();
        assert!(matches!(
            mounts.umount_fs(Path::new("/mnt")),
            Err(FsError::Busy { .. })
        ));
        mounts.umount_fs(Path::new("/mnt/deep")).unwrap();
        mounts.umount_fs(Path::new("/mnt")).unwrap();
        assert!(matches!(
            mounts.umount_fs(Path::new("/mnt")),
            Err(FsError::InvalidArgument { .. })
        ));
        assert!(matches!(
            mounts.umount_fs(Path::new("/")),
            Err(FsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn rmdir_of_a_mount_anchor_is_ebusy() {
        let (mounts, _, _) = fixture();
        assert!(matches!(
            mounts.rmdir(Path::new("/mnt")),
            Err(FsError::Busy { .. })
        ));
    }

    #[test]
    fn cross_filesystem_symlink_is_rejected() {
        let (mounts, _, sub) = fixture();
        let err = mounts
            .symlink(Path::new("/mnt/link"), Path::new("/top"))
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument { .. }));
        // Same-filesystem links work, with the target rewritten.
        write_all(&mounts, "/mnt/f", b"x");
        mounts
            .symlink(Path::new("/mnt/link"), Path::new("/mnt/f"))
            .unwrap();
        assert_eq!(
            sub.readlink(Path::new("/link")).unwrap(),
            PathBuf::from("/f")
        );
    }

    #[test]
    fn access_on_an_unmounted_tree_is_false() {
        let mounts = MountFs::new();
        assert!(!mounts.access(Path::new("/x"), AccessMode::EXISTS).unwrap());
        assert!(matches!(
            mounts.stat(Path::new("/x")),
            Err(FsError::NotFound { .. })
        ));
    }

    #[test]
    fn longest_prefix_wins() {
        let (mut mounts, _, _) = fixture();
        let deep: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
        mounts.mkdir(Path::new("/mnt/deep")).unwrap();
        mounts.mount_fs(Arc::clone(&deep), Path::new("/mnt/deep")).unwrap();
        write_all(&mounts, "/mnt/deep/f", b"deepest");
        assert_eq!(read_all(&*deep, "/f"), b"deepest");
    }
}
