//! # Host Passthrough Backend
//!
//! [`OsFs`] implements the uniform contract by delegating to the host's
//! filesystem. Incoming paths lose their leading `/` and are joined
//! onto `mapped_root`, so a composed tree can expose any host directory
//! as its own root. I/O errors are folded back into the errno taxonomy
//! with the virtual path attached.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{AccessMode, FileStat, OpenFlags};

/// Passthrough to the host filesystem under a mapped root directory.
pub struct OsFs {
    mapped_root: PathBuf,
}

impl OsFs {
    /// Expose the host directory `mapped_root` as `/`.
    pub fn new(mapped_root: impl Into<PathBuf>) -> Self {
        OsFs {
            mapped_root: mapped_root.into(),
        }
    }

    fn host_path(&self, raw: &Path) -> PathBuf {
        let normalized = path::normalize(raw);
        match normalized.strip_prefix("/") {
            Ok(relative) => self.mapped_root.join(relative),
            Err(_) => self.mapped_root.join(&normalized),
        }
    }

    fn stat_from_metadata(meta: &fs::Metadata) -> FileStat {
        FileStat {
            mode: meta.mode(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.len(),
            atime: system_time(meta.atime()),
            mtime: system_time(meta.mtime()),
            ctime: system_time(meta.ctime()),
        }
    }
}

fn system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

impl Vfs for OsFs {
    fn access(&self, raw: &Path, mode: AccessMode) -> FsResult<bool> {
        let host = self.host_path(raw);
        let c_path = match std::ffi::CString::new(host.as_os_str().as_bytes()) {
            Ok(c_path) => c_path,
            Err(_) => return Ok(false),
        };
        let mut mask = libc::F_OK;
        if mode.contains(AccessMode::READ) {
            mask |= libc::R_OK;
        }
        if mode.contains(AccessMode::WRITE) {
            mask |= libc::W_OK;
        }
        if mode.contains(AccessMode::EXECUTE) {
            mask |= libc::X_OK;
        }
        // Safety: access reads a NUL-terminated path and touches nothing else.
        Ok(unsafe { libc::access(c_path.as_ptr(), mask) } == 0)
    }

    fn stat(&self, raw: &Path) -> FsResult<FileStat> {
        let host = self.host_path(raw);
        let meta = fs::metadata(&host).map_err(|err| FsError::from_io("stat", raw, err))?;
        Ok(Self::stat_from_metadata(&meta))
    }

    fn lstat(&self, raw: &Path) -> FsResult<FileStat> {
        let host = self.host_path(raw);
        let meta =
            fs::symlink_metadata(&host).map_err(|err| FsError::from_io("lstat", raw, err))?;
        Ok(Self::stat_from_metadata(&meta))
    }

    fn listdir(&self, raw: &Path) -> FsResult<Vec<String>> {
        let host = self.host_path(raw);
        let entries = fs::read_dir(&host).map_err(|err| FsError::from_io("listdir", raw, err))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FsError::from_io("listdir", raw, err))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn readlink(&self, raw: &Path) -> FsResult<PathBuf> {
        let host = self.host_path(raw);
        match fs::read_link(&host) {
            Ok(target) => Ok(target),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {
                Err(FsError::InvalidArgument {
                    path: path::normalize(raw),
                    reason: "not a symbolic link",
                })
            }
            Err(err) => Err(FsError::from_io("readlink", raw, err)),
        }
    }

    fn open(&self, raw: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        let host = self.host_path(raw);
        let file = fs::OpenOptions::new()
            .read(flags.read)
            .write(flags.write || flags.truncate)
            .append(flags.append)
            .create(flags.create)
            .truncate(flags.truncate)
            .open(&host)
            .map_err(|err| FsError::from_io("open", raw, err))?;
        Ok(Box::new(file))
    }

    fn chmod(&self, raw: &Path, mode: u32) -> FsResult<()> {
        let host = self.host_path(raw);
        fs::set_permissions(&host, fs::Permissions::from_mode(mode))
            .map_err(|err| FsError::from_io("chmod", raw, err))
    }

    fn chown(&self, raw: &Path, uid: u32, gid: u32) -> FsResult<()> {
        let host = self.host_path(raw);
        std::os::unix::fs::chown(&host, Some(uid), Some(gid))
            .map_err(|err| FsError::from_io("chown", raw, err))
    }

    fn mkdir(&self, raw: &Path) -> FsResult<()> {
        let host = self.host_path(raw);
        fs::create_dir(&host).map_err(|err| FsError::from_io("mkdir", raw, err))
    }

    fn symlink(&self, link: &Path, target: &Path) -> FsResult<()> {
        let host_link = self.host_path(link);
        let host_target = if target.is_absolute() {
            self.host_path(target)
        } else {
            target.to_path_buf()
        };
        std::os::unix::fs::symlink(&host_target, &host_link)
            .map_err(|err| FsError::from_io("symlink", link, err))
    }

    fn rmdir(&self, raw: &Path) -> FsResult<()> {
        let host = self.host_path(raw);
        fs::remove_dir(&host).map_err(|err| FsError::from_io("rmdir", raw, err))
    }

    fn unlink(&self, raw: &Path) -> FsResult<()> {
        let host = self.host_path(raw);
        fs::remove_file(&host).map_err(|err| FsError::from_io("unlink", raw, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn fixture() -> (tempfile::TempDir, OsFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new(dir.path());
        (dir, fs)
    }

    #[test]
    fn paths_are_anchored_at_the_mapped_root() {
        let (dir, fs) = fixture();
        fs.mkdir(Path::new("/sub")).unwrap();
        assert!(dir.path().join("sub").is_dir());
        let mut f = fs.open(Path::new("/sub/f"), OpenFlags::WRITE).unwrap();
        f.write_all(b"host data").unwrap();
        drop(f);
        assert_eq!(std::fs::read(dir.path().join("sub/f")).unwrap(), b"host data");
    }

    #[test]
    fn stat_and_listdir_round_trip() {
        let (_dir, fs) = fixture();
        fs.mkdir(Path::new("/d")).unwrap();
        let mut f = fs.open(Path::new("/d/f"), OpenFlags::WRITE).unwrap();
        f.write_all(b"12345").unwrap();
        drop(f);
        let st = fs.stat(Path::new("/d/f")).unwrap();
        assert!(st.is_file());
        assert_eq!(st.size, 5);
        assert_eq!(fs.listdir(Path::new("/d")).unwrap(), vec!["f"]);
        let mut data = Vec::new();
        fs.open(Path::new("/d/f"), OpenFlags::READ)
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"12345");
    }

    #[test]
    fn missing_paths_map_to_enoent() {
        let (_dir, fs) = fixture();
        assert!(matches!(
            fs.stat(Path::new("/missing")),
            Err(FsError::NotFound { .. })
        ));
        assert!(!fs.access(Path::new("/missing"), AccessMode::EXISTS).unwrap());
    }

    #[test]
    fn symlink_and_readlink() {
        let (_dir, fs) = fixture();
        let mut f = fs.open(Path::new("/f"), OpenFlags::WRITE).unwrap();
        f.write_all(b"x").unwrap();
        drop(f);
        fs.symlink(Path::new("/l"), Path::new("f")).unwrap();
        assert_eq!(fs.readlink(Path::new("/l")).unwrap(), PathBuf::from("f"));
        assert!(fs.lstat(Path::new("/l")).unwrap().is_symlink());
        assert!(fs.stat(Path::new("/l")).unwrap().is_file());
        assert!(matches!(
            fs.readlink(Path::new("/f")),
            Err(FsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn unlink_and_rmdir() {
        let (dir, fs) = fixture();
        fs.mkdir(Path::new("/d")).unwrap();
        let mut f = fs.open(Path::new("/d/f"), OpenFlags::WRITE).unwrap();
        f.write_all(b"x").unwrap();
        drop(f);
        assert!(matches!(
            fs.rmdir(Path::new("/d")),
            Err(FsError::DirectoryNotEmpty { .. }) | Err(FsError::Io { .. })
        ));
        fs.unlink(Path::new("/d/f")).unwrap();
        fs.rmdir(Path::new("/d")).unwrap();
        assert!(!dir.path().join("d").exists());
    }
}
