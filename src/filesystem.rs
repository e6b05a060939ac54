//! # High-Level Facade
//!
//! [`FileSystem`] wraps any backend with the conveniences day-to-day
//! code wants: whole-file and line-oriented I/O, existence probes by
//! type, content hashing, recursive directory creation, copying with
//! attribute replication, and type-dispatched removal.
//!
//! Text helpers are UTF-8; everything else is bytes.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::digest::{Digest, Output};

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{AccessMode, FileStat, OpenFlags};

const COPY_CHUNK: usize = 32768;

/// Convenience surface over any [`Vfs`] backend.
///
/// The facade adds no semantics of its own; every helper lowers onto
/// the uniform contract, so it composes with any stack of layers.
pub struct FileSystem<B> {
    backend: B,
}

impl<B: Vfs> FileSystem<B> {
    /// Wrap `backend`.
    pub fn new(backend: B) -> Self {
        FileSystem { backend }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Unwrap the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Whether `path` can be accessed for reading and/or writing.
    pub fn access(&self, path: &Path, read: bool, write: bool) -> FsResult<bool> {
        let mut mode = AccessMode::EXISTS;
        if read {
            mode |= AccessMode::READ;
        }
        if write {
            mode |= AccessMode::WRITE;
        }
        self.backend.access(path, mode)
    }

    /// Stat `path`, following symlinks.
    pub fn stat(&self, path: &Path) -> FsResult<FileStat> {
        self.backend.stat(path)
    }

    /// Whether `path` exists and is a regular file.
    pub fn file_exists(&self, path: &Path) -> FsResult<bool> {
        if !self.backend.access(path, AccessMode::EXISTS)? {
            return Ok(false);
        }
        Ok(self.backend.stat(path)?.is_file())
    }

    /// Whether `path` exists and is a directory.
    pub fn dir_exists(&self, path: &Path) -> FsResult<bool> {
        if !self.backend.access(path, AccessMode::EXISTS)? {
            return Ok(false);
        }
        Ok(self.backend.stat(path)?.is_dir())
    }

    /// Whether `path` is a symlink (dangling ones included).
    pub fn symlink_exists(&self, path: &Path) -> FsResult<bool> {
        match self.backend.lstat(path) {
            Ok(st) => Ok(st.is_symlink()),
            Err(
                FsError::NotFound { .. }
                | FsError::Deleted { .. }
                | FsError::NotADirectory { .. }
                | FsError::PermissionDenied { .. },
            ) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Open `path` as a byte stream.
    pub fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        self.backend.open(path, flags)
    }

    /// Read the whole file at `path`.
    pub fn read(&self, path: &Path) -> FsResult<Vec<u8>> {
        let mut stream = self.backend.open(path, OpenFlags::READ)?;
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|err| FsError::from_io("read", path, err))?;
        Ok(data)
    }

    /// Read the whole file at `path` as UTF-8 text.
    pub fn read_to_string(&self, path: &Path) -> FsResult<String> {
        String::from_utf8(self.read(path)?).map_err(|_| FsError::InvalidArgument {
            path: path::normalize(path),
            reason: "file contents are not valid UTF-8",
        })
    }

    /// Replace the file at `path` with `data`.
    pub fn write(&self, path: &Path, data: &[u8]) -> FsResult<()> {
        let mut stream = self.backend.open(path, OpenFlags::WRITE)?;
        stream
            .write_all(data)
            .map_err(|err| FsError::from_io("write", path, err))
    }

    /// Read the first line of `path`, trimmed of surrounding whitespace.
    ///
    /// Typically used for single-value files such as passwords or pids.
    pub fn read_one_line(&self, path: &Path) -> FsResult<String> {
        let content = self.read_to_string(path)?;
        Ok(content.lines().next().unwrap_or("").trim().to_string())
    }

    /// All lines of `path`, without their terminating newlines.
    pub fn readlines(&self, path: &Path) -> FsResult<Vec<String>> {
        Ok(self
            .read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Write `lines` to `path`, appending a newline to each.
    pub fn writelines<S: AsRef<str>>(&self, path: &Path, lines: &[S]) -> FsResult<()> {
        let mut stream = self.backend.open(path, OpenFlags::WRITE)?;
        for line in lines {
            stream
                .write_all(line.as_ref().as_bytes())
                .and_then(|()| stream.write_all(b"\n"))
                .map_err(|err| FsError::from_io("writelines", path, err))?;
        }
        Ok(())
    }

    /// Digest the content of `path` with `D`, streaming in chunks.
    ///
    /// ```rust
    /// # use stackfs::{FileSystem, MemoryFs};
    /// # use std::path::Path;
    /// let fs = FileSystem::new(MemoryFs::new());
    /// fs.write(Path::new("/f"), b"content").unwrap();
    /// let digest = fs.get_hash::<sha2::Sha256>(Path::new("/f")).unwrap();
    /// assert_eq!(digest.len(), 32);
    /// ```
    pub fn get_hash<D: Digest>(&self, path: &Path) -> FsResult<Output<D>> {
        let mut stream = self.backend.open(path, OpenFlags::READ)?;
        let mut hasher = D::new();
        let mut buf = [0u8; COPY_CHUNK];
        loop {
            let n = stream
                .read(&mut buf)
                .map_err(|err| FsError::from_io("hash", path, err))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Create the directory at `path`.
    pub fn mkdir(&self, path: &Path) -> FsResult<()> {
        self.backend.mkdir(path)
    }

    /// Create `path` and any missing ancestors; succeeds if it already
    /// exists.
    pub fn makedirs(&self, path: &Path) -> FsResult<()> {
        for ancestor in path::ancestors(path) {
            if !self.backend.access(&ancestor, AccessMode::EXISTS)? {
                self.backend.mkdir(&ancestor)?;
            }
        }
        Ok(())
    }

    /// Set the permission bits of `path`.
    pub fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.backend.chmod(path, mode)
    }

    /// Set the ownership of `path`.
    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> FsResult<()> {
        self.backend.chown(path, uid, gid)
    }

    /// Create a symlink named `link` pointing at `target`.
    pub fn symlink(&self, link: &Path, target: &Path) -> FsResult<()> {
        self.backend.symlink(link, target)
    }

    /// Target of the symlink at `path`.
    pub fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        self.backend.readlink(path)
    }

    /// Child names of the directory at `path`.
    pub fn listdir(&self, path: &Path) -> FsResult<Vec<String>> {
        self.backend.listdir(path)
    }

    /// Create a symlink, optionally relative, optionally replacing an
    /// existing non-directory entry.
    ///
    /// With `relative`, the stored target is computed relative to the
    /// link's directory. With `force`, an existing file at `link` is
    /// removed first; an existing directory still fails `EISDIR`.
    pub fn create_symlink(
        &self,
        link: &Path,
        target: &Path,
        relative: bool,
        force: bool,
    ) -> FsResult<()> {
        let stored_target = if relative {
            path::relative_to(&path::parent(&path::normalize(link)), &path::normalize(target))
        } else {
            target.to_path_buf()
        };
        match self.backend.lstat(link) {
            Ok(st) => {
                if st.is_dir() {
                    return Err(FsError::IsADirectory {
                        path: path::normalize(link),
                    });
                }
                if !st.is_symlink() && !force {
                    return Err(FsError::AlreadyExists {
                        path: path::normalize(link),
                    });
                }
                self.backend.unlink(link)?;
            }
            Err(FsError::NotFound { .. } | FsError::Deleted { .. }) => {}
            Err(err) => return Err(err),
        }
        self.backend.symlink(link, &stored_target)
    }

    /// Copy the content of `source` to `destination`, optionally
    /// replicating mode and ownership.
    pub fn copy(
        &self,
        source: &Path,
        destination: &Path,
        copy_mode: bool,
        copy_user: bool,
    ) -> FsResult<()> {
        let mut src = self.backend.open(source, OpenFlags::READ)?;
        let mut dst = self.backend.open(destination, OpenFlags::WRITE)?;
        let mut buf = [0u8; COPY_CHUNK];
        loop {
            let n = src
                .read(&mut buf)
                .map_err(|err| FsError::from_io("copy", source, err))?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])
                .map_err(|err| FsError::from_io("copy", destination, err))?;
        }
        drop(src);
        drop(dst);
        if copy_mode || copy_user {
            let st = self.backend.stat(source)?;
            if copy_mode {
                self.backend.chmod(destination, st.permissions())?;
            }
            if copy_user {
                self.backend.chown(destination, st.uid, st.gid)?;
            }
        }
        Ok(())
    }

    /// Remove `path`, dispatching to `rmdir` or `unlink` by type.
    pub fn remove(&self, path: &Path) -> FsResult<()> {
        if self.dir_exists(path)? {
            self.backend.rmdir(path)
        } else {
            self.backend.unlink(path)
        }
    }
}
