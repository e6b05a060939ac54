//! # In-Memory Backend
//!
//! [`MemoryFs`] keeps a live object tree — directories owning their
//! children, files owning a shared byte buffer, symlinks owning a target
//! path — and enforces POSIX-style permission checks against the
//! backend's effective uid/gid. It is complete enough to serve as the
//! writable branch of a union (wrapped in a whiteout layer).
//!
//! ## Semantics
//!
//! - Resolution walks the tree from the root; symlinks are resolved at
//!   use time with a bounded depth (`EINVAL` past 40 levels).
//! - Creating an entry requires write permission on the parent
//!   directory; if the parent carries the setgid bit, the child inherits
//!   the parent's gid.
//! - Default modes come from the umask captured at construction:
//!   `0o777 & !umask` for directories, `0o666 & !umask` for files,
//!   `0o777` unmasked for symlinks.
//! - File streams share the node's buffer; the buffer outlives any
//!   stream, and writes land before the write call returns.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::debug;

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path::{self, ROOT};
use crate::types::{mode, AccessMode, FileStat, OpenFlags};

const SYMLINK_MAX_DEPTH: usize = 40;

#[derive(Debug, Clone)]
struct Meta {
    mode: u32,
    uid: u32,
    gid: u32,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
}

impl Meta {
    fn new(mode_bits: u32, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Meta {
            mode: mode_bits,
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

enum Body {
    File(Arc<RwLock<Vec<u8>>>),
    Dir(BTreeMap<String, Node>),
    Symlink(PathBuf),
}

struct Node {
    meta: Meta,
    body: Body,
}

/// Object-tree filesystem held entirely in memory.
///
/// All state lives behind one lock; operations are synchronous and run
/// to completion. Instances capture a default umask, uid, and gid at
/// construction; the uid/gid pair acts as the effective identity for
/// every permission check.
pub struct MemoryFs {
    root: RwLock<Node>,
    umask: u32,
    uid: u32,
    gid: u32,
}

impl MemoryFs {
    /// A memory filesystem owned by the current process identity, with
    /// the conventional `0o022` umask.
    ///
    /// `umask(2)` has no read-only query, so the active process umask is
    /// not probed.
    pub fn new() -> Self {
        Self::with_defaults(0o022, process_uid(), process_gid())
    }

    /// A memory filesystem with an explicit default umask, uid, and gid.
    pub fn with_defaults(umask: u32, uid: u32, gid: u32) -> Self {
        let root = Node {
            meta: Meta::new(mode::S_IFDIR | (0o777 & !umask), uid, gid),
            body: Body::Dir(BTreeMap::new()),
        };
        MemoryFs {
            root: RwLock::new(root),
            umask,
            uid,
            gid,
        }
    }

    fn allowed(&self, meta: &Meta, want: AccessMode) -> bool {
        if want.is_empty() {
            return true;
        }
        let shift = if self.uid == meta.uid {
            6
        } else if self.gid == meta.gid {
            3
        } else {
            0
        };
        let bits = (meta.mode >> shift) & 0o7;
        (!want.contains(AccessMode::READ) || bits & 0o4 != 0)
            && (!want.contains(AccessMode::WRITE) || bits & 0o2 != 0)
            && (!want.contains(AccessMode::EXECUTE) || bits & 0o1 != 0)
    }

    /// Resolve `path` to its canonical, symlink-free form.
    ///
    /// Verifies existence, directory-ness, and search permission of
    /// every directory crossed. With `follow_last` the final component
    /// is resolved through symlinks as well.
    fn canonical(&self, root: &Node, requested: &Path, follow_last: bool) -> FsResult<PathBuf> {
        let normalized = path::normalize(requested);
        let mut parts: VecDeque<String> = path::names(&normalized).into();
        let mut canon = PathBuf::from(ROOT);
        let mut depth = 0usize;
        while let Some(name) = parts.pop_front() {
            let dir = node_at(root, &canon).expect("verified canonical prefix");
            let Body::Dir(children) = &dir.body else {
                return Err(FsError::NotADirectory {
                    path: normalized.clone(),
                });
            };
            if !self.allowed(&dir.meta, AccessMode::EXECUTE) {
                return Err(FsError::PermissionDenied {
                    path: normalized.clone(),
                });
            }
            let child = children.get(&name).ok_or_else(|| FsError::NotFound {
                path: normalized.clone(),
            })?;
            if let Body::Symlink(target) = &child.body {
                if !parts.is_empty() || follow_last {
                    depth += 1;
                    if depth > SYMLINK_MAX_DEPTH {
                        return Err(FsError::InvalidArgument {
                            path: normalized.clone(),
                            reason: "too many levels of symbolic links",
                        });
                    }
                    let joined = if target.is_absolute() {
                        target.clone()
                    } else {
                        canon.join(target)
                    };
                    let mut next: VecDeque<String> =
                        path::names(&path::normalize(&joined)).into();
                    next.extend(parts.drain(..));
                    parts = next;
                    canon = PathBuf::from(ROOT);
                    continue;
                }
            }
            canon.push(&name);
        }
        Ok(canon)
    }

    /// Canonicalize the parent of `path` and split off the final name.
    fn locate_parent(
        &self,
        root: &Node,
        requested: &Path,
    ) -> FsResult<(PathBuf, String)> {
        let normalized = path::normalize(requested);
        let name = match path::names(&normalized).pop() {
            Some(name) => name,
            None => {
                // The root itself: no parent to create into.
                return Err(FsError::AlreadyExists {
                    path: normalized,
                });
            }
        };
        let parent_canon = self.canonical(root, &path::parent(&normalized), true)?;
        Ok((parent_canon, name))
    }

    fn child_gid(&self, parent_meta: &Meta) -> u32 {
        if parent_meta.mode & mode::S_ISGID != 0 {
            parent_meta.gid
        } else {
            self.gid
        }
    }

    fn stat_of(node: &Node) -> FileStat {
        let (size, nlink) = match &node.body {
            Body::File(buf) => (buf.read().unwrap().len() as u64, 1),
            Body::Dir(_) => (0, 2),
            Body::Symlink(target) => (target.as_os_str().len() as u64, 1),
        };
        FileStat {
            mode: node.meta.mode,
            nlink,
            uid: node.meta.uid,
            gid: node.meta.gid,
            size,
            atime: node.meta.atime,
            mtime: node.meta.mtime,
            ctime: node.meta.ctime,
        }
    }

    /// Insert a freshly created node under an already canonicalized
    /// parent directory, enforcing the parent write check.
    fn create_node(
        &self,
        root: &mut Node,
        parent_canon: &Path,
        name: String,
        requested: &Path,
        build: impl FnOnce(u32) -> Node,
    ) -> FsResult<()> {
        let parent = node_at_mut(root, parent_canon).expect("verified canonical prefix");
        if !self.allowed(&parent.meta, AccessMode::WRITE) {
            return Err(FsError::PermissionDenied {
                path: requested.to_path_buf(),
            });
        }
        let gid = self.child_gid(&parent.meta);
        let Body::Dir(children) = &mut parent.body else {
            return Err(FsError::NotADirectory {
                path: requested.to_path_buf(),
            });
        };
        if children.contains_key(&name) {
            return Err(FsError::AlreadyExists {
                path: requested.to_path_buf(),
            });
        }
        children.insert(name, build(gid));
        Ok(())
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn node_at<'a>(root: &'a Node, canon: &Path) -> Option<&'a Node> {
    let mut current = root;
    for name in path::names(canon) {
        match &current.body {
            Body::Dir(children) => current = children.get(&name)?,
            _ => return None,
        }
    }
    Some(current)
}

fn node_at_mut<'a>(root: &'a mut Node, canon: &Path) -> Option<&'a mut Node> {
    let mut current = root;
    for name in path::names(canon) {
        match &mut current.body {
            Body::Dir(children) => current = children.get_mut(&name)?,
            _ => return None,
        }
    }
    Some(current)
}

impl Vfs for MemoryFs {
    fn access(&self, path: &Path, want: AccessMode) -> FsResult<bool> {
        let guard = self.root.read().unwrap();
        let canon = match self.canonical(&guard, path, true) {
            Ok(canon) => canon,
            Err(
                FsError::NotFound { .. }
                | FsError::NotADirectory { .. }
                | FsError::PermissionDenied { .. },
            ) => return Ok(false),
            Err(err) => return Err(err),
        };
        let node = node_at(&guard, &canon).expect("verified canonical prefix");
        Ok(self.allowed(&node.meta, want))
    }

    fn stat(&self, path: &Path) -> FsResult<FileStat> {
        let guard = self.root.read().unwrap();
        let canon = self.canonical(&guard, path, true)?;
        Ok(Self::stat_of(node_at(&guard, &canon).expect("verified canonical prefix")))
    }

    fn lstat(&self, path: &Path) -> FsResult<FileStat> {
        let guard = self.root.read().unwrap();
        let canon = self.canonical(&guard, path, false)?;
        Ok(Self::stat_of(node_at(&guard, &canon).expect("verified canonical prefix")))
    }

    fn listdir(&self, path: &Path) -> FsResult<Vec<String>> {
        let guard = self.root.read().unwrap();
        let canon = self.canonical(&guard, path, true)?;
        let node = node_at(&guard, &canon).expect("verified canonical prefix");
        let Body::Dir(children) = &node.body else {
            return Err(FsError::NotADirectory {
                path: path::normalize(path),
            });
        };
        if !self.allowed(&node.meta, AccessMode::READ) {
            return Err(FsError::PermissionDenied {
                path: path::normalize(path),
            });
        }
        Ok(children.keys().cloned().collect())
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        let guard = self.root.read().unwrap();
        let canon = self.canonical(&guard, path, false)?;
        let node = node_at(&guard, &canon).expect("verified canonical prefix");
        match &node.body {
            Body::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument {
                path: path::normalize(path),
                reason: "not a symbolic link",
            }),
        }
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        if !flags.read && !flags.writes() {
            return Err(FsError::InvalidArgument {
                path: path::normalize(path),
                reason: "open mode has neither read nor write intent",
            });
        }
        let normalized = path::normalize(path);
        let mut guard = self.root.write().unwrap();
        if normalized == Path::new(ROOT) {
            return Err(FsError::IsADirectory { path: normalized });
        }
        let (parent_canon, name) = self.locate_parent(&guard, &normalized)?;
        let full = parent_canon.join(&name);
        let resolved = match self.canonical(&guard, &full, true) {
            Ok(canon) => Some(canon),
            Err(FsError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        match resolved {
            Some(canon) => {
                let node = node_at(&guard, &canon).expect("verified canonical prefix");
                let buf = match &node.body {
                    Body::File(buf) => Arc::clone(buf),
                    Body::Dir(_) => {
                        return Err(FsError::IsADirectory { path: normalized });
                    }
                    Body::Symlink(_) => unreachable!("canonical resolved the final symlink"),
                };
                let mut want = AccessMode::empty();
                if flags.read {
                    want |= AccessMode::READ;
                }
                if flags.writes() {
                    want |= AccessMode::WRITE;
                }
                if !self.allowed(&node.meta, want) {
                    return Err(FsError::PermissionDenied { path: normalized });
                }
                if flags.truncate {
                    buf.write().unwrap().clear();
                    let node = node_at_mut(&mut guard, &canon).expect("verified canonical prefix");
                    node.meta.mtime = SystemTime::now();
                }
                Ok(Box::new(MemFile::new(buf, flags)))
            }
            None => {
                if !flags.create {
                    return Err(FsError::NotFound { path: normalized });
                }
                let buf = Arc::new(RwLock::new(Vec::new()));
                let stream = Arc::clone(&buf);
                let default_mode = mode::S_IFREG | (0o666 & !self.umask);
                let uid = self.uid;
                self.create_node(&mut guard, &parent_canon, name, &normalized, |gid| Node {
                    meta: Meta::new(default_mode, uid, gid),
                    body: Body::File(buf),
                })?;
                debug!(path = %normalized.display(), "created file");
                Ok(Box::new(MemFile::new(stream, flags)))
            }
        }
    }

    fn chmod(&self, path: &Path, new_mode: u32) -> FsResult<()> {
        let mut guard = self.root.write().unwrap();
        let canon = self.canonical(&guard, path, true)?;
        let node = node_at_mut(&mut guard, &canon).expect("verified canonical prefix");
        node.meta.mode = (node.meta.mode & !mode::S_IMODE) | (new_mode & mode::S_IMODE);
        node.meta.ctime = SystemTime::now();
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> FsResult<()> {
        let mut guard = self.root.write().unwrap();
        let canon = self.canonical(&guard, path, true)?;
        let node = node_at_mut(&mut guard, &canon).expect("verified canonical prefix");
        node.meta.uid = uid;
        node.meta.gid = gid;
        node.meta.ctime = SystemTime::now();
        Ok(())
    }

    fn mkdir(&self, path: &Path) -> FsResult<()> {
        let normalized = path::normalize(path);
        let mut guard = self.root.write().unwrap();
        let (parent_canon, name) = self.locate_parent(&guard, &normalized)?;
        let dir_mode = mode::S_IFDIR | (0o777 & !self.umask);
        let uid = self.uid;
        self.create_node(&mut guard, &parent_canon, name, &normalized, |gid| Node {
            meta: Meta::new(dir_mode, uid, gid),
            body: Body::Dir(BTreeMap::new()),
        })?;
        debug!(path = %normalized.display(), "created directory");
        Ok(())
    }

    fn symlink(&self, link: &Path, target: &Path) -> FsResult<()> {
        let normalized = path::normalize(link);
        let mut guard = self.root.write().unwrap();
        let (parent_canon, name) = self.locate_parent(&guard, &normalized)?;
        let uid = self.uid;
        let target = target.to_path_buf();
        self.create_node(&mut guard, &parent_canon, name, &normalized, |gid| Node {
            meta: Meta::new(mode::S_IFLNK | 0o777, uid, gid),
            body: Body::Symlink(target),
        })?;
        debug!(path = %normalized.display(), "created symlink");
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        let normalized = path::normalize(path);
        if normalized == Path::new(ROOT) {
            return Err(FsError::Busy { path: normalized });
        }
        let mut guard = self.root.write().unwrap();
        let (parent_canon, name) = self.locate_parent(&guard, &normalized)?;
        let parent = node_at_mut(&mut guard, &parent_canon).expect("verified canonical prefix");
        if !self.allowed(&parent.meta, AccessMode::WRITE) {
            return Err(FsError::PermissionDenied { path: normalized });
        }
        let Body::Dir(children) = &mut parent.body else {
            return Err(FsError::NotADirectory { path: normalized });
        };
        let child = children.get(&name).ok_or_else(|| FsError::NotFound {
            path: normalized.clone(),
        })?;
        match &child.body {
            Body::Dir(grandchildren) => {
                if !grandchildren.is_empty() {
                    return Err(FsError::DirectoryNotEmpty { path: normalized });
                }
            }
            _ => return Err(FsError::NotADirectory { path: normalized }),
        }
        children.remove(&name);
        debug!(path = %normalized.display(), "removed directory");
        Ok(())
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        let normalized = path::normalize(path);
        if normalized == Path::new(ROOT) {
            return Err(FsError::IsADirectory { path: normalized });
        }
        let mut guard = self.root.write().unwrap();
        let (parent_canon, name) = self.locate_parent(&guard, &normalized)?;
        let parent = node_at_mut(&mut guard, &parent_canon).expect("verified canonical prefix");
        if !self.allowed(&parent.meta, AccessMode::WRITE) {
            return Err(FsError::PermissionDenied { path: normalized });
        }
        let Body::Dir(children) = &mut parent.body else {
            return Err(FsError::NotADirectory { path: normalized });
        };
        let child = children.get(&name).ok_or_else(|| FsError::NotFound {
            path: normalized.clone(),
        })?;
        if matches!(child.body, Body::Dir(_)) {
            return Err(FsError::IsADirectory { path: normalized });
        }
        children.remove(&name);
        debug!(path = %normalized.display(), "removed entry");
        Ok(())
    }
}

/// Stream over a memory file's shared buffer.
///
/// Reads and writes go straight through the shared buffer, so effects
/// are visible to every other stream and to `stat` immediately.
struct MemFile {
    buf: Arc<RwLock<Vec<u8>>>,
    pos: u64,
    flags: OpenFlags,
}

impl MemFile {
    fn new(buf: Arc<RwLock<Vec<u8>>>, flags: OpenFlags) -> Self {
        MemFile { buf, pos: 0, flags }
    }
}

impl Read for MemFile {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if !self.flags.read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "stream not opened for reading",
            ));
        }
        let data = self.buf.read().unwrap();
        let start = (self.pos as usize).min(data.len());
        let end = (start + out.len()).min(data.len());
        out[..end - start].copy_from_slice(&data[start..end]);
        self.pos = end as u64;
        Ok(end - start)
    }
}

impl Write for MemFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.flags.writes() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "stream not opened for writing",
            ));
        }
        let mut buf = self.buf.write().unwrap();
        if self.flags.append {
            self.pos = buf.len() as u64;
        }
        let start = self.pos as usize;
        if start > buf.len() {
            buf.resize(start, 0);
        }
        let overlap = (buf.len() - start).min(data.len());
        buf[start..start + overlap].copy_from_slice(&data[..overlap]);
        buf.extend_from_slice(&data[overlap..]);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let len = self.buf.read().unwrap().len() as i64;
        let target = match from {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(unix)]
fn process_uid() -> u32 {
    // Safety: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() }
}

#[cfg(unix)]
fn process_gid() -> u32 {
    // Safety: getegid has no failure modes and touches no memory.
    unsafe { libc::getegid() }
}

#[cfg(not(unix))]
fn process_uid() -> u32 {
    0
}

#[cfg(not(unix))]
fn process_gid() -> u32 {
    0
}
