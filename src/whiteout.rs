//! # Whiteout Layer
//!
//! [`WhiteoutFs`] makes a read-mostly filesystem deletable without ever
//! touching it: deletions are recorded as per-path *whiteout marks* in a
//! [`WhiteoutCache`], and any read of a marked path — or of anything
//! below one — fails with the distinguished
//! [`FsError::Deleted`] so a union can tell "deleted here" apart from
//! "never existed". Re-creating a marked path clears its mark
//! (*resurrection*).
//!
//! Two cache implementations ship with the crate: a plain in-memory set
//! and a file-backed persistent set keyed by UTF-8 path. Dropping the
//! layer closes its cache.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path;
use crate::types::{AccessMode, Features, FileStat, OpenFlags};

/// The set of paths marked as deleted at a whiteout layer.
///
/// Keys are absolute normalized paths, encoded as UTF-8 where the
/// implementation persists them. `close` releases whatever durable
/// resources back the set; it is idempotent.
pub trait WhiteoutCache: Send + Sync {
    /// Whether `path` carries a whiteout mark.
    fn contains(&self, path: &Path) -> FsResult<bool>;

    /// Mark `path` as deleted.
    fn add(&self, path: &Path) -> FsResult<()>;

    /// Clear the mark on `path`, if any.
    fn remove(&self, path: &Path) -> FsResult<()>;

    /// Release any persistent resources behind the set.
    fn close(&self) -> FsResult<()>;
}

/// Whiteout cache held in a process-local set.
#[derive(Default)]
pub struct MemoryWhiteoutCache {
    paths: RwLock<HashSet<PathBuf>>,
}

impl MemoryWhiteoutCache {
    /// An empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WhiteoutCache for MemoryWhiteoutCache {
    fn contains(&self, path: &Path) -> FsResult<bool> {
        Ok(self.paths.read().unwrap().contains(path))
    }

    fn add(&self, path: &Path) -> FsResult<()> {
        self.paths.write().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        self.paths.write().unwrap().remove(path);
        Ok(())
    }

    fn close(&self) -> FsResult<()> {
        Ok(())
    }
}

/// Whiteout cache persisted to a host file, one UTF-8 path per line.
///
/// The file is rewritten on every mutation, so the set survives a
/// process restart regardless of how the layer is torn down. The
/// on-disk format is private to this type.
pub struct FileWhiteoutCache {
    store: PathBuf,
    paths: RwLock<HashSet<PathBuf>>,
}

impl FileWhiteoutCache {
    /// Open (or create) the cache persisted at `store`.
    pub fn open(store: impl Into<PathBuf>) -> FsResult<Self> {
        let store = store.into();
        let paths = match std::fs::read_to_string(&store) {
            Ok(content) => content
                .lines()
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => return Err(FsError::from_io("open", &store, err)),
        };
        Ok(FileWhiteoutCache {
            store,
            paths: RwLock::new(paths),
        })
    }

    fn persist(&self, paths: &HashSet<PathBuf>) -> FsResult<()> {
        let mut lines = Vec::with_capacity(paths.len());
        for path in paths {
            let line = path.to_str().ok_or_else(|| FsError::InvalidArgument {
                path: path.clone(),
                reason: "whiteout keys must be UTF-8",
            })?;
            lines.push(line);
        }
        lines.sort_unstable();
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(&self.store, content).map_err(|err| {
            FsError::from_io("write", &self.store, err)
        })
    }
}

impl WhiteoutCache for FileWhiteoutCache {
    fn contains(&self, path: &Path) -> FsResult<bool> {
        Ok(self.paths.read().unwrap().contains(path))
    }

    fn add(&self, path: &Path) -> FsResult<()> {
        let mut paths = self.paths.write().unwrap();
        paths.insert(path.to_path_buf());
        self.persist(&paths)
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        let mut paths = self.paths.write().unwrap();
        paths.remove(path);
        self.persist(&paths)
    }

    fn close(&self) -> FsResult<()> {
        let paths = self.paths.read().unwrap();
        self.persist(&paths)
    }
}

/// Deletion-tracking layer over a single inner filesystem.
///
/// Advertises the `WHITEOUT` feature, which qualifies it as the
/// writable branch of a union when its inner filesystem is writable.
pub struct WhiteoutFs<C: WhiteoutCache, B> {
    cache: C,
    inner: B,
}

impl<C: WhiteoutCache, B: Vfs> WhiteoutFs<C, B> {
    /// Layer `cache`-tracked deletions over `inner`.
    pub fn new(cache: C, inner: B) -> Self {
        WhiteoutFs { cache, inner }
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// The first marked path on the chain from `/` to `path` inclusive.
    fn shadowed(&self, normalized: &Path) -> FsResult<Option<PathBuf>> {
        for ancestor in path::ancestors(normalized) {
            if self.cache.contains(&ancestor)? {
                return Ok(Some(ancestor));
            }
        }
        Ok(None)
    }

    /// Fail with `Deleted` when `path` or an ancestor carries a mark.
    fn check_live(&self, normalized: &Path) -> FsResult<()> {
        match self.shadowed(normalized)? {
            Some(_) => Err(FsError::Deleted {
                path: normalized.to_path_buf(),
            }),
            None => Ok(()),
        }
    }

    /// Creation-write precondition: every strict ancestor must be live.
    fn check_parent_live(&self, normalized: &Path) -> FsResult<()> {
        match self.shadowed(&path::parent(normalized))? {
            Some(_) => Err(FsError::Deleted {
                path: normalized.to_path_buf(),
            }),
            None => Ok(()),
        }
    }

    fn resurrect(&self, normalized: &Path) -> FsResult<()> {
        if self.cache.contains(normalized)? {
            self.cache.remove(normalized)?;
            debug!(path = %normalized.display(), "resurrected whiteout");
        }
        Ok(())
    }
}

impl<C: WhiteoutCache, B> Drop for WhiteoutFs<C, B> {
    fn drop(&mut self) {
        if let Err(err) = self.cache.close() {
            debug!(error = %err, "failed to close whiteout cache");
        }
    }
}

impl<C: WhiteoutCache, B: Vfs> Vfs for WhiteoutFs<C, B> {
    fn features(&self) -> Features {
        Features::WHITEOUT | self.inner.features()
    }

    fn access(&self, raw: &Path, mode: AccessMode) -> FsResult<bool> {
        let normalized = path::normalize(raw);
        if self.shadowed(&normalized)?.is_some() {
            return Ok(false);
        }
        self.inner.access(&normalized, mode)
    }

    fn stat(&self, raw: &Path) -> FsResult<FileStat> {
        let normalized = path::normalize(raw);
        self.check_live(&normalized)?;
        self.inner.stat(&normalized)
    }

    fn lstat(&self, raw: &Path) -> FsResult<FileStat> {
        let normalized = path::normalize(raw);
        self.check_live(&normalized)?;
        self.inner.lstat(&normalized)
    }

    fn listdir(&self, raw: &Path) -> FsResult<Vec<String>> {
        let normalized = path::normalize(raw);
        self.check_live(&normalized)?;
        let mut names = Vec::new();
        for name in self.inner.listdir(&normalized)? {
            if !self.cache.contains(&normalized.join(&name))? {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn readlink(&self, raw: &Path) -> FsResult<PathBuf> {
        let normalized = path::normalize(raw);
        self.check_live(&normalized)?;
        self.inner.readlink(&normalized)
    }

    fn open(&self, raw: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        let normalized = path::normalize(raw);
        if flags.is_read_only() {
            self.check_live(&normalized)?;
            return self.inner.open(&normalized, flags);
        }
        self.check_parent_live(&normalized)?;
        if self.cache.contains(&normalized)? && !flags.create {
            // The entry is deleted from this layer's viewpoint; only a
            // creating open may bring it back.
            return Err(FsError::Deleted { path: normalized });
        }
        let stream = self.inner.open(&normalized, flags)?;
        self.resurrect(&normalized)?;
        Ok(stream)
    }

    fn chmod(&self, raw: &Path, mode: u32) -> FsResult<()> {
        let normalized = path::normalize(raw);
        self.check_live(&normalized)?;
        self.inner.chmod(&normalized, mode)
    }

    fn chown(&self, raw: &Path, uid: u32, gid: u32) -> FsResult<()> {
        let normalized = path::normalize(raw);
        self.check_live(&normalized)?;
        self.inner.chown(&normalized, uid, gid)
    }

    fn mkdir(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        self.check_parent_live(&normalized)?;
        if self.cache.contains(&normalized)? {
            // Marked deleted: the inner filesystem may still hold the old
            // entry. A directory recreates by clearing the mark alone; a
            // stale non-directory has to go so mkdir can take its place.
            match self.inner.lstat(&normalized) {
                Ok(st) if st.is_dir() => return self.resurrect(&normalized),
                Ok(_) => self.inner.unlink(&normalized)?,
                Err(FsError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        self.inner.mkdir(&normalized)?;
        self.resurrect(&normalized)
    }

    fn symlink(&self, link: &Path, target: &Path) -> FsResult<()> {
        let normalized = path::normalize(link);
        self.check_parent_live(&normalized)?;
        if self.cache.contains(&normalized)?
            && self.inner.lstat(&normalized).is_ok()
        {
            // A stale entry survives under the mark; drop it so the new
            // link can take its place.
            self.inner.unlink(&normalized)?;
        }
        self.inner.symlink(&normalized, target)?;
        self.resurrect(&normalized)
    }

    fn rmdir(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let st = self.lstat(&normalized)?;
        if !st.is_dir() {
            return Err(FsError::NotADirectory { path: normalized });
        }
        if !self.listdir(&normalized)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty { path: normalized });
        }
        debug!(path = %normalized.display(), "whiteout rmdir");
        self.cache.add(&normalized)
    }

    fn unlink(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let st = self.lstat(&normalized)?;
        if st.is_dir() {
            return Err(FsError::IsADirectory { path: normalized });
        }
        debug!(path = %normalized.display(), "whiteout unlink");
        self.cache.add(&normalized)
    }
}
