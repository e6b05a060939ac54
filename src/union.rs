//! # Union Layer
//!
//! [`UnionFs`] stacks any number of branches, each an independent
//! filesystem with a *rank* (smaller = higher priority) and a
//! writability flag. Reads see the highest-priority branch that has the
//! entry; writes are redirected to the writable branch after a
//! *copy-up* replicates whatever the mutation needs. Deletions in a
//! writable branch are whiteout marks, which *shadow* the same path in
//! every deeper branch.
//!
//! ## Error-as-status scanning
//!
//! A branch's `stat` outcome is folded into a small status enum rather
//! than treated as control flow: the first non-`Unknown` status wins,
//! and a `Deleted`, `NoPerm`, or `Invalid` outcome halts the scan and
//! shadows everything below it.
//!
//! ## Writable branches
//!
//! A writable branch must advertise `WHITEOUT` and must not advertise
//! `READONLY` — deletions of entities living in deeper branches can
//! only be expressed as marks. When several branches are writable, the
//! lowest-rank one receives every write.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult, ValidationError};
use crate::path;
use crate::types::{AccessMode, Features, FileStat, OpenFlags};

struct Branch {
    name: String,
    fs: Arc<dyn Vfs>,
    rank: u32,
    writable: bool,
}

/// What `stat` on one branch said about a path.
enum BranchStatus {
    /// The branch holds the entry.
    Exists(FileStat),
    /// The branch shadows the entry with a whiteout mark.
    Deleted,
    /// The branch denies access to the entry.
    NoPerm,
    /// A non-directory sits on the path within the branch.
    Invalid,
    /// The branch knows nothing about the entry.
    Unknown,
}

fn status(fs: &dyn Vfs, path: &Path) -> FsResult<BranchStatus> {
    match fs.stat(path) {
        Ok(st) => Ok(BranchStatus::Exists(st)),
        Err(FsError::Deleted { .. }) => Ok(BranchStatus::Deleted),
        Err(FsError::PermissionDenied { .. }) => Ok(BranchStatus::NoPerm),
        Err(FsError::NotADirectory { .. }) => Ok(BranchStatus::Invalid),
        Err(FsError::NotFound { .. }) => Ok(BranchStatus::Unknown),
        Err(err) => Err(err),
    }
}

/// Existence expectation a mutation places on its target.
enum Existence {
    MustExist,
    MustNotExist,
    Any,
}

/// Multi-branch stacking filesystem with copy-on-write.
///
/// Configure branches with [`add_branch`](UnionFs::add_branch) before
/// handing the union out; branch management takes `&mut self`.
///
/// In *strict* mode, failures while replicating mode and ownership
/// during copy-up propagate; otherwise they are logged and swallowed.
pub struct UnionFs {
    branches: Vec<Branch>,
    strict: bool,
}

impl UnionFs {
    /// An empty union.
    pub fn new(strict: bool) -> Self {
        UnionFs {
            branches: Vec::new(),
            strict,
        }
    }

    /// Register `fs` as a branch under a fresh `name`.
    ///
    /// `rank` defaults to one past the highest existing rank. A
    /// writable branch must advertise `WHITEOUT` and must not advertise
    /// `READONLY`.
    pub fn add_branch(
        &mut self,
        fs: Arc<dyn Vfs>,
        name: impl Into<String>,
        rank: Option<u32>,
        writable: bool,
    ) -> Result<(), ValidationError> {
        let name = name.into();
        if self.branches.iter().any(|b| b.name == name) {
            return Err(ValidationError::DuplicateBranch { name });
        }
        let rank = rank.unwrap_or_else(|| {
            self.branches
                .iter()
                .map(|b| b.rank + 1)
                .max()
                .unwrap_or(0)
        });
        if self.branches.iter().any(|b| b.rank == rank) {
            return Err(ValidationError::RankInUse { rank });
        }
        if writable {
            if fs.has_feature(Features::READONLY) {
                return Err(ValidationError::BranchReadOnly { name });
            }
            if !fs.has_feature(Features::WHITEOUT) {
                return Err(ValidationError::BranchNotWhiteout { name });
            }
        }
        self.branches.push(Branch {
            name,
            fs,
            rank,
            writable,
        });
        self.branches.sort_by_key(|b| b.rank);
        Ok(())
    }

    /// Drop the branch registered under `name`.
    pub fn remove_branch(&mut self, name: &str) -> Result<(), ValidationError> {
        let index = self
            .branches
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| ValidationError::UnknownBranch {
                name: name.to_string(),
            })?;
        self.branches.remove(index);
        Ok(())
    }

    /// The branch serving a read of `path`: the first branch, in rank
    /// order, whose `stat` succeeds. Shadowing statuses halt the scan.
    fn read_branch(&self, normalized: &Path) -> FsResult<&Branch> {
        for branch in &self.branches {
            match status(&*branch.fs, normalized)? {
                BranchStatus::Exists(_) => return Ok(branch),
                BranchStatus::Deleted => {
                    return Err(FsError::Deleted {
                        path: normalized.to_path_buf(),
                    });
                }
                BranchStatus::NoPerm => {
                    return Err(FsError::PermissionDenied {
                        path: normalized.to_path_buf(),
                    });
                }
                BranchStatus::Invalid => {
                    return Err(FsError::NotADirectory {
                        path: normalized.to_path_buf(),
                    });
                }
                BranchStatus::Unknown => {}
            }
        }
        Err(FsError::NotFound {
            path: normalized.to_path_buf(),
        })
    }

    /// Union-view existence: the first branch holding `path`, or `None`
    /// when every branch is silent (or a shadow hides the rest).
    fn lookup(&self, normalized: &Path) -> FsResult<Option<(usize, FileStat)>> {
        for (index, branch) in self.branches.iter().enumerate() {
            match status(&*branch.fs, normalized)? {
                BranchStatus::Exists(st) => return Ok(Some((index, st))),
                BranchStatus::Deleted => return Ok(None),
                BranchStatus::NoPerm => {
                    return Err(FsError::PermissionDenied {
                        path: normalized.to_path_buf(),
                    });
                }
                BranchStatus::Invalid => {
                    return Err(FsError::NotADirectory {
                        path: normalized.to_path_buf(),
                    });
                }
                BranchStatus::Unknown => {}
            }
        }
        Ok(None)
    }

    /// Best-effort replication of mode and ownership onto the target
    /// branch. Failures propagate only in strict mode.
    fn replicate_attrs(&self, fs: &dyn Vfs, normalized: &Path, st: &FileStat) -> FsResult<()> {
        if let Err(err) = fs.chmod(normalized, st.permissions()) {
            if self.strict {
                return Err(err);
            }
            debug!(path = %normalized.display(), error = %err, "copy-up chmod suppressed");
        }
        if let Err(err) = fs.chown(normalized, st.uid, st.gid) {
            if self.strict {
                return Err(err);
            }
            debug!(path = %normalized.display(), error = %err, "copy-up chown suppressed");
        }
        Ok(())
    }

    /// Prepare the writable branch for a mutation of `path`.
    ///
    /// Resolves the parent from the union view, applies the existence
    /// expectation, recreates the parent chain in the writable branch,
    /// and replicates the entity itself when it lives in another
    /// branch. `truncates` elides the content copy for operations that
    /// immediately overwrite it.
    fn copy_up(
        &self,
        normalized: &Path,
        expect: Existence,
        truncates: bool,
    ) -> FsResult<&Branch> {
        let target_index = self
            .branches
            .iter()
            .position(|b| b.writable)
            .ok_or_else(|| FsError::ReadOnly {
                path: normalized.to_path_buf(),
            })?;

        let parent = path::parent(normalized);
        if parent.as_path() != normalized {
            match self.lookup(&parent)? {
                Some((_, st)) if st.is_dir() => {}
                Some(_) => return Err(FsError::NotADirectory { path: parent }),
                None => return Err(FsError::NotFound { path: parent }),
            }
        }

        let existing = self.lookup(normalized)?;
        match expect {
            Existence::MustExist if existing.is_none() => {
                return Err(FsError::NotFound {
                    path: normalized.to_path_buf(),
                });
            }
            Existence::MustNotExist if existing.is_some() => {
                return Err(FsError::AlreadyExists {
                    path: normalized.to_path_buf(),
                });
            }
            _ => {}
        }

        let target = &self.branches[target_index];

        // Recreate the ancestor chain, copying attributes from the
        // union view; the branch root itself always exists.
        for ancestor in path::ancestors(&parent).into_iter().skip(1) {
            match status(&*target.fs, &ancestor)? {
                BranchStatus::Exists(st) if st.is_dir() => {}
                BranchStatus::Exists(_) => {
                    return Err(FsError::NotADirectory { path: ancestor });
                }
                BranchStatus::NoPerm => {
                    return Err(FsError::PermissionDenied { path: ancestor });
                }
                BranchStatus::Invalid => {
                    return Err(FsError::NotADirectory { path: ancestor });
                }
                BranchStatus::Deleted | BranchStatus::Unknown => {
                    let st = self.stat(&ancestor)?;
                    debug!(branch = %target.name, path = %ancestor.display(), "copy-up mkdir");
                    target.fs.mkdir(&ancestor)?;
                    self.replicate_attrs(&*target.fs, &ancestor, &st)?;
                }
            }
        }

        if let Some((source_index, _)) = existing {
            if source_index != target_index
                && matches!(
                    status(&*target.fs, normalized)?,
                    BranchStatus::Deleted | BranchStatus::Unknown
                )
            {
                let source = &self.branches[source_index];
                let lst = source.fs.lstat(normalized)?;
                debug!(
                    from = %source.name,
                    to = %target.name,
                    path = %normalized.display(),
                    "copy-up entity"
                );
                if lst.is_dir() {
                    target.fs.mkdir(normalized)?;
                } else if lst.is_symlink() {
                    let link_target = source.fs.readlink(normalized)?;
                    target.fs.symlink(normalized, &link_target)?;
                } else if truncates {
                    // The caller overwrites the content right away; an
                    // empty file is enough.
                    target.fs.open(normalized, OpenFlags::WRITE)?;
                } else {
                    let mut src_stream = source.fs.open(normalized, OpenFlags::READ)?;
                    let mut dst_stream = target.fs.open(normalized, OpenFlags::WRITE)?;
                    let mut buf = [0u8; 32768];
                    loop {
                        let n = src_stream
                            .read(&mut buf)
                            .map_err(|err| FsError::from_io("copy-up read", normalized, err))?;
                        if n == 0 {
                            break;
                        }
                        dst_stream
                            .write_all(&buf[..n])
                            .map_err(|err| FsError::from_io("copy-up write", normalized, err))?;
                    }
                }
                self.replicate_attrs(&*target.fs, normalized, &lst)?;
            }
        }

        Ok(target)
    }
}

impl Vfs for UnionFs {
    fn features(&self) -> Features {
        if self.branches.iter().any(|b| b.writable) {
            Features::empty()
        } else {
            Features::READONLY
        }
    }

    fn access(&self, raw: &Path, mode: AccessMode) -> FsResult<bool> {
        let normalized = path::normalize(raw);
        for branch in &self.branches {
            match status(&*branch.fs, &normalized)? {
                BranchStatus::Exists(_) => return branch.fs.access(&normalized, mode),
                BranchStatus::Unknown => {}
                _ => return Ok(false),
            }
        }
        Ok(false)
    }

    fn stat(&self, raw: &Path) -> FsResult<FileStat> {
        let normalized = path::normalize(raw);
        self.read_branch(&normalized)?.fs.stat(&normalized)
    }

    fn lstat(&self, raw: &Path) -> FsResult<FileStat> {
        let normalized = path::normalize(raw);
        self.read_branch(&normalized)?.fs.lstat(&normalized)
    }

    fn listdir(&self, raw: &Path) -> FsResult<Vec<String>> {
        let normalized = path::normalize(raw);
        let mut included = Vec::new();
        let mut stopper = None;
        for (index, branch) in self.branches.iter().enumerate() {
            match status(&*branch.fs, &normalized)? {
                BranchStatus::Unknown => continue,
                BranchStatus::Exists(st) if st.is_dir() => {
                    if branch.fs.access(&normalized, AccessMode::READ)? {
                        included.push(index);
                        continue;
                    }
                    stopper = Some(FsError::PermissionDenied {
                        path: normalized.clone(),
                    });
                }
                BranchStatus::Exists(_) | BranchStatus::Invalid => {
                    stopper = Some(FsError::NotADirectory {
                        path: normalized.clone(),
                    });
                }
                BranchStatus::Deleted => {
                    stopper = Some(FsError::Deleted {
                        path: normalized.clone(),
                    });
                }
                BranchStatus::NoPerm => {
                    stopper = Some(FsError::PermissionDenied {
                        path: normalized.clone(),
                    });
                }
            }
            break;
        }
        if included.is_empty() {
            return Err(stopper.unwrap_or(FsError::NotFound { path: normalized }));
        }
        let mut names = BTreeSet::new();
        for &index in &included {
            for name in self.branches[index].fs.listdir(&normalized)? {
                if names.contains(&name) {
                    continue;
                }
                let child = normalized.join(&name);
                let mut shadowed = false;
                for upper in &self.branches[..index] {
                    if matches!(status(&*upper.fs, &child)?, BranchStatus::Deleted) {
                        shadowed = true;
                        break;
                    }
                }
                if !shadowed {
                    names.insert(name);
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn readlink(&self, raw: &Path) -> FsResult<PathBuf> {
        let normalized = path::normalize(raw);
        self.read_branch(&normalized)?.fs.readlink(&normalized)
    }

    fn open(&self, raw: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        let normalized = path::normalize(raw);
        if flags.is_read_only() {
            return self.read_branch(&normalized)?.fs.open(&normalized, flags);
        }
        let target = self.copy_up(&normalized, Existence::Any, flags.truncate)?;
        target.fs.open(&normalized, flags)
    }

    fn chmod(&self, raw: &Path, mode: u32) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let target = self.copy_up(&normalized, Existence::MustExist, false)?;
        target.fs.chmod(&normalized, mode)
    }

    fn chown(&self, raw: &Path, uid: u32, gid: u32) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let target = self.copy_up(&normalized, Existence::MustExist, false)?;
        target.fs.chown(&normalized, uid, gid)
    }

    fn mkdir(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let target = self.copy_up(&normalized, Existence::MustNotExist, false)?;
        target.fs.mkdir(&normalized)
    }

    fn symlink(&self, link: &Path, target_path: &Path) -> FsResult<()> {
        let normalized = path::normalize(link);
        let target = self.copy_up(&normalized, Existence::MustNotExist, false)?;
        target.fs.symlink(&normalized, target_path)
    }

    fn rmdir(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let st = self.stat(&normalized)?;
        if !st.is_dir() {
            return Err(FsError::NotADirectory { path: normalized });
        }
        if !self.listdir(&normalized)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty { path: normalized });
        }
        let target = self.copy_up(&normalized, Existence::MustExist, false)?;
        target.fs.rmdir(&normalized)
    }

    fn unlink(&self, raw: &Path) -> FsResult<()> {
        let normalized = path::normalize(raw);
        let target = self.copy_up(&normalized, Existence::MustExist, false)?;
        target.fs.unlink(&normalized)
    }
}
