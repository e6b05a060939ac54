//! # Tar Archive Backend
//!
//! [`TarFs`] serves the read subset of the uniform contract out of a
//! tar archive. The whole archive is indexed (and file contents
//! loaded) once at construction, which is what gives a sequential
//! format random-access member lookup. The layer advertises `READONLY`
//! and fails every write with `EROFS`.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::backend::{Vfs, VfsFile};
use crate::error::{FsError, FsResult};
use crate::path::{self, ROOT};
use crate::types::{mode, AccessMode, Features, FileStat, OpenFlags};

const SYMLINK_MAX_DEPTH: usize = 40;

enum MemberKind {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
}

struct Member {
    permissions: u32,
    uid: u32,
    gid: u32,
    mtime: SystemTime,
    kind: MemberKind,
}

impl Member {
    fn stat(&self) -> FileStat {
        let (type_bits, size) = match &self.kind {
            MemberKind::File(data) => (mode::S_IFREG, data.len() as u64),
            MemberKind::Dir => (mode::S_IFDIR, 0),
            MemberKind::Symlink(target) => {
                (mode::S_IFLNK, target.as_os_str().len() as u64)
            }
        };
        FileStat {
            mode: type_bits | (self.permissions & mode::S_IMODE),
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size,
            atime: self.mtime,
            mtime: self.mtime,
            ctime: self.mtime,
        }
    }
}

/// Read-only filesystem over the members of a tar archive.
pub struct TarFs {
    members: BTreeMap<PathBuf, Member>,
}

impl TarFs {
    /// Index the archive read from `reader`.
    ///
    /// Member paths are rooted at `/`; both symlink and hard-link
    /// entries resolve through their link target at `stat` time.
    pub fn new<R: Read>(reader: R) -> FsResult<Self> {
        let mut archive = tar::Archive::new(reader);
        let mut members = BTreeMap::new();
        let entries = archive
            .entries()
            .map_err(|err| FsError::from_io("tar index", Path::new(ROOT), err))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|err| FsError::from_io("tar index", Path::new(ROOT), err))?;
            let member_path = {
                let raw = entry
                    .path()
                    .map_err(|err| FsError::from_io("tar index", Path::new(ROOT), err))?;
                path::normalize(&Path::new(ROOT).join(raw))
            };
            if member_path == Path::new(ROOT) {
                continue;
            }
            let header = entry.header();
            let permissions = header.mode().unwrap_or(0o644);
            let uid = header.uid().unwrap_or(0) as u32;
            let gid = header.gid().unwrap_or(0) as u32;
            let mtime = UNIX_EPOCH + Duration::from_secs(header.mtime().unwrap_or(0));
            let kind = match header.entry_type() {
                tar::EntryType::Directory => MemberKind::Dir,
                tar::EntryType::Symlink | tar::EntryType::Link => {
                    let target = entry
                        .link_name()
                        .map_err(|err| FsError::from_io("tar index", &member_path, err))?
                        .ok_or_else(|| FsError::InvalidArgument {
                            path: member_path.clone(),
                            reason: "link entry without a target",
                        })?;
                    MemberKind::Symlink(target.into_owned())
                }
                _ => {
                    let mut data = Vec::with_capacity(header.size().unwrap_or(0) as usize);
                    entry
                        .read_to_end(&mut data)
                        .map_err(|err| FsError::from_io("tar index", &member_path, err))?;
                    MemberKind::File(data)
                }
            };
            members.insert(
                member_path,
                Member {
                    permissions,
                    uid,
                    gid,
                    mtime,
                    kind,
                },
            );
        }
        Ok(TarFs { members })
    }

    fn member(&self, normalized: &Path) -> FsResult<&Member> {
        self.members
            .get(normalized)
            .ok_or_else(|| FsError::NotFound {
                path: normalized.to_path_buf(),
            })
    }

    /// The member at `normalized` with link entries resolved.
    fn resolve(&self, normalized: &Path) -> FsResult<&Member> {
        let mut current = path::normalize(normalized);
        for _ in 0..SYMLINK_MAX_DEPTH {
            let member = self.member(&current)?;
            match &member.kind {
                MemberKind::Symlink(target) => {
                    current = if target.is_absolute() {
                        path::normalize(target)
                    } else {
                        path::normalize(&path::parent(&current).join(target))
                    };
                }
                _ => return Ok(member),
            }
        }
        Err(FsError::InvalidArgument {
            path: normalized.to_path_buf(),
            reason: "too many levels of symbolic links",
        })
    }

    fn reject<T>(path: &Path) -> FsResult<T> {
        Err(FsError::ReadOnly {
            path: path::normalize(path),
        })
    }
}

impl Vfs for TarFs {
    fn features(&self) -> Features {
        Features::READONLY
    }

    fn access(&self, raw: &Path, want: AccessMode) -> FsResult<bool> {
        let normalized = path::normalize(raw);
        if self.resolve(&normalized).is_err() {
            return Ok(false);
        }
        // The archive is never writable through this layer.
        Ok(!want.contains(AccessMode::WRITE))
    }

    fn stat(&self, raw: &Path) -> FsResult<FileStat> {
        Ok(self.resolve(&path::normalize(raw))?.stat())
    }

    fn lstat(&self, raw: &Path) -> FsResult<FileStat> {
        Ok(self.member(&path::normalize(raw))?.stat())
    }

    fn listdir(&self, raw: &Path) -> FsResult<Vec<String>> {
        let normalized = path::normalize(raw);
        let member = self.resolve(&normalized)?;
        if !matches!(member.kind, MemberKind::Dir) {
            return Err(FsError::NotADirectory { path: normalized });
        }
        let names = self
            .members
            .keys()
            .filter(|p| p.as_path() != normalized && path::parent(p.as_path()) == normalized)
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }

    fn readlink(&self, raw: &Path) -> FsResult<PathBuf> {
        let normalized = path::normalize(raw);
        match &self.member(&normalized)?.kind {
            MemberKind::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument {
                path: normalized,
                reason: "not a symbolic link",
            }),
        }
    }

    fn open(&self, raw: &Path, flags: OpenFlags) -> FsResult<Box<dyn VfsFile>> {
        let normalized = path::normalize(raw);
        if !flags.is_read_only() {
            return Self::reject(&normalized);
        }
        match &self.resolve(&normalized)?.kind {
            MemberKind::File(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
            MemberKind::Dir => Err(FsError::IsADirectory { path: normalized }),
            MemberKind::Symlink(_) => unreachable!("resolve follows links"),
        }
    }

    fn chmod(&self, raw: &Path, _mode: u32) -> FsResult<()> {
        Self::reject(raw)
    }

    fn chown(&self, raw: &Path, _uid: u32, _gid: u32) -> FsResult<()> {
        Self::reject(raw)
    }

    fn mkdir(&self, raw: &Path) -> FsResult<()> {
        Self::reject(raw)
    }

    fn symlink(&self, link: &Path, _target: &Path) -> FsResult<()> {
        Self::reject(link)
    }

    fn rmdir(&self, raw: &Path) -> FsResult<()> {
        Self::reject(raw)
    }

    fn unlink(&self, raw: &Path) -> FsResult<()> {
        Self::reject(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_archive() -> TarFs {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_mtime(1_000_000);
        builder.append_data(&mut dir, "a", std::io::empty()).unwrap();

        let mut file = tar::Header::new_gnu();
        file.set_entry_type(tar::EntryType::Regular);
        file.set_size(7);
        file.set_mode(0o644);
        file.set_mtime(1_000_000);
        builder
            .append_data(&mut file, "a/f", &b"archive"[..])
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        link.set_mtime(1_000_000);
        builder.append_link(&mut link, "l", "a/f").unwrap();

        let data = builder.into_inner().unwrap();
        TarFs::new(Cursor::new(data)).unwrap()
    }

    #[test]
    fn members_are_rooted_and_readable() {
        let fs = sample_archive();
        assert!(fs.stat(Path::new("/a")).unwrap().is_dir());
        let st = fs.stat(Path::new("/a/f")).unwrap();
        assert!(st.is_file());
        assert_eq!(st.size, 7);
        assert_eq!(st.permissions(), 0o644);
        let mut data = Vec::new();
        fs.open(Path::new("/a/f"), OpenFlags::READ)
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"archive");
    }

    #[test]
    fn listdir_groups_by_parent() {
        let fs = sample_archive();
        assert_eq!(fs.listdir(Path::new("/a")).unwrap(), vec!["f"]);
        assert_eq!(fs.listdir(Path::new("/")).unwrap(), vec!["a", "l"]);
        assert!(matches!(
            fs.listdir(Path::new("/a/f")),
            Err(FsError::NotADirectory { .. })
        ));
    }

    #[test]
    fn missing_members_are_enoent() {
        let fs = sample_archive();
        assert!(matches!(
            fs.stat(Path::new("/nope")),
            Err(FsError::NotFound { .. })
        ));
        assert!(!fs.access(Path::new("/nope"), AccessMode::EXISTS).unwrap());
    }

    #[test]
    fn links_resolve_on_stat_but_not_lstat() {
        let fs = sample_archive();
        assert!(fs.stat(Path::new("/l")).unwrap().is_file());
        assert!(fs.lstat(Path::new("/l")).unwrap().is_symlink());
        assert_eq!(fs.readlink(Path::new("/l")).unwrap(), PathBuf::from("a/f"));
        assert!(matches!(
            fs.readlink(Path::new("/a/f")),
            Err(FsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn the_archive_is_never_writable() {
        let fs = sample_archive();
        assert!(fs.has_feature(Features::READONLY));
        assert!(!fs.access(Path::new("/a/f"), AccessMode::WRITE).unwrap());
        assert!(fs.access(Path::new("/a/f"), AccessMode::READ).unwrap());
        assert!(matches!(
            fs.open(Path::new("/a/f"), OpenFlags::WRITE),
            Err(FsError::ReadOnly { .. })
        ));
        assert!(matches!(
            fs.unlink(Path::new("/a/f")),
            Err(FsError::ReadOnly { .. })
        ));
    }
}
