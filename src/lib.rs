//! # stackfs
//!
//! **Composable virtual filesystem layers.**
//!
//! One uniform contract — the [`Vfs`] trait — implemented by backends
//! and by wrappers, so filesystems assemble like building blocks:
//!
//! | Layer | Purpose |
//! |-------|---------|
//! | [`MemoryFs`] | In-memory object tree with POSIX permission checks |
//! | [`OsFs`] | Passthrough to a host directory (unix) |
//! | [`TarFs`] | Read-only view over a tar archive |
//! | [`ReadOnlyFs`] | Rejects every write with `EROFS` |
//! | [`ChrootFs`] | Remaps paths between two prefixes |
//! | [`WhiteoutFs`] | Tracks deletions as whiteout marks over a read-mostly inner |
//! | [`UnionFs`] | Rank-ordered branch stacking with copy-on-write |
//! | [`MountFs`] | Longest-prefix routing across mounted sub-filesystems |
//! | [`FileSystem`] | High-level facade over any of the above |
//!
//! ---
//!
//! ## Quick Start
//!
//! A writable overlay over a read-only base, dispatched under a mount
//! tree:
//!
//! ```rust
//! use stackfs::{
//!     memory_branch, FileSystem, MemoryFs, MountFs, OpenFlags, ReadOnlyFs, UnionFs, Vfs,
//! };
//! use std::io::Write;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! // A read-only base image.
//! let base = MemoryFs::new();
//! base.mkdir(Path::new("/etc"))?;
//! base.open(Path::new("/etc/motd"), OpenFlags::WRITE)?
//!     .write_all(b"hello\n")
//!     .unwrap();
//!
//! // Union it with a writable whiteout+memory branch.
//! let mut union = UnionFs::new(false);
//! union.add_branch(Arc::new(memory_branch()), "rw", Some(0), true).unwrap();
//! union.add_branch(Arc::new(ReadOnlyFs::new(base)), "base", Some(10), false).unwrap();
//!
//! // Mount the union at /, and a scratch filesystem at /tmp.
//! let mut mounts = MountFs::new();
//! mounts.mount_fs(Arc::new(union), Path::new("/")).unwrap();
//! mounts.mkdir(Path::new("/tmp"))?;
//! mounts.mount_fs(Arc::new(MemoryFs::new()), Path::new("/tmp")).unwrap();
//!
//! let fs = FileSystem::new(mounts);
//! assert_eq!(fs.readlines(Path::new("/etc/motd"))?, ["hello"]);
//! fs.write(Path::new("/etc/motd"), b"patched\n")?; // copy-up, base untouched
//! fs.remove(Path::new("/etc/motd"))?;              // whiteout, base untouched
//! # Ok::<(), stackfs::FsError>(())
//! ```
//!
//! ---
//!
//! ## Semantics
//!
//! - Paths are forward-slash absolute strings, normalized lexically on
//!   entry into every layer.
//! - Failures carry a POSIX errno kind and the offending path
//!   ([`FsError`]); misassembled layer stacks raise [`ValidationError`]
//!   instead.
//! - Layers advertise capabilities ([`Features`]): read-only layers
//!   report `READONLY`, whiteout layers `WHITEOUT`, and a union demands
//!   exactly that combination (`WHITEOUT` without `READONLY`) from its
//!   writable branch.
//! - Everything is synchronous and single-threaded in spirit: state
//!   sits behind locks only to satisfy `Send + Sync`, and concurrent
//!   mutation of one filesystem is not a supported workload.

mod backend;
mod builders;
mod chroot;
mod error;
mod filesystem;
mod memory;
mod mount;
#[cfg(unix)]
mod os;
pub mod path;
mod readonly;
mod tarfs;
mod types;
mod union;
mod whiteout;

pub use backend::{Vfs, VfsFile};
pub use builders::memory_branch;
pub use chroot::ChrootFs;
pub use error::{Errno, FsError, FsResult, ValidationError};
pub use filesystem::FileSystem;
pub use memory::MemoryFs;
pub use mount::MountFs;
#[cfg(unix)]
pub use os::OsFs;
pub use readonly::ReadOnlyFs;
pub use tarfs::TarFs;
pub use types::{mode, AccessMode, Features, FileStat, FileType, OpenFlags};
pub use union::UnionFs;
pub use whiteout::{FileWhiteoutCache, MemoryWhiteoutCache, WhiteoutCache, WhiteoutFs};
