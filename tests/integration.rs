//! End-to-end scenarios driving composed layer stacks through the
//! public API: shadowing, copy-up, whiteout resurrection, mount
//! dispatch, and the facade conveniences on top of them.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stackfs::{
    memory_branch, AccessMode, FileSystem, FsError, MemoryFs, MountFs, OpenFlags, ReadOnlyFs,
    UnionFs, ValidationError, Vfs, WhiteoutFs,
};

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

fn exists(fs: &dyn Vfs, path: &str) -> bool {
    fs.access(Path::new(path), AccessMode::EXISTS).unwrap()
}

// --- Scenario: basic memory filesystem ---------------------------------

#[test]
fn memory_fs_basics() {
    let fs = MemoryFs::new();
    fs.mkdir(Path::new("/a")).unwrap();
    write_all(&fs, "/a/f", b"hello");
    assert_eq!(fs.listdir(Path::new("/a")).unwrap(), vec!["f"]);
    assert_eq!(fs.stat(Path::new("/a/f")).unwrap().size, 5);
    assert_eq!(read_all(&fs, "/a/f"), b"hello");
}

// --- Scenario: whiteout delete, list, resurrect ------------------------

fn whiteout_fixture() -> WhiteoutFs<stackfs::MemoryWhiteoutCache, MemoryFs> {
    let inner = MemoryFs::new();
    inner.mkdir(Path::new("/a")).unwrap();
    write_all(&inner, "/a/x", b"xx");
    write_all(&inner, "/a/y", b"yy");
    WhiteoutFs::new(stackfs::MemoryWhiteoutCache::new(), inner)
}

#[test]
fn whiteout_delete_then_list() {
    let w = whiteout_fixture();
    w.unlink(Path::new("/a/x")).unwrap();
    let mut names = w.listdir(Path::new("/a")).unwrap();
    names.sort();
    assert_eq!(names, vec!["y"]);
    assert!(!exists(&w, "/a/x"));
    assert!(exists(w.inner(), "/a/x"));
}

#[test]
fn whiteout_resurrection() {
    let w = whiteout_fixture();
    w.unlink(Path::new("/a/x")).unwrap();
    write_all(&w, "/a/x", b"new");
    assert!(exists(&w, "/a/x"));
    assert_eq!(read_all(&w, "/a/x"), b"new");
}

// --- Scenario: union shadowing and copy-up -----------------------------

struct UnionSetup {
    union: UnionFs,
    lower: Arc<ReadOnlyFs<MemoryFs>>,
    upper: Arc<WhiteoutFs<stackfs::MemoryWhiteoutCache, MemoryFs>>,
}

fn union_fixture() -> UnionSetup {
    let lower_mem = MemoryFs::new();
    lower_mem.mkdir(Path::new("/a")).unwrap();
    write_all(&lower_mem, "/a/f", b"lo");
    let lower = Arc::new(ReadOnlyFs::new(lower_mem));
    let upper = Arc::new(memory_branch());
    let mut union = UnionFs::new(false);
    union
        .add_branch(upper.clone() as Arc<dyn Vfs>, "rw", Some(0), true)
        .unwrap();
    union
        .add_branch(lower.clone() as Arc<dyn Vfs>, "base", Some(10), false)
        .unwrap();
    UnionSetup { union, lower, upper }
}

#[test]
fn union_copy_up_on_write() {
    let s = union_fixture();
    assert_eq!(read_all(&s.union, "/a/f"), b"lo");

    write_all(&s.union, "/a/f", b"HI");
    // /a materialized in the writable branch as a directory...
    assert!(s.upper.stat(Path::new("/a")).unwrap().is_dir());
    // ...holding the new content...
    assert_eq!(read_all(&*s.upper, "/a/f"), b"HI");
    assert_eq!(read_all(&s.union, "/a/f"), b"HI");
    // ...while the lower branch is unchanged.
    assert_eq!(read_all(&*s.lower, "/a/f"), b"lo");
}

#[test]
fn union_delete_shadows_lower() {
    let s = union_fixture();
    s.union.unlink(Path::new("/a/f")).unwrap();
    assert!(!exists(&s.union, "/a/f"));
    assert!(exists(&*s.lower, "/a/f"));
    assert_eq!(
        s.union.listdir(Path::new("/a")).unwrap(),
        Vec::<String>::new()
    );
}

#[test]
fn union_write_after_delete_resurrects() {
    let s = union_fixture();
    s.union.unlink(Path::new("/a/f")).unwrap();
    write_all(&s.union, "/a/f", b"back");
    assert_eq!(read_all(&s.union, "/a/f"), b"back");
    assert_eq!(s.union.listdir(Path::new("/a")).unwrap(), vec!["f"]);
}

#[test]
fn union_lowest_ranked_branch_serves_reads() {
    let s = union_fixture();
    // A same-named file in the writable branch shadows the lower copy.
    s.upper.mkdir(Path::new("/a")).unwrap();
    write_all(&*s.upper, "/a/f", b"upper");
    assert_eq!(read_all(&s.union, "/a/f"), b"upper");
}

// --- Scenario: mount dispatch ------------------------------------------

#[test]
fn mount_dispatch_and_unmount_rules() {
    let root: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
    let sub: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
    let mut mounts = MountFs::new();
    mounts.mount_fs(Arc::clone(&root), Path::new("/")).unwrap();
    mounts.mkdir(Path::new("/mnt")).unwrap();
    mounts.mount_fs(Arc::clone(&sub), Path::new("/mnt")).unwrap();

    write_all(&mounts, "/mnt/a", b"routed");
    assert_eq!(read_all(&*sub, "/a"), b"routed");
    assert!(!exists(&*root, "/a"));

    mounts.umount_fs(Path::new("/mnt")).unwrap();
    assert!(matches!(
        mounts.umount_fs(Path::new("/")),
        Err(FsError::InvalidArgument { .. })
    ));
}

#[test]
fn mount_operations_map_one_to_one_onto_the_sub_fs() {
    let root: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
    let sub: Arc<dyn Vfs> = Arc::new(MemoryFs::new());
    let mut mounts = MountFs::new();
    mounts.mount_fs(root, Path::new("/")).unwrap();
    mounts.mkdir(Path::new("/m")).unwrap();
    mounts.mount_fs(Arc::clone(&sub), Path::new("/m")).unwrap();

    mounts.mkdir(Path::new("/m/d")).unwrap();
    assert!(sub.stat(Path::new("/d")).unwrap().is_dir());
    mounts.symlink(Path::new("/m/l"), Path::new("/m/d")).unwrap();
    assert_eq!(sub.readlink(Path::new("/l")).unwrap(), PathBuf::from("/d"));
    assert_eq!(
        mounts.listdir(Path::new("/m")).unwrap(),
        sub.listdir(Path::new("/")).unwrap()
    );
    mounts.unlink(Path::new("/m/l")).unwrap();
    mounts.rmdir(Path::new("/m/d")).unwrap();
    assert!(sub.listdir(Path::new("/")).unwrap().is_empty());
}

// --- Universal invariants ----------------------------------------------

#[test]
fn access_agrees_with_stat() {
    let s = union_fixture();
    for path in ["/a", "/a/f", "/nope", "/a/f/deeper"] {
        let accessible = s.union.access(Path::new(path), AccessMode::EXISTS).unwrap();
        let stat_ok = s.union.stat(Path::new(path)).is_ok();
        assert_eq!(accessible, stat_ok, "disagreement on {path}");
    }
}

#[test]
fn mkdir_yields_an_empty_listable_directory_everywhere() {
    let stacks: Vec<Box<dyn Vfs>> = vec![
        Box::new(MemoryFs::new()),
        Box::new(memory_branch()),
        Box::new(union_fixture().union),
    ];
    for fs in &stacks {
        fs.mkdir(Path::new("/fresh")).unwrap();
        assert!(fs.stat(Path::new("/fresh")).unwrap().is_dir());
        assert!(fs.listdir(Path::new("/fresh")).unwrap().is_empty());
        fs.rmdir(Path::new("/fresh")).unwrap();
        assert!(!exists(fs.as_ref(), "/fresh"));
    }
}

#[test]
fn rmdir_refuses_non_empty_directories_everywhere() {
    let stacks: Vec<Box<dyn Vfs>> = vec![
        Box::new(MemoryFs::new()),
        Box::new(memory_branch()),
        Box::new(union_fixture().union),
    ];
    for fs in &stacks {
        fs.mkdir(Path::new("/full")).unwrap();
        write_all(fs.as_ref(), "/full/f", b"x");
        assert!(matches!(
            fs.rmdir(Path::new("/full")),
            Err(FsError::DirectoryNotEmpty { .. })
        ));
        fs.unlink(Path::new("/full/f")).unwrap();
        fs.rmdir(Path::new("/full")).unwrap();
    }
}

#[test]
fn symlink_round_trip_across_stacks() {
    let stacks: Vec<Box<dyn Vfs>> = vec![
        Box::new(MemoryFs::new()),
        Box::new(memory_branch()),
        Box::new(union_fixture().union),
    ];
    for fs in &stacks {
        // Branch selection in a union follows `stat`, so the target has
        // to exist for the link to be reachable there.
        write_all(fs.as_ref(), "/target", b"t");
        fs.symlink(Path::new("/link"), Path::new("/target")).unwrap();
        assert_eq!(
            fs.readlink(Path::new("/link")).unwrap(),
            PathBuf::from("/target")
        );
        assert!(fs.lstat(Path::new("/link")).unwrap().is_symlink());
    }
}

// --- Deep composition ---------------------------------------------------

/// Mount(Union(ReadOnly(Memory), Whiteout(Memory))) behaves like one
/// coherent filesystem.
#[test]
fn mount_over_union_over_wrappers() {
    let base = MemoryFs::new();
    base.mkdir(Path::new("/etc")).unwrap();
    write_all(&base, "/etc/motd", b"v1\n");

    let mut union = UnionFs::new(false);
    let rw = Arc::new(memory_branch());
    union
        .add_branch(rw.clone() as Arc<dyn Vfs>, "rw", Some(0), true)
        .unwrap();
    union
        .add_branch(Arc::new(ReadOnlyFs::new(base)), "base", Some(5), false)
        .unwrap();

    let mut mounts = MountFs::new();
    mounts.mount_fs(Arc::new(union), Path::new("/")).unwrap();
    mounts.mkdir(Path::new("/scratch")).unwrap();
    mounts
        .mount_fs(Arc::new(MemoryFs::new()), Path::new("/scratch"))
        .unwrap();

    let fs = FileSystem::new(mounts);

    // Reads come from the base through the union through the mount.
    assert_eq!(fs.readlines(Path::new("/etc/motd")).unwrap(), ["v1"]);

    // A write copies up into the whiteout+memory branch.
    fs.write(Path::new("/etc/motd"), b"v2\n").unwrap();
    assert_eq!(fs.readlines(Path::new("/etc/motd")).unwrap(), ["v2"]);
    assert_eq!(read_all(rw.inner(), "/etc/motd"), b"v2\n");

    // Deleting shadows the base copy.
    fs.remove(Path::new("/etc/motd")).unwrap();
    assert!(!fs.file_exists(Path::new("/etc/motd")).unwrap());
    assert_eq!(
        fs.listdir(Path::new("/etc")).unwrap(),
        Vec::<String>::new()
    );

    // The scratch mount is an independent namespace.
    fs.write(Path::new("/scratch/notes"), b"tmp").unwrap();
    assert_eq!(fs.read(Path::new("/scratch/notes")).unwrap(), b"tmp");
    assert_eq!(fs.listdir(Path::new("/scratch")).unwrap(), vec!["notes"]);

    // Unmounting the scratch tree severs the namespace.
    let mut mounts = fs.into_backend();
    mounts.umount_fs(Path::new("/scratch")).unwrap();
    assert!(mounts.listdir(Path::new("/scratch")).unwrap().is_empty());
}

#[test]
fn chroot_of_a_union_keeps_copy_up_semantics() {
    let s = union_fixture();
    let chroot = stackfs::ChrootFs::new(s.union, "/view", "/a");
    assert_eq!(read_all(&chroot, "/view/f"), b"lo");
    write_all(&chroot, "/view/f", b"HI");
    assert_eq!(read_all(&chroot, "/view/f"), b"HI");
    assert_eq!(read_all(&*s.lower, "/a/f"), b"lo");
    assert!(matches!(
        chroot.stat(Path::new("/outside")),
        Err(FsError::PermissionDenied { .. })
    ));
}

// --- Programmer errors stay distinct ------------------------------------

#[test]
fn misassembled_stacks_raise_validation_errors() {
    let mut union = UnionFs::new(false);
    assert!(matches!(
        union.add_branch(Arc::new(MemoryFs::new()), "w", None, true),
        Err(ValidationError::BranchNotWhiteout { .. })
    ));
    union
        .add_branch(Arc::new(memory_branch()), "w", None, true)
        .unwrap();

    let mut mounts = MountFs::new();
    assert!(matches!(
        mounts.mount_fs(Arc::new(MemoryFs::new()), Path::new("/not-root")),
        Err(ValidationError::FirstMountNotRoot { .. })
    ));
}
