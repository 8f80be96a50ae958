mod common;

use common::*;
use kernel::error::Error::*;
use kernel::fcntl::OFlag;
use kernel::file::Major;
use kernel::fs::BSIZE;
use kernel::param::MAXSYMLINKS;
use kernel::stat::FileType;

fn flags(f: OFlag) -> usize {
    f.bits()
}

#[test]
fn missing_file_is_not_found() {
    let fs = boot();
    let mut p = fs.proc();
    assert_eq!(p.open("/nope", rdonly()), Err(NotFound));
    assert_eq!(p.open("/nope", flags(OFlag::WRONLY)), Err(NotFound));
    assert_balanced(&fs.kernel);
}

#[test]
fn create_returns_the_existing_file() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/f", b"keep");
    let ino = stat(&mut p, "/f").unwrap().ino;

    let fd = p.open("/f", rw_create()).unwrap();
    let st = p.fstat(fd).unwrap();
    assert_eq!((st.ino, st.size, st.nlink), (ino, 4, 1));
    p.close(fd).unwrap();
    assert_eq!(read_file(&mut p, "/f").unwrap(), b"keep");
}

#[test]
fn directories_open_read_only() {
    let fs = boot();
    let mut p = fs.proc();
    p.mkdir("/d").unwrap();

    assert_eq!(p.open("/d", flags(OFlag::RDWR)), Err(IsADirectory));
    assert_eq!(p.open("/d", flags(OFlag::WRONLY)), Err(IsADirectory));
    assert_eq!(p.open("/d", rw_create()), Err(AlreadyExists));

    let fd = p.open("/d", rdonly()).unwrap();
    assert_eq!(p.fstat(fd).unwrap().ftype, FileType::Dir);
    // "." and ".." are the first two entries.
    let mut buf = [0u8; 32];
    assert_eq!(p.read(fd, &mut buf), Ok(32));
    assert_eq!(&buf[2..3], b".");
    assert_eq!(&buf[18..20], b"..");
    p.close(fd).unwrap();
    assert_balanced(&fs.kernel);
}

#[test]
fn access_mode_is_enforced() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/f", b"abc");

    let r = p.open("/f", rdonly()).unwrap();
    assert_eq!(p.write(r, b"x"), Err(InvalidArgument));
    let w = p.open("/f", flags(OFlag::WRONLY)).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(p.read(w, &mut buf), Err(InvalidArgument));
    assert_eq!(p.write(w, b"X"), Ok(1));
    assert_eq!(p.read(r, &mut buf), Ok(3));
    assert_eq!(&buf[..3], b"Xbc");
}

#[test]
fn trunc_empties_a_regular_file() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/f", &[1u8; 5000]);

    let fd = p
        .open("/f", flags(OFlag::WRONLY | OFlag::TRUNC))
        .unwrap();
    assert_eq!(p.fstat(fd).unwrap().size, 0);
    assert_eq!(p.write(fd, b"new"), Ok(3));
    p.close(fd).unwrap();
    assert_eq!(read_file(&mut p, "/f").unwrap(), b"new");
    assert_balanced(&fs.kernel);
}

#[test]
fn append_starts_at_the_end() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/f", b"abc");

    let fd = p
        .open("/f", flags(OFlag::WRONLY | OFlag::APPEND))
        .unwrap();
    p.write(fd, b"def").unwrap();
    p.close(fd).unwrap();
    assert_eq!(read_file(&mut p, "/f").unwrap(), b"abcdef");

    // truncation wins over append.
    let fd = p
        .open("/f", flags(OFlag::WRONLY | OFlag::APPEND | OFlag::TRUNC))
        .unwrap();
    p.write(fd, b"z").unwrap();
    p.close(fd).unwrap();
    assert_eq!(read_file(&mut p, "/f").unwrap(), b"z");
}

#[test]
fn device_nodes_reach_their_driver() {
    let fs = boot();
    let mut p = fs.proc();
    p.mknod("/console", Major::Console as u16, 0).unwrap();
    fs.console.input.lock().unwrap().extend_from_slice(b"typed");

    let fd = p.open("/console", flags(OFlag::RDWR)).unwrap();
    assert_eq!(p.write(fd, b"echo"), Ok(4));
    let mut buf = [0u8; 8];
    assert_eq!(p.read(fd, &mut buf), Ok(5));
    assert_eq!(&buf[..5], b"typed");
    assert_eq!(p.fstat(fd).unwrap().ftype, FileType::Device);
    p.close(fd).unwrap();
    assert_eq!(*fs.console.out.lock().unwrap(), b"echo");

    // create on a device path opens the device.
    let fd = p.open("/console", rw_create()).unwrap();
    assert_eq!(p.write(fd, b"!"), Ok(1));
    assert_eq!(*fs.console.out.lock().unwrap(), b"echo!");
    p.close(fd).unwrap();
    assert_balanced(&fs.kernel);
}

#[test]
fn null_device_swallows_writes() {
    let fs = boot();
    let mut p = fs.proc();
    p.mknod("/null", Major::Null as u16, 0).unwrap();
    let fd = p.open("/null", flags(OFlag::RDWR | OFlag::TRUNC)).unwrap();
    assert_eq!(p.write(fd, b"gone"), Ok(4));
    let mut buf = [0u8; 4];
    assert_eq!(p.read(fd, &mut buf), Ok(0));
}

#[test]
fn unregistered_major_cannot_be_opened() {
    let fs = boot();
    let mut p = fs.proc();
    p.mknod("/bad", 7, 0).unwrap();
    assert_eq!(p.open("/bad", flags(OFlag::RDWR)), Err(NoSuchDevice));
    // stat goes through open as well.
    assert_eq!(stat(&mut p, "/bad"), Err(NoSuchDevice));
    assert_balanced(&fs.kernel);
}

#[test]
fn symlinks_are_followed_unless_asked_not_to() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/target", b"payload");
    p.symlink("/target", "/link").unwrap();

    assert_eq!(read_file(&mut p, "/link").unwrap(), b"payload");
    let st = stat(&mut p, "/link").unwrap();
    assert_eq!(st.ftype, FileType::Symlink);
    assert_eq!(st.size, "/target".len());

    // no-follow opens the link itself; its data is the target.
    let fd = p
        .open("/link", flags(OFlag::RDONLY | OFlag::NOFOLLOW))
        .unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(p.read(fd, &mut buf), Ok(7));
    assert_eq!(&buf[..7], b"/target");
    p.close(fd).unwrap();

    // writes through the link land in the target.
    let fd = p.open("/link", flags(OFlag::WRONLY | OFlag::APPEND)).unwrap();
    p.write(fd, b"!").unwrap();
    p.close(fd).unwrap();
    assert_eq!(read_file(&mut p, "/target").unwrap(), b"payload!");
    assert_balanced(&fs.kernel);
}

#[test]
fn symlink_name_collisions() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/a", b"a");
    write_file(&mut p, "/b", b"b");
    p.mknod("/dev", Major::Null as u16, 0).unwrap();

    p.symlink("/a", "/l").unwrap();
    // an existing link is pointed somewhere else.
    p.symlink("/b", "/l").unwrap();
    assert_eq!(read_file(&mut p, "/l").unwrap(), b"b");

    assert_eq!(p.symlink("/b", "/a"), Err(AlreadyExists));
    assert_eq!(p.symlink("/b", "/dev"), Err(AlreadyExists));
    assert_eq!(p.symlink("", "/e"), Err(InvalidArgument));
    assert_eq!(p.open("/l", rw_create()), Err(AlreadyExists));
    assert_eq!(read_file(&mut p, "/a").unwrap(), b"a");
    assert_balanced(&fs.kernel);
}

#[test]
fn chains_up_to_the_bound_resolve() {
    let fs = boot();
    let mut p = fs.proc();
    write_file(&mut p, "/end", b"reached");

    // /l1 -> /l2 -> ... -> /lN -> /end
    let chain = |p: &mut kernel::proc::Proc, n: usize| {
        for i in 1..=n {
            let target = if i == n {
                "/end".to_string()
            } else {
                format!("/l{}", i + 1)
            };
            p.symlink(&target, &format!("/l{}", i)).unwrap();
        }
    };

    chain(&mut p, MAXSYMLINKS);
    assert_eq!(read_file(&mut p, "/l1").unwrap(), b"reached");

    for i in 1..=MAXSYMLINKS {
        p.unlink(&format!("/l{}", i)).unwrap();
    }
    chain(&mut p, MAXSYMLINKS + 1);
    assert_eq!(p.open("/l1", rdonly()), Err(FilesystemLoop));
    // from the second link on the chain fits again.
    assert_eq!(read_file(&mut p, "/l2").unwrap(), b"reached");
    assert_balanced(&fs.kernel);
}

#[test]
fn cycles_fail_without_changes() {
    let fs = boot();
    let mut p = fs.proc();
    p.symlink("/b", "/a").unwrap();
    p.symlink("/a", "/b").unwrap();
    p.symlink("/self", "/self").unwrap();

    assert_eq!(p.open("/a", rdonly()), Err(FilesystemLoop));
    assert_eq!(p.open("/self", rdonly()), Err(FilesystemLoop));
    assert_eq!(p.open("/a", flags(OFlag::RDWR | OFlag::TRUNC)), Err(FilesystemLoop));

    assert_eq!(stat(&mut p, "/a").unwrap().size, 2);
    assert_eq!(stat(&mut p, "/b").unwrap().size, 2);
    assert_balanced(&fs.kernel);
}

#[test]
fn dangling_and_relative_links() {
    let fs = boot();
    let mut p = fs.proc();
    p.symlink("/nowhere", "/dangling").unwrap();
    assert_eq!(p.open("/dangling", rdonly()), Err(NotFound));
    assert_eq!(stat(&mut p, "/dangling").unwrap().ftype, FileType::Symlink);

    p.mkdir("/d").unwrap();
    write_file(&mut p, "/d/f", b"in d");
    write_file(&mut p, "/f", b"in root");
    p.symlink("f", "/d/rel").unwrap();

    // relative targets resolve against the current directory.
    assert_eq!(read_file(&mut p, "/d/rel").unwrap(), b"in root");
    p.chdir("/d").unwrap();
    assert_eq!(read_file(&mut p, "rel").unwrap(), b"in d");
    assert_balanced(&fs.kernel);
}

#[test]
fn links_into_directories() {
    let fs = boot();
    let mut p = fs.proc();
    p.mkdir("/real").unwrap();
    p.symlink("/real", "/alias").unwrap();
    write_file(&mut p, "/real/f", b"x");

    // only the final component is followed.
    assert_eq!(p.open("/alias/f", rdonly()), Err(NotADirectory));
    let fd = p.open("/alias", rdonly()).unwrap();
    assert_eq!(p.fstat(fd).unwrap().ftype, FileType::Dir);
    p.close(fd).unwrap();
    assert_eq!(p.open("/alias", flags(OFlag::RDWR)), Err(IsADirectory));
}

#[test]
fn overlong_paths_are_invalid() {
    let fs = boot();
    let mut p = fs.proc();
    let long = format!("/{}", "a/".repeat(70));
    assert_eq!(p.open(&long, rdonly()), Err(InvalidArgument));
    assert_eq!(p.symlink(&long, "/l"), Err(InvalidArgument));
    assert_eq!(p.open("/l", rdonly()), Err(NotFound));
    assert_balanced(&fs.kernel);
}

#[test]
fn symlink_on_a_full_disk_leaves_nothing_behind() {
    let fs = boot();
    let mut p = fs.proc();
    let fd = p.open("/big", rw_create()).unwrap();
    let data = vec![0xa5u8; 2100 * BSIZE];
    let n = p.write(fd, &data).unwrap();
    assert!(n < data.len());
    p.close(fd).unwrap();
    let big = stat(&mut p, "/big").unwrap().ino;

    // the target needs a data block that is not there.
    assert_eq!(p.symlink("/big", "/s"), Err(StorageFull));
    assert_eq!(p.open("/s", rdonly()), Err(NotFound));
    assert_eq!(stat(&mut p, "/s"), Err(NotFound));

    // the inode the link had taken is free again.
    write_file(&mut p, "/e", b"");
    assert_eq!(stat(&mut p, "/e").unwrap().ino, big + 1);

    p.unlink("/big").unwrap();
    p.symlink("/e", "/s").unwrap();
    assert_eq!(stat(&mut p, "/s").unwrap().ftype, FileType::Symlink);
    assert_balanced(&fs.kernel);
}
