mod common;

use microfs::{BlockIndex, Config, Filesystem, FsError, OpenMode, SeekFrom, VirtualFlash};

#[test]
fn format_then_mount_rebuilds_root() {
    let fs = common::fresh(8);
    let device = fs.device().clone();
    drop(fs);

    let mut remounted = common::remount(8, device);
    let stat = remounted.stat("/").expect("stat root");
    assert!(stat.is_dir);
    assert_eq!(stat.size, 0);
    assert_eq!(remounted.list_dir("/").expect("list root"), Vec::<String>::new());
}

#[test]
fn create_empty_file() {
    let mut fs = common::fresh(8);
    let mut obj = fs.create("/hello.txt", 1000).expect("create");
    let stat = fs.stat("/hello.txt").expect("stat");
    assert!(!stat.is_dir);
    assert_eq!(stat.size, 0);

    let mut buf = [0u8; 16];
    let n = fs.read(&mut obj, &mut buf).expect("read empty file");
    assert_eq!(n, 0);
    fs.close(obj).expect("close");

    assert_eq!(fs.list_dir("/").expect("list root"), vec!["hello.txt".to_string()]);
}

#[test]
fn append_and_reopen_round_trips_bytes() {
    let mut fs = common::fresh(8);
    let mut obj = fs.create("/data.bin", 1).expect("create");
    let payload = b"the quick brown fox jumps over the lazy dog";
    let written = fs.write(&mut obj, payload, 2).expect("write");
    assert_eq!(written, payload.len());
    fs.close(obj).expect("close");

    let mut reopened = fs.open("/data.bin", OpenMode::Read).expect("reopen");
    let mut buf = vec![0u8; payload.len()];
    let read = fs.read(&mut reopened, &mut buf).expect("read back");
    assert_eq!(read, payload.len());
    assert_eq!(&buf[..], &payload[..]);

    let stat = fs.stat("/data.bin").expect("stat");
    assert_eq!(stat.size, payload.len() as u64);
    assert_eq!(stat.create_time, 1);
    assert_eq!(stat.last_modify, 2);
}

#[test]
fn overwrite_triggers_copy_forward() {
    let mut fs = common::fresh(8);
    let mut obj = fs.create("/over.bin", 1).expect("create");
    let first = vec![0xAAu8; 900];
    fs.write(&mut obj, &first, 2).expect("first write");
    fs.flush(&obj).expect("flush");
    fs.close(obj).expect("close");

    // Rewrite the same region; this must land in a freshly erased block via
    // copy-forward, not in place (NAND can only clear bits).
    let mut obj = fs.open("/over.bin", OpenMode::ReadWrite).expect("reopen rw");
    fs.seek(&mut obj, SeekFrom::Start(0)).expect("seek");
    let second = vec![0x55u8; 900];
    fs.write(&mut obj, &second, 3).expect("second write");
    fs.close(obj).expect("close");

    let mut readback = fs.open("/over.bin", OpenMode::Read).expect("open for read");
    let mut buf = vec![0u8; second.len()];
    fs.read(&mut readback, &mut buf).expect("read back");
    assert_eq!(buf, second);
}

#[test]
fn transient_write_failure_during_flush_is_retried() {
    let attrs = common::attrs(8);
    let device = VirtualFlash::new(attrs);
    let formatted = Filesystem::format(device, attrs, Config::default()).expect("format");
    let mut device = formatted.device().clone();
    drop(formatted);

    // Root formatting consumed block 0; the next copy-forward target picked
    // for a brand-new file's header is block 1. Inject a one-shot program
    // failure there so the flush engine must erase-and-retry onto another
    // block (spec.md §4.5 COPY_FORWARD -> ERASE_TARGET -> PICK_TARGET).
    device.inject_write_failure(BlockIndex::new(1));

    let mut fs = common::remount(8, device);
    let mut obj = fs.create("/retry.bin", 5).expect("create despite transient failure");
    let payload = b"resilient";
    fs.write(&mut obj, payload, 5).expect("write");
    fs.close(obj).expect("close");

    let mut reopened = fs.open("/retry.bin", OpenMode::Read).expect("reopen");
    let mut buf = vec![0u8; payload.len()];
    fs.read(&mut reopened, &mut buf).expect("read back");
    assert_eq!(&buf[..], &payload[..]);
}

#[test]
fn rmdir_on_non_empty_directory_is_rejected() {
    let mut fs = common::fresh(8);
    fs.create("/docs/", 1).expect("mkdir");
    fs.create("/docs/readme.txt", 2).expect("create child");

    let err = fs.delete("/docs").unwrap_err();
    assert_eq!(err, FsError::NotEmpty);

    fs.delete("/docs/readme.txt").expect("delete child first");
    fs.delete("/docs").expect("rmdir now empty");
    assert!(fs.stat("/docs").is_err());
}
