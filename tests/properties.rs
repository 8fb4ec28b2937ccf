mod common;

use microfs::{BlockIndex, Config, Filesystem, FsError, OpenMode, VirtualFlash};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// P1 — partition conservation: every block is in exactly one of
/// {file header, dir header, data, erased, bad} at all times.
#[test]
fn partition_conservation_holds_across_operations() {
    let mut fs = common::fresh(8);
    assert_eq!(fs.block_census().total(), 8);

    fs.create("/a.txt", 1).expect("create a");
    assert_eq!(fs.block_census().total(), 8);

    let mut obj = fs.create("/b.txt", 2).expect("create b");
    fs.write(&mut obj, &[1u8; 2048], 3).expect("write b");
    fs.close(obj).expect("close b");
    assert_eq!(fs.block_census().total(), 8);

    fs.delete("/a.txt").expect("delete a");
    assert_eq!(fs.block_census().total(), 8);
}

/// P2 — unique authoritative copy: after a copy-forward, the node resolves
/// to exactly one current version, even across a remount.
#[test]
fn unique_authoritative_copy_survives_overwrite_and_remount() {
    let mut fs = common::fresh(8);
    let mut obj = fs.create("/c.txt", 1).expect("create");
    fs.write(&mut obj, b"version one", 1).expect("write v1");
    fs.close(obj).expect("close");

    let mut obj = fs.open("/c.txt", OpenMode::ReadWrite).expect("reopen");
    fs.write(&mut obj, b"version two", 2).expect("write v2");
    fs.close(obj).expect("close");

    assert_eq!(fs.list_dir("/").expect("list"), vec!["c.txt".to_string()]);

    let device = fs.device().clone();
    drop(fs);
    let mut remounted = common::remount(8, device);
    assert_eq!(remounted.list_dir("/").expect("list after remount"), vec!["c.txt".to_string()]);

    let mut obj = remounted.open("/c.txt", OpenMode::Read).expect("open");
    let mut buf = [0u8; b"version two".len()];
    remounted.read(&mut obj, &mut buf).expect("read");
    assert_eq!(&buf, b"version two");
}

/// P3 — free-space floor: creation/append is rejected once the erased list
/// would drop below `min_erased`, and the floor is never breached.
#[test]
fn free_space_floor_is_never_breached() {
    let config = Config { min_erased: 1, ..Config::default() };
    let mut fs = common::fresh_with_config(4, config);

    let mut created = 0;
    loop {
        let path = format!("/f{}.txt", created);
        match fs.create(&path, created as u32) {
            Ok(obj) => {
                fs.close(obj).expect("close");
                created += 1;
            }
            Err(FsError::NoSpace) => break,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
        assert!(created < 100, "free-space floor never triggered");
    }

    assert!(fs.block_census().erased >= config.min_erased as usize);
}

/// P4 — round-trip: arbitrary bytes written are read back unchanged.
#[test]
fn random_payload_round_trips() {
    let mut fs = common::fresh(12);
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    let mut payload = vec![0u8; 5000];
    rng.fill_bytes(&mut payload);

    let mut obj = fs.create("/rand.bin", 1).expect("create");
    fs.write(&mut obj, &payload, 1).expect("write");
    fs.close(obj).expect("close");

    let mut obj = fs.open("/rand.bin", OpenMode::Read).expect("open");
    let mut buf = vec![0u8; payload.len()];
    let mut total = 0;
    while total < buf.len() {
        let n = fs.read(&mut obj, &mut buf[total..]).expect("read");
        assert!(n > 0, "read made no progress before EOF");
        total += n;
    }
    assert_eq!(buf, payload);
}

/// P5 — crash safety: a remount from a snapshot taken before a later write
/// still yields the earlier, fully-committed contents.
#[test]
fn crash_before_second_write_preserves_first_write() {
    let mut fs = common::fresh(8);
    let mut obj = fs.create("/safe.bin", 1).expect("create");
    fs.write(&mut obj, b"first", 1).expect("write first");
    fs.close(obj).expect("close");

    // Snapshot the media as it stood right after the first write committed.
    let snapshot = fs.device().clone();

    let mut obj = fs.open("/safe.bin", OpenMode::ReadWrite).expect("reopen");
    fs.write(&mut obj, b"second and longer", 2).expect("write second");
    fs.close(obj).expect("close");

    let mut recovered = common::remount(8, snapshot);
    let mut obj = recovered.open("/safe.bin", OpenMode::Read).expect("open recovered");
    let mut buf = [0u8; b"first".len()];
    recovered.read(&mut obj, &mut buf).expect("read recovered");
    assert_eq!(&buf, b"first");
}

/// P6 — bad-block persistence: a block marked bad before mount is never
/// allocated as an erased target, across a mount/format/mount cycle.
#[test]
fn bad_block_is_never_reallocated() {
    let attrs = common::attrs(6);
    let mut device = VirtualFlash::new(attrs);
    device.seed_bad_block(BlockIndex::new(3));

    let fs = Filesystem::format(device, attrs, Config::default()).expect("format around bad block");
    let census = fs.block_census();
    assert_eq!(census.bad, 1);
    assert_eq!(census.total(), 6);

    let device = fs.device().clone();
    drop(fs);
    let mut remounted = common::remount(6, device);
    let census = remounted.block_census();
    assert_eq!(census.bad, 1);
    assert_eq!(census.total(), 6);

    // Use up the rest of the partition; the bad block must still never be
    // handed out as a target.
    let mut created = 0;
    loop {
        let path = format!("/g{}.txt", created);
        match remounted.create(&path, created as u32) {
            Ok(obj) => {
                remounted.close(obj).expect("close");
                created += 1;
            }
            Err(FsError::NoSpace) => break,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
        assert!(created < 100, "never ran out of space");
    }
    assert_eq!(remounted.block_census().bad, 1);
}

/// P7 — wear spread: repeated overwrites of one file cycle through more
/// than a single physical block rather than hammering one spot.
#[test]
fn repeated_overwrites_spread_erase_cycles() {
    let mut fs = common::fresh(8);
    let mut obj = fs.create("/wear.bin", 0).expect("create");
    fs.write(&mut obj, &[0u8; 512], 0).expect("initial write");
    fs.close(obj).expect("close");

    for i in 1..6u32 {
        let mut obj = fs.open("/wear.bin", OpenMode::ReadWrite).expect("reopen");
        fs.write(&mut obj, &[i as u8; 512], i).expect("overwrite");
        fs.close(obj).expect("close");
    }

    let device = fs.device().clone();
    let touched = (0..8)
        .filter(|&i| device.erase_count[i] > 0)
        .count();
    assert!(touched > 1, "expected erases to spread across more than one block, touched={touched}");
}
