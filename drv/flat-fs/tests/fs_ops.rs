// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem operations against a NOR-faithful RAM flash.

mod common;

use abi::fs::{FS_MAGIC, SECTOR_SIZE};
use common::RamFlash;
use drv_flat_fs::{FlatFs, FsConfig, FsError};

const CFG: FsConfig = FsConfig {
    base_addr: 0,
    total_sectors: 18, // 16 data sectors
    upload_timeout_ticks: 1000,
};

fn fresh(flash: &mut RamFlash) -> FlatFs<&mut RamFlash> {
    let mut fs = FlatFs::new(flash, CFG).unwrap();
    fs.format().unwrap();
    fs
}

/// Deterministic patterned payload so cross-sector reads can't pass by
/// accident.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

#[test]
fn mount_rejects_blank_flash() {
    let mut flash = RamFlash::new(18);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    assert_eq!(fs.mount().unwrap_err(), FsError::NotMounted);
}

#[test]
fn operations_before_mount_fail() {
    let mut flash = RamFlash::new(18);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(fs.create("a", b"x").unwrap_err(), FsError::NotMounted);
    assert_eq!(fs.read("a", &mut buf).unwrap_err(), FsError::NotMounted);
    assert_eq!(fs.delete("a").unwrap_err(), FsError::NotMounted);
    assert_eq!(fs.rename("a", "b").unwrap_err(), FsError::NotMounted);
    assert_eq!(fs.stat("a").unwrap_err(), FsError::NotMounted);
}

#[test]
fn bad_geometry_is_rejected() {
    let mut flash = RamFlash::new(4);
    assert_eq!(
        FlatFs::new(
            &mut flash,
            FsConfig {
                base_addr: 100, // not sector-aligned
                total_sectors: 4,
                upload_timeout_ticks: 1,
            }
        )
        .err(),
        Some(FsError::BadGeometry)
    );
    assert_eq!(
        FlatFs::new(
            &mut flash,
            FsConfig {
                base_addr: 0,
                total_sectors: 2, // no data area at all
                upload_timeout_ticks: 1,
            }
        )
        .err(),
        Some(FsError::BadGeometry)
    );
}

#[test]
fn format_writes_the_superblock_layout() {
    let mut flash = RamFlash::new(18);
    {
        let _fs = fresh(&mut flash);
    }
    // Format touches exactly the two metadata sectors: erase + write each.
    assert_eq!(flash.erases, 2);
    assert!(flash.writes >= 2);
    let raw = flash.raw();
    assert_eq!(&raw[0..4], b"OSFT");
    assert_eq!(u32::from_le_bytes(raw[0..4].try_into().unwrap()), FS_MAGIC);
    assert_eq!(u32::from_le_bytes(raw[4..8].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(raw[8..12].try_into().unwrap()), 16);
    assert_eq!(u32::from_le_bytes(raw[12..16].try_into().unwrap()), 0);
    // Rest of the superblock sector stays erased.
    assert!(raw[16..SECTOR_SIZE].iter().all(|&b| b == 0xFF));
    // The table sector is zeroed: every entry free.
    assert!(raw[SECTOR_SIZE..2 * SECTOR_SIZE].iter().all(|&b| b == 0));
}

#[test]
fn files_survive_a_remount() {
    let mut flash = RamFlash::new(18);
    {
        let mut fs = fresh(&mut flash);
        fs.create("boot.cfg", b"serial=115200").unwrap();
    }
    // "Reboot": a brand-new instance over the same device.
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    fs.mount().unwrap();
    let mut buf = [0u8; 32];
    let n = fs.read("boot.cfg", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"serial=115200");
    assert_eq!(fs.file_count().unwrap(), 1);
}

#[test]
fn create_read_roundtrip_and_rename_lifecycle() {
    // The canonical end-to-end: create, stat, read, rename, read through
    // the new name, delete, and the name is gone.
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);

    fs.create("hello.txt", b"Goodbye!").unwrap();
    assert_eq!(fs.stat("hello.txt").unwrap().size, 8);

    let mut buf = [0u8; 8];
    assert_eq!(fs.read("hello.txt", &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"Goodbye!");

    fs.rename("hello.txt", "msg").unwrap();
    assert_eq!(fs.stat("hello.txt").unwrap_err(), FsError::NotFound);
    let mut buf2 = [0u8; 16];
    let n = fs.read("msg", &mut buf2).unwrap();
    assert_eq!(&buf2[..n], b"Goodbye!");

    fs.delete("msg").unwrap();
    assert_eq!(fs.stat("msg").unwrap_err(), FsError::NotFound);
    assert_eq!(fs.file_count().unwrap(), 0);
}

#[test]
fn rename_then_rename_back_is_identity() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("a", b"payload").unwrap();
    let before = fs.stat("a").unwrap();

    fs.rename("a", "b").unwrap();
    fs.rename("b", "a").unwrap();

    let after = fs.stat("a").unwrap();
    assert_eq!(after.size, before.size);
    assert_eq!(after.start_sector, before.start_sector);
    assert_eq!(after.sector_count, before.sector_count);
}

#[test]
fn duplicate_names_and_bad_names_are_rejected() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("a", b"1").unwrap();
    assert_eq!(fs.create("a", b"2").unwrap_err(), FsError::Exists);
    assert_eq!(fs.create("", b"x").unwrap_err(), FsError::BadName);
    assert_eq!(
        fs.create("this-name-is-way-too-long-to-fit", b"x").unwrap_err(),
        FsError::BadName
    );
    fs.create("b", b"3").unwrap();
    assert_eq!(fs.rename("b", "a").unwrap_err(), FsError::Exists);
    assert_eq!(fs.rename("nope", "c").unwrap_err(), FsError::NotFound);
}

#[test]
fn multi_sector_content_is_exact() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    let data = pattern(10_000);
    fs.create("big", &data).unwrap();

    let st = fs.stat("big").unwrap();
    assert_eq!(st.size, 10_000);
    assert_eq!(st.sector_count, 3);

    let mut buf = vec![0u8; 12_000];
    assert_eq!(fs.read("big", &mut buf).unwrap(), 10_000);
    assert_eq!(&buf[..10_000], &data[..]);

    // A short read truncates without complaint.
    let mut head = [0u8; 100];
    assert_eq!(fs.read("big", &mut head).unwrap(), 100);
    assert_eq!(&head[..], &data[..100]);
}

#[test]
fn empty_files_are_legal() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("flag", b"").unwrap();
    let st = fs.stat("flag").unwrap();
    assert_eq!(st.size, 0);
    assert_eq!(st.sector_count, 0);
    let mut buf = [0u8; 4];
    assert_eq!(fs.read("flag", &mut buf).unwrap(), 0);
    // Zero-sector files don't eat space.
    assert_eq!(fs.free_sectors().unwrap(), 16);
    fs.delete("flag").unwrap();
}

#[test]
fn first_fit_reuses_a_freed_hole() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("a", &pattern(100)).unwrap(); // sector 0
    fs.create("b", &pattern(2 * SECTOR_SIZE)).unwrap(); // sectors 1-2
    fs.create("c", &pattern(100)).unwrap(); // sector 3
    let b_start = fs.stat("b").unwrap().start_sector;

    fs.delete("b").unwrap();
    assert_eq!(fs.free_sectors().unwrap(), 16 - 2);

    // A file that fits the hole lands exactly where b was.
    fs.create("d", &pattern(SECTOR_SIZE + 1)).unwrap();
    assert_eq!(fs.stat("d").unwrap().start_sector, b_start);

    // And the content of the survivors is untouched.
    let mut buf = vec![0u8; 100];
    fs.read("c", &mut buf).unwrap();
    assert_eq!(buf, pattern(100));
}

#[test]
fn no_two_files_overlap() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("a", &pattern(5000)).unwrap();
    fs.create("b", &pattern(1)).unwrap();
    fs.delete("a").unwrap();
    fs.create("c", &pattern(9000)).unwrap();
    fs.create("d", &pattern(4096)).unwrap();

    let mut spans: Vec<(u16, u16)> = Vec::new();
    fs.list(|st| {
        if st.sector_count > 0 {
            spans.push((st.start_sector, st.start_sector + st.sector_count));
        }
    })
    .unwrap();
    spans.sort();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
    }
}

#[test]
fn allocation_fails_with_nospace_when_no_run_fits() {
    let mut flash = RamFlash::new(5);
    let mut fs = FlatFs::new(
        &mut flash,
        FsConfig {
            base_addr: 0,
            total_sectors: 5, // 3 data sectors
            upload_timeout_ticks: 1,
        },
    )
    .unwrap();
    fs.format().unwrap();

    assert_eq!(
        fs.create("too-big", &pattern(4 * SECTOR_SIZE)).unwrap_err(),
        FsError::NoSpace
    );
    fs.create("a", &pattern(1)).unwrap(); // sector 0
    fs.create("b", &pattern(SECTOR_SIZE + 1)).unwrap(); // sectors 1-2
    assert_eq!(fs.create("c", &pattern(1)).unwrap_err(), FsError::NoSpace);

    // Shrinking b in place keeps its two-sector reservation, so freeing
    // a leaves a single free sector and a two-sector ask still fails.
    fs.delete("a").unwrap();
    fs.overwrite("b", &pattern(2)).unwrap();
    assert_eq!(fs.free_sectors().unwrap(), 1);
    assert_eq!(
        fs.create("c", &pattern(2 * SECTOR_SIZE)).unwrap_err(),
        FsError::NoSpace
    );
}

#[test]
fn overwrite_in_place_keeps_the_run() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("cfg", &pattern(2 * SECTOR_SIZE)).unwrap();
    let before = fs.stat("cfg").unwrap();

    fs.overwrite("cfg", b"tiny").unwrap();
    let after = fs.stat("cfg").unwrap();
    assert_eq!(after.size, 4);
    assert_eq!(after.start_sector, before.start_sector);
    assert_eq!(after.sector_count, before.sector_count, "reservation kept");

    let mut buf = [0u8; 4];
    fs.read("cfg", &mut buf).unwrap();
    assert_eq!(&buf, b"tiny");
}

#[test]
fn overwrite_relocates_when_it_outgrows_the_run() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);
    fs.create("log", &pattern(100)).unwrap(); // 1 sector
    fs.create("pin", &pattern(100)).unwrap(); // pins the next sector

    let grown = pattern(3 * SECTOR_SIZE);
    fs.overwrite("log", &grown).unwrap();
    let st = fs.stat("log").unwrap();
    assert_eq!(st.size, grown.len() as u32);
    assert_eq!(st.sector_count, 3);

    let mut buf = vec![0u8; grown.len()];
    fs.read("log", &mut buf).unwrap();
    assert_eq!(buf, grown);
    assert_eq!(fs.file_count().unwrap(), 2);
}

#[test]
fn append_fills_the_reservation_and_no_further() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);

    // 4100 bytes reserves two sectors; there's room to grow in place.
    let head = pattern(4100);
    fs.create("data", &head).unwrap();
    let tail = pattern(300);
    fs.append("data", &tail).unwrap();

    let st = fs.stat("data").unwrap();
    assert_eq!(st.size, 4400);
    assert_eq!(st.sector_count, 2, "only the size field changed");

    let mut buf = vec![0u8; 4400];
    fs.read("data", &mut buf).unwrap();
    assert_eq!(&buf[..4100], &head[..]);
    assert_eq!(&buf[4100..], &tail[..]);

    // Growing past the two reserved sectors is refused outright.
    assert_eq!(
        fs.append("data", &pattern(4000)).unwrap_err(),
        FsError::WouldNotFit
    );
    assert_eq!(fs.stat("data").unwrap().size, 4400, "refused append is a no-op");
}

#[test]
fn append_crossing_a_sector_boundary() {
    let mut flash = RamFlash::new(18);
    let mut fs = fresh(&mut flash);

    // Exactly one byte shy of the sector edge, inside a two-sector
    // reservation (via an in-place shrink).
    fs.create("x", &pattern(SECTOR_SIZE + 10)).unwrap();
    fs.overwrite("x", &pattern(SECTOR_SIZE - 1)).unwrap();

    let add = pattern(100);
    fs.append("x", &add).unwrap();

    let mut buf = vec![0u8; SECTOR_SIZE - 1 + 100];
    fs.read("x", &mut buf).unwrap();
    assert_eq!(&buf[..SECTOR_SIZE - 1], &pattern(SECTOR_SIZE - 1)[..]);
    assert_eq!(&buf[SECTOR_SIZE - 1..], &add[..]);
}

#[test]
fn table_fills_before_space_does() {
    // 130 data sectors but only 128 table entries: the 129th create must
    // fail NoSlot with sectors still free.
    let mut flash = RamFlash::new(132);
    let mut fs = FlatFs::new(
        &mut flash,
        FsConfig {
            base_addr: 0,
            total_sectors: 132,
            upload_timeout_ticks: 1,
        },
    )
    .unwrap();
    fs.format().unwrap();

    let mut name = String::new();
    for i in 0..128 {
        name.clear();
        use std::fmt::Write;
        write!(name, "f{i}").unwrap();
        fs.create(&name, b"x").unwrap();
    }
    assert_eq!(fs.file_count().unwrap(), 128);
    assert!(fs.free_sectors().unwrap() > 0);
    assert_eq!(fs.create("straw", b"x").unwrap_err(), FsError::NoSlot);

    // Deleting any file frees its slot.
    fs.delete("f64").unwrap();
    fs.create("straw", b"x").unwrap();
}

#[test]
fn region_at_a_nonzero_base_stays_inside_it() {
    let mut flash = RamFlash::new(20);
    let base_sectors = 4;
    let cfg = FsConfig {
        base_addr: (base_sectors * SECTOR_SIZE) as u32,
        total_sectors: 10,
        upload_timeout_ticks: 1,
    };
    {
        let mut fs = FlatFs::new(&mut flash, cfg).unwrap();
        fs.format().unwrap();
        fs.create("f", &pattern(5000)).unwrap();
        let mut buf = vec![0u8; 5000];
        fs.read("f", &mut buf).unwrap();
        assert_eq!(buf, pattern(5000));
    }
    // Nothing below the region was touched.
    assert!(flash.raw()[..base_sectors * SECTOR_SIZE]
        .iter()
        .all(|&b| b == 0xFF));
    // And the superblock sits at the region base.
    assert_eq!(&flash.raw()[base_sectors * SECTOR_SIZE..][..4], b"OSFT");
}
