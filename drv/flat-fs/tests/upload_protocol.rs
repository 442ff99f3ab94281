// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The sector-ACKed upload protocol, end to end over a scripted channel.

mod common;

use std::cell::Cell;
use std::collections::VecDeque;

use abi::fs::SECTOR_SIZE;
use common::RamFlash;
use drv_flat_fs::{Clock, FlatFs, FsConfig, FsError, UPLOAD_ACK};
use drv_serial_api::ByteChannel;

const CFG: FsConfig = FsConfig {
    base_addr: 0,
    total_sectors: 10, // 8 data sectors
    upload_timeout_ticks: 50,
};

/// Serial stand-in: scripted input, captured output.
struct ScriptChannel {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl ScriptChannel {
    fn loaded(bytes: &[u8]) -> Self {
        Self {
            input: bytes.iter().copied().collect(),
            output: Vec::new(),
        }
    }
}

impl ByteChannel for ScriptChannel {
    fn try_read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn write_byte(&mut self, b: u8) {
        self.output.push(b);
    }
}

/// A tick counter the test advances from the upload's relax hook, playing
/// the role of time passing while the task yields.
struct TestClock {
    now: Cell<u32>,
}

impl TestClock {
    fn new(start: u32) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    fn tick(&self) {
        self.now.set(self.now.get().wrapping_add(1));
    }
}

impl Clock for TestClock {
    fn now_ticks(&self) -> u32 {
        self.now.get()
    }
}

/// Reference CRC-16/CCITT: poly 0x1021, init 0xFFFF, no reflection, no
/// final XOR. Bitwise, independent of the implementation under test.
fn crc16_ref(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 + 5) as u8).collect()
}

#[test]
fn three_sector_upload_follows_the_wire_format() {
    let mut flash = RamFlash::new(10);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    fs.format().unwrap();

    let data = payload(12_288);
    let mut io = ScriptChannel::loaded(&data);
    let clock = TestClock::new(7);

    let crc = fs
        .upload("game.bin", 12_288, &mut io, &clock, || clock.tick())
        .unwrap();
    assert_eq!(crc, crc16_ref(&data));

    // Exact transcript: READY, one ACK per sector, then the OK line.
    let mut expected = b"READY\n".to_vec();
    expected.extend_from_slice(&[UPLOAD_ACK; 3]);
    expected.extend_from_slice(format!("\nOK {crc:#06x}\n").as_bytes());
    assert_eq!(io.output, expected);

    // The file is fully there.
    assert_eq!(fs.stat("game.bin").unwrap().size, 12_288);
    let mut buf = vec![0u8; 12_288];
    assert_eq!(fs.read("game.bin", &mut buf).unwrap(), 12_288);
    assert_eq!(buf, data);
}

#[test]
fn partial_last_sector_is_padded_not_checksummed() {
    let mut flash = RamFlash::new(10);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    fs.format().unwrap();

    // 100 bytes: one sector, mostly padding.
    let data = payload(100);
    let mut io = ScriptChannel::loaded(&data);
    let clock = TestClock::new(0);

    let crc = fs
        .upload("tiny", 100, &mut io, &clock, || clock.tick())
        .unwrap();
    // The CRC covers the payload only; padding would change it.
    assert_eq!(crc, crc16_ref(&data));

    // On flash, everything past the payload in that sector is 0xFF.
    let st = fs.stat("tiny").unwrap();
    assert_eq!(st.sector_count, 1);
    let sector_base = (2 + st.start_sector as usize) * SECTOR_SIZE;
    let released = fs.release();
    assert_eq!(&released.raw()[sector_base..sector_base + 100], &data[..]);
    assert!(released.raw()[sector_base + 100..sector_base + SECTOR_SIZE]
        .iter()
        .all(|&b| b == 0xFF));
}

#[test]
fn empty_upload_reports_the_crc_init_value() {
    let mut flash = RamFlash::new(10);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    fs.format().unwrap();

    let mut io = ScriptChannel::loaded(b"");
    let clock = TestClock::new(0);
    let crc = fs
        .upload("marker", 0, &mut io, &clock, || clock.tick())
        .unwrap();
    assert_eq!(crc, 0xFFFF);
    assert_eq!(io.output, b"READY\n\nOK 0xffff\n".to_vec());
    assert_eq!(fs.stat("marker").unwrap().size, 0);
}

#[test]
fn silence_times_out_and_deletes_the_reservation() {
    let mut flash = RamFlash::new(10);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    fs.format().unwrap();

    // The host dies 100 bytes into an 8 KiB transfer. Each relax is one
    // tick of silence; 50 of those is the configured limit.
    let data = payload(100);
    let mut io = ScriptChannel::loaded(&data);
    let clock = TestClock::new(1_000);

    let err = fs
        .upload("wedged.bin", 8_192, &mut io, &clock, || clock.tick())
        .unwrap_err();
    assert_eq!(err, FsError::Timeout);

    // READY went out, no sector completed, and the error line closed it.
    let mut expected = b"READY\n".to_vec();
    expected.extend_from_slice(b"ERR timeout\n");
    assert_eq!(io.output, expected);

    // The pre-stamped reservation is gone again.
    assert_eq!(fs.stat("wedged.bin").unwrap_err(), FsError::NotFound);
    assert_eq!(fs.file_count().unwrap(), 0);
    assert_eq!(fs.free_sectors().unwrap(), 8);
}

#[test]
fn upload_respects_exists_and_space() {
    let mut flash = RamFlash::new(10);
    let mut fs = FlatFs::new(&mut flash, CFG).unwrap();
    fs.format().unwrap();
    fs.create("taken", b"x").unwrap();

    let clock = TestClock::new(0);
    let mut io = ScriptChannel::loaded(b"");
    assert_eq!(
        fs.upload("taken", 16, &mut io, &clock, || clock.tick())
            .unwrap_err(),
        FsError::Exists
    );
    assert!(io.output.is_empty(), "no READY before the reservation");

    let mut io = ScriptChannel::loaded(b"");
    assert_eq!(
        fs.upload("huge", 9 * SECTOR_SIZE as u32, &mut io, &clock, || clock
            .tick())
            .unwrap_err(),
        FsError::NoSpace
    );
}
