// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The streaming upload protocol.
//!
//! The host drives this over the serial channel, one flash sector at a
//! time, with a one-byte ACK per sector for flow control:
//!
//! 1. device emits `READY\n`;
//! 2. for each of ⌈total/4096⌉ sectors the host sends the payload bytes
//!    and the device, having erased and written the sector, answers `#`;
//! 3. after the last sector the device emits `\nOK 0x<crc16>\n`, where
//!    the checksum is CRC-16/CCITT (poly 0x1021, init 0xFFFF, no
//!    reflection, no final XOR) over the received payload only — never
//!    the 0xFF sector padding.
//!
//! The file-table entry is stamped, at full size, *before* any payload
//! arrives, so the sector reservation survives a partial transfer; a
//! transfer that dies mid-way leaves a full-size file whose tail sectors
//! read 0xFF. That is the documented trade for not journaling.
//!
//! If no byte arrives for the configured timeout the device gives up:
//! `ERR timeout\n`, the entry is deleted, and the caller gets
//! [`FsError::Timeout`].

use core::fmt::Write as _;

use abi::fs::SECTOR_SIZE;
use crc::{Crc, CRC_16_IBM_3740};
use critsec::IrqGuard;
use drv_flash_api::Flash;
use drv_serial_api::ByteChannel;
use ringlog::{ringlog, ringlog_entry};

use crate::{FlatFs, FsError};

/// CRC-16/CCITT as the protocol defines it. A static, not a const: the
/// digest borrows it across the whole transfer.
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Line emitted once the reservation is in place.
pub const UPLOAD_READY: &[u8] = b"READY\n";

/// Per-sector ACK byte, the host's flow control.
pub const UPLOAD_ACK: u8 = b'#';

/// Line emitted when the byte source goes silent too long.
pub const UPLOAD_TIMEOUT_LINE: &[u8] = b"ERR timeout\n";

/// A read-only tick source; the kernel's tick counter on the device, a
/// hand-cranked counter in tests.
pub trait Clock {
    fn now_ticks(&self) -> u32;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    None,
    Started(u32),
    SectorDone(u32),
    TimedOut,
}

ringlog!(Trace, 16, Trace::None);

impl<F: Flash> FlatFs<F> {
    /// Receives `total` bytes from `io` into a new file `name`, per the
    /// protocol above. Returns the CRC-16 that was reported to the host.
    ///
    /// `relax` is called whenever the byte source runs dry — on the
    /// device it yields to the scheduler, which is the only suspension
    /// point inside any filesystem operation. The interrupt guard is held
    /// across each sector's erase/write, never across `relax`.
    pub fn upload(
        &mut self,
        name: &str,
        total: u32,
        io: &mut impl ByteChannel,
        clock: &impl Clock,
        mut relax: impl FnMut(),
    ) -> Result<u16, FsError> {
        let name = crate::validate_name(name)?;

        // Reserve and stamp up front, full size.
        {
            let _guard = IrqGuard::acquire();
            self.require_mounted()?;
            let (slot, start, nsec) = self.allocate(name, total)?;
            self.stamp_entry(slot, name, total, start, nsec)?;
            self.bump_file_count(1)?;
        }
        ringlog_entry!(Trace::Started(total));
        io.write_all(UPLOAD_READY);

        // Safe to look up now: nothing between here and the end touches
        // the table except the timeout path.
        let start = {
            let _guard = IrqGuard::acquire();
            self.load_table()?;
            match self.find_entry(name) {
                Some(e) => e.start_sector.get(),
                None => unreachable!(),
            }
        };

        let mut digest = CRC16.digest();
        let mut received = 0u32;
        let mut sector = 0u16;
        let mut last_byte_tick = clock.now_ticks();

        while received < total {
            let expected = (total - received).min(SECTOR_SIZE as u32) as usize;

            // Fill one sector's worth from the byte source. No guard held
            // here: this is where we wait, and waiting yields.
            let mut got = 0;
            while got < expected {
                match io.try_read_byte() {
                    Some(b) => {
                        self.staging.0[got] = b;
                        got += 1;
                        last_byte_tick = clock.now_ticks();
                    }
                    None => {
                        if tick_reached(
                            clock.now_ticks(),
                            last_byte_tick.wrapping_add(self.cfg.upload_timeout_ticks),
                        ) {
                            return self.abandon(name, io);
                        }
                        relax();
                    }
                }
            }

            digest.update(&self.staging.0[..expected]);
            self.staging.0[expected..].fill(0xFF);

            {
                let _guard = IrqGuard::acquire();
                self.write_sector(start + sector)?;
            }
            io.write_byte(UPLOAD_ACK);
            ringlog_entry!(Trace::SectorDone(u32::from(sector)));

            received += expected as u32;
            sector += 1;
        }

        let crc = digest.finalize();
        let mut line: heapless::String<16> = heapless::String::new();
        // The buffer comfortably fits "\nOK 0xffff\n".
        let _ = write!(line, "\nOK {:#06x}\n", crc);
        io.write_all(line.as_bytes());
        Ok(crc)
    }

    fn abandon(&mut self, name: &[u8], io: &mut impl ByteChannel) -> Result<u16, FsError> {
        ringlog_entry!(Trace::TimedOut);
        io.write_all(UPLOAD_TIMEOUT_LINE);
        let _guard = IrqGuard::acquire();
        self.delete_slot_by_name(name)?;
        Err(FsError::Timeout)
    }
}

/// Wrap-safe "has `now` reached `deadline`".
fn tick_reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) as i32 >= 0
}
