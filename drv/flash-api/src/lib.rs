// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the raw flash primitives.
//!
//! The actual implementations are thin wrappers over the vendor ROM's
//! flash routines, owned by the platform; this crate only fixes the
//! contract the filesystem programs against. The ROM's restrictions are
//! part of that contract:
//!
//! - `read`/`write` addresses, lengths, and *buffer addresses* must be
//!   word-aligned (4 bytes);
//! - erase granularity is one sector of [`SECTOR_SIZE`] bytes
//!   (`abi::fs::SECTOR_SIZE`), addressed by sector index;
//! - writes can only clear bits — a sector must be erased (to all-0xFF)
//!   before it can be rewritten.

#![cfg_attr(target_os = "none", no_std)]

/// Alignment unit for flash operations, in bytes.
pub const FLASH_WORD: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlashError {
    /// An address, length, or buffer violated word alignment.
    Misaligned,
    /// The operation fell outside the device.
    OutOfRange,
    /// The ROM routine reported a failure.
    Device,
}

pub trait Flash {
    /// Copies `dst.len()` bytes from flash at `addr`.
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), FlashError>;

    /// Programs `src` at `addr`. The target range must be erased.
    fn write(&mut self, addr: u32, src: &[u8]) -> Result<(), FlashError>;

    /// Erases the sector with the given device-absolute index to all-0xFF.
    fn erase_sector(&mut self, index: u16) -> Result<(), FlashError>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(addr, dst)
    }

    fn write(&mut self, addr: u32, src: &[u8]) -> Result<(), FlashError> {
        (**self).write(addr, src)
    }

    fn erase_sector(&mut self, index: u16) -> Result<(), FlashError> {
        (**self).erase_sector(index)
    }
}
