// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A RAM-backed flash with real NOR behavior: writes can only clear bits,
//! so a missing erase shows up as corrupted data instead of passing
//! silently, and alignment violations fail the way the ROM would.

use abi::fs::SECTOR_SIZE;
use drv_flash_api::{Flash, FlashError, FLASH_WORD};

pub struct RamFlash {
    mem: Vec<u8>,
    pub erases: u32,
    pub writes: u32,
}

impl RamFlash {
    pub fn new(sectors: usize) -> Self {
        Self {
            mem: vec![0xFF; sectors * SECTOR_SIZE],
            erases: 0,
            writes: 0,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.mem
    }

    fn check(&self, addr: u32, len: usize, buf: usize) -> Result<usize, FlashError> {
        let addr = addr as usize;
        if addr % FLASH_WORD != 0 || len % FLASH_WORD != 0 || buf % FLASH_WORD != 0 {
            return Err(FlashError::Misaligned);
        }
        if addr + len > self.mem.len() {
            return Err(FlashError::OutOfRange);
        }
        Ok(addr)
    }
}

impl Flash for RamFlash {
    fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), FlashError> {
        let addr = self.check(addr, dst.len(), dst.as_ptr() as usize)?;
        dst.copy_from_slice(&self.mem[addr..addr + dst.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, src: &[u8]) -> Result<(), FlashError> {
        let addr = self.check(addr, src.len(), src.as_ptr() as usize)?;
        for (dst, &b) in self.mem[addr..addr + src.len()].iter_mut().zip(src) {
            // NOR: programming can only clear bits.
            *dst &= b;
        }
        self.writes += 1;
        Ok(())
    }

    fn erase_sector(&mut self, index: u16) -> Result<(), FlashError> {
        let start = usize::from(index) * SECTOR_SIZE;
        if start + SECTOR_SIZE > self.mem.len() {
            return Err(FlashError::OutOfRange);
        }
        self.mem[start..start + SECTOR_SIZE].fill(0xFF);
        self.erases += 1;
        Ok(())
    }
}
