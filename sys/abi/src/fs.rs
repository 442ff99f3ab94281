// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-flash layout of the flat filesystem, bit-exact.
//!
//! The filesystem occupies a run of flash sectors: sector 0 holds the
//! superblock, sector 1 the file table, and every sector from 2 on is data.
//! Both metadata structures are defined here with `zerocopy` so the driver
//! (and host tooling) can overlay them on raw sector bytes without copying
//! or hand-rolled offset math.
//!
//! All multi-byte fields are little-endian regardless of host.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Flash sector size in bytes. Erase granularity and the unit of the upload
/// protocol's per-sector ACK.
pub const SECTOR_SIZE: usize = 4096;

/// Superblock magic: the bytes `OSFT` read as a little-endian word.
pub const FS_MAGIC: u32 = u32::from_le_bytes(*b"OSFT");

/// Current layout version.
pub const FS_VERSION: u32 = 1;

/// Number of file-table entries. 128 entries of 32 bytes fill the table
/// sector exactly.
pub const MAX_FILES: usize = 128;

/// Bytes reserved for a file name, including the terminating NUL.
pub const NAME_LEN: usize = 24;

/// Longest usable name (one byte stays for the NUL).
pub const MAX_NAME: usize = NAME_LEN - 1;

/// Sector index of the superblock within the filesystem region.
pub const SUPERBLOCK_SECTOR: u16 = 0;

/// Sector index of the file table.
pub const TABLE_SECTOR: u16 = 1;

/// First data sector; data-area indices in [`FileEntry`] are relative to
/// this.
pub const DATA_START_SECTOR: u16 = 2;

/// The superblock, at offset 0 of the filesystem region. The remainder of
/// its sector stays erased (0xFF).
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Superblock {
    pub magic: U32,
    pub version: U32,
    /// Number of sectors in the data area (D).
    pub total_sectors: U32,
    /// Number of non-free file-table entries.
    pub file_count: U32,
}

impl Superblock {
    pub fn new(data_sectors: u32, file_count: u32) -> Self {
        Self {
            magic: U32::new(FS_MAGIC),
            version: U32::new(FS_VERSION),
            total_sectors: U32::new(data_sectors),
            file_count: U32::new(file_count),
        }
    }

    /// True iff the magic and version identify a filesystem this code
    /// understands.
    pub fn is_current(&self) -> bool {
        self.magic.get() == FS_MAGIC && self.version.get() == FS_VERSION
    }
}

/// One file-table entry: 32 bytes, packed.
///
/// An entry is free iff the first name byte is 0x00 (explicitly cleared) or
/// 0xFF (never written since erase). Live entries name a single contiguous
/// run of data sectors.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FileEntry {
    /// NUL-terminated name.
    pub name: [u8; NAME_LEN],
    /// File size in bytes.
    pub size: U32,
    /// First data sector of the file, counted from the start of the data
    /// area.
    pub start_sector: U16,
    /// Number of data sectors reserved for the file.
    pub sector_count: U16,
}

/// Size of a packed entry; pinned by a test as well.
pub const ENTRY_SIZE: usize = 32;

impl FileEntry {
    pub fn is_free(&self) -> bool {
        self.name[0] == 0x00 || self.name[0] == 0xFF
    }

    /// The name bytes up to (not including) the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        &self.name[..end]
    }

    /// Stamps a live entry. `name` must already be validated (non-empty,
    /// at most [`MAX_NAME`] bytes, no interior NUL).
    pub fn stamp(name: &[u8], size: u32, start_sector: u16, sector_count: u16) -> Self {
        let mut n = [0u8; NAME_LEN];
        n[..name.len()].copy_from_slice(name);
        Self {
            name: n,
            size: U32::new(size),
            start_sector: U16::new(start_sector),
            sector_count: U16::new(sector_count),
        }
    }

    /// Returns the entry to the free state.
    pub fn clear(&mut self) {
        self.name = [0; NAME_LEN];
        self.size = U32::new(0);
        self.start_sector = U16::new(0);
        self.sector_count = U16::new(0);
    }
}

/// Number of data sectors needed to hold `len` bytes.
pub fn sectors_for(len: u32) -> u32 {
    len.div_ceil(SECTOR_SIZE as u32)
}
