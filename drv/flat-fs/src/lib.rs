// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flat persistent filesystem on raw flash sectors.
//!
//! The layout is the three-region scheme defined in `abi::fs`: superblock,
//! a single-sector file table of 128 fixed entries, and a data area in
//! which every file occupies one contiguous run of sectors. There is no
//! journal and no wear levelling; what keeps this honest is that every
//! table and superblock update is a full-sector erase-then-write, and that
//! free space is never tracked on flash at all — the allocator rebuilds a
//! sector bitmap from the table each time space is sought and first-fits a
//! run into it.
//!
//! One [`FlatFs`] instance owns the device handle and the single 4 KiB
//! staging buffer used for every read-modify-write; operations take `&mut
//! self`, so the API is non-reentrant by construction. Each operation runs
//! under an interrupt guard from its first device read to its last write
//! (the streaming [`upload`](FlatFs::upload) drops the guard while it
//! waits for bytes — see `upload.rs`).
//!
//! A crash in the middle of an operation can lose the file being written;
//! it cannot corrupt the table into overlapping runs, because the table is
//! rewritten only after data sectors are in place (uploads, which stamp
//! first, are the documented exception).

#![cfg_attr(target_os = "none", no_std)]

mod upload;

pub use upload::{Clock, UPLOAD_ACK, UPLOAD_READY, UPLOAD_TIMEOUT_LINE};

use abi::fs::{
    sectors_for, FileEntry, Superblock, DATA_START_SECTOR, MAX_NAME, NAME_LEN, SECTOR_SIZE,
    SUPERBLOCK_SECTOR, TABLE_SECTOR,
};
use critsec::IrqGuard;
use drv_flash_api::{Flash, FlashError};
use ringlog::{ringlog, ringlog_entry};
use zerocopy::{FromBytes, IntoBytes};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    None,
    Formatted,
    CorruptEntry(usize),
}

ringlog!(Trace, 8, Trace::None);

/// Largest data area we can allocate over: the bitmap is rebuilt on the
/// stack, 1024 bits of it.
pub const MAX_DATA_SECTORS: usize = 1024;

const BITMAP_BYTES: usize = MAX_DATA_SECTORS / 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// No filesystem is mounted (or `mount` found no valid superblock).
    NotMounted,
    /// The region description passed to [`FlatFs::new`] is unusable.
    BadGeometry,
    /// Name empty, too long, or containing a reserved byte.
    BadName,
    /// A file with this name already exists.
    Exists,
    /// No file with this name.
    NotFound,
    /// All 128 file-table entries are in use.
    NoSlot,
    /// No contiguous run of free sectors is big enough.
    NoSpace,
    /// An append would overflow the file's reserved sector run.
    WouldNotFit,
    /// The upload byte source went silent for too long.
    Timeout,
    /// The flash primitives failed underneath us.
    Flash(FlashError),
}

impl From<FlashError> for FsError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

/// Where the filesystem lives and how patient uploads are.
#[derive(Copy, Clone, Debug)]
pub struct FsConfig {
    /// Device-absolute byte address of the region; sector-aligned.
    pub base_addr: u32,
    /// Sectors in the region, metadata included (so the data area holds
    /// `total_sectors - 2`).
    pub total_sectors: u16,
    /// Ticks of inter-byte silence after which an upload is abandoned.
    pub upload_timeout_ticks: u32,
}

/// Snapshot of one live file-table entry.
#[derive(Copy, Clone, Debug)]
pub struct FileStat {
    name: [u8; NAME_LEN],
    pub size: u32,
    pub start_sector: u16,
    pub sector_count: u16,
}

impl FileStat {
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..end]
    }
}

/// Word-aligned staging: the ROM primitives reject unaligned buffers.
#[repr(C, align(4))]
struct SectorBuf([u8; SECTOR_SIZE]);

#[repr(C, align(4))]
struct WordBuf16([u8; 16]);

pub struct FlatFs<F: Flash> {
    dev: F,
    cfg: FsConfig,
    mounted: bool,
    staging: SectorBuf,
}

impl<F: Flash> FlatFs<F> {
    /// Wraps a device. Nothing is touched until [`mount`](Self::mount) or
    /// [`format`](Self::format).
    pub fn new(dev: F, cfg: FsConfig) -> Result<Self, FsError> {
        let aligned = cfg.base_addr as usize % SECTOR_SIZE == 0;
        let sectors_ok = cfg.total_sectors as usize > usize::from(DATA_START_SECTOR)
            && (cfg.total_sectors as usize - usize::from(DATA_START_SECTOR)) <= MAX_DATA_SECTORS;
        if !aligned || !sectors_ok {
            return Err(FsError::BadGeometry);
        }
        Ok(Self {
            dev,
            cfg,
            mounted: false,
            staging: SectorBuf([0; SECTOR_SIZE]),
        })
    }

    /// Gives the device back, e.g. across a simulated reboot in tests.
    pub fn release(self) -> F {
        self.dev
    }

    /// Sectors in the data area.
    pub fn data_sectors(&self) -> u16 {
        self.cfg.total_sectors - DATA_START_SECTOR
    }

    /// Reads the superblock and mounts if (and only if) its magic and
    /// version are ours.
    pub fn mount(&mut self) -> Result<(), FsError> {
        let _guard = IrqGuard::acquire();
        let sb = self.read_superblock()?;
        if !sb.is_current() {
            return Err(FsError::NotMounted);
        }
        self.mounted = true;
        Ok(())
    }

    /// Builds a fresh, empty filesystem: erased metadata sectors, a zeroed
    /// table, and a superblock announcing zero files. Mounts it.
    pub fn format(&mut self) -> Result<(), FsError> {
        let _guard = IrqGuard::acquire();

        self.dev.erase_sector(self.abs_sector(TABLE_SECTOR))?;
        self.staging.0.fill(0);
        let addr = self.sector_addr(TABLE_SECTOR);
        self.dev.write(addr, &self.staging.0)?;

        let sb = Superblock::new(u32::from(self.data_sectors()), 0);
        self.write_superblock(&sb)?;

        self.mounted = true;
        ringlog_entry!(Trace::Formatted);
        Ok(())
    }

    /// Number of live files, per the superblock.
    pub fn file_count(&mut self) -> Result<u32, FsError> {
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        Ok(self.read_superblock()?.file_count.get())
    }

    /// Data sectors not reserved by any file.
    pub fn free_sectors(&mut self) -> Result<u16, FsError> {
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;
        let bitmap = self.build_bitmap();
        let d = self.data_sectors();
        let mut free = 0;
        for s in 0..d {
            if !bit_set(&bitmap, s) {
                free += 1;
            }
        }
        Ok(free)
    }

    /// Creates `name` holding `data`. The payload lands before the table
    /// entry does, so a crash mid-create loses the file, not the table.
    pub fn create(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        let name = validate_name(name)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;

        let (slot, start, nsec) = self.allocate(name, data.len() as u32)?;
        self.write_file_data(start, data)?;
        self.stamp_entry(slot, name, data.len() as u32, start, nsec)?;
        self.bump_file_count(1)
    }

    /// Reads up to `out.len()` bytes of `name`, returning how many were
    /// actually read (the file may be shorter than the buffer).
    pub fn read(&mut self, name: &str, out: &mut [u8]) -> Result<usize, FsError> {
        let name = validate_name(name)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;

        let entry = *self.find_entry(name).ok_or(FsError::NotFound)?;
        let n = (entry.size.get() as usize).min(out.len());
        let start = entry.start_sector.get();

        let mut done = 0;
        while done < n {
            let sector = (done / SECTOR_SIZE) as u16;
            let chunk = (n - done).min(SECTOR_SIZE - done % SECTOR_SIZE);
            self.read_sector(start + sector)?;
            let off = done % SECTOR_SIZE;
            out[done..done + chunk].copy_from_slice(&self.staging.0[off..off + chunk]);
            done += chunk;
        }
        Ok(n)
    }

    /// Replaces `name`'s contents. If the new payload fits the file's
    /// existing sector run it is rewritten in place (the reservation is
    /// kept); otherwise the file is deleted and created afresh, possibly
    /// elsewhere.
    pub fn overwrite(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        let name = validate_name(name)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;

        let (slot, entry) = self.find_entry_slot(name).ok_or(FsError::NotFound)?;
        let new_sectors = sectors_for(data.len() as u32) as u16;

        if new_sectors <= entry.sector_count.get() {
            let start = entry.start_sector.get();
            let keep = entry.sector_count.get();
            self.write_file_data(start, data)?;
            self.stamp_entry(slot, name, data.len() as u32, start, keep)
        } else {
            self.delete_loaded(slot)?;
            self.bump_file_count(-1)?;
            let (slot, start, nsec) = self.allocate(name, data.len() as u32)?;
            self.write_file_data(start, data)?;
            self.stamp_entry(slot, name, data.len() as u32, start, nsec)?;
            self.bump_file_count(1)
        }
    }

    /// Appends `data` to `name` within its reserved run; fails with
    /// `WouldNotFit` when the reservation can't hold the result. Only the
    /// size field of the entry changes.
    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        let name = validate_name(name)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;

        let (slot, entry) = self.find_entry_slot(name).ok_or(FsError::NotFound)?;
        let size = entry.size.get();
        let new_total = size
            .checked_add(data.len() as u32)
            .ok_or(FsError::WouldNotFit)?;
        if sectors_for(new_total) > u32::from(entry.sector_count.get()) {
            return Err(FsError::WouldNotFit);
        }
        let start = entry.start_sector.get();

        // Walk the tail: read-modify-erase-rewrite the partial last
        // sector, then whole-sector writes for the rest.
        let mut pos = size as usize;
        let mut written = 0;
        while written < data.len() {
            let sector = (pos / SECTOR_SIZE) as u16;
            let off = pos % SECTOR_SIZE;
            let chunk = (data.len() - written).min(SECTOR_SIZE - off);
            if off != 0 {
                self.read_sector(start + sector)?;
            } else {
                self.staging.0.fill(0xFF);
            }
            self.staging.0[off..off + chunk].copy_from_slice(&data[written..written + chunk]);
            self.write_sector(start + sector)?;
            pos += chunk;
            written += chunk;
        }

        let keep_start = entry.start_sector.get();
        let keep_count = entry.sector_count.get();
        self.stamp_entry(slot, name, new_total, keep_start, keep_count)
    }

    /// Removes `name` from the table. Its data sectors stay as they are
    /// and get erased when next allocated.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        let name = validate_name(name)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;
        let (slot, _) = self.find_entry_slot(name).ok_or(FsError::NotFound)?;
        self.delete_loaded(slot)?;
        self.bump_file_count(-1)
    }

    /// Renames `old` to `new`. Name field only; no data moves.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), FsError> {
        let old = validate_name(old)?;
        let new = validate_name(new)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;

        if self.find_entry(new).is_some() {
            return Err(FsError::Exists);
        }
        let (slot, entry) = self.find_entry_slot(old).ok_or(FsError::NotFound)?;
        let size = entry.size.get();
        let start = entry.start_sector.get();
        let count = entry.sector_count.get();
        self.stamp_entry(slot, new, size, start, count)
    }

    /// Looks `name` up without touching its data.
    pub fn stat(&mut self, name: &str) -> Result<FileStat, FsError> {
        let name = validate_name(name)?;
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;
        let entry = self.find_entry(name).ok_or(FsError::NotFound)?;
        Ok(stat_of(entry))
    }

    /// Calls `f` once per live file, in table order.
    pub fn list(&mut self, mut f: impl FnMut(&FileStat)) -> Result<(), FsError> {
        let _guard = IrqGuard::acquire();
        self.require_mounted()?;
        self.load_table()?;
        for entry in self.entries() {
            if !entry.is_free() {
                f(&stat_of(entry));
            }
        }
        Ok(())
    }

    // Internals. Everything below assumes the caller holds the op guard.

    pub(crate) fn require_mounted(&self) -> Result<(), FsError> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    fn abs_sector(&self, rel: u16) -> u16 {
        (self.cfg.base_addr as usize / SECTOR_SIZE) as u16 + rel
    }

    fn sector_addr(&self, rel: u16) -> u32 {
        self.cfg.base_addr + u32::from(rel) * SECTOR_SIZE as u32
    }

    pub(crate) fn data_rel_sector(&self, data_idx: u16) -> u16 {
        DATA_START_SECTOR + data_idx
    }

    /// Pulls the file table into the staging buffer.
    pub(crate) fn load_table(&mut self) -> Result<(), FsError> {
        let addr = self.sector_addr(TABLE_SECTOR);
        self.dev.read(addr, &mut self.staging.0)?;
        Ok(())
    }

    /// Pushes the staged table back: full-sector erase, then write.
    pub(crate) fn store_table(&mut self) -> Result<(), FsError> {
        self.dev.erase_sector(self.abs_sector(TABLE_SECTOR))?;
        let addr = self.sector_addr(TABLE_SECTOR);
        self.dev.write(addr, &self.staging.0)?;
        Ok(())
    }

    pub(crate) fn entries(&self) -> &[FileEntry] {
        // The table sector is exactly MAX_FILES packed entries and
        // FileEntry is unaligned; the cast cannot fail.
        match <[FileEntry]>::ref_from_bytes(&self.staging.0) {
            Ok(entries) => entries,
            Err(_) => unreachable!(),
        }
    }

    fn entries_mut(&mut self) -> &mut [FileEntry] {
        match <[FileEntry]>::mut_from_bytes(&mut self.staging.0) {
            Ok(entries) => entries,
            Err(_) => unreachable!(),
        }
    }

    pub(crate) fn find_entry(&self, name: &[u8]) -> Option<&FileEntry> {
        self.entries()
            .iter()
            .find(|e| !e.is_free() && e.name_bytes() == name)
    }

    fn find_entry_slot(&self, name: &[u8]) -> Option<(usize, FileEntry)> {
        self.entries()
            .iter()
            .enumerate()
            .find(|(_, e)| !e.is_free() && e.name_bytes() == name)
            .map(|(i, e)| (i, *e))
    }

    /// Picks a free table slot and a first-fit run for `len` bytes.
    /// Expects the table to be loaded; leaves it loaded.
    pub(crate) fn allocate(
        &mut self,
        name: &[u8],
        len: u32,
    ) -> Result<(usize, u16, u16), FsError> {
        self.load_table()?;
        if self.find_entry(name).is_some() {
            return Err(FsError::Exists);
        }
        let slot = self
            .entries()
            .iter()
            .position(|e| e.is_free())
            .ok_or(FsError::NoSlot)?;

        let want = sectors_for(len);
        if want > u32::from(self.data_sectors()) {
            return Err(FsError::NoSpace);
        }
        let want = want as u16;
        let bitmap = self.build_bitmap();
        let start = find_run(&bitmap, self.data_sectors(), want).ok_or(FsError::NoSpace)?;
        Ok((slot, start, want))
    }

    /// Marks every sector reserved by a live entry. Entries that claim
    /// sectors beyond the data area are logged and clamped, so one corrupt
    /// entry can't wedge allocation.
    fn build_bitmap(&self) -> [u8; BITMAP_BYTES] {
        let d = self.data_sectors();
        let mut bitmap = [0u8; BITMAP_BYTES];
        for (i, e) in self.entries().iter().enumerate() {
            if e.is_free() {
                continue;
            }
            let start = e.start_sector.get();
            let count = e.sector_count.get();
            if u32::from(start) + u32::from(count) > u32::from(d) {
                ringlog_entry!(Trace::CorruptEntry(i));
            }
            for s in start..start.saturating_add(count).min(d) {
                bitmap[usize::from(s) / 8] |= 1 << (s % 8);
            }
        }
        bitmap
    }

    /// Erase-then-write the data sectors for a payload starting at data
    /// sector `start`. Clobbers the staging buffer.
    pub(crate) fn write_file_data(&mut self, start: u16, data: &[u8]) -> Result<(), FsError> {
        let mut remaining = data;
        let mut sector = start;
        while !remaining.is_empty() {
            let chunk = remaining.len().min(SECTOR_SIZE);
            self.staging.0[..chunk].copy_from_slice(&remaining[..chunk]);
            // Word-pad the tail with zeros and write only the words that
            // hold payload; the rest of the sector keeps its erase value.
            let padded = (chunk + 3) & !3;
            self.staging.0[chunk..padded].fill(0);

            let rel = self.data_rel_sector(sector);
            self.dev.erase_sector(self.abs_sector(rel))?;
            let addr = self.sector_addr(rel);
            self.dev.write(addr, &self.staging.0[..padded])?;

            remaining = &remaining[chunk..];
            sector += 1;
        }
        Ok(())
    }

    /// Reads data sector `idx` (relative to the data area) into staging.
    pub(crate) fn read_sector(&mut self, idx: u16) -> Result<(), FsError> {
        let rel = self.data_rel_sector(idx);
        let addr = self.sector_addr(rel);
        self.dev.read(addr, &mut self.staging.0)?;
        Ok(())
    }

    /// Erases data sector `idx` and writes the whole staging buffer to it.
    pub(crate) fn write_sector(&mut self, idx: u16) -> Result<(), FsError> {
        let rel = self.data_rel_sector(idx);
        self.dev.erase_sector(self.abs_sector(rel))?;
        let addr = self.sector_addr(rel);
        self.dev.write(addr, &self.staging.0)?;
        Ok(())
    }

    /// Rewrites table slot `slot` with a live entry. Reloads the table
    /// first (the staging buffer may have been used for data since the
    /// caller looked at it).
    pub(crate) fn stamp_entry(
        &mut self,
        slot: usize,
        name: &[u8],
        size: u32,
        start: u16,
        count: u16,
    ) -> Result<(), FsError> {
        self.load_table()?;
        self.entries_mut()[slot] = FileEntry::stamp(name, size, start, count);
        self.store_table()
    }

    /// Clears a slot in the already-loaded table and rewrites it.
    fn delete_loaded(&mut self, slot: usize) -> Result<(), FsError> {
        self.entries_mut()[slot].clear();
        self.store_table()
    }

    pub(crate) fn delete_slot_by_name(&mut self, name: &[u8]) -> Result<(), FsError> {
        self.load_table()?;
        let (slot, _) = self.find_entry_slot(name).ok_or(FsError::NotFound)?;
        self.delete_loaded(slot)?;
        self.bump_file_count(-1)
    }

    fn read_superblock(&self) -> Result<Superblock, FsError> {
        let mut buf = WordBuf16([0; 16]);
        self.dev.read(self.cfg.base_addr, &mut buf.0)?;
        match Superblock::read_from_bytes(&buf.0) {
            Ok(sb) => Ok(sb),
            // 16 bytes exactly; the conversion cannot fail.
            Err(_) => unreachable!(),
        }
    }

    fn write_superblock(&mut self, sb: &Superblock) -> Result<(), FsError> {
        let mut buf = WordBuf16([0; 16]);
        buf.0.copy_from_slice(sb.as_bytes());
        self.dev.erase_sector(self.abs_sector(SUPERBLOCK_SECTOR))?;
        self.dev.write(self.cfg.base_addr, &buf.0)?;
        Ok(())
    }

    pub(crate) fn bump_file_count(&mut self, delta: i32) -> Result<(), FsError> {
        let sb = self.read_superblock()?;
        let count = sb.file_count.get().wrapping_add(delta as u32);
        let sb = Superblock::new(u32::from(self.data_sectors()), count);
        self.write_superblock(&sb)
    }
}

/// Checks a caller-supplied name: nonempty, at most [`MAX_NAME`] bytes,
/// and free of NUL (the terminator) and 0xFF (the erased-flash marker that
/// flags an entry free).
fn validate_name(name: &str) -> Result<&[u8], FsError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NAME {
        return Err(FsError::BadName);
    }
    if bytes.iter().any(|&b| b == 0x00 || b == 0xFF) {
        return Err(FsError::BadName);
    }
    Ok(bytes)
}

fn stat_of(entry: &FileEntry) -> FileStat {
    FileStat {
        name: entry.name,
        size: entry.size.get(),
        start_sector: entry.start_sector.get(),
        sector_count: entry.sector_count.get(),
    }
}

fn bit_set(bitmap: &[u8; BITMAP_BYTES], sector: u16) -> bool {
    bitmap[usize::from(sector) / 8] & (1 << (sector % 8)) != 0
}

/// First fit: the lowest start index where `want` consecutive data
/// sectors are free. A zero-length request trivially fits at 0.
fn find_run(bitmap: &[u8; BITMAP_BYTES], d: u16, want: u16) -> Option<u16> {
    if want == 0 {
        return Some(0);
    }
    let mut run = 0u16;
    let mut run_start = 0u16;
    for s in 0..d {
        if bit_set(bitmap, s) {
            run = 0;
        } else {
            if run == 0 {
                run_start = s;
            }
            run += 1;
            if run == want {
                return Some(run_start);
            }
        }
    }
    None
}
