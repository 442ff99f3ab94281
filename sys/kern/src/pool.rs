// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-block pool: O(1) allocation of equal-sized blocks.
//!
//! The pool owns a contiguous region carved into `block_count` blocks of
//! `block_size` bytes. Free blocks form an intrusive singly-linked list,
//! each storing the address of the next free block in its own first word,
//! so the pool needs no side storage. Allocation unlinks the head and
//! zeroes the block; free pushes back onto the head. Both splice under an
//! interrupt guard, so tasks and ISRs may share a pool (though ISRs should
//! not allocate — see the crate docs).
//!
//! The free/used counters are atomics readable without a guard; a reader
//! racing an operation may observe a momentarily inconsistent pair, but
//! each counter is individually coherent and the pair re-converges.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use abi::KernError;
use critsec::IrqCell;
use ringlog::{ringlog, ringlog_entry};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    None,
    BadFree(usize),
}

ringlog!(Trace, 8, Trace::None);

const WORD: usize = core::mem::size_of::<usize>();

#[derive(Debug)]
pub struct Pool {
    inner: IrqCell<PoolInner>,
    free_count: AtomicUsize,
    used_count: AtomicUsize,
}

struct PoolInner {
    base: usize,
    block_size: usize,
    block_count: usize,
    /// Address of the first free block, or `None` when exhausted.
    free_head: Option<usize>,
}

impl Pool {
    /// Wires up a pool over `region`, linking every block into the free
    /// list.
    ///
    /// The region must be word-aligned and `block_size` must be a nonzero
    /// multiple of the word size (the first word of each free block holds
    /// the list link); anything else is `InvalidParam`.
    pub fn new(region: &'static mut [u8], block_size: usize) -> Result<Self, KernError> {
        // Safety: we hold the unique `&'static mut`, so handing the region
        // to the pool forever is sound.
        unsafe { Self::from_raw(region.as_mut_ptr(), region.len(), block_size) }
    }

    /// Like [`Pool::new`] but from raw parts.
    ///
    /// # Safety
    ///
    /// `base..base+len` must be exclusively owned by the pool for the rest
    /// of the program.
    pub unsafe fn from_raw(
        base: *mut u8,
        len: usize,
        block_size: usize,
    ) -> Result<Self, KernError> {
        if block_size == 0 || block_size % WORD != 0 || base as usize % WORD != 0 {
            return Err(KernError::InvalidParam);
        }
        let block_count = len / block_size;
        if block_count == 0 {
            return Err(KernError::InvalidParam);
        }

        let base = base as usize;
        // Thread the free list through the blocks, last block terminating
        // the list.
        for i in 0..block_count {
            let addr = base + i * block_size;
            let next = if i + 1 < block_count {
                addr + block_size
            } else {
                0
            };
            unsafe { (addr as *mut usize).write(next) };
        }

        Ok(Self {
            inner: IrqCell::new(PoolInner {
                base,
                block_size,
                block_count,
                free_head: Some(base),
            }),
            free_count: AtomicUsize::new(block_count),
            used_count: AtomicUsize::new(0),
        })
    }

    /// Takes a block, zeroed, in O(1). Fails with `NoBlock` when the pool
    /// is exhausted.
    pub fn alloc(&self) -> Result<NonNull<u8>, KernError> {
        let (addr, size) = self
            .inner
            .with(|p| {
                let head = p.free_head?;
                // Safety: `head` is a free block we own; its first word is
                // the list link we wrote.
                let next = unsafe { (head as *const usize).read() };
                p.free_head = if next == 0 { None } else { Some(next) };
                Some((head, p.block_size))
            })
            .ok_or(KernError::NoBlock)?;

        self.free_count.fetch_sub(1, Ordering::Relaxed);
        self.used_count.fetch_add(1, Ordering::Relaxed);

        // The block is ours now; zero it outside the guard.
        // Safety: unlinked above, so nobody else references it.
        unsafe { core::ptr::write_bytes(addr as *mut u8, 0, size) };
        // Safety: block addresses are never null (the region is real
        // memory and 0 is the list terminator, never a block).
        Ok(unsafe { NonNull::new_unchecked(addr as *mut u8) })
    }

    /// Returns a block to the pool in O(1).
    ///
    /// A pointer outside the region or not on a block boundary is an
    /// invariant violation: the free is dropped silently and logged.
    pub fn free(&self, block: NonNull<u8>) {
        let addr = block.as_ptr() as usize;
        let pushed = self.inner.with(|p| {
            let span = p.block_size * p.block_count;
            let in_range = addr >= p.base && addr < p.base + span;
            if !in_range || (addr - p.base) % p.block_size != 0 {
                return false;
            }
            let next = p.free_head.unwrap_or(0);
            // Safety: validated as a block boundary inside our region.
            unsafe { (addr as *mut usize).write(next) };
            p.free_head = Some(addr);
            true
        });

        if pushed {
            self.free_count.fetch_add(1, Ordering::Relaxed);
            self.used_count.fetch_sub(1, Ordering::Relaxed);
        } else {
            ringlog_entry!(Trace::BadFree(addr));
            crate::klog!("pool: bad free {:#x}", addr);
        }
    }

    /// Number of blocks currently free. Guard-free read.
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    /// Number of blocks currently allocated. Guard-free read.
    pub fn used_count(&self) -> usize {
        self.used_count.load(Ordering::Relaxed)
    }

    pub fn block_size(&self) -> usize {
        self.inner.with(|p| p.block_size)
    }

    pub fn block_count(&self) -> usize {
        self.inner.with(|p| p.block_count)
    }
}
