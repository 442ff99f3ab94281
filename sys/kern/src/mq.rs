// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded message queues.
//!
//! A queue is a circular buffer of fixed-size slots bracketed by two
//! semaphores: `not_full` starts at the capacity and gates senders,
//! `not_empty` starts at zero and gates receivers. The semaphores provide
//! all the waiting and all the backpressure; the buffer splice itself is a
//! copy under an interrupt guard. Messages are copied by value — the queue
//! neither owns nor interprets their contents.
//!
//! Storage is caller-provided (`capacity × msg_size` bytes), so queue
//! sizing is a decision made where the queue is created, not here.

use abi::KernError;
use critsec::IrqCell;

use crate::sync::Semaphore;

#[derive(Debug)]
pub struct MsgQueue {
    msg_size: usize,
    capacity: usize,
    inner: IrqCell<MqInner>,
    not_full: Semaphore,
    not_empty: Semaphore,
}

struct MqInner {
    storage: *mut u8,
    head: usize,
    tail: usize,
}

// Safety: the storage pointer came from an exclusive `&'static mut` and is
// only dereferenced inside the cell's critical section.
unsafe impl Send for MqInner {}

impl MsgQueue {
    /// Builds a queue over `storage`, which must be exactly
    /// `capacity * msg_size` bytes; neither may be zero.
    pub fn new(
        storage: &'static mut [u8],
        msg_size: usize,
        capacity: usize,
    ) -> Result<Self, KernError> {
        if msg_size == 0 || capacity == 0 || storage.len() != msg_size * capacity {
            return Err(KernError::InvalidParam);
        }
        Ok(Self {
            msg_size,
            capacity,
            inner: IrqCell::new(MqInner {
                storage: storage.as_mut_ptr(),
                head: 0,
                tail: 0,
            }),
            not_full: Semaphore::new(capacity as u32),
            not_empty: Semaphore::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn msg_size(&self) -> usize {
        self.msg_size
    }

    /// Messages currently queued. Informational; see
    /// [`Semaphore::count`].
    pub fn count(&self) -> u32 {
        self.not_empty.count()
    }

    /// Sends a message, blocking while the queue is full. `msg` must be
    /// exactly one slot long.
    pub fn send(&self, msg: &[u8]) -> Result<(), KernError> {
        if msg.len() != self.msg_size {
            return Err(KernError::InvalidParam);
        }
        self.not_full.wait();
        self.push(msg);
        self.not_empty.post();
        Ok(())
    }

    /// Sends without blocking; fails with `QueueFull` when no slot is
    /// free. Safe from interrupt context.
    pub fn try_send(&self, msg: &[u8]) -> Result<(), KernError> {
        if msg.len() != self.msg_size {
            return Err(KernError::InvalidParam);
        }
        self.not_full
            .try_wait()
            .map_err(|_| KernError::QueueFull)?;
        self.push(msg);
        self.not_empty.post();
        Ok(())
    }

    /// Receives the oldest message into `out`, blocking while the queue is
    /// empty. `out` must be exactly one slot long.
    pub fn recv(&self, out: &mut [u8]) -> Result<(), KernError> {
        if out.len() != self.msg_size {
            return Err(KernError::InvalidParam);
        }
        self.not_empty.wait();
        self.pop(out);
        self.not_full.post();
        Ok(())
    }

    /// Receives without blocking; fails with `QueueEmpty` when nothing is
    /// queued. Safe from interrupt context.
    pub fn try_recv(&self, out: &mut [u8]) -> Result<(), KernError> {
        if out.len() != self.msg_size {
            return Err(KernError::InvalidParam);
        }
        self.not_empty
            .try_wait()
            .map_err(|_| KernError::QueueEmpty)?;
        self.pop(out);
        self.not_full.post();
        Ok(())
    }

    fn push(&self, msg: &[u8]) {
        self.inner.with(|q| {
            let slot = q.head * self.msg_size;
            // Safety: `head` stays within capacity and the storage is
            // exactly capacity slots; exclusive access via the cell.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    msg.as_ptr(),
                    q.storage.add(slot),
                    self.msg_size,
                );
            }
            q.head = (q.head + 1) % self.capacity;
        });
    }

    fn pop(&self, out: &mut [u8]) {
        self.inner.with(|q| {
            let slot = q.tail * self.msg_size;
            // Safety: as in `push`.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    q.storage.add(slot),
                    out.as_mut_ptr(),
                    self.msg_size,
                );
            }
            q.tail = (q.tail + 1) % self.capacity;
        });
    }
}
