// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring-buffer trace instrumentation for kernel and driver code.
//!
//! A ring log is a static, fixed-size buffer of `Copy` entries that any
//! context — task, tick handler, timer callback — can append to cheaply.
//! Nothing drains it at runtime; it exists to be inspected from a debugger
//! (or from tests) after the fact. Recording wraps silently, overwriting
//! the oldest entry.
//!
//! Declare one per module with [`ringlog!`], giving the entry type, depth,
//! and the value the buffer starts out filled with (conventionally a `None`
//! variant of a module-local `Trace` enum):
//!
//!     ringlog!(Trace, 16, Trace::None);
//!
//! and record entries with [`ringlog_entry!`]:
//!
//!     ringlog_entry!(Trace::SectorWritten(idx));
//!
//! The single-argument forms use a module-scoped buffer, so there can be
//! only one unnamed ring log per module; pass an explicit name to both
//! macros to have several.

#![cfg_attr(target_os = "none", no_std)]

use critsec::IrqCell;

pub struct RingLog<T: Copy, const N: usize> {
    inner: IrqCell<Inner<T, N>>,
}

struct Inner<T, const N: usize> {
    entries: [T; N],
    next: usize,
    total: u32,
}

impl<T: Copy, const N: usize> RingLog<T, N> {
    pub const fn new(fill: T) -> Self {
        Self {
            inner: IrqCell::new(Inner {
                entries: [fill; N],
                next: 0,
                total: 0,
            }),
        }
    }

    /// Appends an entry, overwriting the oldest once the buffer has wrapped.
    pub fn record(&self, entry: T) {
        self.inner.with(|r| {
            r.entries[r.next] = entry;
            r.next = (r.next + 1) % N;
            r.total = r.total.wrapping_add(1);
        });
    }

    /// Copies out the current contents. `next` is the slot the following
    /// `record` will land in; `total` counts all entries ever recorded.
    pub fn snapshot(&self) -> Snapshot<T, N> {
        self.inner.with(|r| Snapshot {
            entries: r.entries,
            next: r.next,
            total: r.total,
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Snapshot<T, const N: usize> {
    pub entries: [T; N],
    pub next: usize,
    pub total: u32,
}

impl<T: Copy, const N: usize> Snapshot<T, N> {
    /// The most recently recorded entry, if anything has been recorded.
    pub fn last(&self) -> Option<T> {
        if self.total == 0 {
            None
        } else {
            Some(self.entries[(self.next + N - 1) % N])
        }
    }
}

/// Declares a static ring log. See the crate docs for the two forms.
#[macro_export]
macro_rules! ringlog {
    ($name:ident, $t:ty, $n:expr, $fill:expr) => {
        static $name: $crate::RingLog<$t, $n> = $crate::RingLog::new($fill);
    };
    ($t:ty, $n:expr, $fill:expr) => {
        $crate::ringlog!(__RINGLOG, $t, $n, $fill);
    };
}

/// Records an entry in a ring log declared with [`ringlog!`].
#[macro_export]
macro_rules! ringlog_entry {
    ($name:ident, $entry:expr) => {
        $name.record($entry);
    };
    ($entry:expr) => {
        $crate::ringlog_entry!(__RINGLOG, $entry);
    };
}
