// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted stand-in for the interrupt mask: a per-thread depth counter.
//!
//! There are no interrupts to mask on the host, but keeping the save/restore
//! arithmetic real means the nesting contract is exercised by unit tests
//! instead of vacuously true. The counter is thread-local because the test
//! harness runs tests concurrently and each test plays the part of its own
//! single-core machine.

use core::cell::Cell;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

pub fn mask_level1() -> u32 {
    DEPTH.with(|d| {
        let prev = d.get();
        d.set(prev + 1);
        prev
    })
}

pub fn restore(saved: u32) {
    DEPTH.with(|d| d.set(saved));
}

/// Current nesting depth; 0 means "interrupts enabled". Test hook.
pub fn mask_depth() -> u32 {
    DEPTH.with(|d| d.get())
}

/// A value unique to the calling thread for as long as it lives, used by
/// `IrqCell` to tell re-entrancy apart from cross-thread contention.
pub fn thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    TOKEN.with(|t| t as *const u8 as usize)
}

pub fn barrier_publish() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

pub fn barrier_ifetch() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}
