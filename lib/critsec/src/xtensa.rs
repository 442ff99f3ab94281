// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Xtensa-LX interrupt masking.
//!
//! `rsil` atomically reads PS and raises PS.INTLEVEL; the whole previous PS
//! word is returned so restore is a plain `wsr.ps`. Level 1 is the only
//! level the kernel takes interrupts at, so INTLEVEL=1 masks everything we
//! care about while leaving debug/NMI levels alone.

use core::arch::asm;

pub fn mask_level1() -> u32 {
    let prev: u32;
    // Safety: raising INTLEVEL has no memory-safety consequences.
    unsafe {
        asm!("rsil {0}, 1", out(reg) prev, options(nostack));
    }
    prev
}

pub fn restore(saved_ps: u32) {
    // Safety: `saved_ps` came from `mask_level1` on this same core, so this
    // writes back a PS value the CPU was already running with.
    unsafe {
        asm!("wsr.ps {0}", "rsync", in(reg) saved_ps, options(nostack));
    }
}

pub fn barrier_publish() {
    // Safety: `memw` only orders memory accesses.
    unsafe {
        asm!("memw", options(nostack));
    }
}

pub fn barrier_ifetch() {
    // Safety: `isync` only synchronizes the fetch pipeline.
    unsafe {
        asm!("isync", options(nostack));
    }
}
