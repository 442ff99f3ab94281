// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted stand-in for the architecture layer.
//!
//! Unit tests drive the portable kernel directly, so this module only has
//! to keep the bookkeeping honest: pending causes are a per-thread bit set
//! that tests (and `yield_now`) can raise and the dispatcher consumes, and
//! frame construction does the stack arithmetic without touching memory —
//! the "stacks" in hosted tests are just address ranges.

use core::cell::Cell;
use core::ptr;

use crate::dispatch::Cause;
use crate::task::Tcb;

/// Matches the target's context frame: PC, PS, SAR, and sixteen address
/// registers, one word each.
pub const FRAME_SIZE: usize = 19 * 4;

thread_local! {
    static PENDING: Cell<u32> = const { Cell::new(0) };
    static ENABLED: Cell<u32> = const { Cell::new(0) };
    static CURRENT: Cell<*mut Tcb> = const { Cell::new(ptr::null_mut()) };
    static TICK_ACKS: Cell<u32> = const { Cell::new(0) };
}

/// Computes the initial saved SP for a task: one frame below the stack
/// top. Nothing is written — hosted stacks are fake address ranges.
pub fn initialize_frame(tcb: &mut Tcb) {
    let top = tcb.stack_base() + tcb.stack_size();
    tcb.set_saved_sp(top - FRAME_SIZE);
}

/// Records the address of `task` as the current user task.
///
/// # Safety
///
/// The stored pointer aliases `task`; the caller must ensure it points into
/// the task table and is not read while the table is mutably borrowed.
pub unsafe fn set_current_task(task: *mut Tcb) {
    CURRENT.with(|c| c.set(task));
}

pub fn current_task_ptr() -> *mut Tcb {
    CURRENT.with(|c| c.get())
}

/// Raises the software interrupt. On the host nothing will deliver it; the
/// test pumps `dispatch::interrupt_entry` itself.
pub fn yield_now() {
    PENDING.with(|p| p.set(p.get() | Cause::SOFT_YIELD.bits()));
}

/// Reads and clears the pending causes, as the exception entry does.
pub fn take_pending() -> Cause {
    Cause::from_bits_truncate(PENDING.with(|p| p.replace(0)))
}

pub fn ack_tick() {
    TICK_ACKS.with(|t| t.set(t.get() + 1));
}

pub fn enable_interrupt_sources(causes: Cause) {
    ENABLED.with(|e| e.set(e.get() | causes.bits()));
}

pub fn start_first_task(_tick_divisor: u32, _first: *mut Tcb) -> ! {
    panic!("hosted build cannot enter a task");
}

pub fn idle_entry(_arg: usize) {
    loop {
        core::hint::spin_loop();
    }
}

// Test hooks, used by this crate's tests to play the part of the hardware.

/// Marks causes pending, as the hardware would.
pub fn inject_pending(causes: Cause) {
    PENDING.with(|p| p.set(p.get() | causes.bits()));
}

pub fn pending_causes() -> Cause {
    Cause::from_bits_truncate(PENDING.with(|p| p.get()))
}

pub fn enabled_sources() -> Cause {
    Cause::from_bits_truncate(ENABLED.with(|e| e.get()))
}

pub fn tick_acks() -> u32 {
    TICK_ACKS.with(|t| t.get())
}
