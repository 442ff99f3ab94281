// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The one scheduler instance, and the task-facing API over it.
//!
//! `task::TaskTable` is the mechanism; this module owns the single global
//! table (behind an `IrqCell`, so every touch is under an interrupt
//! guard), the statically carved per-slot stacks, and the calls tasks
//! actually make: [`task_create`], [`yield_now`], [`sleep`].
//!
//! The synchronization primitives reach the table through
//! [`with_table`], keeping the lock discipline in one place: the table
//! cell is always the outermost borrow, primitive-internal cells nest
//! inside it.

use abi::{KernError, Priority, TaskId, NUM_TASKS};
use core::cell::UnsafeCell;
use critsec::IrqCell;

use crate::arch;
use crate::task::{TaskStat, TaskTable};
use crate::time;

/// Bytes of stack statically assigned to each slot.
pub const TASK_STACK_SIZE: usize = 4096;

#[repr(C, align(16))]
struct StackSlab(UnsafeCell<[u8; TASK_STACK_SIZE]>);

// Safety: the slabs are only ever handed out as per-slot address ranges by
// `init`, exactly once each; nothing reads them through this static.
unsafe impl Sync for StackSlab {}

static STACKS: [StackSlab; NUM_TASKS] =
    [const { StackSlab(UnsafeCell::new([0; TASK_STACK_SIZE])) }; NUM_TASKS];

static TASKS: IrqCell<TaskTable> = IrqCell::new(TaskTable::new());

/// Grants access to the scheduler state under the interrupt guard.
/// Crate-internal: the primitives use it; applications go through the
/// functions below.
pub(crate) fn with_table<R>(body: impl FnOnce(&mut TaskTable) -> R) -> R {
    TASKS.with(body)
}

/// Initializes the scheduler: assigns every slot its stack slab and
/// fabricates the idle task in slot 0. Call once, after the allocators are
/// up and before any `task_create`.
pub fn init() {
    with_table(|t| {
        let mut regions = [(0usize, 0usize); NUM_TASKS];
        for (i, r) in regions.iter_mut().enumerate() {
            *r = (STACKS[i].0.get() as usize, TASK_STACK_SIZE);
        }
        t.assign_stacks(regions);
        t.init_idle(arch::idle_entry);
        let idle = t.tcb_ptr(TaskId::IDLE);
        // Safety: points into the static task table; the exception entry
        // reads it only with the table borrow released.
        unsafe { arch::set_current_task(idle) };
    });
}

/// Creates a task in the lowest free slot. Fails with `NoSlot` when all
/// slots are in use; slots are never recycled.
pub fn task_create(
    name: &'static str,
    entry: fn(usize),
    arg: usize,
    priority: Priority,
) -> Result<TaskId, KernError> {
    with_table(|t| t.create(name, entry, arg, priority))
}

/// Requests a reschedule. Idempotent; the calling task resumes whenever
/// it is next selected.
pub fn yield_now() {
    arch::yield_now();
}

/// Blocks the calling task for `ticks` timer ticks. The tick dispatcher
/// wakes it at the first tick where the deadline has been reached.
pub fn sleep(ticks: u32) {
    let wake = time::now().wrapping_add(ticks);
    with_table(|t| t.sleep_current(wake));
    arch::yield_now();
}

/// The calling task's id.
pub fn current_task() -> TaskId {
    with_table(|t| t.current())
}

/// Snapshot of every live slot, for status displays.
pub fn task_stats() -> [Option<TaskStat>; NUM_TASKS] {
    with_table(|t| t.stats())
}

/// Terminal state for a task whose function returned: mark it dead and
/// hand the CPU away forever. Called by the arch entry trampoline.
pub fn task_exited() -> ! {
    with_table(|t| t.retire_current());
    loop {
        arch::yield_now();
        core::hint::spin_loop();
    }
}

/// Runs the scheduler and publishes the chosen task for the context
/// switch. Dispatcher only, interrupts masked.
pub(crate) fn reschedule() {
    with_table(|t| {
        let next = t.schedule();
        let ptr = t.tcb_ptr(next);
        // Safety: points into the static task table; read by the
        // exception exit path after this borrow is released.
        unsafe { arch::set_current_task(ptr) };
    });
}
