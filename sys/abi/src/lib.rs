// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared kernel vocabulary: task identity, priority, scheduling state, the
//! kernel error taxonomy, and the bit-exact on-flash filesystem layout.
//!
//! This crate is deliberately free of behavior — it exists so that the
//! kernel, the drivers, and any host-side tooling agree on the same types
//! without depending on each other.

#![cfg_attr(target_os = "none", no_std)]

pub mod fs;

/// Number of task slots, fixed at compile time. Slot 0 is always the idle
/// task.
pub const NUM_TASKS: usize = 8;

/// Names a task by its slot index in the task table.
///
/// Tasks are never destroyed and slots are never recycled (a task that
/// returns parks in `Dead` forever), so a bare index is a stable identity
/// and the wait queues can store these instead of pointers back into the
/// table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// The idle task's slot.
    pub const IDLE: Self = Self(0);

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Indicates priority of a task.
///
/// Priorities are small numbers; numerically *greater* is more important
/// and runs first. This type deliberately does not implement
/// `PartialOrd`/`Ord`, so callers must go through
/// [`Priority::is_more_important_than`] and can't quietly get the sense of
/// the comparison backwards.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

/// Scheduling state of a task slot.
///
/// Exactly one slot is `Running` at any moment. A `Blocked` task is either
/// on exactly one semaphore wait queue or waiting for a tick (nonzero wake
/// tick), never both.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TaskState {
    /// Slot has never held a task.
    #[default]
    Free,
    /// Eligible for selection.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting on a semaphore or a wake tick.
    Blocked,
    /// The task function returned; the slot is retired.
    Dead,
}

/// Tagged failures returned by kernel operations.
///
/// These are resource-exhaustion, precondition, and would-block conditions
/// only; invariant violations are not reported through this type (see the
/// error-handling notes in the kernel crate).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernError {
    /// All task slots (or registry slots) are occupied.
    NoSlot,
    /// The fixed-block pool is empty.
    NoBlock,
    /// The heap cannot satisfy the request.
    OutOfMemory,
    /// A non-blocking acquire found nothing to take.
    WouldBlock,
    /// A non-blocking send found the queue full.
    QueueFull,
    /// A non-blocking receive found the queue empty.
    QueueEmpty,
    /// A caller-supplied parameter is out of contract (zero-size
    /// allocation, mismatched message length, empty name, ...).
    InvalidParam,
}
