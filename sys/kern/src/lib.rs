// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minnow kernel.
//!
//! A preemptive multitasking kernel for a single-core 32-bit MCU: a small
//! fixed table of tasks scheduled by priority with round-robin tie-break,
//! driven by a periodic tick, with counting semaphores, mutexes, bounded
//! message queues, software timers, a fixed-block pool, and a first-fit
//! heap. Persistent storage lives in a separate driver crate
//! (`drv-flat-fs`); this crate supplies the substrate it runs on.
//!
//! # Design principles
//!
//! 1. One owner per global. Every piece of mutable kernel state is a struct
//!    held in a `critsec::IrqCell`, and the struct's methods are plain code
//!    that unit tests can drive against a local instance.
//! 2. The non-portable surface is thin. Only the `arch` module knows what a
//!    context frame looks like or how an interrupt is acknowledged; the
//!    dispatcher, the scheduler, and every primitive above them are
//!    portable and build (and test) on the host.
//! 3. Interrupts are masked exactly over the state splice, never over a
//!    callback.
//! 4. Simple and clear over fast and clever.

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;
pub mod dispatch;
pub mod heap;
pub mod log;
pub mod mq;
pub mod pool;
pub mod sched;
pub mod startup;
pub mod sync;
pub mod task;
pub mod time;
pub mod timer;
