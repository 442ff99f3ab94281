// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! The application's reset path owns the boot trampoline and brings up the
//! collaborators; this module defines the order of everything else and the
//! final hand-off. The documented init sequence is:
//!
//! 1. platform byte sink (`log::set_sink`) — so everything after can talk
//! 2. fixed-block pool, then heap (`pool::Pool::new`, `heap::Heap::new`)
//! 3. filesystem mount (the `drv-flat-fs` crate)
//! 4. scheduler (`sched::init`), then `sched::task_create` for each task
//! 5. peripheral handlers (`dispatch::register_irq_handler`) and software
//!    timers
//! 6. [`start_kernel`] — never returns
//!
//! Nothing enforces the order at compile time; it is the application's
//! contract, demonstrated by `app/demo-lx106`.

use abi::{TaskId, TaskState};

use crate::dispatch::Cause;
use crate::{arch, sched};

/// Enables the interrupt sources and enters the idle task. The CPU's
/// return-from-exception unmasks interrupts exactly as execution lands in
/// the idle loop, so the first tick can preempt it immediately.
///
/// `tick_divisor` is CPU cycles per kernel tick (core clock divided by the
/// tick rate; 800_000 gives 100 Hz at 80 MHz). `periph` names the
/// peripheral interrupt lines the platform wants delivered, on top of the
/// tick and software-yield sources the kernel always takes.
///
/// # Panics
///
/// If `sched::init` has not run — there is no idle task to enter.
///
/// # Safety
///
/// Call exactly once per boot, with the vector installed and collaborators
/// initialized per the module docs.
pub unsafe fn start_kernel(tick_divisor: u32, periph: Cause) -> ! {
    crate::klog!("minnow: starting");

    let idle = sched::with_table(|t| {
        if t.tcb(TaskId::IDLE).state() != TaskState::Running {
            panic!("start_kernel before sched::init");
        }
        t.tcb_ptr(TaskId::IDLE)
    });

    arch::enable_interrupt_sources(Cause::TICK | Cause::SOFT_YIELD | periph);
    arch::start_first_task(tick_divisor, idle)
}
