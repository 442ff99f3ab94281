// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here
//! in the `arch` module, tailored for the current target. For this to work,
//! each architecture support module must define the same set of names:
//!
//! - `FRAME_SIZE`: size in bytes of the context frame.
//! - `initialize_frame`: build a task's initial context frame.
//! - `set_current_task` / `current_task_ptr`: the pointer the exception
//!   entry saves/restores through.
//! - `yield_now`: raise the software interrupt.
//! - `take_pending`: read-and-clear the pending interrupt causes.
//! - `ack_tick`: acknowledge the periodic timer.
//! - `enable_interrupt_sources`: write the interrupt enable mask.
//! - `start_first_task`: configure the tick and enter the first task.
//! - `idle_entry`: the wait-for-interrupt loop run by task slot 0.
//!
//! Hosted (non-cross) builds get a fake implementation so the portable
//! kernel — scheduler, dispatcher, primitives — builds and unit-tests on
//! the development machine.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "xtensa")] {
        pub mod xtensa_lx;
        pub use xtensa_lx::*;
    } else {
        pub mod fake;
        pub use fake::*;
    }
}
