// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The interrupt dispatcher: one portable entry point for every cause.
//!
//! The architecture layer funnels all level-1 interrupts through
//! [`interrupt_entry`], already running on the ISR stack with interrupts
//! masked. The dispatcher demultiplexes the pending causes:
//!
//! - **Tick** — acknowledge the timer, advance kernel time, charge the
//!   current task, wake any sleepers whose deadline arrived, run expired
//!   software timers, and mark a reschedule. Sleeper wake happens before
//!   scheduling, so a task that wakes during this tick is eligible for
//!   selection immediately.
//! - **Software yield** — mark a reschedule. (The arch layer already
//!   cleared the soft-interrupt bit when it collected the causes.)
//! - **Peripheral** — invoke the registered handler for each pending line.
//!   Handlers run in interrupt context and must be short and non-blocking;
//!   `sem_post` and the `try_` queue operations are fine, anything that
//!   waits is not.
//!
//! If anything marked a reschedule, the scheduler picks the next task and
//! the arch layer's restore path context-switches to it on the way out.
//!
//! No task-table borrow is held while a peripheral handler or timer
//! callback runs, so callbacks are free to post.
//!
//! Non-interrupt exceptions (illegal instruction, load/store error) arrive
//! at [`handle_stray_exception`]: the policy is to log and resume the
//! faulting task unchanged. (Marking the task `Dead` and rescheduling
//! would be the one-line alternative; see the note in the function.)

use critsec::IrqCell;
use ringlog::{ringlog, ringlog_entry};

use abi::KernError;

use crate::{arch, sched, time, timer};

bitflags::bitflags! {
    /// Portable interrupt-cause set, as collected by `arch::take_pending`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Cause: u32 {
        const TICK = 1 << 0;
        const SOFT_YIELD = 1 << 1;
        const PERIPH_0 = 1 << 2;
        const PERIPH_1 = 1 << 3;
        const PERIPH_2 = 1 << 4;
        const PERIPH_3 = 1 << 5;
        const PERIPH_4 = 1 << 6;
        const PERIPH_5 = 1 << 7;
    }
}

impl Cause {
    /// Bit position of peripheral line 0 within the set.
    pub const PERIPH_SHIFT: u32 = 2;

    /// The cause bit for peripheral line `line`.
    pub fn periph(line: usize) -> Option<Self> {
        if line < NUM_IRQ_LINES {
            Self::from_bits(1 << (line as u32 + Self::PERIPH_SHIFT))
        } else {
            None
        }
    }
}

/// Peripheral interrupt lines the platform can claim.
pub const NUM_IRQ_LINES: usize = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trace {
    None,
    UnhandledIrq(usize),
    StrayException(u32),
}

ringlog!(Trace, 16, Trace::None);

static IRQ_HANDLERS: IrqCell<[Option<fn()>; NUM_IRQ_LINES]> =
    IrqCell::new([None; NUM_IRQ_LINES]);

/// Registers `handler` for peripheral line `line` (and nothing else —
/// enabling the line in the hardware mask is the platform's init-time
/// call, via `arch::enable_interrupt_sources`).
pub fn register_irq_handler(line: usize, handler: fn()) -> Result<(), KernError> {
    if line >= NUM_IRQ_LINES {
        return Err(KernError::InvalidParam);
    }
    IRQ_HANDLERS.with(|table| table[line] = Some(handler));
    Ok(())
}

/// The single dispatcher entry. Called by the arch layer's exception entry
/// with interrupts masked, on the ISR stack; also called directly by
/// hosted tests pumping the machinery.
pub fn interrupt_entry() {
    let cause = arch::take_pending();
    let mut resched = false;

    if cause.contains(Cause::TICK) {
        arch::ack_tick();
        let now = time::advance();
        sched::with_table(|tasks| {
            tasks.charge_current();
            tasks.wake_sleepers(now);
        });
        timer::service(now);
        resched = true;
    }

    if cause.contains(Cause::SOFT_YIELD) {
        resched = true;
    }

    for line in 0..NUM_IRQ_LINES {
        let bit = match Cause::periph(line) {
            Some(b) => b,
            None => break,
        };
        if !cause.contains(bit) {
            continue;
        }
        // Copy the handler out so it doesn't run under the table borrow.
        let handler = IRQ_HANDLERS.with(|table| table[line]);
        match handler {
            Some(h) => h(),
            None => {
                ringlog_entry!(Trace::UnhandledIrq(line));
                crate::klog!("irq: no handler for line {}", line);
            }
        }
    }

    if resched {
        sched::reschedule();
    }
}

/// A CPU exception that is not an interrupt: illegal instruction, bus
/// error, and friends, raised by the running task.
///
/// Policy: log it and return, resuming the faulting task. This is safe for
/// spurious faults and matches the promise that nothing propagates across
/// the ISR boundary. To retire faulting tasks instead, this is the place:
/// `sched::with_table(|t| t.retire_current())` followed by
/// `sched::reschedule()`.
pub fn handle_stray_exception(cause: u32) {
    ringlog_entry!(Trace::StrayException(cause));
    crate::klog!("exception: cause {} in current task", cause);
}
