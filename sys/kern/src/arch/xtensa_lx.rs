// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for Xtensa LX (call0 ABI, single core).
//!
//! # Exception entry
//!
//! The hardware delivers every level-1 interrupt and every exception
//! through the user-exception vector. The platform's vector stub stashes
//! `a0` in EXCSAVE1 and jumps to `_minnow_exc_entry` (below), which:
//!
//! 1. pushes a full [`ContextFrame`] — PC, PS, SAR, `a0`–`a15` — onto the
//!    interrupted task's stack,
//! 2. stores the resulting stack pointer at byte offset 0 of the current
//!    TCB (the one field of the TCB this code knows about),
//! 3. pivots onto the dedicated ISR stack,
//! 4. calls the portable dispatcher (interrupts stay masked: PS.EXCM is
//!    set for the whole handler), and
//! 5. reloads the saved SP of whatever TCB is *now* current, pops the
//!    frame, and returns with `rfe`, which clears PS.EXCM and jumps to the
//!    saved PC in one step.
//!
//! Everything between steps 3 and 5 is ordinary Rust; only this file knows
//! the frame layout.
//!
//! # Tick
//!
//! The CCOUNT/CCOMPARE0 pair produces the periodic tick. Re-arming adds
//! the divisor to the *previous compare value*, not to CCOUNT, so the tick
//! doesn't drift by interrupt latency. Writing CCOMPARE0 also acknowledges
//! the timer interrupt.
//!
//! # Software interrupt
//!
//! `yield_now` sets the soft-interrupt bit via INTSET; it is delivered as
//! soon as the current interrupt guard (if any) releases, funneling every
//! yield through the same exception entry as the tick.

use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::dispatch::{self, Cause};
use crate::task::Tcb;

/// Words the ISR stack gets. All handlers run on it; tasks never do.
pub const ISR_STACK_SIZE: usize = 2048;

/// PS.EXCM: exception mode, masks level-1 interrupts until `rfe`.
const PS_EXCM: u32 = 1 << 4;
/// PS.UM: run the user vector set.
const PS_UM: u32 = 1 << 5;

/// EXCCAUSE value for "a level-1 interrupt is pending" — the one cause
/// that is not a fault.
const EXCCAUSE_LEVEL1_INT: u32 = 4;

// Core interrupt lines on this Xtensa configuration. Lines 0-5 are
// peripheral inputs; 6 is the CCOMPARE0 timer; 7 is the software
// interrupt.
const HW_TIMER_BIT: u32 = 1 << 6;
const HW_SOFT_BIT: u32 = 1 << 7;
const HW_PERIPH_MASK: u32 = 0x3F;

/// Everything the CPU does not preserve across the exception boundary,
/// plus the resume PC and the PS word restored atomically with it.
///
/// The assembly below hard-codes these offsets; keep the field order in
/// sync with it.
#[derive(Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ContextFrame {
    pub pc: u32,
    pub ps: u32,
    pub sar: u32,
    pub a: [u32; 16],
}

pub const FRAME_SIZE: usize = core::mem::size_of::<ContextFrame>();

/// We have no scratch register to dedicate, so the current task pointer
/// lives in a global the assembly can address. Offset 0 of the pointee is
/// the saved stack pointer.
#[no_mangle]
static MINNOW_CURRENT_TASK: AtomicPtr<Tcb> = AtomicPtr::new(core::ptr::null_mut());

/// CPU cycles per tick, stored so re-arming the compare register doesn't
/// need the divisor threaded through.
static TICK_DIVISOR: AtomicU32 = AtomicU32::new(0);

#[repr(C, align(16))]
struct IsrStack([u8; ISR_STACK_SIZE]);

/// The stack all handlers run on. Referenced from the assembly by symbol.
#[no_mangle]
static mut MINNOW_ISR_STACK: IsrStack = IsrStack([0; ISR_STACK_SIZE]);

/// Builds a task's initial context frame on its own stack.
///
/// The frame resumes into the entry trampoline with the task's entry
/// function and argument preloaded into the call0 argument registers, and
/// a PS that keeps interrupts masked exactly until the `rfe` that starts
/// the task.
pub fn initialize_frame(tcb: &mut Tcb) {
    let top = tcb.stack_base() + tcb.stack_size();
    let at = top - FRAME_SIZE;
    let (entry, arg) = tcb.entry_point();

    let mut frame = ContextFrame::default();
    frame.pc = task_entry_trampoline as usize as u32;
    // EXCM stays set through the restore sequence; `rfe` clears it and
    // interrupts become deliverable only once the task is actually
    // running.
    frame.ps = PS_UM | PS_EXCM;
    frame.sar = 0;
    frame.a[1] = top as u32; // SP after the frame pops
    frame.a[2] = entry as usize as u32; // first call0 argument
    frame.a[3] = arg as u32; // second call0 argument

    // Safety: `at` lies inside this task's statically assigned stack slab,
    // which nothing else touches before the task first runs.
    unsafe { (at as *mut ContextFrame).write(frame) };
    tcb.set_saved_sp(at);
}

/// First code every task executes. Runs the task function and retires the
/// slot if it ever returns.
extern "C" fn task_entry_trampoline(entry: fn(usize), arg: usize) -> ! {
    entry(arg);
    crate::sched::task_exited()
}

/// Records the address of `task` as the current user task.
///
/// # Safety
///
/// The stored pointer aliases `task`; the caller must ensure it points into
/// the task table and is not dereferenced while the table is mutably
/// borrowed (the exception entry only touches it with interrupts masked
/// and the table borrow released).
pub unsafe fn set_current_task(task: *mut Tcb) {
    MINNOW_CURRENT_TASK.store(task, Ordering::Relaxed);
}

pub fn current_task_ptr() -> *mut Tcb {
    MINNOW_CURRENT_TASK.load(Ordering::Relaxed)
}

/// Requests a reschedule by pending the software interrupt. Idempotent;
/// the dispatcher clears the bit.
pub fn yield_now() {
    // Safety: INTSET only pends interrupts; no memory effects.
    unsafe {
        asm!(
            "wsr.intset {0}",
            "rsync",
            in(reg) HW_SOFT_BIT,
            options(nostack),
        );
    }
}

/// Reads and clears the pending interrupt causes, translated to the
/// portable [`Cause`] set. The timer bit is left to [`ack_tick`], which
/// clears it by re-arming the compare register.
pub fn take_pending() -> Cause {
    let pending: u32;
    // Safety: reading INTERRUPT has no side effects.
    unsafe {
        asm!("rsr.interrupt {0}", out(reg) pending, options(nostack));
    }

    let mut cause = Cause::empty();
    let mut clear = 0u32;
    if pending & HW_TIMER_BIT != 0 {
        cause |= Cause::TICK;
    }
    if pending & HW_SOFT_BIT != 0 {
        cause |= Cause::SOFT_YIELD;
        clear |= HW_SOFT_BIT;
    }
    let periph = pending & HW_PERIPH_MASK;
    if periph != 0 {
        cause |= Cause::from_bits_truncate(periph << Cause::PERIPH_SHIFT);
        clear |= periph;
    }

    if clear != 0 {
        // Safety: INTCLEAR only acknowledges edge/software interrupts.
        unsafe {
            asm!("wsr.intclear {0}", "rsync", in(reg) clear, options(nostack));
        }
    }
    cause
}

/// Acknowledges the tick by re-arming CCOMPARE0 one divisor past its
/// previous value.
pub fn ack_tick() {
    let divisor = TICK_DIVISOR.load(Ordering::Relaxed);
    // Safety: reads/writes of the compare register only affect when the
    // next tick fires.
    unsafe {
        let prev: u32;
        asm!("rsr.ccompare0 {0}", out(reg) prev, options(nostack));
        asm!(
            "wsr.ccompare0 {0}",
            "rsync",
            in(reg) prev.wrapping_add(divisor),
            options(nostack),
        );
    }
}

/// Writes the interrupt enable mask: the tick and soft bits plus whatever
/// peripheral lines the platform asked for.
pub fn enable_interrupt_sources(causes: Cause) {
    let mut mask = 0u32;
    if causes.contains(Cause::TICK) {
        mask |= HW_TIMER_BIT;
    }
    if causes.contains(Cause::SOFT_YIELD) {
        mask |= HW_SOFT_BIT;
    }
    mask |= (causes.bits() >> Cause::PERIPH_SHIFT) & HW_PERIPH_MASK;

    // Safety: enabling interrupt delivery; the vector is in place before
    // this is called (startup contract).
    unsafe {
        let prev: u32;
        asm!("rsr.intenable {0}", out(reg) prev, options(nostack));
        asm!(
            "wsr.intenable {0}",
            "rsync",
            in(reg) prev | mask,
            options(nostack),
        );
    }
    critsec::barrier_ifetch();
}

/// Arms the tick timer and enters the first task (idle) by running the
/// shared restore sequence against its fabricated frame. Never returns.
pub fn start_first_task(tick_divisor: u32, first: *mut Tcb) -> ! {
    TICK_DIVISOR.store(tick_divisor, Ordering::Relaxed);
    // Safety: arming the compare register for the first tick.
    unsafe {
        let now: u32;
        asm!("rsr.ccount {0}", out(reg) now, options(nostack));
        asm!(
            "wsr.ccompare0 {0}",
            "rsync",
            in(reg) now.wrapping_add(tick_divisor),
            options(nostack),
        );
    }
    MINNOW_CURRENT_TASK.store(first, Ordering::Relaxed);

    // Safety: hands the CPU to the restore sequence with SP pointing at
    // the idle task's initial frame; execution continues in the idle loop
    // and never comes back.
    unsafe {
        asm!(
            "l32i a1, {0}, 0",
            "j _minnow_restore_and_rfe",
            in(reg) first,
            options(noreturn),
        );
    }
}

/// The idle loop: wait for an interrupt, forever. Slot 0 runs this.
pub fn idle_entry(_arg: usize) {
    loop {
        // Safety: `waiti 0` just halts until the next interrupt.
        unsafe {
            asm!("waiti 0", options(nostack));
        }
    }
}

// C-callable shims for the assembly below.

#[no_mangle]
extern "C" fn _minnow_dispatch_entry() {
    dispatch::interrupt_entry();
}

#[no_mangle]
extern "C" fn _minnow_stray_entry(cause: u32) {
    dispatch::handle_stray_exception(cause);
}

// The exception entry and the shared restore path. Frame offsets are those
// of `ContextFrame`: pc=0, ps=4, sar=8, a0=12, a1=16, a2=20, ..., a15=72.
//
// The platform's user-exception vector stub is expected to be exactly:
//
//     wsr.excsave1 a0
//     j _minnow_exc_entry
//
global_asm!(
    r#"
    .section .text._minnow_exc_entry
    .literal_position
    .align 4
    .global _minnow_exc_entry
    .type _minnow_exc_entry, @function
_minnow_exc_entry:
    // Build the context frame on the interrupted task's stack. a0 is
    // already stashed in EXCSAVE1 by the vector stub.
    addi a1, a1, -76
    s32i a2, a1, 20
    s32i a3, a1, 24
    rsr.epc1 a2
    s32i a2, a1, 0
    rsr.ps a2
    s32i a2, a1, 4
    rsr.sar a2
    s32i a2, a1, 8
    rsr.excsave1 a2
    s32i a2, a1, 12
    addi a2, a1, 76
    s32i a2, a1, 16
    s32i a4, a1, 28
    s32i a5, a1, 32
    s32i a6, a1, 36
    s32i a7, a1, 40
    s32i a8, a1, 44
    s32i a9, a1, 48
    s32i a10, a1, 52
    s32i a11, a1, 56
    s32i a12, a1, 60
    s32i a13, a1, 64
    s32i a14, a1, 68
    s32i a15, a1, 72

    // Record the frame in the current TCB (saved_sp is at offset 0).
    movi a2, MINNOW_CURRENT_TASK
    l32i a2, a2, 0
    s32i a1, a2, 0

    // Pivot to the ISR stack; no task owns it.
    movi a1, MINNOW_ISR_STACK + {isr_stack_size}

    // Interrupts, or a fault? EXCCAUSE tells us; faults take the stray
    // path and resume the interrupted task.
    rsr.exccause a2
    movi a3, {level1_cause}
    beq a2, a3, 1f
    call0 _minnow_stray_entry
    j 2f
1:
    call0 _minnow_dispatch_entry
2:

    // Return to whichever task is current now.
    movi a2, MINNOW_CURRENT_TASK
    l32i a2, a2, 0
    l32i a1, a2, 0

    .global _minnow_restore_and_rfe
    .type _minnow_restore_and_rfe, @function
_minnow_restore_and_rfe:
    l32i a2, a1, 0
    wsr.epc1 a2
    l32i a2, a1, 4
    wsr.ps a2
    l32i a2, a1, 8
    wsr.sar a2
    l32i a0, a1, 12
    l32i a3, a1, 24
    l32i a4, a1, 28
    l32i a5, a1, 32
    l32i a6, a1, 36
    l32i a7, a1, 40
    l32i a8, a1, 44
    l32i a9, a1, 48
    l32i a10, a1, 52
    l32i a11, a1, 56
    l32i a12, a1, 60
    l32i a13, a1, 64
    l32i a14, a1, 68
    l32i a15, a1, 72
    l32i a2, a1, 20
    l32i a1, a1, 16
    rsync
    rfe
"#,
    isr_stack_size = const ISR_STACK_SIZE,
    level1_cause = const EXCCAUSE_LEVEL1_INT,
);
