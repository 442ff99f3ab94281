// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-masking critical sections for a single-core kernel.
//!
//! Everything the kernel shares between task context and interrupt context
//! is protected the same way: mask level-1 interrupts, touch the state, put
//! the mask back. This crate packages that discipline as two types:
//!
//! - [`IrqGuard`], a scoped acquisition of interrupt-mask-disable with
//!   guaranteed restore on all exit paths. Guards nest; dropping an inner
//!   guard leaves the outer one's masking in effect.
//!
//! - [`IrqCell`], a container for single-owner global state that hands out
//!   `&mut` access only inside a closure run under an [`IrqGuard`].
//!
//! On the target, masking is a `rsil` and restore is a `wsr.ps`; on hosted
//! builds (unit tests) the same API is backed by a depth counter so the
//! nesting contract stays observable.
//!
//! This crate must not be used before the platform's interrupt plumbing is
//! initialized; that precondition is the caller's contract and is not
//! checked here.

#![cfg_attr(target_os = "none", no_std)]

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "xtensa")] {
        mod xtensa;
        use xtensa as plat;
    } else {
        mod hosted;
        use hosted as plat;
        pub use hosted::mask_depth;
    }
}

/// Scoped interrupt disable.
///
/// Acquiring raises the CPU interrupt level so that level-1 interrupts (the
/// only level the kernel uses) cannot be delivered; dropping restores the
/// level that was in effect at acquisition. Acquisition never blocks and is
/// legal from any context, including inside an interrupt handler or inside
/// another guard's scope.
pub struct IrqGuard {
    saved: u32,
    // Keep guards on the core that created them.
    _not_send: PhantomData<*mut ()>,
}

impl IrqGuard {
    #[inline(always)]
    pub fn acquire() -> Self {
        IrqGuard {
            saved: plat::mask_level1(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for IrqGuard {
    #[inline(always)]
    fn drop(&mut self) {
        // Stores made under the guard must be visible before anything that
        // runs once interrupts are back on.
        barrier_publish();
        plat::restore(self.saved);
    }
}

/// Orders all prior stores before anything that follows. Pair with guard
/// release when publishing state to interrupt handlers; `IrqGuard::drop`
/// already does this.
#[inline(always)]
pub fn barrier_publish() {
    plat::barrier_publish();
}

/// Synchronizes instruction fetch with prior stores. Required after writing
/// registers that affect instruction delivery (vector base, interrupt
/// enables that gate the dispatcher).
#[inline(always)]
pub fn barrier_ifetch() {
    plat::barrier_ifetch();
}

/// A cell for single-owner global state, in the spirit of a `RefCell` that
/// only ever hands out one `&mut` and only with interrupts masked.
///
/// Re-entrant access to the same cell panics: if that happens some path is
/// holding kernel state across a callback that loops back into it, which is
/// a bug we want loud.
///
/// On the target, masking interrupts *is* mutual exclusion — there is one
/// core and nothing can preempt the holder — so a taken flag being set on
/// entry can only mean re-entrancy. Hosted builds run the test harness's
/// threads instead, so there the cell spins while a *different* thread
/// holds it and panics only when the holder is the current thread.
pub struct IrqCell<T> {
    taken: AtomicBool,
    #[cfg(not(target_os = "none"))]
    owner: core::sync::atomic::AtomicUsize,
    value: UnsafeCell<T>,
}

// Safety: access to `value` is serialized by the `taken` flag, and the
// closure only ever sees `&mut T`, so sharing the cell is sound exactly when
// sending `&mut T` would be.
unsafe impl<T> Sync for IrqCell<T> where for<'a> &'a mut T: Send {}

impl<T> core::fmt::Debug for IrqCell<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqCell").finish_non_exhaustive()
    }
}

impl<T> IrqCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            #[cfg(not(target_os = "none"))]
            owner: core::sync::atomic::AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `body` with exclusive access to the contents, interrupts masked
    /// throughout.
    ///
    /// # Panics
    ///
    /// If the cell is already borrowed somewhere up the call stack.
    pub fn with<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        let _irq = IrqGuard::acquire();
        self.lock();
        // Release the flag even if `body` unwinds (hosted tests unwind;
        // the target aborts on panic and never gets here).
        let _release = ResetOnDrop(self);
        // Safety: the `taken` flag guarantees no other live reference.
        body(unsafe { &mut *self.value.get() })
    }

    #[cfg(target_os = "none")]
    fn lock(&self) {
        if self.taken.swap(true, Ordering::Acquire) {
            panic!();
        }
    }

    #[cfg(not(target_os = "none"))]
    fn lock(&self) {
        let me = hosted::thread_token();
        loop {
            if !self.taken.swap(true, Ordering::Acquire) {
                self.owner.store(me, Ordering::Relaxed);
                return;
            }
            if self.owner.load(Ordering::Relaxed) == me {
                panic!("re-entrant IrqCell access");
            }
            core::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        #[cfg(not(target_os = "none"))]
        self.owner.store(0, Ordering::Relaxed);
        self.taken.store(false, Ordering::Release);
    }
}

struct ResetOnDrop<'a, T>(&'a IrqCell<T>);

impl<T> Drop for ResetOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}
