// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel time: a 32-bit monotonic tick counter.
//!
//! The counter is incremented only by the tick dispatcher and read freely
//! by tasks — it is a single word, so unguarded reads are always coherent.
//! It wraps after 2^32 ticks (about 497 days at the default rate); every
//! comparison against it in the kernel goes through [`reached`], which is a
//! signed difference and therefore wrap-safe as long as the two points are
//! within 2^31 ticks of each other.

use core::sync::atomic::{AtomicU32, Ordering};

/// Tick rate the platform is expected to program, in Hz. Any rate of at
/// least 10 Hz works; the sleep and timer APIs deal in ticks, not
/// milliseconds, so this constant is advisory glue for collaborators.
pub const TICK_HZ: u32 = 100;

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Reads the current tick count. Callable from any context without a
/// guard.
#[inline(always)]
pub fn now() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Advances the tick count by one. Dispatcher only.
pub(crate) fn advance() -> u32 {
    // Single writer (the dispatcher, interrupts masked), so this cannot
    // race with itself.
    let next = TICKS.load(Ordering::Relaxed).wrapping_add(1);
    TICKS.store(next, Ordering::Relaxed);
    next
}

/// Test hook: put the clock somewhere specific (e.g. just below the wrap).
#[cfg(not(target_os = "none"))]
pub fn set_now_for_test(t: u32) {
    TICKS.store(t, Ordering::Relaxed);
}

/// True once `now` has reached `deadline`, under wrap-around.
#[inline(always)]
pub fn reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) as i32 >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reached_is_wrap_safe() {
        assert!(reached(5, 5));
        assert!(reached(6, 5));
        assert!(!reached(4, 5));

        // Deadline set just before the counter wraps, checked just after.
        let deadline = u32::MAX - 1;
        assert!(!reached(u32::MAX - 2, deadline));
        assert!(reached(u32::MAX, deadline));
        assert!(reached(3, deadline));
    }
}
