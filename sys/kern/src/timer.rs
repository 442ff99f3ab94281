// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Software timers, serviced from the tick dispatcher.
//!
//! A [`SwTimer`] is a statically allocated callback + argument with a
//! period, an expiry tick, a mode, and an active flag. Active timers are
//! tracked in a small registry; once per tick the dispatcher asks the
//! registry for everything that has expired (a signed, wrap-safe compare)
//! and then invokes the callbacks *after* releasing the registry borrow —
//! so a callback may start or stop timers, post semaphores, or `try_send`
//! to a queue.
//!
//! Callbacks run in interrupt context with interrupts masked: keep them
//! brief, never block, never allocate.

use abi::KernError;
use critsec::IrqCell;
use heapless::Vec;

use crate::time;

/// Capacity of the timer registry.
pub const MAX_TIMERS: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once, then deactivate and leave the registry.
    OneShot,
    /// Fire every `period` ticks until stopped.
    Periodic,
}

pub struct SwTimer {
    inner: IrqCell<TimerInner>,
}

struct TimerInner {
    callback: fn(usize),
    arg: usize,
    period: u32,
    expire: u32,
    mode: TimerMode,
    active: bool,
}

impl SwTimer {
    /// Stamps a timer, inactive, with its callback and opaque argument.
    pub const fn new(callback: fn(usize), arg: usize) -> Self {
        Self {
            inner: IrqCell::new(TimerInner {
                callback,
                arg,
                period: 0,
                expire: 0,
                mode: TimerMode::OneShot,
                active: false,
            }),
        }
    }

    /// Arms the timer to fire `ticks` from now and registers it. Fails
    /// with `NoSlot` if the registry is full (the registry never evicts).
    pub fn start(&'static self, ticks: u32, mode: TimerMode) -> Result<(), KernError> {
        REGISTRY.with(|r| r.start(self, time::now(), ticks, mode))
    }

    /// Disarms the timer and removes it from the registry. A stopped
    /// timer can be started again later.
    pub fn stop(&'static self) {
        REGISTRY.with(|r| r.stop(self));
    }

    pub fn is_active(&self) -> bool {
        self.inner.with(|t| t.active)
    }
}

/// The registry mechanism, separable from the global instance so tests
/// can run their own.
pub struct TimerRegistry {
    slots: [Option<&'static SwTimer>; MAX_TIMERS],
}

impl TimerRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_TIMERS],
        }
    }

    /// Arms `timer` relative to `now` and inserts it if absent.
    pub fn start(
        &mut self,
        timer: &'static SwTimer,
        now: u32,
        ticks: u32,
        mode: TimerMode,
    ) -> Result<(), KernError> {
        if !self.contains(timer) {
            let slot = self
                .slots
                .iter()
                .position(|s| s.is_none())
                .ok_or(KernError::NoSlot)?;
            self.slots[slot] = Some(timer);
        }
        timer.inner.with(|t| {
            t.period = ticks;
            t.expire = now.wrapping_add(ticks);
            t.mode = mode;
            t.active = true;
        });
        Ok(())
    }

    pub fn stop(&mut self, timer: &'static SwTimer) {
        timer.inner.with(|t| t.active = false);
        for slot in &mut self.slots {
            if let Some(existing) = slot {
                if core::ptr::eq(*existing, timer) {
                    *slot = None;
                }
            }
        }
    }

    /// Collects the (callback, arg) pairs of every timer that has expired
    /// by `now`, rescheduling periodic timers and retiring one-shots. The
    /// caller invokes the callbacks once all borrows are released.
    pub fn collect_expired(&mut self, now: u32) -> Vec<(fn(usize), usize), MAX_TIMERS> {
        let mut fired = Vec::new();
        for slot in &mut self.slots {
            let Some(timer) = *slot else { continue };
            let hit = timer.inner.with(|t| {
                if !t.active || !time::reached(now, t.expire) {
                    return None;
                }
                match t.mode {
                    TimerMode::Periodic => {
                        // Next deadline counts from the old one, so the
                        // cadence doesn't slip by service latency.
                        t.expire = t.expire.wrapping_add(t.period);
                    }
                    TimerMode::OneShot => {
                        t.active = false;
                    }
                }
                Some((t.callback, t.arg))
            });
            if let Some(pair) = hit {
                if timer.inner.with(|t| !t.active) {
                    *slot = None;
                }
                // Capacity equals the registry's, so this cannot fail.
                let _ = fired.push(pair);
            }
        }
        fired
    }

    fn contains(&self, timer: &'static SwTimer) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|t| core::ptr::eq(*t, timer))
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: IrqCell<TimerRegistry> = IrqCell::new(TimerRegistry::new());

/// One pass over the active timers, run by the dispatcher each tick. The
/// registry borrow is dropped before any callback runs.
pub(crate) fn service(now: u32) {
    let fired = REGISTRY.with(|r| r.collect_expired(now));
    for (callback, arg) in fired {
        callback(arg);
    }
}
