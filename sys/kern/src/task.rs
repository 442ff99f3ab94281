// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tasks and the scheduler core.
//!
//! All scheduling state lives in a [`TaskTable`]: a fixed array of
//! [`Tcb`]s, the index of the running task, and the round-robin cursor.
//! The table is a plain struct with methods — the single global instance
//! lives in `sched`, but everything here can be driven against a local
//! instance, which is how the unit tests work.
//!
//! Slot 0 is the idle task: priority 0, never `Free`, never `Blocked`, and
//! eligible for selection only when no other slot is `Ready`.

use abi::{KernError, Priority, TaskId, TaskState, NUM_TASKS};

use crate::time;

/// Per-task metadata.
///
/// `repr(C)` so the `saved_sp` field sits at byte offset 0: the
/// context-switch entry stores the interrupted task's stack pointer through
/// the current-task pointer without knowing anything else about this
/// struct's layout.
#[repr(C)]
pub struct Tcb {
    /// Saved stack pointer while the task is not running.
    // NOTE: this field must remain first!
    saved_sp: usize,
    state: TaskState,
    id: TaskId,
    priority: Priority,
    /// Timer ticks observed while this task was current. Accounting only.
    ticks_run: u32,
    /// Tick at which a sleeping task becomes ready; 0 = not sleeping.
    wake_tick: u32,
    stack_base: usize,
    stack_size: usize,
    entry: fn(usize),
    arg: usize,
    name: &'static str,
}

fn unset_entry(_: usize) {}

impl Tcb {
    const fn empty() -> Self {
        Self {
            saved_sp: 0,
            state: TaskState::Free,
            id: TaskId(0),
            priority: Priority(0),
            ticks_run: 0,
            wake_tick: 0,
            stack_base: 0,
            stack_size: 0,
            entry: unset_entry,
            arg: 0,
            name: "",
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ticks_run(&self) -> u32 {
        self.ticks_run
    }

    pub fn saved_sp(&self) -> usize {
        self.saved_sp
    }

    pub fn stack_base(&self) -> usize {
        self.stack_base
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Entry function and argument, for the arch layer to preload into the
    /// initial context frame.
    pub fn entry_point(&self) -> (fn(usize), usize) {
        (self.entry, self.arg)
    }

    pub(crate) fn set_saved_sp(&mut self, sp: usize) {
        self.saved_sp = sp;
    }
}

/// Copyable snapshot of one task slot, for status displays.
#[derive(Copy, Clone, Debug)]
pub struct TaskStat {
    pub id: TaskId,
    pub name: &'static str,
    pub state: TaskState,
    pub priority: Priority,
    pub ticks_run: u32,
}

/// The scheduler: task slots plus selection state.
pub struct TaskTable {
    tasks: [Tcb; NUM_TASKS],
    /// Slot of the task considered current (Running, or just demoted).
    current: usize,
    /// Last chosen slot; round-robin scans start just past it.
    cursor: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        let mut tasks = [const { Tcb::empty() }; NUM_TASKS];
        let mut i = 0;
        while i < NUM_TASKS {
            tasks[i].id = TaskId(i as u8);
            i += 1;
        }
        Self {
            tasks,
            current: 0,
            cursor: 0,
        }
    }

    /// Assigns each slot its statically carved stack region. Called once
    /// during init, before any task exists.
    pub fn assign_stacks(&mut self, regions: [(usize, usize); NUM_TASKS]) {
        for (tcb, (base, size)) in self.tasks.iter_mut().zip(regions) {
            tcb.stack_base = base;
            tcb.stack_size = size;
        }
    }

    /// Fabricates the idle task in slot 0 and makes it the current task.
    /// Its context frame resumes into `entry` (a wait-for-interrupt loop)
    /// with interrupts unmasked.
    pub fn init_idle(&mut self, entry: fn(usize)) {
        let t = &mut self.tasks[0];
        t.name = "idle";
        t.priority = Priority(0);
        t.entry = entry;
        t.arg = 0;
        t.state = TaskState::Running;
        crate::arch::initialize_frame(t);
        self.current = 0;
        self.cursor = 0;
    }

    /// Reserves the lowest-numbered free slot for a new task, builds its
    /// initial context frame, and marks it ready. Fails with `NoSlot` when
    /// every slot is taken.
    pub fn create(
        &mut self,
        name: &'static str,
        entry: fn(usize),
        arg: usize,
        priority: Priority,
    ) -> Result<TaskId, KernError> {
        // Slot 0 belongs to idle and is never handed out, even if someone
        // calls this before init.
        let slot = self
            .tasks
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, t)| t.state == TaskState::Free)
            .map(|(i, _)| i)
            .ok_or(KernError::NoSlot)?;

        let t = &mut self.tasks[slot];
        t.name = name;
        t.priority = priority;
        t.entry = entry;
        t.arg = arg;
        t.ticks_run = 0;
        t.wake_tick = 0;
        crate::arch::initialize_frame(t);
        t.state = TaskState::Ready;
        Ok(TaskId(slot as u8))
    }

    pub fn current(&self) -> TaskId {
        TaskId(self.current as u8)
    }

    pub fn tcb(&self, id: TaskId) -> &Tcb {
        &self.tasks[id.index()]
    }

    pub(crate) fn tcb_ptr(&mut self, id: TaskId) -> *mut Tcb {
        &mut self.tasks[id.index()]
    }

    /// Charges the current task for one observed tick.
    pub fn charge_current(&mut self) {
        self.tasks[self.current].ticks_run = self.tasks[self.current].ticks_run.wrapping_add(1);
    }

    /// Blocks the current task until `wake_tick`. The caller yields
    /// afterwards; the tick dispatcher performs the wake.
    pub fn sleep_current(&mut self, wake_tick: u32) {
        let t = &mut self.tasks[self.current];
        // 0 means "not sleeping"; if the deadline wraps onto it exactly,
        // nudge by one tick.
        t.wake_tick = if wake_tick == 0 { 1 } else { wake_tick };
        t.state = TaskState::Blocked;
    }

    /// Blocks the current task with no wake tick (semaphore wait). The
    /// waker is whoever posts.
    pub fn block_current(&mut self) {
        self.tasks[self.current].state = TaskState::Blocked;
    }

    /// Makes a blocked task ready (semaphore post hand-over). No-op for
    /// tasks in any other state.
    pub fn make_ready(&mut self, id: TaskId) {
        let t = &mut self.tasks[id.index()];
        if t.state == TaskState::Blocked {
            t.state = TaskState::Ready;
        }
    }

    /// Retires the current task. Called from the entry trampoline when a
    /// task function returns.
    pub fn retire_current(&mut self) {
        self.tasks[self.current].state = TaskState::Dead;
    }

    /// Wakes every sleeper whose deadline has arrived. Returns true if
    /// anything woke (a reschedule is then worthwhile).
    pub fn wake_sleepers(&mut self, now: u32) -> bool {
        let mut woke = false;
        for t in &mut self.tasks {
            if t.state == TaskState::Blocked
                && t.wake_tick != 0
                && time::reached(now, t.wake_tick)
            {
                t.wake_tick = 0;
                t.state = TaskState::Ready;
                woke = true;
            }
        }
        woke
    }

    /// Selects the next task to run. Interrupts are masked (dispatcher
    /// context).
    ///
    /// The running task (if still running) is demoted to ready, then slots
    /// are scanned starting just past the cursor: the first ready task of
    /// maximal priority wins, which makes equal-priority tasks take turns.
    /// Idle is the fallback, never a competitor. Cannot fail — idle is
    /// always ready by the time we fall back to it.
    pub fn schedule(&mut self) -> TaskId {
        if self.tasks[self.current].state == TaskState::Running {
            self.tasks[self.current].state = TaskState::Ready;
        }

        let prev = self.cursor;
        let search = (prev + 1..NUM_TASKS).chain(0..prev + 1);
        let mut choice: Option<(usize, Priority)> = None;
        for i in search {
            if i == 0 {
                continue;
            }
            if self.tasks[i].state != TaskState::Ready {
                continue;
            }
            match choice {
                Some((_, best)) if !self.tasks[i].priority.is_more_important_than(best) => {}
                _ => choice = Some((i, self.tasks[i].priority)),
            }
        }

        let next = choice.map(|(i, _)| i).unwrap_or(0);
        self.tasks[next].state = TaskState::Running;
        self.current = next;
        self.cursor = next;
        TaskId(next as u8)
    }

    /// Snapshot of every non-free slot, for a `ps`-style display.
    pub fn stats(&self) -> [Option<TaskStat>; NUM_TASKS] {
        let mut out = [None; NUM_TASKS];
        for (slot, t) in self.tasks.iter().enumerate() {
            if t.state != TaskState::Free {
                out[slot] = Some(TaskStat {
                    id: t.id,
                    name: t.name,
                    state: t.state,
                    priority: t.priority,
                    ticks_run: t.ticks_run,
                });
            }
        }
        out
    }
}
