//! Task definition.
//!
//! A task is a resumable state machine: `resume` runs until the task has
//! nothing left to do and reports whether it wants to run again or wait
//! for a wake-up. The shared `TaskCell` is the only part an interrupt
//! handler may touch.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Task is ready to run.
    Ready = 0,
    /// Task is currently running.
    Running = 1,
    /// Task is waiting for a wake-up.
    Blocked = 2,
    /// Task has terminated.
    Terminated = 3,
}

impl TaskState {
    fn from_u8(raw: u8) -> TaskState {
        match raw {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Blocked,
            _ => TaskState::Terminated,
        }
    }
}

/// What a task wants after `resume` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yield {
    /// Run again on the next pass.
    Ready,
    /// Sleep until woken.
    Blocked,
}

/// Resumable task body; `C` is the context the scheduler lends it.
pub trait Task<C> {
    fn resume(&mut self, cx: &mut C) -> Yield;
}

/// State shared between the scheduler and interrupt handlers.
#[derive(Debug)]
pub struct TaskCell {
    state: AtomicU8,
    /// A wake-up arrived while the task was not blocked.
    wake_pending: AtomicBool,
}

impl TaskCell {
    pub fn new(state: TaskState) -> Self {
        TaskCell {
            state: AtomicU8::new(state as u8),
            wake_pending: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move a blocked task to ready. Safe from interrupt context.
    ///
    /// Returns whether this call performed the transition.
    pub fn wake(&self) -> bool {
        self.wake_pending.store(true, Ordering::Release);
        self.state
            .compare_exchange(
                TaskState::Blocked as u8,
                TaskState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Claim a ready task for running.
    pub(crate) fn begin_run(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                TaskState::Ready as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.wake_pending.store(false, Ordering::Release);
        }
        claimed
    }

    /// Park a task that just yielded `Blocked`.
    ///
    /// A wake-up that raced with the task's last input check is replayed.
    pub(crate) fn suspend(&self) {
        self.state.store(TaskState::Blocked as u8, Ordering::Release);
        if self.wake_pending.swap(false, Ordering::AcqRel) {
            let _ = self.state.compare_exchange(
                TaskState::Blocked as u8,
                TaskState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Scheduler-owned task record.
pub struct TaskControlBlock<C> {
    id: TaskId,
    name: &'static str,
    cell: Arc<TaskCell>,
    body: Box<dyn Task<C>>,
    /// A terminate request was received; it is not acted on.
    exit_requested: bool,
    resumes: u64,
}

impl<C> TaskControlBlock<C> {
    pub(crate) fn new(id: TaskId, name: &'static str, body: Box<dyn Task<C>>) -> Self {
        TaskControlBlock {
            id,
            name,
            cell: Arc::new(TaskCell::new(TaskState::Ready)),
            body,
            exit_requested: false,
            resumes: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    pub fn cell(&self) -> &Arc<TaskCell> {
        &self.cell
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub(crate) fn mark_exit_requested(&mut self) {
        self.exit_requested = true;
    }

    /// Times the body has been resumed.
    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    /// Run the body once if it is ready.
    pub(crate) fn run_once(&mut self, cx: &mut C) -> bool {
        if !self.cell.begin_run() {
            return false;
        }
        self.resumes += 1;
        match self.body.resume(cx) {
            Yield::Ready => self.cell.set(TaskState::Ready),
            Yield::Blocked => self.cell.suspend(),
        }
        true
    }
}
