//! Cooperative scheduler.
//!
//! Run-to-completion: each ready task is resumed until it yields. The only
//! way from blocked back to ready is a `TaskCell::wake` from an interrupt
//! handler. There is no preemption and no clean termination.

pub mod task;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{trace, warn};

pub use task::{Task, TaskCell, TaskControlBlock, TaskId, TaskState, Yield};

/// Task scheduler lending a shared context `C` to each task it runs.
pub struct Scheduler<C> {
    tasks: Vec<TaskControlBlock<C>>,
    next_id: u32,
    context_switches: u64,
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Scheduler {
            tasks: Vec::new(),
            next_id: 0,
            context_switches: 0,
        }
    }

    /// Spawn a task in the ready state.
    ///
    /// Returns its id and the cell an interrupt handler can wake it through.
    pub fn spawn(&mut self, name: &'static str, body: Box<dyn Task<C>>) -> (TaskId, Arc<TaskCell>) {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let tcb = TaskControlBlock::new(id, name, body);
        let cell = tcb.cell().clone();
        self.tasks.push(tcb);
        trace!("[SCHED] spawned {} as {:?}", name, id);
        (id, cell)
    }

    /// Resume every ready task once. Returns how many ran.
    pub fn run_ready(&mut self, cx: &mut C) -> usize {
        let mut ran = 0;
        for tcb in self.tasks.iter_mut() {
            if tcb.run_once(cx) {
                ran += 1;
            }
        }
        self.context_switches += ran as u64;
        ran
    }

    /// Accept a terminate request. It is recorded but has no effect.
    pub fn request_exit(&mut self, id: TaskId) -> bool {
        match self.tasks.iter_mut().find(|t| t.id() == id) {
            Some(tcb) => {
                warn!("[SCHED] exit requested for {}; not supported", tcb.name());
                tcb.mark_exit_requested();
                true
            }
            None => false,
        }
    }

    pub fn has_ready(&self) -> bool {
        self.tasks.iter().any(|t| t.state() == TaskState::Ready)
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.task(id).map(|t| t.state())
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskControlBlock<C>> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Total task resumptions.
    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}
