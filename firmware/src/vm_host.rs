//! VM lifecycle.
//!
//! The VM context is opened once and then reused: the first statement runs
//! through `open + load + begin`, every later one through `load + restart`.
//! A blob that fails the structural check is rejected before the context
//! is touched.

use core::{mem, slice};

use log::{debug, error, info};
use mmrb_script::{Host, RunStatus, Value, VmContext, VmLimits};

use crate::arena::LockedArena;
use crate::error::{EngineError, EngineResult};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No context yet.
    Uninitialized,
    /// Opened; the next run starts with `begin`.
    FirstRun,
    /// Has run at least once; later runs start with `restart`.
    Restartable,
}

/// Owner of the single VM context.
pub struct VmHost {
    state: VmState,
    limits: VmLimits,
    vm: Option<VmContext>,
    runs: u32,
}

impl VmHost {
    pub fn new(limits: VmLimits) -> Self {
        VmHost {
            state: VmState::Uninitialized,
            limits,
            vm: None,
            runs: 0,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Completed `run` calls.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn context(&self) -> Option<&VmContext> {
        self.vm.as_ref()
    }

    /// Open the context with its register file placed in the arena.
    pub fn open(&mut self, arena: &LockedArena) -> EngineResult<()> {
        if self.state != VmState::Uninitialized {
            return Err(EngineError::InvalidVmState("open: VM already open"));
        }
        let count = self.limits.registers.max(1);
        let layout = VmContext::register_layout(&self.limits).ok_or(EngineError::VmOpenFailure)?;
        let region = arena.allocate_layout(layout).map_err(|err| {
            error!("[VM] cannot place {} registers: {:?}", count, err);
            EngineError::VmOpenFailure
        })?;
        let vm = VmContext::with_registers(self.limits, place_registers(region, count))
            .ok_or(EngineError::VmOpenFailure)?;
        self.vm = Some(vm);
        self.state = VmState::FirstRun;
        info!("[VM] opened ({} register bytes in arena)", layout.size());
        Ok(())
    }

    /// Install a blob. The context is unchanged on failure.
    pub fn load(&mut self, blob: &[u8]) -> EngineResult<()> {
        let vm = self
            .vm
            .as_mut()
            .ok_or(EngineError::InvalidVmState("load: VM not open"))?;
        vm.load(blob).map_err(|err| {
            debug!("[VM] rejected blob: {}", err);
            EngineError::IllegalBytecode(err)
        })
    }

    /// Point the fresh context at the loaded blob.
    pub fn begin(&mut self) -> EngineResult<()> {
        if self.state != VmState::FirstRun {
            return Err(EngineError::InvalidVmState("begin: not the first run"));
        }
        let vm = self
            .vm
            .as_mut()
            .ok_or(EngineError::InvalidVmState("begin: VM not open"))?;
        vm.begin();
        self.state = VmState::Restartable;
        Ok(())
    }

    /// Reset transient VM state, keeping classes, methods and constants.
    pub fn restart(&mut self) -> EngineResult<()> {
        if self.state != VmState::Restartable {
            return Err(EngineError::InvalidVmState("restart: VM has not run yet"));
        }
        let vm = self
            .vm
            .as_mut()
            .ok_or(EngineError::InvalidVmState("restart: VM not open"))?;
        vm.restart();
        Ok(())
    }

    /// Run the loaded blob.
    pub fn run(&mut self, host: &mut dyn Host) -> EngineResult<RunStatus> {
        let vm = self
            .vm
            .as_mut()
            .ok_or(EngineError::InvalidVmState("run: VM not open"))?;
        let status = vm.run(host);
        self.runs += 1;
        debug!("[VM] run {} finished: {:?}", self.runs, status);
        Ok(status)
    }

    /// Open on first use, then load, begin or restart, and run.
    pub fn execute(
        &mut self,
        arena: &LockedArena,
        blob: &[u8],
        host: &mut dyn Host,
    ) -> EngineResult<RunStatus> {
        if self.state == VmState::Uninitialized {
            self.open(arena)?;
        }
        self.load(blob)?;
        match self.state {
            VmState::FirstRun => self.begin()?,
            _ => self.restart()?,
        }
        self.run(host)
    }
}

/// Initialise `count` registers at the start of `region`.
fn place_registers(region: &'static mut [u8], count: usize) -> &'static mut [Value] {
    debug_assert!(region.len() >= count * mem::size_of::<Value>());
    let base = region.as_mut_ptr().cast::<Value>();
    // SAFETY: `region` was allocated for `Layout::array::<Value>(count)`, so it
    // is aligned and large enough for `count` values, and it is borrowed for
    // 'static by this call alone. Every slot is written before the slice is
    // formed.
    unsafe {
        for i in 0..count {
            base.add(i).write(Value::Nil);
        }
        slice::from_raw_parts_mut(base, count)
    }
}
