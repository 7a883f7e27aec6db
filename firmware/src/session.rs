//! Engine session.
//!
//! Everything a statement can change lives here: the console, the LED, the
//! VM, the binding scope and the arena. The scheduler lends the session to
//! the shell task for the duration of one `resume`, so no global state and
//! no locking is involved on the statement path.

use alloc::format;
use alloc::string::ToString;

use log::debug;
use mmrb_script::{Compiler, RunStatus};

use crate::arena::LockedArena;
use crate::config::ShellConfig;
use crate::console::Console;
use crate::error::{EngineError, EngineResult};
use crate::hal::{SerialPort, StatusLed};
use crate::natives::{Devices, NativeTable};
use crate::scope::SessionScope;
use crate::shell::{Report, ShellAbi};
use crate::vm_host::VmHost;

/// Mutable engine state for one shell session.
pub struct SessionContext<S: SerialPort, L: StatusLed> {
    arena: &'static LockedArena,
    console: Console<S>,
    led: L,
    vm: VmHost,
    scope: SessionScope,
    compiler: Compiler,
    natives: NativeTable,
    exit_requested: bool,
}

impl<S: SerialPort, L: StatusLed> SessionContext<S, L> {
    pub fn new(
        config: &ShellConfig,
        arena: &'static LockedArena,
        console: Console<S>,
        led: L,
        natives: NativeTable,
    ) -> Self {
        SessionContext {
            arena,
            console,
            led,
            vm: VmHost::new(config.vm_limits),
            scope: SessionScope::new(),
            compiler: Compiler::with_register_limit(config.vm_limits.registers),
            natives,
            exit_requested: false,
        }
    }

    pub fn console(&mut self) -> &mut Console<S> {
        &mut self.console
    }

    pub fn led(&self) -> &L {
        &self.led
    }

    pub fn led_mut(&mut self) -> &mut L {
        &mut self.led
    }

    pub fn vm(&self) -> &VmHost {
        &self.vm
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn arena(&self) -> &'static LockedArena {
        self.arena
    }

    /// Take the pending `exit_shell` request, if any.
    pub fn take_exit_request(&mut self) -> bool {
        core::mem::replace(&mut self.exit_requested, false)
    }
}

impl<S: SerialPort, L: StatusLed> ShellAbi for SessionContext<S, L> {
    fn read_byte(&mut self) -> Option<u8> {
        self.console.read_byte()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.console.write(bytes);
    }

    fn compile(&mut self, line: &str) -> EngineResult<()> {
        self.scope.compile(&self.compiler, self.arena, line)?;
        Ok(())
    }

    fn execute(&mut self) -> EngineResult<Report> {
        let blob = self
            .scope
            .vm_code()
            .ok_or(EngineError::InvalidVmState("execute: nothing compiled"))?;
        self.execute_blob(blob)
    }
}

impl<S: SerialPort, L: StatusLed> SessionContext<S, L> {
    /// Run an externally supplied blob against the session's VM.
    ///
    /// A blob failing the structural check is rejected with the VM and the
    /// scope untouched.
    pub fn execute_blob(&mut self, blob: &[u8]) -> EngineResult<Report> {
        let mut devices = Devices::new(
            &mut self.console,
            &mut self.led,
            &self.natives,
            &mut self.exit_requested,
        );
        let status = self.vm.execute(self.arena, blob, &mut devices)?;

        let vm = self
            .vm
            .context()
            .ok_or(EngineError::InvalidVmState("execute: VM not open"))?;
        let report = match status {
            RunStatus::Completed => Report::Value(vm.inspect(vm.result())),
            RunStatus::Raised => match vm.exception() {
                Some(exc) => Report::Raised(exc.to_string()),
                None => Report::Raised(format!("Error: code {}", vm.error_code())),
            },
            RunStatus::Preempted => Report::Preempted,
        };
        debug!("[SHELL] statement {}: {:?}", self.scope.statements(), report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimLed, SimSerial};
    use alloc::boxed::Box;
    use alloc::vec;

    fn session(heap: usize) -> (SessionContext<SimSerial, SimLed>, SimSerial, SimLed) {
        let arena: &'static LockedArena = Box::leak(Box::new(LockedArena::empty()));
        arena.provision(Box::leak(vec![0u8; heap].into_boxed_slice())).unwrap();
        let serial = SimSerial::new();
        let led = SimLed::new();
        let config = ShellConfig::default();
        let cx = SessionContext::new(
            &config,
            arena,
            Console::new(serial.clone(), true),
            led.clone(),
            NativeTable::standard(),
        );
        (cx, serial, led)
    }

    #[test]
    fn test_bindings_persist() {
        let (mut cx, _serial, _led) = session(56 * 1024);
        assert_eq!(cx.compile_and_run("a = 40"), Ok(Report::Value("40".into())));
        assert_eq!(cx.compile_and_run("a + 2"), Ok(Report::Value("42".into())));
    }

    #[test]
    fn test_script_output_and_natives() {
        let (mut cx, serial, led) = session(56 * 1024);
        assert_eq!(cx.compile_and_run("puts 'hi'"), Ok(Report::Value("nil".into())));
        assert_eq!(serial.take_string(), "hi\r\n");

        cx.compile_and_run("led_on").unwrap();
        assert!(led.is_on());
        cx.compile_and_run("exit_shell").unwrap();
        assert!(cx.take_exit_request());
        assert!(!cx.take_exit_request());
    }

    #[test]
    fn test_exception_report() {
        let (mut cx, _serial, _led) = session(56 * 1024);
        assert_eq!(
            cx.compile_and_run("1 / 0"),
            Ok(Report::Raised("ZeroDivisionError: divided by 0".into()))
        );
        assert_eq!(cx.compile_and_run("3"), Ok(Report::Value("3".into())));
    }

    #[test]
    fn test_execute_before_compile() {
        let (mut cx, _serial, _led) = session(56 * 1024);
        assert!(matches!(cx.execute(), Err(EngineError::InvalidVmState(_))));
    }
}
