//! Firmware root.
//!
//! `Firmware::boot` brings the engine up in a fixed order and `poll` is one
//! pass of the idle loop. Board code owns the statics and the interrupt
//! vectors; everything else is built here.

use alloc::boxed::Box;

use log::{info, warn};

use crate::arena::LockedArena;
use crate::config::ShellConfig;
use crate::console::Console;
use crate::error::EngineResult;
use crate::hal::{Button, SerialPort, StatusLed};
use crate::irq::RxInterrupt;
use crate::natives::NativeTable;
use crate::scheduler::{Scheduler, TaskId, TaskState};
use crate::session::SessionContext;
use crate::shell::ShellTask;

/// The running firmware.
pub struct Firmware<S: SerialPort, L: StatusLed, B: Button> {
    scheduler: Scheduler<SessionContext<S, L>>,
    session: SessionContext<S, L>,
    irq: &'static RxInterrupt,
    shell: TaskId,
    button: B,
    button_down: bool,
}

impl<S: SerialPort, L: StatusLed, B: Button> Firmware<S, L, B> {
    /// Bring the engine up.
    ///
    /// Provisions the arena from `heap`, switches the LED off, prints the
    /// banner, spawns the shell and attaches it to `irq`. The shell prints
    /// its prompt on the first `poll`.
    pub fn boot(
        config: ShellConfig,
        arena: &'static LockedArena,
        heap: &'static mut [u8],
        irq: &'static RxInterrupt,
        serial: S,
        mut led: L,
        button: B,
    ) -> EngineResult<Self> {
        log::set_max_level(config.log_level);
        if heap.len() != config.heap_size {
            warn!(
                "[BOOT] heap is {} bytes, expected {}",
                heap.len(),
                config.heap_size
            );
        }
        arena.provision(heap)?;
        led.set(false);

        let mut console = Console::new(serial, config.crlf);
        console.write_str(config.banner);

        let session = SessionContext::new(&config, arena, console, led, NativeTable::standard());
        let mut scheduler: Scheduler<SessionContext<S, L>> = Scheduler::new();
        let (shell, cell) = scheduler.spawn(
            "shell",
            Box::new(ShellTask::new(config.prompt, config.line_capacity)),
        );
        irq.attach(cell);
        info!("[BOOT] shell ready, {} byte arena", arena.stats().capacity);

        let button_down = button.is_pressed();
        Ok(Firmware {
            scheduler,
            session,
            irq,
            shell,
            button,
            button_down,
        })
    }

    /// One idle-loop pass. Returns how many tasks ran.
    pub fn poll(&mut self) -> usize {
        let ran = self.scheduler.run_ready(&mut self.session);

        if self.session.take_exit_request() {
            self.scheduler.request_exit(self.shell);
        }

        let errors = self.irq.take_errors();
        if !errors.is_empty() {
            warn!("[IRQ] receive error: {:?}", errors);
            self.session.led_mut().set(true);
        }

        let down = self.button.is_pressed();
        if down && !self.button_down {
            self.session.led_mut().set(false);
        }
        self.button_down = down;

        ran
    }

    /// Poll forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.poll();
            core::hint::spin_loop();
        }
    }

    pub fn session(&self) -> &SessionContext<S, L> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionContext<S, L> {
        &mut self.session
    }

    pub fn scheduler(&self) -> &Scheduler<SessionContext<S, L>> {
        &self.scheduler
    }

    pub fn shell_id(&self) -> TaskId {
        self.shell
    }

    pub fn shell_state(&self) -> Option<TaskState> {
        self.scheduler.state(self.shell)
    }
}
