//! Receive-interrupt handshake.
//!
//! The board's UART RX vector calls `on_receive` after the byte is in the
//! FIFO, and `on_error` when the status register reports a fault. Neither
//! touches the VM, the scope or the arena.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Once;

use crate::hal::RxErrors;
use crate::scheduler::TaskCell;

/// Interrupt-side view of the shell task.
pub struct RxInterrupt {
    shell: Once<Arc<TaskCell>>,
    errors: AtomicU8,
}

impl RxInterrupt {
    pub const fn new() -> Self {
        RxInterrupt {
            shell: Once::new(),
            errors: AtomicU8::new(0),
        }
    }

    /// Register the shell task. Later calls are ignored.
    pub fn attach(&self, cell: Arc<TaskCell>) {
        self.shell.call_once(|| cell);
    }

    pub fn is_attached(&self) -> bool {
        self.shell.get().is_some()
    }

    /// Byte received: mark the shell ready.
    ///
    /// Does nothing before `attach` or while the shell is not blocked.
    pub fn on_receive(&self) {
        if let Some(cell) = self.shell.get() {
            cell.wake();
        }
    }

    /// Latch receiver error causes.
    pub fn on_error(&self, errors: RxErrors) {
        self.errors.fetch_or(errors.bits(), Ordering::Release);
    }

    /// Take and clear the latched causes.
    pub fn take_errors(&self) -> RxErrors {
        RxErrors::from_bits_truncate(self.errors.swap(0, Ordering::Acquire))
    }
}

impl Default for RxInterrupt {
    fn default() -> Self {
        Self::new()
    }
}
