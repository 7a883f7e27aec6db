//! Hardware abstraction.
//!
//! The firmware only talks to the board through these traits. Register
//! access and bring-up live in the board crate; `sim` provides host
//! implementations.

pub mod sim;

use bitflags::bitflags;

/// UART used for the shell.
pub trait SerialPort {
    /// Pop one received byte, if any.
    fn read_byte(&mut self) -> Option<u8>;

    /// Whether the receive FIFO holds data.
    fn rx_ready(&self) -> bool;

    /// Transmit `bytes`, blocking until queued.
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Status indicator.
pub trait StatusLed {
    fn set(&mut self, on: bool);
    fn is_on(&self) -> bool;
}

/// User push button.
pub trait Button {
    fn is_pressed(&self) -> bool;
}

bitflags! {
    /// Receiver error causes latched by the interrupt handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxErrors: u8 {
        /// Line held low past a frame.
        const BREAK = 0b0001;
        /// Parity mismatch.
        const PARITY = 0b0010;
        /// Missing stop bit.
        const FRAME = 0b0100;
        /// FIFO overflowed.
        const OVERRUN = 0b1000;
    }
}
