//! Host-side device simulators.
//!
//! Each device is a cheap handle over shared state, so a test can keep one
//! clone while the firmware owns another.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::{Button, SerialPort, StatusLed};

#[derive(Debug, Default)]
struct SerialState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

/// Simulated UART with an injectable receive FIFO.
#[derive(Debug, Clone, Default)]
pub struct SimSerial {
    state: Arc<Mutex<SerialState>>,
}

impl SimSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if they arrived on the wire.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// Bytes not yet read by the firmware.
    pub fn pending_input(&self) -> usize {
        self.state.lock().rx.len()
    }

    /// Drain everything transmitted so far.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.lock().tx)
    }

    /// Drain transmitted bytes as text.
    pub fn take_string(&self) -> String {
        String::from_utf8_lossy(&self.take_output()).into_owned()
    }
}

impl SerialPort for SimSerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.state.lock().rx.pop_front()
    }

    fn rx_ready(&self) -> bool {
        !self.state.lock().rx.is_empty()
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.state.lock().tx.extend_from_slice(bytes);
    }
}

/// Simulated status LED.
#[derive(Debug, Clone, Default)]
pub struct SimLed {
    on: Arc<AtomicBool>,
}

impl SimLed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusLed for SimLed {
    fn set(&mut self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

/// Simulated push button.
#[derive(Debug, Clone, Default)]
pub struct SimButton {
    pressed: Arc<AtomicBool>,
}

impl SimButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Relaxed);
    }
}

impl Button for SimButton {
    fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}
