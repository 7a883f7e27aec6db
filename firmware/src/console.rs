//! Serial console.

use core::fmt;

use crate::hal::SerialPort;

/// Backspace.
pub const BS: u8 = 0x08;
/// Horizontal tab.
pub const TAB: u8 = 0x09;
/// Bell.
pub const BEL: u8 = 0x07;
/// Erase sequence echoed for a backspace.
pub const ERASE: &[u8] = b"\x08 \x08";

/// Serial port plus output line-ending policy.
pub struct Console<S: SerialPort> {
    port: S,
    crlf: bool,
    last: u8,
}

impl<S: SerialPort> Console<S> {
    pub fn new(port: S, crlf: bool) -> Self {
        Console { port, crlf, last: 0 }
    }

    /// Write bytes, expanding a bare `\n` to `\r\n` when enabled.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if !self.crlf {
            self.port.write_bytes(bytes);
            self.last = bytes[bytes.len() - 1];
            return;
        }

        let mut start = 0;
        for (i, &byte) in bytes.iter().enumerate() {
            if byte == b'\n' {
                let prev = if i == 0 { self.last } else { bytes[i - 1] };
                if prev != b'\r' {
                    self.port.write_bytes(&bytes[start..i]);
                    self.port.write_bytes(b"\r");
                    start = i;
                }
            }
        }
        self.port.write_bytes(&bytes[start..]);
        self.last = bytes[bytes.len() - 1];
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    /// Write `s` followed by `\r\n`.
    pub fn write_line(&mut self, s: &str) {
        self.write(s.as_bytes());
        self.write(b"\r\n");
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        self.port.read_byte()
    }

    pub fn rx_ready(&self) -> bool {
        self.port.rx_ready()
    }

    pub fn port(&self) -> &S {
        &self.port
    }
}

impl<S: SerialPort> fmt::Write for Console<S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}
