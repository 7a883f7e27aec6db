//! Firmware configuration.
//!
//! Compile-time constants for the board build plus the runtime
//! `ShellConfig` handed to `Firmware::boot`.

use log::LevelFilter;
use mmrb_script::VmLimits;

/// Arena size in bytes (56 KiB).
pub const HEAP_SIZE: usize = 56 * 1024;

/// Maximum bytes in one input line.
pub const LINE_CAPACITY: usize = 256;

/// VM register file size shared by all frames.
pub const REGISTER_COUNT: usize = 256;

/// Maximum nested method calls.
pub const CALL_DEPTH: usize = 32;

/// Process id reported by `pid`.
pub const PROCESS_ID: i64 = 0;

/// Shell prompt.
pub const PROMPT: &str = "> ";

/// Printed once at boot.
pub const BANNER: &str = "\r\n\r\nStarting...\r\n\r\n";

/// Runtime shell configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Arena size expected from the board.
    pub heap_size: usize,

    /// Line buffer capacity.
    pub line_capacity: usize,

    /// Prompt written before each statement.
    pub prompt: &'static str,

    /// Boot banner.
    pub banner: &'static str,

    /// Translate `\n` in program output to `\r\n`. The shell's own lines
    /// always end in `\r\n`.
    pub crlf: bool,

    /// VM limits.
    pub vm_limits: VmLimits,

    /// Maximum log level.
    pub log_level: LevelFilter,
}

impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            heap_size: HEAP_SIZE,
            line_capacity: LINE_CAPACITY,
            prompt: PROMPT,
            banner: BANNER,
            crlf: true,
            vm_limits: VmLimits {
                registers: REGISTER_COUNT,
                call_depth: CALL_DEPTH,
                step_budget: None,
            },
            // keep the console clean
            log_level: LevelFilter::Error,
        }
    }
}
