//! mmrb shell firmware
//!
//! Firmware for a small microcontroller running an interactive, incremental
//! scripting shell. Bytes arrive over a serial link, are assembled into
//! statements, compiled to bytecode and executed against one persistent VM
//! whose top-level bindings survive from statement to statement.
//!
//! # Architecture
//!
//! ```text
//!   RX interrupt ──wake──▶ Scheduler ──resume──▶ Shell task
//!                                                   │ line
//!                                                   ▼
//!   Arena ◀──blob── SessionScope (compile) ──▶ VmHost (load, restart, run)
//!                                                   │
//!                                   Console ◀───────┘ output
//! ```
//!
//! # Modules
//!
//! - `arena`: fixed-size bump arena serving every allocation
//! - `hal`: serial, LED and button traits plus host simulators
//! - `console`: serial output with line-ending translation
//! - `irq`: the receive-interrupt handshake
//! - `scheduler`: cooperative run-to-completion tasks
//! - `vm_host`: the one-shot-then-restartable VM lifecycle
//! - `scope`: session bindings and the compiled-code buffer
//! - `natives`: methods scripts can call into the firmware
//! - `session`: all mutable engine state in one place
//! - `shell`: line editing and the read-compile-run loop
//! - `logger`: `log` backend writing to a board sink
//! - `boot`: firmware root and idle loop

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arena;
pub mod boot;
pub mod config;
pub mod console;
pub mod error;
pub mod hal;
pub mod irq;
pub mod logger;
pub mod natives;
pub mod scheduler;
pub mod scope;
pub mod session;
pub mod shell;
pub mod vm_host;

// Re-exports for convenience
pub use arena::{HeapArena, LockedArena};
pub use boot::Firmware;
pub use config::ShellConfig;
pub use error::{EngineError, EngineResult};
pub use irq::RxInterrupt;
pub use session::SessionContext;
pub use shell::{ShellAbi, ShellTask};
pub use vm_host::{VmHost, VmState};

/// Firmware version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
