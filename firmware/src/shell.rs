//! Shell task.
//!
//! Assembles received bytes into a statement, hands it to the engine and
//! prints the outcome. The task never blocks inside `resume`: it drains
//! whatever the receiver holds and yields back to the scheduler.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use log::{error, trace, warn};

use crate::console::{BEL, BS, ERASE, TAB};
use crate::error::EngineResult;
use crate::scheduler::{Task, Yield};

// ────────────────────────── Engine interface ──────────────────────────

/// Outcome of one executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Completed; carries the inspected result.
    Value(String),
    /// Raised; carries `<Class>: <message>`.
    Raised(String),
    /// Stopped by the step budget.
    Preempted,
}

/// What the shell needs from the rest of the firmware.
pub trait ShellAbi {
    /// Pop one received byte.
    fn read_byte(&mut self) -> Option<u8>;

    /// Write to the terminal.
    fn write(&mut self, bytes: &[u8]);

    /// Compile `line` into the session's code buffer.
    fn compile(&mut self, line: &str) -> EngineResult<()>;

    /// Run the code buffer.
    fn execute(&mut self) -> EngineResult<Report>;

    fn compile_and_run(&mut self, line: &str) -> EngineResult<Report> {
        self.compile(line)?;
        self.execute()
    }
}

// ────────────────────────── Line editing ──────────────────────────

/// Effect of one input byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Byte buffered; echo it.
    Echo(u8),
    /// Last byte removed; echo the erase sequence.
    Erase,
    /// Nothing to do.
    Ignore,
    /// Buffer full.
    Bell,
    /// Line complete.
    Submit(String),
}

/// Fixed-capacity line buffer.
pub struct LineEditor {
    buf: Vec<u8>,
    capacity: usize,
    after_cr: bool,
}

impl LineEditor {
    pub fn new(capacity: usize) -> Self {
        LineEditor {
            buf: Vec::with_capacity(capacity),
            capacity,
            after_cr: false,
        }
    }

    /// Bytes currently buffered.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn feed(&mut self, byte: u8) -> Edit {
        let after_cr = core::mem::replace(&mut self.after_cr, false);
        match byte {
            b'\r' => {
                self.after_cr = true;
                self.submit()
            }
            // second half of CR LF
            b'\n' if after_cr => Edit::Ignore,
            b'\n' => self.submit(),
            BS => match self.buf.pop() {
                Some(_) => Edit::Erase,
                None => Edit::Ignore,
            },
            TAB => Edit::Ignore,
            _ if self.buf.len() >= self.capacity => Edit::Bell,
            _ => {
                self.buf.push(byte);
                Edit::Echo(byte)
            }
        }
    }

    fn submit(&mut self) -> Edit {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Edit::Submit(line)
    }
}

// ────────────────────────── Task ──────────────────────────

/// The interactive shell.
pub struct ShellTask {
    editor: LineEditor,
    prompt: &'static str,
    prompted: bool,
    halted: bool,
}

impl ShellTask {
    pub fn new(prompt: &'static str, line_capacity: usize) -> Self {
        ShellTask {
            editor: LineEditor::new(line_capacity),
            prompt,
            prompted: false,
            halted: false,
        }
    }

    /// A fatal error has stopped the shell.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn evaluate<C: ShellAbi>(&mut self, cx: &mut C, line: &str) {
        trace!("[SHELL] evaluating {:?}", line);
        match cx.compile_and_run(line) {
            Ok(Report::Value(inspected)) => cx.write(format!("=> {}\r\n", inspected).as_bytes()),
            Ok(Report::Raised(message)) => cx.write(format!("{}\r\n", message).as_bytes()),
            Ok(Report::Preempted) => warn!("[SHELL] statement preempted"),
            Err(err) => {
                cx.write(format!("{}\r\n", err).as_bytes());
                if err.is_fatal() {
                    error!("[SHELL] halted: {:?}", err);
                    self.halted = true;
                }
            }
        }
    }
}

impl<C: ShellAbi> Task<C> for ShellTask {
    fn resume(&mut self, cx: &mut C) -> Yield {
        if !self.prompted && !self.halted {
            cx.write(self.prompt.as_bytes());
            self.prompted = true;
        }

        while let Some(byte) = cx.read_byte() {
            if self.halted {
                continue;
            }
            match self.editor.feed(byte) {
                Edit::Echo(b) => cx.write(&[b]),
                Edit::Erase => cx.write(ERASE),
                Edit::Bell => cx.write(&[BEL]),
                Edit::Ignore => {}
                Edit::Submit(line) => {
                    cx.write(b"\r\n");
                    self.evaluate(cx, &line);
                    if !self.halted {
                        cx.write(self.prompt.as_bytes());
                    }
                }
            }
        }
        Yield::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use alloc::collections::VecDeque;
    use mmrb_script::{BytecodeError, CompileError};

    #[derive(Default)]
    struct FakeEngine {
        input: VecDeque<u8>,
        output: Vec<u8>,
        compiled: Vec<String>,
        executed: usize,
    }

    impl FakeEngine {
        fn with_input(bytes: &[u8]) -> Self {
            FakeEngine {
                input: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl ShellAbi for FakeEngine {
        fn read_byte(&mut self) -> Option<u8> {
            self.input.pop_front()
        }

        fn write(&mut self, bytes: &[u8]) {
            self.output.extend_from_slice(bytes);
        }

        fn compile(&mut self, line: &str) -> EngineResult<()> {
            match line {
                "bad" => Err(EngineError::CompileFailure(CompileError::TooManyRegisters)),
                "junk" => Err(EngineError::IllegalBytecode(BytecodeError::BadMagic)),
                "big" => Err(EngineError::OutOfMemory {
                    requested: 64,
                    available: 0,
                }),
                _ => {
                    self.compiled.push(String::from(line));
                    Ok(())
                }
            }
        }

        fn execute(&mut self) -> EngineResult<Report> {
            self.executed += 1;
            match self.compiled.last().map(String::as_str) {
                Some("boom") => Ok(Report::Raised(String::from("RuntimeError: boom"))),
                Some(line) => Ok(Report::Value(String::from(line))),
                None => Ok(Report::Value(String::from("nil"))),
            }
        }
    }

    #[test]
    fn test_backspace_edits_line() {
        let mut cx = FakeEngine::with_input(b"ab\x08c\r");
        let mut shell = ShellTask::new("> ", 16);
        assert_eq!(shell.resume(&mut cx), Yield::Blocked);
        assert_eq!(cx.compiled, ["ac"]);
        assert_eq!(cx.output(), "> ab\x08 \x08c\r\n=> ac\r\n> ");
    }

    #[test]
    fn test_tab_and_leading_backspace_ignored() {
        let mut cx = FakeEngine::with_input(b"\x08x\ty\n");
        let mut shell = ShellTask::new("> ", 16);
        shell.resume(&mut cx);
        assert_eq!(cx.compiled, ["xy"]);
    }

    #[test]
    fn test_crlf_is_one_terminator() {
        let mut editor = LineEditor::new(8);
        editor.feed(b'1');
        assert_eq!(editor.feed(b'\r'), Edit::Submit(String::from("1")));
        assert_eq!(editor.feed(b'\n'), Edit::Ignore);
        assert_eq!(editor.feed(b'\n'), Edit::Submit(String::new()));
    }

    #[test]
    fn test_full_buffer_rings_bell() {
        let mut editor = LineEditor::new(2);
        editor.feed(b'a');
        editor.feed(b'b');
        assert_eq!(editor.feed(b'c'), Edit::Bell);
        assert_eq!(editor.pending(), b"ab");
    }

    #[test]
    fn test_blank_line_still_runs() {
        let mut cx = FakeEngine::with_input(b"\r");
        let mut shell = ShellTask::new("> ", 16);
        shell.resume(&mut cx);
        assert_eq!(cx.executed, 1);
        assert_eq!(cx.output(), "> \r\n=> \r\n> ");
    }

    #[test]
    fn test_recoverable_errors_keep_shell_running() {
        let mut cx = FakeEngine::with_input(b"bad\rjunk\rboom\r");
        let mut shell = ShellTask::new("> ", 16);
        shell.resume(&mut cx);
        let out = cx.output();
        assert!(out.contains("CompileError: statement too complex\r\n"));
        assert!(out.contains("Error: Illegal bytecode.\r\n"));
        assert!(out.contains("RuntimeError: boom\r\n"));
        assert!(out.ends_with("> "));
        assert!(!shell.is_halted());
    }

    #[test]
    fn test_fatal_error_halts() {
        let mut cx = FakeEngine::with_input(b"big\r1\r");
        let mut shell = ShellTask::new("> ", 16);
        shell.resume(&mut cx);
        assert!(shell.is_halted());
        assert!(cx.output().ends_with("Error: Out of memory.\r\n"));
        assert!(cx.compiled.is_empty());
        assert!(cx.input.is_empty());

        cx.input.extend(b"2\r");
        shell.resume(&mut cx);
        assert!(cx.input.is_empty());
        assert!(cx.output().ends_with("Error: Out of memory.\r\n"));
    }
}
