//! End-to-end shell sessions against simulated devices.

use mmrb_firmware::hal::sim::{SimButton, SimLed, SimSerial};
use mmrb_firmware::hal::{RxErrors, StatusLed};
use mmrb_firmware::scheduler::TaskState;
use mmrb_firmware::{EngineError, Firmware, LockedArena, RxInterrupt, ShellConfig, VmState};
use mmrb_script::Value;

struct Board {
    fw: Firmware<SimSerial, SimLed, SimButton>,
    serial: SimSerial,
    led: SimLed,
    button: SimButton,
    irq: &'static RxInterrupt,
}

impl Board {
    fn boot(heap: usize) -> Board {
        Board::boot_with(ShellConfig::default(), heap)
    }

    fn boot_with(config: ShellConfig, heap: usize) -> Board {
        let arena: &'static LockedArena = Box::leak(Box::new(LockedArena::empty()));
        let irq: &'static RxInterrupt = Box::leak(Box::new(RxInterrupt::new()));
        let heap: &'static mut [u8] = Box::leak(vec![0u8; heap].into_boxed_slice());
        let serial = SimSerial::new();
        let led = SimLed::new();
        let button = SimButton::new();

        let fw = Firmware::boot(
            config,
            arena,
            heap,
            irq,
            serial.clone(),
            led.clone(),
            button.clone(),
        )
        .unwrap();
        Board {
            fw,
            serial,
            led,
            button,
            irq,
        }
    }

    /// Boot with the default heap and consume the banner and first prompt.
    fn ready() -> Board {
        let mut board = Board::boot(56 * 1024);
        board.fw.poll();
        board.serial.take_string();
        board
    }

    /// Deliver bytes through the interrupt path and run one idle pass.
    fn send(&mut self, bytes: &[u8]) -> String {
        self.serial.inject(bytes);
        self.irq.on_receive();
        self.fw.poll();
        self.serial.take_string()
    }

    fn line(&mut self, line: &str) -> String {
        self.send(format!("{}\r", line).as_bytes())
    }
}

#[test]
fn test_banner_then_prompt() {
    let mut board = Board::boot(56 * 1024);
    assert_eq!(board.serial.take_string(), "\r\n\r\nStarting...\r\n\r\n");
    assert!(!board.led.is_on());
    assert_eq!(board.fw.poll(), 1);
    assert_eq!(board.serial.take_string(), "> ");
    assert_eq!(board.fw.shell_state(), Some(TaskState::Blocked));
}

#[test]
fn test_hello_world() {
    let mut board = Board::ready();
    assert_eq!(
        board.line("puts 'hello world!'"),
        "puts 'hello world!'\r\nhello world!\r\n=> nil\r\n> "
    );
    assert_eq!(board.line("1+1"), "1+1\r\n=> 2\r\n> ");
}

#[test]
fn test_raw_output_without_crlf() {
    let config = ShellConfig {
        crlf: false,
        ..ShellConfig::default()
    };
    let mut board = Board::boot_with(config, 56 * 1024);
    board.fw.poll();
    board.serial.take_string();
    assert_eq!(board.line("puts 'hi'"), "puts 'hi'\r\nhi\n=> nil\r\n> ");
}

#[test]
fn test_backspace_editing() {
    let mut board = Board::ready();
    assert_eq!(board.send(b"'ab\x08c'\r"), "'ab\x08 \x08c'\r\n=> \"ac\"\r\n> ");
}

#[test]
fn test_bindings_and_methods_persist() {
    let mut board = Board::ready();
    board.line("a = 20");
    board.line("def twice(n); n * 2; end");
    assert!(board.line("twice(a) + 2").ends_with("=> 42\r\n> "));
    assert_eq!(board.fw.session().vm().state(), VmState::Restartable);
    assert_eq!(board.fw.session().scope().sp(), 1);
}

#[test]
fn test_restart_after_deep_exception() {
    let mut board = Board::ready();
    board.line("def down(n); down(n + 1); end");
    let out = board.line("down(0)");
    assert!(out.contains("SystemStackError: stack level too deep\r\n"), "{}", out);

    let out = board.line("1+1");
    assert!(out.ends_with("=> 2\r\n> "), "{}", out);
    let vm = board.fw.session().vm().context().unwrap();
    assert_eq!(vm.call_depth(), 0);
    assert!(vm.exception().is_none());
}

#[test]
fn test_compile_failure_is_isolated() {
    let mut board = Board::ready();
    board.line("a = 1");
    let out = board.line("b = (");
    assert!(out.contains("SyntaxError:"), "{}", out);
    assert!(out.ends_with("> "));

    assert_eq!(board.fw.session().scope().sp(), 1);
    let out = board.line("b");
    assert!(out.contains("NoMethodError: undefined method 'b' for main:Object"), "{}", out);
    assert!(board.line("a").ends_with("=> 1\r\n> "));
}

#[test]
fn test_deep_nesting_is_a_syntax_error() {
    let mut board = Board::ready();
    board.line("a = 1");
    let deep = format!("{}1{}", "(".repeat(120), ")".repeat(120));
    let out = board.line(&deep);
    assert!(out.contains("SyntaxError: nesting too deep"), "{}", out);
    assert!(out.ends_with("> "));

    assert!(board.line("1+1").ends_with("=> 2\r\n> "));
    assert!(board.line("a").ends_with("=> 1\r\n> "));
}

#[test]
fn test_arena_accounts_for_vm_and_code() {
    let mut board = Board::ready();
    let before = board.fw.session().arena().stats();
    assert_eq!(before.used, 0);

    board.line("1");
    let after = board.fw.session().arena().stats();
    let registers = ShellConfig::default().vm_limits.registers * std::mem::size_of::<Value>();
    assert!(after.used > registers, "{:?}", after);
    // one compiled blob plus the register file
    assert_eq!(after.allocations, 2);

    board.line("2");
    let next = board.fw.session().arena().stats();
    assert_eq!(next.allocations, 3);
    assert!(next.used - after.used < registers);
}

#[test]
fn test_illegal_bytecode_leaves_vm_unchanged() {
    let mut board = Board::ready();
    board.line("x = 5");
    let runs = board.fw.session().vm().runs();

    let err = board.fw.session_mut().execute_blob(b"MRBS junk").unwrap_err();
    assert!(matches!(err, EngineError::IllegalBytecode(_)));
    assert_eq!(err.to_string(), "Error: Illegal bytecode.");
    assert_eq!(board.fw.session().vm().runs(), runs);

    assert!(board.line("x").ends_with("=> 5\r\n> "));
}

#[test]
fn test_out_of_memory_halts_shell() {
    let mut board = Board::boot(16);
    board.fw.poll();
    board.serial.take_string();

    let out = board.line("1");
    assert_eq!(out, "1\r\nError: Out of memory.\r\n");
    assert_eq!(board.line("2"), "");
    assert_eq!(board.serial.pending_input(), 0);
}

#[test]
fn test_vm_open_failure_halts_shell() {
    let mut board = Board::boot(256);
    board.fw.poll();
    board.serial.take_string();

    let out = board.line("1");
    assert!(out.ends_with("Error: Can't open VM.\r\n"), "{}", out);
    assert_eq!(board.fw.session().vm().state(), VmState::Uninitialized);
    assert_eq!(board.line("2"), "");
}

#[test]
fn test_receive_without_interrupt_waits() {
    let mut board = Board::ready();
    board.serial.inject(b"7\r");
    assert_eq!(board.fw.poll(), 0);
    assert_eq!(board.serial.take_string(), "");

    board.irq.on_receive();
    board.irq.on_receive();
    assert_eq!(board.fw.poll(), 1);
    assert_eq!(board.serial.take_string(), "7\r\n=> 7\r\n> ");
    assert_eq!(board.fw.poll(), 0);
}

#[test]
fn test_interrupt_before_attach_is_ignored() {
    let irq = RxInterrupt::new();
    irq.on_receive();
    irq.on_error(RxErrors::BREAK);
    assert!(!irq.is_attached());
    assert_eq!(irq.take_errors(), RxErrors::BREAK);
}

#[test]
fn test_receive_error_lights_led_until_button() {
    let mut board = Board::ready();
    board.irq.on_error(RxErrors::OVERRUN | RxErrors::FRAME);
    board.fw.poll();
    assert!(board.led.is_on());

    board.button.press();
    board.fw.poll();
    assert!(!board.led.is_on());

    // still held
    board.irq.on_error(RxErrors::PARITY);
    board.fw.poll();
    assert!(board.led.is_on());

    board.button.release();
    board.fw.poll();
    assert!(board.led.is_on());
    board.button.press();
    board.fw.poll();
    assert!(!board.led.is_on());
}

#[test]
fn test_led_natives() {
    let mut board = Board::ready();
    board.line("led_on");
    assert!(board.led.is_on());
    board.line("led_off");
    assert!(!board.led.is_on());
    assert!(board.line("pid").ends_with("=> 0\r\n> "));
}

#[test]
fn test_exit_request_has_no_effect() {
    let mut board = Board::ready();
    assert!(board.line("exit_shell").ends_with("=> nil\r\n> "));

    let id = board.fw.shell_id();
    assert!(board.fw.scheduler().task(id).unwrap().exit_requested());
    assert_eq!(board.fw.shell_state(), Some(TaskState::Blocked));
    assert!(board.line("3 * 3").ends_with("=> 9\r\n> "));
}

#[test]
fn test_engine_natives_are_busy() {
    let mut board = Board::ready();
    let out = board.line("compile_and_run('1')");
    assert!(out.contains("RuntimeError: compile_and_run: VM busy"), "{}", out);
}
