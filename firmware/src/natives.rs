//! Native methods.
//!
//! The table is built once at boot and never changes. Each entry is a plain
//! function over `NativeHost`, the slice of firmware a running script may
//! reach.

use alloc::format;
use alloc::string::String;

use hashbrown::HashMap;
use log::{debug, warn};
use mmrb_script::{Exception, Host, Value};

use crate::config::PROCESS_ID;
use crate::console::Console;
use crate::hal::{SerialPort, StatusLed};

/// Firmware services available to natives.
pub trait NativeHost {
    /// Write raw bytes to the console.
    fn print(&mut self, bytes: &[u8]);
    /// Pop one received byte.
    fn getc(&mut self) -> Option<u8>;
    /// Whether received bytes are waiting.
    fn input_ready(&self) -> bool;
    fn process_id(&self) -> i64;
    fn indicator(&mut self, on: bool);
    /// Ask for the shell to exit. Accepted, never honoured.
    fn request_exit(&mut self);
}

/// Native method body.
pub type NativeFn = fn(&mut dyn NativeHost, &[Value]) -> Result<Value, Exception>;

/// Immutable name to handler table.
pub struct NativeTable {
    methods: HashMap<&'static str, NativeFn>,
}

impl NativeTable {
    /// The shell's native methods.
    pub fn standard() -> Self {
        let mut methods: HashMap<&'static str, NativeFn> = HashMap::new();
        methods.insert("print", native_print);
        methods.insert("getc", native_getc);
        methods.insert("fd_empty?", native_fd_empty);
        methods.insert("pid", native_pid);
        methods.insert("led_on", native_led_on);
        methods.insert("led_off", native_led_off);
        methods.insert("exit_shell", native_exit_shell);
        // driven by the shell task; a running statement cannot re-enter the VM
        methods.insert("compile_and_run", native_compile_and_run);
        methods.insert("compile", native_compile);
        methods.insert("execute_vm", native_execute_vm);
        methods.insert("print_inspect", native_print_inspect);
        NativeTable { methods }
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.methods.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn arity(args: &[Value], expected: usize) -> Result<(), Exception> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Exception::arity(args.len(), expected))
    }
}

fn native_print(host: &mut dyn NativeHost, args: &[Value]) -> Result<Value, Exception> {
    arity(args, 1)?;
    match &args[0] {
        Value::Str(s) => {
            host.print(s.as_bytes());
            Ok(Value::Nil)
        }
        _ => Err(Exception::type_error("no implicit conversion into String")),
    }
}

fn native_getc(host: &mut dyn NativeHost, args: &[Value]) -> Result<Value, Exception> {
    arity(args, 0)?;
    Ok(match host.getc() {
        Some(byte) => Value::Str(String::from(char::from(byte))),
        None => Value::Nil,
    })
}

fn native_fd_empty(host: &mut dyn NativeHost, args: &[Value]) -> Result<Value, Exception> {
    arity(args, 0)?;
    Ok(Value::Bool(!host.input_ready()))
}

fn native_pid(host: &mut dyn NativeHost, args: &[Value]) -> Result<Value, Exception> {
    arity(args, 0)?;
    Ok(Value::Int(host.process_id()))
}

fn native_led_on(host: &mut dyn NativeHost, args: &[Value]) -> Result<Value, Exception> {
    arity(args, 0)?;
    host.indicator(true);
    Ok(Value::Nil)
}

fn native_led_off(host: &mut dyn NativeHost, args: &[Value]) -> Result<Value, Exception> {
    arity(args, 0)?;
    host.indicator(false);
    Ok(Value::Nil)
}

fn native_exit_shell(host: &mut dyn NativeHost, _args: &[Value]) -> Result<Value, Exception> {
    host.request_exit();
    Ok(Value::Nil)
}

fn busy(name: &str) -> Result<Value, Exception> {
    Err(Exception::runtime(format!("{}: VM busy", name)))
}

fn native_compile_and_run(_host: &mut dyn NativeHost, _args: &[Value]) -> Result<Value, Exception> {
    busy("compile_and_run")
}

fn native_compile(_host: &mut dyn NativeHost, _args: &[Value]) -> Result<Value, Exception> {
    busy("compile")
}

fn native_execute_vm(_host: &mut dyn NativeHost, _args: &[Value]) -> Result<Value, Exception> {
    busy("execute_vm")
}

fn native_print_inspect(_host: &mut dyn NativeHost, _args: &[Value]) -> Result<Value, Exception> {
    busy("print_inspect")
}

/// Devices lent to the VM for one run.
pub struct Devices<'a, S: SerialPort, L: StatusLed> {
    console: &'a mut Console<S>,
    led: &'a mut L,
    natives: &'a NativeTable,
    exit_requested: &'a mut bool,
}

impl<'a, S: SerialPort, L: StatusLed> Devices<'a, S, L> {
    pub fn new(
        console: &'a mut Console<S>,
        led: &'a mut L,
        natives: &'a NativeTable,
        exit_requested: &'a mut bool,
    ) -> Self {
        Devices {
            console,
            led,
            natives,
            exit_requested,
        }
    }
}

impl<S: SerialPort, L: StatusLed> NativeHost for Devices<'_, S, L> {
    fn print(&mut self, bytes: &[u8]) {
        self.console.write(bytes);
    }

    fn getc(&mut self) -> Option<u8> {
        self.console.read_byte()
    }

    fn input_ready(&self) -> bool {
        self.console.rx_ready()
    }

    fn process_id(&self) -> i64 {
        PROCESS_ID
    }

    fn indicator(&mut self, on: bool) {
        self.led.set(on);
    }

    fn request_exit(&mut self) {
        warn!("[SHELL] exit_shell called");
        *self.exit_requested = true;
    }
}

impl<S: SerialPort, L: StatusLed> Host for Devices<'_, S, L> {
    fn write(&mut self, bytes: &[u8]) {
        self.console.write(bytes);
    }

    fn call_native(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, Exception>> {
        let native = self.natives.get(name)?;
        let result = native(self, args);
        if let Err(exc) = &result {
            debug!("[SHELL] {} raised {}", name, exc);
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimLed, SimSerial};

    #[test]
    fn test_table_is_complete() {
        let table = NativeTable::standard();
        for name in ["print", "getc", "fd_empty?", "pid", "led_on", "led_off", "exit_shell"] {
            assert!(table.contains(name), "missing {}", name);
        }
        assert!(table.get("nope").is_none());
    }

    #[test]
    fn test_natives_reach_devices() {
        let serial = SimSerial::new();
        let mut console = Console::new(serial.clone(), true);
        let led = SimLed::new();
        let mut owned_led = led.clone();
        let table = NativeTable::standard();
        let mut exit = false;
        let mut devices = Devices::new(&mut console, &mut owned_led, &table, &mut exit);

        serial.inject(b"k");
        assert_eq!(devices.call_native("fd_empty?", &[]), Some(Ok(Value::Bool(false))));
        assert_eq!(devices.call_native("getc", &[]), Some(Ok(Value::Str("k".into()))));
        assert_eq!(devices.call_native("getc", &[]), Some(Ok(Value::Nil)));
        assert_eq!(devices.call_native("pid", &[]), Some(Ok(Value::Int(0))));

        devices.call_native("led_on", &[]);
        assert!(led.is_on());
        devices.call_native("print", &[Value::Str("hi\n".into())]);
        devices.call_native("exit_shell", &[]);
        assert_eq!(
            devices.call_native("compile", &[Value::Str("1".into())]),
            Some(Err(Exception::runtime("compile: VM busy")))
        );
        assert!(devices.call_native("missing", &[]).is_none());

        drop(devices);
        assert!(exit);
        assert_eq!(serial.take_string(), "hi\r\n");
    }
}
