//! Builtin methods.
//!
//! Consulted after user-defined methods, so a script can override any of
//! these by reopening the class.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use crate::class::{ClassId, ClassTable};
use crate::error::Exception;
use crate::value::{Instance, Value};
use crate::vm::Host;

type BuiltinResult = Option<Result<Value, Exception>>;

/// Longest string `+` and `*` will build, in bytes.
pub const MAX_STRING_LEN: usize = 16 * 1024;

/// Checked length of a string built from pieces.
fn string_len(len: Option<usize>) -> Result<usize, Exception> {
    match len {
        Some(n) if n <= MAX_STRING_LEN => Ok(n),
        _ => Err(Exception::argument("argument too big")),
    }
}

/// Dispatch `name` on `recv`. `None` means no builtin matches.
pub fn call(
    classes: &ClassTable,
    host: &mut dyn Host,
    recv: &Value,
    name: &str,
    args: &[Value],
) -> BuiltinResult {
    let typed = match recv {
        Value::Int(n) => integer_method(classes, *n, name, args),
        Value::Str(s) => string_method(classes, s, name, args),
        Value::Class(id) => class_method(*id, name, args),
        _ => None,
    };
    if typed.is_some() {
        return typed;
    }
    object_method(classes, host, recv, name, args)
}

/// Integer arithmetic and comparison shared with the VM fast path.
pub fn integer_op(name: &str, a: i64, b: i64) -> BuiltinResult {
    let value = match name {
        "+" => a.checked_add(b).map(Value::Int),
        "-" => a.checked_sub(b).map(Value::Int),
        "*" => a.checked_mul(b).map(Value::Int),
        "/" => return Some(floor_div(a, b)),
        "%" => return Some(floor_mod(a, b)),
        "==" => Some(Value::Bool(a == b)),
        "!=" => Some(Value::Bool(a != b)),
        "<" => Some(Value::Bool(a < b)),
        "<=" => Some(Value::Bool(a <= b)),
        ">" => Some(Value::Bool(a > b)),
        ">=" => Some(Value::Bool(a >= b)),
        _ => return None,
    };
    Some(value.ok_or_else(Exception::overflow))
}

fn floor_div(a: i64, b: i64) -> Result<Value, Exception> {
    if b == 0 {
        return Err(Exception::zero_division());
    }
    let q = a.checked_div(b).ok_or_else(Exception::overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(Value::Int(q - 1))
    } else {
        Ok(Value::Int(q))
    }
}

fn floor_mod(a: i64, b: i64) -> Result<Value, Exception> {
    if b == 0 {
        return Err(Exception::zero_division());
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(Value::Int(r + b))
    } else {
        Ok(Value::Int(r))
    }
}

fn integer_method(classes: &ClassTable, n: i64, name: &str, args: &[Value]) -> BuiltinResult {
    if let [other] = args {
        if let Value::Int(m) = other {
            if let Some(result) = integer_op(name, n, *m) {
                return Some(result);
            }
        }
        let err = match name {
            "+" | "-" | "*" | "/" | "%" => Exception::type_error(alloc::format!(
                "{} can't be coerced into Integer",
                classes.name(other.class_of())
            )),
            "<" | "<=" | ">" | ">=" => Exception::argument(alloc::format!(
                "comparison of Integer with {} failed",
                other.inspect(classes)
            )),
            _ => return None,
        };
        return Some(Err(err));
    }

    let value = match name {
        "-@" => return Some(n.checked_neg().map(Value::Int).ok_or_else(Exception::overflow)),
        "abs" => return Some(n.checked_abs().map(Value::Int).ok_or_else(Exception::overflow)),
        "succ" => return Some(n.checked_add(1).map(Value::Int).ok_or_else(Exception::overflow)),
        "zero?" => Value::Bool(n == 0),
        "even?" => Value::Bool(n % 2 == 0),
        "odd?" => Value::Bool(n % 2 != 0),
        "to_i" => Value::Int(n),
        _ => return None,
    };
    Some(arity(args, 0).map(|_| value))
}

fn string_method(classes: &ClassTable, s: &str, name: &str, args: &[Value]) -> BuiltinResult {
    let result = match name {
        "+" => one_arg(args).and_then(|other| match other {
            Value::Str(o) => {
                let len = string_len(s.len().checked_add(o.len()))?;
                let mut out = String::with_capacity(len);
                out.push_str(s);
                out.push_str(o);
                Ok(Value::Str(out))
            }
            other => Err(Exception::type_error(alloc::format!(
                "no implicit conversion of {} into String",
                classes.name(other.class_of())
            ))),
        }),
        "*" => one_arg(args).and_then(|other| match other {
            Value::Int(times) if *times < 0 => Err(Exception::argument("negative argument")),
            Value::Int(times) => {
                let times = string_len(usize::try_from(*times).ok())?;
                string_len(s.len().checked_mul(times))?;
                Ok(Value::Str(s.repeat(times)))
            }
            other => Err(Exception::type_error(alloc::format!(
                "no implicit conversion of {} into Integer",
                classes.name(other.class_of())
            ))),
        }),
        "size" | "length" => arity(args, 0).map(|_| Value::Int(s.chars().count() as i64)),
        "upcase" => arity(args, 0).map(|_| Value::Str(s.to_uppercase())),
        "downcase" => arity(args, 0).map(|_| Value::Str(s.to_lowercase())),
        "reverse" => arity(args, 0).map(|_| Value::Str(s.chars().rev().collect())),
        "empty?" => arity(args, 0).map(|_| Value::Bool(s.is_empty())),
        "to_i" => arity(args, 0).map(|_| Value::Int(parse_leading_int(s))),
        _ => return None,
    };
    Some(result)
}

fn class_method(id: ClassId, name: &str, args: &[Value]) -> BuiltinResult {
    match name {
        "new" if id == ClassId::OBJECT || id > ClassId::CLASS => Some(
            arity(args, 0).map(|_| Value::Object(Rc::new(Instance { class: id }))),
        ),
        _ => None,
    }
}

fn object_method(
    classes: &ClassTable,
    host: &mut dyn Host,
    recv: &Value,
    name: &str,
    args: &[Value],
) -> BuiltinResult {
    let result = match name {
        "puts" => {
            if args.is_empty() {
                host.write(b"\n");
            }
            for arg in args {
                let text = arg.to_s(classes);
                host.write(text.as_bytes());
                if !text.ends_with('\n') {
                    host.write(b"\n");
                }
            }
            Ok(Value::Nil)
        }
        "p" => {
            for arg in args {
                host.write(arg.inspect(classes).as_bytes());
                host.write(b"\n");
            }
            Ok(args.last().cloned().unwrap_or(Value::Nil))
        }
        "raise" => Err(match args {
            [] => Exception::runtime("unhandled exception"),
            [Value::Str(msg)] => Exception::runtime(msg.as_str()),
            [other] => Exception::type_error(alloc::format!(
                "exception class/object expected, got {}",
                other.inspect(classes)
            )),
            _ => Exception::arity(args.len(), 1),
        }),
        "inspect" => arity(args, 0).map(|_| Value::Str(recv.inspect(classes))),
        "to_s" => arity(args, 0).map(|_| Value::Str(recv.to_s(classes))),
        "class" => arity(args, 0).map(|_| Value::Class(recv.class_of())),
        "nil?" => arity(args, 0).map(|_| Value::Bool(recv.is_nil())),
        "!" => arity(args, 0).map(|_| Value::Bool(!recv.is_truthy())),
        "==" => one_arg(args).map(|other| Value::Bool(recv == other)),
        "!=" => one_arg(args).map(|other| Value::Bool(recv != other)),
        "name" => match recv {
            Value::Class(id) => arity(args, 0).map(|_| Value::Str(String::from(classes.name(*id)))),
            _ => return None,
        },
        _ => return None,
    };
    Some(result)
}

fn arity(args: &[Value], expected: usize) -> Result<(), Exception> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Exception::arity(args.len(), expected))
    }
}

fn one_arg(args: &[Value]) -> Result<&Value, Exception> {
    match args {
        [only] => Ok(only),
        _ => Err(Exception::arity(args.len(), 1)),
    }
}

/// `String#to_i`: optional sign and leading digits, 0 otherwise.
fn parse_leading_int(s: &str) -> i64 {
    let trimmed = s.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let mut value: i64 = 0;
    let collected: Vec<u8> = digits
        .bytes()
        .filter(|b| *b != b'_')
        .take_while(|b| b.is_ascii_digit())
        .collect();
    for digit in collected {
        value = value.saturating_mul(10).saturating_add((digit - b'0') as i64);
    }
    if negative {
        -value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[derive(Default)]
    struct Capture(Vec<u8>);

    impl Host for Capture {
        fn write(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }

        fn call_native(&mut self, _name: &str, _args: &[Value]) -> BuiltinResult {
            None
        }
    }

    fn send(recv: Value, name: &str, args: Vec<Value>) -> BuiltinResult {
        let classes = ClassTable::new();
        call(&classes, &mut Capture::default(), &recv, name, &args)
    }

    #[test]
    fn test_floor_division() {
        assert_eq!(integer_op("/", -7, 2), Some(Ok(Value::Int(-4))));
        assert_eq!(integer_op("%", -7, 2), Some(Ok(Value::Int(1))));
        assert_eq!(integer_op("%", 7, -2), Some(Ok(Value::Int(-1))));
        assert_eq!(integer_op("/", 1, 0), Some(Err(Exception::zero_division())));
        assert_eq!(integer_op("/", i64::MIN, -1), Some(Err(Exception::overflow())));
    }

    #[test]
    fn test_integer_type_errors() {
        let err = send(Value::Int(1), "+", vec![Value::Str("a".into())])
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: String can't be coerced into Integer");
        assert!(send(Value::Int(1), "frobnicate", vec![]).is_none());
    }

    #[test]
    fn test_string_methods() {
        let s = || Value::Str("abc".into());
        assert_eq!(send(s(), "upcase", vec![]), Some(Ok(Value::Str("ABC".into()))));
        assert_eq!(send(s(), "size", vec![]), Some(Ok(Value::Int(3))));
        assert_eq!(
            send(s(), "*", vec![Value::Int(2)]),
            Some(Ok(Value::Str("abcabc".into())))
        );
        assert_eq!(
            send(Value::Str(" -42x".into()), "to_i", vec![]),
            Some(Ok(Value::Int(-42)))
        );
    }

    #[test]
    fn test_string_size_limit() {
        let too_big = Exception::argument("argument too big");
        let ab = || Value::Str("ab".into());
        assert_eq!(send(ab(), "*", vec![Value::Int(1 << 62)]), Some(Err(too_big.clone())));
        assert_eq!(send(ab(), "*", vec![Value::Int(4_294_967_297)]), Some(Err(too_big.clone())));
        assert_eq!(
            send(ab(), "*", vec![Value::Int((MAX_STRING_LEN / 2) as i64 + 1)]),
            Some(Err(too_big.clone()))
        );
        match send(ab(), "*", vec![Value::Int((MAX_STRING_LEN / 2) as i64)]) {
            Some(Ok(Value::Str(out))) => assert_eq!(out.len(), MAX_STRING_LEN),
            other => panic!("expected string, got {:?}", other),
        }

        let big = Value::Str("x".repeat(MAX_STRING_LEN));
        assert_eq!(send(big, "+", vec![Value::Str("y".into())]), Some(Err(too_big)));
        assert_eq!(
            send(Value::Str("".into()), "*", vec![Value::Int(0)]),
            Some(Ok(Value::Str("".into())))
        );
    }

    #[test]
    fn test_puts_and_p() {
        let classes = ClassTable::new();
        let mut out = Capture::default();
        let result = call(&classes, &mut out, &Value::Main, "puts", &[Value::Str("hi".into()), Value::Nil]);
        assert_eq!(result, Some(Ok(Value::Nil)));
        let result = call(&classes, &mut out, &Value::Main, "p", &[Value::Str("hi".into())]);
        assert_eq!(result, Some(Ok(Value::Str("hi".into()))));
        assert_eq!(out.0, b"hi\n\n\"hi\"\n");
    }

    #[test]
    fn test_new_only_for_plain_classes() {
        assert!(send(Value::Class(ClassId::INTEGER), "new", vec![]).is_none());
        let obj = send(Value::Class(ClassId(8)), "new", vec![]).unwrap().unwrap();
        assert_eq!(obj.class_of(), ClassId(8));
    }
}
