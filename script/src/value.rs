//! Runtime values.

use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use core::fmt::Write;

use crate::class::{ClassId, ClassTable};

/// Instance of a user-defined class.
#[derive(Debug, PartialEq, Eq)]
pub struct Instance {
    pub class: ClassId,
}

/// Script value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(String),
    Class(ClassId),
    Object(Rc<Instance>),
    /// The top-level `self`.
    Main,
}

impl Value {
    /// Everything except `nil` and `false` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Class used for method lookup.
    pub fn class_of(&self) -> ClassId {
        match self {
            Value::Nil => ClassId::NIL,
            Value::Bool(true) => ClassId::TRUE,
            Value::Bool(false) => ClassId::FALSE,
            Value::Int(_) => ClassId::INTEGER,
            Value::Str(_) => ClassId::STRING,
            Value::Symbol(_) => ClassId::SYMBOL,
            Value::Class(_) => ClassId::CLASS,
            Value::Object(obj) => obj.class,
            Value::Main => ClassId::OBJECT,
        }
    }

    /// `inspect` representation.
    pub fn inspect(&self, classes: &ClassTable) -> String {
        match self {
            Value::Nil => String::from("nil"),
            Value::Str(s) => quote(s),
            Value::Symbol(s) => format!(":{}", s),
            other => other.to_s(classes),
        }
    }

    /// `to_s` representation.
    pub fn to_s(&self, classes: &ClassTable) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) | Value::Symbol(s) => s.clone(),
            Value::Class(id) => String::from(classes.name(*id)),
            Value::Object(obj) => format!("#<{}>", classes.name(obj.class)),
            Value::Main => String::from("main"),
        }
    }

    /// Receiver description used in `NoMethodError` messages.
    pub fn describe(&self, classes: &ClassTable) -> String {
        match self {
            Value::Nil => String::from("nil"),
            Value::Bool(b) => b.to_string(),
            Value::Main => String::from("main:Object"),
            Value::Class(id) => format!("class {}", classes.name(*id)),
            other => format!("an instance of {}", classes.name(other.class_of())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Main, Value::Main) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Double-quoted, escaped string literal.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x1b' => out.push_str("\\e"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect() {
        let classes = ClassTable::new();
        assert_eq!(Value::Nil.inspect(&classes), "nil");
        assert_eq!(Value::Int(-3).inspect(&classes), "-3");
        assert_eq!(Value::Str("a\"b\n".into()).inspect(&classes), "\"a\\\"b\\n\"");
        assert_eq!(Value::Symbol("x".into()).inspect(&classes), ":x");
        assert_eq!(Value::Class(ClassId::INTEGER).inspect(&classes), "Integer");
        assert_eq!(Value::Main.inspect(&classes), "main");
    }

    #[test]
    fn test_to_s_and_truthiness() {
        let classes = ClassTable::new();
        assert_eq!(Value::Nil.to_s(&classes), "");
        assert_eq!(Value::Str("raw".into()).to_s(&classes), "raw");
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
    }

    #[test]
    fn test_object_identity() {
        let a = Value::Object(Rc::new(Instance { class: ClassId::OBJECT }));
        let b = Value::Object(Rc::new(Instance { class: ClassId::OBJECT }));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(Value::Int(1), Value::Str("1".into()));
    }
}
