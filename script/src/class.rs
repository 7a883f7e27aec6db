//! Class table.
//!
//! Holds builtin and user-defined classes with their method tables. The
//! table lives in the VM context and survives every restart.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::bytecode::Irep;

/// Index into the class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u16);

impl ClassId {
    pub const OBJECT: ClassId = ClassId(0);
    pub const INTEGER: ClassId = ClassId(1);
    pub const STRING: ClassId = ClassId(2);
    pub const NIL: ClassId = ClassId(3);
    pub const TRUE: ClassId = ClassId(4);
    pub const FALSE: ClassId = ClassId(5);
    pub const SYMBOL: ClassId = ClassId(6);
    pub const CLASS: ClassId = ClassId(7);
}

const BUILTIN_CLASSES: [&str; 8] = [
    "Object",
    "Integer",
    "String",
    "NilClass",
    "TrueClass",
    "FalseClass",
    "Symbol",
    "Class",
];

/// One class.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<ClassId>,
    methods: HashMap<String, Rc<Irep>>,
}

impl ClassInfo {
    fn new(name: &str, superclass: Option<ClassId>) -> Self {
        ClassInfo {
            name: String::from(name),
            superclass,
            methods: HashMap::new(),
        }
    }

    /// Number of user-defined methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// All classes known to the VM.
#[derive(Debug, Clone)]
pub struct ClassTable {
    classes: Vec<ClassInfo>,
    by_name: HashMap<String, ClassId>,
}

impl ClassTable {
    /// Table with the builtin classes installed.
    pub fn new() -> Self {
        let mut table = ClassTable {
            classes: Vec::with_capacity(BUILTIN_CLASSES.len()),
            by_name: HashMap::new(),
        };
        for (index, name) in BUILTIN_CLASSES.iter().enumerate() {
            let superclass = if index == 0 { None } else { Some(ClassId::OBJECT) };
            table.insert(name, superclass);
        }
        table
    }

    fn insert(&mut self, name: &str, superclass: Option<ClassId>) -> ClassId {
        let id = ClassId(self.classes.len() as u16);
        self.classes.push(ClassInfo::new(name, superclass));
        self.by_name.insert(String::from(name), id);
        id
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassInfo> {
        self.classes.get(id.0 as usize)
    }

    /// Class name, or `"?"` for an unknown id.
    pub fn name(&self, id: ClassId) -> &str {
        self.get(id).map_or("?", |c| c.name.as_str())
    }

    /// Find a class by name.
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Open `name`, creating it as a subclass of `Object` if needed.
    pub fn define_class(&mut self, name: &str) -> Option<ClassId> {
        if let Some(id) = self.lookup(name) {
            return Some(id);
        }
        if self.classes.len() >= u16::MAX as usize {
            return None;
        }
        Some(self.insert(name, Some(ClassId::OBJECT)))
    }

    /// Define or replace a method.
    pub fn define_method(&mut self, class: ClassId, name: &str, body: Rc<Irep>) {
        if let Some(info) = self.classes.get_mut(class.0 as usize) {
            info.methods.insert(String::from(name), body);
        }
    }

    /// Resolve `name` on `class`, walking the superclass chain.
    pub fn find_method(&self, class: ClassId, name: &str) -> Option<Rc<Irep>> {
        let mut current = Some(class);
        while let Some(id) = current {
            let info = self.get(id)?;
            if let Some(body) = info.methods.get(name) {
                return Some(body.clone());
            }
            current = info.superclass;
        }
        None
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_installed() {
        let table = ClassTable::new();
        assert_eq!(table.lookup("Integer"), Some(ClassId::INTEGER));
        assert_eq!(table.name(ClassId::NIL), "NilClass");
        assert_eq!(table.get(ClassId::STRING).unwrap().superclass, Some(ClassId::OBJECT));
    }

    #[test]
    fn test_reopen_and_inherit() {
        let mut table = ClassTable::new();
        let foo = table.define_class("Foo").unwrap();
        assert_eq!(table.define_class("Foo"), Some(foo));

        table.define_method(ClassId::OBJECT, "greet", Rc::new(Irep::default()));
        assert!(table.find_method(foo, "greet").is_some());
        assert!(table.find_method(foo, "missing").is_none());

        table.define_method(foo, "greet", Rc::new(Irep {
            nregs: 2,
            ..Irep::default()
        }));
        assert_eq!(table.find_method(foo, "greet").unwrap().nregs, 2);
        assert_eq!(table.get(foo).unwrap().method_count(), 1);
    }
}
