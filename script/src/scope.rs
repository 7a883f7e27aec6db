//! Top-level binding environment.
//!
//! A `Scope` maps top-level local variable names to slots in the VM's
//! persistent slot file. Scopes chain through `parent`; slot numbers keep
//! counting from the parent's stack pointer, so a child never shadows a
//! parent's slots.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// Accumulating top-level binding environment.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    parent: Option<Box<Scope>>,
    locals: Vec<String>,
}

impl Scope {
    /// Create a new scope chained to `parent`.
    pub fn new(parent: Option<Box<Scope>>) -> Self {
        Scope {
            parent,
            locals: Vec::new(),
        }
    }

    /// Parent scope, if any.
    pub fn parent(&self) -> Option<&Scope> {
        self.parent.as_deref()
    }

    /// Stack-pointer cursor: number of slots used by this chain.
    pub fn sp(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.sp()) + self.locals.len()
    }

    /// Resolve `name` to its slot, searching this scope then its parents.
    pub fn lookup(&self, name: &str) -> Option<u16> {
        if let Some(index) = self.locals.iter().position(|n| n == name) {
            let base = self.parent.as_ref().map_or(0, |p| p.sp());
            return u16::try_from(base + index).ok();
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Append names declared by a successfully compiled statement.
    pub fn commit(&mut self, names: Vec<String>) {
        for name in names {
            if !self.locals.iter().any(|n| *n == name) {
                self.locals.push(name);
            }
        }
    }

    /// Names declared directly in this scope, in slot order.
    pub fn locals(&self) -> &[String] {
        &self.locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_slots_continue_after_parent() {
        let mut root = Scope::new(None);
        root.commit(vec!["a".into(), "b".into()]);

        let mut child = Scope::new(Some(Box::new(root)));
        child.commit(vec!["c".into()]);

        assert_eq!(child.sp(), 3);
        assert_eq!(child.lookup("a"), Some(0));
        assert_eq!(child.lookup("c"), Some(2));
        assert_eq!(child.lookup("zz"), None);
        assert_eq!(child.parent().map(|p| p.sp()), Some(2));
    }

    #[test]
    fn test_commit_ignores_duplicates() {
        let mut scope = Scope::new(None);
        scope.commit(vec!["x".into()]);
        scope.commit(vec!["x".into(), "y".into()]);
        assert_eq!(scope.locals(), &["x", "y"]);
    }
}
