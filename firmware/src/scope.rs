//! Session scope.
//!
//! Pairs the compiler's accumulating binding `Scope` with the buffer
//! holding the most recently compiled blob. A statement only changes
//! either one after it has compiled and its blob is stored in the arena.

use log::trace;
use mmrb_script::{Compiler, Scope, StreamSource};

use crate::arena::LockedArena;
use crate::error::{EngineError, EngineResult};

/// Bindings and compiled code for one shell session.
pub struct SessionScope {
    scope: Scope,
    vm_code: Option<&'static [u8]>,
    statements: u32,
}

impl SessionScope {
    pub fn new() -> Self {
        SessionScope {
            scope: Scope::new(None),
            vm_code: None,
            statements: 0,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Blob of the last successful compile.
    pub fn vm_code(&self) -> Option<&'static [u8]> {
        self.vm_code
    }

    /// Top-level slots bound so far.
    pub fn sp(&self) -> usize {
        self.scope.sp()
    }

    /// Statements compiled successfully.
    pub fn statements(&self) -> u32 {
        self.statements
    }

    /// Compile `line` and store its blob in the arena.
    ///
    /// On any error the scope and the stored blob are left as they were.
    pub fn compile(
        &mut self,
        compiler: &Compiler,
        arena: &LockedArena,
        line: &str,
    ) -> EngineResult<&'static [u8]> {
        let mut source = StreamSource::memory(line);
        let compiled = compiler.compile(&self.scope, &mut source);
        source.release();
        let unit = compiled.map_err(EngineError::CompileFailure)?;

        let region = arena.allocate(unit.code.len())?;
        region.copy_from_slice(&unit.code);
        let blob: &'static [u8] = region;

        self.scope.commit(unit.locals);
        self.vm_code = Some(blob);
        self.statements += 1;
        trace!("[SCOPE] stored {} byte blob, sp {}", blob.len(), self.scope.sp());
        Ok(blob)
    }
}

impl Default for SessionScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec;

    fn arena(len: usize) -> LockedArena {
        let arena = LockedArena::empty();
        arena.provision(Box::leak(vec![0u8; len].into_boxed_slice())).unwrap();
        arena
    }

    #[test]
    fn test_commit_on_success() {
        let arena = arena(4096);
        let mut scope = SessionScope::new();
        let blob = scope.compile(&Compiler::new(), &arena, "a = 1").unwrap();
        assert_eq!(&blob[..4], b"MRBS");
        assert_eq!(scope.sp(), 1);
        assert_eq!(scope.vm_code(), Some(blob));
        assert_eq!(arena.stats().used, blob.len());
    }

    #[test]
    fn test_compile_failure_changes_nothing() {
        let arena = arena(4096);
        let mut scope = SessionScope::new();
        let first = scope.compile(&Compiler::new(), &arena, "a = 1").unwrap();
        let used = arena.stats().used;

        let err = scope.compile(&Compiler::new(), &arena, "b = (").unwrap_err();
        assert!(matches!(err, EngineError::CompileFailure(_)));
        assert_eq!(scope.sp(), 1);
        assert_eq!(scope.scope().lookup("b"), None);
        assert_eq!(scope.vm_code(), Some(first));
        assert_eq!(arena.stats().used, used);
    }

    #[test]
    fn test_out_of_memory_changes_nothing() {
        let arena = arena(8);
        let mut scope = SessionScope::new();
        let err = scope.compile(&Compiler::new(), &arena, "a = 1").unwrap_err();
        assert!(matches!(err, EngineError::OutOfMemory { .. }));
        assert_eq!(scope.sp(), 0);
        assert_eq!(scope.vm_code(), None);
        assert_eq!(scope.statements(), 0);
    }
}
