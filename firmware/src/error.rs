//! Engine error types.

use core::fmt;

use mmrb_script::{BytecodeError, CompileError};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The arena cannot satisfy an allocation.
    OutOfMemory { requested: usize, available: usize },
    /// `provision` was called twice.
    AlreadyProvisioned,
    /// The VM context could not be created.
    VmOpenFailure,
    /// A blob failed the structural check.
    IllegalBytecode(BytecodeError),
    /// A statement did not compile.
    CompileFailure(CompileError),
    /// Operation not valid in the current VM state.
    InvalidVmState(&'static str),
    /// A logger was already installed.
    Logger,
}

impl EngineError {
    /// Whether the error ends the shell session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::IllegalBytecode(_) | EngineError::CompileFailure(_)
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::OutOfMemory { .. } => write!(f, "Error: Out of memory."),
            EngineError::AlreadyProvisioned => write!(f, "Error: Heap already provisioned."),
            EngineError::VmOpenFailure => write!(f, "Error: Can't open VM."),
            EngineError::IllegalBytecode(_) => write!(f, "Error: Illegal bytecode."),
            EngineError::CompileFailure(err) => write!(f, "{}", err),
            EngineError::InvalidVmState(what) => write!(f, "Error: Invalid VM state ({}).", what),
            EngineError::Logger => write!(f, "Error: Logger already installed."),
        }
    }
}

impl From<CompileError> for EngineError {
    fn from(err: CompileError) -> Self {
        EngineError::CompileFailure(err)
    }
}

impl From<BytecodeError> for EngineError {
    fn from(err: BytecodeError) -> Self {
        EngineError::IllegalBytecode(err)
    }
}
