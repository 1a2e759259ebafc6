//! Stack-based bytecode virtual machine for compiled script sequences.
//!
//! The crate covers three tightly coupled pieces: a [`loader`] that links
//! textual assembly-style bytecode into an executable [`program::Program`],
//! an execution engine dispatching over a tagged [`value::Value`] model,
//! and the [`interpreter::Interpreter`] context runtime owning frames,
//! outputs, suspension and external-event delivery.

pub mod error;
pub mod frame;
pub mod interpreter;
pub mod loader;
pub mod modules;
pub mod opcode;
pub mod program;
pub mod state;
pub mod value;

pub mod prelude {
    pub use crate::error::{EvaluatorError, FaultKind, LoadError, LoadErrorKind, RuntimeError};
    pub use crate::frame::{global_frame, DataFrame, FrameRef};
    pub use crate::interpreter::{Interpreter, DEFAULT_OUTPUT};
    pub use crate::loader::{load, Loader};
    pub use crate::modules::{ModuleRegistry, NativeFunction, NativeModule, DEFAULT_MODULE};
    pub use crate::opcode::{ArithOp, CompareOp, IndexArg, LogicOp, OpCode, Operand};
    pub use crate::program::{FunctionInfo, Program, SourceLocation, ENTRY_FUNCTION};
    pub use crate::state::ProgramState;
    pub use crate::value::{Comparison, FunctionRef, Value, ValueIter};
}
