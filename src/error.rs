//! Load-time and runtime error surface.

use std::fmt;

use thiserror::Error;

use crate::program::SourceLocation;

/// Loader failure bound to the 1-based source line that caused it.
///
/// No partial [`crate::program::Program`] is ever produced alongside one of
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct LoadError {
    /// 1-based line number in the program text.
    pub line: usize,
    /// What went wrong.
    pub kind: LoadErrorKind,
}

impl LoadError {
    pub(crate) const fn new(line: usize, kind: LoadErrorKind) -> Self {
        Self { line, kind }
    }
}

/// Loader failure variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LoadErrorKind {
    #[error("unknown directive: .{0}")]
    UnknownDirective(String),
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),
    #[error("invalid numeric literal: {0}")]
    InvalidNumber(String),
    #[error("unresolved label: {0}")]
    UnresolvedLabel(String),
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("unknown constant: {module}::{name}")]
    UnknownConstant { module: String, name: String },
    #[error("unknown native function: {module}::{name}")]
    UnknownNative { module: String, name: String },
    #[error("invalid data entry: {0}")]
    InvalidDataEntry(String),
    #[error("missing .entry directive")]
    MissingEntry,
    #[error("read error: {0}")]
    Io(String),
}

/// Runtime fault variants raised by opcode handlers and native functions.
///
/// A fault carries no execution context on its own; the dispatch loop wraps
/// it into a [`RuntimeError`] envelope before it escapes the machine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FaultKind {
    #[error("operand stack is empty")]
    StackUnderflow,
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("unknown shared variable: {0}")]
    UnknownSharedVariable(String),
    #[error("register {0} out of bounds")]
    InvalidRegister(usize),
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("no function at address {0}")]
    UnknownFunctionAddress(i32),
    #[error("return without an active call")]
    ReturnWithoutCall,
    #[error("no enclosing frame at level {0}")]
    MissingOuterFrame(usize),
    #[error("cannot iterate over {0}")]
    InvalidIteratorTarget(&'static str),
    #[error("invalid date difference unit: {0}")]
    InvalidDateUnit(String),
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("{0} has no host representation")]
    Unconvertible(&'static str),
    #[error("aggregate nesting too deep")]
    NestingTooDeep,
    #[error("reserved opcode: {0}")]
    ReservedOpcode(&'static str),
    /// A script callback executed on behalf of a native function failed.
    #[error(transparent)]
    Nested(Box<RuntimeError>),
}

/// Execution failure envelope: the fault plus the machine context it was
/// raised in. The VM state is invalid after one of these; the host should
/// discard the interpreter.
#[derive(Debug, Error)]
pub struct RuntimeError {
    /// Instruction index the machine was executing.
    pub index: usize,
    /// Printable form of the failing opcode.
    pub opcode: String,
    /// The underlying fault.
    #[source]
    pub kind: FaultKind,
    /// Source mapping for the failing instruction, when the program text
    /// carried one.
    pub location: Option<SourceLocation>,
    /// Stringified operand stack and registers of the current frame.
    pub frame_dump: Vec<String>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at instruction {} ({})", self.index, self.opcode)?;

        if let Some(location) = &self.location {
            write!(f, " [{location}]")?;
        }

        write!(f, ": {}", self.kind)?;

        for line in &self.frame_dump {
            write!(f, "\n  {line}")?;
        }

        Ok(())
    }
}

/// Single host-facing error kind assembled from either side of the
/// load/execute boundary.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl EvaluatorError {
    /// The underlying runtime fault, if this is a runtime failure.
    pub fn fault(&self) -> Option<&FaultKind> {
        match self {
            Self::Runtime(e) => Some(&e.kind),
            Self::Load(_) => None,
        }
    }

    /// Line number of the offending program-text line, for load failures.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Load(e) => Some(e.line),
            Self::Runtime(_) => None,
        }
    }
}
