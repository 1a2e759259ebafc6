//! Loaded program image.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;

use crate::opcode::OpCode;
use crate::value::Value;

/// Key of the implicit entry function in the function table.
pub const ENTRY_FUNCTION: i32 = -1;

/// Frame metadata of a single user-defined function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Index of the first instruction of the body.
    pub address: usize,
    /// Number of parameters copied from the caller's stack into the low
    /// registers.
    pub params_count: usize,
    /// Number of registers in a frame of this function; at least
    /// `params_count`.
    pub frame_size: usize,
}

/// Source mapping of an instruction back to the module and line it was
/// compiled from, captured from `; #module(line)` suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub module: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.module, self.line)
    }
}

/// Immutable output of the loader: the executable instruction list plus
/// everything the context runtime needs to set up frames and resolve
/// globals.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    shared_var_names: Vec<String>,
    data: Vec<Value>,
    functions: HashMap<i32, FunctionInfo>,
    instructions: Vec<OpCode>,
    source_map: HashMap<usize, SourceLocation>,
}

impl Program {
    pub(crate) fn new(
        shared_var_names: Vec<String>,
        data: Vec<Value>,
        functions: HashMap<i32, FunctionInfo>,
        instructions: Vec<OpCode>,
        source_map: HashMap<usize, SourceLocation>,
    ) -> Self {
        Self {
            shared_var_names,
            data,
            functions,
            instructions,
            source_map,
        }
    }

    /// Names of the shared variables, in declaration order; their position
    /// is their register in the global frame.
    pub fn shared_var_names(&self) -> &[String] {
        &self.shared_var_names
    }

    /// Constant data arrays, in declaration order.
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn functions(&self) -> &HashMap<i32, FunctionInfo> {
        &self.functions
    }

    pub fn function(&self, key: i32) -> Option<FunctionInfo> {
        self.functions.get(&key).copied()
    }

    /// The implicit entry function.
    pub fn entry(&self) -> FunctionInfo {
        self.function(ENTRY_FUNCTION)
            .expect("loader guarantees an entry function")
    }

    pub fn instructions(&self) -> &[OpCode] {
        &self.instructions
    }

    pub fn source_location(&self, index: usize) -> Option<&SourceLocation> {
        self.source_map.get(&index)
    }

    /// Textual rendering of the instruction list and function table, used
    /// for diagnostics. Jump and call targets print as resolved numeric
    /// addresses.
    pub fn disassemble(&self) -> String {
        let functions = self
            .functions
            .iter()
            .sorted_by_key(|(key, _)| **key)
            .map(|(key, info)| {
                format!(
                    "; fn {key}: address={} params={} frame={}",
                    info.address, info.params_count, info.frame_size
                )
            })
            .join("\n");

        let instructions = self
            .instructions
            .iter()
            .enumerate()
            .map(|(index, op)| match self.source_location(index) {
                Some(location) => format!("{op} ; #{}({})", location.module, location.line),
                None => op.to_string(),
            })
            .join("\n");

        format!("{functions}\n{instructions}\n")
    }
}
