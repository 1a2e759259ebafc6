//! Exposed constructors API for the [`Interpreter`].

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Interpreter, DEFAULT_OUTPUT};
use crate::frame::DataFrame;
use crate::program::Program;
use crate::value::Comparison;

impl Interpreter {
    /// Create a machine for `program`, allocating the global frame from
    /// the entry function's frame size and positioning the instruction
    /// pointer at the entry address.
    pub fn new(program: Program) -> Self {
        let program = Rc::new(program);
        let entry = program.entry();

        let mut outputs = IndexMap::new();
        outputs.insert(DEFAULT_OUTPUT.to_string(), Vec::new());

        Self {
            ip: entry.address,
            running: false,
            jumped: false,
            suspended: false,
            frame: DataFrame::new(entry.frame_size).into_ref(),
            handler_frame: None,
            return_stack: Vec::new(),
            cmp: Comparison::Undefined,
            input: HashMap::new(),
            outputs,
            current_output: DEFAULT_OUTPUT.to_string(),
            named_results: IndexMap::new(),
            handlers: HashMap::new(),
            program,
        }
    }
}
