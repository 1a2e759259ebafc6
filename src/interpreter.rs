//! [`Interpreter`] implementation.
//!
//! One instance owns the whole context runtime: the frame chain, the
//! instruction pointer, text/named outputs and event handlers. It is also
//! the handle native functions receive: they consume and produce values
//! through its stack API and may suspend or re-enter the machine.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{EvaluatorError, FaultKind, RuntimeError};
use crate::frame::{global_frame, FrameRef};
use crate::program::Program;
use crate::value::{ArrayRef, Comparison, FunctionRef, HashRef, IterRef, Value};

mod alu;
mod constructors;
mod data;
mod executors;
mod flow;
mod output;

/// Name of the text output context that always exists.
pub const DEFAULT_OUTPUT: &str = "default";

/// The virtual machine: execution engine state plus the context runtime
/// owning frames, outputs and event handlers.
pub struct Interpreter {
    program: Rc<Program>,
    ip: usize,
    running: bool,
    /// Set by any handler that assigned `ip`; suppresses the implicit
    /// advance after the instruction.
    jumped: bool,
    suspended: bool,
    frame: FrameRef,
    /// Frame of an in-flight external-event handler; its return
    /// re-suspends the machine.
    handler_frame: Option<FrameRef>,
    return_stack: Vec<usize>,
    cmp: Comparison,
    input: HashMap<String, Value>,
    outputs: IndexMap<String, Vec<String>>,
    current_output: String,
    named_results: IndexMap<String, JsonValue>,
    handlers: HashMap<String, Rc<FunctionRef>>,
}

impl Interpreter {
    /// The loaded program this machine executes.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// True while the machine is parked on a suspension point.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Number of in-flight non-global calls.
    pub fn call_depth(&self) -> usize {
        self.return_stack.len()
    }

    /// Result of the most recent comparison opcode.
    pub fn last_comparison(&self) -> Comparison {
        self.cmp
    }

    /// Read a shared variable by name.
    pub fn shared(&self, name: &str) -> Result<Value, EvaluatorError> {
        let register = self.shared_index(name).map_err(|kind| self.host_fault(kind))?;
        let global = global_frame(&self.frame);
        let value = global.borrow().register(register);

        value
            .ok_or(FaultKind::InvalidRegister(register))
            .map_err(|kind| self.host_fault(kind))
    }

    /// Write a shared variable by name.
    pub fn set_shared(&mut self, name: &str, value: impl Into<Value>) -> Result<(), EvaluatorError> {
        let register = self.shared_index(name).map_err(|kind| self.host_fault(kind))?;
        let global = global_frame(&self.frame);
        let stored = global.borrow_mut().set_register(register, value.into());

        if stored {
            Ok(())
        } else {
            Err(self.host_fault(FaultKind::InvalidRegister(register)))
        }
    }

    fn shared_index(&self, name: &str) -> Result<usize, FaultKind> {
        self.program
            .shared_var_names()
            .iter()
            .position(|candidate| candidate == name)
            .ok_or_else(|| FaultKind::UnknownSharedVariable(name.to_string()))
    }

    /// Install the legacy named input dictionary, converting host values
    /// into machine values up front.
    pub fn set_input<I>(&mut self, data: I)
    where
        I: IntoIterator<Item = (String, JsonValue)>,
    {
        self.input = data
            .into_iter()
            .map(|(name, value)| (name, Value::from(&value)))
            .collect();
    }

    /// Read a named input value.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.input.get(name)
    }

    /// Text output contexts; `"default"` is always present.
    pub fn text_results(&self) -> &IndexMap<String, Vec<String>> {
        &self.outputs
    }

    /// Results published by `emit.named`, as host values.
    pub fn named_results(&self) -> &IndexMap<String, JsonValue> {
        &self.named_results
    }

    /// Register a handler for an external event. Natives use this through
    /// the `events` module; hosts may pre-register handlers directly.
    pub fn set_event_handler(&mut self, name: String, handler: Rc<FunctionRef>) {
        debug!(name, address = handler.address(), "event handler installed");
        self.handlers.insert(name, handler);
    }

    /// Stop the dispatch loop at the next instruction boundary, parking
    /// the machine on a suspension point. Only meaningful from native
    /// functions.
    pub fn suspend(&mut self) {
        debug!(ip = self.ip, "suspended");
        self.running = false;
        self.suspended = true;
    }

    // ---- stack API used by opcode handlers and native functions ----

    /// Push onto the current frame's operand stack.
    pub fn push(&mut self, value: Value) {
        self.frame.borrow_mut().push(value);
    }

    /// Pop from the current frame's operand stack.
    pub fn pop(&mut self) -> Result<Value, FaultKind> {
        self.frame
            .borrow_mut()
            .pop()
            .ok_or(FaultKind::StackUnderflow)
    }

    pub fn pop_number(&mut self) -> Result<f64, FaultKind> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            other => Err(FaultKind::TypeMismatch {
                expected: "number",
                found: other.kind_name(),
            }),
        }
    }

    pub fn pop_text(&mut self) -> Result<String, FaultKind> {
        match self.pop()? {
            Value::Text(s) => Ok(s),
            other => Err(FaultKind::TypeMismatch {
                expected: "text",
                found: other.kind_name(),
            }),
        }
    }

    /// Pop with truthiness coercion; never fails on a variant.
    pub fn pop_boolean(&mut self) -> Result<bool, FaultKind> {
        Ok(self.pop()?.as_boolean())
    }

    pub fn pop_date(&mut self) -> Result<NaiveDateTime, FaultKind> {
        match self.pop()? {
            Value::Date(d) => Ok(d),
            other => Err(FaultKind::TypeMismatch {
                expected: "date",
                found: other.kind_name(),
            }),
        }
    }

    pub fn pop_array(&mut self) -> Result<ArrayRef, FaultKind> {
        match self.pop()? {
            Value::Array(items) => Ok(items),
            other => Err(FaultKind::TypeMismatch {
                expected: "array",
                found: other.kind_name(),
            }),
        }
    }

    pub fn pop_hash(&mut self) -> Result<HashRef, FaultKind> {
        match self.pop()? {
            Value::Hash(entries) => Ok(entries),
            other => Err(FaultKind::TypeMismatch {
                expected: "hash",
                found: other.kind_name(),
            }),
        }
    }

    pub fn pop_iterator(&mut self) -> Result<IterRef, FaultKind> {
        match self.pop()? {
            Value::Iterator(iter) => Ok(iter),
            other => Err(FaultKind::TypeMismatch {
                expected: "iterator",
                found: other.kind_name(),
            }),
        }
    }

    pub fn pop_function(&mut self) -> Result<Rc<FunctionRef>, FaultKind> {
        match self.pop()? {
            Value::Function(fref) => Ok(fref),
            other => Err(FaultKind::TypeMismatch {
                expected: "function",
                found: other.kind_name(),
            }),
        }
    }

    // ---- error envelopes ----

    /// Wrap a fault into its runtime envelope at the current machine
    /// position.
    pub(crate) fn fault(&self, opcode: String, kind: FaultKind) -> RuntimeError {
        RuntimeError {
            index: self.ip,
            opcode,
            kind,
            location: self.program.source_location(self.ip).cloned(),
            frame_dump: self.frame.borrow().dump(),
        }
    }

    /// Envelope for faults raised outside the dispatch loop (host API
    /// calls).
    pub(crate) fn host_fault(&self, kind: FaultKind) -> EvaluatorError {
        let opcode = self
            .program
            .instructions()
            .get(self.ip)
            .map(|op| op.to_string())
            .unwrap_or_else(|| "-".to_string());

        EvaluatorError::Runtime(self.fault(opcode, kind))
    }
}
