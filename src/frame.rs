//! Per-call activation records.

use std::cell::RefCell;
use std::rc::Rc;

use itertools::Itertools;

use crate::value::Value;

/// Shared handle to a frame.
///
/// Frames are shared: the machine holds the current one, callees link back
/// to their caller, and function references may capture one as a closure
/// that outlives its dynamic extent.
pub type FrameRef = Rc<RefCell<DataFrame>>;

/// Activation record: a fixed register file plus an operand stack, linked
/// to the frame that created it and, for closures, to the frame captured
/// at reference creation.
#[derive(Debug, Default)]
pub struct DataFrame {
    registers: Vec<Value>,
    stack: Vec<Value>,
    caller: Option<FrameRef>,
    closure: Option<FrameRef>,
    referenced: bool,
}

impl DataFrame {
    /// A detached frame with `size` registers, all `Empty`.
    pub fn new(size: usize) -> Self {
        Self {
            registers: vec![Value::Empty; size],
            ..Self::default()
        }
    }

    /// A frame linked into a call chain.
    pub fn with_links(size: usize, caller: Option<FrameRef>, closure: Option<FrameRef>) -> Self {
        Self {
            registers: vec![Value::Empty; size],
            caller,
            closure,
            ..Self::default()
        }
    }

    pub fn into_ref(self) -> FrameRef {
        Rc::new(RefCell::new(self))
    }

    /// A frame is global iff nothing called it.
    pub fn is_global(&self) -> bool {
        self.caller.is_none()
    }

    pub fn caller(&self) -> Option<FrameRef> {
        self.caller.clone()
    }

    pub fn closure(&self) -> Option<FrameRef> {
        self.closure.clone()
    }

    /// Marks a frame entered through a nested re-entrant call from a
    /// native function; its return exits only the inner dispatch loop.
    pub(crate) fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub(crate) fn set_referenced(&mut self, referenced: bool) {
        self.referenced = referenced;
    }

    pub fn register(&self, index: usize) -> Option<Value> {
        self.registers.get(index).cloned()
    }

    #[must_use]
    pub fn set_register(&mut self, index: usize, value: Value) -> bool {
        match self.registers.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<Value> {
        self.stack.last().cloned()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Stringified stack and registers for runtime error envelopes.
    pub fn dump(&self) -> Vec<String> {
        vec![
            format!("stack: [{}]", self.stack.iter().map(|v| v.to_string()).join(", ")),
            format!(
                "registers: [{}]",
                self.registers.iter().map(|v| v.to_string()).join(", ")
            ),
        ]
    }
}

/// Walk caller links to the root of the chain.
pub fn global_frame(frame: &FrameRef) -> FrameRef {
    let mut current = Rc::clone(frame);

    loop {
        let caller = current.borrow().caller();
        match caller {
            Some(up) => current = up,
            None => return current,
        }
    }
}
