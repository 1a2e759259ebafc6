//! Control flow: jumps, calls and returns, closures, suspension,
//! external events and nested re-entrant execution.

use std::rc::Rc;

use tracing::debug;

use super::Interpreter;
use crate::error::{EvaluatorError, FaultKind};
use crate::frame::{DataFrame, FrameRef};
use crate::modules::{NativeFunction, EXIT_EVENT};
use crate::opcode::CompareOp;
use crate::value::{FunctionRef, Value};

impl Interpreter {
    pub(crate) fn jump(&mut self, target: usize) -> Result<(), FaultKind> {
        self.ip = target;
        self.jumped = true;
        Ok(())
    }

    /// Pop the two operands, compare, and jump iff the predicate holds.
    pub(crate) fn cond_jump(&mut self, op: CompareOp, target: usize) -> Result<(), FaultKind> {
        let b = self.pop()?;
        let a = self.pop()?;

        self.cmp = a.compare(&b);

        if super::alu::predicate_holds(op, self.cmp) {
            self.ip = target;
            self.jumped = true;
        }

        Ok(())
    }

    pub(crate) fn call(&mut self, address: i32) -> Result<(), FaultKind> {
        self.enter_function(address, None, None, self.ip + 1)?;
        self.jumped = true;
        Ok(())
    }

    /// Pop a function reference and call through it, binding its receiver
    /// and captured closure.
    pub(crate) fn invoke(&mut self) -> Result<(), FaultKind> {
        let fref = self.pop_function()?;

        self.enter_function(
            fref.address(),
            fref.receiver_value(),
            fref.closure_frame(),
            self.ip + 1,
        )?;
        self.jumped = true;
        Ok(())
    }

    /// Frame setup shared by every way of entering a function: allocate
    /// the callee frame, pop the arguments into its low registers (the
    /// first argument ends up in register 0), link it into the chain and
    /// jump to the body.
    ///
    /// A bound receiver occupies register 0, the bottom of the parameter
    /// window, and the stack then only supplies the remaining parameters.
    fn enter_function(
        &mut self,
        address: i32,
        receiver: Option<Value>,
        closure: Option<FrameRef>,
        return_address: usize,
    ) -> Result<(), FaultKind> {
        let info = self
            .program
            .function(address)
            .ok_or(FaultKind::UnknownFunctionAddress(address))?;

        let child = DataFrame::with_links(info.frame_size, Some(Rc::clone(&self.frame)), closure)
            .into_ref();

        {
            let mut callee = child.borrow_mut();
            let mut caller = self.frame.borrow_mut();

            let lowest = usize::from(receiver.is_some());
            for register in (lowest..info.params_count).rev() {
                let argument = caller.pop().ok_or(FaultKind::StackUnderflow)?;

                if !callee.set_register(register, argument) {
                    return Err(FaultKind::InvalidRegister(register));
                }
            }

            if let Some(receiver) = receiver {
                if info.params_count > 0 && !callee.set_register(0, receiver) {
                    return Err(FaultKind::InvalidRegister(0));
                }
            }
        }

        self.return_stack.push(return_address);
        self.frame = child;
        self.ip = info.address;
        Ok(())
    }

    /// Return from the current frame.
    ///
    /// Single-result convention: if the callee left a value on its stack,
    /// the topmost one is moved to the caller. A frame flagged as
    /// referenced stops only the inner dispatch loop it was started by; a
    /// returning event handler re-suspends the machine.
    pub(crate) fn ret(&mut self) -> Result<(), FaultKind> {
        let return_address = self
            .return_stack
            .pop()
            .ok_or(FaultKind::ReturnWithoutCall)?;

        let returning = Rc::clone(&self.frame);
        let caller = returning
            .borrow()
            .caller()
            .ok_or(FaultKind::ReturnWithoutCall)?;

        if let Some(result) = returning.borrow_mut().pop() {
            caller.borrow_mut().push(result);
        }

        if returning.borrow().is_referenced() {
            returning.borrow_mut().set_referenced(false);
            self.running = false;
            debug!("nested execution finished");
        }

        if self
            .handler_frame
            .as_ref()
            .is_some_and(|handler| Rc::ptr_eq(handler, &returning))
        {
            self.handler_frame = None;
            self.suspend();
        }

        self.frame = caller;
        self.ip = return_address;
        self.jumped = true;
        Ok(())
    }

    pub(crate) fn call_native(&mut self, function: &NativeFunction) -> Result<(), FaultKind> {
        debug!(%function, "native call");
        function.call(self)
    }

    /// Run a script callback on behalf of a native function and return
    /// its result.
    ///
    /// The callback executes on this machine in a fresh pass of the
    /// dispatch loop; its frame is flagged so that its `ret` stops only
    /// that inner pass, after which the suspended native call resumes.
    pub fn execute_function_ref(
        &mut self,
        fref: &FunctionRef,
        args: &[Value],
    ) -> Result<Value, FaultKind> {
        debug!(address = fref.address(), "nested execution requested");

        let base_depth = self.frame.borrow().stack_len();

        for arg in args {
            self.push(arg.clone());
        }

        self.enter_function(
            fref.address(),
            fref.receiver_value(),
            fref.closure_frame(),
            // The pending advance of the interrupted instruction resumes
            // the caller, so the callback returns to the call site itself.
            self.ip,
        )?;
        self.frame.borrow_mut().set_referenced(true);
        self.running = true;

        self.run_loop()
            .map_err(|envelope| FaultKind::Nested(Box::new(envelope)))?;
        self.running = true;

        // Only the callback's own result may be taken; a callback that
        // returned nothing must not consume the native caller's operands.
        let mut frame = self.frame.borrow_mut();
        if frame.stack_len() > base_depth {
            Ok(frame.pop().unwrap_or(Value::Empty))
        } else {
            Ok(Value::Empty)
        }
    }

    /// Deliver an external event to the suspended machine.
    ///
    /// With a registered handler, the payload is pushed, the handler runs
    /// as a regular call, and the machine re-suspends when it returns,
    /// unless the event is the terminal `"exit"` event, in which case
    /// execution resumes at the suspension point and runs on. Without a
    /// handler this is a no-op.
    ///
    /// Returns the machine's top-of-stack value, if any.
    pub fn raise_event(
        &mut self,
        name: &str,
        payload: impl Into<Value>,
    ) -> Result<Option<Value>, EvaluatorError> {
        let Some(handler) = self.handlers.get(name).cloned() else {
            debug!(name, "external event without a handler");
            return Ok(None);
        };

        debug!(name, "external event");
        self.push(payload.into());

        self.enter_function(
            handler.address(),
            handler.receiver_value(),
            handler.closure_frame(),
            // Resume point recorded at suspension.
            self.ip,
        )
        .map_err(|kind| self.host_fault(kind))?;

        if name != EXIT_EVENT {
            self.handler_frame = Some(Rc::clone(&self.frame));
        }

        self.running = true;
        self.suspended = false;
        debug!("resumed");

        self.run_loop()?;

        if !self.suspended {
            self.running = false;
            debug!("execution stopped");
        }

        Ok(self.frame.borrow_mut().pop())
    }
}
