//! Dispatch loop and instruction-to-handler routing.

use std::rc::Rc;

use tracing::{debug, trace};

use super::Interpreter;
use crate::error::{EvaluatorError, FaultKind, RuntimeError};
use crate::opcode::OpCode;
use crate::state::ProgramState;

impl Interpreter {
    /// Execute until the natural end of the instruction stream, a
    /// suspension, or a fault. The machine state is invalid after an
    /// error.
    pub fn run(&mut self) -> Result<ProgramState, EvaluatorError> {
        self.running = true;
        self.suspended = false;

        self.run_loop()?;

        let state = if self.suspended {
            ProgramState::Suspended
        } else {
            self.running = false;
            ProgramState::Ended
        };

        debug!(?state, ip = self.ip, "execution stopped");
        Ok(state)
    }

    /// One pass of the dispatch loop: runs while the machine is flagged
    /// running and instructions remain. Re-entered for nested execution
    /// and event delivery.
    pub(crate) fn run_loop(&mut self) -> Result<(), RuntimeError> {
        let program = Rc::clone(&self.program);
        let instructions = program.instructions();

        while self.running && self.ip < instructions.len() {
            let op = &instructions[self.ip];
            trace!(ip = self.ip, %op, "execute");

            self.instruction(op)?;

            if self.jumped {
                self.jumped = false;
            } else {
                self.ip += 1;
            }
        }

        Ok(())
    }

    fn instruction(&mut self, op: &OpCode) -> Result<(), RuntimeError> {
        self.dispatch(op)
            .map_err(|kind| self.fault(op.to_string(), kind))
    }

    fn dispatch(&mut self, op: &OpCode) -> Result<(), FaultKind> {
        match op {
            OpCode::Load(operand) => self.load(operand),
            OpCode::LoadGlobal(register) => self.load_global(*register),
            OpCode::LoadOuter { level, register } => self.load_outer(*level, *register),
            OpCode::LoadConst(value) => {
                self.push(value.clone());
                Ok(())
            }
            OpCode::LoadData(index) => self.load_data(*index),
            OpCode::Dup => self.dup(),
            OpCode::Unload => self.pop().map(|_| ()),
            OpCode::Store(register) => self.store(*register),
            OpCode::StoreGlobal(register) => self.store_global(*register),
            OpCode::StoreOuter { level, register } => self.store_outer(*level, *register),
            OpCode::Reset(register) => self.reset(*register),
            OpCode::MakeArray(count) => self.make_array(*count),
            OpCode::MakeHash(count) => self.make_hash(*count),
            OpCode::MakeRef(address) => self.make_ref(*address),
            OpCode::BindRefs => self.bind_refs(),
            OpCode::Get => self.get(),
            OpCode::Set => self.set(),
            OpCode::GetIndex(index) => self.get_index(index),
            OpCode::SetIndex(index) => self.set_index(index),
            OpCode::SetOp(op) => self.set_op(*op),
            OpCode::Arith(op) => self.arith(*op),
            OpCode::Concat => self.concat(),
            OpCode::Format => Err(FaultKind::ReservedOpcode("format")),
            OpCode::Compare(op) => self.compare(*op),
            OpCode::Logic(op) => self.logic(*op),
            OpCode::Jump(target) => self.jump(*target),
            OpCode::CondJump(op, target) => self.cond_jump(*op, *target),
            OpCode::Emit => self.emit(),
            OpCode::EmitNamed(key) => self.emit_named(key),
            OpCode::CallNative(function) => self.call_native(function),
            OpCode::Call(address) => self.call(*address),
            OpCode::Invoke => self.invoke(),
            OpCode::Ret => self.ret(),
        }
    }
}
