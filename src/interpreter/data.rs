//! Data movement: registers, literals, aggregates and element access.

use std::rc::Rc;

use indexmap::IndexMap;

use super::Interpreter;
use crate::error::FaultKind;
use crate::frame::{global_frame, FrameRef};
use crate::opcode::{ArithOp, IndexArg, Operand};
use crate::value::{FunctionRef, Value};

impl Interpreter {
    pub(crate) fn load(&mut self, operand: &Operand) -> Result<(), FaultKind> {
        let value = match operand {
            Operand::Register(register) => self.register(*register)?,
            Operand::Text(s) => Value::Text(s.clone()),
            Operand::Number(n) => Value::Number(*n),
        };

        self.push(value);
        Ok(())
    }

    fn register(&self, register: usize) -> Result<Value, FaultKind> {
        self.frame
            .borrow()
            .register(register)
            .ok_or(FaultKind::InvalidRegister(register))
    }

    pub(crate) fn load_global(&mut self, register: usize) -> Result<(), FaultKind> {
        let global = global_frame(&self.frame);
        let value = global
            .borrow()
            .register(register)
            .ok_or(FaultKind::InvalidRegister(register))?;

        self.push(value);
        Ok(())
    }

    pub(crate) fn load_outer(&mut self, level: usize, register: usize) -> Result<(), FaultKind> {
        let frame = self.outer_frame(level)?;
        let value = frame
            .borrow()
            .register(register)
            .ok_or(FaultKind::InvalidRegister(register))?;

        self.push(value);
        Ok(())
    }

    /// Resolve a frame `level` hops out, preferring the closure link over
    /// the caller link on each hop.
    fn outer_frame(&self, level: usize) -> Result<FrameRef, FaultKind> {
        let mut frame = Rc::clone(&self.frame);

        for _ in 0..level {
            let next = {
                let current = frame.borrow();
                current.closure().or_else(|| current.caller())
            };

            frame = next.ok_or(FaultKind::MissingOuterFrame(level))?;
        }

        Ok(frame)
    }

    pub(crate) fn load_data(&mut self, index: usize) -> Result<(), FaultKind> {
        let value = self
            .program
            .data()
            .get(index)
            .cloned()
            .ok_or(FaultKind::IndexOutOfRange {
                index: index as i64,
                len: self.program.data().len(),
            })?;

        self.push(value);
        Ok(())
    }

    pub(crate) fn dup(&mut self) -> Result<(), FaultKind> {
        let top = self
            .frame
            .borrow()
            .top()
            .ok_or(FaultKind::StackUnderflow)?;

        self.push(top);
        Ok(())
    }

    pub(crate) fn store(&mut self, register: usize) -> Result<(), FaultKind> {
        let value = self.pop()?;

        if self.frame.borrow_mut().set_register(register, value) {
            Ok(())
        } else {
            Err(FaultKind::InvalidRegister(register))
        }
    }

    pub(crate) fn store_global(&mut self, register: usize) -> Result<(), FaultKind> {
        let value = self.pop()?;
        let global = global_frame(&self.frame);

        if global.borrow_mut().set_register(register, value) {
            Ok(())
        } else {
            Err(FaultKind::InvalidRegister(register))
        }
    }

    pub(crate) fn store_outer(&mut self, level: usize, register: usize) -> Result<(), FaultKind> {
        let value = self.pop()?;
        let frame = self.outer_frame(level)?;

        if frame.borrow_mut().set_register(register, value) {
            Ok(())
        } else {
            Err(FaultKind::InvalidRegister(register))
        }
    }

    pub(crate) fn reset(&mut self, register: usize) -> Result<(), FaultKind> {
        if self.frame.borrow_mut().set_register(register, Value::Empty) {
            Ok(())
        } else {
            Err(FaultKind::InvalidRegister(register))
        }
    }

    pub(crate) fn make_array(&mut self, count: usize) -> Result<(), FaultKind> {
        let mut items = Vec::with_capacity(count);

        for _ in 0..count {
            items.push(self.pop()?);
        }
        items.reverse();

        self.push(Value::array(items));
        Ok(())
    }

    pub(crate) fn make_hash(&mut self, count: usize) -> Result<(), FaultKind> {
        let mut pairs = Vec::with_capacity(count);

        for _ in 0..count {
            let value = self.pop()?;
            let key = self.pop()?;
            pairs.push((key.to_string(), value));
        }
        pairs.reverse();

        self.push(Value::Hash(Rc::new(std::cell::RefCell::new(
            pairs.into_iter().collect::<IndexMap<_, _>>(),
        ))));
        Ok(())
    }

    pub(crate) fn make_ref(&mut self, address: i32) -> Result<(), FaultKind> {
        self.push(Value::Function(Rc::new(FunctionRef::new(address))));
        Ok(())
    }

    /// Rewrite every function reference inside the hash on top of the
    /// stack to carry that hash as its receiver. The hash stays on the
    /// stack.
    pub(crate) fn bind_refs(&mut self) -> Result<(), FaultKind> {
        let top = self
            .frame
            .borrow()
            .top()
            .ok_or(FaultKind::StackUnderflow)?;

        let Value::Hash(entries) = top else {
            return Err(FaultKind::TypeMismatch {
                expected: "hash",
                found: top.kind_name(),
            });
        };

        let mut borrowed = entries.borrow_mut();
        for value in borrowed.values_mut() {
            if let Value::Function(fref) = value {
                *value = Value::Function(Rc::new(FunctionRef::bound(fref.address(), &entries)));
            }
        }

        Ok(())
    }

    pub(crate) fn get(&mut self) -> Result<(), FaultKind> {
        let index = self.pop()?;
        let container = self.pop()?;
        let value = Self::lookup(&container, &index)?;

        self.push(value);
        Ok(())
    }

    pub(crate) fn set(&mut self) -> Result<(), FaultKind> {
        let index = self.pop()?;
        let container = self.pop()?;
        let value = self.pop()?;

        Self::write(&container, &index, value)
    }

    pub(crate) fn get_index(&mut self, index: &IndexArg) -> Result<(), FaultKind> {
        let container = self.pop()?;
        let value = Self::lookup(&container, &index.clone().into())?;

        self.push(value);
        Ok(())
    }

    pub(crate) fn set_index(&mut self, index: &IndexArg) -> Result<(), FaultKind> {
        let container = self.pop()?;
        let value = self.pop()?;

        Self::write(&container, &index.clone().into(), value)
    }

    /// Composite element update: read, apply the numeric operation with
    /// the popped value, store back.
    pub(crate) fn set_op(&mut self, op: ArithOp) -> Result<(), FaultKind> {
        let index = self.pop()?;
        let container = self.pop()?;
        let value = self.pop()?;

        let element = Self::lookup(&container, &index)?;

        let (Value::Number(element), Value::Number(operand)) = (&element, &value) else {
            return Err(FaultKind::TypeMismatch {
                expected: "number",
                found: element.kind_name(),
            });
        };

        Self::write(&container, &index, Value::Number(op.apply(*element, *operand)))
    }

    fn lookup(container: &Value, index: &Value) -> Result<Value, FaultKind> {
        match container {
            Value::Array(items) => {
                let position = Self::array_index(index)?;
                let items = items.borrow();

                items
                    .get(position as usize)
                    .filter(|_| position >= 0)
                    .cloned()
                    .ok_or(FaultKind::IndexOutOfRange {
                        index: position,
                        len: items.len(),
                    })
            }
            Value::Hash(entries) => {
                let key = index.to_string();

                entries
                    .borrow()
                    .get(&key)
                    .cloned()
                    .ok_or(FaultKind::KeyNotFound(key))
            }
            other => Err(FaultKind::TypeMismatch {
                expected: "array or hash",
                found: other.kind_name(),
            }),
        }
    }

    fn write(container: &Value, index: &Value, value: Value) -> Result<(), FaultKind> {
        match container {
            Value::Array(items) => {
                let position = Self::array_index(index)?;
                let mut items = items.borrow_mut();
                let len = items.len();

                match items.get_mut(position as usize).filter(|_| position >= 0) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(FaultKind::IndexOutOfRange {
                        index: position,
                        len,
                    }),
                }
            }
            Value::Hash(entries) => {
                entries.borrow_mut().insert(index.to_string(), value);
                Ok(())
            }
            other => Err(FaultKind::TypeMismatch {
                expected: "array or hash",
                found: other.kind_name(),
            }),
        }
    }

    fn array_index(index: &Value) -> Result<i64, FaultKind> {
        match index {
            Value::Number(n) => Ok(*n as i64),
            other => Err(FaultKind::TypeMismatch {
                expected: "number",
                found: other.kind_name(),
            }),
        }
    }
}

impl From<IndexArg> for Value {
    fn from(index: IndexArg) -> Self {
        match index {
            IndexArg::Number(n) => Value::Number(n),
            IndexArg::Key(k) => Value::Text(k),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::loader::load;
    use crate::modules::ModuleRegistry;
    use crate::prelude::*;

    fn run_source(source: &str) -> Interpreter {
        let registry = ModuleRegistry::default();
        let program = load(source.as_bytes(), &registry).expect("program loads");
        let mut vm = Interpreter::new(program);
        vm.run().expect("program runs");
        vm
    }

    fn fail_source(source: &str) -> EvaluatorError {
        let registry = ModuleRegistry::default();
        let program = load(source.as_bytes(), &registry).expect("program loads");
        Interpreter::new(program).run().unwrap_err()
    }

    #[test]
    fn aggregates_preserve_source_order() {
        let vm = run_source(".entry\nload 1\nload 2\nload 3\nmk_array 3\nemit\n");
        assert_eq!(vm.text_results()["default"], ["[1, 2, 3]"]);

        let vm = run_source(
            ".entry\nload \"a\"\nload 1\nload \"b\"\nload 2\nmk_hash 2\nemit\n",
        );
        assert_eq!(vm.text_results()["default"], ["{a: 1, b: 2}"]);
    }

    #[test]
    fn get_and_set_through_the_stack() {
        let vm = run_source(
            ".entry\nload 10\nload 20\nmk_array 2\nstore 0\nload 99\nload #0\nload 1\nset\nload #0\nload 1\nget\nemit\n",
        );
        assert_eq!(vm.text_results()["default"], ["99"]);
    }

    #[test]
    fn set_op_updates_an_element_in_place() {
        let vm = run_source(
            ".entry\nload 5\nload 7\nmk_array 2\nstore 0\nload 3\nload #0\nload 1\nset.op add\nload #0\nget.index 1\nemit\n",
        );
        assert_eq!(vm.text_results()["default"], ["10"]);
    }

    #[test]
    fn array_access_is_bounds_checked() {
        let err = fail_source(".entry\nload 1\nmk_array 1\nload 4\nget\n");
        assert!(matches!(
            err.fault(),
            Some(FaultKind::IndexOutOfRange { index: 4, len: 1 })
        ));
    }

    #[test]
    fn hash_lookup_miss_is_a_fault() {
        let err = fail_source(".entry\nload \"a\"\nload 1\nmk_hash 1\nget.index \"b\"\n");
        assert!(matches!(err.fault(), Some(FaultKind::KeyNotFound(_))));
    }

    #[test]
    fn missing_register_is_a_fault() {
        let err = fail_source(".entry\nload #3\n");
        assert!(matches!(
            err.fault(),
            Some(FaultKind::InvalidRegister(3))
        ));
    }
}
