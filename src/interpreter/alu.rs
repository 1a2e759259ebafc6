//! Arithmetic, string, comparison and logic opcodes.

use super::Interpreter;
use crate::error::FaultKind;
use crate::opcode::{ArithOp, CompareOp, LogicOp};
use crate::value::{Comparison, Value};

impl Interpreter {
    pub(crate) fn arith(&mut self, op: ArithOp) -> Result<(), FaultKind> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;

        self.push(Value::Number(op.apply(a, b)));
        Ok(())
    }

    pub(crate) fn concat(&mut self) -> Result<(), FaultKind> {
        let second = self.pop()?;
        let first = self.pop()?;

        self.push(Value::Text(format!("{first}{second}")));
        Ok(())
    }

    /// Compare the two topmost values, remember the outcome and push
    /// whether the predicate holds for it.
    pub(crate) fn compare(&mut self, op: CompareOp) -> Result<(), FaultKind> {
        let b = self.pop()?;
        let a = self.pop()?;

        self.cmp = a.compare(&b);
        self.push(Value::Boolean(predicate_holds(op, self.cmp)));
        Ok(())
    }

    pub(crate) fn logic(&mut self, op: LogicOp) -> Result<(), FaultKind> {
        let result = match op {
            LogicOp::Not => !self.pop_boolean()?,
            _ => {
                let b = self.pop_boolean()?;
                let a = self.pop_boolean()?;

                match op {
                    LogicOp::Or => a || b,
                    LogicOp::And => a && b,
                    LogicOp::Xor => a ^ b,
                    LogicOp::Not => unreachable!("handled above"),
                }
            }
        };

        self.push(Value::Boolean(result));
        Ok(())
    }
}

/// `Undefined` matches no predicate except `ne`, which holds for any
/// non-`Equal` outcome.
pub(crate) fn predicate_holds(op: CompareOp, cmp: Comparison) -> bool {
    match op {
        CompareOp::Eq => cmp == Comparison::Equal,
        CompareOp::Ne => cmp != Comparison::Equal,
        CompareOp::Lt => cmp == Comparison::Less,
        CompareOp::Gt => cmp == Comparison::Greater,
        CompareOp::Le => matches!(cmp, Comparison::Less | Comparison::Equal),
        CompareOp::Ge => matches!(cmp, Comparison::Greater | Comparison::Equal),
    }
}
