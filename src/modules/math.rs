//! Numeric native module.

use crate::error::FaultKind;
use crate::interpreter::Interpreter;
use crate::modules::NativeModule;
use crate::value::Value;

pub(super) fn module() -> NativeModule {
    NativeModule::new("math")
        .with_constant("PI", Value::Number(std::f64::consts::PI))
        .with_constant("E", Value::Number(std::f64::consts::E))
        .with_function("Abs", 1, abs)
        .with_function("Int", 1, int)
        .with_function("Fract", 1, fract)
        .with_function("Sqrt", 1, sqrt)
        .with_function("Pow", 2, pow)
        .with_function("Sin", 1, sin)
        .with_function("Cos", 1, cos)
        .with_function("Tan", 1, tan)
        .with_function("Rand", 0, random)
        .with_function("Round", 2, round)
}

fn unary(vm: &mut Interpreter, f: fn(f64) -> f64) -> Result<(), FaultKind> {
    let n = vm.pop_number()?;
    vm.push(Value::Number(f(n)));
    Ok(())
}

fn abs(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::abs)
}

fn int(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::floor)
}

fn fract(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::fract)
}

fn sqrt(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::sqrt)
}

fn sin(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::sin)
}

fn cos(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::cos)
}

fn tan(vm: &mut Interpreter) -> Result<(), FaultKind> {
    unary(vm, f64::tan)
}

fn pow(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let exponent = vm.pop_number()?;
    let base = vm.pop_number()?;

    vm.push(Value::Number(base.powf(exponent)));
    Ok(())
}

fn random(vm: &mut Interpreter) -> Result<(), FaultKind> {
    vm.push(Value::Number(rand::random::<f64>()));
    Ok(())
}

fn round(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let digits = vm.pop_number()?;
    let value = vm.pop_number()?;

    let factor = 10f64.powi(digits as i32);
    vm.push(Value::Number((value * factor).round() / factor));
    Ok(())
}
