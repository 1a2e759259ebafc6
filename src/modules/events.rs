//! External-event native module.
//!
//! Handlers registered here are keyed on the interpreter instance itself;
//! there is no process-global handler state.

use crate::error::FaultKind;
use crate::interpreter::Interpreter;
use crate::modules::NativeModule;
use crate::value::Value;

/// Name of the conventional start event.
pub(crate) const START_EVENT: &str = "start";

/// Name of the terminal event; its handler's return resumes execution
/// instead of re-suspending.
pub(crate) const EXIT_EVENT: &str = "exit";

pub(super) fn module() -> NativeModule {
    NativeModule::new("events")
        .with_constant("Start", Value::Text(START_EVENT.to_string()))
        .with_constant("End", Value::Text(EXIT_EVENT.to_string()))
        .with_function("SetHandler", 2, set_handler)
        .with_function("MapHandlers", 1, map_handlers)
        .with_function("StartLoop", 0, start_loop)
        .with_function("ExitLoop", 0, exit_loop)
}

fn set_handler(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let handler = vm.pop_function()?;
    let name = vm.pop_text()?;

    vm.set_event_handler(name, handler);
    Ok(())
}

/// Register every function-valued entry of a hash as a handler keyed by
/// its entry key.
fn map_handlers(vm: &mut Interpreter) -> Result<(), FaultKind> {
    let entries = vm.pop_hash()?;

    for (name, value) in entries.borrow().iter() {
        if let Value::Function(handler) = value {
            vm.set_event_handler(name.clone(), handler.clone());
        }
    }

    Ok(())
}

/// Suspend and wait for external events; handlers must already be
/// registered.
fn start_loop(vm: &mut Interpreter) -> Result<(), FaultKind> {
    vm.suspend();
    Ok(())
}

/// Kept for program compatibility; the loop actually ends when the
/// `"exit"` event is delivered.
fn exit_loop(_vm: &mut Interpreter) -> Result<(), FaultKind> {
    Ok(())
}
