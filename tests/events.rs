//! Suspension, external-event delivery and the event loop.

use sequence_vm::prelude::*;

fn load_source(source: &str) -> Interpreter {
    let registry = ModuleRegistry::default();
    let program = load(source.as_bytes(), &registry).expect("program loads");
    Interpreter::new(program)
}

const TICK_LOOP: &str = "\
.defs
on_tick.1:
  load #0
  emit
  ret
.entry
  load \"tick\"
  mk_ref.udf on_tick
  call.native events::SetHandler
  call.native events::StartLoop
  load \"done\"
  emit
";

#[test]
fn start_loop_suspends_the_machine() {
    let mut vm = load_source(TICK_LOOP);

    let state = vm.run().unwrap();
    assert!(state.is_suspended());
    assert!(!state.is_ended());
    assert!(vm.is_suspended());
    assert!(vm.text_results()[DEFAULT_OUTPUT].is_empty());
}

#[test]
fn events_deliver_their_payload_to_the_handler() {
    let mut vm = load_source(TICK_LOOP);
    vm.run().unwrap();

    vm.raise_event("tick", 5).unwrap();
    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["5"]);

    // The handler's return re-suspends; delivery works repeatedly.
    assert!(vm.is_suspended());
    vm.raise_event("tick", 6).unwrap();
    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["5", "6"]);
    assert!(vm.is_suspended());
}

#[test]
fn unhandled_events_are_ignored() {
    let mut vm = load_source(TICK_LOOP);
    vm.run().unwrap();

    assert_eq!(vm.raise_event("boom", 1).unwrap(), None);
    assert!(vm.is_suspended());
    assert!(vm.text_results()[DEFAULT_OUTPUT].is_empty());
}

#[test]
fn handlers_can_return_a_value_to_the_host() {
    let mut vm = load_source(
        "\
.defs
on_ping.1:
  load #0
  load 1
  add
  ret
.entry
  load \"ping\"
  mk_ref.udf on_ping
  call.native events::SetHandler
  call.native events::StartLoop
",
    );
    vm.run().unwrap();

    let reply = vm.raise_event("ping", 41).unwrap();
    assert_eq!(reply, Some(Value::from(42.0)));
}

#[test]
fn the_exit_event_resumes_past_the_suspension_point() {
    let mut vm = load_source(
        "\
.defs
on_exit.1:
  load \"bye\"
  emit
  ret
.entry
  load.const events::End
  mk_ref.udf on_exit
  call.native events::SetHandler
  call.native events::StartLoop
  load \"after\"
  emit
",
    );

    assert_eq!(vm.run().unwrap(), ProgramState::Suspended);

    vm.raise_event("exit", 0).unwrap();
    assert!(!vm.is_suspended());
    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["bye", "after"]);
}

#[test]
fn map_handlers_registers_every_function_entry() {
    let mut vm = load_source(
        "\
.defs
on_a.1:
  load \"a\"
  emit
  ret
on_b.1:
  load \"b\"
  emit
  ret
.entry
  load \"a\"
  mk_ref.udf on_a
  load \"b\"
  mk_ref.udf on_b
  mk_hash 2
  call.native events::MapHandlers
  call.native events::StartLoop
",
    );
    vm.run().unwrap();

    vm.raise_event("b", 0).unwrap();
    vm.raise_event("a", 0).unwrap();
    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["b", "a"]);
}

#[test]
fn exit_loop_is_a_no_op() {
    let mut vm = load_source(".entry\ncall.native events::ExitLoop\nload 1\nemit\n");

    assert_eq!(vm.run().unwrap(), ProgramState::Ended);
    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["1"]);
}

#[test]
fn event_constants_resolve() {
    let mut vm = load_source(
        ".entry\nload.const events::Start\nemit\nload.const events::End\nemit\n",
    );
    vm.run().unwrap();

    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["start", "exit"]);
}
