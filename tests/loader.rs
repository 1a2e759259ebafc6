//! Loader/linker invariants over whole programs.

use sequence_vm::prelude::*;

fn load_text(source: &str) -> Program {
    let registry = ModuleRegistry::default();
    load(source.as_bytes(), &registry).expect("program loads")
}

const SAMPLE: &str = "\
.refs
math
.shared
total
.data
\"alpha\" \"beta\" 3
.defs
scale.2:
  load #0
  load #1
  mul
  store 2
  load #2
  ret
again:
  load 1
  emit
.entry
  load 2
  load 21
  call.udf scale ; #main(4)
  store.global 0
  load.global 0
  emit
  load 1
  load 2
  jmplt done
  load 0
  emit
done:
";

#[test]
fn loading_is_deterministic() {
    // Two loads of the same text produce structurally equal programs,
    // and the textual rendering is stable.
    let first = load_text(SAMPLE);
    let second = load_text(SAMPLE);

    assert_eq!(first, second);
    assert_eq!(first.disassemble(), second.disassemble());
}

#[test]
fn disassembly_renders_resolved_instructions() {
    let program = load_text(SAMPLE);
    let text = program.disassemble();

    assert!(text.contains("load #0"));
    assert!(text.contains("call.udf 0"));
    assert!(text.contains("store.global 0"));
    assert!(text.contains("; #main(4)"));
    assert!(text.contains("; fn -1:"));
}

#[test]
fn every_store_fits_its_frame() {
    let program = load_text(SAMPLE);

    for (index, op) in program.instructions().iter().enumerate() {
        if let OpCode::Store(register) = op {
            let function = program
                .functions()
                .values()
                .filter(|info| info.address <= index)
                .max_by_key(|info| info.address)
                .expect("instruction belongs to a function");

            assert!(
                function.frame_size > *register,
                "store {register} at {index} exceeds frame {}",
                function.frame_size
            );
        }
    }
}

#[test]
fn every_target_is_within_the_program() {
    let program = load_text(SAMPLE);
    let len = program.instructions().len();

    for op in program.instructions() {
        match op {
            OpCode::Jump(target) | OpCode::CondJump(_, target) => {
                assert!(*target <= len);
            }
            OpCode::Call(address) | OpCode::MakeRef(address) => {
                assert!(*address >= 0);
                assert!((*address as usize) < len);
                assert!(program.function(*address).is_some());
            }
            _ => {}
        }
    }
}

#[test]
fn entry_function_is_always_present() {
    let program = load_text(SAMPLE);
    let entry = program.entry();

    assert!(entry.address <= program.instructions().len());
    assert_eq!(entry.params_count, 0);
    assert_eq!(entry.frame_size, program.shared_var_names().len());
    assert_eq!(program.function(ENTRY_FUNCTION), Some(entry));
}

#[test]
fn functions_carry_their_arity() {
    let program = load_text(SAMPLE);

    let scale = program
        .functions()
        .values()
        .find(|info| info.params_count == 2)
        .expect("scale is declared");

    assert_eq!(scale.address, 0);
    // Grown past the two parameters by the `store 2` in the body.
    assert_eq!(scale.frame_size, 3);
}

#[test]
fn the_sample_actually_runs() {
    let mut vm = Interpreter::new(load_text(SAMPLE));
    vm.run().unwrap();

    assert_eq!(vm.text_results()[DEFAULT_OUTPUT], ["42"]);
    assert_eq!(vm.shared("total").unwrap(), Value::from(42.0));
}

#[test]
fn load_failures_convert_into_the_host_error() {
    let registry = ModuleRegistry::default();
    let failure = load(".entry\njmp nowhere\n".as_bytes(), &registry).unwrap_err();

    let host: EvaluatorError = failure.into();
    assert_eq!(host.line(), Some(2));
    assert!(host.fault().is_none());
    assert!(host.to_string().contains("unresolved label"));
}

#[test]
fn blank_lines_and_comments_are_ignored() {
    let program = load_text("\n; leading comment\n.entry\n\nload 1\n; middle\nemit\n\n");
    assert_eq!(program.instructions().len(), 2);
}

#[test]
fn sections_may_repeat_and_interleave() {
    let program = load_text(
        ".shared\na\n.data\n1 2\n.shared\nb\n.data\n3 4\n.entry\nload.data 1\nemit\n",
    );

    assert_eq!(program.shared_var_names(), ["a", "b"]);
    assert_eq!(program.data().len(), 2);
    assert_eq!(program.entry().frame_size, 2);
}
