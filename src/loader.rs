//! Textual bytecode loader and linker.
//!
//! Consumes the line-oriented assembly form produced by the compiler:
//! directives select sections, labels declare jump targets and function
//! definitions, and every other non-comment line is an instruction.
//! Label references are patched once the whole stream has been read; any
//! failure aborts the load with a [`LoadError`] and no program.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;

use regex::Regex;
use tracing::debug;

use crate::error::{LoadError, LoadErrorKind};
use crate::modules::ModuleRegistry;
use crate::opcode::{ArithOp, CompareOp, IndexArg, LogicOp, OpCode, Operand};
use crate::program::{FunctionInfo, Program, SourceLocation, ENTRY_FUNCTION};
use crate::value::Value;

/// Load a program from a byte stream, resolving module references against
/// `registry`.
pub fn load<R: Read>(source: R, registry: &ModuleRegistry) -> Result<Program, LoadError> {
    Loader::new(registry).load(source)
}

/// Reusable loader holding its compiled token patterns.
pub struct Loader<'r> {
    registry: &'r ModuleRegistry,
    source_note: Regex,
    data_token: Regex,
    function_label: Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Section {
    Refs,
    Shared,
    Data,
    #[default]
    Defs,
    Entry,
}

/// A recorded label reference awaiting resolution.
struct Fixup {
    index: usize,
    label: String,
    line: usize,
}

#[derive(Default)]
struct LoadState {
    section: Section,
    shared: Vec<String>,
    data: Vec<Value>,
    instructions: Vec<OpCode>,
    labels: HashMap<String, usize>,
    functions: HashMap<i32, FunctionInfo>,
    frame_req: HashMap<i32, usize>,
    current_function: i32,
    entry_seen: bool,
    fixups: Vec<Fixup>,
    data_refs: Vec<(usize, usize)>,
    source_map: HashMap<usize, SourceLocation>,
    lines: usize,
}

impl<'r> Loader<'r> {
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self {
            registry,
            source_note: Regex::new(r";\s*#(\w+)\((\d+)\)\s*$").expect("valid pattern"),
            data_token: Regex::new(r#""([^"]*)"|(\S+)"#).expect("valid pattern"),
            function_label: Regex::new(r"^(.+)\.(\d+)$").expect("valid pattern"),
        }
    }

    pub fn load<R: Read>(&self, source: R) -> Result<Program, LoadError> {
        let mut state = LoadState {
            current_function: ENTRY_FUNCTION,
            ..LoadState::default()
        };

        for (index, line) in BufReader::new(source).lines().enumerate() {
            let number = index + 1;
            let line =
                line.map_err(|e| LoadError::new(number, LoadErrorKind::Io(e.to_string())))?;

            state.lines = number;
            self.line(&mut state, number, line.trim())?;
        }

        self.finish(state)
    }

    fn line(&self, st: &mut LoadState, number: usize, text: &str) -> Result<(), LoadError> {
        if text.is_empty() || text.starts_with(';') {
            return Ok(());
        }

        if let Some(directive) = text.strip_prefix('.') {
            return self.directive(st, number, directive);
        }

        match st.section {
            // Native-module references carry no load-time meaning.
            Section::Refs => Ok(()),
            Section::Shared => {
                st.shared.push(text.to_string());
                Ok(())
            }
            Section::Data => self.data_line(st, number, text),
            Section::Defs | Section::Entry => self.code_line(st, number, text),
        }
    }

    fn directive(&self, st: &mut LoadState, number: usize, name: &str) -> Result<(), LoadError> {
        if name.eq_ignore_ascii_case("refs") {
            st.section = Section::Refs;
        } else if name.eq_ignore_ascii_case("shared") {
            st.section = Section::Shared;
        } else if name.eq_ignore_ascii_case("data") {
            st.section = Section::Data;
        } else if name.eq_ignore_ascii_case("defs") {
            st.section = Section::Defs;
        } else if name.eq_ignore_ascii_case("entry") {
            st.section = Section::Entry;
            st.current_function = ENTRY_FUNCTION;
            st.entry_seen = true;
            st.functions.insert(
                ENTRY_FUNCTION,
                FunctionInfo {
                    address: st.instructions.len(),
                    params_count: 0,
                    // Patched to the shared-variable count on finish.
                    frame_size: 0,
                },
            );
        } else {
            return Err(LoadError::new(
                number,
                LoadErrorKind::UnknownDirective(name.to_string()),
            ));
        }

        Ok(())
    }

    fn data_line(&self, st: &mut LoadState, number: usize, text: &str) -> Result<(), LoadError> {
        let mut items = Vec::new();

        for captures in self.data_token.captures_iter(text) {
            if let Some(string) = captures.get(1) {
                items.push(Value::Text(string.as_str().to_string()));
            } else if let Some(token) = captures.get(2) {
                let n: f64 = token.as_str().parse().map_err(|_| {
                    LoadError::new(
                        number,
                        LoadErrorKind::InvalidDataEntry(token.as_str().to_string()),
                    )
                })?;
                items.push(Value::Number(n));
            }
        }

        st.data.push(Value::array(items));
        Ok(())
    }

    fn code_line(&self, st: &mut LoadState, number: usize, text: &str) -> Result<(), LoadError> {
        let (code, location) = self.split_source_note(text, number)?;
        let code = code.trim();

        if code.is_empty() {
            return Ok(());
        }

        if code.len() > 1 && code.ends_with(':') {
            return self.label(st, number, &code[..code.len() - 1]);
        }

        let (mnemonic, argument) = match code.split_once(char::is_whitespace) {
            Some((m, a)) => (m.to_ascii_lowercase(), a.trim()),
            None => (code.to_ascii_lowercase(), ""),
        };

        let index = st.instructions.len();
        let op = self.instruction(st, number, index, &mnemonic, argument)?;

        if let OpCode::Store(register) = op {
            let required = st.frame_req.entry(st.current_function).or_insert(0);
            *required = (*required).max(register + 1);
        }

        if let Some(location) = location {
            st.source_map.insert(index, location);
        }

        st.instructions.push(op);
        Ok(())
    }

    fn split_source_note(
        &self,
        text: &str,
        number: usize,
    ) -> Result<(String, Option<SourceLocation>), LoadError> {
        // The note can only start after the last string literal, so a
        // quoted semicolon never looks like a comment.
        let search_from = text.rfind('"').map(|i| i + 1).unwrap_or(0);

        match self.source_note.captures(&text[search_from..]) {
            Some(captures) => {
                let whole = captures.get(0).expect("whole match");
                let module = captures[1].to_string();
                let line: u32 = captures[2].parse().map_err(|_| {
                    LoadError::new(number, LoadErrorKind::InvalidNumber(captures[2].to_string()))
                })?;

                let code = text[..search_from + whole.start()].trim_end().to_string();
                Ok((code, Some(SourceLocation { module, line })))
            }
            None => Ok((text.to_string(), None)),
        }
    }

    fn label(&self, st: &mut LoadState, number: usize, name: &str) -> Result<(), LoadError> {
        let address = st.instructions.len();

        let key = match self.function_label.captures(name) {
            Some(captures) => {
                let function_name = captures[1].to_string();
                let params: usize = captures[2].parse().map_err(|_| {
                    LoadError::new(number, LoadErrorKind::InvalidNumber(captures[2].to_string()))
                })?;

                st.functions.insert(
                    address as i32,
                    FunctionInfo {
                        address,
                        params_count: params,
                        frame_size: params,
                    },
                );
                st.current_function = address as i32;
                function_name
            }
            None => name.to_string(),
        };

        if st.labels.insert(key.clone(), address).is_some() {
            return Err(LoadError::new(number, LoadErrorKind::DuplicateLabel(key)));
        }

        Ok(())
    }

    fn instruction(
        &self,
        st: &mut LoadState,
        number: usize,
        index: usize,
        mnemonic: &str,
        argument: &str,
    ) -> Result<OpCode, LoadError> {
        let op = match mnemonic {
            "load" => OpCode::Load(operand_arg(argument, number)?),
            "load.global" => OpCode::LoadGlobal(int_arg(argument, number)?),
            "load.outer" => {
                let (level, register) = pair_arg(argument, number)?;
                OpCode::LoadOuter { level, register }
            }
            "load.const" => match argument.parse::<usize>() {
                Ok(n) => {
                    st.data_refs.push((n, number));
                    OpCode::LoadData(n)
                }
                Err(_) => OpCode::LoadConst(self.module_constant(argument, number)?),
            },
            "load.data" => {
                let n = int_arg(argument, number)?;
                st.data_refs.push((n, number));
                OpCode::LoadData(n)
            }
            "dup" => OpCode::Dup,
            "unload" => OpCode::Unload,
            "store" => OpCode::Store(int_arg(argument, number)?),
            "store.global" => OpCode::StoreGlobal(int_arg(argument, number)?),
            "store.outer" => {
                let (level, register) = pair_arg(argument, number)?;
                OpCode::StoreOuter { level, register }
            }
            "reset" => OpCode::Reset(int_arg(argument, number)?),
            "mk_array" => OpCode::MakeArray(int_arg(argument, number)?),
            "mk_hash" => OpCode::MakeHash(int_arg(argument, number)?),
            "mk_ref.udf" => {
                st.fixups.push(Fixup {
                    index,
                    label: label_arg(argument, number)?,
                    line: number,
                });
                OpCode::MakeRef(0)
            }
            "bind_refs" => OpCode::BindRefs,
            "get" => OpCode::Get,
            "set" => OpCode::Set,
            "get.index" => OpCode::GetIndex(index_arg(argument, number)?),
            "set.index" => OpCode::SetIndex(index_arg(argument, number)?),
            "set.op" => OpCode::SetOp(ArithOp::from_str(argument).map_err(|_| {
                LoadError::new(
                    number,
                    LoadErrorKind::MalformedInstruction(format!(
                        "unknown math operation: {argument}"
                    )),
                )
            })?),
            "add" => OpCode::Arith(ArithOp::Add),
            "sub" => OpCode::Arith(ArithOp::Sub),
            "mul" => OpCode::Arith(ArithOp::Mul),
            "div" => OpCode::Arith(ArithOp::Div),
            "mod" => OpCode::Arith(ArithOp::Mod),
            "concat" => OpCode::Concat,
            "format" => OpCode::Format,
            "eq" | "ne" | "lt" | "gt" | "le" | "ge" => {
                OpCode::Compare(CompareOp::from_str(mnemonic).expect("matched above"))
            }
            "or" | "and" | "xor" | "not" => {
                OpCode::Logic(LogicOp::from_str(mnemonic).expect("matched above"))
            }
            "jmp" => {
                st.fixups.push(Fixup {
                    index,
                    label: label_arg(argument, number)?,
                    line: number,
                });
                OpCode::Jump(0)
            }
            "emit" => OpCode::Emit,
            "emit.named" => OpCode::EmitNamed(string_arg(argument, number)?),
            "call.native" => OpCode::CallNative(self.native_function(argument, number)?),
            "call.udf" => {
                st.fixups.push(Fixup {
                    index,
                    label: label_arg(argument, number)?,
                    line: number,
                });
                OpCode::Call(0)
            }
            "invoke" => OpCode::Invoke,
            "ret" => OpCode::Ret,
            conditional if conditional.starts_with("jmp") => {
                let op = CompareOp::from_str(&conditional[3..]).map_err(|_| {
                    LoadError::new(number, LoadErrorKind::UnknownOpcode(mnemonic.to_string()))
                })?;

                st.fixups.push(Fixup {
                    index,
                    label: label_arg(argument, number)?,
                    line: number,
                });
                OpCode::CondJump(op, 0)
            }
            _ => {
                return Err(LoadError::new(
                    number,
                    LoadErrorKind::UnknownOpcode(mnemonic.to_string()),
                ))
            }
        };

        Ok(op)
    }

    fn module_constant(&self, argument: &str, number: usize) -> Result<Value, LoadError> {
        let (module, name) = module_spec(argument, number)?;

        let bundle = self.registry.module(module).ok_or_else(|| {
            LoadError::new(number, LoadErrorKind::UnknownModule(module.to_string()))
        })?;

        bundle.constant(name).cloned().ok_or_else(|| {
            LoadError::new(
                number,
                LoadErrorKind::UnknownConstant {
                    module: bundle.name().to_string(),
                    name: name.to_string(),
                },
            )
        })
    }

    fn native_function(
        &self,
        argument: &str,
        number: usize,
    ) -> Result<crate::modules::NativeFunction, LoadError> {
        let (module, name) = module_spec(argument, number)?;

        let bundle = self.registry.module(module).ok_or_else(|| {
            LoadError::new(number, LoadErrorKind::UnknownModule(module.to_string()))
        })?;

        bundle.function(name).cloned().ok_or_else(|| {
            LoadError::new(
                number,
                LoadErrorKind::UnknownNative {
                    module: bundle.name().to_string(),
                    name: name.to_string(),
                },
            )
        })
    }

    fn finish(&self, mut st: LoadState) -> Result<Program, LoadError> {
        if !st.entry_seen {
            return Err(LoadError::new(st.lines, LoadErrorKind::MissingEntry));
        }

        for fixup in &st.fixups {
            let address = *st.labels.get(&fixup.label).ok_or_else(|| {
                LoadError::new(fixup.line, LoadErrorKind::UnresolvedLabel(fixup.label.clone()))
            })?;

            match &mut st.instructions[fixup.index] {
                OpCode::Jump(target) | OpCode::CondJump(_, target) => *target = address,
                OpCode::Call(key) | OpCode::MakeRef(key) => *key = address as i32,
                _ => {}
            }
        }

        for (data_index, line) in &st.data_refs {
            if *data_index >= st.data.len() {
                return Err(LoadError::new(
                    *line,
                    LoadErrorKind::InvalidDataEntry(format!("no data array #{data_index}")),
                ));
            }
        }

        if let Some(entry) = st.functions.get_mut(&ENTRY_FUNCTION) {
            entry.frame_size = st.shared.len();
        }

        for (function, required) in &st.frame_req {
            if let Some(info) = st.functions.get_mut(function) {
                info.frame_size = info.frame_size.max(*required);
            }
        }

        debug!(
            instructions = st.instructions.len(),
            functions = st.functions.len(),
            shared = st.shared.len(),
            data = st.data.len(),
            "program loaded"
        );

        Ok(Program::new(
            st.shared,
            st.data,
            st.functions,
            st.instructions,
            st.source_map,
        ))
    }
}

fn int_arg(argument: &str, number: usize) -> Result<usize, LoadError> {
    if argument.is_empty() {
        return Err(LoadError::new(
            number,
            LoadErrorKind::MalformedInstruction("missing argument".to_string()),
        ));
    }

    argument
        .parse()
        .map_err(|_| LoadError::new(number, LoadErrorKind::InvalidNumber(argument.to_string())))
}

fn pair_arg(argument: &str, number: usize) -> Result<(usize, usize), LoadError> {
    let (level, register) = argument.split_once(':').ok_or_else(|| {
        LoadError::new(
            number,
            LoadErrorKind::MalformedInstruction(format!("expected level:register, got {argument}")),
        )
    })?;

    Ok((int_arg(level, number)?, int_arg(register, number)?))
}

fn string_arg(argument: &str, number: usize) -> Result<String, LoadError> {
    let malformed = || {
        LoadError::new(
            number,
            LoadErrorKind::MalformedInstruction(format!("expected string literal, got {argument}")),
        )
    };

    let inner = argument
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(malformed)?;

    if inner.contains('"') {
        return Err(malformed());
    }

    Ok(inner.to_string())
}

fn label_arg(argument: &str, number: usize) -> Result<String, LoadError> {
    if argument.is_empty() {
        return Err(LoadError::new(
            number,
            LoadErrorKind::MalformedInstruction("missing label".to_string()),
        ));
    }

    Ok(argument.to_string())
}

/// Tie-breaking per the instruction grammar: `#` prefix selects a
/// register, a quote selects a string, anything else must parse as a
/// number.
fn operand_arg(argument: &str, number: usize) -> Result<Operand, LoadError> {
    if let Some(register) = argument.strip_prefix('#') {
        return Ok(Operand::Register(int_arg(register, number)?));
    }

    if argument.starts_with('"') {
        return Ok(Operand::Text(string_arg(argument, number)?));
    }

    let n: f64 = argument
        .parse()
        .map_err(|_| LoadError::new(number, LoadErrorKind::InvalidNumber(argument.to_string())))?;

    Ok(Operand::Number(n))
}

fn index_arg(argument: &str, number: usize) -> Result<IndexArg, LoadError> {
    if argument.starts_with('"') {
        return Ok(IndexArg::Key(string_arg(argument, number)?));
    }

    let n: f64 = argument
        .parse()
        .map_err(|_| LoadError::new(number, LoadErrorKind::InvalidNumber(argument.to_string())))?;

    Ok(IndexArg::Number(n))
}

/// Module selectors are `module::name`, or `:name` for the default
/// module.
fn module_spec(argument: &str, number: usize) -> Result<(&str, &str), LoadError> {
    if let Some((module, name)) = argument.split_once("::") {
        if !name.is_empty() {
            return Ok((module, name));
        }
    } else if let Some(name) = argument.strip_prefix(':') {
        if !name.is_empty() {
            return Ok(("", name));
        }
    }

    Err(LoadError::new(
        number,
        LoadErrorKind::MalformedInstruction(format!("expected module reference, got {argument}")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_text(source: &str) -> Result<Program, LoadError> {
        let registry = ModuleRegistry::default();
        load(source.as_bytes(), &registry)
    }

    #[test]
    fn empty_entry_loads() {
        let program = load_text(".entry\n").unwrap();
        assert_eq!(program.entry().address, 0);
        assert!(program.instructions().is_empty());
    }

    #[test]
    fn missing_entry_fails() {
        let err = load_text(".defs\nf.0:\n  ret\n").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::MissingEntry);
    }

    #[test]
    fn source_notes_populate_the_map() {
        let program = load_text(".entry\nload 1 ; #main(12)\nemit\n").unwrap();

        let location = program.source_location(0).unwrap();
        assert_eq!(location.module, "main");
        assert_eq!(location.line, 12);
        assert!(program.source_location(1).is_none());
    }

    #[test]
    fn quoted_semicolon_is_not_a_source_note() {
        let program = load_text(".entry\nload \"a; #x(1)\"\n").unwrap();

        assert_eq!(
            program.instructions()[0],
            OpCode::Load(Operand::Text("a; #x(1)".to_string()))
        );
        assert!(program.source_location(0).is_none());
    }

    #[test]
    fn function_labels_declare_arity_and_frame() {
        let program = load_text(
            ".defs\nsum.2:\n  load #0\n  load #1\n  add\n  ret\n.entry\n  load 1\n  load 2\n  call.udf sum\n",
        )
        .unwrap();

        let sum = program.function(0).unwrap();
        assert_eq!(sum.params_count, 2);
        assert_eq!(sum.frame_size, 2);
        assert_eq!(program.instructions()[6], OpCode::Call(0));
    }

    #[test]
    fn store_grows_the_frame() {
        let program = load_text(".defs\nf.1:\n  load #0\n  store 4\n  ret\n.entry\n").unwrap();

        assert_eq!(program.function(0).unwrap().frame_size, 5);
    }

    #[test]
    fn shared_names_size_the_entry_frame() {
        let program = load_text(".shared\nalpha\nbeta\n.entry\nload.global 1\n").unwrap();

        assert_eq!(program.shared_var_names(), ["alpha", "beta"]);
        assert_eq!(program.entry().frame_size, 2);
    }

    #[test]
    fn entry_store_grows_past_shared_names() {
        let program = load_text(".shared\nalpha\n.entry\nload 1\nstore 3\n").unwrap();

        assert_eq!(program.entry().frame_size, 4);
    }

    #[test]
    fn unresolved_label_fails() {
        let err = load_text(".entry\njmp nowhere\n").unwrap_err();
        assert_eq!(
            err.kind,
            LoadErrorKind::UnresolvedLabel("nowhere".to_string())
        );
        assert_eq!(err.line, 2);
    }

    #[test]
    fn duplicate_label_fails() {
        let err = load_text(".entry\nspot:\nload 1\nspot:\n").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::DuplicateLabel("spot".to_string()));
    }

    #[test]
    fn unknown_opcode_fails() {
        let err = load_text(".entry\nfrobnicate 3\n").unwrap_err();
        assert_eq!(
            err.kind,
            LoadErrorKind::UnknownOpcode("frobnicate".to_string())
        );
    }

    #[test]
    fn unknown_directive_fails() {
        let err = load_text(".wat\n.entry\n").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::UnknownDirective("wat".to_string()));
    }

    #[test]
    fn invalid_number_fails() {
        let err = load_text(".entry\nload 3,5\n").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::InvalidNumber("3,5".to_string()));
    }

    #[test]
    fn data_lines_become_arrays() {
        let program = load_text(".data\n\"a\" \"b c\" 3 4.5\n.entry\nload.data 0\n").unwrap();

        let Value::Array(items) = &program.data()[0] else {
            panic!("expected array");
        };
        let items = items.borrow();
        assert_eq!(items[0], Value::Text("a".to_string()));
        assert_eq!(items[1], Value::Text("b c".to_string()));
        assert_eq!(items[2], Value::Number(3.0));
        assert_eq!(items[3], Value::Number(4.5));
    }

    #[test]
    fn dangling_data_reference_fails() {
        let err = load_text(".entry\nload.data 2\n").unwrap_err();
        assert!(matches!(err.kind, LoadErrorKind::InvalidDataEntry(_)));
    }

    #[test]
    fn module_constants_resolve_at_load_time() {
        let program = load_text(".entry\nload.const math::PI\nload.const :true\n").unwrap();

        assert_eq!(
            program.instructions()[0],
            OpCode::LoadConst(Value::Number(std::f64::consts::PI))
        );
        assert_eq!(
            program.instructions()[1],
            OpCode::LoadConst(Value::Boolean(true))
        );
    }

    #[test]
    fn unknown_native_reference_fails() {
        let err = load_text(".entry\ncall.native :Nope\n").unwrap_err();
        assert!(matches!(err.kind, LoadErrorKind::UnknownNative { .. }));

        let err = load_text(".entry\ncall.native wat::Abs\n").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::UnknownModule("wat".to_string()));
    }

    #[test]
    fn refs_section_is_skipped() {
        let program = load_text(".refs\nmath\nevents\n.entry\nload 1\n").unwrap();
        assert_eq!(program.instructions().len(), 1);
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        let program = load_text(".entry\nLOAD 1\nLoad 2\nAdd\nEMIT\n").unwrap();

        assert_eq!(program.instructions()[2], OpCode::Arith(ArithOp::Add));
        assert_eq!(program.instructions()[3], OpCode::Emit);
    }
}
