//! Named bundles of constants and native callables.
//!
//! The registry's sole runtime role is resolution during load: `load.const`
//! embeds the resolved constant and `call.native` embeds the resolved
//! [`NativeFunction`] handle, so no lookup happens while executing.

use std::fmt;

use indexmap::IndexMap;

use crate::error::FaultKind;
use crate::interpreter::Interpreter;
use crate::value::Value;

mod builtin;
mod events;
mod math;

pub(crate) use events::EXIT_EVENT;

/// Selector of the default module; an empty module selector in program
/// text resolves here.
pub const DEFAULT_MODULE: &str = "$builtin";

/// Signature of a native callable: it consumes and produces values through
/// the interpreter's stack API.
pub type NativeHandler = fn(&mut Interpreter) -> Result<(), FaultKind>;

/// Resolved handle to a native callable, embedded into `call.native`
/// opcodes at load time.
#[derive(Clone)]
pub struct NativeFunction {
    module: String,
    name: String,
    arity: usize,
    handler: NativeHandler,
}

impl NativeFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Declared argument count. Informational only; never checked at
    /// runtime.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn call(&self, vm: &mut Interpreter) -> Result<(), FaultKind> {
        (self.handler)(vm)
    }
}

impl fmt::Display for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module == DEFAULT_MODULE {
            write!(f, ":{}", self.name)
        } else {
            write!(f, "{}::{}", self.module, self.name)
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({self}/{})", self.arity)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module && self.name == other.name
    }
}

/// A named bundle of constants and native functions.
#[derive(Debug)]
pub struct NativeModule {
    name: String,
    constants: IndexMap<String, Value>,
    functions: IndexMap<String, NativeFunction>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: IndexMap::new(),
            functions: IndexMap::new(),
        }
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn with_function(mut self, name: &str, arity: usize, handler: NativeHandler) -> Self {
        let function = NativeFunction {
            module: self.name.clone(),
            name: name.to_string(),
            arity,
            handler,
        };
        self.functions.insert(name.to_string(), function);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.get(name)
    }

    /// Declared functions in definition order, for listings.
    pub fn functions(&self) -> impl Iterator<Item = &NativeFunction> {
        self.functions.values()
    }
}

/// Table of modules addressable from program text.
#[derive(Debug)]
pub struct ModuleRegistry {
    modules: IndexMap<String, NativeModule>,
}

impl Default for ModuleRegistry {
    /// A registry holding the three built-in modules.
    fn default() -> Self {
        let mut registry = Self {
            modules: IndexMap::new(),
        };

        registry.register(builtin::module());
        registry.register(math::module());
        registry.register(events::module());
        registry
    }
}

impl ModuleRegistry {
    /// Register a module, replacing any previous one of the same name.
    pub fn register(&mut self, module: NativeModule) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Resolve a module by selector; the empty selector maps to
    /// [`DEFAULT_MODULE`].
    pub fn module(&self, selector: &str) -> Option<&NativeModule> {
        let key = if selector.is_empty() {
            DEFAULT_MODULE
        } else {
            selector
        };

        self.modules.get(key)
    }
}
