//! Text output contexts and named results.

use serde_json::Value as JsonValue;
use tracing::trace;

use super::Interpreter;
use crate::error::FaultKind;

impl Interpreter {
    /// `emit`: pop, stringify, append to the current text output context.
    pub(crate) fn emit(&mut self) -> Result<(), FaultKind> {
        let value = self.pop()?;

        self.emit_text(value.to_string());
        Ok(())
    }

    /// `emit.named`: pop, convert to a host value, insert into the named
    /// results.
    pub(crate) fn emit_named(&mut self, key: &str) -> Result<(), FaultKind> {
        let value = self.pop()?;

        self.insert_named(key.to_string(), value.to_json()?);
        Ok(())
    }

    /// Append a line to the current text output context.
    pub fn emit_text(&mut self, line: String) {
        trace!(context = %self.current_output, %line, "emit");
        self.outputs
            .entry(self.current_output.clone())
            .or_default()
            .push(line);
    }

    /// Switch the current text output context, creating it on first use.
    pub fn select_output(&mut self, name: &str) {
        if !self.outputs.contains_key(name) {
            self.outputs.insert(name.to_string(), Vec::new());
        }

        self.current_output = name.to_string();
    }

    /// Publish a host value into the named results.
    pub fn insert_named(&mut self, key: String, value: JsonValue) {
        self.named_results.insert(key, value);
    }
}
