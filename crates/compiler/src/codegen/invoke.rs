//! Running compiled words from the host
//!
//! Native words are entered through the convention's entry thunk. Any
//! other symbol is wrapped in a throwaway native word that calls it; the
//! wrapper is discarded afterwards.

use super::Jit;
use super::state::Signature;
use crate::error::{ArityError, CompileError};
use crate::symbol::SymbolId;

impl Jit {
    /// Call `id` with `args` (oldest first) and return its results.
    ///
    /// A non-zero error code from the word becomes [`CompileError::Raised`].
    pub fn invoke(&mut self, id: SymbolId, args: &[i64]) -> Result<Vec<i64>, CompileError> {
        if let Some(ctx) = &self.context {
            return Err(CompileError::DefinitionInProgress(ctx.name.clone()));
        }
        let symbol = self
            .symbols
            .get(id)
            .ok_or_else(|| CompileError::UnknownWord(id.to_string()))?;
        if symbol.flags.definition_only {
            return Err(CompileError::DefinitionOnly(symbol.name.clone()));
        }
        if args.len() != symbol.inputs {
            return Err(ArityError::Call {
                callee: symbol.name.clone(),
                expected: symbol.inputs,
                found: args.len(),
            }
            .into());
        }

        if symbol.native().is_some() {
            return self.invoke_native(id, args);
        }

        let name = format!("<{}>", symbol.name);
        let signature = Signature::new(symbol.inputs, symbol.outputs).suppress_redefinition_warning();
        let snapshot = self.snapshot();
        let result = self.compile_wrapper(&name, signature, id).and_then(|wrapper| self.invoke_native(wrapper, args));
        self.restore(snapshot);
        result
    }

    fn compile_wrapper(&mut self, name: &str, signature: Signature, callee: SymbolId) -> Result<SymbolId, CompileError> {
        self.begin_word(name, signature)?;
        self.compile_call(callee)?;
        self.end_word()
    }

    fn invoke_native(&mut self, id: SymbolId, args: &[i64]) -> Result<Vec<i64>, CompileError> {
        let target = self.entry_address(id)?;
        let thunk = self.heap.address_of(self.thunk);
        let symbol = &self.symbols[id];
        tracing::trace!(name = %symbol.name, args = ?args, "invoke");
        let invocation = self
            .convention
            .call_thunk(thunk, target, args, symbol.outputs, symbol.flags.throws)?;
        if invocation.error != 0 {
            return Err(CompileError::Raised(invocation.error));
        }
        Ok(invocation.values)
    }
}
