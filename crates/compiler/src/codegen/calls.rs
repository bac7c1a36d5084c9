//! Call Code Generation
//!
//! Direct calls, copy-inlining, intrinsics and external functions. Every
//! compiled call records a dependency edge so error and interpreter-only
//! status flow up to the caller.

use super::Jit;
use super::emitter::Emitter;
use super::frame::inline_refusal;
use crate::dynlib;
use crate::error::{ArityError, CompileError};
use crate::intrinsics::INTRINSICS;
use crate::symbol::{Symbol, SymbolId, SymbolKind};
use kiln_core::RegSet;

/// Externals return at most one value in `x0`.
const MAX_EXTERNAL_OUTPUTS: usize = 1;
const MAX_EXTERNAL_INPUTS: usize = 8;

impl Jit {
    /// Compile a call to `id`, inlining it when it is eligible and
    /// automatic inlining is enabled.
    pub fn compile_call(&mut self, id: SymbolId) -> Result<(), CompileError> {
        self.prepare_callee(id)?;
        let inline = match self.symbols[id].native() {
            Some(code) => code.inlinable && self.config.auto_inline,
            None => false,
        };
        if inline {
            return self.inline(id);
        }

        let ctx = self.context.as_mut().ok_or(CompileError::NoActiveDefinition)?;
        let caller = ctx.symbol;
        let callee = &self.symbols[id];
        let mut e = Emitter {
            heap: &mut self.heap,
            ctx,
            config: &self.config,
        };
        self.convention.emit_call(&mut e, callee)?;
        self.symbols.add_dependency(caller, id);
        Ok(())
    }

    /// Copy the body of `id` into the open definition.
    pub fn inline(&mut self, id: SymbolId) -> Result<(), CompileError> {
        self.prepare_callee(id)?;
        let callee = &self.symbols[id];
        let code = callee.native().ok_or_else(|| CompileError::NotInlinable {
            name: callee.name.clone(),
            reason: "it is not compiled by this JIT",
        })?;
        if let Some(reason) = inline_refusal(code, callee.flags.throws) {
            return Err(CompileError::NotInlinable {
                name: callee.name.clone(),
                reason,
            });
        }
        let body = self
            .heap
            .words(code.bookmarks.body..code.bookmarks.epilogue)
            .to_vec();

        let ctx = self.context.as_mut().ok_or(CompileError::NoActiveDefinition)?;
        let caller = ctx.symbol;
        let callee = &self.symbols[id];
        let mut e = Emitter {
            heap: &mut self.heap,
            ctx,
            config: &self.config,
        };
        self.convention.emit_inline(&mut e, callee, &body)?;
        tracing::trace!(callee = %callee.name, instructions = body.len(), "inlined");
        self.symbols.add_dependency(caller, id);
        Ok(())
    }

    /// Check that `id` may be called from the open definition and that its
    /// code is published.
    fn prepare_callee(&mut self, id: SymbolId) -> Result<(), CompileError> {
        let ctx = self.context.as_ref().ok_or(CompileError::NoActiveDefinition)?;
        if id == ctx.symbol {
            return Err(CompileError::Unsupported(format!(
                "'{}' is not finished yet; use 'recurse' to call it",
                ctx.name
            )));
        }
        let symbol = self
            .symbols
            .get(id)
            .ok_or_else(|| CompileError::UnknownWord(id.to_string()))?;
        if let Some(code) = symbol.native() {
            let end = code.bookmarks.end;
            self.heap.ensure_published(end)?;
        }
        Ok(())
    }

    /// Enter the built-in native functions in the symbol table.
    pub(super) fn register_intrinsics(&mut self) {
        for intrinsic in INTRINSICS.iter() {
            let mut symbol = Symbol::new(
                intrinsic.name,
                SymbolKind::Intrinsic {
                    function: intrinsic.function,
                },
                intrinsic.inputs,
                intrinsic.outputs,
            );
            symbol.clobbers = RegSet::CALLER_SAVED;
            symbol.flags.throws = intrinsic.throws;
            symbol.flags.interpreter_only = intrinsic.interpreter_only;
            symbol.flags.suppress_redefinition_warning = true;
            let id = self.symbols.create(symbol);
            self.symbols.publish(id);
        }
    }

    /// Make the function at `address` callable as `name` through an
    /// address-table slot.
    pub fn bind_external(
        &mut self,
        name: &str,
        inputs: usize,
        outputs: usize,
        address: usize,
    ) -> Result<SymbolId, CompileError> {
        if let Some(ctx) = &self.context {
            return Err(CompileError::DefinitionInProgress(ctx.name.clone()));
        }
        for (what, count, limit) in [
            ("inputs", inputs, MAX_EXTERNAL_INPUTS),
            ("outputs", outputs, MAX_EXTERNAL_OUTPUTS),
        ] {
            if count > limit {
                return Err(ArityError::Signature {
                    word: name.to_string(),
                    what,
                    count,
                    limit,
                }
                .into());
            }
        }

        let slot = self.heap.bind_slot(address)?;
        let mut symbol = Symbol::new(name, SymbolKind::External { slot, address }, inputs, outputs);
        symbol.clobbers = RegSet::CALLER_SAVED;
        let id = self.symbols.create(symbol);
        self.symbols.publish(id);
        tracing::debug!(name, address = %format_args!("{:#x}", address), "bound external");
        Ok(id)
    }

    /// Look `name` up in the loaded libraries and bind it.
    pub fn resolve_external(&mut self, name: &str, inputs: usize, outputs: usize) -> Result<SymbolId, CompileError> {
        let address = dynlib::lookup(name)?;
        self.bind_external(name, inputs, outputs, address)
    }
}
