//! Word Definition Code Generation
//!
//! Opening and closing definitions, and the simple body elements:
//! literals, strings, locals and raw instructions.

use super::state::{PROLOGUE_SLOTS, Signature, WordContext};
use super::Jit;
use crate::convention::MAX_REGISTER_VALUES;
use crate::error::{ArityError, CompileError};
use crate::symbol::{Bookmarks, NativeCode, Symbol, SymbolId, SymbolKind};
use kiln_core::{InstrIndex, Instruction, Placeholder, RegSet};

impl Jit {
    /// Start compiling a word.
    ///
    /// The symbol exists (so `recurse` can refer to it) but stays invisible
    /// by name until [`end_word`](Jit::end_word).
    pub fn begin_word(&mut self, name: &str, signature: Signature) -> Result<SymbolId, CompileError> {
        if let Some(ctx) = &self.context {
            return Err(CompileError::DefinitionInProgress(ctx.name.clone()));
        }
        for (what, count) in [("inputs", signature.inputs), ("outputs", signature.outputs)] {
            if count > MAX_REGISTER_VALUES {
                return Err(ArityError::Signature {
                    word: name.to_string(),
                    what,
                    count,
                    limit: MAX_REGISTER_VALUES,
                }
                .into());
            }
        }

        let snapshot = self.snapshot();
        let start = self.heap.here();
        for _ in 0..PROLOGUE_SLOTS {
            if let Err(e) = self.heap.emit(Placeholder::Prologue.instruction()) {
                self.heap.rewind(snapshot.heap);
                return Err(e.into());
            }
        }

        let code = NativeCode {
            bookmarks: Bookmarks {
                start,
                entry: start,
                body: start + PROLOGUE_SLOTS,
                ..Bookmarks::default()
            },
            leaf: true,
            ..NativeCode::default()
        };
        let mut symbol = Symbol::new(name, SymbolKind::Native(code), signature.inputs, signature.outputs);
        symbol.flags = signature.flags();
        let id = self.symbols.create(symbol);
        self.context = Some(WordContext::new(id, name, signature, start, snapshot));

        tracing::debug!(name, id = %id, start, "begin word");
        Ok(id)
    }

    /// Finish the open definition and publish it.
    ///
    /// On error the definition is discarded as if it had never started.
    pub fn end_word(&mut self) -> Result<SymbolId, CompileError> {
        let ctx = self.context.take().ok_or(CompileError::NoActiveDefinition)?;
        let snapshot = ctx.snapshot;
        match self.finish_word(ctx) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.restore(snapshot);
                Err(e)
            }
        }
    }

    /// Discard the open definition, if any.
    pub fn abandon_word(&mut self) {
        if let Some(ctx) = self.context.take() {
            tracing::debug!(name = %ctx.name, "abandon word");
            self.restore(ctx.snapshot);
        }
    }

    /// Executable address of a word's entry point (or an intrinsic's or
    /// external's function), publishing pending code first.
    pub fn entry_address(&mut self, id: SymbolId) -> Result<usize, CompileError> {
        let symbol = self.symbols.get(id).ok_or_else(|| CompileError::UnknownWord(id.to_string()))?;
        match &symbol.kind {
            SymbolKind::Native(code) => {
                let Bookmarks { entry, end, .. } = code.bookmarks;
                if !symbol.visible {
                    return Err(CompileError::DefinitionInProgress(symbol.name.clone()));
                }
                self.heap.ensure_published(end)?;
                Ok(self.heap.address_of(entry))
            }
            SymbolKind::Intrinsic { function } => Ok(*function),
            SymbolKind::External { address, .. } => Ok(*address),
        }
    }

    /// Executable address of a native word's epilogue.
    pub fn epilogue_address(&mut self, id: SymbolId) -> Result<usize, CompileError> {
        let symbol = self.symbols.get(id).ok_or_else(|| CompileError::UnknownWord(id.to_string()))?;
        match symbol.native() {
            Some(code) if symbol.visible => {
                let Bookmarks { epilogue, end, .. } = code.bookmarks;
                self.heap.ensure_published(end)?;
                Ok(self.heap.address_of(epilogue))
            }
            Some(_) => Err(CompileError::DefinitionInProgress(symbol.name.clone())),
            None => Err(CompileError::Unsupported(format!(
                "'{}' is {} and has no epilogue",
                symbol.name,
                symbol.kind_name()
            ))),
        }
    }

    /// Push a constant.
    pub fn compile_literal(&mut self, value: i64) -> Result<(), CompileError> {
        self.with_emitter(|conv, e| conv.emit_literal(e, value))
    }

    /// Copy `text` into the constants region and push its address and length.
    pub fn compile_string(&mut self, text: &str) -> Result<(), CompileError> {
        if self.context.is_none() {
            return Err(CompileError::NoActiveDefinition);
        }
        let address = self.heap.add_constant(text.as_bytes())?;
        self.compile_literal(address as i64)?;
        self.compile_literal(text.len() as i64)
    }

    /// `-> name`: bind the newest value to a local, declaring it if needed.
    pub fn compile_local_set(&mut self, name: &str) -> Result<(), CompileError> {
        let ctx = self.context.as_mut().ok_or(CompileError::NoActiveDefinition)?;
        let local = ctx.locals.declare(name);
        self.with_emitter(|conv, e| conv.emit_arg_bind(e, local))
    }

    /// Push the value of a local.
    pub fn compile_local_get(&mut self, name: &str) -> Result<(), CompileError> {
        let ctx = self.context.as_ref().ok_or(CompileError::NoActiveDefinition)?;
        let local = ctx
            .locals
            .find(name)
            .ok_or_else(|| CompileError::UninitializedLocal(name.to_string()))?;
        self.with_emitter(|conv, e| conv.emit_local_get(e, local))
    }

    /// Compile a name: a local of the open definition, or a visible word.
    pub fn compile_word(&mut self, name: &str) -> Result<(), CompileError> {
        let ctx = self.context.as_ref().ok_or(CompileError::NoActiveDefinition)?;
        if ctx.locals.find(name).is_some() {
            return self.compile_local_get(name);
        }
        let id = self
            .symbols
            .lookup(name)
            .ok_or_else(|| CompileError::UnknownWord(name.to_string()))?;
        self.compile_call(id)
    }

    /// Emit a raw instruction that overwrites `clobbers`.
    ///
    /// The stack effect is the caller's business; use with primitives.
    pub fn compile_instruction(&mut self, inst: Instruction, clobbers: RegSet) -> Result<InstrIndex, CompileError> {
        self.with_emitter(|_, e| {
            e.clobber(clobbers)?;
            e.emit(inst)
        })
    }

    /// Reserve `cells` zeroed data cells; returns the address of the first.
    pub fn allocate_data(&mut self, cells: usize) -> Result<usize, CompileError> {
        Ok(self.heap.allocate_data(cells * 8, 8)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JitConfig;

    fn jit() -> Jit {
        Jit::new(JitConfig::default()).unwrap()
    }

    #[test]
    fn test_definitions_do_not_nest() {
        let mut jit = jit();
        jit.begin_word("outer", Signature::new(0, 0)).unwrap();
        assert!(matches!(
            jit.begin_word("inner", Signature::new(0, 0)),
            Err(CompileError::DefinitionInProgress(name)) if name == "outer"
        ));
    }

    #[test]
    fn test_word_is_invisible_until_finished() {
        let mut jit = jit();
        let id = jit.begin_word("seven", Signature::new(0, 1)).unwrap();
        assert_eq!(jit.lookup("seven"), None);
        jit.compile_literal(7).unwrap();
        assert_eq!(jit.end_word().unwrap(), id);
        assert_eq!(jit.lookup("seven"), Some(id));
    }

    #[test]
    fn test_signature_limits() {
        let mut jit = jit();
        assert!(matches!(
            jit.begin_word("wide", Signature::new(9, 0)),
            Err(CompileError::Arity(ArityError::Signature { count: 9, .. }))
        ));
        assert!(jit.compiling().is_none());
    }

    #[test]
    fn test_abandon_rewinds_heap_and_symbols() {
        let mut jit = jit();
        let here = jit.heap().here();
        let symbols = jit.symbols().len();
        jit.begin_word("junk", Signature::new(0, 1)).unwrap();
        jit.compile_literal(1).unwrap();
        jit.abandon_word();
        assert_eq!(jit.heap().here(), here);
        assert_eq!(jit.symbols().len(), symbols);
        assert_eq!(jit.lookup("junk"), None);
    }

    #[test]
    fn test_failed_end_discards_definition() {
        let mut jit = jit();
        let here = jit.heap().here();
        jit.begin_word("short", Signature::new(0, 2)).unwrap();
        jit.compile_literal(1).unwrap();
        assert!(matches!(
            jit.end_word(),
            Err(CompileError::Arity(ArityError::Return { expected: 2, found: 1, .. }))
        ));
        assert!(jit.compiling().is_none());
        assert_eq!(jit.heap().here(), here);
    }

    #[test]
    fn test_unknown_words_and_locals() {
        let mut jit = jit();
        assert!(matches!(jit.compile_word("+"), Err(CompileError::NoActiveDefinition)));
        jit.begin_word("w", Signature::new(0, 0)).unwrap();
        assert!(matches!(
            jit.compile_word("nonesuch"),
            Err(CompileError::UnknownWord(name)) if name == "nonesuch"
        ));
        assert!(matches!(
            jit.compile_local_get("x"),
            Err(CompileError::UninitializedLocal(_))
        ));
    }

    #[test]
    fn test_strings_go_to_constants() {
        let mut jit = jit();
        jit.begin_word("greeting", Signature::new(0, 2)).unwrap();
        jit.compile_string("hello").unwrap();
        let id = jit.end_word().unwrap();
        assert!(jit.symbol(id).unwrap().native().is_some());
    }

    #[test]
    fn test_data_cells_are_zeroed() {
        let mut jit = jit();
        let addr = jit.allocate_data(2).unwrap();
        assert_eq!(addr % 8, 0);
        assert_eq!(unsafe { *(addr as *const i64).add(1) }, 0);
    }
}
