//! AArch64 Code Generation
//!
//! Words are compiled in a single pass straight into the writable heap.
//! Anything whose final form is not known yet (frame setup, exits,
//! recursive calls, local moves, large constants) is emitted as a
//! placeholder trap and patched when the definition ends; after that the
//! word is published and never touched again.
//!
//! # Definition lifecycle
//!
//! 1. `begin_word`: reserve the prologue slots, create the symbol
//! 2. `compile_*`: literals, calls, locals, control flow
//! 3. `end_word`: lay out epilogue, error stubs and literals, resolve
//!    locals and fixups, verify, publish, sync
//!
//! Any error before `end_word` leaves the definition open; `abandon_word`
//! (or restoring an earlier [`Snapshot`]) discards it.
//!
//! # Word layout
//!
//! ```text
//! start:    nop / stp x29, x30, [sp, #-16]!    three prologue slots,
//!           nop / mov x29, sp                  right-aligned; entry
//!           nop / sub sp, sp, #frame           skips the leading nops
//! body:     ...
//! epilogue: mov err, xzr                        only if the word throws
//! error:    mov sp, x29; ldp x29, x30, [sp], #16
//!           ret
//! data:     mov err, xN; b error                one stub per extra register
//!           nop                                 pads to an even index
//! literals: .quad ...                           8-byte aligned
//! end:
//! ```

mod calls;
mod control_flow;
mod dump;
mod emitter;
mod frame;
mod invoke;
mod primitives;
mod state;
mod words;

pub use emitter::Emitter;
pub use primitives::PRIMITIVES;
pub use state::{PROLOGUE_SLOTS, Signature, Snapshot};

pub(crate) use state::WordContext;

use crate::config::JitConfig;
use crate::convention::{self, CallingConvention};
use crate::error::CompileError;
use crate::symbol::{Symbol, SymbolId, SymbolTable};
use kiln_core::{CodeHeap, InstrIndex};

/// The compiler and everything it has compiled.
pub struct Jit {
    config: JitConfig,
    heap: CodeHeap,
    symbols: SymbolTable,
    convention: Box<dyn CallingConvention>,
    /// The open definition, if any
    context: Option<WordContext>,
    /// Host → JIT trampoline
    thunk: InstrIndex,
}

impl Jit {
    /// Map the heap, lay down the entry thunk and define the built-in words.
    pub fn new(config: JitConfig) -> Result<Jit, CompileError> {
        config.validate()?;
        let mut heap = CodeHeap::new(config.layout())?;
        let convention = convention::for_kind(config.convention, config.data_stack_depth)?;
        let thunk = convention.emit_entry_thunk(&mut heap)?;
        heap.sync()?;

        let mut jit = Jit {
            config,
            heap,
            symbols: SymbolTable::new(),
            convention,
            context: None,
            thunk,
        };
        jit.register_intrinsics();
        jit.define_primitives()?;

        tracing::info!(
            convention = jit.convention.name(),
            words = jit.symbols.len(),
            code_capacity = jit.heap.capacity(),
            "JIT ready"
        );
        Ok(jit)
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn heap(&self) -> &CodeHeap {
        &self.heap
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.symbols.lookup(name)
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    /// Name of the definition being compiled.
    pub fn compiling(&self) -> Option<&str> {
        self.context.as_ref().map(|ctx| ctx.name.as_str())
    }

    /// Values pending in the open definition.
    pub fn depth(&self) -> Option<usize> {
        self.context.as_ref().map(|ctx| ctx.depth)
    }

    /// Capture the symbol arena and heap cursors.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            symbols: self.symbols.len(),
            heap: self.heap.mark(),
        }
    }

    /// Forget every symbol, instruction and allocation made since `snapshot`,
    /// including an open definition.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.context = None;
        self.symbols.truncate(snapshot.symbols);
        self.heap.rewind(snapshot.heap);
        tracing::debug!(symbols = snapshot.symbols, code = snapshot.heap.code, "restored snapshot");
    }

    /// Run `f` with an emitter over the open definition.
    fn with_emitter<T>(
        &mut self,
        f: impl FnOnce(&dyn CallingConvention, &mut Emitter<'_>) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        let ctx = self.context.as_mut().ok_or(CompileError::NoActiveDefinition)?;
        let mut e = Emitter {
            heap: &mut self.heap,
            ctx,
            config: &self.config,
        };
        f(self.convention.as_ref(), &mut e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Convention;

    #[test]
    fn test_new_defines_builtins_and_publishes_thunk() {
        let jit = Jit::new(JitConfig::default()).unwrap();
        assert!(jit.lookup("+").is_some());
        assert!(jit.lookup("dup").is_some());
        assert!(jit.lookup(".").is_some());
        assert_eq!(jit.heap().published(), jit.heap().here());
        assert!(jit.compiling().is_none());
    }

    #[test]
    fn test_both_conventions_start() {
        for convention in [Convention::Register, Convention::Stack] {
            let jit = Jit::new(JitConfig::default().with_convention(convention)).unwrap();
            assert_eq!(jit.config().convention, convention);
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = JitConfig::default().with_max_inline_chunks(0);
        assert!(matches!(Jit::new(config), Err(CompileError::Config(_))));
    }
}
