//! Compilation state for one definition
//!
//! Definitions do not nest, so at most one [`WordContext`] is alive at a
//! time. It owns everything that is specific to the word being compiled:
//! its locals, its fixup ledger, the registers it has clobbered so far and
//! the compile-time depth of its value stack. It is discarded when the
//! definition ends or is abandoned.

use crate::fixup::FixupLedger;
use crate::locals::LocalAllocator;
use crate::symbol::{SymbolFlags, SymbolId};
use kiln_core::{HeapMark, InstrIndex, Reg, RegSet};

/// Number of reserved prologue slots at the start of every native word.
pub const PROLOGUE_SLOTS: usize = 3;

/// Calling metadata supplied when a definition starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub inputs: usize,
    pub outputs: usize,
    /// Propagate callee errors instead of exposing them as values
    pub auto_try: bool,
    pub definition_only: bool,
    pub interpreter_only: bool,
    pub suppress_redefinition_warning: bool,
}

impl Signature {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Signature {
            inputs,
            outputs,
            auto_try: true,
            definition_only: false,
            interpreter_only: false,
            suppress_redefinition_warning: false,
        }
    }

    pub fn with_auto_try(mut self, auto_try: bool) -> Self {
        self.auto_try = auto_try;
        self
    }

    pub fn definition_only(mut self) -> Self {
        self.definition_only = true;
        self
    }

    pub fn interpreter_only(mut self) -> Self {
        self.interpreter_only = true;
        self
    }

    pub fn suppress_redefinition_warning(mut self) -> Self {
        self.suppress_redefinition_warning = true;
        self
    }

    pub(crate) fn flags(&self) -> SymbolFlags {
        SymbolFlags {
            throws: false,
            auto_try: self.auto_try,
            definition_only: self.definition_only,
            interpreter_only: self.interpreter_only,
            suppress_redefinition_warning: self.suppress_redefinition_warning,
        }
    }
}

/// An open `if` or `else`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlFrame {
    If {
        /// `cbz` placeholder, patched at `else` or `then`
        branch: InstrIndex,
        reg: Reg,
        /// Depth after the condition was consumed
        depth: usize,
    },
    Else {
        /// `b` placeholder at the end of the true branch
        skip: InstrIndex,
        depth: usize,
        /// Depth at the end of the true branch, if it falls through
        true_depth: Option<usize>,
    },
}

/// Rewind point for the symbol arena and the heap cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub(crate) symbols: usize,
    pub(crate) heap: HeapMark,
}

pub(crate) struct WordContext {
    pub symbol: SymbolId,
    pub name: String,
    pub signature: Signature,
    /// First prologue slot
    pub start: InstrIndex,
    pub locals: LocalAllocator,
    pub fixups: FixupLedger,
    /// Every register overwritten anywhere in the word so far
    pub clobbered: RegSet,
    /// Values produced and not yet consumed
    pub depth: usize,
    pub control: Vec<ControlFrame>,
    /// Code after a `return`, until the enclosing branch joins
    pub unreachable: bool,
    pub leaf: bool,
    pub pc_relative: bool,
    pub has_branches: bool,
    pub early_return: bool,
    /// Contains an explicit or propagated error branch
    pub raises: bool,
    /// State before `begin_word`, restored by `abandon_word`
    pub snapshot: Snapshot,
}

impl WordContext {
    pub fn new(symbol: SymbolId, name: &str, signature: Signature, start: InstrIndex, snapshot: Snapshot) -> Self {
        WordContext {
            symbol,
            name: name.to_string(),
            signature,
            start,
            locals: LocalAllocator::new(),
            fixups: FixupLedger::new(),
            clobbered: RegSet::EMPTY,
            depth: signature.inputs,
            control: Vec::new(),
            unreachable: false,
            leaf: true,
            pc_relative: false,
            has_branches: false,
            early_return: false,
            raises: false,
            snapshot,
        }
    }

    /// First body instruction.
    pub fn body(&self) -> InstrIndex {
        self.start + PROLOGUE_SLOTS
    }
}
