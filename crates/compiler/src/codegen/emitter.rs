//! Instruction emission for the word being compiled
//!
//! [`Emitter`] borrows the heap, the open [`WordContext`] and the
//! configuration at once, so calling-convention code can emit while the
//! symbol table is borrowed separately.
//!
//! Every register write goes through [`Emitter::clobber`] first. That is
//! what keeps the local allocator honest: a local whose value lives only in
//! a register gets its write placeholder before the register is reused.

use super::state::WordContext;
use crate::config::JitConfig;
use crate::error::CompileError;
use crate::fixup::PendingPatch;
use crate::locals::{Access, LocalId};
use kiln_core::encode::{self, Placeholder};
use kiln_core::{CodeHeap, InstrIndex, Instruction, Reg, RegSet};

pub struct Emitter<'a> {
    pub(crate) heap: &'a mut CodeHeap,
    pub(crate) ctx: &'a mut WordContext,
    pub(crate) config: &'a JitConfig,
}

impl Emitter<'_> {
    pub fn here(&self) -> InstrIndex {
        self.heap.here()
    }

    pub fn emit(&mut self, inst: Instruction) -> Result<InstrIndex, CompileError> {
        Ok(self.heap.emit(inst)?)
    }

    pub fn emit_all(&mut self, insts: impl IntoIterator<Item = Instruction>) -> Result<(), CompileError> {
        for inst in insts {
            self.heap.emit(inst)?;
        }
        Ok(())
    }

    pub fn placeholder(&mut self, placeholder: Placeholder) -> Result<InstrIndex, CompileError> {
        self.emit(placeholder.instruction())
    }

    pub fn depth(&self) -> usize {
        self.ctx.depth
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.ctx.depth = depth;
    }

    pub fn word_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn outputs(&self) -> usize {
        self.ctx.signature.outputs
    }

    /// Callee errors branch to the error path instead of becoming values.
    pub fn auto_try(&self) -> bool {
        self.ctx.signature.auto_try
    }

    /// Registers in `regs` are about to be overwritten.
    pub fn clobber(&mut self, regs: RegSet) -> Result<(), CompileError> {
        let heap = &mut *self.heap;
        self.ctx
            .locals
            .clobber(regs, || heap.emit(Placeholder::LocalWrite.instruction()))?;
        self.ctx.clobbered = self.ctx.clobbered.union(regs);
        Ok(())
    }

    /// Control-flow join: spill every register-resident local.
    pub fn barrier(&mut self) -> Result<(), CompileError> {
        let heap = &mut *self.heap;
        self.ctx
            .locals
            .barrier(|| heap.emit(Placeholder::LocalWrite.instruction()))?;
        Ok(())
    }

    /// Put `value` in `reg`, inline when the move sequence is short enough,
    /// otherwise through a literal in the word's trailing data.
    pub fn load_immediate(&mut self, reg: Reg, value: i64) -> Result<(), CompileError> {
        self.clobber(RegSet::EMPTY.with(reg))?;
        match encode::mov_imm(reg, value, self.config.max_inline_chunks) {
            Some(sequence) => self.emit_all(sequence),
            None => {
                let at = self.placeholder(Placeholder::LargeImmediate)?;
                self.ctx.fixups.push(PendingPatch::LoadImmediate { at, reg, value });
                self.ctx.pc_relative = true;
                Ok(())
            }
        }
    }

    /// `bl` to a native word entry in this heap.
    pub fn call_native(&mut self, entry: InstrIndex) -> Result<(), CompileError> {
        let here = self.here() as i64;
        self.emit(encode::bl(entry as i64 - here)?)?;
        self.ctx.leaf = false;
        Ok(())
    }

    /// Call a platform function at `address`, or through the address-table
    /// slot at `address` when `through_slot` is set.
    ///
    /// The caller clobbers the caller-saved registers first.
    pub fn call_address(&mut self, address: usize, through_slot: bool) -> Result<(), CompileError> {
        self.load_immediate(Reg::IP0, address as i64)?;
        if through_slot {
            self.emit(encode::ldr(Reg::IP0, Reg::IP0, 0)?)?;
        }
        self.emit(encode::blr(Reg::IP0))?;
        self.ctx.leaf = false;
        Ok(())
    }

    /// Leave through the error path when `reg` is non-zero.
    pub fn raise_if_nonzero(&mut self, reg: Reg) -> Result<(), CompileError> {
        let at = self.placeholder(Placeholder::ErrorBranch)?;
        self.ctx.fixups.push(PendingPatch::Error { at, reg });
        self.ctx.raises = true;
        self.ctx.has_branches = true;
        Ok(())
    }

    /// Make local `id` available in `target`.
    pub fn local_get(&mut self, id: LocalId, target: Reg) -> Result<(), CompileError> {
        match self.ctx.locals.access(id, target)? {
            Access::InPlace => {}
            Access::Move { from } => {
                self.clobber(RegSet::EMPTY.with(target))?;
                self.emit(encode::mov(target, from))?;
            }
            Access::Load => {
                self.clobber(RegSet::EMPTY.with(target))?;
                let at = self.placeholder(Placeholder::LocalRead)?;
                self.ctx.locals.record_read(id, at, target);
            }
        }
        Ok(())
    }
}
