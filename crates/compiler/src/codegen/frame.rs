//! End-of-definition layout
//!
//! Once the body is complete every remaining decision can be made: where
//! locals live, whether a frame is needed, where the exits are. This module
//! lays down the epilogue, error stubs and literal data, fills the prologue
//! slots, resolves all placeholders and publishes the word.

use super::Jit;
use super::emitter::Emitter;
use super::state::{ControlFrame, PROLOGUE_SLOTS, WordContext};
use crate::convention::{EpilogueMarks, Frame};
use crate::error::{ArityError, CompileError, consistency_failure};
use crate::fixup::Targets;
use crate::symbol::{Bookmarks, NativeCode, SymbolId, SymbolKind};
use kiln_core::encode;
use kiln_core::{InstrIndex, placeholder_tag};

impl Jit {
    pub(super) fn finish_word(&mut self, mut ctx: WordContext) -> Result<SymbolId, CompileError> {
        if let Some(frame) = ctx.control.last() {
            return Err(CompileError::UnbalancedControlFlow(format!(
                "'{}' ends inside an open {}",
                ctx.name,
                match frame {
                    ControlFrame::If { .. } => "'if'",
                    ControlFrame::Else { .. } => "'else'",
                }
            )));
        }
        let outputs = ctx.signature.outputs;
        if !ctx.unreachable && ctx.depth != outputs {
            return Err(ArityError::Return {
                word: ctx.name.clone(),
                expected: outputs,
                found: ctx.depth,
            }
            .into());
        }

        let id = ctx.symbol;
        let throws = ctx.raises || self.symbols[id].flags.throws;
        let error_reg = self.convention.error_reg(outputs);

        // Locals: homes avoid every register the body overwrites
        let mut clobbered = ctx.clobbered;
        if throws {
            clobbered.insert(error_reg);
        }
        let locals = ctx.locals.resolve(clobbered)?;
        clobbered = clobbered.union(locals.homes);
        let frame = Frame::new(ctx.leaf, locals.slots);

        let marks = {
            let mut e = Emitter {
                heap: &mut self.heap,
                ctx: &mut ctx,
                config: &self.config,
            };
            self.convention.emit_epilogue(&mut e, frame, throws)?
        };
        let EpilogueMarks {
            epilogue,
            error_path,
            ret,
        } = marks;

        // Error stubs and literal data
        let data = self.heap.here();
        let mut stubs = Vec::new();
        for reg in ctx.fixups.stub_registers(error_reg) {
            let at = self.heap.emit(encode::mov(error_reg, reg))?;
            let here = self.heap.here();
            self.heap.emit(encode::b(error_path as i64 - here as i64)?)?;
            stubs.push((reg, at));
        }
        let literals = ctx.fixups.literals();
        if !literals.is_empty() && self.heap.here() % 2 == 1 {
            self.heap.emit(encode::nop())?;
        }
        let literal_data = self.heap.here();
        for value in literals {
            self.heap.emit_literal(value as u64)?;
        }
        let end = self.heap.here();

        // Prologue, right-aligned in its slots
        let prologue = self.convention.emit_prologue(frame)?;
        let skipped = PROLOGUE_SLOTS - prologue.len();
        for i in 0..skipped {
            self.heap.patch(ctx.start + i, encode::nop())?;
        }
        for (i, inst) in prologue.into_iter().enumerate() {
            self.heap.patch(ctx.start + skipped + i, inst)?;
        }
        let entry = ctx.start + skipped;

        let targets = Targets {
            entry,
            epilogue,
            error_path,
            error_reg,
            stubs,
            data: literal_data,
            check_recursion: throws && ctx.signature.auto_try,
        };
        for (at, inst) in ctx.fixups.resolve(&targets)? {
            self.heap.patch(at, inst)?;
        }
        if !ctx.fixups.is_empty() {
            consistency_failure(format_args!(
                "{} fixup(s) left after resolving '{}'",
                ctx.fixups.len(),
                ctx.name
            ));
        }
        for (at, inst) in locals.patches {
            self.heap.patch(at, inst)?;
        }
        self.verify_resolved(&ctx.name, ctx.start, data);

        let code = NativeCode {
            bookmarks: Bookmarks {
                start: ctx.start,
                entry,
                body: ctx.body(),
                epilogue,
                error_path,
                ret,
                data,
                literals: literal_data,
                end,
            },
            inlinable: false,
            pc_relative: ctx.pc_relative,
            has_branches: ctx.has_branches,
            early_return: ctx.early_return,
            leaf: ctx.leaf,
            frame_size: frame.size,
        };
        let inlinable = inline_refusal(&code, throws).is_none()
            && epilogue - code.bookmarks.body <= self.config.inline_threshold;

        let symbol = &mut self.symbols[id];
        symbol.kind = SymbolKind::Native(NativeCode { inlinable, ..code });
        symbol.clobbers = clobbered;
        if throws {
            self.symbols.mark_throws(id);
        }
        self.symbols.publish(id);
        self.heap.sync_to(end)?;

        tracing::debug!(
            name = %ctx.name,
            id = %id,
            entry,
            instructions = end - ctx.start,
            frame = frame.size,
            inlinable,
            throws,
            "end word"
        );
        Ok(id)
    }

    /// Every placeholder between `start` and the trailing data is gone.
    fn verify_resolved(&self, name: &str, start: InstrIndex, data: InstrIndex) {
        for index in start..data {
            let tag = self.heap.instruction(index).and_then(placeholder_tag);
            if let Some(tag) = tag {
                consistency_failure(format_args!(
                    "placeholder {} survived at instruction {} of '{}'",
                    tag,
                    index - start,
                    name
                ));
            }
        }
    }
}

/// Why a native word's body cannot be copied to a call site, if it cannot.
pub(super) fn inline_refusal(code: &NativeCode, throws: bool) -> Option<&'static str> {
    if !code.leaf {
        Some("it calls other words")
    } else if code.pc_relative {
        Some("it loads PC-relative literals")
    } else if code.early_return {
        Some("it returns early")
    } else if code.has_branches {
        Some("it contains branches")
    } else if code.frame_size > 0 {
        Some("it needs a stack frame")
    } else if throws {
        Some("it raises errors")
    } else if code.bookmarks.data != code.bookmarks.end {
        Some("it carries trailing data")
    } else {
        None
    }
}
