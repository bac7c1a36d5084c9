//! Control Flow Code Generation
//!
//! `if`/`else`/`then` compile to forward branches that are patched as soon
//! as their target is known, so they never reach the fixup ledger. Each of
//! them is a local-variable barrier: no register association survives a
//! point where two paths meet.
//!
//! `return`, `throw` and `recurse` target positions only known at the end
//! of the word and go through the ledger instead.
//!
//! There are no loops; iteration is written with `recurse`.

use super::Jit;
use super::state::ControlFrame;
use crate::error::{ArityError, CompileError};
use crate::fixup::PendingPatch;
use kiln_core::encode;
use kiln_core::{Placeholder, RegSet};

impl Jit {
    /// `if`: consume a flag; the following code runs when it is non-zero.
    pub fn compile_if(&mut self) -> Result<(), CompileError> {
        self.with_emitter(|conv, e| {
            let reg = conv.emit_consume(e, "if")?;
            e.barrier()?;
            let branch = e.placeholder(Placeholder::ControlBranch)?;
            let depth = e.depth();
            e.ctx.control.push(ControlFrame::If { branch, reg, depth });
            e.ctx.has_branches = true;
            Ok(())
        })
    }

    /// `else`: end the true branch and start the false one.
    pub fn compile_else(&mut self) -> Result<(), CompileError> {
        self.with_emitter(|_, e| {
            let Some(ControlFrame::If { branch, reg, depth }) = e.ctx.control.last().copied() else {
                return Err(CompileError::UnbalancedControlFlow("'else' without 'if'".into()));
            };
            e.ctx.control.pop();
            e.barrier()?;
            let true_depth = (!e.ctx.unreachable).then_some(e.depth());
            let skip = e.placeholder(Placeholder::ControlBranch)?;
            let here = e.here();
            e.heap.patch(branch, encode::cbz(reg, offset(branch, here))?)?;
            e.ctx.control.push(ControlFrame::Else {
                skip,
                depth,
                true_depth,
            });
            e.set_depth(depth);
            e.ctx.unreachable = false;
            Ok(())
        })
    }

    /// `then`: join the branches of the innermost `if`.
    pub fn compile_then(&mut self) -> Result<(), CompileError> {
        self.with_emitter(|_, e| {
            let Some(frame) = e.ctx.control.pop() else {
                return Err(CompileError::UnbalancedControlFlow("'then' without 'if'".into()));
            };
            e.barrier()?;
            let here = e.here();
            let end_depth = (!e.ctx.unreachable).then_some(e.depth());
            let (first, second) = match frame {
                ControlFrame::If { branch, reg, depth } => {
                    e.heap.patch(branch, encode::cbz(reg, offset(branch, here))?)?;
                    // The implicit false branch leaves the depth at the `if`
                    (end_depth, Some(depth))
                }
                ControlFrame::Else {
                    skip, true_depth, ..
                } => {
                    e.heap.patch(skip, encode::b(offset(skip, here))?)?;
                    (true_depth, end_depth)
                }
            };
            let joined = match (first, second) {
                (Some(a), Some(b)) if a != b => {
                    return Err(CompileError::UnbalancedControlFlow(format!(
                        "branches leave {} and {} values",
                        a, b
                    )));
                }
                (Some(a), _) => Some(a),
                (None, b) => b,
            };
            match joined {
                Some(depth) => {
                    e.set_depth(depth);
                    e.ctx.unreachable = false;
                }
                None => e.ctx.unreachable = true,
            }
            Ok(())
        })
    }

    /// `return`: leave the word now; the pending values are its results.
    pub fn compile_return(&mut self) -> Result<(), CompileError> {
        self.with_emitter(|_, e| {
            let outputs = e.outputs();
            if !e.ctx.unreachable && e.depth() != outputs {
                return Err(ArityError::Return {
                    word: e.word_name().to_string(),
                    expected: outputs,
                    found: e.depth(),
                }
                .into());
            }
            let at = e.placeholder(Placeholder::ReturnBranch)?;
            e.ctx.fixups.push(PendingPatch::Return { at });
            e.ctx.early_return = true;
            e.ctx.has_branches = true;
            e.ctx.unreachable = true;
            Ok(())
        })
    }

    /// `throw`: consume an error code and leave through the error path when
    /// it is non-zero.
    pub fn compile_throw(&mut self) -> Result<(), CompileError> {
        self.with_emitter(|conv, e| {
            let reg = conv.emit_consume(e, "throw")?;
            e.raise_if_nonzero(reg)
        })
    }

    /// `recurse`: call the word being defined.
    pub fn compile_recurse(&mut self) -> Result<(), CompileError> {
        let id = self.with_emitter(|conv, e| {
            let (inputs, outputs) = (e.ctx.signature.inputs, e.ctx.signature.outputs);
            let depth = e.depth();
            conv.check_arity(e.word_name(), depth, inputs)?;
            e.clobber(RegSet::CALLER_SAVED)?;
            let at = e.placeholder(Placeholder::RecursiveCall)?;
            let check = e.placeholder(Placeholder::RecursionCheck)?;
            e.ctx.fixups.push(PendingPatch::Recurse { at, check });
            e.ctx.leaf = false;
            e.set_depth(depth - inputs + outputs);
            Ok(e.ctx.symbol)
        })?;
        self.symbols.add_dependency(id, id);
        Ok(())
    }
}

fn offset(from: usize, to: usize) -> i64 {
    to as i64 - from as i64
}
