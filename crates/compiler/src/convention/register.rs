//! Register calling convention
//!
//! The compile-time depth `d` says which registers hold live values:
//! `x0..x{d-1}`, newest last. A call requires exactly the callee's inputs to
//! be pending, so arguments are already where the callee expects them and
//! its results land where the caller continues.

use super::{CallingConvention, Invocation, MAX_REGISTER_VALUES};
use crate::codegen::Emitter;
use crate::config::Convention;
use crate::error::{ArityError, CompileError};
use crate::locals::LocalId;
use crate::symbol::{Symbol, SymbolKind};
use kiln_core::encode;
use kiln_core::{CodeHeap, InstrIndex, Reg, RegSet};
use std::cmp::Ordering;

/// Cells in the argument block shared with the entry thunk: eight values
/// plus the error register of an eight-output word.
const BLOCK_CELLS: usize = MAX_REGISTER_VALUES + 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterConvention;

impl CallingConvention for RegisterConvention {
    fn kind(&self) -> Convention {
        Convention::Register
    }

    fn error_reg(&self, outputs: usize) -> Reg {
        Reg::x(outputs as u8)
    }

    fn check_arity(&self, callee: &str, depth: usize, inputs: usize) -> Result<(), ArityError> {
        match depth.cmp(&inputs) {
            Ordering::Less => Err(ArityError::Call {
                callee: callee.to_string(),
                expected: inputs,
                found: depth,
            }),
            Ordering::Greater => Err(ArityError::ExtraValues {
                callee: callee.to_string(),
                expected: inputs,
                found: depth,
            }),
            Ordering::Equal => Ok(()),
        }
    }

    fn produce_reg(&self, depth: usize) -> Result<Reg, ArityError> {
        if depth >= MAX_REGISTER_VALUES {
            return Err(ArityError::Overflow {
                limit: MAX_REGISTER_VALUES,
            });
        }
        Ok(Reg::x(depth as u8))
    }

    fn emit_produce(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        debug_assert_eq!(reg.index() as usize, e.depth());
        e.set_depth(e.depth() + 1);
        Ok(())
    }

    fn emit_consume(&self, e: &mut Emitter<'_>, what: &str) -> Result<Reg, CompileError> {
        let depth = e.depth();
        if depth == 0 {
            return Err(ArityError::Underflow { what: what.to_string() }.into());
        }
        e.set_depth(depth - 1);
        Ok(Reg::x((depth - 1) as u8))
    }

    fn emit_arg_bind(&self, e: &mut Emitter<'_>, local: LocalId) -> Result<(), CompileError> {
        let what = format!("-> {}", e.ctx.locals.name(local));
        let reg = self.emit_consume(e, &what)?;
        e.ctx.locals.set(local, reg);
        Ok(())
    }

    fn spread_inputs(&self, _e: &mut Emitter<'_>, _count: usize) -> Result<(), CompileError> {
        Ok(())
    }

    fn gather_outputs(&self, _e: &mut Emitter<'_>, _count: usize) -> Result<(), CompileError> {
        Ok(())
    }

    fn expose_error(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        let depth = e.depth();
        let target = self.produce_reg(depth)?;
        if reg != target {
            e.clobber(RegSet::EMPTY.with(target))?;
            e.emit(encode::mov(target, reg))?;
        }
        e.set_depth(depth + 1);
        Ok(())
    }

    fn emit_call(&self, e: &mut Emitter<'_>, callee: &Symbol) -> Result<(), CompileError> {
        self.check_arity(&callee.name, e.depth(), callee.inputs)?;
        let error = match &callee.kind {
            SymbolKind::Native(code) => {
                let results = RegSet::range(0, callee.outputs as u8);
                e.clobber(callee.clobbers.union(results))?;
                e.call_native(code.bookmarks.entry)?;
                Reg::x(callee.outputs as u8)
            }
            SymbolKind::Intrinsic { function } => {
                e.clobber(RegSet::CALLER_SAVED)?;
                e.call_address(*function, false)?;
                Reg::x(1)
            }
            SymbolKind::External { slot, .. } => {
                e.clobber(RegSet::CALLER_SAVED)?;
                e.call_address(*slot, true)?;
                Reg::x(1)
            }
        };
        e.set_depth(callee.outputs);
        if callee.flags.throws {
            self.emit_error_check(e, error)?;
        }
        Ok(())
    }

    /// `extern "C" fn(block: *mut i64, target: usize)`: loads `x0..x7`
    /// from the block, calls `target`, stores `x0..x8` back.
    fn emit_entry_thunk(&self, heap: &mut CodeHeap) -> Result<InstrIndex, CompileError> {
        let block = Reg::DSP;
        let mut code = vec![
            encode::stp_pre(Reg::FP, Reg::LR, Reg::SP, -32)?,
            encode::mov_sp(Reg::FP, Reg::SP),
            encode::str(block, Reg::SP, 16)?,
            encode::mov(block, Reg::x(0)),
            encode::mov(Reg::IP0, Reg::x(1)),
        ];
        for i in 0..MAX_REGISTER_VALUES {
            code.push(encode::ldr(Reg::x(i as u8), block, 8 * i as i64)?);
        }
        code.push(encode::blr(Reg::IP0));
        for i in 0..BLOCK_CELLS {
            code.push(encode::str(Reg::x(i as u8), block, 8 * i as i64)?);
        }
        code.push(encode::ldr(block, Reg::SP, 16)?);
        code.push(encode::ldp_post(Reg::FP, Reg::LR, Reg::SP, 32)?);
        code.push(encode::ret());

        let entry = heap.here();
        for inst in code {
            heap.emit(inst)?;
        }
        Ok(entry)
    }

    fn call_thunk(
        &self,
        thunk: usize,
        target: usize,
        args: &[i64],
        outputs: usize,
        throws: bool,
    ) -> Result<Invocation, CompileError> {
        if args.len() > MAX_REGISTER_VALUES || outputs > MAX_REGISTER_VALUES {
            return Err(ArityError::Overflow {
                limit: MAX_REGISTER_VALUES,
            }
            .into());
        }

        let mut block = [0i64; BLOCK_CELLS];
        block[..args.len()].copy_from_slice(args);
        enter(thunk, target, &mut block)?;
        Ok(Invocation {
            values: block[..outputs].to_vec(),
            error: if throws { block[outputs] } else { 0 },
        })
    }
}

#[cfg(target_arch = "aarch64")]
fn enter(thunk: usize, target: usize, block: &mut [i64; BLOCK_CELLS]) -> Result<(), CompileError> {
    // SAFETY: `thunk` is the published entry thunk laid down by
    // `emit_entry_thunk` and `target` the published entry of a word
    // compiled under this convention
    unsafe {
        let thunk = std::mem::transmute::<usize, unsafe extern "C" fn(*mut i64, usize)>(thunk);
        thunk(block.as_mut_ptr(), target);
    }
    Ok(())
}

#[cfg(not(target_arch = "aarch64"))]
fn enter(_thunk: usize, _target: usize, _block: &mut [i64; BLOCK_CELLS]) -> Result<(), CompileError> {
    Err(super::unsupported_host())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_register_follows_outputs() {
        let conv = RegisterConvention;
        assert_eq!(conv.error_reg(0), Reg::x(0));
        assert_eq!(conv.error_reg(2), Reg::x(2));
    }

    #[test]
    fn test_call_arity_must_match_exactly() {
        let conv = RegisterConvention;
        assert!(conv.check_arity("sq", 1, 1).is_ok());
        assert_eq!(
            conv.check_arity("sq", 0, 1),
            Err(ArityError::Call {
                callee: "sq".into(),
                expected: 1,
                found: 0
            })
        );
        let extra = conv.check_arity("sq", 2, 1).unwrap_err();
        assert_eq!(
            extra,
            ArityError::ExtraValues {
                callee: "sq".into(),
                expected: 1,
                found: 2
            }
        );
        assert!(extra.to_string().contains("must match exactly"), "{}", extra);
    }

    #[test]
    fn test_at_most_eight_values() {
        let conv = RegisterConvention;
        assert_eq!(conv.produce_reg(7), Ok(Reg::x(7)));
        assert_eq!(conv.produce_reg(8), Err(ArityError::Overflow { limit: 8 }));
    }
}
