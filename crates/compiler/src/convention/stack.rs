//! Stack calling convention
//!
//! Values live on a data stack addressed by `x19`, growing upward, with
//! `x19` pointing at the newest cell (`base - 8` when empty). Every value
//! passes through the transfer register `x8`. Words report errors in
//! `x20`. The data stack is its own mapping with a guard page on each side,
//! so overflow and underflow fault instead of corrupting the heap.

use super::{CallingConvention, Invocation};
use crate::codegen::Emitter;
use crate::config::Convention;
use crate::error::{ArityError, CompileError, consistency_failure};
use crate::locals::LocalId;
use crate::symbol::{Symbol, SymbolKind};
use kiln_core::encode;
use kiln_core::memory::page_align;
use kiln_core::{CodeHeap, CodeMemory, InstrIndex, Protection, Reg, RegSet, page_size};

const CELL: usize = 8;

pub struct StackConvention {
    stack: CodeMemory,
    cells: usize,
}

impl StackConvention {
    /// Map a data stack of at least `cells` values between two guard pages.
    pub fn new(cells: usize) -> Result<StackConvention, CompileError> {
        let guard = page_size();
        let bytes = page_align(cells.max(1) * CELL);
        let mut stack = CodeMemory::map(guard + bytes + guard)?;
        stack.protect(guard..guard + bytes, Protection::ReadWrite)?;
        tracing::debug!(cells = bytes / CELL, "data stack mapped");
        Ok(StackConvention {
            stack,
            cells: bytes / CELL,
        })
    }

    /// Usable cells, after rounding to whole pages.
    pub fn cells(&self) -> usize {
        self.cells
    }

    fn base(&self) -> *mut i64 {
        // SAFETY: the first guard page is inside the mapping
        unsafe { self.stack.base().as_ptr().add(page_size()) as *mut i64 }
    }

    fn push(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        e.emit(encode::str_pre(reg, Reg::DSP, CELL as i64)?)?;
        Ok(())
    }

    fn pop(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        e.clobber(RegSet::EMPTY.with(reg))?;
        e.emit(encode::ldr_post(reg, Reg::DSP, -(CELL as i64))?)?;
        Ok(())
    }
}

impl CallingConvention for StackConvention {
    fn kind(&self) -> Convention {
        Convention::Stack
    }

    fn error_reg(&self, _outputs: usize) -> Reg {
        Reg::ERR
    }

    fn check_arity(&self, callee: &str, depth: usize, inputs: usize) -> Result<(), ArityError> {
        if depth < inputs {
            return Err(ArityError::Call {
                callee: callee.to_string(),
                expected: inputs,
                found: depth,
            });
        }
        Ok(())
    }

    fn produce_reg(&self, _depth: usize) -> Result<Reg, ArityError> {
        Ok(Reg::TRANSFER)
    }

    fn emit_produce(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        self.push(e, reg)?;
        e.set_depth(e.depth() + 1);
        Ok(())
    }

    fn emit_consume(&self, e: &mut Emitter<'_>, what: &str) -> Result<Reg, CompileError> {
        let depth = e.depth();
        if depth == 0 {
            return Err(ArityError::Underflow { what: what.to_string() }.into());
        }
        self.pop(e, Reg::TRANSFER)?;
        e.set_depth(depth - 1);
        Ok(Reg::TRANSFER)
    }

    fn emit_arg_bind(&self, e: &mut Emitter<'_>, local: LocalId) -> Result<(), CompileError> {
        let what = format!("-> {}", e.ctx.locals.name(local));
        let reg = self.emit_consume(e, &what)?;
        e.ctx.locals.set(local, reg);
        Ok(())
    }

    fn spread_inputs(&self, e: &mut Emitter<'_>, count: usize) -> Result<(), CompileError> {
        for i in (0..count).rev() {
            self.pop(e, Reg::x(i as u8))?;
        }
        Ok(())
    }

    fn gather_outputs(&self, e: &mut Emitter<'_>, count: usize) -> Result<(), CompileError> {
        for i in 0..count {
            self.push(e, Reg::x(i as u8))?;
        }
        Ok(())
    }

    fn expose_error(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        self.push(e, reg)?;
        if reg == Reg::ERR {
            e.emit(encode::mov(Reg::ERR, Reg::XZR))?;
        }
        e.set_depth(e.depth() + 1);
        Ok(())
    }

    fn emit_call(&self, e: &mut Emitter<'_>, callee: &Symbol) -> Result<(), CompileError> {
        let depth = e.depth();
        self.check_arity(&callee.name, depth, callee.inputs)?;
        let error = match &callee.kind {
            SymbolKind::Native(code) => {
                e.clobber(callee.clobbers.with(Reg::TRANSFER))?;
                e.call_native(code.bookmarks.entry)?;
                Reg::ERR
            }
            SymbolKind::Intrinsic { function } => {
                self.spread_inputs(e, callee.inputs)?;
                e.clobber(RegSet::CALLER_SAVED)?;
                e.call_address(*function, false)?;
                self.gather_outputs(e, callee.outputs)?;
                Reg::x(1)
            }
            SymbolKind::External { slot, .. } => {
                self.spread_inputs(e, callee.inputs)?;
                e.clobber(RegSet::CALLER_SAVED)?;
                e.call_address(*slot, true)?;
                self.gather_outputs(e, callee.outputs)?;
                Reg::x(1)
            }
        };
        e.set_depth(depth - callee.inputs + callee.outputs);
        if callee.flags.throws {
            self.emit_error_check(e, error)?;
        }
        Ok(())
    }

    /// `extern "C" fn(top: *mut i64, target: usize) -> StackReturn`: runs
    /// `target` with `x19 = top` and a clear error register.
    fn emit_entry_thunk(&self, heap: &mut CodeHeap) -> Result<InstrIndex, CompileError> {
        let code = [
            encode::stp_pre(Reg::FP, Reg::LR, Reg::SP, -32)?,
            encode::mov_sp(Reg::FP, Reg::SP),
            encode::stp(Reg::DSP, Reg::ERR, Reg::SP, 16)?,
            encode::mov(Reg::DSP, Reg::x(0)),
            encode::mov(Reg::ERR, Reg::XZR),
            encode::blr(Reg::x(1)),
            encode::mov(Reg::x(0), Reg::DSP),
            encode::mov(Reg::x(1), Reg::ERR),
            encode::ldp(Reg::DSP, Reg::ERR, Reg::SP, 16)?,
            encode::ldp_post(Reg::FP, Reg::LR, Reg::SP, 32)?,
            encode::ret(),
        ];
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
        _throws: bool,
    ) -> Result<Invocation, CompileError> {
        if args.len() > self.cells || outputs > self.cells {
            return Err(ArityError::Overflow { limit: self.cells }.into());
        }
        let base = self.base();
        // SAFETY: `args.len()` cells fit in the read/write part of the stack
        unsafe { std::ptr::copy_nonoverlapping(args.as_ptr(), base, args.len()) };
        let top = base.wrapping_add(args.len()).wrapping_sub(1);

        let (top, error) = enter(thunk, target, top)?;
        let count = (top as isize - base as isize) / CELL as isize + 1;
        if error != 0 {
            return Ok(Invocation { values: Vec::new(), error });
        }
        if count != outputs as isize {
            consistency_failure(format_args!(
                "word left {} value(s) on the data stack, signature says {}",
                count, outputs
            ));
        }
        // SAFETY: the word left exactly `outputs` cells starting at `base`
        let values = unsafe { std::slice::from_raw_parts(base, outputs) }.to_vec();
        Ok(Invocation { values, error: 0 })
    }
}

#[cfg(target_arch = "aarch64")]
#[repr(C)]
struct StackReturn {
    top: *mut i64,
    error: i64,
}

#[cfg(target_arch = "aarch64")]
fn enter(thunk: usize, target: usize, top: *mut i64) -> Result<(*mut i64, i64), CompileError> {
    // SAFETY: `thunk` is the published entry thunk laid down by
    // `emit_entry_thunk`, `target` the published entry of a word compiled
    // under this convention, and `top` points into its data stack
    let result = unsafe {
        let thunk = std::mem::transmute::<usize, unsafe extern "C" fn(*mut i64, usize) -> StackReturn>(thunk);
        thunk(top, target)
    };
    Ok((result.top, result.error))
}

#[cfg(not(target_arch = "aarch64"))]
fn enter(_thunk: usize, _target: usize, _top: *mut i64) -> Result<(*mut i64, i64), CompileError> {
    Err(super::unsupported_host())
}
