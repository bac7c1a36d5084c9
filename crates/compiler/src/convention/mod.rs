//! Calling conventions
//!
//! A convention decides where values live between words and how a call
//! site, a local binding, a prologue and an epilogue look. Two exist:
//!
//! - [`RegisterConvention`]: arguments and results in `x0..x7`; a word with
//!   `k` outputs reports its error code in `x{k}`.
//! - [`StackConvention`]: every value goes through an upward-growing data
//!   stack addressed by `x19`, with `x8` as the transfer register and the
//!   error code in `x20`.
//!
//! One convention is fixed per [`Jit`](crate::Jit) instance. Words compiled
//! under different conventions never call each other.

mod register;
mod stack;

pub use register::RegisterConvention;
pub use stack::StackConvention;

use crate::codegen::Emitter;
use crate::config::Convention;
use crate::error::{ArityError, CompileError};
use crate::locals::LocalId;
use crate::symbol::Symbol;
use kiln_core::encode;
use kiln_core::{CodeHeap, EncodeError, InstrIndex, Instruction, Reg};

/// Largest number of values a register-convention word passes either way.
pub const MAX_REGISTER_VALUES: usize = 8;

/// Stack frame of a native word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    /// Saves `x29`/`x30` (the word calls out or has stack slots)
    pub needed: bool,
    /// Bytes below the frame record for local slots, 16-byte aligned
    pub size: usize,
}

impl Frame {
    pub fn new(leaf: bool, slots: usize) -> Frame {
        Frame {
            needed: !leaf || slots > 0,
            size: (slots * 8).next_multiple_of(16),
        }
    }
}

/// Positions laid down by [`CallingConvention::emit_epilogue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpilogueMarks {
    pub epilogue: InstrIndex,
    pub error_path: InstrIndex,
    pub ret: InstrIndex,
}

/// Result of running a word through an entry thunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub values: Vec<i64>,
    /// Non-zero when the word raised
    pub error: i64,
}

pub trait CallingConvention {
    fn kind(&self) -> Convention;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Register holding the error code of a word with `outputs` results.
    fn error_reg(&self, outputs: usize) -> Reg;

    /// Check that `depth` pending values can feed a call taking `inputs`.
    fn check_arity(&self, callee: &str, depth: usize, inputs: usize) -> Result<(), ArityError>;

    /// Register the next produced value is computed into.
    fn produce_reg(&self, depth: usize) -> Result<Reg, ArityError>;

    /// Account for a value computed into `reg` by [`produce_reg`](Self::produce_reg).
    fn emit_produce(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError>;

    /// Take the most recent value; returns the register now holding it.
    fn emit_consume(&self, e: &mut Emitter<'_>, what: &str) -> Result<Reg, CompileError>;

    /// `-> name`: bind the most recent value to a local.
    fn emit_arg_bind(&self, e: &mut Emitter<'_>, local: LocalId) -> Result<(), CompileError>;

    /// Move `count` pending values into `x0..x{count-1}` for a platform call.
    fn spread_inputs(&self, e: &mut Emitter<'_>, count: usize) -> Result<(), CompileError>;

    /// Make `x0..x{count-1}` the newest pending values after a platform call.
    fn gather_outputs(&self, e: &mut Emitter<'_>, count: usize) -> Result<(), CompileError>;

    /// Without `auto_try`, a callee error becomes an extra value.
    fn expose_error(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError>;

    /// Emit a call to `callee` and account for its stack effect.
    fn emit_call(&self, e: &mut Emitter<'_>, callee: &Symbol) -> Result<(), CompileError>;

    /// Lay down the host → JIT trampoline; returns its entry.
    fn emit_entry_thunk(&self, heap: &mut CodeHeap) -> Result<InstrIndex, CompileError>;

    /// Run the word at `target` through the thunk at `thunk`.
    fn call_thunk(
        &self,
        thunk: usize,
        target: usize,
        args: &[i64],
        outputs: usize,
        throws: bool,
    ) -> Result<Invocation, CompileError>;

    fn emit_literal(&self, e: &mut Emitter<'_>, value: i64) -> Result<(), CompileError> {
        let reg = self.produce_reg(e.depth())?;
        e.load_immediate(reg, value)?;
        self.emit_produce(e, reg)
    }

    fn emit_local_get(&self, e: &mut Emitter<'_>, local: LocalId) -> Result<(), CompileError> {
        let reg = self.produce_reg(e.depth())?;
        e.local_get(local, reg)?;
        self.emit_produce(e, reg)
    }

    /// Handle a callee error code left in `reg`.
    fn emit_error_check(&self, e: &mut Emitter<'_>, reg: Reg) -> Result<(), CompileError> {
        if e.auto_try() {
            e.raise_if_nonzero(reg)
        } else {
            self.expose_error(e, reg)
        }
    }

    /// Copy an inlinable body in place of a call.
    fn emit_inline(&self, e: &mut Emitter<'_>, callee: &Symbol, body: &[u32]) -> Result<(), CompileError> {
        let depth = e.depth();
        self.check_arity(&callee.name, depth, callee.inputs)?;
        e.clobber(callee.clobbers)?;
        e.emit_all(body.iter().map(|&word| Instruction::from_raw(word)))?;
        e.set_depth(depth - callee.inputs + callee.outputs);
        Ok(())
    }

    /// Frame setup, at most [`PROLOGUE_SLOTS`](crate::codegen::PROLOGUE_SLOTS) instructions.
    fn emit_prologue(&self, frame: Frame) -> Result<Vec<Instruction>, EncodeError> {
        if !frame.needed {
            return Ok(Vec::new());
        }
        let mut code = vec![
            encode::stp_pre(Reg::FP, Reg::LR, Reg::SP, -16)?,
            encode::mov_sp(Reg::FP, Reg::SP),
        ];
        if frame.size > 0 {
            code.push(encode::sub_imm(Reg::SP, Reg::SP, frame.size as u64)?);
        }
        Ok(code)
    }

    /// Normal exit (clear the error register), shared teardown, `ret`.
    fn emit_epilogue(&self, e: &mut Emitter<'_>, frame: Frame, throws: bool) -> Result<EpilogueMarks, CompileError> {
        let epilogue = e.here();
        if throws {
            let err = self.error_reg(e.outputs());
            e.emit(encode::mov(err, Reg::XZR))?;
        }
        let error_path = e.here();
        if frame.needed {
            if frame.size > 0 {
                e.emit(encode::mov_sp(Reg::SP, Reg::FP))?;
            }
            e.emit(encode::ldp_post(Reg::FP, Reg::LR, Reg::SP, 16)?)?;
        }
        let ret = e.emit(encode::ret())?;
        Ok(EpilogueMarks {
            epilogue,
            error_path,
            ret,
        })
    }
}

/// Pick the convention implementation for `kind`.
pub fn for_kind(kind: Convention, data_stack_cells: usize) -> Result<Box<dyn CallingConvention>, CompileError> {
    Ok(match kind {
        Convention::Register => Box::new(RegisterConvention),
        Convention::Stack => Box::new(StackConvention::new(data_stack_cells)?),
    })
}

#[cfg(not(target_arch = "aarch64"))]
pub(crate) fn unsupported_host() -> CompileError {
    CompileError::Unsupported(format!(
        "generated code targets aarch64; this host is {}",
        std::env::consts::ARCH
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rounds_slots_to_sixteen_bytes() {
        assert_eq!(Frame::new(true, 0), Frame { needed: false, size: 0 });
        assert_eq!(Frame::new(false, 0), Frame { needed: true, size: 0 });
        assert_eq!(Frame::new(true, 1), Frame { needed: true, size: 16 });
        assert_eq!(Frame::new(true, 3), Frame { needed: true, size: 32 });
    }

    #[test]
    fn test_prologue_fits_reserved_slots() {
        let conv = RegisterConvention;
        assert!(conv.emit_prologue(Frame::new(true, 0)).unwrap().is_empty());
        assert_eq!(conv.emit_prologue(Frame::new(false, 0)).unwrap().len(), 2);
        let full = conv.emit_prologue(Frame::new(false, 5)).unwrap();
        assert_eq!(full.len(), crate::codegen::PROLOGUE_SLOTS);
        assert_eq!(full[2], encode::sub_imm(Reg::SP, Reg::SP, 48).unwrap());
    }
}
