//! Primitive words
//!
//! The arithmetic, comparison, memory and stack-shuffling words are tiny
//! native words compiled at start-up from a few raw instructions each.
//! Their bodies are written for the register convention (operands in
//! `x0`, `x1`, ...); under the stack convention they are wrapped in pops
//! and pushes. All of them are leaf and frameless, so calls to them are
//! inlined.
//!
//! Flags are all ones for true and zero for false.

use super::Jit;
use super::state::Signature;
use crate::error::CompileError;
use crate::symbol::SymbolId;
use kiln_core::encode::{self, add, and, asrv, cmp, cmp_imm, cset, eor, ldr, lslv, mov, mul, neg, orr, sub};
use kiln_core::{Cond, EncodeError, Instruction, Reg, RegSet};

type Body = fn() -> Result<Vec<Instruction>, EncodeError>;

/// A built-in word compiled from raw instructions.
pub struct Primitive {
    pub name: &'static str,
    pub inputs: usize,
    pub outputs: usize,
    /// Registers written beyond the operand registers
    pub scratch: RegSet,
    body: Body,
}

impl Primitive {
    pub fn body(&self) -> Result<Vec<Instruction>, EncodeError> {
        (self.body)()
    }
}

const X0: Reg = Reg::x(0);
const X1: Reg = Reg::x(1);
const X2: Reg = Reg::x(2);
const NONE: RegSet = RegSet::EMPTY;

const fn binary(name: &'static str, body: Body) -> Primitive {
    Primitive {
        name,
        inputs: 2,
        outputs: 1,
        scratch: NONE,
        body,
    }
}

fn compare(cond: Cond) -> Result<Vec<Instruction>, EncodeError> {
    Ok(vec![cmp(X0, X1), cset(X0, cond), neg(X0, X0)])
}

pub static PRIMITIVES: &[Primitive] = &[
    binary("+", || Ok(vec![add(X0, X0, X1)])),
    binary("-", || Ok(vec![sub(X0, X0, X1)])),
    binary("*", || Ok(vec![mul(X0, X0, X1)])),
    binary("and", || Ok(vec![and(X0, X0, X1)])),
    binary("or", || Ok(vec![orr(X0, X0, X1)])),
    binary("xor", || Ok(vec![eor(X0, X0, X1)])),
    binary("lshift", || Ok(vec![lslv(X0, X0, X1)])),
    binary("rshift", || Ok(vec![asrv(X0, X0, X1)])),
    binary("=", || compare(Cond::Eq)),
    binary("<>", || compare(Cond::Ne)),
    binary("<", || compare(Cond::Lt)),
    binary(">", || compare(Cond::Gt)),
    binary("<=", || compare(Cond::Le)),
    binary(">=", || compare(Cond::Ge)),
    Primitive {
        name: "negate",
        inputs: 1,
        outputs: 1,
        scratch: NONE,
        body: || Ok(vec![neg(X0, X0)]),
    },
    Primitive {
        name: "0=",
        inputs: 1,
        outputs: 1,
        scratch: NONE,
        body: || Ok(vec![cmp_imm(X0, 0)?, cset(X0, Cond::Eq), neg(X0, X0)]),
    },
    Primitive {
        name: "@",
        inputs: 1,
        outputs: 1,
        scratch: NONE,
        body: || Ok(vec![ldr(X0, X0, 0)?]),
    },
    Primitive {
        name: "!",
        inputs: 2,
        outputs: 0,
        scratch: NONE,
        body: || Ok(vec![encode::str(X0, X1, 0)?]),
    },
    Primitive {
        name: "dup",
        inputs: 1,
        outputs: 2,
        scratch: NONE,
        body: || Ok(vec![mov(X1, X0)]),
    },
    Primitive {
        name: "drop",
        inputs: 1,
        outputs: 0,
        scratch: NONE,
        body: || Ok(Vec::new()),
    },
    Primitive {
        name: "swap",
        inputs: 2,
        outputs: 2,
        scratch: RegSet::from_mask(1 << 16),
        body: || Ok(vec![mov(Reg::IP0, X0), mov(X0, X1), mov(X1, Reg::IP0)]),
    },
    Primitive {
        name: "over",
        inputs: 2,
        outputs: 3,
        scratch: NONE,
        body: || Ok(vec![mov(X2, X0)]),
    },
    Primitive {
        name: "nip",
        inputs: 2,
        outputs: 1,
        scratch: NONE,
        body: || Ok(vec![mov(X0, X1)]),
    },
];

impl Jit {
    /// Define a native word from raw register-convention instructions.
    ///
    /// `clobbers` lists every register `body` writes.
    pub fn define_primitive(
        &mut self,
        name: &str,
        inputs: usize,
        outputs: usize,
        clobbers: RegSet,
        body: &[Instruction],
    ) -> Result<SymbolId, CompileError> {
        self.begin_word(name, Signature::new(inputs, outputs).suppress_redefinition_warning())?;
        let emitted = self.with_emitter(|conv, e| {
            conv.spread_inputs(e, inputs)?;
            e.clobber(clobbers)?;
            e.emit_all(body.iter().copied())?;
            conv.gather_outputs(e, outputs)?;
            e.set_depth(outputs);
            Ok(())
        });
        match emitted {
            Ok(()) => self.end_word(),
            Err(e) => {
                self.abandon_word();
                Err(e)
            }
        }
    }

    pub(super) fn define_primitives(&mut self) -> Result<(), CompileError> {
        for primitive in PRIMITIVES {
            let written = operand_registers(primitive.inputs.max(primitive.outputs));
            self.define_primitive(
                primitive.name,
                primitive.inputs,
                primitive.outputs,
                written.union(primitive.scratch),
                &primitive.body()?,
            )?;
        }
        Ok(())
    }
}

/// `x0..x{count-1}`.
fn operand_registers(count: usize) -> RegSet {
    if count == 0 {
        RegSet::EMPTY
    } else {
        RegSet::range(0, count as u8 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Convention, JitConfig};
    use kiln_core::encode::{ldr_post, str_pre};

    #[test]
    fn test_every_primitive_is_inlinable() {
        for convention in [Convention::Register, Convention::Stack] {
            let jit = Jit::new(JitConfig::default().with_convention(convention)).unwrap();
            for primitive in PRIMITIVES {
                let id = jit.lookup(primitive.name).unwrap();
                let symbol = jit.symbol(id).unwrap();
                let code = symbol.native().unwrap();
                assert!(code.leaf, "{}", primitive.name);
                assert_eq!(code.frame_size, 0, "{}", primitive.name);
                assert!(code.inlinable, "{} under {:?}", primitive.name, convention);
            }
        }
    }

    #[test]
    fn test_register_bodies_are_verbatim() {
        let jit = Jit::new(JitConfig::default()).unwrap();
        let id = jit.lookup("swap").unwrap();
        let b = jit.symbol(id).unwrap().native().unwrap().bookmarks;
        assert_eq!(b.entry, b.body);
        assert_eq!(b.epilogue - b.body, 3);
        assert_eq!(
            jit.heap().instruction(b.body),
            Some(mov(Reg::IP0, X0))
        );
        assert!(jit.symbol(id).unwrap().clobbers.contains(Reg::IP0));
    }

    #[test]
    fn test_stack_bodies_pop_and_push() {
        let jit = Jit::new(JitConfig::default().with_convention(Convention::Stack)).unwrap();
        let id = jit.lookup("+").unwrap();
        let b = jit.symbol(id).unwrap().native().unwrap().bookmarks;
        let body: Vec<_> = (b.body..b.epilogue)
            .map(|i| jit.heap().instruction(i).unwrap())
            .collect();
        assert_eq!(
            body,
            vec![
                ldr_post(X1, Reg::DSP, -8).unwrap(),
                ldr_post(X0, Reg::DSP, -8).unwrap(),
                add(X0, X0, X1),
                str_pre(X0, Reg::DSP, 8).unwrap(),
            ]
        );
    }

    #[test]
    fn test_operand_registers() {
        assert!(operand_registers(0).is_empty());
        assert_eq!(operand_registers(3), RegSet::range(0, 2));
    }
}
