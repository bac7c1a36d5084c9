//! Bit-field encoder for A64 instructions
//!
//! Every instruction word in the system is assembled here. The two field
//! packers, [`unsigned`] and [`signed`], validate that an operand fits its
//! field and place it at the right bit offset; every instruction
//! constructor is a fixed opcode OR-ed with packed fields.
//!
//! # Signed fields
//!
//! Signed immediates are stored as the low `width` bits of their two's
//! complement representation. When the CPU sign-extends the field it
//! reproduces the original value exactly, provided the value lies in
//! `[-2^(width-1), 2^(width-1) - 1]`; anything outside that range is an
//! [`EncodeError::ImmediateOutOfRange`].
//!
//! # Placeholders
//!
//! Instructions that cannot be finished yet are emitted as
//! `brk #(0xF000 | tag)`. Executing one traps immediately, and the tag in
//! the immediate identifies which kind of pending patch it was standing in
//! for (see [`Placeholder`]).

use crate::error::EncodeError;
use crate::reg::{Cond, Reg};
use std::fmt;

/// One fixed-width A64 instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(u32);

impl Instruction {
    /// Reinterpret a word read back from a code buffer.
    pub const fn from_raw(bits: u32) -> Instruction {
        Instruction(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The placeholder kind, if this word is a reserved trap.
    pub fn placeholder(self) -> Option<Placeholder> {
        placeholder_tag(self).and_then(Placeholder::from_tag)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction({:#010x})", self.0)
    }
}

// =============================================================================
// Field packing
// =============================================================================

/// Pack an unsigned value into `width` bits at `shift`.
pub fn unsigned(field: &'static str, value: u64, width: u32, shift: u32) -> Result<u32, EncodeError> {
    if width < 64 && value >> width != 0 {
        return Err(EncodeError::ImmediateOutOfRange {
            field,
            value: value as i64,
            width,
            signed: false,
        });
    }
    Ok((value as u32) << shift)
}

/// Pack a signed value into `width` bits at `shift` (two's complement truncation).
pub fn signed(field: &'static str, value: i64, width: u32, shift: u32) -> Result<u32, EncodeError> {
    let min = -(1i64 << (width - 1));
    let max = (1i64 << (width - 1)) - 1;
    if value < min || value > max {
        return Err(EncodeError::ImmediateOutOfRange {
            field,
            value,
            width,
            signed: true,
        });
    }
    let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
    Ok(((value as u32) & mask) << shift)
}

/// Divide a byte offset by its access scale, rejecting misaligned offsets.
pub fn scaled(field: &'static str, offset: i64, scale: i64) -> Result<i64, EncodeError> {
    if offset % scale != 0 {
        return Err(EncodeError::Misaligned {
            field,
            offset,
            scale,
        });
    }
    Ok(offset / scale)
}

fn reg(r: Reg, shift: u32) -> u32 {
    r.index() << shift
}

/// Extract `width` bits at `shift`.
pub fn field(inst: Instruction, shift: u32, width: u32) -> u32 {
    (inst.0 >> shift) & ((1u64 << width) - 1) as u32
}

/// Extract and sign-extend `width` bits at `shift`, as the CPU does.
pub fn signed_field(inst: Instruction, shift: u32, width: u32) -> i64 {
    let raw = field(inst, shift, width) as i64;
    let sign = 1i64 << (width - 1);
    (raw ^ sign) - sign
}

// =============================================================================
// Moves
// =============================================================================

fn wide_move(base: u32, rd: Reg, imm16: u64, hw: u32) -> Result<Instruction, EncodeError> {
    Ok(Instruction(
        base | unsigned("hw", hw as u64, 2, 21)? | unsigned("imm16", imm16, 16, 5)? | reg(rd, 0),
    ))
}

/// `movz xd, #imm16, lsl #(16 * hw)`
pub fn movz(rd: Reg, imm16: u64, hw: u32) -> Result<Instruction, EncodeError> {
    wide_move(0xD280_0000, rd, imm16, hw)
}

/// `movk xd, #imm16, lsl #(16 * hw)`
pub fn movk(rd: Reg, imm16: u64, hw: u32) -> Result<Instruction, EncodeError> {
    wide_move(0xF280_0000, rd, imm16, hw)
}

/// `movn xd, #imm16, lsl #(16 * hw)`
pub fn movn(rd: Reg, imm16: u64, hw: u32) -> Result<Instruction, EncodeError> {
    wide_move(0x9280_0000, rd, imm16, hw)
}

/// `mov xd, xm` (ORR with the zero register). Index 31 reads as xzr.
pub fn mov(rd: Reg, rm: Reg) -> Instruction {
    Instruction(0xAA00_03E0 | reg(rm, 16) | reg(rd, 0))
}

/// `mov xd|sp, xn|sp` (ADD #0). Index 31 means sp on both sides.
pub fn mov_sp(rd: Reg, rn: Reg) -> Instruction {
    Instruction(0x9100_0000 | reg(rn, 5) | reg(rd, 0))
}

/// Number of instructions [`mov_imm`] needs for `value`.
pub fn mov_imm_len(value: i64) -> usize {
    let bits = value as u64;
    let chunks = |skip: u64| (0..4).filter(|i| (bits >> (16 * i)) & 0xFFFF != skip).count();
    chunks(0).min(chunks(0xFFFF)).max(1)
}

/// Materialise a 64-bit constant with a MOVZ/MOVN + MOVK sequence.
///
/// Returns `None` when the value needs more than `max_chunks` instructions;
/// callers then load it from a literal instead.
pub fn mov_imm(rd: Reg, value: i64, max_chunks: usize) -> Option<Vec<Instruction>> {
    if mov_imm_len(value) > max_chunks {
        return None;
    }
    let bits = value as u64;
    let chunk = |i: u32| (bits >> (16 * i)) & 0xFFFF;
    let zeros = (0..4).filter(|&i| chunk(i) == 0).count();
    let ones = (0..4).filter(|&i| chunk(i) == 0xFFFF).count();

    // Fill value for the untouched chunks: 0 with MOVZ, 0xFFFF with MOVN
    let inverted = ones > zeros;
    let fill = if inverted { 0xFFFF } else { 0 };

    let mut out = Vec::with_capacity(4);
    for hw in 0..4u32 {
        let part = chunk(hw);
        if part == fill {
            continue;
        }
        // All operands are in range by construction (hw < 4, part < 2^16)
        let inst = if out.is_empty() {
            if inverted {
                movn(rd, !part & 0xFFFF, hw)
            } else {
                movz(rd, part, hw)
            }
        } else {
            movk(rd, part, hw)
        };
        out.push(inst.ok()?);
    }
    if out.is_empty() {
        out.push(if inverted { movn(rd, 0, 0) } else { movz(rd, 0, 0) }.ok()?);
    }
    Some(out)
}

// =============================================================================
// Arithmetic and logic
// =============================================================================

fn add_sub_imm(base: u32, rd: Reg, rn: Reg, imm: u64) -> Result<Instruction, EncodeError> {
    let (imm12, sh) = if imm < 4096 {
        (imm, 0)
    } else if imm & 0xFFF == 0 {
        (imm >> 12, 1)
    } else {
        return Err(EncodeError::ImmediateOutOfRange {
            field: "imm12",
            value: imm as i64,
            width: 12,
            signed: false,
        });
    };
    Ok(Instruction(
        base | (sh << 22) | unsigned("imm12", imm12, 12, 10)? | reg(rn, 5) | reg(rd, 0),
    ))
}

/// `add xd|sp, xn|sp, #imm` (imm < 4096, or a multiple of 4096 below 2^24)
pub fn add_imm(rd: Reg, rn: Reg, imm: u64) -> Result<Instruction, EncodeError> {
    add_sub_imm(0x9100_0000, rd, rn, imm)
}

/// `sub xd|sp, xn|sp, #imm`
pub fn sub_imm(rd: Reg, rn: Reg, imm: u64) -> Result<Instruction, EncodeError> {
    add_sub_imm(0xD100_0000, rd, rn, imm)
}

fn three_reg(base: u32, rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction(base | reg(rm, 16) | reg(rn, 5) | reg(rd, 0))
}

pub fn add(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0x8B00_0000, rd, rn, rm)
}

pub fn sub(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0xCB00_0000, rd, rn, rm)
}

/// `neg xd, xm`
pub fn neg(rd: Reg, rm: Reg) -> Instruction {
    sub(rd, Reg::XZR, rm)
}

/// `mul xd, xn, xm` (MADD with xzr accumulator)
pub fn mul(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0x9B00_7C00, rd, rn, rm)
}

pub fn sdiv(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0x9AC0_0C00, rd, rn, rm)
}

pub fn and(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0x8A00_0000, rd, rn, rm)
}

pub fn orr(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0xAA00_0000, rd, rn, rm)
}

pub fn eor(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0xCA00_0000, rd, rn, rm)
}

pub fn lslv(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0x9AC0_2000, rd, rn, rm)
}

pub fn asrv(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    three_reg(0x9AC0_2800, rd, rn, rm)
}

/// `cmp xn, xm`
pub fn cmp(rn: Reg, rm: Reg) -> Instruction {
    three_reg(0xEB00_0000, Reg::XZR, rn, rm)
}

/// `cmp xn, #imm12`
pub fn cmp_imm(rn: Reg, imm12: u64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(
        0xF100_001F | unsigned("imm12", imm12, 12, 10)? | reg(rn, 5),
    ))
}

/// `cset xd, cond` (CSINC xd, xzr, xzr, !cond)
pub fn cset(rd: Reg, cond: Cond) -> Instruction {
    Instruction(0x9A9F_07E0 | ((cond.invert() as u32) << 12) | reg(rd, 0))
}

// =============================================================================
// Loads and stores
// =============================================================================

/// `ldr xt, [xn|sp, #offset]` with an unsigned, 8-byte scaled offset.
pub fn ldr(rt: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    let imm12 = scaled("ldr offset", offset, 8)?;
    Ok(Instruction(
        0xF940_0000 | unsigned("ldr offset", imm12 as u64, 12, 10)? | reg(rn, 5) | reg(rt, 0),
    ))
}

/// `str xt, [xn|sp, #offset]`
pub fn str(rt: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    let imm12 = scaled("str offset", offset, 8)?;
    Ok(Instruction(
        0xF900_0000 | unsigned("str offset", imm12 as u64, 12, 10)? | reg(rn, 5) | reg(rt, 0),
    ))
}

fn indexed(base: u32, field: &'static str, rt: Reg, rn: Reg, imm9: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(base | signed(field, imm9, 9, 12)? | reg(rn, 5) | reg(rt, 0)))
}

/// `ldr xt, [xn], #imm9`
pub fn ldr_post(rt: Reg, rn: Reg, imm9: i64) -> Result<Instruction, EncodeError> {
    indexed(0xF840_0400, "ldr post-index", rt, rn, imm9)
}

/// `ldr xt, [xn, #imm9]!`
pub fn ldr_pre(rt: Reg, rn: Reg, imm9: i64) -> Result<Instruction, EncodeError> {
    indexed(0xF840_0C00, "ldr pre-index", rt, rn, imm9)
}

/// `str xt, [xn], #imm9`
pub fn str_post(rt: Reg, rn: Reg, imm9: i64) -> Result<Instruction, EncodeError> {
    indexed(0xF800_0400, "str post-index", rt, rn, imm9)
}

/// `str xt, [xn, #imm9]!`
pub fn str_pre(rt: Reg, rn: Reg, imm9: i64) -> Result<Instruction, EncodeError> {
    indexed(0xF800_0C00, "str pre-index", rt, rn, imm9)
}

/// `ldr xt, <pc + 4 * words>`
pub fn ldr_literal(rt: Reg, words: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0x5800_0000 | signed("ldr literal", words, 19, 5)? | reg(rt, 0)))
}

fn pair(base: u32, field: &'static str, rt: Reg, rt2: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    let imm7 = scaled(field, offset, 8)?;
    Ok(Instruction(
        base | signed(field, imm7, 7, 15)? | reg(rt2, 10) | reg(rn, 5) | reg(rt, 0),
    ))
}

/// `stp xt, xt2, [xn|sp, #offset]!`
pub fn stp_pre(rt: Reg, rt2: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    pair(0xA980_0000, "stp pre-index", rt, rt2, rn, offset)
}

/// `stp xt, xt2, [xn|sp, #offset]`
pub fn stp(rt: Reg, rt2: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    pair(0xA900_0000, "stp offset", rt, rt2, rn, offset)
}

/// `ldp xt, xt2, [xn|sp], #offset`
pub fn ldp_post(rt: Reg, rt2: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    pair(0xA8C0_0000, "ldp post-index", rt, rt2, rn, offset)
}

/// `ldp xt, xt2, [xn|sp, #offset]`
pub fn ldp(rt: Reg, rt2: Reg, rn: Reg, offset: i64) -> Result<Instruction, EncodeError> {
    pair(0xA940_0000, "ldp offset", rt, rt2, rn, offset)
}

// =============================================================================
// Branches
// =============================================================================

/// `b <pc + 4 * words>`
pub fn b(words: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0x1400_0000 | signed("b offset", words, 26, 0)?))
}

/// `bl <pc + 4 * words>`
pub fn bl(words: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0x9400_0000 | signed("bl offset", words, 26, 0)?))
}

/// `b.<cond> <pc + 4 * words>`
pub fn b_cond(cond: Cond, words: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0x5400_0000 | signed("b.cond offset", words, 19, 5)? | cond as u32))
}

/// `cbz xt, <pc + 4 * words>`
pub fn cbz(rt: Reg, words: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0xB400_0000 | signed("cbz offset", words, 19, 5)? | reg(rt, 0)))
}

/// `cbnz xt, <pc + 4 * words>`
pub fn cbnz(rt: Reg, words: i64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0xB500_0000 | signed("cbnz offset", words, 19, 5)? | reg(rt, 0)))
}

pub fn blr(rn: Reg) -> Instruction {
    Instruction(0xD63F_0000 | reg(rn, 5))
}

pub fn br(rn: Reg) -> Instruction {
    Instruction(0xD61F_0000 | reg(rn, 5))
}

/// `ret` (through x30)
pub fn ret() -> Instruction {
    Instruction(0xD65F_0000 | reg(Reg::LR, 5))
}

pub fn nop() -> Instruction {
    Instruction(0xD503_201F)
}

/// `brk #imm16`
pub fn brk(imm16: u64) -> Result<Instruction, EncodeError> {
    Ok(Instruction(0xD420_0000 | unsigned("brk", imm16, 16, 5)?))
}

// =============================================================================
// Placeholders
// =============================================================================

const PLACEHOLDER_BASE: u32 = 0xF000;

/// What a reserved trap instruction stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    ReturnBranch = 1,
    ErrorBranch = 2,
    RecursiveCall = 3,
    LargeImmediate = 4,
    LocalWrite = 5,
    LocalRead = 6,
    Prologue = 7,
    RecursionCheck = 8,
    ControlBranch = 9,
}

impl Placeholder {
    fn from_tag(tag: u32) -> Option<Placeholder> {
        use Placeholder::*;
        Some(match tag {
            1 => ReturnBranch,
            2 => ErrorBranch,
            3 => RecursiveCall,
            4 => LargeImmediate,
            5 => LocalWrite,
            6 => LocalRead,
            7 => Prologue,
            8 => RecursionCheck,
            9 => ControlBranch,
            _ => return None,
        })
    }

    /// The trap instruction for this placeholder kind.
    pub fn instruction(self) -> Instruction {
        Instruction(0xD420_0000 | ((PLACEHOLDER_BASE | self as u32) << 5))
    }

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::ReturnBranch => "pending return branch",
            Placeholder::ErrorBranch => "pending error branch",
            Placeholder::RecursiveCall => "pending recursive call",
            Placeholder::LargeImmediate => "pending literal load",
            Placeholder::LocalWrite => "pending local write",
            Placeholder::LocalRead => "pending local read",
            Placeholder::Prologue => "pending prologue",
            Placeholder::RecursionCheck => "pending recursion error check",
            Placeholder::ControlBranch => "pending control-flow branch",
        }
    }
}

/// The raw tag of a reserved trap, for any `brk #0xF0xx`.
pub fn placeholder_tag(inst: Instruction) -> Option<u32> {
    if inst.0 & 0xFFE0_001F != 0xD420_0000 {
        return None;
    }
    let imm = field(inst, 5, 16);
    (imm & 0xFF00 == PLACEHOLDER_BASE).then_some(imm & 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(n: u8) -> Reg {
        Reg::x(n)
    }

    #[test]
    fn test_known_encodings() {
        // Reference words from the A64 manual / a stock assembler
        assert_eq!(ret().bits(), 0xD65F_03C0);
        assert_eq!(nop().bits(), 0xD503_201F);
        assert_eq!(stp_pre(Reg::FP, Reg::LR, Reg::SP, -16).unwrap().bits(), 0xA9BF_7BFD);
        assert_eq!(ldp_post(Reg::FP, Reg::LR, Reg::SP, 16).unwrap().bits(), 0xA8C1_7BFD);
        assert_eq!(mov_sp(Reg::FP, Reg::SP).bits(), 0x9100_03FD);
        assert_eq!(mov(x(0), x(1)).bits(), 0xAA01_03E0);
        assert_eq!(mul(x(0), x(0), x(1)).bits(), 0x9B01_7C00);
        assert_eq!(add(x(0), x(0), x(1)).bits(), 0x8B01_0000);
        assert_eq!(blr(x(16)).bits(), 0xD63F_0200);
        assert_eq!(movz(x(0), 42, 0).unwrap().bits(), 0xD280_0540);
        assert_eq!(cset(x(0), Cond::Le).bits(), 0x9A9F_C7E0);
        assert_eq!(cmp(x(0), x(1)).bits(), 0xEB01_001F);
    }

    #[test]
    fn test_unsigned_field_range() {
        assert_eq!(unsigned("f", 0xFFF, 12, 10), Ok(0xFFF << 10));
        assert!(matches!(
            unsigned("f", 0x1000, 12, 10),
            Err(EncodeError::ImmediateOutOfRange { width: 12, signed: false, .. })
        ));
    }

    #[test]
    fn test_signed_field_law() {
        // For every width used by the encoder, encode then sign-extend is the identity
        for width in [7u32, 9, 19, 26] {
            let min = -(1i64 << (width - 1));
            let max = (1i64 << (width - 1)) - 1;
            for v in [min, min + 1, -1, 0, 1, max - 1, max] {
                let packed = signed("f", v, width, 3).unwrap();
                let back = signed_field(Instruction::from_raw(packed), 3, width);
                assert_eq!(back, v, "width {} value {}", width, v);
            }
            assert!(signed("f", max + 1, width, 0).is_err());
            assert!(signed("f", min - 1, width, 0).is_err());
        }
    }

    #[test]
    fn test_branch_offsets_decode() {
        for words in [-(1 << 25), -1, 0, 1, (1 << 25) - 1] {
            let inst = bl(words).unwrap();
            assert_eq!(field(inst, 26, 6), 0b100101);
            assert_eq!(signed_field(inst, 0, 26), words);
        }
        assert!(b(1 << 25).is_err());

        let inst = cbnz(x(3), -7).unwrap();
        assert_eq!(field(inst, 0, 5), 3);
        assert_eq!(signed_field(inst, 5, 19), -7);
        assert!(cbz(x(0), 1 << 18).is_err());
    }

    #[test]
    fn test_load_store_fields() {
        let inst = ldr(x(2), Reg::SP, 32).unwrap();
        assert_eq!(field(inst, 0, 5), 2);
        assert_eq!(field(inst, 5, 5), 31);
        assert_eq!(field(inst, 10, 12), 4);

        assert!(matches!(ldr(x(0), Reg::SP, 12), Err(EncodeError::Misaligned { .. })));
        assert!(ldr(x(0), Reg::SP, -8).is_err());
        assert!(str(x(0), Reg::SP, 8 * 4096).is_err());

        let inst = str_post(x(8), Reg::DSP, 8).unwrap();
        assert_eq!(signed_field(inst, 12, 9), 8);
        let inst = ldr_pre(x(8), Reg::DSP, -8).unwrap();
        assert_eq!(signed_field(inst, 12, 9), -8);
    }

    #[test]
    fn test_add_imm_shifted_form() {
        let inst = sub_imm(Reg::SP, Reg::SP, 4096).unwrap();
        assert_eq!(field(inst, 22, 1), 1);
        assert_eq!(field(inst, 10, 12), 1);
        assert!(add_imm(x(0), x(0), 4097).is_err());
    }

    /// Tiny evaluator for MOVZ/MOVN/MOVK sequences.
    fn run_moves(seq: &[Instruction]) -> i64 {
        let mut value = 0u64;
        for inst in seq {
            let hw = field(*inst, 21, 2) * 16;
            let imm = (field(*inst, 5, 16) as u64) << hw;
            match inst.bits() & 0xFF80_0000 {
                0xD280_0000 => value = imm,
                0x9280_0000 => value = !imm,
                0xF280_0000 => value = (value & !(0xFFFFu64 << hw)) | imm,
                other => panic!("unexpected opcode {:#x}", other),
            }
        }
        value as i64
    }

    #[test]
    fn test_mov_imm_reproduces_values() {
        for v in [
            0i64,
            1,
            -1,
            42,
            0xFFFF,
            0x1_0000,
            -0x1_0000,
            0x1234_5678,
            0x1234_0000_5678,
            i64::MIN,
            i64::MAX,
            -12345678901,
        ] {
            let seq = mov_imm(x(5), v, 4).unwrap();
            assert_eq!(seq.len(), mov_imm_len(v));
            assert_eq!(run_moves(&seq), v, "value {:#x}", v);
            assert!(seq.iter().all(|i| field(*i, 0, 5) == 5));
        }
    }

    #[test]
    fn test_mov_imm_respects_chunk_limit() {
        assert!(mov_imm(x(0), 0x1234_5678_9ABC, 2).is_none());
        assert_eq!(mov_imm(x(0), 0x1234_5678, 2).map(|s| s.len()), Some(2));
        assert_eq!(mov_imm(x(0), -2, 1).map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_placeholder_round_trip() {
        for kind in [
            Placeholder::ReturnBranch,
            Placeholder::ErrorBranch,
            Placeholder::RecursiveCall,
            Placeholder::LargeImmediate,
            Placeholder::LocalWrite,
            Placeholder::LocalRead,
            Placeholder::Prologue,
            Placeholder::RecursionCheck,
            Placeholder::ControlBranch,
        ] {
            assert_eq!(kind.instruction().placeholder(), Some(kind));
        }
        // An ordinary debugger breakpoint is not a placeholder
        assert_eq!(brk(0).unwrap().placeholder(), None);
        assert_eq!(nop().placeholder(), None);
    }
}
