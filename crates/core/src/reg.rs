//! AArch64 general-purpose registers and register sets
//!
//! Register number 31 is context dependent in A64: it names the stack
//! pointer in address and ADD/SUB-immediate positions and the zero register
//! everywhere else. Both spellings share the same index here; the encoder
//! functions document which meaning each operand takes.

use crate::error::EncodeError;
use std::fmt;

/// A validated general-purpose register index (0..=31).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(u8);

impl Reg {
    /// Frame pointer
    pub const FP: Reg = Reg(29);
    /// Link register
    pub const LR: Reg = Reg(30);
    /// Stack pointer (index 31 in address positions)
    pub const SP: Reg = Reg(31);
    /// Zero register (index 31 in data positions)
    pub const XZR: Reg = Reg(31);
    /// Intra-procedure-call scratch register used for native call targets
    pub const IP0: Reg = Reg(16);
    /// Transfer register for push/pop sequences
    pub const TRANSFER: Reg = Reg(8);
    /// Data stack pointer of the stack convention
    pub const DSP: Reg = Reg(19);
    /// Error register of the stack convention
    pub const ERR: Reg = Reg(20);

    /// Validate a raw register index.
    pub fn new(index: u32) -> Result<Reg, EncodeError> {
        if index > 31 {
            return Err(EncodeError::InvalidRegister(index));
        }
        Ok(Reg(index as u8))
    }

    /// `x<n>` for an index known to be in range.
    ///
    /// # Panics
    /// Panics if `n > 31`; use [`Reg::new`] for untrusted input.
    pub const fn x(n: u8) -> Reg {
        assert!(n <= 31, "register index out of range");
        Reg(n)
    }

    pub const fn index(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            29 => write!(f, "fp"),
            30 => write!(f, "lr"),
            31 => write!(f, "sp/xzr"),
            n => write!(f, "x{}", n),
        }
    }
}

/// A set of registers as a 32-bit mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegSet(u32);

impl RegSet {
    pub const EMPTY: RegSet = RegSet(0);

    /// x0..x17: everything a native (platform ABI) callee may destroy,
    /// including the argument registers and both IP scratch registers.
    pub const CALLER_SAVED: RegSet = RegSet(0x0003_FFFF);

    /// Registers eligible as home locations for local variables.
    pub const LOCAL_CANDIDATES: RegSet = RegSet::range(9, 15);

    /// Inclusive range `x<lo>..=x<hi>`.
    pub const fn range(lo: u8, hi: u8) -> RegSet {
        let mut mask = 0u32;
        let mut i = lo;
        while i <= hi {
            mask |= 1 << i;
            i += 1;
        }
        RegSet(mask)
    }

    pub const fn from_mask(mask: u32) -> RegSet {
        RegSet(mask)
    }

    pub const fn mask(self) -> u32 {
        self.0
    }

    pub fn with(self, reg: Reg) -> RegSet {
        RegSet(self.0 | (1 << reg.0))
    }

    pub fn insert(&mut self, reg: Reg) {
        self.0 |= 1 << reg.0;
    }

    pub fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << reg.0) != 0
    }

    pub fn union(self, other: RegSet) -> RegSet {
        RegSet(self.0 | other.0)
    }

    pub fn difference(self, other: RegSet) -> RegSet {
        RegSet(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Registers in ascending index order.
    pub fn iter(self) -> impl Iterator<Item = Reg> {
        (0u8..32).filter(move |i| self.0 & (1 << i) != 0).map(Reg)
    }
}

impl FromIterator<Reg> for RegSet {
    fn from_iter<I: IntoIterator<Item = Reg>>(iter: I) -> Self {
        let mut set = RegSet::EMPTY;
        for reg in iter {
            set.insert(reg);
        }
        set
    }
}

impl fmt::Debug for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|r| r.to_string())).finish()
    }
}

/// A64 condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
}

impl Cond {
    /// The condition with the opposite outcome (`Al` has none and maps to itself).
    pub fn invert(self) -> Cond {
        use Cond::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Hs => Lo,
            Lo => Hs,
            Mi => Pl,
            Pl => Mi,
            Vs => Vc,
            Vc => Vs,
            Hi => Ls,
            Ls => Hi,
            Ge => Lt,
            Lt => Ge,
            Gt => Le,
            Le => Gt,
            Al => Al,
        }
    }
}
