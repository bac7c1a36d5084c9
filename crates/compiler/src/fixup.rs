//! Fixup ledger
//!
//! Some instructions cannot be encoded when they are emitted because their
//! target is not known yet: the epilogue of the word being compiled, its
//! error path, its own entry point, or the trailing literal data. They are
//! emitted as placeholder traps and a [`PendingPatch`] is pushed here. When
//! the definition ends, [`FixupLedger::resolve`] drains the ledger and
//! returns the final encodings, which are written into the *writable* heap
//! before the word is published.
//!
//! Resolution rules (offsets in instructions, relative to the placeholder):
//!
//! | patch           | becomes                                   |
//! |-----------------|-------------------------------------------|
//! | `Return`        | `b epilogue`                              |
//! | `Error`         | `cbnz reg, error_path` (or its stub)      |
//! | `Recurse`       | `bl entry`, check slot `cbnz err` or `nop`|
//! | `LoadImmediate` | `ldr reg, <literal>`                      |

use kiln_core::encode::{self, Placeholder};
use kiln_core::{EncodeError, InstrIndex, Instruction, Reg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPatch {
    /// Early `return`: jump to the epilogue
    Return { at: InstrIndex },
    /// Leave through the error path if `reg` is non-zero
    Error { at: InstrIndex, reg: Reg },
    /// Call to the word's own entry, with an error check right after it
    Recurse { at: InstrIndex, check: InstrIndex },
    /// Load a constant that does not fit an inline move sequence
    LoadImmediate { at: InstrIndex, reg: Reg, value: i64 },
}

impl PendingPatch {
    /// The placeholder emitted at `at`.
    pub fn placeholder(&self) -> Placeholder {
        match self {
            PendingPatch::Return { .. } => Placeholder::ReturnBranch,
            PendingPatch::Error { .. } => Placeholder::ErrorBranch,
            PendingPatch::Recurse { .. } => Placeholder::RecursiveCall,
            PendingPatch::LoadImmediate { .. } => Placeholder::LargeImmediate,
        }
    }

    pub fn at(&self) -> InstrIndex {
        match *self {
            PendingPatch::Return { at }
            | PendingPatch::Error { at, .. }
            | PendingPatch::Recurse { at, .. }
            | PendingPatch::LoadImmediate { at, .. } => at,
        }
    }
}

/// Positions known once a word's epilogue has been laid out.
#[derive(Debug, Clone)]
pub struct Targets {
    pub entry: InstrIndex,
    pub epilogue: InstrIndex,
    pub error_path: InstrIndex,
    /// Register holding the word's own error code on exit
    pub error_reg: Reg,
    /// `mov error_reg, reg; b error_path` stubs, one per source register
    pub stubs: Vec<(Reg, InstrIndex)>,
    /// First literal; literal `k` occupies two words at `data + 2k`
    pub data: InstrIndex,
    /// Whether recursive calls check the error register
    pub check_recursion: bool,
}

#[derive(Debug, Default)]
pub struct FixupLedger {
    pending: Vec<PendingPatch>,
}

impl FixupLedger {
    pub fn new() -> Self {
        FixupLedger::default()
    }

    pub fn push(&mut self, patch: PendingPatch) {
        self.pending.push(patch);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingPatch> {
        self.pending.iter()
    }

    /// Values of the large-immediate loads, in the order their literals are laid out.
    pub fn literals(&self) -> Vec<i64> {
        self.pending
            .iter()
            .filter_map(|p| match p {
                PendingPatch::LoadImmediate { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Registers that error branches test, other than `error_reg`; each needs a stub.
    pub fn stub_registers(&self, error_reg: Reg) -> Vec<Reg> {
        let mut regs: Vec<Reg> = Vec::new();
        for patch in &self.pending {
            if let PendingPatch::Error { reg, .. } = *patch {
                if reg != error_reg && !regs.contains(&reg) {
                    regs.push(reg);
                }
            }
        }
        regs
    }

    /// Drain the ledger and compute the final instruction for every
    /// placeholder it recorded.
    pub fn resolve(&mut self, targets: &Targets) -> Result<Vec<(InstrIndex, Instruction)>, EncodeError> {
        let mut patches = Vec::with_capacity(self.pending.len() + 1);
        let mut literal = 0usize;
        for patch in self.pending.drain(..) {
            match patch {
                PendingPatch::Return { at } => {
                    patches.push((at, encode::b(offset(at, targets.epilogue))?));
                }
                PendingPatch::Error { at, reg } => {
                    let target = if reg == targets.error_reg {
                        targets.error_path
                    } else {
                        targets
                            .stubs
                            .iter()
                            .find(|(r, _)| *r == reg)
                            .map(|(_, stub)| *stub)
                            .unwrap_or(targets.error_path)
                    };
                    patches.push((at, encode::cbnz(reg, offset(at, target))?));
                }
                PendingPatch::Recurse { at, check } => {
                    patches.push((at, encode::bl(offset(at, targets.entry))?));
                    let check_inst = if targets.check_recursion {
                        encode::cbnz(targets.error_reg, offset(check, targets.error_path))?
                    } else {
                        encode::nop()
                    };
                    patches.push((check, check_inst));
                }
                PendingPatch::LoadImmediate { at, reg, .. } => {
                    let slot = targets.data + 2 * literal;
                    literal += 1;
                    patches.push((at, encode::ldr_literal(reg, offset(at, slot))?));
                }
            }
        }
        Ok(patches)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn offset(from: InstrIndex, to: InstrIndex) -> i64 {
    to as i64 - from as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::encode::{field, signed_field};

    fn targets() -> Targets {
        Targets {
            entry: 100,
            epilogue: 140,
            error_path: 141,
            error_reg: Reg::x(1),
            stubs: vec![(Reg::x(3), 150)],
            data: 152,
            check_recursion: true,
        }
    }

    #[test]
    fn test_return_branches_to_epilogue() {
        let mut ledger = FixupLedger::new();
        ledger.push(PendingPatch::Return { at: 120 });
        let patches = ledger.resolve(&targets()).unwrap();
        assert!(ledger.is_empty());
        assert_eq!(patches[0].0, 120);
        assert_eq!(field(patches[0].1, 26, 6), 0b000101);
        assert_eq!(signed_field(patches[0].1, 0, 26), 20);
    }

    #[test]
    fn test_error_branch_uses_direct_path_or_stub() {
        let mut ledger = FixupLedger::new();
        ledger.push(PendingPatch::Error { at: 110, reg: Reg::x(1) });
        ledger.push(PendingPatch::Error { at: 111, reg: Reg::x(3) });
        assert_eq!(ledger.stub_registers(Reg::x(1)), vec![Reg::x(3)]);

        let patches = ledger.resolve(&targets()).unwrap();
        assert_eq!(patches[0].1, encode::cbnz(Reg::x(1), 31).unwrap());
        assert_eq!(patches[1].1, encode::cbnz(Reg::x(3), 39).unwrap());
    }

    #[test]
    fn test_recursion_calls_entry_and_patches_check() {
        let mut ledger = FixupLedger::new();
        ledger.push(PendingPatch::Recurse { at: 130, check: 131 });
        let patches = ledger.resolve(&targets()).unwrap();
        assert_eq!(patches[0], (130, encode::bl(-30).unwrap()));
        assert_eq!(patches[1], (131, encode::cbnz(Reg::x(1), 10).unwrap()));

        ledger.push(PendingPatch::Recurse { at: 130, check: 131 });
        let quiet = Targets {
            check_recursion: false,
            ..targets()
        };
        let patches = ledger.resolve(&quiet).unwrap();
        assert_eq!(patches[1], (131, encode::nop()));
    }

    #[test]
    fn test_literals_are_laid_out_in_order() {
        let mut ledger = FixupLedger::new();
        ledger.push(PendingPatch::LoadImmediate { at: 105, reg: Reg::x(0), value: 1 << 40 });
        ledger.push(PendingPatch::Return { at: 106 });
        ledger.push(PendingPatch::LoadImmediate { at: 107, reg: Reg::IP0, value: -7 << 33 });
        assert_eq!(ledger.literals(), vec![1 << 40, -7 << 33]);

        let patches = ledger.resolve(&targets()).unwrap();
        assert_eq!(patches[0], (105, encode::ldr_literal(Reg::x(0), 47).unwrap()));
        assert_eq!(patches[2], (107, encode::ldr_literal(Reg::IP0, 47).unwrap()));
    }

    #[test]
    fn test_placeholder_kinds() {
        assert_eq!(
            PendingPatch::Recurse { at: 0, check: 1 }.placeholder(),
            Placeholder::RecursiveCall
        );
        assert_eq!(PendingPatch::Return { at: 9 }.at(), 9);
    }
}
