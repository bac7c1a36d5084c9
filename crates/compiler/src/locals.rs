//! Local-variable allocator
//!
//! Locals are tracked without data-flow analysis. Each local is in one of
//! three states:
//!
//! ```text
//!  Uninitialized ──set──▶ Unstable ──clobber/barrier──▶ Stable
//!                            ▲                            │
//!                            └────────────set─────────────┘
//! ```
//!
//! - `set` only associates the local with the register already holding the
//!   value; nothing is emitted.
//! - When that register is about to be overwritten (a call, a new value, a
//!   control-flow join), an *Unstable* local gets a write placeholder at
//!   the current position and becomes *Stable*. The write is speculative.
//! - `get` reuses the resident register in place, moves from it, or
//!   (when the local is not resident anywhere) emits a read placeholder.
//!   A read confirms every write recorded before it.
//!
//! The permanent location of each local (a free local-candidate register or
//! a stack slot) is decided by [`LocalAllocator::resolve`] at the end of
//! the definition, once every clobbered register is known. Confirmed writes
//! become real moves/stores; unconfirmed writes become `nop`, so no
//! instruction ever changes position.

use crate::error::CompileError;
use kiln_core::encode;
use kiln_core::{EncodeError, InstrIndex, Instruction, Reg, RegSet};

pub type LocalId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Uninitialized,
    /// Value lives only in its resident register
    Unstable,
    /// Value is (or will be, once writes are confirmed) at its home location
    Stable,
}

/// Final home of a local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(Reg),
    /// `[sp, #8 * n]` inside the word's frame
    Slot(usize),
}

/// How to make a local's value available in a target register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Already resident in the target
    InPlace,
    /// Resident in another register
    Move { from: Reg },
    /// Not resident; read it from its home location
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WriteRecord {
    at: InstrIndex,
    from: Reg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadRecord {
    at: InstrIndex,
    into: Reg,
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    state: LocalState,
    resident: Option<Reg>,
    pending: Vec<WriteRecord>,
    confirmed: Vec<WriteRecord>,
    reads: Vec<ReadRecord>,
}

/// Outcome of end-of-word placement.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Final instruction for every read/write placeholder
    pub patches: Vec<(InstrIndex, Instruction)>,
    /// Stack slots used
    pub slots: usize,
    /// Registers chosen as homes
    pub homes: RegSet,
    pub locations: Vec<(String, Option<Location>)>,
}

#[derive(Debug, Default)]
pub struct LocalAllocator {
    locals: Vec<Local>,
}

impl LocalAllocator {
    pub fn new() -> Self {
        LocalAllocator::default()
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub fn clear(&mut self) {
        self.locals.clear();
    }

    /// Find a local by name, or create it uninitialized.
    pub fn declare(&mut self, name: &str) -> LocalId {
        if let Some(id) = self.find(name) {
            return id;
        }
        self.locals.push(Local {
            name: name.to_string(),
            state: LocalState::Uninitialized,
            resident: None,
            pending: Vec::new(),
            confirmed: Vec::new(),
            reads: Vec::new(),
        });
        self.locals.len() - 1
    }

    pub fn find(&self, name: &str) -> Option<LocalId> {
        self.locals.iter().position(|l| l.name == name)
    }

    pub fn name(&self, id: LocalId) -> &str {
        &self.locals[id].name
    }

    pub fn state(&self, id: LocalId) -> LocalState {
        self.locals[id].state
    }

    pub fn resident(&self, id: LocalId) -> Option<Reg> {
        self.locals[id].resident
    }

    /// The value of `id` now lives in `reg`.
    pub fn set(&mut self, id: LocalId, reg: Reg) {
        let local = &mut self.locals[id];
        local.state = LocalState::Unstable;
        local.resident = Some(reg);
    }

    /// Decide how to get `id` into `target`.
    pub fn access(&self, id: LocalId, target: Reg) -> Result<Access, CompileError> {
        let local = &self.locals[id];
        match (local.state, local.resident) {
            (LocalState::Uninitialized, _) => Err(CompileError::UninitializedLocal(local.name.clone())),
            (_, Some(reg)) if reg == target => Ok(Access::InPlace),
            (_, Some(reg)) => Ok(Access::Move { from: reg }),
            (_, None) => Ok(Access::Load),
        }
    }

    /// A read placeholder for `id` was emitted at `at`, loading into `into`.
    pub fn record_read(&mut self, id: LocalId, at: InstrIndex, into: Reg) {
        let local = &mut self.locals[id];
        let pending = std::mem::take(&mut local.pending);
        local.confirmed.extend(pending);
        local.reads.push(ReadRecord { at, into });
        local.resident = Some(into);
    }

    /// Registers in `regs` are about to be overwritten.
    ///
    /// Every Unstable local resident in one of them gets a write
    /// placeholder from `emit_write`; Stable ones just lose residency.
    pub fn clobber<E>(
        &mut self,
        regs: RegSet,
        mut emit_write: impl FnMut() -> Result<InstrIndex, E>,
    ) -> Result<(), E> {
        for local in &mut self.locals {
            let Some(reg) = local.resident else {
                continue;
            };
            if !regs.contains(reg) {
                continue;
            }
            if local.state == LocalState::Unstable {
                let at = emit_write()?;
                local.pending.push(WriteRecord { at, from: reg });
                local.state = LocalState::Stable;
            }
            local.resident = None;
        }
        Ok(())
    }

    /// Control-flow join: no register association survives.
    pub fn barrier<E>(&mut self, emit_write: impl FnMut() -> Result<InstrIndex, E>) -> Result<(), E> {
        self.clobber(RegSet::from_mask(u32::MAX), emit_write)
    }

    /// Place every local that needs a home and encode its reads and writes.
    ///
    /// Homes are taken in order from the local candidates not in
    /// `clobbered`; the rest get stack slots.
    pub fn resolve(&self, clobbered: RegSet) -> Result<Resolution, EncodeError> {
        let mut free = RegSet::LOCAL_CANDIDATES.difference(clobbered).iter();
        let mut resolution = Resolution::default();

        for local in &self.locals {
            let needs_home = !local.confirmed.is_empty() || !local.reads.is_empty();
            let location = if needs_home {
                Some(match free.next() {
                    Some(reg) => {
                        resolution.homes.insert(reg);
                        Location::Register(reg)
                    }
                    None => {
                        resolution.slots += 1;
                        Location::Slot(resolution.slots - 1)
                    }
                })
            } else {
                None
            };

            for write in &local.pending {
                resolution.patches.push((write.at, encode::nop()));
            }
            if let Some(location) = location {
                for write in &local.confirmed {
                    let inst = match location {
                        Location::Register(home) => encode::mov(home, write.from),
                        Location::Slot(n) => encode::str(write.from, Reg::SP, 8 * n as i64)?,
                    };
                    resolution.patches.push((write.at, inst));
                }
                for read in &local.reads {
                    let inst = match location {
                        Location::Register(home) => encode::mov(read.into, home),
                        Location::Slot(n) => encode::ldr(read.into, Reg::SP, 8 * n as i64)?,
                    };
                    resolution.patches.push((read.at, inst));
                }
            }
            resolution.locations.push((local.name.clone(), location));
        }
        Ok(resolution)
    }
}
