//! Fixed-capacity instruction buffer
//!
//! An append-only run of 32-bit instruction words living in memory owned by
//! a [`CodeMemory`](crate::memory::CodeMemory) mapping. The capacity is fixed
//! when the mapping is made and the buffer never reallocates: compiled code
//! refers to other words by address, so an instruction, once written, keeps
//! its index (and therefore its address) for the life of the heap.
//!
//! ## Layout
//!
//! ```text
//! base                               base + 4*len          base + 4*capacity
//! ┌────────┬────────┬─────┬──────────┬────────────────────────┐
//! │ inst 0 │ inst 1 │ ... │ inst n-1 │     (unwritten)        │
//! └────────┴────────┴─────┴──────────┴────────────────────────┘
//! ```

use crate::encode::Instruction;
use crate::error::MemoryError;
use std::ptr::NonNull;

/// Index of an instruction within a code heap.
///
/// Indices are the primary handle for code everywhere in the compiler;
/// they are turned into addresses only at the point of invocation.
pub type InstrIndex = usize;

/// Size of one instruction word in bytes.
pub const INSTRUCTION_BYTES: usize = 4;

pub struct InstructionBuffer {
    base: NonNull<u32>,
    len: usize,
    capacity: usize,
}

impl InstructionBuffer {
    /// Wrap `capacity` words of mapped memory starting at `base`.
    ///
    /// # Safety
    /// `base` must be 4-byte aligned and valid for reads (and, whenever
    /// [`push`](Self::push) or [`set`](Self::set) is called, writes) of
    /// `capacity` words for the lifetime of the buffer.
    pub(crate) unsafe fn from_raw_parts(base: NonNull<u32>, capacity: usize) -> Self {
        InstructionBuffer {
            base,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address of the first word.
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Append one instruction and return its index.
    pub fn push(&mut self, inst: Instruction) -> Result<InstrIndex, MemoryError> {
        if self.len == self.capacity {
            return Err(MemoryError::Exhausted {
                region: "code",
                requested: INSTRUCTION_BYTES,
                available: 0,
            });
        }
        let index = self.len;
        // SAFETY: index < capacity and the memory is writable (see from_raw_parts)
        unsafe { self.base.as_ptr().add(index).write(inst.bits()) };
        self.len += 1;
        Ok(index)
    }

    pub fn get(&self, index: InstrIndex) -> Option<Instruction> {
        if index >= self.len {
            return None;
        }
        // SAFETY: index < len <= capacity
        Some(Instruction::from_raw(unsafe { self.base.as_ptr().add(index).read() }))
    }

    /// Overwrite an already written instruction.
    pub fn set(&mut self, index: InstrIndex, inst: Instruction) -> Result<(), MemoryError> {
        if index >= self.len {
            return Err(MemoryError::OutOfBounds {
                index,
                len: self.len,
            });
        }
        // SAFETY: index < len <= capacity
        unsafe { self.base.as_ptr().add(index).write(inst.bits()) };
        Ok(())
    }

    /// Drop every instruction at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// The written words as a slice.
    pub fn words(&self) -> &[u32] {
        // SAFETY: the first `len` words are initialised and readable
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// Raw pointer to word `index`, for bulk copies between heaps.
    pub(crate) fn word_ptr(&self, index: InstrIndex) -> *mut u32 {
        debug_assert!(index <= self.capacity);
        // SAFETY: stays within (or one past) the mapped capacity
        unsafe { self.base.as_ptr().add(index) }
    }

    /// Record that words up to `len` were filled by a bulk copy.
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{nop, ret};

    fn with_buffer(capacity: usize, f: impl FnOnce(&mut InstructionBuffer)) {
        let mut backing = vec![0u32; capacity];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let mut buffer = unsafe { InstructionBuffer::from_raw_parts(base, capacity) };
        f(&mut buffer);
    }

    #[test]
    fn test_push_assigns_stable_indices() {
        with_buffer(4, |buf| {
            assert_eq!(buf.push(nop()).unwrap(), 0);
            assert_eq!(buf.push(ret()).unwrap(), 1);
            assert_eq!(buf.get(0), Some(nop()));
            assert_eq!(buf.get(1), Some(ret()));
            assert_eq!(buf.get(2), None);
            assert_eq!(buf.words(), &[nop().bits(), ret().bits()]);
        });
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        with_buffer(2, |buf| {
            buf.push(nop()).unwrap();
            buf.push(nop()).unwrap();
            assert!(matches!(buf.push(nop()), Err(MemoryError::Exhausted { .. })));
            assert_eq!(buf.len(), 2);
        });
    }

    #[test]
    fn test_set_and_truncate() {
        with_buffer(4, |buf| {
            buf.push(nop()).unwrap();
            buf.set(0, ret()).unwrap();
            assert_eq!(buf.get(0), Some(ret()));
            assert!(buf.set(1, ret()).is_err());

            buf.push(nop()).unwrap();
            buf.truncate(1);
            assert_eq!(buf.len(), 1);
            buf.truncate(10);
            assert_eq!(buf.len(), 1);
        });
    }
}
