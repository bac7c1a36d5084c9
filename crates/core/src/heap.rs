//! Dual code heap
//!
//! One [`CodeMemory`] mapping is carved into guarded regions:
//!
//! ```text
//! ┌───────┬──────────┬───────┬──────────┬───────┬───────────┬───────┬──────┬───────┬─────────┬───────┐
//! │ guard │ writable │ guard │  exec    │ guard │ constants │ guard │ data │ guard │ address │ guard │
//! │       │  (RW)    │       │  (RX)    │       │   (R)     │       │ (RW) │       │ table   │       │
//! └───────┴──────────┴───────┴──────────┴───────┴───────────┴───────┴──────┴───────┴─────────┴───────┘
//! ```
//!
//! Instructions are always emitted and patched in the *writable* buffer.
//! [`CodeHeap::sync`] publishes the staged suffix into the *executable*
//! buffer; the executable length never exceeds the writable length, and
//! instructions below it are immutable.
//!
//! ## Sync
//!
//! 1. If the writable length equals the published length: nothing to do.
//! 2. Make the page-rounded executable range writable (RW, never RWX).
//! 3. Copy the new words across.
//! 4. Make the range executable again (RX).
//! 5. Invalidate the instruction cache for the copied bytes.
//! 6. Advance the published length.
//!
//! Everything above this module refers to code by [`InstrIndex`]; a raw
//! address is produced only by [`CodeHeap::address_of`] when something is
//! about to be called.

use crate::buffer::{INSTRUCTION_BYTES, InstrIndex, InstructionBuffer};
use crate::encode::Instruction;
use crate::error::MemoryError;
use crate::memory::{CodeMemory, Protection, page_align, page_size};
use std::ops::Range;
use std::ptr::NonNull;

/// Sizes of the regions of a [`CodeHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    /// Capacity of each code buffer, in instructions
    pub code_capacity: usize,
    /// Read-only payload bytes (string literals)
    pub constants_capacity: usize,
    /// Mutable data bytes (variables)
    pub data_capacity: usize,
    /// 8-byte slots for external symbol addresses
    pub address_table_slots: usize,
}

impl Default for HeapLayout {
    fn default() -> Self {
        HeapLayout {
            code_capacity: 1 << 20,
            constants_capacity: 1 << 16,
            data_capacity: 1 << 16,
            address_table_slots: 1024,
        }
    }
}

/// Outcome of one [`CodeHeap::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Published length before the sync
    pub from: InstrIndex,
    /// Published length after the sync
    pub to: InstrIndex,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Allocation cursors, for rewinding a heap to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapMark {
    pub code: InstrIndex,
    pub constants: usize,
    pub data: usize,
    pub slots: usize,
}

/// A bump-allocated byte region inside the mapping.
#[derive(Debug, Clone, Copy)]
struct Region {
    /// Byte offset from the mapping base
    offset: usize,
    capacity: usize,
    used: usize,
}

impl Region {
    fn bytes(&self) -> Range<usize> {
        self.offset..self.offset + self.capacity
    }

    fn reserve(&mut self, region: &'static str, len: usize, align: usize) -> Result<usize, MemoryError> {
        let start = self.used.next_multiple_of(align.max(1));
        let available = self.capacity.saturating_sub(self.used);
        if start + len > self.capacity {
            return Err(MemoryError::Exhausted {
                region,
                requested: len,
                available,
            });
        }
        self.used = start + len;
        Ok(self.offset + start)
    }
}

pub struct CodeHeap {
    memory: CodeMemory,
    writable: InstructionBuffer,
    executable: InstructionBuffer,
    /// Byte offset of the executable buffer inside the mapping
    exec_offset: usize,
    constants: Region,
    data: Region,
    table: Region,
}

impl CodeHeap {
    /// Map and protect all regions.
    pub fn new(layout: HeapLayout) -> Result<CodeHeap, MemoryError> {
        let page = page_size();
        let code_bytes = page_align(layout.code_capacity.max(1) * INSTRUCTION_BYTES);
        let constants_bytes = page_align(layout.constants_capacity.max(1));
        let data_bytes = page_align(layout.data_capacity.max(1));
        let table_bytes = page_align(layout.address_table_slots.max(1) * 8);

        let mut cursor = page;
        let mut carve = |len: usize| {
            let start = cursor;
            cursor += len + page;
            start
        };
        let write_offset = carve(code_bytes);
        let exec_offset = carve(code_bytes);
        let constants_offset = carve(constants_bytes);
        let data_offset = carve(data_bytes);
        let table_offset = carve(table_bytes);
        let total = cursor;

        let mut memory = CodeMemory::map(total)?;
        memory.protect(write_offset..write_offset + code_bytes, Protection::ReadWrite)?;
        memory.protect(exec_offset..exec_offset + code_bytes, Protection::ReadExecute)?;
        memory.protect(
            constants_offset..constants_offset + constants_bytes,
            Protection::ReadOnly,
        )?;
        memory.protect(data_offset..data_offset + data_bytes, Protection::ReadWrite)?;
        memory.protect(table_offset..table_offset + table_bytes, Protection::ReadWrite)?;

        let words = code_bytes / INSTRUCTION_BYTES;
        let base = memory.base();
        // SAFETY: both ranges lie inside the mapping, are page aligned, and
        // stay mapped for as long as `memory` (owned by the heap) lives.
        // The executable buffer is only written through `sync`, which opens
        // the range for writing first.
        let (writable, executable) = unsafe {
            (
                InstructionBuffer::from_raw_parts(word_base(base, write_offset), words),
                InstructionBuffer::from_raw_parts(word_base(base, exec_offset), words),
            )
        };

        tracing::debug!(
            total,
            code_words = words,
            "code heap mapped (constants {}B, data {}B, {} table slots)",
            constants_bytes,
            data_bytes,
            table_bytes / 8
        );

        Ok(CodeHeap {
            memory,
            writable,
            executable,
            exec_offset,
            constants: Region {
                offset: constants_offset,
                capacity: constants_bytes,
                used: 0,
            },
            data: Region {
                offset: data_offset,
                capacity: data_bytes,
                used: 0,
            },
            table: Region {
                offset: table_offset,
                capacity: table_bytes,
                used: 0,
            },
        })
    }

    // =========================================================================
    // Code
    // =========================================================================

    /// Index the next emitted instruction will get.
    pub fn here(&self) -> InstrIndex {
        self.writable.len()
    }

    /// Number of instructions safe to execute.
    pub fn published(&self) -> InstrIndex {
        self.executable.len()
    }

    pub fn capacity(&self) -> usize {
        self.writable.capacity()
    }

    /// Stage one instruction.
    pub fn emit(&mut self, inst: Instruction) -> Result<InstrIndex, MemoryError> {
        self.writable.push(inst)
    }

    /// Stage a 64-bit literal as two little-endian words; returns the first.
    pub fn emit_literal(&mut self, value: u64) -> Result<InstrIndex, MemoryError> {
        let at = self.writable.push(Instruction::from_raw(value as u32))?;
        self.writable.push(Instruction::from_raw((value >> 32) as u32))?;
        Ok(at)
    }

    /// Overwrite a staged instruction. Published instructions are immutable.
    pub fn patch(&mut self, index: InstrIndex, inst: Instruction) -> Result<(), MemoryError> {
        if index < self.published() {
            return Err(MemoryError::PublishedPatch { index });
        }
        self.writable.set(index, inst)
    }

    /// A staged or published instruction.
    pub fn instruction(&self, index: InstrIndex) -> Option<Instruction> {
        self.writable.get(index)
    }

    /// The staged words in `range` (clamped to what has been written).
    pub fn words(&self, range: Range<InstrIndex>) -> &[u32] {
        let words = self.writable.words();
        let end = range.end.min(words.len());
        let start = range.start.min(end);
        &words[start..end]
    }

    /// Executable address of instruction `index`.
    pub fn address_of(&self, index: InstrIndex) -> usize {
        self.executable.base_address() + index * INSTRUCTION_BYTES
    }

    /// Instruction index of an executable address inside the code buffer.
    pub fn index_of(&self, addr: usize) -> Option<InstrIndex> {
        let base = self.executable.base_address();
        let end = base + self.executable.capacity() * INSTRUCTION_BYTES;
        if addr < base || addr >= end || (addr - base) % INSTRUCTION_BYTES != 0 {
            return None;
        }
        Some((addr - base) / INSTRUCTION_BYTES)
    }

    /// Whether `addr` lies anywhere in this heap's mapping.
    pub fn contains(&self, addr: usize) -> bool {
        self.memory.contains(addr)
    }

    /// Publish every staged instruction.
    pub fn sync(&mut self) -> Result<SyncReport, MemoryError> {
        self.sync_to(self.writable.len())
    }

    /// Publish staged instructions below `end`, leaving later ones staged.
    pub fn sync_to(&mut self, end: InstrIndex) -> Result<SyncReport, MemoryError> {
        let from = self.published();
        let to = end.min(self.writable.len());
        if to <= from {
            return Ok(SyncReport { from, to });
        }

        let bytes = self.exec_offset + from * INSTRUCTION_BYTES..self.exec_offset + to * INSTRUCTION_BYTES;
        self.memory.make_writable(bytes.clone())?;
        // SAFETY: both buffers have capacity for `to` words, the ranges are
        // in different regions, and the destination pages are now writable
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.writable.word_ptr(from),
                self.executable.word_ptr(from),
                to - from,
            );
        }
        self.memory.make_executable(bytes.clone())?;
        self.memory.flush_icache(bytes.clone());
        self.executable.set_len(to);

        tracing::trace!(
            from,
            to,
            pages = page_align(bytes.end - bytes.start) / page_size(),
            transitions = self.memory.transitions(),
            "sync"
        );
        Ok(SyncReport { from, to })
    }

    /// Make sure instructions below `end` are executable.
    pub fn ensure_published(&mut self, end: InstrIndex) -> Result<(), MemoryError> {
        if end > self.published() {
            self.sync_to(end)?;
        }
        Ok(())
    }

    /// Protection changes made so far (for the W^X and idempotence checks).
    pub fn transitions(&self) -> usize {
        self.memory.transitions()
    }

    // =========================================================================
    // Constants, data, address table
    // =========================================================================

    /// Copy `bytes` into the constants region; returns their address.
    pub fn add_constant(&mut self, bytes: &[u8]) -> Result<usize, MemoryError> {
        let offset = self.constants.reserve("constants", bytes.len(), 8)?;
        let region = self.constants.bytes();
        self.memory.protect(region.clone(), Protection::ReadWrite)?;
        // SAFETY: `offset..offset + len` was reserved inside the constants region
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.memory.base().as_ptr().add(offset),
                bytes.len(),
            );
        }
        self.memory.protect(region, Protection::ReadOnly)?;
        Ok(self.memory.base().as_ptr() as usize + offset)
    }

    /// Reserve zeroed, `align`-aligned bytes of mutable data; returns the address.
    pub fn allocate_data(&mut self, len: usize, align: usize) -> Result<usize, MemoryError> {
        let offset = self.data.reserve("data", len, align)?;
        // SAFETY: reserved inside the read/write data region
        unsafe { self.memory.base().as_ptr().add(offset).write_bytes(0, len) };
        Ok(self.memory.base().as_ptr() as usize + offset)
    }

    /// Claim an address-table slot holding `target`; returns the slot address.
    pub fn bind_slot(&mut self, target: usize) -> Result<usize, MemoryError> {
        let offset = self.table.reserve("address table", 8, 8)?;
        let addr = self.memory.base().as_ptr() as usize + offset;
        // SAFETY: reserved, 8-byte aligned, read/write
        unsafe { (addr as *mut usize).write(target) };
        Ok(addr)
    }

    /// Address of slot `index` in the address table.
    pub fn slot_address(&self, index: usize) -> Option<usize> {
        (index * 8 < self.table.used)
            .then(|| self.memory.base().as_ptr() as usize + self.table.offset + index * 8)
    }

    /// Current value of slot `index`.
    pub fn slot_value(&self, index: usize) -> Option<usize> {
        // SAFETY: slot_address only returns bound, readable slots
        self.slot_address(index).map(|addr| unsafe { (addr as *const usize).read() })
    }

    // =========================================================================
    // Rewind
    // =========================================================================

    pub fn mark(&self) -> HeapMark {
        HeapMark {
            code: self.writable.len(),
            constants: self.constants.used,
            data: self.data.used,
            slots: self.table.used / 8,
        }
    }

    /// Forget everything allocated after `mark`.
    ///
    /// Published instructions beyond the mark stop being published; the next
    /// sync rewrites them.
    pub fn rewind(&mut self, mark: HeapMark) {
        self.writable.truncate(mark.code);
        self.executable.truncate(mark.code);
        self.constants.used = self.constants.used.min(mark.constants);
        self.data.used = self.data.used.min(mark.data);
        self.table.used = self.table.used.min(mark.slots * 8);
    }
}

fn word_base(base: NonNull<u8>, offset: usize) -> NonNull<u32> {
    // SAFETY: offset is inside the mapping, so the result is non-null
    unsafe { NonNull::new_unchecked(base.as_ptr().add(offset) as *mut u32) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{Placeholder, movz, nop, ret};
    use crate::reg::Reg;

    fn small_heap() -> CodeHeap {
        CodeHeap::new(HeapLayout {
            code_capacity: 4096,
            constants_capacity: 256,
            data_capacity: 256,
            address_table_slots: 4,
        })
        .unwrap()
    }

    #[test]
    fn test_sync_publishes_staged_words() {
        let mut heap = small_heap();
        heap.emit(movz(Reg::x(0), 42, 0).unwrap()).unwrap();
        heap.emit(ret()).unwrap();
        assert_eq!(heap.published(), 0);

        let report = heap.sync().unwrap();
        assert_eq!(report, SyncReport { from: 0, to: 2 });
        assert_eq!(heap.published(), 2);

        let exec = unsafe { std::slice::from_raw_parts(heap.address_of(0) as *const u32, 2) };
        assert_eq!(exec, heap.words(0..2));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mut heap = small_heap();
        heap.emit(nop()).unwrap();
        heap.sync().unwrap();
        let transitions = heap.transitions();
        let published = heap.published();

        let report = heap.sync().unwrap();
        assert!(report.is_noop());
        assert_eq!(heap.published(), published);
        assert_eq!(heap.transitions(), transitions);
    }

    #[test]
    fn test_each_sync_is_bracketed_by_two_transitions() {
        let mut heap = small_heap();
        for _ in 0..3 {
            let before = heap.transitions();
            heap.emit(nop()).unwrap();
            heap.sync().unwrap();
            assert_eq!(heap.transitions(), before + 2);
        }
    }

    #[test]
    fn test_published_instructions_are_immutable() {
        let mut heap = small_heap();
        let at = heap.emit(Placeholder::ReturnBranch.instruction()).unwrap();
        heap.patch(at, nop()).unwrap();
        heap.sync().unwrap();
        assert!(matches!(
            heap.patch(at, ret()),
            Err(MemoryError::PublishedPatch { index: 0 })
        ));
        assert_eq!(heap.instruction(at), Some(nop()));
    }

    #[test]
    fn test_ensure_published_only_syncs_when_needed() {
        let mut heap = small_heap();
        heap.emit(nop()).unwrap();
        heap.ensure_published(0).unwrap();
        assert_eq!(heap.published(), 0);
        heap.ensure_published(1).unwrap();
        assert_eq!(heap.published(), 1);
    }

    #[test]
    fn test_partial_publication_leaves_later_words_staged() {
        let mut heap = small_heap();
        heap.emit(nop()).unwrap();
        heap.emit(ret()).unwrap();
        let open = heap.emit(Placeholder::Prologue.instruction()).unwrap();
        heap.ensure_published(2).unwrap();
        assert_eq!(heap.published(), 2);
        heap.patch(open, nop()).unwrap();
    }

    #[test]
    fn test_literals_occupy_two_words() {
        let mut heap = small_heap();
        let at = heap.emit_literal(0x1122_3344_5566_7788).unwrap();
        assert_eq!(heap.here(), at + 2);
        assert_eq!(heap.words(at..at + 2), &[0x5566_7788, 0x1122_3344]);
    }

    #[test]
    fn test_address_index_round_trip() {
        let heap = small_heap();
        let addr = heap.address_of(17);
        assert_eq!(heap.index_of(addr), Some(17));
        assert_eq!(heap.index_of(addr + 1), None);
        assert_eq!(heap.index_of(0), None);
        assert!(heap.contains(addr));
    }

    #[test]
    fn test_constants_data_and_slots() {
        let mut heap = small_heap();
        let s = heap.add_constant(b"hello").unwrap();
        assert_eq!(unsafe { std::slice::from_raw_parts(s as *const u8, 5) }, b"hello");
        let t = heap.add_constant(b"x").unwrap();
        assert_eq!(t % 8, 0);
        assert_eq!(t - s, 8);

        let v = heap.allocate_data(8, 8).unwrap();
        unsafe { (v as *mut i64).write(-5) };
        assert_eq!(unsafe { (v as *const i64).read() }, -5);

        let slot = heap.bind_slot(0xDEAD_BEEF).unwrap();
        assert_eq!(heap.slot_address(0), Some(slot));
        assert_eq!(heap.slot_value(0), Some(0xDEAD_BEEF));
        assert_eq!(heap.slot_address(1), None);
    }

    #[test]
    fn test_regions_report_exhaustion() {
        let mut heap = small_heap();
        let page = page_size();
        assert!(heap.allocate_data(page, 8).is_ok());
        assert!(matches!(
            heap.allocate_data(1, 1),
            Err(MemoryError::Exhausted { region: "data", .. })
        ));
    }

    #[test]
    fn test_rewind_restores_cursors_and_unpublishes() {
        let mut heap = small_heap();
        heap.emit(nop()).unwrap();
        heap.sync().unwrap();
        let mark = heap.mark();

        heap.emit(ret()).unwrap();
        heap.emit(ret()).unwrap();
        heap.sync().unwrap();
        heap.add_constant(b"abc").unwrap();
        heap.allocate_data(16, 8).unwrap();
        heap.bind_slot(1).unwrap();

        heap.rewind(mark);
        assert_eq!(heap.mark(), mark);
        assert_eq!(heap.published(), 1);

        // The rewound indices can be staged and patched again
        let at = heap.emit(nop()).unwrap();
        assert_eq!(at, 1);
        heap.patch(at, ret()).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_no_region_is_ever_writable_and_executable() {
        let mut heap = small_heap();
        heap.emit(nop()).unwrap();
        heap.sync().unwrap();
        heap.add_constant(b"k").unwrap();

        let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
        let lo = heap.memory.base().as_ptr() as usize;
        let hi = lo + heap.memory.len();
        for line in maps.lines() {
            let mut parts = line.split_whitespace();
            let (Some(range), Some(perms)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Some((start, end)) = range.split_once('-') else {
                continue;
            };
            let start = usize::from_str_radix(start, 16).unwrap();
            let end = usize::from_str_radix(end, 16).unwrap();
            if end <= lo || start >= hi {
                continue;
            }
            assert!(
                !(perms.contains('w') && perms.contains('x')),
                "W+X mapping inside the code heap: {}",
                line
            );
        }
    }
}
