//! Kiln Core: the assembler layer of the Kiln JIT
//!
//! This crate knows how to produce AArch64 instruction words and where to
//! put them. It has no notion of words, symbols or calling conventions;
//! the compiler crate builds those on top.
//!
//! Key design principles:
//! - Instruction: an opaque 32-bit word, only ever built by the encoder
//! - InstrIndex: the handle for code everywhere; addresses appear only at
//!   the point of invocation
//! - W^X: code is written in one region and published into another,
//!   never both writable and executable
//!
//! # Modules
//!
//! - `encode`: bit-field packing and the A64 instruction constructors
//! - `reg`: registers, register sets, condition codes
//! - `buffer`: fixed-capacity instruction buffer with stable indices
//! - `memory`: the OS mapping (`map`, `make_writable`, `make_executable`, `flush_icache`, `unmap`)
//! - `heap`: writable/executable heap pair plus constants, data and address table; `sync`
//! - `disasm`: diagnostic rendering of instructions
//! - `error`: encoding and memory errors

pub mod buffer;
pub mod disasm;
pub mod encode;
pub mod error;
pub mod heap;
pub mod memory;
pub mod reg;

pub use buffer::{INSTRUCTION_BYTES, InstrIndex, InstructionBuffer};
pub use encode::{Instruction, Placeholder, placeholder_tag};
pub use error::{EncodeError, MemoryError};
pub use heap::{CodeHeap, HeapLayout, HeapMark, SyncReport};
pub use memory::{CodeMemory, Protection, page_size};
pub use reg::{Cond, Reg, RegSet};
