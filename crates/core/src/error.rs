//! Error types for instruction encoding and code memory management.

use thiserror::Error;

/// An operand did not fit the instruction field it was destined for.
///
/// Encoding errors are always raised before anything is written to a
/// code buffer; values are never silently truncated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// An immediate lies outside the range of its bit field
    #[error("{field}: immediate {value} does not fit in {width} {kind} bits", kind = sign_kind(.signed))]
    ImmediateOutOfRange {
        field: &'static str,
        value: i64,
        width: u32,
        signed: bool,
    },

    /// A register index outside x0..x31
    #[error("invalid register index {0} (expected 0..=31)")]
    InvalidRegister(u32),

    /// A byte offset that is not a multiple of the access size
    #[error("{field}: offset {offset} is not a multiple of {scale}")]
    Misaligned {
        field: &'static str,
        offset: i64,
        scale: i64,
    },
}

fn sign_kind(signed: &bool) -> &'static str {
    if *signed { "signed" } else { "unsigned" }
}

/// Failure of an OS memory operation or a heap bookkeeping rule.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("mmap of {len} bytes failed: {source}")]
    Map {
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("mprotect({protection}) on {len} bytes at {addr:#x} failed: {source}")]
    Protect {
        protection: &'static str,
        addr: usize,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("munmap failed: {0}")]
    Unmap(#[source] std::io::Error),

    /// A region has no room for the requested allocation
    #[error("{region} region exhausted: requested {requested} more bytes, {available} available")]
    Exhausted {
        region: &'static str,
        requested: usize,
        available: usize,
    },

    /// Published instructions are immutable; only staged ones may be patched
    #[error("instruction {index} is already published and cannot be patched")]
    PublishedPatch { index: usize },

    /// Instruction index outside the written part of the buffer
    #[error("instruction index {index} out of bounds (length {len})")]
    OutOfBounds { index: usize, len: usize },
}
