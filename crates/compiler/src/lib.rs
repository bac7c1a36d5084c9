//! Kiln Compiler Library
//!
//! Compiles Forth-like words straight to AArch64 machine code, one word at
//! a time, with no intermediate representation. Each reference, literal or
//! local in a definition is turned into instructions the moment it is
//! seen; anything that depends on information only known at the end of the
//! definition is written as a placeholder trap and patched when the word
//! is finished.
//!
//! ```rust,ignore
//! use kilnc::{Jit, JitConfig, Signature};
//!
//! let mut jit = Jit::new(JitConfig::default())?;
//! let square = jit.begin_word("square", Signature::new(1, 1))?;
//! jit.compile_word("dup")?;
//! jit.compile_word("*")?;
//! jit.end_word()?;
//! assert_eq!(jit.invoke(square, &[7])?, vec![49]);
//! ```
//!
//! # Modules
//!
//! - `symbol`: symbol arena, lookup table and the caller/callee graph
//! - `call_graph`: closure validation and recursion analysis
//! - `fixup`: the ledger of placeholders resolved at the end of a word
//! - `locals`: deferred register/stack-slot assignment for local variables
//! - `convention`: register- and stack-based calling conventions
//! - `codegen`: the word compiler (`Jit`)
//! - `intrinsics`, `dynlib`: native functions reachable from compiled code
//! - `config`: `JitConfig`, loadable from TOML

pub mod call_graph;
pub mod codegen;
pub mod config;
pub mod convention;
pub mod dynlib;
pub mod error;
pub mod fixup;
pub mod intrinsics;
pub mod locals;
pub mod symbol;

pub use call_graph::{CallGraph, validate_closed};
pub use codegen::{Emitter, Jit, PRIMITIVES, PROLOGUE_SLOTS, Signature, Snapshot};
pub use config::{Convention, JitConfig};
pub use convention::{CallingConvention, Invocation};
pub use error::{ArityError, CompileError};
pub use symbol::{Bookmarks, NativeCode, Symbol, SymbolFlags, SymbolId, SymbolKind, SymbolTable};
