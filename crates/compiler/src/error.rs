//! Compiler error types.
//!
//! Ordinary errors (encoding, memory, dependency, arity) are returned as
//! [`CompileError`] values and abort only the current definition. Broken
//! internal invariants go through [`consistency_failure`] instead, which
//! never returns.

use kiln_core::{EncodeError, MemoryError};
use std::backtrace::Backtrace;
use thiserror::Error;

/// Error type for every fallible compiler operation.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("unknown word '{0}'")]
    UnknownWord(String),

    #[error(transparent)]
    Arity(#[from] ArityError),

    /// A closed call graph reaches an interpreter-only word
    #[error("call path reaches an interpreter-only word: {}", .path.join(" -> "))]
    Dependency { path: Vec<String> },

    #[error("no definition is being compiled")]
    NoActiveDefinition,

    #[error("definition of '{0}' is still in progress")]
    DefinitionInProgress(String),

    #[error("local '{0}' is read before it is assigned")]
    UninitializedLocal(String),

    #[error("unbalanced control flow: {0}")]
    UnbalancedControlFlow(String),

    #[error("'{name}' cannot be inlined: {reason}")]
    NotInlinable { name: String, reason: &'static str },

    #[error("cannot resolve external symbol '{0}'")]
    UnresolvedExternal(String),

    #[error("'{0}' can only be used inside a definition")]
    DefinitionOnly(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A word raised a non-zero error code at run time
    #[error("word raised error {0}")]
    Raised(i64),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Mismatch between the values available and the values a word needs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArityError {
    #[error("'{callee}' takes {expected} argument(s) but {found} are available")]
    Call {
        callee: String,
        expected: usize,
        found: usize,
    },

    /// Register convention: every pending value is an argument register,
    /// so a call cannot leave extra values underneath its inputs.
    #[error(
        "'{callee}' takes {expected} argument(s) but {found} values are pending; \
         with the register convention the depth at a call must match exactly \
         (store extra values in locals with `->`, or use the stack convention)"
    )]
    ExtraValues {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("'{word}' must leave {expected} value(s) but {found} are available")]
    Return {
        word: String,
        expected: usize,
        found: usize,
    },

    #[error("'{what}' needs a value but none is available")]
    Underflow { what: String },

    #[error("more than {limit} values pending")]
    Overflow { limit: usize },

    #[error("'{word}' declares {count} {what}; at most {limit} are supported")]
    Signature {
        word: String,
        what: &'static str,
        count: usize,
        limit: usize,
    },
}

/// Report a violated compiler invariant and abort the process.
///
/// Used for conditions no input can cause, such as a placeholder trap
/// surviving the end of a definition.
pub(crate) fn consistency_failure(message: std::fmt::Arguments<'_>) -> ! {
    tracing::error!("internal consistency failure: {}", message);
    eprintln!(
        "kiln: internal consistency failure: {}\n{}",
        message,
        Backtrace::force_capture()
    );
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_message_shows_path() {
        let err = CompileError::Dependency {
            path: vec!["main".into(), "report".into(), ".".into()],
        };
        assert_eq!(
            err.to_string(),
            "call path reaches an interpreter-only word: main -> report -> ."
        );
    }

    #[test]
    fn test_arity_converts_into_compile_error() {
        let err: CompileError = ArityError::Call {
            callee: "+".into(),
            expected: 2,
            found: 1,
        }
        .into();
        assert!(matches!(err, CompileError::Arity(ArityError::Call { .. })));
        assert_eq!(err.to_string(), "'+' takes 2 argument(s) but 1 are available");
    }
}
