//! JIT configuration
//!
//! [`JitConfig`] controls the calling convention, region sizes and the
//! inlining policy. It can be built fluently or loaded from TOML.
//!
//! # Example
//!
//! ```rust,ignore
//! use kilnc::{Convention, JitConfig};
//!
//! let config = JitConfig::new()
//!     .with_convention(Convention::Stack)
//!     .with_inline_threshold(12)
//!     .with_auto_inline(false);
//! ```
//!
//! The same settings as a file:
//!
//! ```toml
//! convention = "stack"
//! inline_threshold = 12
//! auto_inline = false
//! ```

use crate::error::CompileError;
use kiln_core::HeapLayout;
use serde::Deserialize;
use std::path::Path;

/// How values flow between words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    /// Arguments and results in x0..x7, as in the platform ABI
    #[default]
    Register,
    /// Arguments and results on a software data stack addressed by x19
    Stack,
}

impl Convention {
    pub fn name(self) -> &'static str {
        match self {
            Convention::Register => "register",
            Convention::Stack => "stack",
        }
    }
}

/// Configuration for a [`Jit`](crate::Jit) instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    pub convention: Convention,

    /// Capacity of each code heap, in instructions
    pub code_capacity: usize,

    /// Bytes reserved for string constants
    pub constants_capacity: usize,

    /// Bytes reserved for variables
    pub data_capacity: usize,

    /// Slots in the external address table
    pub address_table_slots: usize,

    /// Cells in the data stack used by the stack convention
    pub data_stack_depth: usize,

    /// Largest body (in instructions) that is inlined automatically
    pub inline_threshold: usize,

    /// Inline eligible words at their call sites
    pub auto_inline: bool,

    /// Most MOVZ/MOVK instructions used for a literal before it is loaded
    /// from trailing data instead (1..=4)
    pub max_inline_chunks: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        let layout = HeapLayout::default();
        JitConfig {
            convention: Convention::default(),
            code_capacity: layout.code_capacity,
            constants_capacity: layout.constants_capacity,
            data_capacity: layout.data_capacity,
            address_table_slots: layout.address_table_slots,
            data_stack_depth: 1 << 16,
            inline_threshold: 8,
            auto_inline: true,
            max_inline_chunks: 2,
        }
    }
}

impl JitConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        JitConfig::default()
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, CompileError> {
        let config: JitConfig =
            toml::from_str(text).map_err(|e| CompileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CompileError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn with_convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_code_capacity(mut self, instructions: usize) -> Self {
        self.code_capacity = instructions;
        self
    }

    pub fn with_constants_capacity(mut self, bytes: usize) -> Self {
        self.constants_capacity = bytes;
        self
    }

    pub fn with_data_capacity(mut self, bytes: usize) -> Self {
        self.data_capacity = bytes;
        self
    }

    pub fn with_address_table_slots(mut self, slots: usize) -> Self {
        self.address_table_slots = slots;
        self
    }

    pub fn with_data_stack_depth(mut self, cells: usize) -> Self {
        self.data_stack_depth = cells;
        self
    }

    pub fn with_inline_threshold(mut self, instructions: usize) -> Self {
        self.inline_threshold = instructions;
        self
    }

    pub fn with_auto_inline(mut self, enabled: bool) -> Self {
        self.auto_inline = enabled;
        self
    }

    pub fn with_max_inline_chunks(mut self, chunks: usize) -> Self {
        self.max_inline_chunks = chunks;
        self
    }

    /// Reject settings the code generator cannot honour.
    pub fn validate(&self) -> Result<(), CompileError> {
        if !(1..=4).contains(&self.max_inline_chunks) {
            return Err(CompileError::Config(format!(
                "max_inline_chunks must be between 1 and 4, got {}",
                self.max_inline_chunks
            )));
        }
        for (name, value) in [
            ("code_capacity", self.code_capacity),
            ("constants_capacity", self.constants_capacity),
            ("data_capacity", self.data_capacity),
            ("address_table_slots", self.address_table_slots),
            ("data_stack_depth", self.data_stack_depth),
        ] {
            if value == 0 {
                return Err(CompileError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Region sizes for the code heap.
    pub fn layout(&self) -> HeapLayout {
        HeapLayout {
            code_capacity: self.code_capacity,
            constants_capacity: self.constants_capacity,
            data_capacity: self.data_capacity,
            address_table_slots: self.address_table_slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_builder() {
        let config = JitConfig::new()
            .with_convention(Convention::Stack)
            .with_inline_threshold(3)
            .with_auto_inline(false)
            .with_code_capacity(4096);

        assert_eq!(config.convention, Convention::Stack);
        assert_eq!(config.inline_threshold, 3);
        assert!(!config.auto_inline);
        assert_eq!(config.layout().code_capacity, 4096);
        assert_eq!(config.max_inline_chunks, 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = JitConfig::from_toml_str("convention = \"stack\"\ninline_threshold = 4\n").unwrap();
        assert_eq!(config.convention, Convention::Stack);
        assert_eq!(config.inline_threshold, 4);
        assert_eq!(config.data_stack_depth, JitConfig::default().data_stack_depth);
    }

    #[test]
    fn test_toml_rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            JitConfig::from_toml_str("colour = \"blue\""),
            Err(CompileError::Config(_))
        ));
        assert!(matches!(
            JitConfig::from_toml_str("convention = \"spaghetti\""),
            Err(CompileError::Config(_))
        ));
        let err = JitConfig::from_toml_str("max_inline_chunks = 7").unwrap_err();
        assert!(err.to_string().contains("max_inline_chunks"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auto_inline = false").unwrap();
        writeln!(file, "code_capacity = 8192").unwrap();

        let config = JitConfig::load(file.path()).unwrap();
        assert!(!config.auto_inline);
        assert_eq!(config.code_capacity, 8192);
    }

    #[test]
    fn test_load_missing_file() {
        let err = JitConfig::load(Path::new("/nonexistent/kiln.toml")).unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }
}
