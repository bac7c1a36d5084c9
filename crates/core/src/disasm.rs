//! Diagnostic disassembly
//!
//! On AArch64 hosts instructions are rendered through `bad64`; elsewhere
//! only placeholder traps get a name and everything else is shown as a raw
//! `.word`. Neither path is needed for correctness.

use crate::encode::Instruction;

/// Render one instruction located at `address`.
pub fn disassemble(inst: Instruction, address: u64) -> String {
    if let Some(placeholder) = inst.placeholder() {
        return format!("<{}>", placeholder.name());
    }
    decode(inst, address)
}

#[cfg(target_arch = "aarch64")]
fn decode(inst: Instruction, address: u64) -> String {
    match bad64::decode(inst.bits(), address) {
        Ok(decoded) => decoded.to_string(),
        Err(_) => format!(".word {:#010x}", inst.bits()),
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn decode(inst: Instruction, _address: u64) -> String {
    format!(".word {:#010x}", inst.bits())
}

/// Hex rendering of embedded data, 8 bytes per group.
pub fn hex_words(bytes: &[u8]) -> Vec<String> {
    bytes.chunks(8).map(hex::encode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{Placeholder, nop};

    #[test]
    fn test_placeholders_are_named() {
        let text = disassemble(Placeholder::RecursiveCall.instruction(), 0);
        assert_eq!(text, "<pending recursive call>");
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn test_decodes_real_instructions() {
        assert_eq!(disassemble(nop(), 0x1000), "nop");
    }

    #[cfg(not(target_arch = "aarch64"))]
    #[test]
    fn test_raw_words_elsewhere() {
        assert_eq!(disassemble(nop(), 0x1000), ".word 0xd503201f");
    }

    #[test]
    fn test_hex_words_groups_by_eight() {
        let data = 0x0102_0304_0506_0708u64.to_le_bytes();
        assert_eq!(hex_words(&data), vec!["0807060504030201".to_string()]);
    }
}
