//! Diagnostic listing of a compiled word

use super::Jit;
use crate::call_graph::CallGraph;
use crate::symbol::{SymbolId, SymbolKind};
use kiln_core::INSTRUCTION_BYTES;
use kiln_core::disasm::{disassemble, hex_words};

impl Jit {
    /// Render bookmarks, flags, every instruction and the trailing data of
    /// `id` as text.
    pub fn dump(&self, id: SymbolId) -> Option<String> {
        let symbol = self.symbols.get(id)?;
        let mut out = format!(
            "{} ( {} -- {} ) {} {}\n",
            symbol.name,
            symbol.inputs,
            symbol.outputs,
            symbol.kind_name(),
            id
        );

        let flags = &symbol.flags;
        let mut notes = Vec::new();
        if flags.throws {
            notes.push("throws");
        }
        if !flags.auto_try {
            notes.push("no-auto-try");
        }
        if flags.definition_only {
            notes.push("compile-only");
        }
        if flags.interpreter_only {
            notes.push("interpreter-only");
        }

        match &symbol.kind {
            SymbolKind::Native(code) => {
                if code.inlinable {
                    notes.push("inlinable");
                }
                if code.leaf {
                    notes.push("leaf");
                }
                if code.pc_relative {
                    notes.push("pc-relative");
                }
                let graph = CallGraph::build(&self.symbols);
                if graph.is_recursive(id) {
                    notes.push("recursive");
                }
                let b = code.bookmarks;
                out.push_str(&format!(
                    "  start {} entry +{} body +{} epilogue +{} error +{} ret +{} data +{} literals +{} end +{}\n",
                    b.start,
                    b.entry - b.start,
                    b.body - b.start,
                    b.epilogue - b.start,
                    b.error_path - b.start,
                    b.ret - b.start,
                    b.data - b.start,
                    b.literals - b.start,
                    b.end - b.start
                ));
                out.push_str(&format!(
                    "  frame {} bytes, clobbers {:?}{}\n",
                    code.frame_size,
                    symbol.clobbers,
                    render_notes(&notes)
                ));
                let partners: Vec<&str> = graph
                    .recursive_cycles()
                    .iter()
                    .filter(|cycle| cycle.contains(&id))
                    .flat_map(|cycle| cycle.iter().copied())
                    .filter(|&other| other != id)
                    .map(|other| self.symbols[other].name.as_str())
                    .collect();
                if !partners.is_empty() {
                    out.push_str(&format!("  mutually recursive with {}\n", partners.join(" ")));
                }

                let labels = [
                    (b.entry, "entry"),
                    (b.body, "body"),
                    (b.epilogue, "epilogue"),
                    (b.error_path, "error"),
                    (b.data, "data"),
                ];
                for index in b.start..b.literals {
                    let Some(inst) = self.heap.instruction(index) else {
                        break;
                    };
                    let address = self.heap.address_of(index);
                    let label = labels
                        .iter()
                        .filter(|(at, _)| *at == index)
                        .map(|(_, name)| *name)
                        .collect::<Vec<_>>()
                        .join(",");
                    if !label.is_empty() {
                        out.push_str(&format!("  {}:\n", label));
                    }
                    out.push_str(&format!(
                        "    {:#014x}  {:08x}  {}\n",
                        address,
                        inst.bits(),
                        disassemble(inst, address as u64)
                    ));
                }
                if b.literals < b.end {
                    let bytes: Vec<u8> = self
                        .heap
                        .words(b.literals..b.end)
                        .iter()
                        .flat_map(|w| w.to_le_bytes())
                        .collect();
                    out.push_str("  literals:\n");
                    for (i, line) in hex_words(&bytes).into_iter().enumerate() {
                        let address = self.heap.address_of(b.literals) + i * 2 * INSTRUCTION_BYTES;
                        out.push_str(&format!("    {:#014x}  {}\n", address, line));
                    }
                }
            }
            SymbolKind::Intrinsic { function } => {
                out.push_str(&format!("  native function at {:#x}{}\n", function, render_notes(&notes)));
            }
            SymbolKind::External { slot, address } => {
                out.push_str(&format!(
                    "  external at {:#x} through slot {:#x}{}\n",
                    address,
                    slot,
                    render_notes(&notes)
                ));
            }
        }
        Some(out)
    }
}

fn render_notes(notes: &[&str]) -> String {
    if notes.is_empty() {
        String::new()
    } else {
        format!(" [{}]", notes.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Signature;
    use crate::config::JitConfig;

    #[test]
    fn test_dump_lists_every_instruction() {
        let mut jit = Jit::new(JitConfig::default()).unwrap();
        jit.begin_word("sq", Signature::new(1, 1)).unwrap();
        jit.compile_word("dup").unwrap();
        jit.compile_word("*").unwrap();
        let id = jit.end_word().unwrap();

        let text = jit.dump(id).unwrap();
        assert!(text.starts_with("sq ( 1 -- 1 ) native"));
        assert!(text.contains("entry"));
        assert!(text.contains("inlinable"));
        let b = jit.symbol(id).unwrap().native().unwrap().bookmarks;
        let listed = text.lines().filter(|l| l.starts_with("    0x")).count();
        assert_eq!(listed, b.end - b.start);
    }

    #[test]
    fn test_dump_shows_literals() {
        let mut jit = Jit::new(JitConfig::default()).unwrap();
        jit.begin_word("big", Signature::new(0, 1)).unwrap();
        jit.compile_literal(0x1234_5678_9abc_def0).unwrap();
        let id = jit.end_word().unwrap();
        let text = jit.dump(id).unwrap();
        assert!(text.contains("literals:"));
        assert!(text.contains("pc-relative"));
        assert!(text.contains("f0debc9a78563412"));
    }

    #[test]
    fn test_dump_marks_recursive_words() {
        let mut jit = Jit::new(JitConfig::default()).unwrap();
        jit.begin_word("countdown", Signature::new(1, 1)).unwrap();
        jit.compile_local_set("n").unwrap();
        jit.compile_word("n").unwrap();
        jit.compile_literal(0).unwrap();
        jit.compile_word("<=").unwrap();
        jit.compile_if().unwrap();
        jit.compile_literal(0).unwrap();
        jit.compile_else().unwrap();
        jit.compile_word("n").unwrap();
        jit.compile_literal(1).unwrap();
        jit.compile_word("-").unwrap();
        jit.compile_recurse().unwrap();
        jit.compile_then().unwrap();
        let countdown = jit.end_word().unwrap();

        jit.begin_word("start", Signature::new(1, 1)).unwrap();
        jit.compile_call(countdown).unwrap();
        let start = jit.end_word().unwrap();

        let text = jit.dump(countdown).unwrap();
        assert!(text.contains("recursive"), "{}", text);
        assert!(!text.contains("mutually"));
        assert!(!jit.dump(start).unwrap().contains("recursive"));
    }

    #[test]
    fn test_dump_of_intrinsic() {
        let jit = Jit::new(JitConfig::default()).unwrap();
        let id = jit.lookup("emit").unwrap();
        let text = jit.dump(id).unwrap();
        assert!(text.contains("intrinsic"));
        assert!(text.contains("interpreter-only"));
    }
}
