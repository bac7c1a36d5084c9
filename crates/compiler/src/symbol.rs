//! Symbol table and dependency edges
//!
//! Symbols live in an append-only arena indexed by [`SymbolId`]. A user
//! definition gets its arena entry when compilation starts (so it can refer
//! to itself) and becomes visible by name only when it ends. Redefining a
//! name shadows the old entry in the lookup table; the old symbol and its
//! code stay valid for callers compiled against it.
//!
//! Every compiled call records a caller → callee edge. Two flags flow up
//! those edges as soon as the edge exists:
//!
//! - `throws`: into callers that capture callee errors (`auto_try`)
//! - `interpreter_only`: into every caller

use kiln_core::{InstrIndex, RegSet};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Handle of a symbol in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(usize);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Instruction positions inside a native word.
///
/// ```text
/// start   entry         body                 epilogue  error_path  ret    data    literals  end
///   │ nop…  │ frame setup │  …compiled body…   │ mov err,0 │ teardown │ ret │ stubs │ 64-bit │
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bookmarks {
    /// First reserved prologue slot
    pub start: InstrIndex,
    /// First executed instruction (unused prologue slots are skipped)
    pub entry: InstrIndex,
    /// First body instruction
    pub body: InstrIndex,
    /// Normal exit path: clears the error register, then falls into `error_path`
    pub epilogue: InstrIndex,
    /// Frame teardown shared by the normal and error exits
    pub error_path: InstrIndex,
    /// The `ret` instruction
    pub ret: InstrIndex,
    /// Start of trailing data: error stubs, then literals
    pub data: InstrIndex,
    /// First 64-bit literal (two-word aligned)
    pub literals: InstrIndex,
    pub end: InstrIndex,
}

/// Properties of a word compiled to native code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeCode {
    pub bookmarks: Bookmarks,
    /// Body may be copied verbatim to call sites
    pub inlinable: bool,
    /// Contains PC-relative literal loads
    pub pc_relative: bool,
    /// Contains internal branches
    pub has_branches: bool,
    /// Uses `return` before the end of the body
    pub early_return: bool,
    /// Makes no calls
    pub leaf: bool,
    /// Bytes of stack reserved for locals
    pub frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    /// Compiled by this JIT
    Native(NativeCode),
    /// Built-in native function following the platform ABI
    Intrinsic { function: usize },
    /// Dynamic-library function reached through an address-table slot
    External { slot: usize, address: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolFlags {
    /// May return a non-zero error code
    pub throws: bool,
    /// Branches to the error path when a callee raises
    pub auto_try: bool,
    /// Usable only while compiling a definition
    pub definition_only: bool,
    /// Must never end up in an ahead-of-time image
    pub interpreter_only: bool,
    /// Redefinition does not warn
    pub suppress_redefinition_warning: bool,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub inputs: usize,
    pub outputs: usize,
    /// Registers the word may overwrite
    pub clobbers: RegSet,
    pub flags: SymbolFlags,
    pub callees: BTreeSet<SymbolId>,
    pub callers: BTreeSet<SymbolId>,
    /// Entered in the lookup table (definition finished)
    pub visible: bool,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, inputs: usize, outputs: usize) -> Symbol {
        Symbol {
            name: name.into(),
            kind,
            inputs,
            outputs,
            clobbers: RegSet::EMPTY,
            flags: SymbolFlags {
                auto_try: true,
                ..SymbolFlags::default()
            },
            callees: BTreeSet::new(),
            callers: BTreeSet::new(),
            visible: false,
        }
    }

    pub fn native(&self) -> Option<&NativeCode> {
        match &self.kind {
            SymbolKind::Native(code) => Some(code),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            SymbolKind::Native(_) => "native",
            SymbolKind::Intrinsic { .. } => "intrinsic",
            SymbolKind::External { .. } => "external",
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    lookup: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Add a symbol to the arena without making it visible.
    pub fn create(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len());
        self.symbols.push(symbol);
        id
    }

    /// Enter a symbol in the lookup table, shadowing any previous binding.
    ///
    /// Returns the shadowed symbol.
    pub fn publish(&mut self, id: SymbolId) -> Option<SymbolId> {
        let symbol = &mut self.symbols[id.0];
        symbol.visible = true;
        let previous = self.lookup.insert(symbol.name.clone(), id);
        match previous {
            Some(old) if !symbol.flags.suppress_redefinition_warning => {
                tracing::warn!(name = %symbol.name, old = %old, new = %id, "redefining word");
            }
            _ => {}
        }
        previous
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.lookup.get(name).copied()
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, s)| (SymbolId(i), s))
    }

    /// Names currently bound, oldest definition first.
    pub fn visible_names(&self) -> Vec<&str> {
        let mut bound: Vec<SymbolId> = self.lookup.values().copied().collect();
        bound.sort();
        bound.into_iter().map(|id| self.symbols[id.0].name.as_str()).collect()
    }

    /// Record that `caller` calls `callee` and propagate flags upward.
    pub fn add_dependency(&mut self, caller: SymbolId, callee: SymbolId) {
        self.symbols[caller.0].callees.insert(callee);
        self.symbols[callee.0].callers.insert(caller);
        self.propagate(callee);
    }

    /// Mark a symbol as raising errors, propagating to capturing callers.
    pub fn mark_throws(&mut self, id: SymbolId) {
        if !self.symbols[id.0].flags.throws {
            self.symbols[id.0].flags.throws = true;
            self.propagate(id);
        }
    }

    /// Mark a symbol as interpreter-only, propagating to all callers.
    pub fn mark_interpreter_only(&mut self, id: SymbolId) {
        if !self.symbols[id.0].flags.interpreter_only {
            self.symbols[id.0].flags.interpreter_only = true;
            self.propagate(id);
        }
    }

    fn propagate(&mut self, from: SymbolId) {
        let mut work = vec![from];
        while let Some(id) = work.pop() {
            let SymbolFlags {
                throws,
                definition_only,
                interpreter_only,
                ..
            } = self.symbols[id.0].flags;
            let callers: Vec<SymbolId> = self.symbols[id.0].callers.iter().copied().collect();
            for caller in callers {
                let flags = &mut self.symbols[caller.0].flags;
                let mut changed = false;
                if throws && flags.auto_try && !flags.throws {
                    flags.throws = true;
                    changed = true;
                }
                if definition_only && !flags.definition_only {
                    flags.definition_only = true;
                    changed = true;
                }
                if interpreter_only && !flags.interpreter_only {
                    flags.interpreter_only = true;
                    changed = true;
                }
                if changed {
                    work.push(caller);
                }
            }
        }
    }

    /// Drop every symbol created at or after arena position `len` and
    /// rebuild the lookup table from what remains.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.symbols.len() {
            return;
        }
        self.symbols.truncate(len);
        for symbol in &mut self.symbols {
            symbol.callers.retain(|id| id.0 < len);
            symbol.callees.retain(|id| id.0 < len);
        }
        self.lookup.clear();
        for (i, symbol) in self.symbols.iter().enumerate() {
            if symbol.visible {
                self.lookup.insert(symbol.name.clone(), SymbolId(i));
            }
        }
    }
}

impl Index<SymbolId> for SymbolTable {
    type Output = Symbol;

    fn index(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }
}

impl IndexMut<SymbolId> for SymbolTable {
    fn index_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(table: &mut SymbolTable, name: &str) -> SymbolId {
        let id = table.create(Symbol::new(name, SymbolKind::Native(NativeCode::default()), 0, 0));
        table.publish(id);
        id
    }

    #[test]
    fn test_symbols_are_invisible_until_published() {
        let mut table = SymbolTable::new();
        let id = table.create(Symbol::new("sq", SymbolKind::Native(NativeCode::default()), 1, 1));
        assert_eq!(table.lookup("sq"), None);
        assert_eq!(table.publish(id), None);
        assert_eq!(table.lookup("sq"), Some(id));
    }

    #[test]
    fn test_redefinition_shadows_but_keeps_old_entry() {
        let mut table = SymbolTable::new();
        let old = native(&mut table, "f");
        let new = table.create(Symbol::new("f", SymbolKind::Native(NativeCode::default()), 0, 0));
        assert_eq!(table.publish(new), Some(old));
        assert_eq!(table.lookup("f"), Some(new));
        assert_eq!(table[old].name, "f");
        assert_eq!(table.visible_names(), vec!["f"]);
    }

    #[test]
    fn test_throws_propagates_only_into_capturing_callers() {
        let mut table = SymbolTable::new();
        let div = native(&mut table, "/");
        table.mark_throws(div);

        let capturing = native(&mut table, "ratio");
        table.add_dependency(capturing, div);
        assert!(table[capturing].flags.throws);

        let checking = native(&mut table, "safe-ratio");
        table[checking].flags.auto_try = false;
        table.add_dependency(checking, div);
        assert!(!table[checking].flags.throws);
    }

    #[test]
    fn test_flags_propagate_transitively() {
        let mut table = SymbolTable::new();
        let a = native(&mut table, "a");
        let b = native(&mut table, "b");
        let c = native(&mut table, "c");
        table.add_dependency(b, a);
        table.add_dependency(c, b);

        table.mark_interpreter_only(a);
        assert!(table[b].flags.interpreter_only);
        assert!(table[c].flags.interpreter_only);

        table.mark_throws(a);
        assert!(table[c].flags.throws);
    }

    #[test]
    fn test_definition_only_reaches_callers_when_edge_is_added() {
        let mut table = SymbolTable::new();
        let helper = native(&mut table, "helper");
        table[helper].flags.definition_only = true;
        let middle = native(&mut table, "middle");
        table.add_dependency(middle, helper);
        let top = native(&mut table, "top");
        table.add_dependency(top, middle);

        assert!(table[middle].flags.definition_only);
        assert!(table[top].flags.definition_only);
        assert!(!table[top].flags.interpreter_only);
    }

    #[test]
    fn test_truncate_rewinds_arena_edges_and_lookup() {
        let mut table = SymbolTable::new();
        let a = native(&mut table, "a");
        let keep = table.len();
        let shadow = native(&mut table, "a");
        table.add_dependency(shadow, a);

        table.truncate(keep);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("a"), Some(a));
        assert!(table[a].callers.is_empty());
    }
}
