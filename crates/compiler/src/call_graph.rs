//! Call graph analysis over the symbol table
//!
//! Two questions are answered from the caller → callee edges recorded
//! while compiling:
//!
//! 1. **Closure validation**: can the graph rooted at a word be compiled
//!    as a closed unit, or does it reach an interpreter-only word? The
//!    failure carries the full call path so the user can see *why*.
//! 2. **Recursion**: which words take part in direct or mutual recursion
//!    (shown by `Jit::dump`; self calls are compiled through `recurse`).
//!
//! # Usage
//!
//! ```ignore
//! validate_closed(&symbols, main)?;
//! let call_graph = CallGraph::build(&symbols);
//! let cycles = call_graph.recursive_cycles();
//! ```
//!
//! # Implementation Details
//!
//! - **Algorithm**: Tarjan's SCC algorithm, O(V + E) time complexity
//! - **Scope**: only native words are nodes; intrinsics and externals
//!   always return and cannot take part in a cycle

use crate::error::CompileError;
use crate::symbol::{SymbolId, SymbolKind, SymbolTable};
use std::collections::{HashMap, HashSet, VecDeque};

/// Check that nothing reachable from `root` is interpreter-only.
///
/// Interpreter-only status propagates to callers, so the search looks for
/// the word where it *originates*: an interpreter-only symbol none of
/// whose callees are.
pub fn validate_closed(symbols: &SymbolTable, root: SymbolId) -> Result<(), CompileError> {
    let mut parent: HashMap<SymbolId, SymbolId> = HashMap::new();
    let mut seen: HashSet<SymbolId> = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);

    while let Some(id) = queue.pop_front() {
        let symbol = &symbols[id];
        let inherited = symbol
            .callees
            .iter()
            .any(|&c| c != id && symbols[c].flags.interpreter_only);
        if symbol.flags.interpreter_only && !inherited {
            let mut path = vec![symbol.name.clone()];
            let mut cursor = id;
            while let Some(&up) = parent.get(&cursor) {
                path.push(symbols[up].name.clone());
                cursor = up;
            }
            path.reverse();
            return Err(CompileError::Dependency { path });
        }
        for &callee in &symbol.callees {
            if seen.insert(callee) {
                parent.insert(callee, id);
                queue.push_back(callee);
            }
        }
    }
    Ok(())
}

/// A call graph representing which words call which other words.
#[derive(Debug, Clone)]
pub struct CallGraph {
    /// Map from word to the set of words it calls
    edges: HashMap<SymbolId, HashSet<SymbolId>>,
    /// All native words, in definition order
    words: Vec<SymbolId>,
    /// Strongly connected components with more than one member (mutual recursion)
    /// or single members that call themselves (direct recursion)
    recursive_sccs: Vec<HashSet<SymbolId>>,
}

impl CallGraph {
    /// Build a call graph from the recorded dependency edges.
    pub fn build(symbols: &SymbolTable) -> Self {
        let words: Vec<SymbolId> = symbols
            .iter()
            .filter(|(_, s)| matches!(s.kind, SymbolKind::Native(_)))
            .map(|(id, _)| id)
            .collect();
        let known: HashSet<SymbolId> = words.iter().copied().collect();

        let mut edges: HashMap<SymbolId, HashSet<SymbolId>> = HashMap::new();
        for &id in &words {
            let callees = symbols[id]
                .callees
                .iter()
                .copied()
                .filter(|c| known.contains(c))
                .collect();
            edges.insert(id, callees);
        }

        let mut graph = CallGraph {
            edges,
            words,
            recursive_sccs: Vec::new(),
        };

        // Compute SCCs and identify recursive cycles
        graph.recursive_sccs = graph.find_sccs();

        graph
    }

    /// Check if a word is part of any recursive cycle (direct or mutual).
    pub fn is_recursive(&self, word: SymbolId) -> bool {
        self.recursive_sccs.iter().any(|scc| scc.contains(&word))
    }

    /// Get all recursive cycles (SCCs with recursion).
    pub fn recursive_cycles(&self) -> &[HashSet<SymbolId>] {
        &self.recursive_sccs
    }

    /// Find strongly connected components using Tarjan's algorithm.
    ///
    /// Returns only SCCs that represent recursion:
    /// - Multi-word SCCs (mutual recursion)
    /// - Single-word SCCs where the word calls itself (direct recursion)
    fn find_sccs(&self) -> Vec<HashSet<SymbolId>> {
        let mut tarjan = Tarjan::default();
        for &word in &self.words {
            if !tarjan.indices.contains_key(&word) {
                self.tarjan_visit(word, &mut tarjan);
            }
        }

        tarjan
            .sccs
            .into_iter()
            .filter(|scc| match scc.len() {
                0 => false,
                1 => scc.iter().any(|w| {
                    self.edges
                        .get(w)
                        .map(|callees| callees.contains(w))
                        .unwrap_or(false)
                }),
                _ => true,
            })
            .collect()
    }

    /// Tarjan's algorithm recursive visit.
    fn tarjan_visit(&self, word: SymbolId, t: &mut Tarjan) {
        let index = t.counter;
        t.counter += 1;
        t.indices.insert(word, index);
        t.lowlinks.insert(word, index);
        t.stack.push(word);
        t.on_stack.insert(word);

        if let Some(callees) = self.edges.get(&word) {
            for &callee in callees {
                match t.indices.get(&callee).copied() {
                    None => {
                        self.tarjan_visit(callee, t);
                        let callee_low = t.lowlinks.get(&callee).copied().unwrap_or(index);
                        let low = t.lowlinks.entry(word).or_insert(index);
                        *low = (*low).min(callee_low);
                    }
                    Some(callee_index) if t.on_stack.contains(&callee) => {
                        let low = t.lowlinks.entry(word).or_insert(index);
                        *low = (*low).min(callee_index);
                    }
                    Some(_) => {}
                }
            }
        }

        // If word is a root node, pop the SCC
        if t.lowlinks.get(&word) == t.indices.get(&word) {
            let mut scc = HashSet::new();
            while let Some(w) = t.stack.pop() {
                t.on_stack.remove(&w);
                scc.insert(w);
                if w == word {
                    break;
                }
            }
            t.sccs.push(scc);
        }
    }
}

#[derive(Default)]
struct Tarjan {
    counter: usize,
    stack: Vec<SymbolId>,
    on_stack: HashSet<SymbolId>,
    indices: HashMap<SymbolId, usize>,
    lowlinks: HashMap<SymbolId, usize>,
    sccs: Vec<HashSet<SymbolId>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{NativeCode, Symbol};

    fn make_word(table: &mut SymbolTable, name: &str, calls: &[SymbolId]) -> SymbolId {
        let id = table.create(Symbol::new(
            name,
            SymbolKind::Native(NativeCode::default()),
            0,
            0,
        ));
        table.publish(id);
        for &callee in calls {
            table.add_dependency(id, callee);
        }
        id
    }

    fn intrinsic(table: &mut SymbolTable, name: &str) -> SymbolId {
        let id = table.create(Symbol::new(name, SymbolKind::Intrinsic { function: 0 }, 1, 0));
        table.publish(id);
        id
    }

    #[test]
    fn test_no_recursion() {
        let mut table = SymbolTable::new();
        let bar = make_word(&mut table, "bar", &[]);
        let foo = make_word(&mut table, "foo", &[bar]);
        let baz = make_word(&mut table, "baz", &[foo]);

        let graph = CallGraph::build(&table);
        assert!(!graph.is_recursive(foo));
        assert!(!graph.is_recursive(bar));
        assert!(!graph.is_recursive(baz));
        assert!(graph.recursive_cycles().is_empty());
    }

    #[test]
    fn test_direct_recursion() {
        let mut table = SymbolTable::new();
        let countdown = make_word(&mut table, "countdown", &[]);
        table.add_dependency(countdown, countdown);
        let helper = make_word(&mut table, "helper", &[]);

        let graph = CallGraph::build(&table);
        assert!(graph.is_recursive(countdown));
        assert!(!graph.is_recursive(helper));
        assert_eq!(graph.recursive_cycles().len(), 1);
    }

    #[test]
    fn test_mutual_recursion_pair() {
        let mut table = SymbolTable::new();
        let ping = make_word(&mut table, "ping", &[]);
        let pong = make_word(&mut table, "pong", &[ping]);
        table.add_dependency(ping, pong);

        let graph = CallGraph::build(&table);
        assert!(graph.is_recursive(ping));
        assert!(graph.is_recursive(pong));
        assert!(graph.recursive_cycles()[0].contains(&ping));
        assert_eq!(graph.recursive_cycles().len(), 1);
        assert_eq!(graph.recursive_cycles()[0].len(), 2);
    }

    #[test]
    fn test_intrinsics_are_not_nodes() {
        let mut table = SymbolTable::new();
        let dot = intrinsic(&mut table, ".");
        let show = make_word(&mut table, "show", &[dot]);
        table.add_dependency(show, show);

        let graph = CallGraph::build(&table);
        assert!(!graph.is_recursive(dot));
        assert_eq!(graph.recursive_cycles(), &[HashSet::from([show])]);
    }

    #[test]
    fn test_validate_closed_accepts_pure_graph() {
        let mut table = SymbolTable::new();
        let sq = make_word(&mut table, "sq", &[]);
        let quad = make_word(&mut table, "quad", &[sq]);
        assert!(validate_closed(&table, quad).is_ok());
    }

    #[test]
    fn test_validate_closed_reports_path_to_origin() {
        let mut table = SymbolTable::new();
        let dot = intrinsic(&mut table, ".");
        table.mark_interpreter_only(dot);
        let report = make_word(&mut table, "report", &[dot]);
        let main = make_word(&mut table, "main", &[report]);

        // Propagation marks the whole chain
        assert!(table[main].flags.interpreter_only);

        match validate_closed(&table, main) {
            Err(CompileError::Dependency { path }) => {
                assert_eq!(path, vec!["main", "report", "."]);
            }
            other => panic!("expected a dependency error, got {:?}", other),
        }
    }
}
