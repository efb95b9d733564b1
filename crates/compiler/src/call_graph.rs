//! Static call graph and recursion rejection.
//!
//! C-Next forbids recursion entirely: a function may not call itself
//! directly or through any chain of callees. The analyser builds the call
//! graph over fully-qualified function names and finds strongly connected
//! components with Tarjan's algorithm; every recursive SCC becomes an
//! error naming the cycle members.

use crate::diagnostics::{Category, Diagnostic};
use std::collections::{HashMap, HashSet};

/// A call graph over fully-qualified function names.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// Map from function to the set of functions it calls.
    edges: HashMap<String, HashSet<String>>,
    /// All function names in the unit.
    functions: HashSet<String>,
    /// SCCs that represent recursion: multi-member components, or a
    /// single member that calls itself.
    recursive_sccs: Vec<HashSet<String>>,
}

impl CallGraph {
    /// Build a call graph from `(caller, callee)` pairs.
    pub fn build(
        functions: impl IntoIterator<Item = String>,
        calls: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let functions: HashSet<String> = functions.into_iter().collect();
        let mut edges: HashMap<String, HashSet<String>> = HashMap::new();
        for name in &functions {
            edges.entry(name.clone()).or_default();
        }
        for (caller, callee) in calls {
            if functions.contains(&callee) {
                edges.entry(caller).or_default().insert(callee);
            }
        }

        let mut graph = CallGraph {
            edges,
            functions,
            recursive_sccs: Vec::new(),
        };
        graph.recursive_sccs = graph.find_sccs();
        graph
    }

    /// Check if a function is part of any recursive cycle.
    pub fn is_recursive(&self, name: &str) -> bool {
        self.recursive_sccs.iter().any(|scc| scc.contains(name))
    }

    pub fn recursive_cycles(&self) -> &[HashSet<String>] {
        &self.recursive_sccs
    }

    /// Functions a given function calls.
    pub fn callees(&self, name: &str) -> Option<&HashSet<String>> {
        self.edges.get(name)
    }

    /// One diagnostic per recursive cycle, naming every member.
    pub fn recursion_diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for scc in &self.recursive_sccs {
            let mut members: Vec<&str> = scc.iter().map(String::as_str).collect();
            members.sort_unstable();
            let message = if members.len() == 1 {
                format!("function '{}' calls itself; recursion is not allowed", members[0])
            } else {
                format!(
                    "functions {} call each other; recursion is not allowed",
                    members
                        .iter()
                        .map(|m| format!("'{}'", m))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            diagnostics.push(Diagnostic::error(Category::RecursionDetected, message));
        }
        diagnostics
    }

    /// Find strongly connected components using Tarjan's algorithm,
    /// keeping only the ones that represent recursion.
    fn find_sccs(&self) -> Vec<HashSet<String>> {
        let mut index_counter = 0;
        let mut stack: Vec<String> = Vec::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        let mut indices: HashMap<String, usize> = HashMap::new();
        let mut lowlinks: HashMap<String, usize> = HashMap::new();
        let mut sccs: Vec<HashSet<String>> = Vec::new();

        let mut names: Vec<&String> = self.functions.iter().collect();
        names.sort_unstable();
        for name in names {
            if !indices.contains_key(name) {
                self.tarjan_visit(
                    name,
                    &mut index_counter,
                    &mut stack,
                    &mut on_stack,
                    &mut indices,
                    &mut lowlinks,
                    &mut sccs,
                );
            }
        }

        sccs.into_iter()
            .filter(|scc| {
                if scc.len() > 1 {
                    true
                } else {
                    let name = scc.iter().next().unwrap();
                    self.edges
                        .get(name)
                        .map(|callees| callees.contains(name))
                        .unwrap_or(false)
                }
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn tarjan_visit(
        &self,
        name: &str,
        index_counter: &mut usize,
        stack: &mut Vec<String>,
        on_stack: &mut HashSet<String>,
        indices: &mut HashMap<String, usize>,
        lowlinks: &mut HashMap<String, usize>,
        sccs: &mut Vec<HashSet<String>>,
    ) {
        let index = *index_counter;
        *index_counter += 1;
        indices.insert(name.to_string(), index);
        lowlinks.insert(name.to_string(), index);
        stack.push(name.to_string());
        on_stack.insert(name.to_string());

        if let Some(callees) = self.edges.get(name) {
            let mut sorted: Vec<&String> = callees.iter().collect();
            sorted.sort_unstable();
            for callee in sorted {
                if !self.functions.contains(callee) {
                    continue;
                }
                if !indices.contains_key(callee) {
                    self.tarjan_visit(
                        callee,
                        index_counter,
                        stack,
                        on_stack,
                        indices,
                        lowlinks,
                        sccs,
                    );
                    let callee_lowlink = *lowlinks.get(callee).unwrap();
                    let lowlink = lowlinks.get_mut(name).unwrap();
                    *lowlink = (*lowlink).min(callee_lowlink);
                } else if on_stack.contains(callee) {
                    let callee_index = *indices.get(callee).unwrap();
                    let lowlink = lowlinks.get_mut(name).unwrap();
                    *lowlink = (*lowlink).min(callee_index);
                }
            }
        }

        if lowlinks.get(name) == indices.get(name) {
            let mut scc = HashSet::new();
            loop {
                let member = stack.pop().unwrap();
                on_stack.remove(&member);
                scc.insert(member.clone());
                if member == name {
                    break;
                }
            }
            sccs.push(scc);
        }
    }
}
