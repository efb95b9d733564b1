//! Transitive const-parameter inference.
//!
//! In C++ emission, a parameter of user-defined type becomes `const T&`
//! unless the function mutates it — directly, or by passing it to a
//! callee whose matching parameter is itself non-const. The analysis is a
//! monotone fixed point: every parameter starts const, and a parameter
//! flips to non-const when a write or a non-const forward is found. Flips
//! never reverse, so the loop terminates.

use crate::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::typechecker::Analysis;
use std::collections::HashMap;

/// Constness of every user-defined-type parameter in the unit.
/// `true` means the parameter can be emitted `const T&`.
#[derive(Debug, Default)]
pub struct ParamConstness {
    constness: HashMap<(SymbolId, usize), bool>,
}

impl ParamConstness {
    /// Whether a parameter is const; parameters that are not references
    /// (primitives, strings) report `true` and are ignored by codegen.
    pub fn is_const(&self, func: SymbolId, index: usize) -> bool {
        self.constness.get(&(func, index)).copied().unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.constness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constness.is_empty()
    }
}

/// Run the fixed point over the recorded write and forward facts.
pub fn infer(table: &SymbolTable, analysis: &Analysis) -> ParamConstness {
    let mut constness: HashMap<(SymbolId, usize), bool> = HashMap::new();

    // Seed: every user-type parameter is const until proven otherwise.
    for symbol in table.iter() {
        if !matches!(symbol.kind, SymbolKind::Function | SymbolKind::Method) {
            continue;
        }
        let Some(signature) = &symbol.signature else { continue };
        for (index, (_, ty)) in signature.params.iter().enumerate() {
            if ty.is_user_defined() {
                constness.insert((symbol.id, index), true);
            }
        }
    }

    // Direct writes flip immediately.
    for key in &analysis.param_writes {
        if let Some(entry) = constness.get_mut(key) {
            *entry = false;
        }
    }

    // Propagate through forwards until nothing changes.
    loop {
        let mut changed = false;
        for (from, to) in &analysis.param_forwards {
            let callee_mutates = !constness.get(to).copied().unwrap_or(true);
            if callee_mutates {
                if let Some(entry) = constness.get_mut(from) {
                    if *entry {
                        *entry = false;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    ParamConstness { constness }
}
