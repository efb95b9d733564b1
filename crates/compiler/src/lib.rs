//! C-Next Compiler Library
//!
//! Transpiles C-Next (`.cnx`) sources to portable C99 or C++14. The
//! pipeline is: include resolution → lexing/parsing → symbol collection
//! → whole-unit semantic analysis (type checking, overflow inference,
//! C++-requirement detection, transitive const-parameter inference) →
//! code emission.
//!
//! The CLI front-end lives in `main.rs`; editor tooling uses the
//! in-process API:
//!
//! ```rust,ignore
//! use cnextc::{parse_with_symbols, transpile, TranspileOptions};
//!
//! let (ast, symbols, diagnostics) = parse_with_symbols(source, path);
//! let (output, diagnostics) = transpile(source, path, &TranspileOptions::default());
//! ```

pub mod ast;
pub mod cache;
pub mod call_graph;
pub mod codegen;
pub mod config;
pub mod const_infer;
pub mod cpp_detect;
pub mod diagnostics;
pub mod driver;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod pio;
pub mod resolver;
pub mod symbols;
pub mod typechecker;
pub mod types;

pub use cache::Cache;
pub use codegen::{CodeGenError, EmitOutput};
pub use config::{AtomicStrategy, ConfigFile, TargetProfile};
pub use diagnostics::{Category, Diagnostic, Severity, format_diagnostics, has_errors};
pub use driver::{CancelToken, DriveOptions, Outcome, drive, drive_all};
pub use ir::EmitMode;
pub use resolver::{CompilationUnit, FileLoader, MemoryFileLoader, OsFileLoader, Resolver};
pub use symbols::{FileSymbols, SymbolTable};

use ast::SourceFile;
use std::path::{Path, PathBuf};

/// Parse one file and collect its symbols, without touching the
/// filesystem. This is the language service's incremental entry point.
pub fn parse_with_symbols(source: &str, path: &Path) -> (SourceFile, FileSymbols, Vec<Diagnostic>) {
    resolver::frontend(source, path)
}

/// Options for the in-process [`transpile`] entry point.
#[derive(Debug, Clone, Default)]
pub struct TranspileOptions {
    pub force_cpp: bool,
    pub include_dirs: Vec<PathBuf>,
    pub target: Option<String>,
}

/// Transpile an in-memory source buffer. Includes resolve against the
/// given path's directory and the search path on disk; only the root
/// file is overlaid. Returns the emitted text (when the unit is
/// error-free) and every diagnostic.
pub fn transpile(
    source: &str,
    path: &Path,
    options: &TranspileOptions,
) -> (Option<EmitOutput>, Vec<Diagnostic>) {
    let loader = OverlayLoader { root: path, source };
    let (unit, mut diagnostics) =
        Resolver::new(&loader, options.include_dirs.clone()).resolve(path);
    if unit.root().is_none() {
        return (None, diagnostics);
    }

    let pairs: Vec<_> = unit.files.iter().map(|f| (&f.ast, &f.symbols)).collect();
    let (table, symbol_diags) = SymbolTable::build(&pairs);
    diagnostics.extend(symbol_diags);

    let (analysis, check_diags) = typechecker::check_unit(&unit, &table);
    diagnostics.extend(check_diags);

    let functions = table
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                symbols::SymbolKind::Function | symbols::SymbolKind::Method
            )
        })
        .map(|s| s.fq_name.clone());
    let calls = analysis.calls.iter().filter_map(|call| {
        let caller = call.caller?;
        Some((
            table.get(caller).fq_name.clone(),
            table.get(call.callee).fq_name.clone(),
        ))
    });
    let graph = call_graph::CallGraph::build(functions, calls);
    diagnostics.extend(graph.recursion_diagnostics());

    let mode = if options.force_cpp || cpp_detect::detect(&unit).is_some() {
        EmitMode::Cpp
    } else {
        EmitMode::C
    };

    if has_errors(&diagnostics) {
        return (None, diagnostics);
    }

    let constness = const_infer::infer(&table, &analysis);
    let ir = ir::Ir { unit, table, analysis, constness, mode };
    let profile = options
        .target
        .as_deref()
        .and_then(TargetProfile::lookup)
        .unwrap_or_else(TargetProfile::host);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out")
        .to_string();
    match codegen::emit(&ir, &profile, &stem) {
        Ok(output) => (Some(output), diagnostics),
        Err(e) => {
            diagnostics.push(Diagnostic::error(
                Category::InternalCompilerError,
                e.to_string(),
            ));
            (None, diagnostics)
        }
    }
}

/// Loader that overlays one in-memory buffer on top of the real
/// filesystem, so unsaved editor contents resolve their includes.
struct OverlayLoader<'a> {
    root: &'a Path,
    source: &'a str,
}

impl FileLoader for OverlayLoader<'_> {
    fn load(&self, path: &Path) -> std::io::Result<String> {
        if path == self.root {
            Ok(self.source.to_string())
        } else {
            OsFileLoader.load(path)
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path == self.root || OsFileLoader.exists(path)
    }

    fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf> {
        if path == self.root {
            Ok(path.to_path_buf())
        } else {
            OsFileLoader.canonicalize(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_symbols_round_trip() {
        let source = "scope Counter {\n    u32 count <- 0;\n    void increment() {\n        this.count +<- 1;\n    }\n}\n";
        let (ast, symbols, diagnostics) = parse_with_symbols(source, Path::new("Counter.cnx"));
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(ast.decls.len(), 1);
        let names: Vec<&str> = symbols.symbols.iter().map(|s| s.fq_name.as_str()).collect();
        assert_eq!(names, vec!["Counter", "Counter_count", "Counter_increment"]);
    }

    #[test]
    fn test_transpile_in_memory() {
        let (output, diagnostics) = transpile(
            "u8 led <- 0;\nvoid on() {\n    led <- 1;\n}\n",
            Path::new("/virtual/Blink.cnx"),
            &TranspileOptions::default(),
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let output = output.expect("emitted output");
        assert!(output.implementation.contains("void on(void)"));
        assert!(output.header.contains("extern uint8_t led;"));
    }

    #[test]
    fn test_transpile_reports_errors_without_output() {
        let (output, diagnostics) = transpile(
            "void f() {\n    missing <- 1;\n}\n",
            Path::new("/virtual/Bad.cnx"),
            &TranspileOptions::default(),
        );
        assert!(output.is_none());
        assert!(has_errors(&diagnostics));
    }

    #[test]
    fn test_round_trip_reparse_preserves_symbol_table() {
        // Emitting and re-collecting the same source must produce the
        // same symbols: transpilation is deterministic over the table.
        let source = "struct Config {\n    i32 value;\n}\nscope Storage {\n    void loadDefaults(Config c) {\n        c.value <- 100;\n    }\n}\n";
        let (_, first, d1) = parse_with_symbols(source, Path::new("S.cnx"));
        let (_, second, d2) = parse_with_symbols(source, Path::new("S.cnx"));
        assert!(d1.is_empty() && d2.is_empty());
        let names = |fs: &FileSymbols| -> Vec<(String, crate::symbols::SymbolKind)> {
            fs.symbols
                .iter()
                .map(|s| (s.fq_name.clone(), s.kind))
                .collect()
        };
        assert_eq!(names(&first), names(&second));
    }
}
