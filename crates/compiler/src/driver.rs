//! Per-file compilation driver.
//!
//! Orchestrates the pipeline for one root file: include resolution,
//! symbol collection, whole-unit analysis, emission-mode decision, and
//! atomic output writing. Outputs are written to a temp file and renamed
//! into place, so a concurrent reader never sees a partial file; on any
//! error the previous outputs are left untouched and nothing is written.
//!
//! Multiple independent units may run in parallel: each owns its arenas
//! and symbol tables and shares only the (thread-safe) frontend cache.
//! A cancellation token is polled between phases.

use crate::ast::Directive;
use crate::cache::{Cache, CacheEntry, CacheKey};
use crate::call_graph::CallGraph;
use crate::codegen;
use crate::config::{self, TargetProfile};
use crate::const_infer;
use crate::cpp_detect::{self, CppRequirement};
use crate::diagnostics::{Category, Diagnostic, has_errors};
use crate::ir::{EmitMode, Ir};
use crate::resolver::{FileLoader, Resolver};
use crate::symbols::{SymbolKind, SymbolTable};
use crate::typechecker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cooperative cancellation flag, polled between pipeline phases.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Options for one compilation.
#[derive(Debug, Clone, Default)]
pub struct DriveOptions {
    pub input: PathBuf,
    /// Explicit output path; default is the input with `.c`/`.cpp`.
    pub output: Option<PathBuf>,
    pub force_cpp: bool,
    /// Parse and analyse only; write nothing.
    pub parse_only: bool,
    pub include_dirs: Vec<PathBuf>,
    pub target: Option<String>,
}

/// Result of one compilation.
#[derive(Debug, Default)]
pub struct Outcome {
    pub diagnostics: Vec<Diagnostic>,
    pub written: Vec<PathBuf>,
    pub cancelled: bool,
    pub mode: Option<EmitMode>,
}

impl Outcome {
    /// 0 on success, 1 when any error-severity diagnostic was produced
    /// (or the run was cancelled).
    pub fn exit_code(&self) -> i32 {
        if self.cancelled || has_errors(&self.diagnostics) {
            1
        } else {
            0
        }
    }

    fn cancelled_now(mut self) -> Self {
        self.cancelled = true;
        self
    }
}

/// Run the pipeline for one root file.
pub fn drive(
    options: &DriveOptions,
    loader: &dyn FileLoader,
    cache: Option<&Cache>,
    cancel: &CancelToken,
) -> Outcome {
    let mut outcome = Outcome::default();

    // Target profile: CLI flag, then configuration file, then host.
    let start_dir = options
        .input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = config::discover(&start_dir, loader).map(|(_, c)| c);
    let target_name = options
        .target
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.target.clone()));
    let profile = match &target_name {
        Some(name) => TargetProfile::lookup(name).unwrap_or_else(|| {
            outcome.diagnostics.push(Diagnostic::warning(
                Category::Io,
                format!("unknown target profile '{}'; using host fallback", name),
            ));
            TargetProfile::host()
        }),
        None => TargetProfile::host(),
    };
    debug!(profile = %profile.name, input = %options.input.display(), "starting compilation");

    // Resolve, parse, and collect, optionally through the cache.
    let profile_token = profile.hash_token();
    let cached_frontend = |source: &str, path: &Path| {
        if let Some(cache) = cache {
            let key = CacheKey::compute(source, COMPILER_VERSION, &profile_token);
            let entry = cache.get_or_insert_with(key, || {
                let (ast, symbols, diagnostics) = crate::resolver::frontend(source, path);
                CacheEntry { ast, symbols, diagnostics }
            });
            (entry.ast.clone(), entry.symbols.clone(), entry.diagnostics.clone())
        } else {
            crate::resolver::frontend(source, path)
        }
    };
    let (unit, resolve_diags) = Resolver::new(loader, options.include_dirs.clone())
        .with_frontend(&cached_frontend)
        .resolve(&options.input);
    outcome.diagnostics.extend(resolve_diags);
    if cancel.is_cancelled() {
        return outcome.cancelled_now();
    }
    if unit.root().is_none() {
        sort_diagnostics(&mut outcome.diagnostics, &unit);
        return outcome;
    }
    debug!(files = unit.files.len(), headers = unit.native_headers.len(), "unit resolved");

    // Whole-unit symbol table.
    let pairs: Vec<_> = unit.files.iter().map(|f| (&f.ast, &f.symbols)).collect();
    let (table, symbol_diags) = SymbolTable::build(&pairs);
    outcome.diagnostics.extend(symbol_diags);
    if cancel.is_cancelled() {
        return outcome.cancelled_now();
    }

    // Semantic analysis; later phases run best-effort so one invocation
    // reports as much as possible.
    let (analysis, check_diags) = typechecker::check_unit(&unit, &table);
    outcome.diagnostics.extend(check_diags);
    if cancel.is_cancelled() {
        return outcome.cancelled_now();
    }

    // Recursion rejection over the static call graph.
    let functions = table
        .iter()
        .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
        .map(|s| s.fq_name.clone());
    let calls = analysis.calls.iter().filter_map(|call| {
        let caller = call.caller?;
        Some((
            table.get(caller).fq_name.clone(),
            table.get(call.callee).fq_name.clone(),
        ))
    });
    let graph = CallGraph::build(functions, calls);
    outcome.diagnostics.extend(graph.recursion_diagnostics());

    // Emission mode: flag, then directive, then detection, then config.
    let detection = cpp_detect::detect(&unit);
    let directives = unit.root().map(|r| r.ast.directives()).unwrap_or_default();
    let mode = decide_mode(
        options.force_cpp,
        &directives,
        detection.as_ref(),
        config.as_ref().and_then(|c| c.output_extension.as_deref()),
        &mut outcome.diagnostics,
    );
    outcome.mode = Some(mode);
    debug!(mode = ?mode, "emission mode decided");

    if options.parse_only {
        sort_diagnostics(&mut outcome.diagnostics, &unit);
        return outcome;
    }
    if has_errors(&outcome.diagnostics) {
        sort_diagnostics(&mut outcome.diagnostics, &unit);
        return outcome;
    }
    if cancel.is_cancelled() {
        return outcome.cancelled_now();
    }

    let constness = const_infer::infer(&table, &analysis);
    let ir = Ir { unit, table, analysis, constness, mode };

    let impl_path = output_path(options, mode);
    let stem = impl_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out")
        .to_string();

    match codegen::emit(&ir, &profile, &stem) {
        Ok(output) => {
            if let Err(e) = write_atomic(&impl_path, &output.implementation) {
                outcome.diagnostics.push(Diagnostic::error(
                    Category::Io,
                    format!("failed to write '{}': {}", impl_path.display(), e),
                ));
            } else {
                outcome.written.push(impl_path.clone());
            }
            if !output.header.is_empty() {
                let header_path = impl_path.with_extension(mode.header_extension());
                if let Err(e) = write_atomic(&header_path, &output.header) {
                    outcome.diagnostics.push(Diagnostic::error(
                        Category::Io,
                        format!("failed to write '{}': {}", header_path.display(), e),
                    ));
                } else {
                    outcome.written.push(header_path);
                }
            }
        }
        Err(e) => {
            outcome.diagnostics.push(Diagnostic::error(
                Category::InternalCompilerError,
                e.to_string(),
            ));
        }
    }

    sort_diagnostics(&mut outcome.diagnostics, &ir.unit);
    outcome
}

/// Compile several independent units, in parallel when there is more
/// than one. Two units naming the same output path is a user error
/// detected before any emission runs.
pub fn drive_all(
    all_options: &[DriveOptions],
    loader: &(dyn FileLoader + Sync),
    cache: Option<&Cache>,
) -> Vec<Outcome> {
    let mut outputs: HashMap<PathBuf, usize> = HashMap::new();
    for (index, options) in all_options.iter().enumerate() {
        let path = output_path(options, EmitMode::C);
        if let Some(first) = outputs.insert(path.clone(), index) {
            let mut outcome = Outcome::default();
            outcome.diagnostics.push(Diagnostic::error(
                Category::Io,
                format!(
                    "inputs {} and {} both write '{}'",
                    all_options[first].input.display(),
                    options.input.display(),
                    path.display()
                ),
            ));
            return vec![outcome];
        }
    }

    if all_options.len() == 1 {
        return vec![drive(&all_options[0], loader, cache, &CancelToken::new())];
    }
    std::thread::scope(|scope| {
        let handles: Vec<_> = all_options
            .iter()
            .map(|options| {
                scope.spawn(move || drive(options, loader, cache, &CancelToken::new()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("worker panicked")).collect()
    })
}

fn decide_mode(
    force_cpp: bool,
    directives: &[Directive],
    detection: Option<&CppRequirement>,
    config_extension: Option<&str>,
    diagnostics: &mut Vec<Diagnostic>,
) -> EmitMode {
    if force_cpp {
        return EmitMode::Cpp;
    }
    if directives.contains(&Directive::COnly) {
        if let Some(requirement) = detection {
            if requirement.line != 0 {
                diagnostics.push(
                    Diagnostic::error(
                        Category::CppRequirementMismatch,
                        format!(
                            "file is marked C-only but requires C++: {} in '{}'",
                            requirement.reason,
                            requirement.path.display()
                        ),
                    ),
                );
            }
        }
        return EmitMode::C;
    }
    if detection.is_some() {
        return EmitMode::Cpp;
    }
    match config_extension {
        Some(".cpp") => EmitMode::Cpp,
        _ => EmitMode::C,
    }
}

fn output_path(options: &DriveOptions, mode: EmitMode) -> PathBuf {
    match &options.output {
        Some(path) => path.clone(),
        None => options.input.with_extension(mode.extension()),
    }
}

/// Write-to-temp-then-rename so readers never observe partial files.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Order diagnostics in source order within a file and in
/// include-resolution order across files (root last). Diagnostics with
/// no position sort after positioned ones of the same file.
fn sort_diagnostics(diagnostics: &mut [Diagnostic], unit: &crate::resolver::CompilationUnit) {
    let order: HashMap<&Path, usize> = unit
        .files
        .iter()
        .enumerate()
        .map(|(i, f)| (f.ast.path.as_path(), i))
        .collect();
    diagnostics.sort_by_key(|d| {
        let file_rank = d
            .file
            .as_deref()
            .and_then(|p| order.get(p).copied())
            .unwrap_or(usize::MAX);
        let (line, column) = d.span.map(|s| (s.line, s.column)).unwrap_or((u32::MAX, 0));
        (file_rank, line, column)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::resolver::OsFileLoader;
    use std::fs;
    use tempfile::tempdir;

    fn drive_file(dir: &Path, name: &str, extra: impl FnOnce(&mut DriveOptions)) -> Outcome {
        let mut options = DriveOptions {
            input: dir.join(name),
            ..DriveOptions::default()
        };
        extra(&mut options);
        drive(&options, &OsFileLoader, None, &CancelToken::new())
    }

    #[test]
    fn test_simple_compile_writes_c_and_header() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Blink.cnx"), "u8 led <- 0;\nvoid on() {\n    led <- 1;\n}\n")
            .unwrap();
        let outcome = drive_file(dir.path(), "Blink.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        assert!(dir.path().join("Blink.c").exists());
        assert!(dir.path().join("Blink.h").exists());
        let text = fs::read_to_string(dir.path().join("Blink.c")).unwrap();
        assert!(text.contains("#include \"Blink.h\""));
    }

    #[test]
    fn test_empty_file_exit_zero_empty_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Empty.cnx"), "").unwrap();
        let outcome = drive_file(dir.path(), "Empty.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(fs::read_to_string(dir.path().join("Empty.c")).unwrap(), "");
    }

    #[test]
    fn test_explicit_output_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("In.cnx"), "u8 x <- 0;\n").unwrap();
        let out = dir.path().join("custom").join("Out.c");
        fs::create_dir_all(out.parent().unwrap()).unwrap();
        let outcome = drive_file(dir.path(), "In.cnx", |o| o.output = Some(out.clone()));
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        assert!(out.exists());
        assert!(out.with_extension("h").exists());
    }

    #[test]
    fn test_parse_only_writes_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Check.cnx"), "u8 x <- 0;\n").unwrap();
        let outcome = drive_file(dir.path(), "Check.cnx", |o| o.parse_only = true);
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.written.is_empty());
        assert!(!dir.path().join("Check.c").exists());
    }

    #[test]
    fn test_errors_leave_no_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Bad.cnx"), "u8 x <- unknown_name;\n").unwrap();
        let outcome = drive_file(dir.path(), "Bad.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 1);
        assert!(!dir.path().join("Bad.c").exists());
    }

    #[test]
    fn test_errors_leave_previous_output_untouched() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("Keep.c");
        fs::write(&out, "previous contents\n").unwrap();
        fs::write(dir.path().join("Keep.cnx"), "u8 x <- unknown_name;\n").unwrap();
        let outcome = drive_file(dir.path(), "Keep.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(fs::read_to_string(&out).unwrap(), "previous contents\n");
    }

    #[test]
    fn test_include_cycle_exit_one_names_both_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("A.cnx"), "#include \"B.cnx\"\n").unwrap();
        fs::write(dir.path().join("B.cnx"), "#include \"A.cnx\"\n").unwrap();
        let outcome = drive_file(dir.path(), "A.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 1);
        let cycle = outcome
            .diagnostics
            .iter()
            .find(|d| d.message.contains("cycle"))
            .expect("cycle diagnostic");
        assert!(cycle.message.contains("A.cnx"));
        assert!(cycle.message.contains("B.cnx"));
    }

    #[test]
    fn test_target_profile_selects_atomic_lowering() {
        let dir = tempdir().unwrap();
        let source = "atomic u32 counter <- 0;\nvoid inc() {\n    counter +<- 1;\n}\n";
        fs::write(dir.path().join("Teensy.cnx"), source).unwrap();
        fs::write(dir.path().join("Avr.cnx"), source).unwrap();

        let outcome = drive_file(dir.path(), "Teensy.cnx", |o| {
            o.target = Some("teensy41".to_string());
        });
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        let teensy = fs::read_to_string(dir.path().join("Teensy.c")).unwrap();
        assert!(teensy.contains("__LDREXW"));
        assert!(teensy.contains("__STREXW"));
        assert!(!teensy.contains("__get_PRIMASK"));

        let outcome = drive_file(dir.path(), "Avr.cnx", |o| {
            o.target = Some("avr".to_string());
        });
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        let avr = fs::read_to_string(dir.path().join("Avr.c")).unwrap();
        assert!(avr.contains("__get_PRIMASK"));
        assert!(avr.contains("__set_PRIMASK"));
        assert!(!avr.contains("__LDREX"));
    }

    #[test]
    fn test_target_from_config_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("cnext.config.json"),
            r#"{"target": "teensy41"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("Main.cnx"),
            "atomic u32 n <- 0;\nvoid inc() {\n    n +<- 1;\n}\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Main.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        let text = fs::read_to_string(dir.path().join("Main.c")).unwrap();
        assert!(text.contains("__LDREXW"));
    }

    #[test]
    fn test_unknown_target_warns_and_falls_back() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Main.cnx"), "u8 x <- 0;\n").unwrap();
        let outcome = drive_file(dir.path(), "Main.cnx", |o| {
            o.target = Some("esp32".to_string());
        });
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("esp32")));
    }

    #[test]
    fn test_cpp_autodetect_via_header_writes_cpp() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("SerialClass.h"),
            "class SerialClass {\npublic:\n    void begin(int baud);\n};\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("Handler.cnx"),
            "#include \"SerialClass.h\"\nstruct Config {\n    i32 value;\n}\nscope Handler {\n    void reset(Config c) {\n        c.value <- 0;\n    }\n}\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Handler.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        assert_eq!(outcome.mode, Some(EmitMode::Cpp));
        assert!(dir.path().join("Handler.cpp").exists());
        assert!(!dir.path().join("Handler.c").exists());
        let text = fs::read_to_string(dir.path().join("Handler.cpp")).unwrap();
        // The mutating callee takes a non-const reference.
        assert!(text.contains("void Handler_reset(Config& c)"));
    }

    #[test]
    fn test_c_only_directive_with_cpp_header_is_mismatch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Cls.h"), "class Cls { };\n").unwrap();
        fs::write(
            dir.path().join("Main.cnx"),
            "// test-c-only\n#include \"Cls.h\"\nu8 x <- 0;\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Main.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.category == Category::CppRequirementMismatch));
    }

    #[test]
    fn test_cpp_directive_selects_cpp_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("M.cnx"), "// test-cpp-only\nu8 x <- 0;\n").unwrap();
        let outcome = drive_file(dir.path(), "M.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        assert!(dir.path().join("M.cpp").exists());
    }

    #[test]
    fn test_transitive_const_inference_end_to_end() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Config.cnx"),
            "struct Config {\n    i32 value;\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("Storage.cnx"),
            "#include \"Config.cnx\"\nscope Storage {\n    void loadDefaults(Config c) {\n        c.value <- 100;\n    }\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("Handler.cnx"),
            "#include \"Storage.cnx\"\nscope Handler {\n    void reset(Config c) {\n        Storage.loadDefaults(c);\n    }\n}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("Serial.cnx"),
            "#include \"Handler.cnx\"\nscope Serial {\n    void handleReset(Config c) {\n        Handler.reset(c);\n    }\n}\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Serial.cnx", |o| o.force_cpp = true);
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        let text = fs::read_to_string(dir.path().join("Serial.cpp")).unwrap();
        assert!(text.contains("void Serial_handleReset(Config& c)"));
        assert!(!text.contains("const Config& c"));
    }

    #[test]
    fn test_transitive_const_inference_reader_chain() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Main.cnx"),
            "struct Config {\n    i32 value;\n}\nscope Storage {\n    i32 getValue(Config c) {\n        return c.value;\n    }\n}\nscope Serial {\n    i32 fetch(Config c) {\n        return Storage.getValue(c);\n    }\n}\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Main.cnx", |o| o.force_cpp = true);
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics);
        let text = fs::read_to_string(dir.path().join("Main.cpp")).unwrap();
        assert!(text.contains("int32_t Storage_getValue(const Config& c)"));
        assert!(text.contains("int32_t Serial_fetch(const Config& c)"));
    }

    #[test]
    fn test_recursion_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Rec.cnx"),
            "void ping() {\n    pong();\n}\nvoid pong() {\n    ping();\n}\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Rec.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.category == Category::RecursionDetected));
    }

    #[test]
    fn test_determinism_across_runs() {
        let dir = tempdir().unwrap();
        let source = "atomic u32 counter <- 0;\nscope Counter {\n    void inc() {\n        global.counter +<- 1;\n    }\n}\n";
        fs::write(dir.path().join("D.cnx"), source).unwrap();
        let options = DriveOptions {
            input: dir.path().join("D.cnx"),
            target: Some("teensy41".to_string()),
            ..DriveOptions::default()
        };
        drive(&options, &OsFileLoader, None, &CancelToken::new());
        let first = fs::read_to_string(dir.path().join("D.c")).unwrap();
        drive(&options, &OsFileLoader, None, &CancelToken::new());
        let second = fs::read_to_string(dir.path().join("D.c")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_reuses_frontend_results() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("C.cnx"), "u8 x <- 0;\n").unwrap();
        let cache = Cache::new();
        let options = DriveOptions {
            input: dir.path().join("C.cnx"),
            ..DriveOptions::default()
        };
        drive(&options, &OsFileLoader, Some(&cache), &CancelToken::new());
        assert_eq!(cache.misses(), 1);
        drive(&options, &OsFileLoader, Some(&cache), &CancelToken::new());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_cancellation_produces_no_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("X.cnx"), "u8 x <- 0;\n").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = DriveOptions {
            input: dir.path().join("X.cnx"),
            ..DriveOptions::default()
        };
        let outcome = drive(&options, &OsFileLoader, None, &cancel);
        assert!(outcome.cancelled);
        assert!(outcome.written.is_empty());
        assert!(!dir.path().join("X.c").exists());
    }

    #[test]
    fn test_output_collision_detected_before_emission() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("A.cnx"), "u8 a <- 0;\n").unwrap();
        fs::write(dir.path().join("B.cnx"), "u8 b <- 0;\n").unwrap();
        let shared = dir.path().join("same.c");
        let options = vec![
            DriveOptions {
                input: dir.path().join("A.cnx"),
                output: Some(shared.clone()),
                ..DriveOptions::default()
            },
            DriveOptions {
                input: dir.path().join("B.cnx"),
                output: Some(shared.clone()),
                ..DriveOptions::default()
            },
        ];
        let outcomes = drive_all(&options, &OsFileLoader, None);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].exit_code(), 1);
        assert!(!shared.exists());
    }

    #[test]
    fn test_parallel_units_share_nothing_mutable() {
        let dir = tempdir().unwrap();
        for i in 0..4 {
            fs::write(
                dir.path().join(format!("U{}.cnx", i)),
                format!("u8 value_{} <- {};\n", i, i),
            )
            .unwrap();
        }
        let options: Vec<DriveOptions> = (0..4)
            .map(|i| DriveOptions {
                input: dir.path().join(format!("U{}.cnx", i)),
                ..DriveOptions::default()
            })
            .collect();
        let cache = Cache::new();
        let outcomes = drive_all(&options, &OsFileLoader, Some(&cache));
        assert!(outcomes.iter().all(|o| o.exit_code() == 0));
        for i in 0..4 {
            assert!(dir.path().join(format!("U{}.c", i)).exists());
        }
    }

    #[test]
    fn test_diagnostics_sorted_by_position() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Multi.cnx"),
            "void f() {\n    a <- 1;\n    b <- 2;\n}\n",
        )
        .unwrap();
        let outcome = drive_file(dir.path(), "Multi.cnx", |_| {});
        assert_eq!(outcome.exit_code(), 1);
        let lines: Vec<u32> = outcome
            .diagnostics
            .iter()
            .filter_map(|d| d.span.map(|s| s.line))
            .collect();
        let mut sorted = lines.clone();
        sorted.sort_unstable();
        assert_eq!(lines, sorted);
    }
}
