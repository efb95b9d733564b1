//! Include resolver for C-Next.
//!
//! Starting from a root file, loads and parses the transitive closure of
//! `#include` directives. C-Next includes (`.cnx`) recurse; native headers
//! (`.h`/`.hpp`/`.hxx`) are loaded as raw text for the C++-marker scan and
//! never parsed as C-Next.
//!
//! The `"…"` form searches the including file's own directory first; the
//! `<…>` form skips it. After that, the configured search directories are
//! tried in order and the first match wins.
//!
//! Cycles are detected with a "currently resolving" stack and reported
//! with the full chain. A file reached under two path aliases is resolved
//! once, keyed by canonical path. Filesystem access goes through the
//! `FileLoader` capability so tests can run against an in-memory tree.

use crate::ast::{FileId, IncludeDirective, IncludeKind, SourceFile};
use crate::diagnostics::{Category, Diagnostic};
use crate::parser;
use crate::symbols::{self, FileSymbols};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Filesystem capability used by the resolver and driver.
pub trait FileLoader {
    fn load(&self, path: &Path) -> io::Result<String>;
    fn exists(&self, path: &Path) -> bool;
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// The real filesystem.
pub struct OsFileLoader;

impl FileLoader for OsFileLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}

/// In-memory tree for tests and the language-service API.
#[derive(Default)]
pub struct MemoryFileLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryFileLoader {
    pub fn new() -> Self {
        MemoryFileLoader::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.files.insert(normalize(&path.into()), source.into());
    }
}

impl FileLoader for MemoryFileLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not found"))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let normalized = normalize(path);
        if self.files.contains_key(&normalized) {
            Ok(normalized)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "not found"))
        }
    }
}

/// Lexically remove `.` and `..` components so aliases of the same path
/// compare equal in the in-memory loader.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A parsed file with its per-file symbols and original text.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub ast: SourceFile,
    pub symbols: FileSymbols,
    pub source: String,
}

/// A native header loaded for the C++-marker scan.
#[derive(Debug, Clone)]
pub struct NativeHeader {
    pub path: PathBuf,
    pub text: String,
}

/// Root file plus its transitive C-Next includes, in include-resolution
/// order with the root last, plus every reachable native header.
#[derive(Debug, Default)]
pub struct CompilationUnit {
    pub files: Vec<ResolvedFile>,
    pub native_headers: Vec<NativeHeader>,
}

impl CompilationUnit {
    pub fn root(&self) -> Option<&ResolvedFile> {
        self.files.last()
    }

    pub fn file(&self, id: FileId) -> &ResolvedFile {
        &self.files[id.0 as usize]
    }

    pub fn path_of(&self, id: FileId) -> &Path {
        &self.file(id).ast.path
    }
}

/// Parse and collect one file. The cache, when enabled, memoises exactly
/// this function's output.
pub fn frontend(source: &str, path: &Path) -> (SourceFile, FileSymbols, Vec<Diagnostic>) {
    let (ast, mut diagnostics) = parser::parse(source, path, FileId(0));
    let (file_symbols, collect_diags) = symbols::collect_file(&ast);
    diagnostics.extend(collect_diags);
    (ast, file_symbols, diagnostics)
}

pub struct Resolver<'a> {
    loader: &'a dyn FileLoader,
    search_dirs: Vec<PathBuf>,
    frontend: &'a dyn Fn(&str, &Path) -> (SourceFile, FileSymbols, Vec<Diagnostic>),
    /// Canonical paths currently being resolved, for cycle reporting.
    resolving: Vec<PathBuf>,
    /// Canonical paths already fully resolved.
    done: HashSet<PathBuf>,
    native_done: HashSet<PathBuf>,
    unit: CompilationUnit,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Resolver<'a> {
    pub fn new(loader: &'a dyn FileLoader, search_dirs: Vec<PathBuf>) -> Self {
        Resolver {
            loader,
            search_dirs,
            frontend: &frontend,
            resolving: Vec::new(),
            done: HashSet::new(),
            native_done: HashSet::new(),
            unit: CompilationUnit::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Replace the parse step, e.g. with a caching wrapper.
    pub fn with_frontend(
        mut self,
        frontend: &'a dyn Fn(&str, &Path) -> (SourceFile, FileSymbols, Vec<Diagnostic>),
    ) -> Self {
        self.frontend = frontend;
        self
    }

    /// Resolve a root file and everything it reaches.
    pub fn resolve(mut self, root: &Path) -> (CompilationUnit, Vec<Diagnostic>) {
        if self.resolve_cnx(root, None).is_none() && self.diagnostics.is_empty() {
            self.diagnostics.push(Diagnostic::error(
                Category::Io,
                format!("failed to read input file '{}'", root.display()),
            ));
        }
        (self.unit, self.diagnostics)
    }

    /// Resolve one C-Next file; returns its id, or `None` when it could
    /// not be loaded or sits on the current resolution stack.
    fn resolve_cnx(&mut self, path: &Path, from: Option<&IncludeDirective>) -> Option<FileId> {
        let canonical = match self.loader.canonicalize(path) {
            Ok(c) => c,
            Err(e) => {
                self.diagnostics.push(Diagnostic::error(
                    Category::Io,
                    format!("failed to read '{}': {}", path.display(), e),
                ));
                return None;
            }
        };

        if let Some(start) = self.resolving.iter().position(|p| p == &canonical) {
            let mut chain: Vec<String> = self.resolving[start..]
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(canonical.display().to_string());
            let mut diag = Diagnostic::error(
                Category::IncludeResolution,
                format!("include cycle detected: {}", chain.join(" -> ")),
            );
            if let Some(inc) = from {
                diag = diag.at(self.resolving.last().unwrap(), inc.span);
            }
            self.diagnostics.push(diag);
            return None;
        }

        if self.done.contains(&canonical) {
            return self
                .unit
                .files
                .iter()
                .find(|f| {
                    self.loader.canonicalize(&f.ast.path).ok().as_deref()
                        == Some(canonical.as_path())
                })
                .map(|f| f.ast.file);
        }

        let source = match self.loader.load(path) {
            Ok(s) => s,
            Err(e) => {
                self.diagnostics.push(Diagnostic::error(
                    Category::Io,
                    format!("failed to read '{}': {}", path.display(), e),
                ));
                return None;
            }
        };

        self.resolving.push(canonical.clone());
        let (ast, file_symbols, parse_diags) = (self.frontend)(&source, path);
        self.diagnostics.extend(parse_diags);

        // Children resolve before this file is numbered, so ids come out
        // in include-resolution order with the root last.
        let own_dir = path.parent().map(Path::to_path_buf);
        let includes: Vec<IncludeDirective> = ast.includes().cloned().collect();
        for include in &includes {
            self.process_include(include, own_dir.as_deref(), path);
        }

        self.resolving.pop();
        self.done.insert(canonical);

        let id = FileId(self.unit.files.len() as u32);
        let mut ast = ast;
        ast.file = id;
        let mut file_symbols = file_symbols;
        for symbol in &mut file_symbols.symbols {
            symbol.file = id;
        }
        self.unit.files.push(ResolvedFile {
            ast,
            symbols: file_symbols,
            source,
        });
        Some(id)
    }

    fn process_include(
        &mut self,
        include: &IncludeDirective,
        own_dir: Option<&Path>,
        from_path: &Path,
    ) {
        match include.kind() {
            IncludeKind::CNext => match self.find_file(include, own_dir) {
                Some(found) => {
                    self.resolve_cnx(&found, Some(include));
                }
                None => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            Category::IncludeResolution,
                            format!("include file '{}' not found", include.path),
                        )
                        .at(from_path, include.span),
                    );
                }
            },
            IncludeKind::NativeHeader => match self.find_file(include, own_dir) {
                Some(found) => self.load_native_header(&found),
                None if include.angled => {
                    // System headers live on the target toolchain, not
                    // here; pass them through without a scan.
                }
                None => {
                    self.diagnostics.push(
                        Diagnostic::warning(
                            Category::IncludeResolution,
                            format!("native header '{}' not found; skipping C++ scan", include.path),
                        )
                        .at(from_path, include.span),
                    );
                }
            },
            IncludeKind::Unknown => {
                self.diagnostics.push(
                    Diagnostic::warning(
                        Category::IncludeResolution,
                        format!(
                            "include '{}' has an unrecognised extension and was ignored",
                            include.path
                        ),
                    )
                    .at(from_path, include.span),
                );
            }
        }
    }

    fn load_native_header(&mut self, path: &Path) {
        let canonical = self
            .loader
            .canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf());
        if !self.native_done.insert(canonical) {
            return;
        }
        match self.loader.load(path) {
            Ok(text) => self.unit.native_headers.push(NativeHeader {
                path: path.to_path_buf(),
                text,
            }),
            Err(e) => {
                self.diagnostics.push(Diagnostic::warning(
                    Category::IncludeResolution,
                    format!("failed to read native header '{}': {}", path.display(), e),
                ));
            }
        }
    }

    /// Search order: own directory for the quoted form, then the search
    /// directories in order. First match wins.
    fn find_file(&self, include: &IncludeDirective, own_dir: Option<&Path>) -> Option<PathBuf> {
        if !include.angled {
            if let Some(dir) = own_dir {
                let candidate = dir.join(&include.path);
                if self.loader.exists(&candidate) {
                    return Some(candidate);
                }
            }
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(&include.path);
            if self.loader.exists(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::has_errors;

    fn loader(files: &[(&str, &str)]) -> MemoryFileLoader {
        let mut loader = MemoryFileLoader::new();
        for (path, source) in files {
            loader.insert(*path, *source);
        }
        loader
    }

    #[test]
    fn test_single_file_unit() {
        let fs = loader(&[("/src/main.cnx", "u8 x <- 0;\n")]);
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        assert_eq!(unit.files.len(), 1);
        assert_eq!(unit.root().unwrap().ast.path, Path::new("/src/main.cnx"));
    }

    #[test]
    fn test_quoted_include_searches_own_directory_first() {
        let fs = loader(&[
            ("/src/main.cnx", "#include \"util.cnx\"\nu8 x <- 0;\n"),
            ("/src/util.cnx", "u8 util_value <- 1;\n"),
            ("/lib/util.cnx", "u8 wrong_one <- 2;\n"),
        ]);
        let (unit, diags) =
            Resolver::new(&fs, vec![PathBuf::from("/lib")]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        assert_eq!(unit.files.len(), 2);
        // Root is last; the include that won is the sibling file.
        assert_eq!(unit.files[0].ast.path, Path::new("/src/util.cnx"));
    }

    #[test]
    fn test_angled_include_skips_own_directory() {
        let fs = loader(&[
            ("/src/main.cnx", "#include <util.cnx>\n"),
            ("/src/util.cnx", "u8 sibling <- 1;\n"),
            ("/lib/util.cnx", "u8 from_lib <- 2;\n"),
        ]);
        let (unit, diags) =
            Resolver::new(&fs, vec![PathBuf::from("/lib")]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        assert_eq!(unit.files[0].ast.path, Path::new("/lib/util.cnx"));
    }

    #[test]
    fn test_include_cycle_names_both_files() {
        let fs = loader(&[
            ("/src/a.cnx", "#include \"b.cnx\"\n"),
            ("/src/b.cnx", "#include \"a.cnx\"\n"),
        ]);
        let (_, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/a.cnx"));
        assert!(has_errors(&diags));
        let cycle = diags
            .iter()
            .find(|d| d.message.contains("cycle"))
            .expect("cycle diagnostic");
        assert!(cycle.message.contains("a.cnx"));
        assert!(cycle.message.contains("b.cnx"));
    }

    #[test]
    fn test_diamond_include_resolved_once() {
        let fs = loader(&[
            ("/src/main.cnx", "#include \"a.cnx\"\n#include \"b.cnx\"\n"),
            ("/src/a.cnx", "#include \"shared.cnx\"\n"),
            ("/src/b.cnx", "#include \"shared.cnx\"\n"),
            ("/src/shared.cnx", "u8 shared_value <- 1;\n"),
        ]);
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        assert_eq!(unit.files.len(), 4);
        let shared_count = unit
            .files
            .iter()
            .filter(|f| f.ast.path.ends_with("shared.cnx"))
            .count();
        assert_eq!(shared_count, 1);
    }

    #[test]
    fn test_missing_cnx_include_is_error_but_continues() {
        let fs = loader(&[(
            "/src/main.cnx",
            "#include \"missing.cnx\"\nu8 x <- 0;\n",
        )]);
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        assert!(has_errors(&diags));
        // Root file still resolved.
        assert_eq!(unit.files.len(), 1);
    }

    #[test]
    fn test_native_header_loaded_for_scan() {
        let fs = loader(&[
            ("/src/main.cnx", "#include \"SerialClass.h\"\nu8 x <- 0;\n"),
            ("/src/SerialClass.h", "class SerialClass { };\n"),
        ]);
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        assert_eq!(unit.native_headers.len(), 1);
        assert!(unit.native_headers[0].text.contains("class"));
    }

    #[test]
    fn test_missing_angled_native_header_passes_silently() {
        let fs = loader(&[("/src/main.cnx", "#include <Arduino.h>\nu8 x <- 0;\n")]);
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        assert!(diags.is_empty());
        assert!(unit.native_headers.is_empty());
    }

    #[test]
    fn test_include_resolution_order_root_last() {
        let fs = loader(&[
            ("/src/main.cnx", "#include \"dep.cnx\"\n"),
            ("/src/dep.cnx", "#include \"leaf.cnx\"\n"),
            ("/src/leaf.cnx", "u8 leaf_value <- 0;\n"),
        ]);
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        assert!(!has_errors(&diags));
        let names: Vec<&str> = unit
            .files
            .iter()
            .map(|f| f.ast.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["leaf.cnx", "dep.cnx", "main.cnx"]);
        // File ids match vector order.
        for (i, file) in unit.files.iter().enumerate() {
            assert_eq!(file.ast.file, FileId(i as u32));
        }
    }
}
