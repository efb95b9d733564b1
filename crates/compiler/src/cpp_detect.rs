//! C++-requirement detection.
//!
//! A compilation unit must be emitted as C++ when its root file says so
//! (`// test-cpp-only` / `// test-cpp-mode`) or when the root source or
//! any included native header contains C++-only surface: the
//! `class`/`namespace`/`template` keywords, scope resolution `A::B`,
//! template instantiation `Type<Args>` (but never bounded-string
//! `string<N>`), the C++ casts, reference parameters, or constructor-call
//! syntax at file scope.
//!
//! The scan is textual: native headers are not parsed as C-Next, and a
//! header broken enough to confuse a real C++ parser should still trip
//! the markers. Comments and literal contents are blanked before
//! scanning so a `class` in a string cannot force C++ mode.
//!
//! The `T&` reference vs `x & y` bitwise-and ambiguity is resolved by
//! requiring both operands to be identifier-like and the closer to be
//! `,` or `)`.

use crate::ast::Directive;
use crate::resolver::CompilationUnit;
use std::path::PathBuf;

/// Why a unit needs C++ emission.
#[derive(Debug, Clone)]
pub struct CppRequirement {
    pub reason: String,
    pub path: PathBuf,
    /// 1-based line of the triggering marker; 0 for directives.
    pub line: u32,
}

/// Decide whether the unit requires C++ emission.
pub fn detect(unit: &CompilationUnit) -> Option<CppRequirement> {
    let root = unit.root()?;
    if root.ast.directives().contains(&Directive::CppOnly) {
        return Some(CppRequirement {
            reason: "file directive requests C++ emission".to_string(),
            path: root.ast.path.clone(),
            line: 0,
        });
    }

    // C-Next sources get the subset of markers that cannot collide with
    // valid C-Next (a call argument `f(a & b)` must not read as a
    // reference parameter); native headers get the full scan.
    for file in &unit.files {
        if let Some((reason, line)) = scan_text(&file.source, false) {
            return Some(CppRequirement {
                reason,
                path: file.ast.path.clone(),
                line,
            });
        }
    }
    for header in &unit.native_headers {
        if let Some((reason, line)) = scan_text(&header.text, true) {
            return Some(CppRequirement {
                reason,
                path: header.path.clone(),
                line,
            });
        }
    }
    None
}

const CPP_KEYWORDS: [&str; 3] = ["class", "namespace", "template"];
const CPP_CASTS: [&str; 4] = [
    "static_cast",
    "reinterpret_cast",
    "const_cast",
    "dynamic_cast",
];

/// C keywords and common fixed-width names that rule a word out as a
/// user-defined type in the constructor-call heuristic.
const C_WORDS: [&str; 28] = [
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "bool",
    "const", "static", "volatile", "extern", "inline", "register", "struct", "union", "enum",
    "typedef", "return", "if", "while", "for", "switch", "sizeof", "do", "else",
];

fn is_c_word(word: &str) -> bool {
    C_WORDS.contains(&word) || word.ends_with("_t")
}

#[derive(Debug, Clone, PartialEq)]
struct Tok {
    text: String,
    col: usize,
}

impl Tok {
    fn is_ident(&self) -> bool {
        self.text
            .chars()
            .next()
            .is_some_and(|c| c == '_' || c.is_alphabetic())
    }
}

/// Scan one file's text; returns the first marker's description and line.
/// `full` additionally enables the reference-parameter and
/// constructor-call checks used for native headers.
fn scan_text(text: &str, full: bool) -> Option<(String, u32)> {
    let mut in_block_comment = false;
    // Brace depth across the file, for the file-scope constructor check.
    let mut depth = 0usize;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index as u32 + 1;
        let cleaned = clean_line(raw_line, &mut in_block_comment);
        let tokens = tokenize_line(&cleaned);
        if tokens.is_empty() {
            continue;
        }

        for (i, tok) in tokens.iter().enumerate() {
            if CPP_KEYWORDS.contains(&tok.text.as_str()) {
                return Some((format!("'{}' keyword", tok.text), line_no));
            }
            if CPP_CASTS.contains(&tok.text.as_str()) {
                return Some((format!("'{}' cast", tok.text), line_no));
            }
            if tok.text == "::" {
                return Some(("scope resolution '::'".to_string(), line_no));
            }
            if tok.is_ident() && tok.text != "string" {
                if let Some(close) = template_instantiation(&tokens, i) {
                    let _ = close;
                    return Some((
                        format!("template instantiation '{}<…>'", tok.text),
                        line_no,
                    ));
                }
            }
            // Reference parameter: Ident '&' Ident followed by ',' or ')'.
            if full
                && tok.text == "&"
                && i > 0
                && tokens[i - 1].is_ident()
                && !is_c_word(&tokens[i - 1].text)
                && tokens.get(i + 1).is_some_and(Tok::is_ident)
                && tokens
                    .get(i + 2)
                    .is_some_and(|t| t.text == "," || t.text == ")")
            {
                return Some(("reference parameter".to_string(), line_no));
            }
        }

        if full && depth == 0 && constructor_call(&tokens) {
            return Some(("constructor-call syntax at file scope".to_string(), line_no));
        }
        for tok in &tokens {
            match tok.text.as_str() {
                "{" => depth += 1,
                "}" => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }
    None
}

/// Blank comments and literal contents, preserving column positions.
fn clean_line(line: &str, in_block_comment: &mut bool) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = vec![' '; chars.len()];
    let mut i = 0;
    while i < chars.len() {
        if *in_block_comment {
            if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                *in_block_comment = false;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'/') => break,
            '/' if chars.get(i + 1) == Some(&'*') => {
                *in_block_comment = true;
                i += 2;
            }
            '"' | '\'' => {
                let quote = chars[i];
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            c => {
                out[i] = c;
                i += 1;
            }
        }
    }
    out.into_iter().collect()
}

fn tokenize_line(line: &str) -> Vec<Tok> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c == '_' || c.is_alphabetic() {
            while i < chars.len() && (chars[i] == '_' || chars[i].is_alphanumeric()) {
                i += 1;
            }
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
        } else if c == ':' && chars.get(i + 1) == Some(&':') {
            i += 2;
        } else {
            i += 1;
        }
        tokens.push(Tok {
            text: chars[start..i].iter().collect(),
            col: start,
        });
    }
    tokens
}

/// `Ident<` with no space, a matching `>` on the same line, and a
/// type-looking interior. `string<N>` is excluded by the caller.
fn template_instantiation(tokens: &[Tok], ident: usize) -> Option<usize> {
    let open = ident + 1;
    let candidate = &tokens[ident];
    if tokens.get(open)?.text != "<" {
        return None;
    }
    // Adjacency: templates are written `Vec<int>`, comparisons `a < b`.
    if tokens[open].col != candidate.col + candidate.text.chars().count() {
        return None;
    }
    let close = tokens[open..]
        .iter()
        .position(|t| t.text == ">")
        .map(|p| open + p)?;
    let interior = &tokens[open + 1..close];
    if interior.is_empty() {
        return None;
    }
    let mut saw_type_word = false;
    for tok in interior {
        if tok.is_ident() {
            if is_c_word(&tok.text) || tok.text.chars().next().is_some_and(char::is_uppercase) {
                saw_type_word = true;
            }
        } else if !matches!(tok.text.as_str(), "," | "*" | "&") && !tok.text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    let uppercase_candidate = candidate
        .text
        .chars()
        .next()
        .is_some_and(char::is_uppercase);
    if saw_type_word || uppercase_candidate {
        Some(close)
    } else {
        None
    }
}

/// `TypeName var(arg, …);` at file scope where `TypeName` is not a C
/// keyword or primitive and the arguments contain no type keywords.
fn constructor_call(tokens: &[Tok]) -> bool {
    if tokens.len() < 5 {
        return false;
    }
    let [first, second, third, ..] = tokens else {
        return false;
    };
    if !first.is_ident() || is_c_word(&first.text) || !first.text.chars().next().is_some_and(char::is_uppercase) {
        return false;
    }
    if !second.is_ident() || third.text != "(" {
        return false;
    }
    let close = match tokens[3..].iter().position(|t| t.text == ")") {
        Some(p) => 3 + p,
        None => return false,
    };
    if tokens.get(close + 1).map(|t| t.text.as_str()) != Some(";") {
        return false;
    }
    let args = &tokens[3..close];
    if args.is_empty() {
        // `Type var();` is a declaration, not a constructor call.
        return false;
    }
    !args.iter().any(|t| is_c_word(&t.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MemoryFileLoader, Resolver};
    use std::path::Path;

    fn detect_source(main: &str, header: Option<(&str, &str)>) -> Option<CppRequirement> {
        let mut fs = MemoryFileLoader::new();
        fs.insert("/src/main.cnx", main);
        if let Some((name, text)) = header {
            fs.insert(format!("/src/{}", name), text);
        }
        let (unit, _) = Resolver::new(&fs, vec![]).resolve(Path::new("/src/main.cnx"));
        detect(&unit)
    }

    #[test]
    fn test_plain_unit_stays_c() {
        assert!(detect_source("u8 x <- 0;\n", None).is_none());
    }

    #[test]
    fn test_directive_forces_cpp() {
        let req = detect_source("// test-cpp-only\nu8 x <- 0;\n", None).unwrap();
        assert!(req.reason.contains("directive"));
        let req = detect_source("// TEST-CPP-MODE\nu8 x <- 0;\n", None).unwrap();
        assert!(req.reason.contains("directive"));
    }

    #[test]
    fn test_class_keyword_in_header() {
        let req = detect_source(
            "#include \"SerialClass.h\"\nu8 x <- 0;\n",
            Some(("SerialClass.h", "class SerialClass {\n};\n")),
        )
        .unwrap();
        assert!(req.reason.contains("class"));
        assert_eq!(req.line, 1);
        assert!(req.path.ends_with("SerialClass.h"));
    }

    #[test]
    fn test_class_in_comment_or_string_ignored() {
        assert!(detect_source(
            "#include \"util.h\"\nu8 x <- 0;\n",
            Some(("util.h", "/* class in comment */\nstatic const char *s = \"class\";\n")),
        )
        .is_none());
    }

    #[test]
    fn test_scope_resolution() {
        let req = detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "extern int foo;\nint x = Foo::bar;\n")),
        )
        .unwrap();
        assert!(req.reason.contains("::"));
        assert_eq!(req.line, 2);
    }

    #[test]
    fn test_template_instantiation_detected() {
        let req = detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "Vec<int> items;\n")),
        )
        .unwrap();
        assert!(req.reason.contains("template instantiation"));
    }

    #[test]
    fn test_bounded_string_not_a_template() {
        assert!(detect_source("string<16> name <- \"hi\";\n", None).is_none());
    }

    #[test]
    fn test_comparison_not_a_template() {
        assert!(detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "int ok = counter < limit && limit > 0;\n")),
        )
        .is_none());
    }

    #[test]
    fn test_cpp_cast_detected() {
        let req = detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "int x = static_cast<int>(y);\n")),
        )
        .unwrap();
        // The cast keyword is reported before the template-shaped rest.
        assert!(req.reason.contains("static_cast"));
    }

    #[test]
    fn test_reference_parameter_detected() {
        let req = detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "void store(const Config& cfg, int n);\n")),
        )
        .unwrap();
        assert!(req.reason.contains("reference parameter"));
    }

    #[test]
    fn test_bitwise_and_not_a_reference() {
        assert!(detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "int masked = flags & mask;\n")),
        )
        .is_none());
    }

    #[test]
    fn test_constructor_call_at_file_scope() {
        let req = detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "SerialPort port(9600);\n")),
        )
        .unwrap();
        assert!(req.reason.contains("constructor-call"));
    }

    #[test]
    fn test_function_prototype_not_a_constructor() {
        assert!(detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "int read_byte(unsigned int timeout);\n")),
        )
        .is_none());
    }

    #[test]
    fn test_braced_code_not_file_scope() {
        assert!(detect_source(
            "#include \"util.h\"\n",
            Some(("util.h", "static void f(void) {\n    Thing call(x);\n}\n")),
        )
        .is_none());
    }
}
