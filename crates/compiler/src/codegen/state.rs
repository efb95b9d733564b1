//! Emitter state, the shared formatter, and helper-function emission.

use super::error::CodeGenError;
use super::types::{c_prim, limit_macros};
use crate::ast::{ExprId, FileId};
use crate::config::TargetProfile;
use crate::ir::{EmitMode, Ir};
use crate::typechecker::ResolvedPlace;
use crate::types::{OverflowPolicy, Prim, Type};
use std::collections::{BTreeSet, HashMap};

/// Column at which long declaration lines are wrapped.
pub(super) const WRAP_COLUMN: usize = 100;

/// Indentation-aware output buffer shared by both back-ends.
pub(super) struct Formatter {
    buf: String,
    indent: usize,
}

impl Formatter {
    pub fn new() -> Self {
        Formatter { buf: String::new(), indent: 0 }
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Write one line at the current indentation. Lines longer than the
    /// wrap column break after commas, except when they contain string
    /// literals.
    pub fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.buf.push('\n');
            return;
        }
        let pad = "    ".repeat(self.indent);
        let width = pad.len() + text.chars().count();
        if width > WRAP_COLUMN && !text.contains('"') && text.contains(", ") {
            let continuation = format!("{}    ", pad);
            let mut current = pad.clone();
            for (i, piece) in text.split(", ").enumerate() {
                if i == 0 {
                    current.push_str(piece);
                    continue;
                }
                if current.chars().count() + piece.chars().count() + 2 > WRAP_COLUMN {
                    current.push(',');
                    self.buf.push_str(current.trim_end());
                    self.buf.push('\n');
                    current = format!("{}{}", continuation, piece);
                } else {
                    current.push_str(", ");
                    current.push_str(piece);
                }
            }
            self.buf.push_str(current.trim_end());
            self.buf.push('\n');
            return;
        }
        self.buf.push_str(&pad);
        self.buf.push_str(text.trim_end());
        self.buf.push('\n');
    }

    /// One blank separator line, collapsing repeats.
    pub fn blank(&mut self) {
        if !self.buf.is_empty() && !self.buf.ends_with("\n\n") {
            self.buf.push('\n');
        }
    }

    pub fn append(&mut self, other: Formatter) {
        self.buf.push_str(&other.buf);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(mut self) -> String {
        while self.buf.ends_with("\n\n") {
            self.buf.pop();
        }
        if !self.buf.is_empty() && !self.buf.ends_with('\n') {
            self.buf.push('\n');
        }
        self.buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    pub fn word(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
        }
    }
}

/// A `static inline` support function the emitted code needs. The set is
/// ordered so helper output is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Helper {
    Arith {
        prim: Prim,
        op: ArithOp,
        policy: OverflowPolicy,
    },
    StrCopy,
    StrAppend,
}

/// How a parameter of the current function is received, which decides
/// how its uses and member accesses are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ParamKind {
    Value,
    /// C mode: user-defined types arrive as pointers.
    StructPtr,
    /// C++ mode: user-defined types arrive as references.
    StructRef,
}

/// Both output files of one emission run.
#[derive(Debug)]
pub struct EmitOutput {
    pub implementation: String,
    pub header: String,
}

pub struct Emitter<'a> {
    pub(super) ir: &'a Ir,
    pub(super) profile: &'a TargetProfile,
    pub(super) helpers: BTreeSet<Helper>,
    pub(super) needs_string_h: bool,
    pub(super) tmp_counter: usize,
    pub(super) root: FileId,
    /// Parameter spellings of the function currently being emitted.
    pub(super) param_kinds: HashMap<String, ParamKind>,
}

impl<'a> Emitter<'a> {
    pub(super) fn new(ir: &'a Ir, profile: &'a TargetProfile) -> Result<Self, CodeGenError> {
        let root = ir
            .unit
            .root()
            .ok_or_else(|| "emission requested for an empty unit".to_string())?
            .ast
            .file;
        Ok(Emitter {
            ir,
            profile,
            helpers: BTreeSet::new(),
            needs_string_h: false,
            tmp_counter: 0,
            root,
            param_kinds: HashMap::new(),
        })
    }

    pub(super) fn mode(&self) -> EmitMode {
        self.ir.mode
    }

    pub(super) fn arena(&self) -> &crate::ast::ExprArena {
        &self.ir.unit.file(self.root).ast.exprs
    }

    pub(super) fn ty(&self, id: ExprId) -> Type {
        self.ir
            .analysis
            .expr_types
            .get(&(self.root, id))
            .cloned()
            .unwrap_or(Type::Unknown)
    }

    pub(super) fn policy(&self, id: ExprId) -> OverflowPolicy {
        self.ir
            .analysis
            .policies
            .get(&(self.root, id))
            .copied()
            .unwrap_or_default()
    }

    pub(super) fn place(&self, id: ExprId) -> Result<&ResolvedPlace, CodeGenError> {
        self.ir
            .analysis
            .places
            .get(&(self.root, id))
            .ok_or_else(|| CodeGenError::Internal("unresolved place reached emission".to_string()))
    }

    pub(super) fn const_value(&self, id: ExprId) -> Option<i128> {
        self.ir.analysis.const_values.get(&(self.root, id)).copied()
    }

    /// Register a support function and return its C name.
    pub(super) fn need_arith_helper(
        &mut self,
        prim: Prim,
        op: ArithOp,
        policy: OverflowPolicy,
    ) -> String {
        self.helpers.insert(Helper::Arith { prim, op, policy });
        format!("cnx_{}_{}_{}", prim.keyword(), op.word(), policy.keyword())
    }

    pub(super) fn need_str_copy(&mut self) -> &'static str {
        self.needs_string_h = true;
        self.helpers.insert(Helper::StrCopy);
        "cnx_str_copy"
    }

    pub(super) fn need_str_append(&mut self) -> &'static str {
        self.needs_string_h = true;
        self.helpers.insert(Helper::StrAppend);
        "cnx_str_append"
    }

    pub(super) fn temp(&mut self, stem: &str) -> String {
        let n = self.tmp_counter;
        self.tmp_counter += 1;
        if n == 0 {
            format!("cnx_{}", stem)
        } else {
            format!("cnx_{}{}", stem, n)
        }
    }

    /// Emit every registered helper, in deterministic order.
    pub(super) fn emit_helpers(&self, out: &mut Formatter) {
        for helper in &self.helpers {
            match helper {
                Helper::Arith { prim, op, policy } => {
                    self.emit_arith_helper(out, *prim, *op, *policy)
                }
                Helper::StrCopy => {
                    out.line("static inline void cnx_str_copy(char *dst, size_t cap, const char *src)");
                    out.line("{");
                    out.indent();
                    out.line("(void)strncpy(dst, src, cap);");
                    out.line("dst[cap] = '\\0';");
                    out.dedent();
                    out.line("}");
                    out.blank();
                }
                Helper::StrAppend => {
                    out.line("static inline void cnx_str_append(char *dst, size_t cap, const char *src)");
                    out.line("{");
                    out.indent();
                    out.line("size_t used = strlen(dst);");
                    out.line("if (used < cap) {");
                    out.indent();
                    out.line("(void)strncpy(&dst[used], src, cap - used);");
                    out.dedent();
                    out.line("}");
                    out.line("dst[cap] = '\\0';");
                    out.dedent();
                    out.line("}");
                    out.blank();
                }
            }
        }
    }

    fn emit_arith_helper(
        &self,
        out: &mut Formatter,
        prim: Prim,
        op: ArithOp,
        policy: OverflowPolicy,
    ) {
        let ty = c_prim(prim);
        let name = format!("cnx_{}_{}_{}", prim.keyword(), op.word(), policy.keyword());
        out.line(&format!(
            "static inline {} {}({} a, {} b)",
            ty, name, ty, ty
        ));
        out.line("{");
        out.indent();
        match (policy, prim.is_signed()) {
            (OverflowPolicy::Wrap, true) => {
                // Signed wrap goes through the unsigned type to stay
                // defined behaviour in C.
                let unsigned = c_prim(unsigned_twin(prim));
                out.line(&format!(
                    "return ({})({})(({})a {} ({})b);",
                    ty,
                    unsigned,
                    unsigned,
                    op.symbol(),
                    unsigned
                ));
            }
            (OverflowPolicy::Wrap, false) => {
                out.line(&format!("return ({})(a {} b);", ty, op.symbol()));
            }
            (OverflowPolicy::Clamp, false) => {
                let (_, max) = limit_macros(prim);
                match op {
                    ArithOp::Add => out.line(&format!(
                        "return (a > ({})({} - b)) ? {} : ({})(a + b);",
                        ty, max, max, ty
                    )),
                    ArithOp::Sub => out.line(&format!("return (a < b) ? 0U : ({})(a - b);", ty)),
                    ArithOp::Mul => out.line(&format!(
                        "return ((b != 0U) && (a > ({})({} / b))) ? {} : ({})(a * b);",
                        ty, max, max, ty
                    )),
                }
            }
            (OverflowPolicy::Clamp, true) => {
                let (min, max) = limit_macros(prim);
                match op {
                    ArithOp::Add => {
                        out.line(&format!("if ((b > 0) && (a > ({})({} - b))) {{", ty, max));
                        out.indent();
                        out.line(&format!("return {};", max));
                        out.dedent();
                        out.line("}");
                        out.line(&format!("if ((b < 0) && (a < ({})({} - b))) {{", ty, min));
                        out.indent();
                        out.line(&format!("return {};", min));
                        out.dedent();
                        out.line("}");
                        out.line(&format!("return ({})(a + b);", ty));
                    }
                    ArithOp::Sub => {
                        out.line(&format!("if ((b < 0) && (a > ({})({} + b))) {{", ty, max));
                        out.indent();
                        out.line(&format!("return {};", max));
                        out.dedent();
                        out.line("}");
                        out.line(&format!("if ((b > 0) && (a < ({})({} + b))) {{", ty, min));
                        out.indent();
                        out.line(&format!("return {};", min));
                        out.dedent();
                        out.line("}");
                        out.line(&format!("return ({})(a - b);", ty));
                    }
                    ArithOp::Mul => {
                        out.line("if (a > 0) {");
                        out.indent();
                        out.line(&format!("if ((b > 0) && (a > ({})({} / b))) {{", ty, max));
                        out.indent();
                        out.line(&format!("return {};", max));
                        out.dedent();
                        out.line("}");
                        out.line(&format!("if ((b < 0) && (b < ({})({} / a))) {{", ty, min));
                        out.indent();
                        out.line(&format!("return {};", min));
                        out.dedent();
                        out.line("}");
                        out.dedent();
                        out.line("} else if (a < 0) {");
                        out.indent();
                        out.line(&format!("if ((b > 0) && (a < ({})({} / b))) {{", ty, min));
                        out.indent();
                        out.line(&format!("return {};", min));
                        out.dedent();
                        out.line("}");
                        out.line(&format!("if ((b < 0) && (b < ({})({} / a))) {{", ty, max));
                        out.indent();
                        out.line(&format!("return {};", max));
                        out.dedent();
                        out.line("}");
                        out.dedent();
                        out.line("} else {");
                        out.indent();
                        out.line("return 0;");
                        out.dedent();
                        out.line("}");
                        out.line(&format!("return ({})(a * b);", ty));
                    }
                }
            }
        }
        out.dedent();
        out.line("}");
        out.blank();
    }
}

pub(super) fn unsigned_twin(prim: Prim) -> Prim {
    match prim {
        Prim::I8 => Prim::U8,
        Prim::I16 => Prim::U16,
        Prim::I32 => Prim::U32,
        Prim::I64 => Prim::U64,
        other => other,
    }
}
