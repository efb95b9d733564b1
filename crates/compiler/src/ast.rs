//! Abstract syntax tree for C-Next.
//!
//! Each parsed file owns an expression arena (`Vec<Expr>` indexed by
//! `ExprId`); declarations and statements hold ids into it. Cross-file
//! references are always `(FileId, ExprId)` pairs, never borrows, so the
//! whole-program analyser stays cycle-free over ownership.

use crate::types::{OverflowPolicy, Prim};
use std::path::PathBuf;

/// Index of a loaded file within a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// Source position of a token or node.
///
/// Lines are 1-based, columns 0-based; `length` is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

impl Span {
    pub fn new(line: u32, column: u32, length: u32) -> Self {
        Span { line, column, length }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Index of an expression within its file's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Arena owning every expression of one file.
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
    spans: Vec<Span>,
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena::default()
    }

    pub fn alloc(&mut self, expr: Expr, span: Span) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expr);
        self.spans.push(span);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    pub fn span(&self, id: ExprId) -> Span {
        self.spans[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Access modifier on a register member. `Rw` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Rw,
    Ro,
    Wo,
    W1c,
    W1s,
}

impl Access {
    pub fn keyword(self) -> &'static str {
        match self {
            Access::Rw => "rw",
            Access::Ro => "ro",
            Access::Wo => "wo",
            Access::W1c => "w1c",
            Access::W1s => "w1s",
        }
    }
}

/// A syntactic type, before symbol resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Prim(Prim),
    /// `string<N>`
    Str { capacity: u32 },
    /// Dotted name, e.g. `Config` or `Serial.Config`.
    Named { segments: Vec<String> },
    Ptr(Box<TypeExpr>),
    /// Postfix array: `u8 buf[64]`, size omitted for parameters.
    Array { elem: Box<TypeExpr>, size: Option<ExprId> },
}

/// `#include "…"` or `#include <…>`.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeDirective {
    pub path: String,
    /// True for the `<…>` form, which skips the including file's directory.
    pub angled: bool,
    pub span: Span,
}

/// How an include's target is classified, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    CNext,
    NativeHeader,
    Unknown,
}

impl IncludeDirective {
    pub fn kind(&self) -> IncludeKind {
        let lower = self.path.to_ascii_lowercase();
        if lower.ends_with(".cnx") {
            IncludeKind::CNext
        } else if lower.ends_with(".h") || lower.ends_with(".hpp") || lower.ends_with(".hxx") {
            IncludeKind::NativeHeader
        } else {
            IncludeKind::Unknown
        }
    }
}

/// A file-scope line comment, preserved for directive pass-through.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentLine {
    /// Text after `//`, untrimmed.
    pub text: String,
    pub span: Span,
}

impl CommentLine {
    /// The harness directives are single-line comments, case-insensitive.
    pub fn directive(&self) -> Option<Directive> {
        let trimmed = self.text.trim().to_ascii_lowercase();
        Some(match trimmed.as_str() {
            "test-c-only" => Directive::COnly,
            "test-cpp-only" | "test-cpp-mode" => Directive::CppOnly,
            "test-execution" => Directive::Execution,
            "test-no-exec" => Directive::NoExec,
            "test-no-warnings" => Directive::NoWarnings,
            "test-transpile-only" => Directive::TranspileOnly,
            _ => return None,
        })
    }
}

/// Recognised source directives. Only the emission-mode pair is consumed
/// by the compiler; the rest are harness metadata passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    COnly,
    CppOnly,
    Execution,
    NoExec,
    NoWarnings,
    TranspileOnly,
}

/// Top-level and scope-level declarations.
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Scope(ScopeDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Bitmap(BitmapDecl),
    Register(RegisterDecl),
    Const(ConstDecl),
    Var(VarDecl),
    Func(FuncDecl),
    Include(IncludeDirective),
    Comment(CommentLine),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeDecl {
    pub name: String,
    pub decls: Vec<Decl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    /// Explicit tag value, `GREEN <- 5`.
    pub value: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<EnumMember>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitmapFieldDecl {
    pub name: String,
    pub width: u32,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitmapDecl {
    pub name: String,
    pub backing: Prim,
    pub fields: Vec<BitmapFieldDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMemberDecl {
    pub name: String,
    pub access: Access,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDecl {
    pub name: String,
    pub address: u64,
    pub members: Vec<RegisterMemberDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub init: ExprId,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub init: Option<ExprId>,
    pub atomic: bool,
    /// Explicit `clamp`/`wrap` annotation; `None` means inherited/default.
    pub policy: Option<OverflowPolicy>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub ret: TypeExpr,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// One or more constant values sharing a body: `case 1, 2 { … }`.
    pub values: Vec<ExprId>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Block),
    If {
        cond: ExprId,
        then_block: Block,
        /// `Block` or a nested `If` for `else if` chains.
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        cond: ExprId,
        body: Block,
        span: Span,
    },
    DoWhile {
        body: Block,
        cond: ExprId,
        span: Span,
    },
    /// All three parts are mandatory.
    For {
        init: Box<Stmt>,
        cond: ExprId,
        step: ExprId,
        body: Block,
        span: Span,
    },
    Switch {
        scrutinee: ExprId,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
        span: Span,
    },
    Return {
        value: Option<ExprId>,
        span: Span,
    },
    Expr {
        expr: ExprId,
        span: Span,
    },
    Var(VarDecl),
    Atomic {
        body: Block,
        span: Span,
    },
    Critical {
        body: Block,
        span: Span,
    },
}

/// Root of a dotted path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRoot {
    /// `this.x` — the enclosing scope.
    This,
    /// `global.x` — top level.
    Global,
    /// Plain identifier start: local, parameter, or symbol.
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Deref,
    AddrOf,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Deref => "*",
            UnaryOp::AddrOf => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    /// Operators that carry an overflow policy.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Assignment operators: plain `<-` and the compound arrow family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Set => "<-",
            AssignOp::Add => "+<-",
            AssignOp::Sub => "-<-",
            AssignOp::Mul => "*<-",
            AssignOp::Div => "/<-",
            AssignOp::Mod => "%<-",
            AssignOp::BitAnd => "&<-",
            AssignOp::BitOr => "|<-",
            AssignOp::BitXor => "^<-",
            AssignOp::Shl => "<<-",
            AssignOp::Shr => ">>-",
        }
    }

    /// The binary operator a compound assignment applies, if any.
    pub fn binary_op(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Set => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit {
        value: u128,
        /// Base the literal was written in (2, 8, 10, or 16).
        base: u32,
        ty: Option<Prim>,
        policy: Option<OverflowPolicy>,
        negated: bool,
    },
    FloatLit {
        value: f64,
        ty: Option<Prim>,
    },
    BoolLit(bool),
    StrLit(String),
    CharLit(char),
    /// Dotted access chain: `c.value`, `this.count`, `Serial.Config.baud`.
    Path {
        root: PathRoot,
        segments: Vec<String>,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    Index {
        base: ExprId,
        index: ExprId,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Cast {
        ty: TypeExpr,
        operand: ExprId,
    },
    SizeOfType(TypeExpr),
    SizeOfExpr(ExprId),
    Ternary {
        cond: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    },
    Assign {
        op: AssignOp,
        target: ExprId,
        value: ExprId,
    },
}

/// One parsed file: declarations in source order plus the expression arena.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file: FileId,
    pub path: PathBuf,
    pub decls: Vec<Decl>,
    pub exprs: ExprArena,
}

impl SourceFile {
    /// All include directives, in source order.
    pub fn includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Include(inc) => Some(inc),
            _ => None,
        })
    }

    /// All recognised directives from file-scope comments.
    pub fn directives(&self) -> Vec<Directive> {
        self.decls
            .iter()
            .filter_map(|d| match d {
                Decl::Comment(c) => c.directive(),
                _ => None,
            })
            .collect()
    }
}
