//! Recursive-descent parser for C-Next.
//!
//! Statement grammar is deliberately strict: every conditional and loop
//! body is braced, every `switch` case carries its own braced block, and
//! `goto`/`break`/`continue` are rejected outright. Expressions use
//! Pratt-style precedence climbing with a C-like operator table.
//!
//! On a parse error the parser records a diagnostic, skips ahead to the
//! next top-level keyword, and resumes, so a broken file still yields a
//! best-effort AST for downstream phases.

use crate::ast::{
    Access, AssignOp, BinaryOp, BitmapDecl, BitmapFieldDecl, Block, CommentLine, ConstDecl, Decl,
    EnumDecl, EnumMember, Expr, ExprArena, ExprId, FieldDecl, FileId, FuncDecl, IncludeDirective,
    Param, PathRoot, RegisterDecl, RegisterMemberDecl, ScopeDecl, SourceFile, Span, StructDecl,
    Stmt, SwitchCase, TypeExpr, UnaryOp, VarDecl,
};
use crate::diagnostics::{Category, Diagnostic};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::types::{OverflowPolicy, Prim};
use std::path::{Path, PathBuf};

/// Parse one file into an AST plus collected diagnostics.
pub fn parse(source: &str, path: &Path, file: FileId) -> (SourceFile, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = tokenize(source, path);
    let mut parser = Parser {
        tokens,
        pos: 0,
        path: path.to_path_buf(),
        arena: ExprArena::new(),
        diagnostics: Vec::new(),
    };
    let decls = parser.parse_decls(true);
    diagnostics.extend(parser.diagnostics);
    let source_file = SourceFile {
        file,
        path: path.to_path_buf(),
        decls,
        exprs: parser.arena,
    };
    (source_file, diagnostics)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    path: PathBuf,
    arena: ExprArena,
    diagnostics: Vec<Diagnostic>,
}

/// Internal error marker; the diagnostic is already recorded.
type ParseResult<T> = Result<T, ()>;

impl Parser {
    // ----- token access -------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn span(&self) -> Span {
        self.current().span
    }

    fn at_end(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.at_end() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error_here(format!("expected {}, got '{}'", what, self.describe_current()));
            Err(())
        }
    }

    fn describe_current(&self) -> String {
        if self.at_end() {
            "end of file".to_string()
        } else {
            self.current().lexeme.clone()
        }
    }

    fn error_here(&mut self, message: String) {
        let span = self.span();
        self.diagnostics
            .push(Diagnostic::error(Category::Parse, message).at(&self.path, span));
    }

    fn error_at(&mut self, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::error(Category::Parse, message).at(&self.path, span));
    }

    /// Skip block comments (and, inside bodies, line comments too).
    fn skip_comments(&mut self) {
        while matches!(self.kind(), TokenKind::BlockComment) {
            self.advance();
        }
    }

    fn skip_all_comments(&mut self) {
        while matches!(self.kind(), TokenKind::LineComment | TokenKind::BlockComment) {
            self.advance();
        }
    }

    // ----- declarations -------------------------------------------------

    /// Parse declarations until EOF (top level) or `}` (inside a scope).
    fn parse_decls(&mut self, top_level: bool) -> Vec<Decl> {
        let mut decls = Vec::new();
        loop {
            self.skip_comments();
            if self.at_end() || (!top_level && self.check(&TokenKind::RBrace)) {
                break;
            }
            match self.parse_decl() {
                Ok(Some(decl)) => decls.push(decl),
                Ok(None) => {}
                Err(()) => self.recover_to_decl(),
            }
        }
        decls
    }

    fn parse_decl(&mut self) -> ParseResult<Option<Decl>> {
        match self.kind().clone() {
            TokenKind::LineComment => {
                let token = self.advance();
                Ok(Some(Decl::Comment(CommentLine {
                    text: token.lexeme,
                    span: token.span,
                })))
            }
            TokenKind::IncludePath { path, angled } => {
                let token = self.advance();
                Ok(Some(Decl::Include(IncludeDirective {
                    path,
                    angled,
                    span: token.span,
                })))
            }
            TokenKind::Scope => Ok(Some(Decl::Scope(self.parse_scope()?))),
            TokenKind::Struct => Ok(Some(Decl::Struct(self.parse_struct()?))),
            TokenKind::Enum => Ok(Some(Decl::Enum(self.parse_enum()?))),
            TokenKind::Bitmap => Ok(Some(Decl::Bitmap(self.parse_bitmap()?))),
            TokenKind::Register => Ok(Some(Decl::Register(self.parse_register()?))),
            TokenKind::Const => Ok(Some(Decl::Const(self.parse_const()?))),
            TokenKind::Goto | TokenKind::Break | TokenKind::Continue => {
                let token = self.advance();
                self.error_at(
                    token.span,
                    format!("'{}' is not allowed; C-Next has no unstructured control flow", token.lexeme),
                );
                Err(())
            }
            _ if self.at_type_start() => {
                let decl = self.parse_var_or_func()?;
                Ok(Some(decl))
            }
            _ => {
                self.error_here(format!(
                    "expected a declaration, got '{}'",
                    self.describe_current()
                ));
                Err(())
            }
        }
    }

    /// Skip to the next token that can begin a top-level declaration.
    fn recover_to_decl(&mut self) {
        // Always make progress, even when already sitting on a sync token.
        if !self.at_end() {
            self.advance();
        }
        while !self.at_end() {
            match self.kind() {
                TokenKind::Scope
                | TokenKind::Struct
                | TokenKind::Enum
                | TokenKind::Bitmap
                | TokenKind::Register
                | TokenKind::Const
                | TokenKind::Atomic
                | TokenKind::IncludePath { .. } => return,
                k if is_type_keyword(k) => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_scope(&mut self) -> ParseResult<ScopeDecl> {
        let span = self.span();
        self.advance(); // 'scope'
        let name = self.expect_ident("scope name")?;
        self.expect(&TokenKind::LBrace, "'{' after scope name")?;
        let decls = self.parse_decls(false);
        self.expect(&TokenKind::RBrace, "'}' to close scope")?;
        Ok(ScopeDecl { name, decls, span })
    }

    fn parse_struct(&mut self) -> ParseResult<StructDecl> {
        let span = self.span();
        self.advance(); // 'struct'
        let name = self.expect_ident("struct name")?;
        self.expect(&TokenKind::LBrace, "'{' after struct name")?;
        let mut fields = Vec::new();
        loop {
            self.skip_all_comments();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                self.error_here(format!("unexpected end of file in struct '{}'", name));
                return Err(());
            }
            let field_span = self.span();
            let ty = self.parse_type()?;
            let field_name = self.expect_ident("field name")?;
            let ty = self.parse_array_suffix(ty)?;
            self.expect(&TokenKind::Semi, "';' after struct field")?;
            fields.push(FieldDecl { name: field_name, ty, span: field_span });
        }
        Ok(StructDecl { name, fields, span })
    }

    fn parse_enum(&mut self) -> ParseResult<EnumDecl> {
        let span = self.span();
        self.advance(); // 'enum'
        let name = self.expect_ident("enum name")?;
        self.expect(&TokenKind::LBrace, "'{' after enum name")?;
        let mut members = Vec::new();
        loop {
            self.skip_all_comments();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                self.error_here(format!("unexpected end of file in enum '{}'", name));
                return Err(());
            }
            let member_span = self.span();
            let member_name = self.expect_ident("enum member name")?;
            let value = if self.eat(&TokenKind::ArrowAssign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            members.push(EnumMember { name: member_name, value, span: member_span });
            self.skip_all_comments();
            if !self.eat(&TokenKind::Comma) && !self.check(&TokenKind::RBrace) {
                self.error_here("expected ',' or '}' in enum body".to_string());
                return Err(());
            }
        }
        if members.is_empty() {
            self.error_at(span, format!("enum '{}' must have at least one member", name));
            return Err(());
        }
        Ok(EnumDecl { name, members, span })
    }

    fn parse_bitmap(&mut self) -> ParseResult<BitmapDecl> {
        let span = self.span();
        self.advance(); // 'bitmap'
        let name = self.expect_ident("bitmap name")?;
        self.expect(&TokenKind::Colon, "':' and a backing type after bitmap name")?;
        let backing_span = self.span();
        let backing = match self.parse_prim_keyword() {
            Some(p) if p.is_unsigned() => p,
            Some(p) => {
                self.error_at(
                    backing_span,
                    format!("bitmap backing type must be unsigned, got '{}'", p.keyword()),
                );
                return Err(());
            }
            None => {
                self.error_here("expected an unsigned backing type for bitmap".to_string());
                return Err(());
            }
        };
        self.expect(&TokenKind::LBrace, "'{' after bitmap backing type")?;
        let mut fields = Vec::new();
        loop {
            self.skip_all_comments();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                self.error_here(format!("unexpected end of file in bitmap '{}'", name));
                return Err(());
            }
            let field_span = self.span();
            let field_name = self.expect_ident("bitmap field name")?;
            self.expect(&TokenKind::Colon, "':' and a bit width after field name")?;
            let width = match self.kind() {
                TokenKind::Int { value, .. } => {
                    let width = *value;
                    self.advance();
                    width as u32
                }
                _ => {
                    self.error_here("expected a bit width after ':'".to_string());
                    return Err(());
                }
            };
            self.expect(&TokenKind::Semi, "';' after bitmap field")?;
            fields.push(BitmapFieldDecl { name: field_name, width, span: field_span });
        }
        Ok(BitmapDecl { name, backing, fields, span })
    }

    fn parse_register(&mut self) -> ParseResult<RegisterDecl> {
        let span = self.span();
        self.advance(); // 'register'
        let name = self.expect_ident("register name")?;
        self.expect(&TokenKind::At, "'@' and a base address after register name")?;
        let address = match self.kind() {
            TokenKind::Int { value, .. } => {
                let address = *value as u64;
                self.advance();
                address
            }
            _ => {
                self.error_here("expected a base address after '@'".to_string());
                return Err(());
            }
        };
        self.expect(&TokenKind::LBrace, "'{' after register address")?;
        let mut members = Vec::new();
        loop {
            self.skip_all_comments();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                self.error_here(format!("unexpected end of file in register '{}'", name));
                return Err(());
            }
            let member_span = self.span();
            let access = self.parse_access().unwrap_or(Access::Rw);
            let ty = self.parse_type()?;
            let member_name = self.expect_ident("register member name")?;
            self.expect(&TokenKind::Semi, "';' after register member")?;
            members.push(RegisterMemberDecl {
                name: member_name,
                access,
                ty,
                span: member_span,
            });
        }
        Ok(RegisterDecl { name, address, members, span })
    }

    fn parse_access(&mut self) -> Option<Access> {
        let access = match self.kind() {
            TokenKind::Rw => Access::Rw,
            TokenKind::Ro => Access::Ro,
            TokenKind::Wo => Access::Wo,
            TokenKind::W1c => Access::W1c,
            TokenKind::W1s => Access::W1s,
            _ => return None,
        };
        self.advance();
        Some(access)
    }

    fn parse_const(&mut self) -> ParseResult<ConstDecl> {
        let span = self.span();
        self.advance(); // 'const'
        let ty = self.parse_type()?;
        let name = self.expect_ident("constant name")?;
        self.expect(&TokenKind::ArrowAssign, "'<-' (constants require an initializer)")?;
        let init = self.parse_expr()?;
        self.expect(&TokenKind::Semi, "';' after constant declaration")?;
        Ok(ConstDecl { name, ty, init, span })
    }

    /// Variable or function declaration, after modifiers.
    fn parse_var_or_func(&mut self) -> ParseResult<Decl> {
        let span = self.span();
        let atomic = self.eat(&TokenKind::Atomic);
        let policy = if self.eat(&TokenKind::Clamp) {
            Some(OverflowPolicy::Clamp)
        } else if self.eat(&TokenKind::Wrap) {
            Some(OverflowPolicy::Wrap)
        } else {
            None
        };
        let ty = self.parse_type()?;
        let name = self.expect_ident("declaration name")?;

        if self.check(&TokenKind::LParen) {
            if atomic || policy.is_some() {
                self.error_at(
                    span,
                    "'atomic', 'clamp', and 'wrap' apply to variables, not functions".to_string(),
                );
                return Err(());
            }
            let func = self.parse_func_rest(name, ty, span)?;
            return Ok(Decl::Func(func));
        }

        let var = self.parse_var_rest(name, ty, atomic, policy, span)?;
        Ok(Decl::Var(var))
    }

    fn parse_var_rest(
        &mut self,
        name: String,
        ty: TypeExpr,
        atomic: bool,
        policy: Option<OverflowPolicy>,
        span: Span,
    ) -> ParseResult<VarDecl> {
        let ty = self.parse_array_suffix(ty)?;
        let init = if self.eat(&TokenKind::ArrowAssign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi, "';' after variable declaration")?;
        Ok(VarDecl { name, ty, init, atomic, policy, span })
    }

    fn parse_func_rest(&mut self, name: String, ret: TypeExpr, span: Span) -> ParseResult<FuncDecl> {
        self.expect(&TokenKind::LParen, "'(' to open parameter list")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let param_span = self.span();
                let ty = self.parse_type()?;
                let param_name = self.expect_ident("parameter name")?;
                let ty = self.parse_array_suffix(ty)?;
                params.push(Param { name: param_name, ty, span: param_span });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' to close parameter list")?;
        let body = self.parse_block()?;
        Ok(FuncDecl { name, ret, params, body, span })
    }

    // ----- types --------------------------------------------------------

    fn at_type_start(&self) -> bool {
        match self.kind() {
            TokenKind::Atomic | TokenKind::Clamp | TokenKind::Wrap | TokenKind::StringKw => true,
            k if is_type_keyword(k) => true,
            TokenKind::Ident => {
                // `Name name` declares; `Name.member`, `Name(`, `Name <-` are
                // expressions. One identifier of lookahead decides.
                matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokenKind::Ident) | Some(TokenKind::Star)
                )
            }
            _ => false,
        }
    }

    fn parse_prim_keyword(&mut self) -> Option<Prim> {
        let prim = prim_for_keyword(self.kind())?;
        self.advance();
        Some(prim)
    }

    fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        let mut ty = if let Some(prim) = self.parse_prim_keyword() {
            TypeExpr::Prim(prim)
        } else if self.check(&TokenKind::StringKw) {
            self.advance();
            self.expect(&TokenKind::Lt, "'<' after 'string'")?;
            let capacity = match self.kind() {
                TokenKind::Int { value, .. } => {
                    let capacity = *value;
                    self.advance();
                    capacity as u32
                }
                _ => {
                    self.error_here("expected a capacity after 'string<'".to_string());
                    return Err(());
                }
            };
            self.expect(&TokenKind::Gt, "'>' to close string capacity")?;
            TypeExpr::Str { capacity }
        } else if self.check(&TokenKind::Ident) {
            let mut segments = vec![self.advance().lexeme];
            while self.check(&TokenKind::Dot) {
                // Only continue when the dot is followed by another
                // identifier that is itself part of a type name.
                self.advance();
                segments.push(self.expect_ident("type name segment")?);
            }
            TypeExpr::Named { segments }
        } else {
            self.error_here(format!("expected a type, got '{}'", self.describe_current()));
            return Err(());
        };
        while self.eat(&TokenKind::Star) {
            ty = TypeExpr::Ptr(Box::new(ty));
        }
        Ok(ty)
    }

    /// Postfix array declarator: `name[64]` or `name[]`.
    fn parse_array_suffix(&mut self, ty: TypeExpr) -> ParseResult<TypeExpr> {
        if !self.eat(&TokenKind::LBracket) {
            return Ok(ty);
        }
        let size = if self.check(&TokenKind::RBracket) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::RBracket, "']' to close array size")?;
        Ok(TypeExpr::Array { elem: Box::new(ty), size })
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<String> {
        if self.check(&TokenKind::Ident) {
            Ok(self.advance().lexeme)
        } else {
            self.error_here(format!("expected {}, got '{}'", what, self.describe_current()));
            Err(())
        }
    }

    // ----- statements ---------------------------------------------------

    fn parse_block(&mut self) -> ParseResult<Block> {
        let span = self.span();
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        loop {
            self.skip_all_comments();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                self.error_here("unexpected end of file inside block".to_string());
                return Err(());
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Block { stmts, span })
    }

    fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        match self.kind() {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after 'while'")?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' after while condition")?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body, span })
            }
            TokenKind::Do => {
                self.advance();
                let body = self.parse_block()?;
                self.expect(&TokenKind::While, "'while' after do body")?;
                self.expect(&TokenKind::LParen, "'(' after 'while'")?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' after do-while condition")?;
                self.expect(&TokenKind::Semi, "';' after do-while")?;
                Ok(Stmt::DoWhile { body, cond, span })
            }
            TokenKind::For => self.parse_for(span),
            TokenKind::Switch => self.parse_switch(span),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semi, "';' after return")?;
                Ok(Stmt::Return { value, span })
            }
            TokenKind::Atomic if self.peek_is(1, &TokenKind::LBrace) => {
                self.advance();
                let body = self.parse_block()?;
                Ok(Stmt::Atomic { body, span })
            }
            TokenKind::Critical => {
                self.advance();
                let body = self.parse_block()?;
                Ok(Stmt::Critical { body, span })
            }
            TokenKind::Goto | TokenKind::Break | TokenKind::Continue => {
                let token = self.advance();
                self.error_at(
                    token.span,
                    format!(
                        "'{}' is not allowed; loops exit through their condition or 'return'",
                        token.lexeme
                    ),
                );
                Err(())
            }
            _ if self.at_type_start() => {
                let atomic = self.eat(&TokenKind::Atomic);
                let policy = if self.eat(&TokenKind::Clamp) {
                    Some(OverflowPolicy::Clamp)
                } else if self.eat(&TokenKind::Wrap) {
                    Some(OverflowPolicy::Wrap)
                } else {
                    None
                };
                let ty = self.parse_type()?;
                let name = self.expect_ident("variable name")?;
                let var = self.parse_var_rest(name, ty, atomic, policy, span)?;
                Ok(Stmt::Var(var))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Semi, "';' after expression")?;
                Ok(Stmt::Expr { expr, span })
            }
        }
    }

    fn peek_is(&self, offset: usize, kind: &TokenKind) -> bool {
        self.tokens.get(self.pos + offset).map(|t| &t.kind) == Some(kind)
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // 'if'
        self.expect(&TokenKind::LParen, "'(' after 'if'")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' after if condition")?;
        let then_block = self.parse_block()?;
        let else_branch = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(Stmt::Block(self.parse_block()?)))
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_block, else_branch, span })
    }

    fn parse_for(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance(); // 'for'
        self.expect(&TokenKind::LParen, "'(' after 'for'")?;

        // All three parts are mandatory; an empty part is a hard error.
        if self.check(&TokenKind::Semi) {
            self.error_here("for loop requires an initializer".to_string());
            return Err(());
        }
        let init = if self.at_type_start() {
            let init_span = self.span();
            let ty = self.parse_type()?;
            let name = self.expect_ident("loop variable name")?;
            self.expect(&TokenKind::ArrowAssign, "'<-' in loop initializer")?;
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semi, "';' after loop initializer")?;
            Box::new(Stmt::Var(VarDecl {
                name,
                ty,
                init: Some(value),
                atomic: false,
                policy: None,
                span: init_span,
            }))
        } else {
            let init_span = self.span();
            let expr = self.parse_expr()?;
            self.expect(&TokenKind::Semi, "';' after loop initializer")?;
            Box::new(Stmt::Expr { expr, span: init_span })
        };

        if self.check(&TokenKind::Semi) {
            self.error_here("for loop requires a condition".to_string());
            return Err(());
        }
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Semi, "';' after loop condition")?;

        if self.check(&TokenKind::RParen) {
            self.error_here("for loop requires a step expression".to_string());
            return Err(());
        }
        let step = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' after loop step")?;
        let body = self.parse_block()?;
        Ok(Stmt::For { init, cond, step, body, span })
    }

    fn parse_switch(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance(); // 'switch'
        self.expect(&TokenKind::LParen, "'(' after 'switch'")?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')' after switch expression")?;
        self.expect(&TokenKind::LBrace, "'{' after switch")?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            self.skip_all_comments();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                self.error_here("unexpected end of file inside switch".to_string());
                return Err(());
            }
            if self.check(&TokenKind::Case) {
                let case_span = self.span();
                self.advance();
                let mut values = vec![self.parse_expr()?];
                while self.eat(&TokenKind::Comma) {
                    values.push(self.parse_expr()?);
                }
                // Braces per case are mandatory; a ':' here is the C habit
                // being rejected on purpose.
                if self.check(&TokenKind::Colon) {
                    self.error_here("switch cases take a braced block, not ':'".to_string());
                    return Err(());
                }
                let body = self.parse_block()?;
                cases.push(SwitchCase { values, body, span: case_span });
            } else if self.check(&TokenKind::Default) {
                let default_span = self.span();
                self.advance();
                if self.check(&TokenKind::Colon) {
                    self.error_here("'default' takes a braced block, not ':'".to_string());
                    return Err(());
                }
                let body = self.parse_block()?;
                if default.replace(body).is_some() {
                    self.error_at(default_span, "switch has more than one 'default'".to_string());
                    return Err(());
                }
            } else {
                self.error_here(format!(
                    "expected 'case' or 'default' in switch, got '{}'",
                    self.describe_current()
                ));
                return Err(());
            }
        }
        Ok(Stmt::Switch { scrutinee, cases, default, span })
    }

    // ----- expressions --------------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<ExprId> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> ParseResult<ExprId> {
        let target = self.parse_ternary()?;
        let op = match self.kind() {
            TokenKind::ArrowAssign => AssignOp::Set,
            TokenKind::PlusArrow => AssignOp::Add,
            TokenKind::MinusArrow => AssignOp::Sub,
            TokenKind::StarArrow => AssignOp::Mul,
            TokenKind::SlashArrow => AssignOp::Div,
            TokenKind::PercentArrow => AssignOp::Mod,
            TokenKind::AmpArrow => AssignOp::BitAnd,
            TokenKind::PipeArrow => AssignOp::BitOr,
            TokenKind::CaretArrow => AssignOp::BitXor,
            TokenKind::ShlArrow => AssignOp::Shl,
            TokenKind::ShrArrow => AssignOp::Shr,
            _ => return Ok(target),
        };
        let span = self.span();
        self.advance();
        let value = self.parse_assign()?;
        Ok(self.arena.alloc(Expr::Assign { op, target, value }, span))
    }

    fn parse_ternary(&mut self) -> ParseResult<ExprId> {
        let cond = self.parse_binary(0)?;
        if !self.check(&TokenKind::Question) {
            return Ok(cond);
        }
        let span = self.span();
        self.advance();
        let then_expr = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "':' in ternary expression")?;
        let else_expr = self.parse_ternary()?;
        Ok(self
            .arena
            .alloc(Expr::Ternary { cond, then_expr, else_expr }, span))
    }

    fn parse_binary(&mut self, min_bp: u8) -> ParseResult<ExprId> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, bp) = match binary_op_for(self.kind()) {
                Some(pair) => pair,
                None => break,
            };
            if bp < min_bp {
                break;
            }
            let span = self.span();
            self.advance();
            let rhs = self.parse_binary(bp + 1)?;
            lhs = self.arena.alloc(Expr::Binary { op, lhs, rhs }, span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<ExprId> {
        let span = self.span();
        let op = match self.kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Star => Some(UnaryOp::Deref),
            TokenKind::Amp => Some(UnaryOp::AddrOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            // Fold negation into integer literals so constant contexts
            // (enum tags, case values, array sizes) see one node.
            if op == UnaryOp::Neg {
                if let Expr::IntLit { value, base, ty, policy, negated: false } =
                    self.arena.get(operand).clone()
                {
                    return Ok(self
                        .arena
                        .alloc(Expr::IntLit { value, base, ty, policy, negated: true }, span));
                }
            }
            return Ok(self.arena.alloc(Expr::Unary { op, operand }, span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&TokenKind::LParen) {
                let span = self.span();
                self.advance();
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "')' to close call arguments")?;
                expr = self.arena.alloc(Expr::Call { callee: expr, args }, span);
            } else if self.check(&TokenKind::LBracket) {
                let span = self.span();
                self.advance();
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "']' to close index")?;
                expr = self.arena.alloc(Expr::Index { base: expr, index }, span);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<ExprId> {
        let span = self.span();
        match self.kind().clone() {
            TokenKind::Int { value, base, ty, policy } => {
                self.advance();
                Ok(self
                    .arena
                    .alloc(Expr::IntLit { value, base, ty, policy, negated: false }, span))
            }
            TokenKind::Float { value, ty } => {
                self.advance();
                Ok(self.arena.alloc(Expr::FloatLit { value, ty }, span))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(self.arena.alloc(Expr::StrLit(value), span))
            }
            TokenKind::Char(value) => {
                self.advance();
                Ok(self.arena.alloc(Expr::CharLit(value), span))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.arena.alloc(Expr::BoolLit(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.arena.alloc(Expr::BoolLit(false), span))
            }
            TokenKind::This => {
                self.advance();
                self.expect(&TokenKind::Dot, "'.' after 'this'")?;
                let segments = self.parse_path_segments()?;
                Ok(self
                    .arena
                    .alloc(Expr::Path { root: PathRoot::This, segments }, span))
            }
            TokenKind::Global => {
                self.advance();
                self.expect(&TokenKind::Dot, "'.' after 'global'")?;
                let segments = self.parse_path_segments()?;
                Ok(self
                    .arena
                    .alloc(Expr::Path { root: PathRoot::Global, segments }, span))
            }
            TokenKind::Ident => {
                let name = self.advance().lexeme;
                let mut segments = Vec::new();
                while self.check(&TokenKind::Dot) {
                    self.advance();
                    segments.push(self.expect_ident("name after '.'")?);
                }
                Ok(self
                    .arena
                    .alloc(Expr::Path { root: PathRoot::Ident(name), segments }, span))
            }
            TokenKind::SizeOf => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after 'sizeof'")?;
                let expr = if self.at_type_start_in_parens() {
                    let ty = self.parse_type()?;
                    Expr::SizeOfType(ty)
                } else {
                    Expr::SizeOfExpr(self.parse_expr()?)
                };
                self.expect(&TokenKind::RParen, "')' to close 'sizeof'")?;
                Ok(self.arena.alloc(expr, span))
            }
            TokenKind::LParen => {
                self.advance();
                // `(u8)` and friends are casts; anything else is grouping.
                if self.at_type_start_in_parens() {
                    let ty = self.parse_type()?;
                    self.expect(&TokenKind::RParen, "')' to close cast")?;
                    let operand = self.parse_unary()?;
                    return Ok(self.arena.alloc(Expr::Cast { ty, operand }, span));
                }
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' to close expression")?;
                Ok(inner)
            }
            _ => {
                self.error_here(format!(
                    "expected an expression, got '{}'",
                    self.describe_current()
                ));
                Err(())
            }
        }
    }

    /// Type start inside parentheses: casts and `sizeof` accept primitive
    /// and bounded-string types (plus pointers to them), never bare
    /// identifiers, which keeps `(x)` grouping unambiguous.
    fn at_type_start_in_parens(&self) -> bool {
        is_type_keyword(self.kind()) || matches!(self.kind(), TokenKind::StringKw)
    }

    fn parse_path_segments(&mut self) -> ParseResult<Vec<String>> {
        let mut segments = vec![self.expect_ident("name after '.'")?];
        while self.check(&TokenKind::Dot) {
            self.advance();
            segments.push(self.expect_ident("name after '.'")?);
        }
        Ok(segments)
    }
}

fn is_type_keyword(kind: &TokenKind) -> bool {
    prim_for_keyword(kind).is_some()
}

fn prim_for_keyword(kind: &TokenKind) -> Option<Prim> {
    Some(match kind {
        TokenKind::U8 => Prim::U8,
        TokenKind::U16 => Prim::U16,
        TokenKind::U32 => Prim::U32,
        TokenKind::U64 => Prim::U64,
        TokenKind::I8 => Prim::I8,
        TokenKind::I16 => Prim::I16,
        TokenKind::I32 => Prim::I32,
        TokenKind::I64 => Prim::I64,
        TokenKind::F32 => Prim::F32,
        TokenKind::F64 => Prim::F64,
        TokenKind::Bool => Prim::Bool,
        TokenKind::Void => Prim::Void,
        TokenKind::Isr => Prim::Isr,
        _ => return None,
    })
}

/// Binding powers for the Pratt loop, C-like and left-associative.
fn binary_op_for(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    Some(match kind {
        TokenKind::OrOr => (BinaryOp::LogicalOr, 1),
        TokenKind::AndAnd => (BinaryOp::LogicalAnd, 2),
        TokenKind::Pipe => (BinaryOp::BitOr, 3),
        TokenKind::Caret => (BinaryOp::BitXor, 4),
        TokenKind::Amp => (BinaryOp::BitAnd, 5),
        TokenKind::EqEq => (BinaryOp::Eq, 6),
        TokenKind::Ne => (BinaryOp::Ne, 6),
        TokenKind::Lt => (BinaryOp::Lt, 7),
        TokenKind::Le => (BinaryOp::Le, 7),
        TokenKind::Gt => (BinaryOp::Gt, 7),
        TokenKind::Ge => (BinaryOp::Ge, 7),
        TokenKind::Shl => (BinaryOp::Shl, 8),
        TokenKind::Shr => (BinaryOp::Shr, 8),
        TokenKind::Plus => (BinaryOp::Add, 9),
        TokenKind::Minus => (BinaryOp::Sub, 9),
        TokenKind::Star => (BinaryOp::Mul, 10),
        TokenKind::Slash => (BinaryOp::Div, 10),
        TokenKind::Percent => (BinaryOp::Mod, 10),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::has_errors;

    fn parse_ok(source: &str) -> SourceFile {
        let (file, diags) = parse(source, Path::new("test.cnx"), FileId(0));
        assert!(!has_errors(&diags), "unexpected errors: {:?}", diags);
        file
    }

    fn parse_err(source: &str) -> Vec<Diagnostic> {
        let (_, diags) = parse(source, Path::new("test.cnx"), FileId(0));
        assert!(has_errors(&diags), "expected errors, got none");
        diags
    }

    #[test]
    fn test_scope_with_var_and_func() {
        let file = parse_ok(
            "scope Counter {\n    u32 count <- 0;\n    void increment() {\n        this.count +<- 1;\n    }\n}\n",
        );
        assert_eq!(file.decls.len(), 1);
        let Decl::Scope(scope) = &file.decls[0] else {
            panic!("expected scope");
        };
        assert_eq!(scope.name, "Counter");
        assert_eq!(scope.decls.len(), 2);
        assert!(matches!(scope.decls[0], Decl::Var(_)));
        assert!(matches!(scope.decls[1], Decl::Func(_)));
    }

    #[test]
    fn test_atomic_variable_declaration() {
        let file = parse_ok("atomic u32 counter <- 0;\n");
        let Decl::Var(var) = &file.decls[0] else {
            panic!("expected var");
        };
        assert!(var.atomic);
        assert_eq!(var.ty, TypeExpr::Prim(Prim::U32));
    }

    #[test]
    fn test_wrap_annotated_variable() {
        let file = parse_ok("wrap u8 index <- 0;\n");
        let Decl::Var(var) = &file.decls[0] else {
            panic!("expected var");
        };
        assert_eq!(var.policy, Some(OverflowPolicy::Wrap));
    }

    #[test]
    fn test_struct_and_enum() {
        let file = parse_ok(
            "struct Config {\n    i32 value;\n    string<16> name;\n}\nenum Color { RED, GREEN <- 5, BLUE }\n",
        );
        let Decl::Struct(s) = &file.decls[0] else {
            panic!("expected struct");
        };
        assert_eq!(s.fields.len(), 2);
        assert_eq!(s.fields[1].ty, TypeExpr::Str { capacity: 16 });
        let Decl::Enum(e) = &file.decls[1] else {
            panic!("expected enum");
        };
        assert_eq!(e.members.len(), 3);
        assert!(e.members[1].value.is_some());
    }

    #[test]
    fn test_bitmap_decl() {
        let file = parse_ok("bitmap Flags : u8 {\n    ready : 1;\n    mode : 3;\n}\n");
        let Decl::Bitmap(b) = &file.decls[0] else {
            panic!("expected bitmap");
        };
        assert_eq!(b.backing, Prim::U8);
        assert_eq!(b.fields[1].width, 3);
    }

    #[test]
    fn test_bitmap_backing_must_be_unsigned() {
        let diags = parse_err("bitmap Flags : i8 { ready : 1; }\n");
        assert!(diags[0].message.contains("unsigned"));
    }

    #[test]
    fn test_register_decl_with_access_modifiers() {
        let file = parse_ok(
            "register UART0 @ 0x40001000 {\n    rw u32 data;\n    ro u32 status;\n    w1c u32 flags;\n    u32 control;\n}\n",
        );
        let Decl::Register(r) = &file.decls[0] else {
            panic!("expected register");
        };
        assert_eq!(r.address, 0x4000_1000);
        assert_eq!(r.members[0].access, Access::Rw);
        assert_eq!(r.members[1].access, Access::Ro);
        assert_eq!(r.members[2].access, Access::W1c);
        // Default access is rw.
        assert_eq!(r.members[3].access, Access::Rw);
    }

    #[test]
    fn test_goto_break_continue_rejected() {
        let diags = parse_err("void f() {\n    goto done;\n}\n");
        assert!(diags.iter().any(|d| d.message.contains("goto")));
        let diags = parse_err("void f() {\n    while (true) {\n        break;\n    }\n}\n");
        assert!(diags.iter().any(|d| d.message.contains("break")));
    }

    #[test]
    fn test_if_requires_braces() {
        let diags = parse_err("void f() {\n    if (true) return;\n}\n");
        assert!(diags.iter().any(|d| d.message.contains("'{'")));
    }

    #[test]
    fn test_for_requires_all_three_parts() {
        let diags = parse_err("void f() {\n    for (;;) {\n    }\n}\n");
        assert!(diags.iter().any(|d| d.message.contains("initializer")));
        let diags = parse_err("void f() {\n    for (u8 i <- 0;; i +<- 1) {\n    }\n}\n");
        assert!(diags.iter().any(|d| d.message.contains("condition")));
    }

    #[test]
    fn test_switch_brace_per_case() {
        let file = parse_ok(
            "void f(u8 x) {\n    switch (x) {\n        case 1 {\n            return;\n        }\n        case 2, 3 {\n            return;\n        }\n        default {\n            return;\n        }\n    }\n}\n",
        );
        let Decl::Func(f) = &file.decls[0] else {
            panic!("expected func");
        };
        let Stmt::Switch { cases, default, .. } = &f.body.stmts[0] else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].values.len(), 2);
        assert!(default.is_some());
    }

    #[test]
    fn test_switch_colon_style_rejected() {
        let diags = parse_err("void f(u8 x) {\n    switch (x) {\n        case 1: return;\n    }\n}\n");
        assert!(diags.iter().any(|d| d.message.contains("braced block")));
    }

    #[test]
    fn test_expression_precedence() {
        let file = parse_ok("u8 x <- 1 + 2 * 3;\n");
        let Decl::Var(var) = &file.decls[0] else {
            panic!("expected var");
        };
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = file.exprs.get(var.init.unwrap()) else {
            panic!("expected top-level add");
        };
        assert!(matches!(
            file.exprs.get(*rhs),
            Expr::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_qualified_paths() {
        let file = parse_ok("void f() {\n    Serial.Config.baud <- 9600;\n    global.count <- 1;\n}\n");
        let Decl::Func(f) = &file.decls[0] else {
            panic!("expected func");
        };
        let Stmt::Expr { expr, .. } = &f.body.stmts[0] else {
            panic!("expected expr stmt");
        };
        let Expr::Assign { target, .. } = file.exprs.get(*expr) else {
            panic!("expected assignment");
        };
        let Expr::Path { root: PathRoot::Ident(name), segments } = file.exprs.get(*target) else {
            panic!("expected path");
        };
        assert_eq!(name, "Serial");
        assert_eq!(segments, &["Config", "baud"]);
    }

    #[test]
    fn test_cast_and_sizeof() {
        let file = parse_ok("u8 x <- (u8)300;\nu32 n <- sizeof(u32);\n");
        let Decl::Var(var) = &file.decls[0] else {
            panic!("expected var");
        };
        assert!(matches!(
            file.exprs.get(var.init.unwrap()),
            Expr::Cast { ty: TypeExpr::Prim(Prim::U8), .. }
        ));
        let Decl::Var(var) = &file.decls[1] else {
            panic!("expected var");
        };
        assert!(matches!(
            file.exprs.get(var.init.unwrap()),
            Expr::SizeOfType(TypeExpr::Prim(Prim::U32))
        ));
    }

    #[test]
    fn test_atomic_block_vs_atomic_var() {
        let file = parse_ok("void f() {\n    atomic {\n        global.x <- 1;\n    }\n    atomic u8 y <- 0;\n}\n");
        let Decl::Func(f) = &file.decls[0] else {
            panic!("expected func");
        };
        assert!(matches!(f.body.stmts[0], Stmt::Atomic { .. }));
        assert!(matches!(&f.body.stmts[1], Stmt::Var(v) if v.atomic));
    }

    #[test]
    fn test_includes_and_comments_preserved_in_order() {
        let file = parse_ok("// test-cpp-only\n#include \"util.cnx\"\n#include <Arduino.h>\nu8 x;\n");
        assert!(matches!(file.decls[0], Decl::Comment(_)));
        assert!(matches!(file.decls[1], Decl::Include(_)));
        assert!(matches!(file.decls[2], Decl::Include(_)));
        assert_eq!(file.includes().count(), 2);
        assert_eq!(file.directives(), vec![crate::ast::Directive::CppOnly]);
    }

    #[test]
    fn test_error_recovery_produces_best_effort_ast() {
        // First declaration is broken; the rest still parse.
        let (file, diags) = parse(
            "struct Broken {\n    i32 value\n}\nscope Ok {\n    u8 x <- 0;\n}\n",
            Path::new("test.cnx"),
            FileId(0),
        );
        assert!(has_errors(&diags));
        assert!(file
            .decls
            .iter()
            .any(|d| matches!(d, Decl::Scope(s) if s.name == "Ok")));
    }

    #[test]
    fn test_negated_literal_folding() {
        let file = parse_ok("i8 x <- -5;\n");
        let Decl::Var(var) = &file.decls[0] else {
            panic!("expected var");
        };
        assert!(matches!(
            file.exprs.get(var.init.unwrap()),
            Expr::IntLit { value: 5, negated: true, .. }
        ));
    }

    #[test]
    fn test_ternary_expression() {
        let file = parse_ok("u8 x <- true ? 1 : 2;\n");
        let Decl::Var(var) = &file.decls[0] else {
            panic!("expected var");
        };
        assert!(matches!(file.exprs.get(var.init.unwrap()), Expr::Ternary { .. }));
    }

    #[test]
    fn test_method_call_with_args() {
        let file = parse_ok("void f() {\n    Storage.loadDefaults(config);\n}\n");
        let Decl::Func(f) = &file.decls[0] else {
            panic!("expected func");
        };
        let Stmt::Expr { expr, .. } = &f.body.stmts[0] else {
            panic!("expected expr stmt");
        };
        let Expr::Call { callee, args } = file.exprs.get(*expr) else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(file.exprs.get(*callee), Expr::Path { .. }));
    }
}
