//! Declaration, statement, and function-body emission, including the
//! atomic lowering selected by the target profile.

use super::error::CodeGenError;
use super::registers::join;
use super::state::{ArithOp, Emitter, Formatter, ParamKind};
use super::types::{c_prim, c_type, declarator};
use crate::ast::{Access, AssignOp, Decl, Expr, ExprId, FuncDecl, Stmt, TypeExpr, VarDecl};
use crate::config::AtomicStrategy;
use crate::ir::EmitMode;
use crate::typechecker::{PlaceBase, PlaceStep, ResolvedPlace};
use crate::types::{OverflowPolicy, Prim, Type};

impl Emitter<'_> {
    /// Emit the implementation-side text of a declaration list, in
    /// source order. Comment directives pass through verbatim.
    pub(super) fn emit_impl_decls(
        &mut self,
        out: &mut Formatter,
        decls: &[Decl],
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        for decl in decls {
            match decl {
                Decl::Comment(comment) => out.line(&format!("//{}", comment.text)),
                Decl::Include(_) => {}
                Decl::Scope(scope) => {
                    let fq = join(prefix, &scope.name);
                    self.emit_impl_decls(out, &scope.decls, &fq)?;
                }
                Decl::Struct(_) | Decl::Enum(_) => {}
                Decl::Bitmap(bitmap) => {
                    self.emit_bitmap_accessors(out, bitmap, prefix);
                }
                Decl::Register(register) => {
                    self.emit_register_accessors(out, register, prefix)?;
                }
                Decl::Const(_) => {}
                Decl::Var(var) => {
                    self.emit_global_var(out, var, prefix)?;
                }
                Decl::Func(func) => {
                    self.emit_function(out, func, prefix)?;
                }
            }
        }
        Ok(())
    }

    fn emit_global_var(
        &mut self,
        out: &mut Formatter,
        var: &VarDecl,
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        let fq = join(prefix, &var.name);
        let symbol = self
            .ir
            .table
            .lookup_fq(&fq)
            .ok_or_else(|| format!("variable '{}' lost its symbol", fq))?;
        let ty = symbol.ty.clone();
        let qualifier = if var.atomic { "volatile " } else { "" };
        let decl = declarator(&fq, &ty, self.array_size(&var.ty));
        // Static initializers emit their folded value; a clamp helper
        // call is not a constant expression in C.
        let init = match var.init {
            Some(init) => match (self.const_value(init), ty.prim()) {
                (Some(value), Some(prim)) if prim.is_integer() => {
                    super::types::format_int(value.unsigned_abs(), 10, value < 0, prim)
                }
                _ => self.emit_expr_top(init)?,
            },
            None => default_init(&ty).to_string(),
        };
        out.line(&format!("{}{} = {};", qualifier, decl, init));
        out.blank();
        Ok(())
    }

    pub(super) fn array_size(&self, ty: &TypeExpr) -> Option<u64> {
        if let TypeExpr::Array { size: Some(size), .. } = ty {
            return self.const_value(*size).map(|v| v as u64);
        }
        None
    }

    /// Build the C/C++ signature of a function. Used for both the
    /// prototype in the header and the definition in the implementation.
    pub(super) fn signature(&self, func: &FuncDecl, prefix: &str) -> Result<String, CodeGenError> {
        let fq = join(prefix, &func.name);
        let symbol = self
            .ir
            .table
            .lookup_fq(&fq)
            .ok_or_else(|| format!("function '{}' lost its symbol", fq))?;
        let signature = symbol
            .signature
            .as_ref()
            .ok_or_else(|| format!("function '{}' has no signature", fq))?;

        let ret = match &signature.ret {
            Type::Prim(Prim::Isr) => "void".to_string(),
            other => c_type(other),
        };

        if signature.params.is_empty() {
            return Ok(format!("{} {}(void)", ret, fq));
        }
        let mut params = Vec::with_capacity(signature.params.len());
        for (index, (name, ty)) in signature.params.iter().enumerate() {
            params.push(self.param_text(symbol.id, index, name, ty));
        }
        Ok(format!("{} {}({})", ret, fq, params.join(", ")))
    }

    fn param_text(
        &self,
        func: crate::symbols::SymbolId,
        index: usize,
        name: &str,
        ty: &Type,
    ) -> String {
        match ty {
            Type::Named { fq } => match self.mode() {
                EmitMode::Cpp => {
                    if self.ir.constness.is_const(func, index) {
                        format!("const {}& {}", fq, name)
                    } else {
                        format!("{}& {}", fq, name)
                    }
                }
                EmitMode::C => format!("{} *{}", fq, name),
            },
            Type::Str { .. } => format!("const char *{}", name),
            Type::Array { elem, .. } => format!("{} {}[]", c_type(elem), name),
            other => format!("{} {}", c_type(other), name),
        }
    }

    fn emit_function(
        &mut self,
        out: &mut Formatter,
        func: &FuncDecl,
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        let fq = join(prefix, &func.name);
        let symbol = self
            .ir
            .table
            .lookup_fq(&fq)
            .ok_or_else(|| format!("function '{}' lost its symbol", fq))?;
        let params = symbol
            .signature
            .as_ref()
            .map(|s| s.params.clone())
            .unwrap_or_default();

        self.param_kinds.clear();
        for (name, ty) in &params {
            let kind = match (ty, self.mode()) {
                (Type::Named { .. }, EmitMode::C) => ParamKind::StructPtr,
                (Type::Named { .. }, EmitMode::Cpp) => ParamKind::StructRef,
                _ => ParamKind::Value,
            };
            self.param_kinds.insert(name.clone(), kind);
        }

        out.line(&self.signature(func, prefix)?);
        out.line("{");
        out.indent();
        self.emit_stmts(out, &func.body.stmts)?;
        out.dedent();
        out.line("}");
        out.blank();
        Ok(())
    }

    fn emit_stmts(&mut self, out: &mut Formatter, stmts: &[Stmt]) -> Result<(), CodeGenError> {
        for stmt in stmts {
            self.emit_stmt(out, stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, out: &mut Formatter, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::Block(block) => {
                out.line("{");
                out.indent();
                self.emit_stmts(out, &block.stmts)?;
                out.dedent();
                out.line("}");
            }
            Stmt::If { .. } => self.emit_if(out, stmt)?,
            Stmt::While { cond, body, .. } => {
                let cond_text = self.emit_expr_top(*cond)?;
                out.line(&format!("while ({}) {{", cond_text));
                out.indent();
                self.emit_stmts(out, &body.stmts)?;
                out.dedent();
                out.line("}");
            }
            Stmt::DoWhile { body, cond, .. } => {
                out.line("do {");
                out.indent();
                self.emit_stmts(out, &body.stmts)?;
                out.dedent();
                let cond_text = self.emit_expr_top(*cond)?;
                out.line(&format!("}} while ({});", cond_text));
            }
            Stmt::For { init, cond, step, body, .. } => {
                let init_text = self.emit_for_init(init)?;
                let cond_text = self.emit_expr_top(*cond)?;
                let step_text = self.emit_inline_expr(*step)?;
                out.line(&format!("for ({}; {}; {}) {{", init_text, cond_text, step_text));
                out.indent();
                self.emit_stmts(out, &body.stmts)?;
                out.dedent();
                out.line("}");
            }
            Stmt::Switch { scrutinee, cases, default, .. } => {
                let scrutinee_text = self.emit_expr_top(*scrutinee)?;
                out.line(&format!("switch ({}) {{", scrutinee_text));
                out.indent();
                for case in cases {
                    for (i, &value) in case.values.iter().enumerate() {
                        let value_text = self.emit_expr_top(value)?;
                        if i + 1 == case.values.len() {
                            out.line(&format!("case {}: {{", value_text));
                        } else {
                            out.line(&format!("case {}:", value_text));
                        }
                    }
                    out.indent();
                    self.emit_stmts(out, &case.body.stmts)?;
                    if !ends_with_return(&case.body.stmts) {
                        out.line("break;");
                    }
                    out.dedent();
                    out.line("}");
                }
                if let Some(default_block) = default {
                    out.line("default: {");
                    out.indent();
                    self.emit_stmts(out, &default_block.stmts)?;
                    if !ends_with_return(&default_block.stmts) {
                        out.line("break;");
                    }
                    out.dedent();
                    out.line("}");
                }
                out.dedent();
                out.line("}");
            }
            Stmt::Return { value, .. } => match value {
                Some(value) => {
                    let text = self.emit_expr_top(*value)?;
                    out.line(&format!("return {};", text));
                }
                None => out.line("return;"),
            },
            Stmt::Expr { expr, .. } => match self.arena().get(*expr).clone() {
                Expr::Assign { op, target, value } => {
                    self.emit_assign_stmt(out, *expr, op, target, value)?;
                }
                Expr::Call { .. } => {
                    let text = self.emit_expr_top(*expr)?;
                    out.line(&format!("{};", text));
                }
                _ => {
                    let text = self.emit_expr(*expr)?;
                    out.line(&format!("(void){};", text));
                }
            },
            Stmt::Var(var) => self.emit_local_var(out, var)?,
            Stmt::Atomic { body, .. } | Stmt::Critical { body, .. } => {
                self.emit_masked_section(out, |emitter, out| emitter.emit_stmts(out, &body.stmts))?;
            }
        }
        Ok(())
    }

    fn emit_if(&mut self, out: &mut Formatter, stmt: &Stmt) -> Result<(), CodeGenError> {
        let mut current = stmt;
        let mut first = true;
        loop {
            let Stmt::If { cond, then_block, else_branch, .. } = current else {
                // Trailing plain else block.
                if let Stmt::Block(block) = current {
                    out.line("} else {");
                    out.indent();
                    self.emit_stmts(out, &block.stmts)?;
                    out.dedent();
                    out.line("}");
                    return Ok(());
                }
                return Err(CodeGenError::Internal("malformed else chain".to_string()));
            };
            let cond_text = self.emit_expr_top(*cond)?;
            if first {
                out.line(&format!("if ({}) {{", cond_text));
                first = false;
            } else {
                out.line(&format!("}} else if ({}) {{", cond_text));
            }
            out.indent();
            self.emit_stmts(out, &then_block.stmts)?;
            out.dedent();
            match else_branch {
                Some(next) => current = next,
                None => {
                    out.line("}");
                    return Ok(());
                }
            }
        }
    }

    fn emit_local_var(&mut self, out: &mut Formatter, var: &VarDecl) -> Result<(), CodeGenError> {
        let ty = self.local_var_type(var);
        let decl = declarator(&var.name, &ty, self.array_size(&var.ty));

        if let Type::Str { capacity } = ty {
            match var.init {
                Some(init) if matches!(self.arena().get(init), Expr::StrLit(_)) => {
                    let text = self.emit_expr_top(init)?;
                    out.line(&format!("{} = {};", decl, text));
                }
                Some(init) => {
                    let value = self.emit_expr_top(init)?;
                    out.line(&format!("{} = \"\";", decl));
                    let copy = self.need_str_copy();
                    out.line(&format!("{}({}, {}U, {});", copy, var.name, capacity, value));
                }
                None => out.line(&format!("{} = \"\";", decl)),
            }
            return Ok(());
        }

        let init = match var.init {
            Some(init) => self.emit_expr_top(init)?,
            None => default_init(&ty).to_string(),
        };
        out.line(&format!("{} = {};", decl, init));
        Ok(())
    }

    fn local_var_type(&self, var: &VarDecl) -> Type {
        // Locals have no symbol-table entry; the checker recorded their
        // resolved declared type by declaration span.
        self.ir
            .analysis
            .local_types
            .get(&(self.root, var.span))
            .cloned()
            .unwrap_or_else(|| crate::symbols::lower_type_expr(&var.ty))
    }

    fn emit_for_init(&mut self, init: &Stmt) -> Result<String, CodeGenError> {
        match init {
            Stmt::Var(var) => {
                let ty = self.local_var_type(var);
                let decl = declarator(&var.name, &ty, self.array_size(&var.ty));
                let value = match var.init {
                    Some(init) => self.emit_expr_top(init)?,
                    None => default_init(&ty).to_string(),
                };
                Ok(format!("{} = {}", decl, value))
            }
            Stmt::Expr { expr, .. } => self.emit_inline_expr(*expr),
            _ => Err(CodeGenError::Internal("unsupported for-loop initializer".to_string())),
        }
    }

    /// Expression text usable inside a `for` header: plain expressions,
    /// or single-statement assignments.
    fn emit_inline_expr(&mut self, id: ExprId) -> Result<String, CodeGenError> {
        match self.arena().get(id).clone() {
            Expr::Assign { op, target, value } => {
                if let Expr::Path { .. } = self.arena().get(target) {
                    let place = self.place(target)?;
                    if place.atomic || place.access.is_some() || matches!(place.ty, Type::Str { .. })
                    {
                        return Err(CodeGenError::Internal(
                            "atomic, register, and string assignments need a statement position"
                                .to_string(),
                        ));
                    }
                }
                self.assign_text(id, op, target, value)
            }
            _ => self.emit_expr_top(id),
        }
    }

    fn emit_assign_stmt(
        &mut self,
        out: &mut Formatter,
        id: ExprId,
        op: AssignOp,
        target: ExprId,
        value: ExprId,
    ) -> Result<(), CodeGenError> {
        // Place-based targets may need multi-statement lowering.
        if let Expr::Path { .. } = self.arena().get(target) {
            let place = self.place(target)?.clone();

            match place.access {
                Some(Access::W1c) | Some(Access::W1s) => {
                    let PlaceBase::Symbol(sym) = place.base else {
                        return Err(CodeGenError::Internal("register place lost".to_string()));
                    };
                    let fq = self.ir.table.get(sym).fq_name.clone();
                    let mask = self.emit_expr_top(value)?;
                    out.line(&format!("{}_write({}, {});", fq, mask, mask));
                    return Ok(());
                }
                Some(Access::Wo) => {
                    let PlaceBase::Symbol(sym) = place.base else {
                        return Err(CodeGenError::Internal("register place lost".to_string()));
                    };
                    let fq = self.ir.table.get(sym).fq_name.clone();
                    let value_text = self.emit_expr_top(value)?;
                    out.line(&format!("{}_write({});", fq, value_text));
                    return Ok(());
                }
                _ => {}
            }

            if let Type::Str { capacity } = place.ty {
                let lvalue = self.emit_place_lvalue(&place)?;
                let value_text = self.emit_expr_top(value)?;
                let helper = match op {
                    AssignOp::Set => self.need_str_copy(),
                    AssignOp::Add => self.need_str_append(),
                    _ => {
                        return Err(CodeGenError::Internal(
                            "unsupported string assignment".to_string(),
                        ));
                    }
                };
                out.line(&format!("{}({}, {}U, {});", helper, lvalue, capacity, value_text));
                return Ok(());
            }

            if place.atomic && op != AssignOp::Set {
                return self.emit_atomic_rmw(out, id, &place, op, value);
            }
        }

        let text = self.assign_text(id, op, target, value)?;
        out.line(&format!("{};", text));
        Ok(())
    }

    /// Single-expression assignment text: `x = …`. Bitmap-field targets
    /// turn into read-modify-write through their setter.
    fn assign_text(
        &mut self,
        id: ExprId,
        op: AssignOp,
        target: ExprId,
        value: ExprId,
    ) -> Result<String, CodeGenError> {
        let (lvalue, bitmap_set) = if let Expr::Path { .. } = self.arena().get(target) {
            let place = self.place(target)?.clone();
            if let Some(PlaceStep::BitmapField { sym }) = place.steps.last() {
                let field = self.ir.table.get(*sym);
                let bitmap = self.ir.table.get(field.parent.expect("bitmap parent"));
                let setter = format!("{}_set_{}", bitmap.fq_name, field.name);
                let container = self.place_without_last(&place);
                let container_text = self.emit_place_lvalue(&container)?;
                (container_text, Some(setter))
            } else {
                (self.emit_place_lvalue(&place)?, None)
            }
        } else {
            (self.emit_expr_top(target)?, None)
        };

        let value_text = self.emit_expr_top(value)?;

        if let Some(setter) = bitmap_set {
            if op != AssignOp::Set {
                return Err(CodeGenError::Internal(
                    "compound assignment to bitmap field".to_string(),
                ));
            }
            return Ok(format!("{} = {}({}, {})", lvalue, setter, lvalue, value_text));
        }

        match op {
            AssignOp::Set => Ok(format!("{} = {}", lvalue, value_text)),
            _ => {
                let target_ty = self.ty(target);
                let rhs = self.compound_rhs(id, op, &target_ty, &lvalue, &value_text)?;
                Ok(format!("{} = {}", lvalue, rhs))
            }
        }
    }

    /// Right-hand side of a compound assignment applied to `current`.
    fn compound_rhs(
        &mut self,
        id: ExprId,
        op: AssignOp,
        target_ty: &Type,
        current: &str,
        value: &str,
    ) -> Result<String, CodeGenError> {
        let prim = target_ty
            .prim()
            .ok_or_else(|| format!("compound assignment to '{}'", target_ty.describe()))?;
        let text = match op {
            AssignOp::Add | AssignOp::Sub | AssignOp::Mul if prim.is_integer() => {
                let arith = match op {
                    AssignOp::Add => ArithOp::Add,
                    AssignOp::Sub => ArithOp::Sub,
                    _ => ArithOp::Mul,
                };
                let policy = self.policy(id);
                self.emit_policied_arith(prim, arith, policy, current, value)
            }
            AssignOp::Add => format!("({} + {})", current, value),
            AssignOp::Sub => format!("({} - {})", current, value),
            AssignOp::Mul => format!("({} * {})", current, value),
            AssignOp::Div => format!("({} / {})", current, value),
            AssignOp::Mod => format!("({} % {})", current, value),
            AssignOp::BitAnd => format!("({})({} & {})", c_prim(prim), current, value),
            AssignOp::BitOr => format!("({})({} | {})", c_prim(prim), current, value),
            AssignOp::BitXor => format!("({})({} ^ {})", c_prim(prim), current, value),
            AssignOp::Shl => format!("({})({} << {})", c_prim(prim), current, value),
            AssignOp::Shr => format!("({})({} >> {})", c_prim(prim), current, value),
            AssignOp::Set => unreachable!("plain assignment handled by caller"),
        };
        Ok(strip_one_paren(text))
    }

    /// Atomic read-modify-write on an `atomic` variable, lowered per the
    /// target profile.
    fn emit_atomic_rmw(
        &mut self,
        out: &mut Formatter,
        id: ExprId,
        place: &ResolvedPlace,
        op: AssignOp,
        value: ExprId,
    ) -> Result<(), CodeGenError> {
        let prim = place
            .ty
            .prim()
            .ok_or_else(|| "atomic target is not an integer".to_string())?;
        let lvalue = self.emit_place_lvalue(place)?;
        let value_text = self.emit_expr_top(value)?;

        match self.profile.strategy {
            AtomicStrategy::LdrexStrex => {
                let (ldrex, strex) = super::platform::ldrex_pair(prim);
                let prev = self.temp("prev");
                let next = self.compound_rhs(id, op, &place.ty, &prev, &value_text)?;
                out.line("{");
                out.indent();
                out.line(&format!("{} {};", c_prim(prim), prev));
                out.line("do {");
                out.indent();
                out.line(&format!("{} = {}(&{});", prev, ldrex, lvalue));
                out.dedent();
                out.line(&format!("}} while ({}({}, &{}) != 0U);", strex, next, lvalue));
                out.dedent();
                out.line("}");
                Ok(())
            }
            AtomicStrategy::PrimaskSection => self.emit_masked_section(out, |emitter, out| {
                let rhs = emitter.compound_rhs(id, op, &place.ty, &lvalue, &value_text)?;
                out.line(&format!("{} = {};", lvalue, rhs));
                Ok(())
            }),
        }
    }

    /// An interrupt-masked section: saves PRIMASK, disables interrupts,
    /// runs the body, and restores the saved state.
    pub(super) fn emit_masked_section<F>(
        &mut self,
        out: &mut Formatter,
        body: F,
    ) -> Result<(), CodeGenError>
    where
        F: FnOnce(&mut Self, &mut Formatter) -> Result<(), CodeGenError>,
    {
        let saved = self.temp("primask");
        out.line("{");
        out.indent();
        out.line(&format!("uint32_t {} = __get_PRIMASK();", saved));
        out.line("__disable_irq();");
        body(self, out)?;
        out.line(&format!("__set_PRIMASK({});", saved));
        out.dedent();
        out.line("}");
        Ok(())
    }
}

fn strip_one_paren(text: String) -> String {
    super::expr::strip_outer_parens(text)
}

fn ends_with_return(stmts: &[Stmt]) -> bool {
    matches!(stmts.last(), Some(Stmt::Return { .. }))
}

fn default_init(ty: &Type) -> &'static str {
    match ty {
        Type::Prim(p) if p.is_float() => {
            if *p == Prim::F32 {
                "0.0f"
            } else {
                "0.0"
            }
        }
        Type::Prim(Prim::Bool) => "false",
        Type::Prim(_) | Type::Bitmap { .. } => "0",
        Type::Str { .. } => "\"\"",
        Type::Named { .. } | Type::Array { .. } => "{0}",
        Type::Ptr(_) => "NULL",
        _ => "0",
    }
}
