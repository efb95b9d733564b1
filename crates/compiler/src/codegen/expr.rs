//! Expression emission shared by the C and C++ back-ends.
//!
//! Composite subexpressions come out parenthesized; statement-level
//! callers strip the outermost pair. Arithmetic nodes consult their
//! inferred overflow policy: clamp lowers to a range-checking helper,
//! wrap to plain C with the narrowest-appropriate cast.

use super::error::CodeGenError;
use super::state::{ArithOp, Emitter, ParamKind};
use super::types::{c_prim, c_type, escape_char, escape_str, format_float, format_int};
use crate::ast::{Access, BinaryOp, Expr, ExprId, UnaryOp};
use crate::ir::EmitMode;
use crate::symbols::SymbolKind;
use crate::typechecker::{PlaceBase, PlaceStep, ResolvedPlace, size_of_type};
use crate::types::{OverflowPolicy, Prim, Type};

impl Emitter<'_> {
    /// Emit an expression; composites are parenthesized.
    pub(super) fn emit_expr(&mut self, id: ExprId) -> Result<String, CodeGenError> {
        let expr = self.arena().get(id).clone();
        match expr {
            Expr::IntLit { value, base, negated, .. } => {
                let prim = self.ty(id).prim().unwrap_or(Prim::I32);
                Ok(format_int(value, base, negated, prim))
            }
            Expr::FloatLit { value, .. } => {
                let prim = self.ty(id).prim().unwrap_or(Prim::F64);
                Ok(format_float(value, prim))
            }
            Expr::BoolLit(true) => Ok("true".to_string()),
            Expr::BoolLit(false) => Ok("false".to_string()),
            Expr::StrLit(text) => Ok(format!("\"{}\"", escape_str(&text))),
            Expr::CharLit(c) => Ok(format!("'{}'", escape_char(c))),
            Expr::Path { .. } => {
                let place = self.place(id)?.clone();
                self.emit_place_read(&place)
            }
            Expr::Call { callee, args } => self.emit_call(callee, &args),
            Expr::Index { base, index } => {
                let base_text = self.emit_expr(base)?;
                let index_text = self.emit_expr_top(index)?;
                Ok(format!("{}[{}]", base_text, index_text))
            }
            Expr::Unary { op, operand } => {
                let operand_text = self.emit_expr(operand)?;
                Ok(format!("({}{})", unary_symbol(op), operand_text))
            }
            Expr::Binary { op, lhs, rhs } => self.emit_binary(id, op, lhs, rhs),
            Expr::Cast { operand, .. } => {
                let target = self.ty(id);
                let operand_text = self.emit_expr(operand)?;
                Ok(format!("({}){}", c_type(&target), operand_text))
            }
            Expr::SizeOfType(ref ty_expr) => {
                let ty = crate::symbols::lower_type_expr(ty_expr);
                Ok(emit_sizeof(&ty))
            }
            Expr::SizeOfExpr(inner) => {
                let inner_ty = self.ty(inner);
                if let Some(size) = size_of_type(&inner_ty) {
                    Ok(format!("{}U", size))
                } else {
                    let text = self.emit_expr_top(inner)?;
                    Ok(format!("sizeof({})", text))
                }
            }
            Expr::Ternary { cond, then_expr, else_expr } => {
                let cond_text = self.emit_expr(cond)?;
                let then_text = self.emit_expr(then_expr)?;
                let else_text = self.emit_expr(else_expr)?;
                Ok(format!("({} ? {} : {})", cond_text, then_text, else_text))
            }
            Expr::Assign { .. } => Err(CodeGenError::Internal(
                "assignment reached expression emission".to_string(),
            )),
        }
    }

    /// Emit an expression without its outermost parentheses, for
    /// statement and condition positions.
    pub(super) fn emit_expr_top(&mut self, id: ExprId) -> Result<String, CodeGenError> {
        Ok(strip_outer_parens(self.emit_expr(id)?))
    }

    fn emit_binary(
        &mut self,
        id: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<String, CodeGenError> {
        let result_ty = self.ty(id);
        let lhs_text = self.emit_expr(lhs)?;
        let rhs_text = self.emit_expr(rhs)?;

        if let Some(arith) = arith_op(op) {
            if let Some(prim) = result_ty.prim().filter(|p| p.is_integer()) {
                let policy = self.policy(id);
                return Ok(self.emit_policied_arith(prim, arith, policy, &lhs_text, &rhs_text));
            }
        }
        match op {
            BinaryOp::Shl | BinaryOp::Shr => {
                if let Some(prim) = result_ty.prim().filter(|p| p.is_integer()) {
                    return Ok(format!(
                        "({})({} {} {})",
                        c_prim(prim),
                        lhs_text,
                        op.symbol(),
                        rhs_text
                    ));
                }
                Ok(format!("({} {} {})", lhs_text, op.symbol(), rhs_text))
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if let Some(prim) = result_ty.prim().filter(|p| p.is_integer() && p.bits() < 32) {
                    // Cast back after integer promotion.
                    return Ok(format!(
                        "({})({} {} {})",
                        c_prim(prim),
                        lhs_text,
                        op.symbol(),
                        rhs_text
                    ));
                }
                Ok(format!("({} {} {})", lhs_text, op.symbol(), rhs_text))
            }
            _ => Ok(format!("({} {} {})", lhs_text, op.symbol(), rhs_text)),
        }
    }

    /// Lower `a <op> b` under the inferred overflow policy.
    pub(super) fn emit_policied_arith(
        &mut self,
        prim: Prim,
        op: ArithOp,
        policy: OverflowPolicy,
        lhs: &str,
        rhs: &str,
    ) -> String {
        match policy {
            OverflowPolicy::Clamp => {
                let helper = self.need_arith_helper(prim, op, policy);
                format!("{}({}, {})", helper, lhs, rhs)
            }
            OverflowPolicy::Wrap if prim.is_signed() => {
                let helper = self.need_arith_helper(prim, op, policy);
                format!("{}({}, {})", helper, lhs, rhs)
            }
            OverflowPolicy::Wrap => {
                format!("({})({} {} {})", c_prim(prim), lhs, op.symbol(), rhs)
            }
        }
    }

    fn emit_call(&mut self, callee: ExprId, args: &[ExprId]) -> Result<String, CodeGenError> {
        let place = self.place(callee)?.clone();
        let PlaceBase::Symbol(sym_id) = place.base else {
            return Err(CodeGenError::Internal("call through non-symbol".to_string()));
        };
        let symbol = self.ir.table.get(sym_id);
        let name = symbol.fq_name.clone();
        let signature = symbol
            .signature
            .clone()
            .ok_or_else(|| "callee without signature".to_string())?;

        let mut pieces = Vec::with_capacity(args.len());
        for (index, &arg) in args.iter().enumerate() {
            let param_ty = signature.params.get(index).map(|(_, ty)| ty);
            pieces.push(self.emit_arg(arg, param_ty)?);
        }
        Ok(format!("{}({})", name, pieces.join(", ")))
    }

    /// Arguments of user-defined type pass by reference (C++) or by
    /// pointer (C); a parameter forwarded whole is already a pointer.
    fn emit_arg(&mut self, arg: ExprId, param_ty: Option<&Type>) -> Result<String, CodeGenError> {
        let is_user = param_ty.is_some_and(Type::is_user_defined);
        if !is_user || self.mode() == EmitMode::Cpp {
            return self.emit_expr_top(arg);
        }
        let place = self.place(arg)?.clone();
        if let PlaceBase::Local(name) = &place.base {
            if place.steps.is_empty()
                && self.param_kinds.get(name) == Some(&ParamKind::StructPtr)
            {
                return Ok(name.clone());
            }
        }
        let text = self.emit_place_lvalue(&place)?;
        Ok(format!("&{}", text))
    }

    /// Read text of a place: `ro` members read through their accessor,
    /// bitmap fields through their getter.
    pub(super) fn emit_place_read(&mut self, place: &ResolvedPlace) -> Result<String, CodeGenError> {
        if let Some(PlaceStep::BitmapField { sym }) = place.steps.last() {
            let field = self.ir.table.get(*sym);
            let container = self.place_without_last(place);
            let base_text = self.emit_place_lvalue(&container)?;
            let bitmap = self.ir.table.get(field.parent.expect("bitmap field parent"));
            return Ok(format!("{}_get_{}({})", bitmap.fq_name, field.name, base_text));
        }
        if place.access == Some(Access::Ro) {
            if let PlaceBase::Symbol(sym) = place.base {
                return Ok(format!("{}_read()", self.ir.table.get(sym).fq_name));
            }
        }
        self.emit_place_lvalue(place)
    }

    /// Raw lvalue text of a place, with the pointer/reference spelling of
    /// the current function's parameters applied.
    pub(super) fn emit_place_lvalue(&self, place: &ResolvedPlace) -> Result<String, CodeGenError> {
        let mut text;
        let mut first_sep = ".";
        match &place.base {
            PlaceBase::Local(name) => {
                match self.param_kinds.get(name) {
                    Some(ParamKind::StructPtr) if place.steps.is_empty() => {
                        return Ok(format!("(*{})", name));
                    }
                    Some(ParamKind::StructPtr) => {
                        text = name.clone();
                        first_sep = "->";
                    }
                    _ => text = name.clone(),
                }
            }
            PlaceBase::Symbol(sym) => {
                let symbol = self.ir.table.get(*sym);
                if symbol.kind == SymbolKind::RegisterMember && place.steps.is_empty() {
                    return Ok(symbol.fq_name.clone());
                }
                text = symbol.fq_name.clone();
            }
        }
        for (index, step) in place.steps.iter().enumerate() {
            match step {
                PlaceStep::Field { name } => {
                    let sep = if index == 0 { first_sep } else { "." };
                    text.push_str(sep);
                    text.push_str(name);
                }
                PlaceStep::BitmapField { .. } => {
                    return Err(CodeGenError::Internal(
                        "bitmap field in lvalue path".to_string(),
                    ));
                }
            }
        }
        Ok(text)
    }

    pub(super) fn place_without_last(&self, place: &ResolvedPlace) -> ResolvedPlace {
        let mut container = place.clone();
        container.steps.pop();
        container
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
        UnaryOp::Deref => "*",
        UnaryOp::AddrOf => "&",
    }
}

pub(super) fn arith_op(op: BinaryOp) -> Option<ArithOp> {
    Some(match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Sub => ArithOp::Sub,
        BinaryOp::Mul => ArithOp::Mul,
        _ => return None,
    })
}

fn emit_sizeof(ty: &Type) -> String {
    match size_of_type(ty) {
        // Strings and bitmaps have no direct C type to name; their sizes
        // fold to constants instead.
        Some(size) if matches!(ty, Type::Str { .. } | Type::Bitmap { .. } | Type::Array { .. }) => {
            format!("{}U", size)
        }
        _ => format!("sizeof({})", c_type(ty)),
    }
}

/// Remove one outer parenthesis pair when it wraps the whole expression.
pub(super) fn strip_outer_parens(text: String) -> String {
    if !text.starts_with('(') || !text.ends_with(')') {
        return text;
    }
    let inner = &text[1..text.len() - 1];
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return text;
                }
            }
            _ => {}
        }
    }
    inner.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_outer_parens() {
        assert_eq!(strip_outer_parens("(a + b)".to_string()), "a + b");
        assert_eq!(strip_outer_parens("(a) + (b)".to_string()), "(a) + (b)");
        assert_eq!(strip_outer_parens("f(x)".to_string()), "f(x)");
        assert_eq!(strip_outer_parens("x".to_string()), "x");
    }
}
