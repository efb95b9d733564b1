//! Public header emission.
//!
//! The header carries the include guard, transitive includes, type
//! declarations, register member macros, `extern` variables, and
//! function prototypes. In C mode everything is wrapped in an
//! `extern "C"` bracket so the output links from C++ callers too.

use super::error::CodeGenError;
use super::registers::join;
use super::state::{Emitter, Formatter};
use super::types::{declarator, format_int};
use crate::ast::{Decl, EnumDecl, IncludeKind, StructDecl};
use crate::ir::EmitMode;
use crate::types::Type;

impl Emitter<'_> {
    pub(super) fn emit_header(&mut self, stem: &str) -> Result<String, CodeGenError> {
        let ir = self.ir;
        let root = &ir.unit.file(self.root).ast;
        let guard = guard_name(stem, self.mode());

        let mut out = Formatter::new();
        out.line(&format!("#ifndef {}", guard));
        out.line(&format!("#define {}", guard));
        out.blank();
        out.line("#include <stddef.h>");
        out.line("#include <stdint.h>");
        if self.mode() == EmitMode::C {
            out.line("#include <stdbool.h>");
        }
        for include in root.includes() {
            match include.kind() {
                IncludeKind::CNext => {
                    let stem = include
                        .path
                        .rsplit('/')
                        .next()
                        .unwrap_or(&include.path)
                        .trim_end_matches(".cnx");
                    out.line(&format!(
                        "#include \"{}.{}\"",
                        stem,
                        self.mode().header_extension()
                    ));
                }
                IncludeKind::NativeHeader => {
                    if include.angled {
                        out.line(&format!("#include <{}>", include.path));
                    } else {
                        out.line(&format!("#include \"{}\"", include.path));
                    }
                }
                IncludeKind::Unknown => {}
            }
        }
        out.blank();

        if self.mode() == EmitMode::C {
            out.line("#ifdef __cplusplus");
            out.line("extern \"C\" {");
            out.line("#endif");
            out.blank();
        }

        let decls = root.decls.clone();
        self.emit_header_decls(&mut out, &decls, "")?;

        if self.mode() == EmitMode::C {
            out.blank();
            out.line("#ifdef __cplusplus");
            out.line("}");
            out.line("#endif");
        }
        out.blank();
        out.line(&format!("#endif /* {} */", guard));
        Ok(out.finish())
    }

    fn emit_header_decls(
        &mut self,
        out: &mut Formatter,
        decls: &[Decl],
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        for decl in decls {
            match decl {
                Decl::Comment(_) | Decl::Include(_) => {}
                Decl::Scope(scope) => {
                    let fq = join(prefix, &scope.name);
                    self.emit_header_decls(out, &scope.decls, &fq)?;
                }
                Decl::Struct(s) => {
                    self.emit_struct_typedef(out, s, prefix)?;
                    out.blank();
                }
                Decl::Enum(e) => {
                    self.emit_enum_typedef(out, e, prefix);
                    out.blank();
                }
                Decl::Bitmap(bitmap) => {
                    self.emit_bitmap_typedef(out, bitmap, prefix);
                    out.blank();
                }
                Decl::Register(register) => {
                    self.emit_register_defines(out, register, prefix)?;
                    out.blank();
                }
                Decl::Const(c) => {
                    let fq = join(prefix, &c.name);
                    let symbol = self
                        .ir
                        .table
                        .lookup_fq(&fq)
                        .ok_or_else(|| format!("constant '{}' lost its symbol", fq))?;
                    let text = match (self.const_value(c.init), symbol.ty.prim()) {
                        (Some(value), Some(prim)) if prim.is_integer() => {
                            let negated = value < 0;
                            format_int(value.unsigned_abs(), 10, negated, prim)
                        }
                        _ => self.emit_expr(c.init)?,
                    };
                    out.line(&format!("#define {} ({})", fq, text));
                }
                Decl::Var(var) => {
                    let fq = join(prefix, &var.name);
                    let symbol = self
                        .ir
                        .table
                        .lookup_fq(&fq)
                        .ok_or_else(|| format!("variable '{}' lost its symbol", fq))?;
                    let qualifier = if var.atomic { "volatile " } else { "" };
                    let decl_text = declarator(&fq, &symbol.ty, self.array_size(&var.ty));
                    out.line(&format!("extern {}{};", qualifier, decl_text));
                }
                Decl::Func(func) => {
                    let text = self.signature(func, prefix)?;
                    out.line(&format!("{};", text));
                }
            }
        }
        Ok(())
    }

    fn emit_struct_typedef(
        &mut self,
        out: &mut Formatter,
        s: &StructDecl,
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        let fq = join(prefix, &s.name);
        out.line("typedef struct {");
        out.indent();
        for field in &s.fields {
            let field_fq = format!("{}_{}", fq, field.name);
            let ty = self
                .ir
                .table
                .lookup_fq(&field_fq)
                .map(|sym| sym.ty.clone())
                .unwrap_or(Type::Unknown);
            let decl = declarator(&field.name, &ty, self.array_size(&field.ty));
            out.line(&format!("{};", decl));
        }
        out.dedent();
        out.line(&format!("}} {};", fq));
        Ok(())
    }

    fn emit_enum_typedef(&mut self, out: &mut Formatter, e: &EnumDecl, prefix: &str) {
        let fq = join(prefix, &e.name);
        out.line("typedef enum {");
        out.indent();
        for (index, member) in e.members.iter().enumerate() {
            let comma = if index + 1 == e.members.len() { "" } else { "," };
            let name = format!("{}_{}", fq, member.name);
            match member.value.and_then(|v| self.const_value(v)) {
                Some(value) => out.line(&format!("{} = {}{}", name, value, comma)),
                None => out.line(&format!("{}{}", name, comma)),
            }
        }
        out.dedent();
        out.line(&format!("}} {};", fq));
    }
}

/// Include guard derived from the output filename: `Blinker.h` becomes
/// `BLINKER_H`.
pub(super) fn guard_name(stem: &str, mode: EmitMode) -> String {
    let mut guard = String::new();
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            guard.push(c.to_ascii_uppercase());
        } else {
            guard.push('_');
        }
    }
    guard.push('_');
    guard.push_str(&mode.header_extension().to_ascii_uppercase());
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_name() {
        assert_eq!(guard_name("Blinker", EmitMode::C), "BLINKER_H");
        assert_eq!(guard_name("serial-io", EmitMode::Cpp), "SERIAL_IO_HPP");
    }
}
