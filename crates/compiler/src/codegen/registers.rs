//! Hardware register and bitmap emission.
//!
//! Register members become object-like macros over their absolute
//! addresses; members with non-trivial access modifiers additionally get
//! `static inline` accessors in the implementation file. Bitmaps become
//! a typedef of their backing integer with a field map comment and
//! mask/shift accessors.

use super::error::CodeGenError;
use super::state::{Emitter, Formatter};
use super::types::c_prim;
use crate::ast::{Access, BitmapDecl, RegisterDecl};
use crate::types::Prim;

impl Emitter<'_> {
    /// `#define UART0_data (*(volatile uint32_t *)0x40001000UL)` for
    /// every member, at its computed absolute address.
    pub(super) fn emit_register_defines(
        &self,
        out: &mut Formatter,
        register: &RegisterDecl,
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        let register_fq = join(prefix, &register.name);
        for member in &register.members {
            let fq = format!("{}_{}", register_fq, member.name);
            let symbol = self
                .ir
                .table
                .lookup_fq(&fq)
                .ok_or_else(|| format!("register member '{}' lost its symbol", fq))?;
            let prim = symbol.ty.prim().unwrap_or(Prim::U32);
            let address = symbol
                .address
                .ok_or_else(|| format!("register member '{}' has no address", fq))?;
            out.line(&format!(
                "#define {} (*(volatile {} *)0x{:08X}UL)",
                fq,
                c_prim(prim),
                address
            ));
        }
        Ok(())
    }

    /// Accessors for members whose access modifier is not plain `rw`.
    pub(super) fn emit_register_accessors(
        &self,
        out: &mut Formatter,
        register: &RegisterDecl,
        prefix: &str,
    ) -> Result<(), CodeGenError> {
        let register_fq = join(prefix, &register.name);
        for member in &register.members {
            if member.access == Access::Rw {
                continue;
            }
            let fq = format!("{}_{}", register_fq, member.name);
            let symbol = self
                .ir
                .table
                .lookup_fq(&fq)
                .ok_or_else(|| format!("register member '{}' lost its symbol", fq))?;
            let ty = c_prim(symbol.ty.prim().unwrap_or(Prim::U32));
            match member.access {
                Access::Ro => {
                    out.line(&format!("static inline {} {}_read(void)", ty, fq));
                    out.line("{");
                    out.indent();
                    out.line(&format!("return {};", fq));
                    out.dedent();
                    out.line("}");
                }
                Access::Wo => {
                    out.line(&format!("static inline void {}_write({} value)", fq, ty));
                    out.line("{");
                    out.indent();
                    out.line(&format!("{} = value;", fq));
                    out.dedent();
                    out.line("}");
                }
                Access::W1c => {
                    out.line(&format!(
                        "static inline void {}_write({} mask, {} value)",
                        fq, ty, ty
                    ));
                    out.line("{");
                    out.indent();
                    out.line(&format!("{} = ({} & ~mask) | (mask & value);", fq, fq));
                    out.dedent();
                    out.line("}");
                }
                Access::W1s => {
                    out.line(&format!(
                        "static inline void {}_write({} mask, {} value)",
                        fq, ty, ty
                    ));
                    out.line("{");
                    out.indent();
                    out.line(&format!("{} |= (mask & value);", fq));
                    out.dedent();
                    out.line("}");
                }
                Access::Rw => unreachable!(),
            }
            out.blank();
        }
        Ok(())
    }

    /// The bitmap typedef and its field-map comment.
    pub(super) fn emit_bitmap_typedef(
        &self,
        out: &mut Formatter,
        bitmap: &BitmapDecl,
        prefix: &str,
    ) {
        let fq = join(prefix, &bitmap.name);
        out.line(&format!(
            "/* Bitmap {} (backing {})",
            fq,
            c_prim(bitmap.backing)
        ));
        let mut offset = 0u32;
        for field in &bitmap.fields {
            let end = offset + field.width - 1;
            out.line(&format!(
                " *   {} : bits {}-{} ({})",
                field.name, offset, end, field.width
            ));
            offset += field.width;
        }
        out.line(" */");
        out.line(&format!("typedef {} {};", c_prim(bitmap.backing), fq));
    }

    /// Mask-and-shift accessors for every bitmap field.
    pub(super) fn emit_bitmap_accessors(
        &self,
        out: &mut Formatter,
        bitmap: &BitmapDecl,
        prefix: &str,
    ) {
        let fq = join(prefix, &bitmap.name);
        let backing = c_prim(bitmap.backing);
        let mut offset = 0u32;
        for field in &bitmap.fields {
            let mask = (1u128 << field.width) - 1;
            let mask_text = format!("0x{:X}{}", mask, super::types::literal_suffix(bitmap.backing));
            out.line(&format!(
                "static inline {} {}_get_{}({} value)",
                backing, fq, field.name, fq
            ));
            out.line("{");
            out.indent();
            out.line(&format!(
                "return ({})((value >> {}U) & {});",
                backing, offset, mask_text
            ));
            out.dedent();
            out.line("}");
            out.blank();
            out.line(&format!(
                "static inline {} {}_set_{}({} value, {} field)",
                fq, fq, field.name, fq, backing
            ));
            out.line("{");
            out.indent();
            out.line(&format!(
                "return ({})((value & ({})~({} << {}U)) | ((field & {}) << {}U));",
                fq, fq, mask_text, offset, mask_text, offset
            ));
            out.dedent();
            out.line("}");
            out.blank();
            offset += field.width;
        }
    }
}

pub(super) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", prefix, name)
    }
}
