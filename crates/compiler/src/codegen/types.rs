//! C type spelling and literal formatting shared by both back-ends.

use crate::types::{Prim, Type};

/// The `<stdint.h>` spelling of a primitive.
pub fn c_prim(prim: Prim) -> &'static str {
    match prim {
        Prim::U8 => "uint8_t",
        Prim::U16 => "uint16_t",
        Prim::U32 => "uint32_t",
        Prim::U64 => "uint64_t",
        Prim::I8 => "int8_t",
        Prim::I16 => "int16_t",
        Prim::I32 => "int32_t",
        Prim::I64 => "int64_t",
        Prim::F32 => "float",
        Prim::F64 => "double",
        Prim::Bool => "bool",
        Prim::Void | Prim::Isr => "void",
    }
}

/// Base type spelling for value contexts; strings and arrays need a
/// declarator and go through `declarator` instead.
pub fn c_type(ty: &Type) -> String {
    match ty {
        Type::Prim(p) => c_prim(*p).to_string(),
        Type::Named { fq } => fq.clone(),
        Type::Bitmap { fq, .. } => fq.clone(),
        Type::Ptr(inner) => format!("{} *", c_type(inner)),
        Type::Str { .. } => "char".to_string(),
        Type::Array { elem, .. } => c_type(elem),
        Type::Ref { inner, is_const } => {
            if *is_const {
                format!("const {}&", c_type(inner))
            } else {
                format!("{}&", c_type(inner))
            }
        }
        Type::Unknown => "void".to_string(),
    }
}

/// Declarator for a variable or field: `uint32_t count`,
/// `char name[17]`, `uint8_t buf[64]`.
pub fn declarator(name: &str, ty: &Type, array_size: Option<u64>) -> String {
    match ty {
        Type::Str { capacity } => format!("char {}[{}]", name, capacity + 1),
        Type::Array { elem, size } => {
            let n = size.or(array_size);
            match n {
                Some(n) => format!("{} {}[{}]", c_type(elem), name, n),
                None => format!("{} {}[]", c_type(elem), name),
            }
        }
        other => format!("{} {}", c_type(other), name),
    }
}

/// `MIN`/`MAX` limit macro names for an integer type.
pub fn limit_macros(prim: Prim) -> (&'static str, &'static str) {
    match prim {
        Prim::U8 => ("0U", "UINT8_MAX"),
        Prim::U16 => ("0U", "UINT16_MAX"),
        Prim::U32 => ("0U", "UINT32_MAX"),
        Prim::U64 => ("0U", "UINT64_MAX"),
        Prim::I8 => ("INT8_MIN", "INT8_MAX"),
        Prim::I16 => ("INT16_MIN", "INT16_MAX"),
        Prim::I32 => ("INT32_MIN", "INT32_MAX"),
        Prim::I64 => ("INT64_MIN", "INT64_MAX"),
        _ => ("0", "0"),
    }
}

/// Integer literal suffix that keeps the constant in range on every
/// supported target (AVR has 16-bit `int`).
pub fn literal_suffix(prim: Prim) -> &'static str {
    match prim {
        Prim::U8 | Prim::U16 => "U",
        Prim::U32 => "UL",
        Prim::U64 => "ULL",
        Prim::I32 => "L",
        Prim::I64 => "LL",
        _ => "",
    }
}

/// Format an integer literal, preserving hex spelling. Binary and octal
/// source literals come out as hex; C99 has no binary literals and octal
/// invites misreading.
pub fn format_int(value: u128, base: u32, negated: bool, prim: Prim) -> String {
    let sign = if negated { "-" } else { "" };
    let digits = if base == 10 {
        format!("{}", value)
    } else {
        format!("0x{:X}", value)
    };
    format!("{}{}{}", sign, digits, literal_suffix(prim))
}

/// Format a float literal with the suffix its type requires.
pub fn format_float(value: f64, prim: Prim) -> String {
    let body = if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    };
    if prim == Prim::F32 {
        format!("{}f", body)
    } else {
        body
    }
}

/// Escape a string for a C string literal.
pub fn escape_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

/// Escape a char for a C character literal.
pub fn escape_char(c: char) -> String {
    match c {
        '\\' => "\\\\".to_string(),
        '\'' => "\\'".to_string(),
        '\n' => "\\n".to_string(),
        '\t' => "\\t".to_string(),
        '\r' => "\\r".to_string(),
        '\0' => "\\0".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prim_spelling() {
        assert_eq!(c_prim(Prim::U8), "uint8_t");
        assert_eq!(c_prim(Prim::I64), "int64_t");
        assert_eq!(c_prim(Prim::F32), "float");
        assert_eq!(c_prim(Prim::Isr), "void");
    }

    #[test]
    fn test_declarators() {
        assert_eq!(
            declarator("count", &Type::Prim(Prim::U32), None),
            "uint32_t count"
        );
        assert_eq!(
            declarator("name", &Type::Str { capacity: 16 }, None),
            "char name[17]"
        );
        let buf = Type::Array { elem: Box::new(Type::Prim(Prim::U8)), size: None };
        assert_eq!(declarator("buf", &buf, Some(64)), "uint8_t buf[64]");
    }

    #[test]
    fn test_int_formatting() {
        assert_eq!(format_int(255, 10, false, Prim::U8), "255U");
        assert_eq!(format_int(31, 16, false, Prim::U32), "0x1FUL");
        assert_eq!(format_int(10, 2, false, Prim::U16), "0xAU");
        assert_eq!(format_int(5, 10, true, Prim::I8), "-5");
        assert_eq!(format_int(7, 10, false, Prim::I64), "7LL");
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0, Prim::F32), "1.0f");
        assert_eq!(format_float(3.25, Prim::F64), "3.25");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(escape_str("a\"b\n"), "a\\\"b\\n");
        assert_eq!(escape_char('\n'), "\\n");
        assert_eq!(escape_char('x'), "x");
    }
}
