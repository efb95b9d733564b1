//! Code emission: IR to formatted C99 or C++14 text.
//!
//! Both back-ends share one formatter (4-space indent, 100-column wrap,
//! LF endings, no trailing whitespace) and differ only where the target
//! language forces them to: reference parameters, header extensions, and
//! the `extern "C"` bracket. Output is deterministic: helpers are
//! emitted from an ordered set and declarations in source order.
//!
//! # Module Structure
//!
//! - `state.rs`: emitter state, the formatter, helper-function emission
//! - `types.rs`: C type spelling and literal formatting
//! - `expr.rs`: expression emission, clamp/wrap lowering
//! - `statements.rs`: declarations, statements, atomic lowering
//! - `registers.rs`: register macros/accessors, bitmap typedefs
//! - `header.rs`: include guards, externs, prototypes
//! - `platform.rs`: target-specific intrinsic selection
//! - `error.rs`: error types

mod error;
mod expr;
mod header;
mod platform;
mod registers;
mod state;
mod statements;
mod types;

pub use error::CodeGenError;
pub use state::EmitOutput;

use crate::ast::Decl;
use crate::config::TargetProfile;
use crate::ir::Ir;
use state::{Emitter, Formatter};

/// Emit the root file of an analysed unit. `stem` is the output file
/// stem, used for the companion-header name and its include guard.
pub fn emit(ir: &Ir, profile: &TargetProfile, stem: &str) -> Result<EmitOutput, CodeGenError> {
    let mut emitter = Emitter::new(ir, profile)?;
    let root = ir.unit.root().expect("checked by Emitter::new");
    let decls = root.ast.decls.clone();

    let has_code = decls
        .iter()
        .any(|d| !matches!(d, Decl::Comment(_) | Decl::Include(_)));

    // A file with nothing but comments (or nothing at all) produces just
    // those comments; an empty file produces empty output.
    if !has_code {
        let mut out = Formatter::new();
        for decl in &decls {
            if let Decl::Comment(comment) = decl {
                out.line(&format!("//{}", comment.text));
            }
        }
        return Ok(EmitOutput {
            implementation: out.finish(),
            header: String::new(),
        });
    }

    let mut body = Formatter::new();
    emitter.emit_impl_decls(&mut body, &decls, "")?;

    // Helpers are known only after the body ran; assemble the file now.
    let mut implementation = Formatter::new();
    implementation.line(&format!(
        "#include \"{}.{}\"",
        stem,
        ir.mode.header_extension()
    ));
    if emitter.needs_string_h {
        implementation.line("#include <string.h>");
    }
    implementation.blank();
    emitter.emit_helpers(&mut implementation);
    implementation.append(body);

    let header = emitter.emit_header(stem)?;
    Ok(EmitOutput {
        implementation: implementation.finish(),
        header,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_infer;
    use crate::diagnostics::has_errors;
    use crate::ir::EmitMode;
    use crate::resolver::{MemoryFileLoader, Resolver};
    use crate::symbols::SymbolTable;
    use crate::typechecker::check_unit;
    use std::path::Path;

    fn build_ir(files: &[(&str, &str)], mode: EmitMode) -> Ir {
        let mut fs = MemoryFileLoader::new();
        for (path, source) in files {
            fs.insert(*path, *source);
        }
        let (unit, diags) = Resolver::new(&fs, vec![]).resolve(Path::new(files[0].0));
        assert!(!has_errors(&diags), "resolve: {:?}", diags);
        let pairs: Vec<_> = unit.files.iter().map(|f| (&f.ast, &f.symbols)).collect();
        let (table, diags) = SymbolTable::build(&pairs);
        assert!(!has_errors(&diags), "symbols: {:?}", diags);
        let (analysis, diags) = check_unit(&unit, &table);
        assert!(!has_errors(&diags), "check: {:?}", diags);
        let constness = const_infer::infer(&table, &analysis);
        Ir { unit, table, analysis, constness, mode }
    }

    fn emit_c(source: &str, target: &str) -> EmitOutput {
        let ir = build_ir(&[("/src/Main.cnx", source)], EmitMode::C);
        let profile = TargetProfile::lookup(target).unwrap();
        emit(&ir, &profile, "Main").unwrap()
    }

    fn emit_cpp(source: &str) -> EmitOutput {
        let ir = build_ir(&[("/src/Main.cnx", source)], EmitMode::Cpp);
        let profile = TargetProfile::host();
        emit(&ir, &profile, "Main").unwrap()
    }

    #[test]
    fn test_empty_file_empty_output() {
        let out = emit_c("", "host");
        assert_eq!(out.implementation, "");
        assert_eq!(out.header, "");
    }

    #[test]
    fn test_comment_only_file_preserves_comments() {
        let out = emit_c("// test-no-exec\n// plain note\n", "host");
        assert_eq!(out.implementation, "// test-no-exec\n// plain note\n");
        assert_eq!(out.header, "");
    }

    #[test]
    fn test_scope_mangling_in_output() {
        let out = emit_c(
            "scope Counter {\n    u32 count <- 0;\n    void increment() {\n        this.count +<- 1;\n    }\n}\n",
            "host",
        );
        assert!(out.implementation.contains("uint32_t Counter_count = 0UL;"));
        assert!(out.implementation.contains("void Counter_increment(void)"));
        assert!(out
            .implementation
            .contains("Counter_count = cnx_u32_add_clamp(Counter_count, 1UL);"));
        assert!(out.header.contains("extern uint32_t Counter_count;"));
        assert!(out.header.contains("void Counter_increment(void);"));
    }

    #[test]
    fn test_atomic_on_armv7m_uses_ldrex() {
        let out = emit_c(
            "atomic u32 counter <- 0;\nvoid inc() {\n    counter +<- 1;\n}\n",
            "teensy41",
        );
        assert!(out.implementation.contains("__LDREXW"));
        assert!(out.implementation.contains("__STREXW"));
        assert!(!out.implementation.contains("__get_PRIMASK"));
    }

    #[test]
    fn test_atomic_on_avr_uses_primask() {
        let out = emit_c(
            "atomic u32 counter <- 0;\nvoid inc() {\n    counter +<- 1;\n}\n",
            "avr",
        );
        assert!(out.implementation.contains("__get_PRIMASK"));
        assert!(out.implementation.contains("__set_PRIMASK"));
        assert!(!out.implementation.contains("__LDREX"));
    }

    #[test]
    fn test_atomic_narrow_width_uses_byte_exclusives() {
        let out = emit_c(
            "atomic u8 flags <- 0;\nvoid set() {\n    flags |<- 1;\n}\n",
            "teensy41",
        );
        // Bitwise compound on an atomic u8 goes through the byte pair.
        assert!(out.implementation.contains("__LDREXB"));
        assert!(out.implementation.contains("__STREXB"));
    }

    #[test]
    fn test_critical_block_masks_interrupts_on_any_target() {
        let out = emit_c(
            "u32 shared <- 0;\nvoid touch() {\n    critical {\n        shared <- 5;\n    }\n}\n",
            "teensy41",
        );
        assert!(out.implementation.contains("__get_PRIMASK"));
        assert!(out.implementation.contains("__disable_irq"));
        assert!(out.implementation.contains("__set_PRIMASK"));
    }

    #[test]
    fn test_wrap_emits_cast_not_helper() {
        let out = emit_c(
            "wrap u8 index <- 0;\nvoid step() {\n    index +<- 1;\n}\n",
            "host",
        );
        assert!(out.implementation.contains("index = (uint8_t)(index + 1U);"));
        assert!(!out.implementation.contains("cnx_u8_add_clamp"));
    }

    #[test]
    fn test_clamp_helper_emitted_once() {
        let out = emit_c(
            "u8 a <- 0;\nu8 b <- 0;\nvoid f() {\n    a +<- 1;\n    b +<- 2;\n}\n",
            "host",
        );
        let count = out.implementation.matches("static inline uint8_t cnx_u8_add_clamp").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_register_defines_and_accessors() {
        let out = emit_c(
            "register UART0 @ 0x40001000 {\n    rw u32 data;\n    ro u32 status;\n    w1c u32 flags;\n}\nvoid poll() {\n    u32 s <- UART0.status;\n    UART0.flags <- 0x04;\n    UART0.data <- 0xFF;\n}\n",
            "host",
        );
        assert!(out
            .header
            .contains("#define UART0_data (*(volatile uint32_t *)0x40001000UL)"));
        assert!(out
            .header
            .contains("#define UART0_status (*(volatile uint32_t *)0x40001004UL)"));
        assert!(out.implementation.contains("static inline uint32_t UART0_status_read(void)"));
        assert!(out.implementation.contains("uint32_t s = UART0_status_read();"));
        assert!(out.implementation.contains("UART0_flags_write(0x4UL, 0x4UL);"));
        // rw members read and write directly.
        assert!(out.implementation.contains("UART0_data = 0xFFUL;"));
    }

    #[test]
    fn test_no_wo_reads_or_ro_writes_in_output() {
        let out = emit_c(
            "register PORT @ 0x40002000 {\n    wo u32 out;\n    ro u32 in;\n}\nvoid io() {\n    PORT.out <- 1;\n    u32 v <- PORT.in;\n}\n",
            "host",
        );
        // Writes to wo go through the accessor; reads of ro likewise.
        assert!(out.implementation.contains("PORT_out_write(1UL);"));
        assert!(out.implementation.contains("PORT_in_read()"));
        assert!(!out.implementation.contains("= PORT_out"));
        assert!(!out.implementation.contains("PORT_in ="));
    }

    #[test]
    fn test_bitmap_typedef_comment_and_accessors() {
        let out = emit_c(
            "bitmap Flags : u8 {\n    ready : 1;\n    error : 1;\n    mode : 3;\n}\nFlags current;\nvoid update() {\n    current.mode <- 5;\n    u8 m <- current.mode;\n}\n",
            "host",
        );
        assert!(out.header.contains("typedef uint8_t Flags;"));
        assert!(out.header.contains("mode : bits 2-4 (3)"));
        assert!(out.implementation.contains("current = Flags_set_mode(current, 5U);"));
        assert!(out.implementation.contains("uint8_t m = Flags_get_mode(current);"));
    }

    #[test]
    fn test_cpp_const_reference_parameters() {
        let out = emit_cpp(
            "struct Config {\n    i32 value;\n}\nscope Storage {\n    i32 getValue(Config c) {\n        return c.value;\n    }\n    void loadDefaults(Config c) {\n        c.value <- 100;\n    }\n}\n",
        );
        assert!(out
            .implementation
            .contains("int32_t Storage_getValue(const Config& c)"));
        assert!(out
            .implementation
            .contains("void Storage_loadDefaults(Config& c)"));
    }

    #[test]
    fn test_c_mode_struct_params_are_pointers() {
        let out = emit_c(
            "struct Config {\n    i32 value;\n}\nscope Storage {\n    void loadDefaults(Config c) {\n        c.value <- 100;\n    }\n}\nvoid run() {\n    Config cfg;\n    Storage.loadDefaults(cfg);\n}\n",
            "host",
        );
        assert!(out
            .implementation
            .contains("void Storage_loadDefaults(Config *c)"));
        assert!(out.implementation.contains("c->value = 100L;"));
        assert!(out.implementation.contains("Storage_loadDefaults(&cfg);"));
    }

    #[test]
    fn test_header_guard_and_extern_c() {
        let out = emit_c("u8 x <- 0;\n", "host");
        assert!(out.header.starts_with("#ifndef MAIN_H\n#define MAIN_H\n"));
        assert!(out.header.contains("#ifdef __cplusplus"));
        assert!(out.header.contains("extern \"C\" {"));
        assert!(out.header.trim_end().ends_with("#endif /* MAIN_H */"));
    }

    #[test]
    fn test_cpp_header_has_no_extern_c() {
        let out = emit_cpp("u8 x <- 0;\n");
        assert!(!out.header.contains("extern \"C\""));
        assert!(out.header.contains("#ifndef MAIN_HPP"));
    }

    #[test]
    fn test_enum_emission_with_tags() {
        let out = emit_c("enum Color { RED, GREEN <- 5, BLUE }\n", "host");
        assert!(out.header.contains("Color_RED,"));
        assert!(out.header.contains("Color_GREEN = 5,"));
        assert!(out.header.contains("Color_BLUE"));
        assert!(out.header.contains("} Color;"));
    }

    #[test]
    fn test_switch_emission_brace_per_case() {
        let out = emit_c(
            "enum Color { RED, GREEN }\nvoid f(Color c) {\n    switch (c) {\n        case Color.RED {\n            return;\n        }\n        default {\n            return;\n        }\n    }\n}\n",
            "host",
        );
        assert!(out.implementation.contains("switch (c) {"));
        assert!(out.implementation.contains("case Color_RED: {"));
        assert!(out.implementation.contains("default: {"));
    }

    #[test]
    fn test_string_assignment_truncates_via_helper() {
        let out = emit_c(
            "string<8> name <- \"boot\";\nvoid rename() {\n    name <- \"runtime\";\n    name +<- \"!\";\n}\n",
            "host",
        );
        assert!(out.implementation.contains("char name[9] = \"boot\";"));
        assert!(out.implementation.contains("cnx_str_copy(name, 8U, \"runtime\");"));
        assert!(out.implementation.contains("cnx_str_append(name, 8U, \"!\");"));
        assert!(out.implementation.contains("#include <string.h>"));
    }

    #[test]
    fn test_directives_pass_through_in_order() {
        let out = emit_c(
            "// test-execution\nu8 x <- 0;\n// test-no-warnings\nu8 y <- 0;\n",
            "host",
        );
        let exec = out.implementation.find("// test-execution").unwrap();
        let x = out.implementation.find("uint8_t x").unwrap();
        let warn = out.implementation.find("// test-no-warnings").unwrap();
        let y = out.implementation.find("uint8_t y").unwrap();
        assert!(exec < x && x < warn && warn < y);
    }

    #[test]
    fn test_deterministic_output() {
        let source = "u8 a <- 0;\nu16 b <- 0;\nvoid f() {\n    a +<- 1;\n    b *<- 2;\n    a -<- 3;\n}\n";
        let first = emit_c(source, "teensy41");
        let second = emit_c(source, "teensy41");
        assert_eq!(first.implementation, second.implementation);
        assert_eq!(first.header, second.header);
    }

    #[test]
    fn test_no_goto_break_continue_from_user_code() {
        let out = emit_c(
            "void f(u8 x) {\n    while (x < 10) {\n        x +<- 1;\n    }\n    for (u8 i <- 0; i < 4; i +<- 1) {\n        x +<- 1;\n    }\n}\n",
            "host",
        );
        assert!(!out.implementation.contains("goto"));
        assert!(!out.implementation.contains("break"));
        assert!(!out.implementation.contains("continue"));
    }

    #[test]
    fn test_for_loop_emission() {
        let out = emit_c(
            "u32 total <- 0;\nvoid sum() {\n    for (u8 i <- 0; i < 10; i +<- 1) {\n        total +<- 1;\n    }\n}\n",
            "host",
        );
        assert!(out
            .implementation
            .contains("for (uint8_t i = 0U; i < 10U; i = cnx_u8_add_clamp(i, 1U)) {"));
    }

    #[test]
    fn test_signed_clamp_helper_has_both_bounds() {
        let out = emit_c(
            "i16 level <- 0;\nvoid adjust() {\n    level -<- 100;\n}\n",
            "host",
        );
        assert!(out.implementation.contains("cnx_i16_sub_clamp"));
        assert!(out.implementation.contains("INT16_MAX"));
        assert!(out.implementation.contains("INT16_MIN"));
    }

    #[test]
    fn test_const_becomes_define() {
        let out = emit_c("const u16 LIMIT <- 1000;\n", "host");
        assert!(out.header.contains("#define LIMIT (1000U)"));
    }

    #[test]
    fn test_native_include_passes_through_header() {
        let ir = build_ir(
            &[
                ("/src/Main.cnx", "#include <Arduino.h>\nu8 x <- 0;\n"),
            ],
            EmitMode::C,
        );
        let out = emit(&ir, &TargetProfile::host(), "Main").unwrap();
        assert!(out.header.contains("#include <Arduino.h>"));
    }

    #[test]
    fn test_cnx_include_becomes_companion_header() {
        let ir = build_ir(
            &[
                ("/src/Main.cnx", "#include \"Util.cnx\"\nvoid f() {\n    Util.helper();\n}\n"),
                ("/src/Util.cnx", "scope Util {\n    void helper() {\n    }\n}\n"),
            ],
            EmitMode::C,
        );
        let out = emit(&ir, &TargetProfile::host(), "Main").unwrap();
        assert!(out.header.contains("#include \"Util.h\""));
        // Only the root file's definitions are emitted here.
        assert!(!out.implementation.contains("void Util_helper(void)\n{"));
        assert!(out.implementation.contains("Util_helper();"));
    }

    #[test]
    fn test_output_hygiene_lf_no_trailing_whitespace_final_newline() {
        let out = emit_c(
            "scope Counter {\n    u32 count <- 0;\n    void increment() {\n        this.count +<- 1;\n    }\n}\n",
            "teensy41",
        );
        for text in [&out.implementation, &out.header] {
            assert!(text.ends_with('\n'));
            assert!(!text.contains('\r'));
            for line in text.lines() {
                assert_eq!(line, line.trim_end(), "trailing whitespace in: {:?}", line);
            }
        }
    }
}
