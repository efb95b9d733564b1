//! End-to-end scenarios through the public library API.

use cnextc::{TranspileOptions, transpile};
use std::path::Path;

fn transpile_ok(source: &str, options: &TranspileOptions) -> cnextc::EmitOutput {
    let (output, diagnostics) = transpile(source, Path::new("/virtual/Main.cnx"), options);
    assert!(
        !cnextc::has_errors(&diagnostics),
        "unexpected errors: {:?}",
        diagnostics
    );
    output.expect("emitted output")
}

fn cpp_options() -> TranspileOptions {
    TranspileOptions { force_cpp: true, ..TranspileOptions::default() }
}

#[test]
fn atomic_counter_on_armv7m_uses_exclusives() {
    let output = transpile_ok(
        "atomic u32 counter <- 0;\nvoid inc() {\n    counter +<- 1;\n}\n",
        &TranspileOptions { target: Some("teensy41".to_string()), ..TranspileOptions::default() },
    );
    assert!(output.implementation.contains("__LDREXW"));
    assert!(output.implementation.contains("__STREXW"));
    assert!(!output.implementation.contains("__get_PRIMASK"));
}

#[test]
fn atomic_counter_on_avr_masks_interrupts() {
    let output = transpile_ok(
        "atomic u32 counter <- 0;\nvoid inc() {\n    counter +<- 1;\n}\n",
        &TranspileOptions { target: Some("avr".to_string()), ..TranspileOptions::default() },
    );
    assert!(output.implementation.contains("__get_PRIMASK"));
    assert!(output.implementation.contains("__set_PRIMASK"));
    assert!(!output.implementation.contains("__LDREX"));
}

#[test]
fn transitive_mutation_disables_const_references() {
    let output = transpile_ok(
        "struct Config {\n    i32 value;\n}\nscope Storage {\n    void loadDefaults(Config c) {\n        c.value <- 100;\n    }\n}\nscope Handler {\n    void reset(Config c) {\n        Storage.loadDefaults(c);\n    }\n}\nscope Serial {\n    void handleReset(Config c) {\n        Handler.reset(c);\n    }\n}\n",
        &cpp_options(),
    );
    assert!(output.implementation.contains("void Serial_handleReset(Config& c)"));
    assert!(output.implementation.contains("void Handler_reset(Config& c)"));
    assert!(output.implementation.contains("void Storage_loadDefaults(Config& c)"));
    assert!(!output.implementation.contains("const Config&"));
}

#[test]
fn read_only_chain_keeps_const_references() {
    let output = transpile_ok(
        "struct Config {\n    i32 value;\n}\nscope Storage {\n    i32 getValue(Config c) {\n        return c.value;\n    }\n}\nscope Handler {\n    i32 read(Config c) {\n        return Storage.getValue(c);\n    }\n}\nscope Serial {\n    i32 fetch(Config c) {\n        return Handler.read(c);\n    }\n}\n",
        &cpp_options(),
    );
    for name in ["Storage_getValue", "Handler_read", "Serial_fetch"] {
        assert!(
            output
                .implementation
                .contains(&format!("int32_t {}(const Config& c)", name)),
            "{} lost its const reference:\n{}",
            name,
            output.implementation
        );
    }
}

#[test]
fn determinism_byte_identical_across_runs() {
    let source = "atomic u16 ticks <- 0;\nbitmap Status : u8 {\n    ready : 1;\n    mode : 3;\n}\nStatus current;\nvoid tick() {\n    ticks +<- 1;\n    current.mode <- 2;\n}\n";
    let options = TranspileOptions { target: Some("teensy41".to_string()), ..TranspileOptions::default() };
    let first = transpile_ok(source, &options);
    let second = transpile_ok(source, &options);
    assert_eq!(first.implementation, second.implementation);
    assert_eq!(first.header, second.header);
}

#[test]
fn emitted_bitmap_accessor_masks_are_distinct() {
    let fields: String = (0..8).map(|i| format!("    b{} : 1;\n", i)).collect();
    let source = format!("bitmap Wide : u8 {{\n{}}}\n", fields);
    let output = transpile_ok(&source, &TranspileOptions::default());
    // Each single-bit accessor shifts by its own offset.
    for i in 0..8 {
        assert!(
            output
                .implementation
                .contains(&format!("(value >> {}U) & 0x1U", i)),
            "missing accessor for bit {}:\n{}",
            i,
            output.implementation
        );
    }
}

#[test]
fn output_contains_no_unstructured_control_from_user_code() {
    let output = transpile_ok(
        "u32 total <- 0;\nvoid accumulate(u8 limit) {\n    u8 i <- 0;\n    while (i < limit) {\n        total +<- 1;\n        i +<- 1;\n    }\n    do {\n        total +<- 2;\n        i -<- 1;\n    } while (i > 0);\n}\n",
        &TranspileOptions::default(),
    );
    assert!(!output.implementation.contains("goto"));
    assert!(!output.implementation.contains("break"));
    assert!(!output.implementation.contains("continue"));
}
