//! End-to-end compiles of the worked scenarios: full Sigma source text in,
//! an object file plus its textual assembly out. These check the pipeline
//! accepts/rejects each program and that the emitted artifacts look like
//! what that program should produce; they don't link or execute the
//! result, since driving an actual linker/executable isn't this crate's
//! concern to verify in a unit test.

use sigma_cli::{compile, CompileOptions, EmitKind};

fn compiles(src: &str) -> sigma_cli::CompileOutput {
    let opts = CompileOptions { emit: EmitKind::Object, ..Default::default() };
    compile(&opts, "t.s", src).unwrap_or_else(|e| panic!("expected {src:?} to compile, got {e}"))
}

#[test]
fn addition_returning_a_value() {
    let out = compiles("i32 main() { ret 100 + 200; }");
    assert!(!out.object.is_empty());
    assert!(out.asm.contains("main:"));
}

/// Two `f` overloads compete for both calls: a bare `5` costs nothing
/// against `i32` and widens at a cost against `i64`, so `f(5)` picks the
/// `i32` overload outright; `f(5u)` costs a sign-change cast against `i32`
/// but has no cast at all against `i64` (a width-and-sign mismatch is never
/// a legal implicit conversion), so `i32` wins there too and no call is
/// ambiguous. The first-declared overload keeps the bare mangled name, so
/// both calls should compile down to `call f`.
#[test]
fn overload_selection_with_implicit_widening() {
    let out = compiles(
        "i32 f(i32 x) { ret x; } \
         i64 f(i64 x) { ret x; } \
         i32 main() { i32 a = f(5); i32 b = f(5u); ret a + b; }",
    );
    assert!(!out.object.is_empty());
    assert_eq!(out.asm.matches("call f\n").count(), 2, "{}", out.asm);
    assert!(!out.asm.contains("call f_f0"));
}

#[test]
fn printf_via_external_call() {
    let out = compiles(
        "extern i32 print(char* fmt, ...); \
         i32 main() { print(\"hello %d\\n\", 42); ret 0; }",
    );
    assert!(!out.object.is_empty());
    assert!(out.asm.contains("call"));
}

#[test]
fn if_else_if_else_returning_from_all_paths() {
    let out = compiles(
        "i32 main() { \
           i32 x = 3; \
           if (x == 1) { ret 10; } else if (x == 3) { ret 30; } else { ret 99; } \
         }",
    );
    assert!(!out.object.is_empty());
}

#[test]
fn missing_return_path_is_rejected() {
    let opts = CompileOptions::default();
    let err = compile(&opts, "t.s", "i32 main() { i32 x = 3; if (x == 1) { ret 1; } }")
        .expect_err("a function with a non-void return type and a branch missing a return must be rejected");
    assert_eq!(err.code(), 4009);
}

#[test]
fn spill_under_register_pressure() {
    let mut src = String::from("i64 main() {\n");
    for i in 0..20 {
        src.push_str(&format!("  i64 t{i} = {i};\n"));
    }
    src.push_str("  ret ");
    for i in 0..20 {
        if i > 0 {
            src.push_str(" + ");
        }
        src.push_str(&format!("t{i}"));
    }
    src.push_str(";\n}\n");

    let out = compiles(&src);
    assert!(!out.object.is_empty());
}

#[test]
fn struct_field_access_and_assignment_compile() {
    let out = compiles(
        "struct Point { i32 x; i32 y; } \
         i32 main() { \
           Point p; \
           p.x = 3; \
           p.y = 4; \
           ret p.x + p.y; \
         }",
    );
    assert!(!out.object.is_empty());
}
