//! End-to-end compilation tests
//!
//! Each case compiles a single top-level method the way the full
//! pipeline does (scan, parse, scope-resolve, emit) and checks the
//! disassembled bytecode. The traces are exact: branch operands encode
//! the patched distances and `method-end` carries the byte count, so
//! these tests pin down the emitter's layout as well as the visitor's
//! lowering decisions.

use micac::ast::{Node, Owner};
use micac::builder::Builder;
use micac::compiler::Compiler;
use micac::emitter::Emitter;
use micac::{CompileOptions, Zone};

fn compile(source: &str) -> String {
    let zone = Zone::new();
    let mut builder = Builder::new(&zone);
    let path = zone.alloc_str("<test>");
    let text = zone.alloc_str(source);
    let location = builder.source_mut().load_from_buffer(path, text);
    let unit = builder.build_unit(location).expect("parse");
    let library = builder.new_node(Node::Library {
        unit,
        parts: Vec::new(),
        scope: None,
    });

    let mut compiler = Compiler::new(builder, CompileOptions::new());
    let scope = compiler.scopes.new_scope(None);
    let Node::Library { scope: slot, .. } = compiler.builder.node_mut(library) else {
        unreachable!();
    };
    *slot = Some(scope);

    let Node::CompilationUnit { declarations } = compiler.builder.node(unit).clone() else {
        unreachable!();
    };
    let method = declarations[0];
    compiler.builder.method_mut(method).owner = Some(Owner::Library(library));
    let arity = compiler.builder.method(method).parameters.len();
    let mut emitter = Emitter::new(arity);
    compiler.compile_method(method, &mut emitter).expect("compile");
    mica_core::bytecode::trace(&emitter.into_code().bytes).expect("disassemble")
}

#[test]
fn block_structure() {
    assert_eq!(
        compile("foo() { var x; { var y; } }"),
        "load-literal-null; load-literal-null; pop; pop; \
         load-literal-null; return 1 0; method-end 8"
    );
}

#[test]
fn empty_nested_block() {
    assert_eq!(
        compile("main() { { } }"),
        "load-literal-null; return 1 0; method-end 4"
    );
}

#[test]
fn return_parameter() {
    assert_eq!(
        compile("foo(x) { return x; }"),
        "load-local 1; return 1 1; method-end 4"
    );
    assert_eq!(
        compile("foo(x,y) { return y; }"),
        "load-local 1; return 1 2; method-end 4"
    );
}

#[test]
fn return_literal() {
    assert_eq!(
        compile("foo() { return 42; }"),
        "load-literal 42; return 1 0; method-end 5"
    );
    assert_eq!(
        compile("foo() { return 1234; }"),
        "load-literal-wide 1234; return 1 0; method-end 8"
    );
    assert_eq!(
        compile("foo() { return 12345678; }"),
        "load-literal-wide 12345678; return 1 0; method-end 8"
    );
}

#[test]
fn pop_parameter() {
    assert_eq!(
        compile("foo(x) { x; }"),
        "load-local 1; pop; load-literal-null; return 1 1; method-end 6"
    );
}

#[test]
fn pop_dot() {
    assert_eq!(
        compile("foo(x) { x.y; }"),
        "load-local 1; invoke-method; pop; load-literal-null; return 1 1; method-end 11"
    );
}

#[test]
fn pop_invoke() {
    assert_eq!(
        compile("foo(x) { x.y(); }"),
        "load-local 1; invoke-method; pop; load-literal-null; return 1 1; method-end 11"
    );
    assert_eq!(
        compile("foo(x) { x.y(1); }"),
        "load-local 1; load-literal 1; invoke-method; pop; \
         load-literal-null; return 1 1; method-end 12"
    );
    assert_eq!(
        compile("foo(x) { x.y(1, 2); }"),
        "load-local 1; load-literal 1; load-literal 2; invoke-method; pop; \
         load-literal-null; return 1 1; method-end 14"
    );
}

#[test]
fn if_statement() {
    assert_eq!(
        compile("foo(x) { if (x) return 42; }"),
        "load-local 1; branch-if-false 10; load-literal 42; return 1 1; \
         load-literal-null; return 1 1; method-end 15"
    );
    assert_eq!(
        compile("foo(x) { if (x) return 42; else x.y(1); }"),
        "load-local 1; branch-if-false 15; load-literal 42; return 1 1; branch 13; \
         load-local 1; load-literal 1; invoke-method; pop; \
         load-literal-null; return 1 1; method-end 28"
    );
}

#[test]
fn while_statement() {
    assert_eq!(
        compile("foo(x) { while (x) 42; }"),
        "load-local 1; branch-if-false 10; load-literal 42; pop; branch-back 9; \
         load-literal-null; return 1 1; method-end 15"
    );
}

#[test]
fn do_while_statement() {
    assert_eq!(
        compile("foo(x) { do { 42; } while (x); }"),
        "load-literal 42; pop; load-local 1; branch-back-if-true 4; \
         load-literal-null; return 1 1; method-end 10"
    );
}

#[test]
fn binary_operators() {
    assert_eq!(
        compile("foo(x) { return 42 + 87; }"),
        "load-literal 42; load-literal 87; invoke-add; return 1 1; method-end 12"
    );
    assert_eq!(
        compile("foo(x) { return 1 * 2; }"),
        "load-literal 1; load-literal 2; invoke-mul; return 1 1; method-end 11"
    );
}

#[test]
fn equality_with_null_uses_identical() {
    assert_eq!(
        compile("foo(x) { return x == null; }"),
        "load-local 1; load-literal-null; identical; return 1 1; method-end 6"
    );
}

#[test]
fn variable_declarations() {
    assert_eq!(
        compile("foo() { var x = 87; x = 42; return x; }"),
        "load-literal 87; load-literal 42; store-local 1; pop; \
         load-local 0; return 2 0; pop; method-end 12"
    );
    assert_eq!(
        compile("foo() { var x, y; y = 42; }"),
        "load-literal-null; load-literal-null; load-literal 42; store-local 1; pop; \
         pop; pop; load-literal-null; return 1 0; method-end 13"
    );
}

#[test]
fn closure_captures_by_reference() {
    assert_eq!(
        compile("foo() { var x = 87; (){x;}; return x; }"),
        "load-literal 87; allocate-boxed; load-local 0; allocate @0; pop; \
         load-boxed 0; return 2 0; pop; method-end 16"
    );
}

#[test]
fn try_finally_uses_subroutines() {
    assert_eq!(
        compile("foo() { try { return; } finally { } }"),
        "load-literal-null; load-literal-null; store-local 1; pop; subroutine-call 42; \
         load-local 0; return 2 0; branch 15; subroutine-call 24; throw; \
         subroutine-call 14; branch 6; subroutine-return; pop; \
         load-literal-null; return 1 0; method-end 53"
    );
}

#[test]
fn try_finally_records_frame_ranges() {
    let zone = Zone::new();
    let mut builder = Builder::new(&zone);
    let path = zone.alloc_str("<test>");
    let text = zone.alloc_str("foo() { try { return; } finally { } }");
    let location = builder.source_mut().load_from_buffer(path, text);
    let unit = builder.build_unit(location).expect("parse");
    let library = builder.new_node(Node::Library {
        unit,
        parts: Vec::new(),
        scope: None,
    });
    let mut compiler = Compiler::new(builder, CompileOptions::new());
    let scope = compiler.scopes.new_scope(None);
    let Node::Library { scope: slot, .. } = compiler.builder.node_mut(library) else {
        unreachable!();
    };
    *slot = Some(scope);
    let Node::CompilationUnit { declarations } = compiler.builder.node(unit).clone() else {
        unreachable!();
    };
    let method = declarations[0];
    compiler.builder.method_mut(method).owner = Some(Owner::Library(library));
    let mut emitter = Emitter::new(0);
    compiler.compile_method(method, &mut emitter).expect("compile");
    let code = emitter.into_code();

    // The method-end trailer carries a non-empty try-range table.
    let mut at = 0;
    let mut ranges = 0;
    while at < code.bytes.len() {
        let opcode = mica_core::bytecode::Opcode::try_from(code.bytes[at]).unwrap();
        if opcode == mica_core::bytecode::Opcode::MethodEnd {
            ranges = i32::from_le_bytes(code.bytes[at + 5..at + 9].try_into().unwrap());
            break;
        }
        let (_, next) = mica_core::bytecode::disassemble_at(&code.bytes, at).unwrap();
        at = next;
    }
    assert!(ranges > 0);
}

#[test]
fn logical_operators_short_circuit() {
    let trace = compile("foo(x, y) { return x && y; }");
    assert!(trace.contains("branch-if-false"), "{trace}");
    let trace = compile("foo(x, y) { return x || y; }");
    assert!(trace.contains("branch-if-true"), "{trace}");
}

#[test]
fn conditional_expression() {
    let trace = compile("foo(x) { return x ? 1 : 2; }");
    assert!(trace.contains("branch-if-false"), "{trace}");
    assert!(trace.contains("load-literal 1"), "{trace}");
    assert!(trace.contains("load-literal 2"), "{trace}");
}

#[test]
fn compound_assignment_lowers_to_operator() {
    let trace = compile("foo() { var x = 1; x += 2; return x; }");
    assert!(trace.contains("invoke-add"), "{trace}");
    let trace = compile("foo() { var x = 4; x ~/= 2; return x; }");
    assert!(trace.contains("invoke-trunc-div"), "{trace}");
}

#[test]
fn increments_lower_to_add_one() {
    let trace = compile("foo() { var x = 1; x++; return x; }");
    assert!(trace.contains("load-literal 1; invoke-add"), "{trace}");
    let trace = compile("foo() { var x = 1; --x; return x; }");
    assert!(trace.contains("load-literal 1; invoke-sub"), "{trace}");
}

#[test]
fn unresolved_identifier_calls_helper() {
    // In a static context an undefined name compiles to an
    // `_unresolved(name)` call instead of failing.
    let trace = compile("foo() { bar(); }");
    assert!(trace.contains("load-const"), "{trace}");
    assert!(trace.contains("invoke-static"), "{trace}");
}

#[test]
fn string_interpolation_concatenates() {
    let trace = compile("foo(x) { return 'a$x b'; }");
    // toString on the expression, then two concatenations.
    let invokes = trace.matches("invoke-method").count();
    assert!(invokes >= 1, "{trace}");
    let adds = trace.matches("invoke-add").count();
    assert_eq!(adds, 2, "{trace}");
}

#[test]
fn switch_compiles_to_sequential_equality() {
    let trace = compile("foo(x) { switch (x) { case 1: break; case 2: break; } }");
    let compares = trace.matches("invoke-eq").count();
    assert_eq!(compares, 2, "{trace}");
}

#[test]
fn large_integer_literals_go_through_the_constant_pool() {
    let trace = compile("foo() { return 1073741824; }");
    assert!(trace.contains("load-const"), "{trace}");
}

#[test]
fn deterministic_compilation() {
    let source = "foo(x) { if (x) return 1; var y = x + 2; return y; }";
    assert_eq!(compile(source), compile(source));
}
