// End-to-end tests for the compiler + VM pipeline: each case lexes, parses,
// compiles, and runs a small program through the public `ruff` API and
// checks the final value `Vm::run` returns (programs end with a trailing
// `return EXPR;` when the scenario cares about a value, per the calling
// convention documented in errors.rs/compiler.rs — a bare top-level program
// otherwise returns `none`).

use ruff::compiler;
use ruff::errors::RuntimeError;
use ruff::lexer::tokenize;
use ruff::parser::parse;
use ruff::value::Value;
use ruff::vm::Vm;

fn run(src: &str) -> Value {
    let tokens = tokenize(src);
    let program = parse(tokens).unwrap_or_else(|e| panic!("parse error: {}", e));
    let chunk = compiler::compile(&program).unwrap_or_else(|e| panic!("compile error: {}", e));
    Vm::new().run(&chunk).unwrap_or_else(|e| panic!("runtime error: {}", e))
}

fn run_err(src: &str) -> RuntimeError {
    let tokens = tokenize(src);
    let program = parse(tokens).unwrap_or_else(|e| panic!("parse error: {}", e));
    let chunk = compiler::compile(&program).unwrap_or_else(|e| panic!("compile error: {}", e));
    match Vm::new().run(&chunk) {
        Err(e) => e,
        Ok(v) => panic!("expected runtime error, got {:?}", v),
    }
}

#[test]
fn arithmetic_and_precedence() {
    let result = run("let a = 2; let b = 3 * 4; return a + b;");
    assert_eq!(result, Value::Int(14));
}

#[test]
fn string_concatenation() {
    let result = run(r#"return "x" + "y";"#);
    assert_eq!(result, Value::str("xy"));
}

#[test]
fn division_always_yields_float() {
    let result = run("return 10 / 2;");
    assert_eq!(result, Value::Float(5.0));
}

#[test]
fn if_else_branches() {
    let result = run(
        r#"
        let x = 7;
        if x > 5 {
            return 1;
        } else {
            return 0;
        }
        "#,
    );
    assert_eq!(result, Value::Int(1));
}

#[test]
fn while_loop_accumulates() {
    let result = run(
        r#"
        let total = 0;
        let i = 0;
        while i < 5 {
            total = total + i;
            i = i + 1;
        }
        return total;
        "#,
    );
    assert_eq!(result, Value::Int(10));
}

#[test]
fn while_loop_break_stops_early() {
    let result = run(
        r#"
        let i = 0;
        while i < 10 {
            if i == 3 {
                break;
            }
            i = i + 1;
        }
        return i;
        "#,
    );
    assert_eq!(result, Value::Int(3));
}

#[test]
fn nested_block_scope_does_not_leak_outward() {
    let result = run(
        r#"
        let x = 1;
        {
            let x = 2;
        }
        return x;
        "#,
    );
    assert_eq!(result, Value::Int(1));
}

#[test]
fn for_in_range_sums() {
    let result = run(
        r#"
        let total = 0;
        for i in 1:5 {
            total = total + i;
        }
        return total;
        "#,
    );
    assert_eq!(result, Value::Int(10));
}

#[test]
fn for_in_list_respects_break_and_continue() {
    let result = run(
        r#"
        let seen = [];
        for x in [1, 2, 3, 4] {
            if x == 2 {
                continue;
            }
            if x == 4 {
                break;
            }
            seen = seen + [x];
        }
        return seen;
        "#,
    );
    assert_eq!(result, Value::list(vec![Value::Int(1), Value::Int(3)]));
}

#[test]
fn recursive_factorial() {
    let result = run(
        r#"
        fn factorial(n) {
            if n <= 1 {
                return 1;
            }
            return n * factorial(n - 1);
        }
        return factorial(5);
        "#,
    );
    assert_eq!(result, Value::Int(120));
}

#[test]
fn assigning_to_const_is_a_runtime_error() {
    let err = run_err("const x = 1; x = 2;");
    assert!(matches!(err, RuntimeError::AssignToConst { .. }));
}

#[test]
fn assigning_to_undefined_is_a_runtime_error() {
    let err = run_err("x = 2;");
    assert!(matches!(err, RuntimeError::AssignToUndefined { .. }));
}

#[test]
fn list_and_string_indexing() {
    let result = run(
        r#"
        let items = [1, 10, 3];
        let s = "abc";
        return [items[1], items.length, s[1]];
        "#,
    );
    assert_eq!(
        result,
        Value::list(vec![Value::Int(10), Value::Int(3), Value::str("b")])
    );
}

#[test]
fn logical_operators_do_not_short_circuit() {
    // Both operands are always evaluated; division by zero on the right-hand
    // side of `or` must still raise, even though the left side is truthy.
    let err = run_err("return true or (1 / 0 > 0);");
    assert!(matches!(err, RuntimeError::DivisionByZero { .. }));
}

#[test]
fn functions_shadow_with_locals_inside_their_own_body() {
    let result = run(
        r#"
        let x = 1;
        fn f(x) {
            return x + 1;
        }
        return f(41);
        "#,
    );
    assert_eq!(result, Value::Int(42));
}

#[test]
fn keyword_arguments_reach_native_functions() {
    let result = run("return range(start: 1, end: 4).start;");
    assert_eq!(result, Value::Int(1));
}

#[test]
fn calling_undefined_name_reports_undefined_variable() {
    let err = run_err("return nope();");
    assert!(matches!(err, RuntimeError::UndefinedVariable { .. }));
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    let err = run_err("fn f(a, b) { return a + b; } return f(1);");
    assert!(matches!(err, RuntimeError::WrongArity { .. }));
}

#[test]
fn fragment_mode_non_const_let_runs_without_underflow() {
    // compile_fragment is the one path that reaches the depth-0 DEF_GLOBAL-
    // twice quirk at runtime (the REPL); a bare instruction-count check can't
    // catch a stack-underflow crash the way actually running the chunk can.
    let mut vm = Vm::new();

    let declare_tokens = tokenize("let x = 1;");
    let declare_program = parse(declare_tokens).unwrap_or_else(|e| panic!("parse error: {}", e));
    let declare_chunk = compiler::compile_fragment(&declare_program)
        .unwrap_or_else(|e| panic!("compile error: {}", e));
    vm.run(&declare_chunk).unwrap_or_else(|e| panic!("runtime error: {}", e));

    let read_tokens = tokenize("return x;");
    let read_program = parse(read_tokens).unwrap_or_else(|e| panic!("parse error: {}", e));
    let read_chunk =
        compiler::compile_fragment(&read_program).unwrap_or_else(|e| panic!("compile error: {}", e));
    let result = vm.run(&read_chunk).unwrap_or_else(|e| panic!("runtime error: {}", e));

    assert_eq!(result, Value::Int(1));
}

#[test]
fn logical_or_is_a_value_pass_through_not_a_bool_coercion() {
    let result = run("let x = 0 or 5; return x;");
    assert_eq!(result, Value::Int(5));
}

#[test]
fn constant_pool_dedups_equal_literals_across_the_program() {
    let tokens = tokenize("let a = 5; let b = 5; return a + b;");
    let program = parse(tokens).expect("parse");
    let chunk = compiler::compile(&program).expect("compile");
    let fives = chunk.constants.iter().filter(|c| **c == Value::Int(5)).count();
    assert_eq!(fives, 1);
}
