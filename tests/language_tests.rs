#![cfg(feature = "parser")]
#![expect(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use maplit::hashmap;

use dust::builtins::Builtins;
use dust::checker::Checker;
use dust::compiler::Compiler;
use dust::parser::parse_program;
use dust::vm::VirtualMachine;
use dust::{BuiltinFn, Config, Error, Value, evaluate, evaluate_with_builtins};

/// Expected outcome of evaluating a whole program
#[derive(Debug)]
enum TestResult {
    Success(Value),              // Evaluation should succeed with this value
    SpecificError(&'static str), // Evaluation should fail with exactly this message
}
use TestResult::*;

fn success<T: Into<Value>>(value: T) -> TestResult {
    Success(value.into())
}

fn run_tests(test_cases: Vec<(&str, TestResult)>) {
    for (i, (source, expected)) in test_cases.into_iter().enumerate() {
        let test_id = format!("#{}", i + 1);
        match (evaluate(source), expected) {
            (Ok((actual, _)), Success(value)) => {
                assert_eq!(actual, value, "{test_id}: wrong value for {source}");
            }
            (Err(err), SpecificError(message)) => {
                assert_eq!(err.to_string(), message, "{test_id}: wrong error for {source}");
            }
            (Ok((actual, _)), SpecificError(message)) => {
                panic!("{test_id}: expected error '{message}' for {source}, got {actual}")
            }
            (Err(err), Success(value)) => {
                panic!("{test_id}: expected {value} for {source}, got error '{err}'")
            }
        }
    }
}

/// Run a program and hand back the machine for inspection
fn run_on_vm(source: &str, config: &Config) -> (Result<Value, Error>, VirtualMachine) {
    let mut program = parse_program(source).unwrap();
    Checker::new().type_program(&mut program).unwrap();
    let (instructions, _) = Compiler::new().compile_program(&program).unwrap();
    let mut vm = VirtualMachine::new(Builtins::default(), config).unwrap();
    let result = vm.run(&instructions);
    (result, vm)
}

#[test]
fn test_code_constructs() {
    run_tests(vec![
        ("1;", success(1)),
        ("2 + 3;", success(5)),
        ("1; 2; 3;", success(3)),
        ("let y = 4; { let x = y + 7; x * 2; }", success(22)),
        ("fn f() -> i32 { return 1; } f();", success(1)),
        ("fn f(x: i32) -> i32 { return x; } f(33);", success(33)),
        ("fn f(x: i32, y: i32) -> i32 { return x - y; } f(33, 22);", success(11)),
        (
            "fn fact(n: i32) -> i32 {
                 if (n == 1) { return 1; } else { return n * fact(n - 1); }
             }
             fact(10);",
            success(3628800),
        ),
        (
            "fn fact(n: i32) -> i32 { return fact_iter(n, 1, 1); }
             fn fact_iter(n: i32, i: i32, acc: i32) -> i32 {
                 if i > n { return acc; } else { return fact_iter(n, i + 1, acc * i); }
             }
             fact(4);",
            success(24),
        ),
        ("while (false) { 1; }", Success(Value::Undefined)),
        (
            "let mut x = 0; x = 1; while (x < 10) { 1; x = x + 1; } x;",
            success(10),
        ),
        (
            "let mut x = 0;
             let mut i = 0;
             while (i < 30) {
                 let mut j = 0;
                 while (j < 30) { x = x + i + j; j = j + 1; }
                 i = i + 1;
             }
             x;",
            success(26100),
        ),
        (
            "let x = 0; let mut i = 0; while (i < 1000) { let y = 1; i = i + 1; } i;",
            success(1000),
        ),
        ("let mut i = 0; while (i < 10) { i = i + 1; }", Success(Value::Undefined)),
        ("! false;", success(true)),
        ("1 == 1;", success(true)),
        ("fn f(x: i32) -> i32 { let y = 5; return x + y; } f(4);", success(9)),
        ("String::from(\"a\");", success("a")),
        (
            "fn best() -> String { return String::from(\"Rust\"); } best();",
            success("Rust"),
        ),
        ("fn f() -> i32 { return 1; } f;", success(Value::Closure)),
        ("display;", success(Value::Builtin)),
        ("I32_MAX + 0;", success(i32::MAX)),
        ("const LIMIT: i32 = 7; LIMIT * 6;", success(42)),
        ("-7 / 2;", success(-3)),
        ("-7 % 2;", success(-1)),
        ("1 < 2 && 2 < 1 || !(3 != 3);", success(true)),
        ("if 1 > 2 { 10; } else if 2 > 1 { 20; } else { 30; }", success(20)),
        ("let mut x = 1; let r = &mut x; *r = 5; x;", success(5)),
        ("fn bump(r: &mut i32) { *r = *r + 1; } let mut n = 1; bump(&mut n); bump(&mut n); n;", success(3)),
        ("fn read(r: &i32) -> i32 { return *r * 2; } let n = 21; read(&n);", success(42)),
        (
            "String::from(\"ab\") + String::from(\"cd\") == String::from(\"abcd\");",
            success(true),
        ),
    ]);
}

#[test]
fn test_ownership() {
    run_tests(vec![
        (
            "let x = String::from(\"abc\"); let y = x; x;",
            SpecificError("use of moved value x"),
        ),
        ("let x = String::from(\"abc\"); let y = x; y;", success("abc")),
        (
            "fn f(a: String) {} let x = String::from(\"abc\"); f(x); x;",
            SpecificError("use of moved value x"),
        ),
        (
            "fn f(a: String) -> String { return a; } let x = String::from(\"abc\"); let y = f(x); y;",
            success("abc"),
        ),
        (
            "let x = String::from(\"abc\"); { let y = x; } x;",
            SpecificError("use of moved value x"),
        ),
        (
            "fn g(b: String) -> String { let c = String::from(\"xyz\"); return c; }
             fn f(a: String) -> String { let b = g(a); return b; }
             let x = String::from(\"abc\");
             let y = f(x);
             y;",
            success("xyz"),
        ),
        (
            "let a = String::from(\"apple\");
             let b = String::from(\"banana\");
             if true { let c = a; if true { let d = b; } }
             b;",
            SpecificError("use of moved value b"),
        ),
        (
            "let mut a = String::from(\"apple\");
             if true { let b = a; a = String::from(\"orange\"); }
             a;",
            success("orange"),
        ),
        (
            "let a = String::from(\"apple\");
             let b = String::from(\"banana\");
             if false { let c = a; } else { let d = b; }
             a;",
            SpecificError("use of moved value a"),
        ),
        (
            "let s = String::from(\"abc\"); let mut i = 0; while i < 3 { let t = s; i = i + 1; }",
            SpecificError("use of moved value s"),
        ),
        (
            "let s = String::from(\"kept\"); let t = { let inner = s; inner }; t;",
            success("kept"),
        ),
        (
            "let s = String::from(\"abc\"); display(s); s;",
            success("abc"),
        ),
    ]);
}

#[test]
fn test_borrowing_and_lifetimes() {
    run_tests(vec![
        (
            "let mut x = 5; let y = &mut x; let z = &mut x;",
            SpecificError("cannot borrow `x` as mutable more than once at a time"),
        ),
        (
            "let mut y = 3; let mut r = &mut y; { let mut x = 5; r = &mut x; } *r;",
            SpecificError("unbound name: x"),
        ),
        (
            "let mut y = 3; let mut r = &mut y; { let mut x = 5; r = &mut x; }",
            success(5),
        ),
        (
            "let a = 1; a = 2;",
            SpecificError("cannot assign twice to immutable variable `a`"),
        ),
        (
            "let x: i32 = true;",
            SpecificError("type error in declaration; expected i32, found bool"),
        ),
    ]);
}

#[test]
fn test_runtime_and_parse_errors() {
    run_tests(vec![
        ("1 / 0;", SpecificError("attempt to divide by zero")),
        (
            "I32_MAX + 1;",
            SpecificError("attempt to compute `2147483647 + 1`, which would overflow"),
        ),
        (
            "let x = ;",
            SpecificError("parse error: unexpected token near 'let x = ;'"),
        ),
    ]);
}

#[test]
fn test_ownership_log() {
    let (value, log) = evaluate(
        "fn g(b: String) -> String { let c = String::from(\"xyz\"); return c; }
         fn f(a: String) -> String { let b = g(a); return b; }
         let x = String::from(\"abc\");
         let y = f(x);
         y;",
    )
    .unwrap();
    assert_eq!(value, Value::from("xyz"));
    assert_eq!(
        log.pairs(),
        vec![
            ("c", "g"),
            ("a", "g"),
            ("g", "b"),
            ("b", "f"),
            ("x", "f"),
            ("f", "y"),
        ]
    );
    assert!(log.to_json().unwrap().starts_with(r#"[{"from":"c","to":"g"}"#));

    let (_, log) = evaluate("let a = 1; let b = a; b;").unwrap();
    assert!(log.is_empty());
}

#[test]
fn test_determinism() {
    let source = "fn f(a: String) -> String { return a; }
                  let x = String::from(\"abc\");
                  let y = f(x);
                  let mut n = 0;
                  while n < 50 { n = n + 1; }
                  y;";
    let first = evaluate(source).unwrap();
    let second = evaluate(source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_tail_calls_run_in_constant_space() {
    let source = "fn count(n: i32) -> i32 {
                      if n == 0 { return 0; } else { return count(n - 1); }
                  }
                  count(100000);";
    let (result, vm) = run_on_vm(source, &Config::default());
    assert_eq!(result, Ok(Value::from(0)));
    assert!(
        vm.peak_rts_depth() < 10,
        "runtime stack grew to {}",
        vm.peak_rts_depth()
    );

    // the same recursion without a tail call keeps one frame per level
    let source = "fn depth(n: i32) -> i32 {
                      if n == 0 { return 0; } else { return 1 + depth(n - 1); }
                  }
                  depth(200);";
    let (result, vm) = run_on_vm(source, &Config::default());
    assert_eq!(result, Ok(Value::from(200)));
    assert!(vm.peak_rts_depth() > 200);
}

#[test]
fn test_owned_strings_are_freed_at_scope_exit() {
    let source = "{ let a = String::from(\"one\"); let b = String::from(\"two\"); }
                  fn take(s: String) {}
                  take(String::from(\"three\"));
                  let mut i = 0;
                  while i < 10 { let s = String::from(\"loop\"); i = i + 1; }
                  String::from(\"temporary\");
                  0;";
    let (result, vm) = run_on_vm(source, &Config::default());
    assert_eq!(result, Ok(Value::from(0)));
    assert_eq!(vm.heap().interned_count(), 0);

    // moved into the outer scope, so still alive at the end
    let source = "let s = String::from(\"kept\"); let t = { let inner = s; inner }; 0;";
    let (_, vm) = run_on_vm(source, &Config::default());
    assert_eq!(vm.heap().interned_count(), 1);

    // a block value that only one branch produces is freed on that branch
    for source in [
        "let c = true; if c { let s = String::from(\"leak\"); } else { 1; } 0;",
        "let c = false; if c { 1; } else { let s = String::from(\"leak\"); } 0;",
        "let c = true; if c { let s = String::from(\"leak\"); } 0;",
        "let c = false; if c { let s = String::from(\"leak\"); } 0;",
    ] {
        let (result, vm) = run_on_vm(source, &Config::default());
        assert_eq!(result, Ok(Value::from(0)), "{source}");
        assert_eq!(vm.heap().interned_count(), 0, "{source}");
    }
}

#[test]
fn test_values_handed_back_stay_alive() {
    run_tests(vec![
        (
            "let t = { let s = String::from(\"abc\"); display(s) }; t;",
            success("abc"),
        ),
        (
            "fn f() -> String { let s = String::from(\"abc\"); let t = display(s); return t; } f();",
            success("abc"),
        ),
        (
            "let t = { let s2 = String::from(\"x\"); let r = { s2 }; r }; t;",
            success("x"),
        ),
        (
            "fn f() -> String { let s = String::from(\"abc\"); return display(s); } f();",
            success("abc"),
        ),
        (
            "let s = String::from(\"abc\"); let t = display(s); s;",
            SpecificError("use of moved value s"),
        ),
        (
            "let s = String::from(\"abc\"); let t = { s }; s;",
            SpecificError("use of moved value s"),
        ),
    ]);

    // each string is freed exactly once, by whoever ends up owning it
    let source = "{ let t = { let s = String::from(\"abc\"); display(s) }; }
                  { let s2 = String::from(\"x\"); let r = { s2 }; }
                  0;";
    let (result, vm) = run_on_vm(source, &Config::default());
    assert_eq!(result, Ok(Value::from(0)));
    assert_eq!(vm.heap().interned_count(), 0);
}

#[test]
fn test_moving_a_borrowed_owner_is_rejected() {
    run_tests(vec![
        (
            "{ let s = String::from(\"a\"); let r = &s; { let t = s; } let z = String::from(\"zzz\"); display(r); }",
            SpecificError("cannot move out of `s` because it is borrowed"),
        ),
        (
            "fn take(s: String) {} let s = String::from(\"a\"); let r = &s; take(s);",
            SpecificError("cannot move out of `s` because it is borrowed"),
        ),
        (
            "let s = String::from(\"a\"); { let r = &s; display(r); } let t = s; t;",
            success("a"),
        ),
    ]);
}

#[test]
fn test_references_outlive_tail_position_calls() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let display: Arc<BuiltinFn> = Arc::new(move |args: &[Value]| {
        sink.lock().unwrap().extend(args.iter().cloned());
        Ok::<(), Error>(())
    });
    let builtins = hashmap! { "display".to_owned() => display };

    let source = "fn g(r: &String) -> i32 { display(r); return 1; }
                  fn f() -> i32 { let s = String::from(\"hi\"); return g(&s); }
                  f();";
    let (value, _) = evaluate_with_builtins(source, &builtins).unwrap();
    assert_eq!(value, Value::from(1));
    assert_eq!(*seen.lock().unwrap(), vec![Value::from("hi")]);

    let (result, vm) = run_on_vm(source, &Config::default());
    assert_eq!(result, Ok(Value::from(1)));
    assert_eq!(vm.heap().interned_count(), 0);
}

#[test]
fn test_equal_strings_share_one_node() {
    let source = "let a = String::from(\"same\");
                  let b = String::from(\"same\");
                  { let c = String::from(\"same\"); }
                  a == b;";
    let (result, vm) = run_on_vm(source, &Config::default());
    assert_eq!(result, Ok(Value::Bool(true)));
    assert_eq!(vm.heap().interned_count(), 1);
}

#[test]
fn test_heap_exhaustion() {
    let config = Config {
        heap_capacity: 64,
        ..Config::default()
    };
    let (result, _) = run_on_vm(
        "let mut i = 0; while i < 1000 { i = i + 1; } i;",
        &config,
    );
    assert_eq!(result, Err(Error::OutOfMemory));
    assert_eq!(Error::OutOfMemory.to_string(), "Ran out of memory");
}

#[test]
fn test_custom_display() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let display: Arc<BuiltinFn> = Arc::new(move |args: &[Value]| {
        sink.lock().unwrap().extend(args.iter().cloned());
        Ok::<(), Error>(())
    });
    let builtins = hashmap! {
        "display".to_owned() => display,
        "unknown".to_owned() => Arc::new(|_: &[Value]| Ok::<(), Error>(())) as Arc<BuiltinFn>,
    };

    let (value, _) = evaluate_with_builtins(
        "let s = String::from(\"hi\"); display(s); display(1 + 1); display(true);",
        &builtins,
    )
    .unwrap();
    assert_eq!(value, Value::Bool(true));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from("hi"), Value::from(2), Value::Bool(true)]
    );
}

#[test]
fn test_failing_display_aborts() {
    let display: Arc<BuiltinFn> = Arc::new(|_: &[Value]| {
        Err::<(), Error>(Error::Runtime("display unavailable".into()))
    });
    let builtins = hashmap! { "display".to_owned() => display };
    assert_eq!(
        evaluate_with_builtins("display(1); 2;", &builtins).map(|(value, _)| value),
        Err(Error::Runtime("display unavailable".into()))
    );
}
