//! The two execution pipelines — tree-walking evaluator and
//! compile-then-VM — must produce the same final value (or fail with the
//! same error kind) and the same printed output for every program.

use brio_compiler::{parse_source, Compiler};
use brio_core::values::{values_equal, Value};
use brio_rt::eval::Evaluator;
use brio_rt::output::Output;
use brio_rt::vm::Vm;

struct Run {
    result: Result<Value, String>,
    output: Vec<String>,
}

fn run_eval(source: &str) -> Run {
    let program = parse_source(source).expect("parse");
    let out = Output::capture();
    let mut evaluator = Evaluator::with_output(out.clone());
    let env = Evaluator::global_env();
    let result = evaluator
        .eval_program(&program, &env)
        .map_err(|e| e.kind.clone());
    Run {
        result,
        output: out.lines(),
    }
}

fn run_vm(source: &str) -> Run {
    let program = parse_source(source).expect("parse");
    let bytecode = Compiler::new().compile(&program).expect("compile");
    let out = Output::capture();
    let mut vm = Vm::new(bytecode).with_output(out.clone());
    let result = vm.run().map_err(|e| e.kind.to_string());
    Run {
        result,
        output: out.lines(),
    }
}

/// Structural comparison: aliasing identity cannot hold across two
/// independent runs, so aggregates compare element-wise here.
fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| deep_eq(a, b))
        }
        (Value::Hash(x), Value::Hash(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && deep_eq(va, vb)
                })
        }
        (Value::Error(x), Value::Error(y)) => x.kind == y.kind && x.message == y.message,
        (Value::Function(_) | Value::Closure(_), Value::Function(_) | Value::Closure(_)) => true,
        (Value::Instance(x), Value::Instance(y)) => x.class.name == y.class.name,
        _ => values_equal(a, b),
    }
}

#[track_caller]
fn assert_parity(source: &str) {
    let eval = run_eval(source);
    let vm = run_vm(source);
    match (&eval.result, &vm.result) {
        (Ok(a), Ok(b)) => assert!(
            deep_eq(a, b),
            "value divergence for {:?}:\n  evaluator: {}\n  vm:        {}",
            source,
            a.inspect(),
            b.inspect()
        ),
        (Err(a), Err(b)) => assert_eq!(
            a, b,
            "error-kind divergence for {:?} (evaluator {:?}, vm {:?})",
            source, a, b
        ),
        (a, b) => panic!(
            "outcome divergence for {:?}:\n  evaluator: {:?}\n  vm:        {:?}",
            source, a, b
        ),
    }
    assert_eq!(
        eval.output, vm.output,
        "output divergence for {:?}",
        source
    );
}

#[test]
fn arithmetic_and_logic() {
    for source in [
        "(1 + 2) * 3 - 4 / 2",
        "7 % 3 + 2.5 * 2",
        "1 < 2 && 2 <= 2 && 3 > 2 && 3 >= 3",
        "!(1 == 2) == (1 != 2)",
        "-3.abs()",
        "false || \"fallback\"",
        "0 && \"zero is truthy\"",
        "\"n=\" + 42 + \"!\"",
        "1.5 + 2",
    ] {
        assert_parity(source);
    }
}

#[test]
fn variables_and_scoping() {
    for source in [
        "x = 1\ny = x + 2\nx = y\nx",
        "x = 1\nf = fn() { x = x + 10\nx }\nf()\nf()\nx",
        "outer = 1\nf = fn() { inner = 2\nouter + inner }\nf()",
        "if (true) { scoped = 9 }\nscoped",
    ] {
        assert_parity(source);
    }
}

#[test]
fn functions_and_closures() {
    for source in [
        "factorial = fn(n) { if (n <= 1) { 1 } else { n * factorial(n - 1) } }\nfactorial(6)",
        "newAdder = fn(x) { fn(y) { x + y } }\nnewAdder(2)(3)",
        "makeCounter = fn() { count = 0\nfn() { count = count + 1\ncount } }\nc = makeCounter()\nc()\nc()\nc()",
        "apply = fn(f, v) { f(v) }\napply(fn(x) { x * x }, 9)",
        "f = fn() { return 1\n2 }\nf()",
        "f = fn() { }\nf()",
        "fib = fn(n) { if (n < 2) { n } else { fib(n - 1) + fib(n - 2) } }\nfib(10)",
    ] {
        assert_parity(source);
    }
}

#[test]
fn control_flow() {
    for source in [
        "i = 0\nwhile (i < 10) { i = i + 1 }\ni",
        "total = 0\nfor (i = 0; i < 5; i = i + 1) { total = total + i }\ntotal",
        "total = 0\nfor (i = 0; i < 10; i = i + 1) { if (i == 3) { continue }\nif (i == 7) { break }\ntotal = total + i }\ntotal",
        "n = 0\nwhile (true) { n = n + 1\nif (n == 4) { break } }\nn",
        "if (null) { 1 } else { 2 }",
        "if (0) { \"zero\" } else { \"other\" }",
        "switch (3) { case 1, 2: \"low\"\ncase 3: \"three\"\ndefault: \"high\" }",
        "switch (\"x\") { case \"y\": 1 }",
        "x = 5\nswitch (x % 2) { case 0: \"even\"\ndefault: \"odd\" }",
    ] {
        assert_parity(source);
    }
}

#[test]
fn aggregates() {
    for source in [
        "[1, 2 + 3, \"x\"]",
        "a = [1, 2, 3]\na[1] = 9\na",
        "a = [1]\na.push(2).push(3)\na.length",
        "a = [1, 2, 3]\na.pop()\na",
        "[3, 1, 2].reverse()",
        "[1, 2, 3].slice(1, 3)",
        "[\"a\", \"b\"].join(\"-\")",
        "h = {\"a\": 1, \"b\": 2, \"c\": 3}\nh[\"d\"] = 4\nkeys(h)",
        "h = {\"a\": 1}\nh.set(\"b\", 2)\nvalues(h)",
        "h = {1: \"int\", 1.5: \"float\", true: \"bool\"}\nh[true]",
        "h = {\"k\": 1}\nh.delete(\"k\")\nh.empty",
        "len(\"hello\") + len([1]) + len({})",
        "[1][5]",
        "{\"a\": 1}[\"b\"]",
    ] {
        assert_parity(source);
    }
}

#[test]
fn strings_and_methods() {
    for source in [
        "\"Brio\".upper() + \"/\" + \"Brio\".lower()",
        "\"  pad  \".trim()",
        "\"a,b,c\".split(\",\")",
        "\"hello\".substring(1, 4)",
        "\"hello\".contains(\"ell\") && \"hello\".starts_with(\"he\") && \"hello\".ends_with(\"lo\")",
        "\"hello\"[1]",
        "\"a1b22\".replace(Regexp(\"[0-9]+\"), \"#\")",
        "\"a1b22\".match(Regexp(\"[0-9]+\"))",
        "\"abc\".matches?(\"b\")",
        "2.pow(10) + 9.sqrt()",
        "(-2.5).ceil()",
    ] {
        assert_parity(source);
    }
}

#[test]
fn exceptions() {
    for source in [
        "try { throw ValidationError(\"bad\") } catch (ValidationError e) { e.message }",
        "try { throw ValidationError(\"bad\") } catch (TypeError e) { \"t\" } catch (e) { e.kind }",
        "try { 1 / 0 } catch (arith e) { \"div\" }",
        "try { [1] + 2 } catch (type e) { e.kind }",
        "try { nope_nope } catch (name e) { \"nm\" }",
        "try { a = [1]\na[9] = 0 } catch (index e) { \"idx\" }",
        "try { throw \"plain\" } catch (user e) { e.payload }",
        "try { 42 } catch (e) { \"never\" }",
        "try { throw A(\"x\") } catch (B e) { 1 }",
        "1 / 0",
        "boom = fn() { throw Deep(\"d\") }\ntry { boom() } catch (Deep e) { e.message }",
        "f = fn(a) { a }\nf(1, 2)",
    ] {
        assert_parity(source);
    }
}

#[test]
fn finally_paths() {
    for source in [
        "log = []\ntry { log.push(1) } finally { log.push(2) }\nlog",
        "log = []\ntry { log.push(1)\nthrow E(\"x\") } catch (e) { log.push(2) } finally { log.push(3) }\nlog",
        "log = []\nf = fn() { try { return \"r\" } finally { log.push(\"fin\") } }\nf() + log.length",
        "log = []\ntry { try { throw E(\"x\") } finally { log.push(1) } } catch (e) { log.push(2) }\nlog",
        "log = []\ni = 0\nwhile (i < 3) { i = i + 1\ntry { if (i == 2) { break }\nlog.push(i) } finally { log.push(0) } }\nlog",
    ] {
        assert_parity(source);
    }
}

#[test]
fn classes_and_inheritance() {
    for source in [
        "class A { fn greet() { \"A\" } }\nclass B < A { fn greet() { super() + \"B\" } }\nB.new().greet()",
        "class Point { fn initialize(x, y) { @x = x\n@y = y }\nfn sum() { @x + @y } }\nPoint.new(3, 4).sum()",
        "class A { fn initialize(n) { @n = n }\nfn n() { @n } }\nclass B < A { }\nB.new(7).n()",
        "class C { fn set(v) { @v = v\nnull }\nfn get() { @v } }\nc = C.new()\nc.set(11)\nc.get()",
        "class A { }\ntry { A.new().nope() } catch (name e) { \"missing\" }",
        "class Shape { fn initialize(n) { @n = n }\nfn name() { @n } }\nclass Circle < Shape { fn initialize() { super(\"circle\") } }\nCircle.new().name()",
        "class A { fn f() { @x } }\nA.new().f()",
        "@oops",
    ] {
        assert_parity(source);
    }
}

#[test]
fn json_namespace() {
    for source in [
        "JSON.stringify({\"a\": 1, \"b\": [true, null, 1.5]})",
        "JSON.parse(\"[1, 2, 3]\")",
        "JSON.parse(JSON.stringify({\"n\": 42}))",
        "try { JSON.parse(\"{bad\") } catch (type e) { \"bad json\" }",
    ] {
        assert_parity(source);
    }
}

#[test]
fn printed_output_matches() {
    for source in [
        "print((1 + 2) * 3 - 4 / 2)",
        "print(\"a\", 1, true, null)",
        "print([1, \"x\"], {\"k\": 2.5})",
        "i = 0\nwhile (i < 3) { print(i)\ni = i + 1 }",
        "f = fn(n) { print(\"call\", n) }\nf(1)\nf(2)",
    ] {
        assert_parity(source);
    }
}

#[test]
fn program_final_value_shapes() {
    // Statements that yield no value leave null as the program result.
    for source in [
        "x = 1",
        "while (false) { }",
        "class A { }",
        "1\n2\n3",
        "if (true) { \"tail\" }",
    ] {
        assert_parity(source);
    }
}
