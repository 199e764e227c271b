//! End-to-end scenarios over both pipelines, plus module-system behavior
//! that needs real files.

use brio_compiler::{parse_source, Compiler};
use brio_core::values::{values_equal, Value};
use brio_rt::eval::Evaluator;
use brio_rt::modules::{Resolver, ResolverLoader};
use brio_rt::output::Output;
use brio_rt::vm::Vm;
use std::path::Path;
use std::rc::Rc;

fn eval_with_output(source: &str) -> (Value, Vec<String>) {
    let program = parse_source(source).expect("parse");
    let out = Output::capture();
    let mut evaluator = Evaluator::with_output(out.clone());
    let env = Evaluator::global_env();
    let value = evaluator
        .eval_program(&program, &env)
        .unwrap_or_else(|e| panic!("evaluator error: {}: {}", e.kind, e.message));
    (value, out.lines())
}

fn vm_with_output(source: &str) -> (Value, Vec<String>) {
    let program = parse_source(source).expect("parse");
    let bytecode = Compiler::new().compile(&program).expect("compile");
    let out = Output::capture();
    let mut vm = Vm::new(bytecode).with_output(out.clone());
    let value = vm.run().unwrap_or_else(|e| panic!("vm error: {}", e));
    (value, out.lines())
}

#[track_caller]
fn both(source: &str) -> [(Value, Vec<String>); 2] {
    [eval_with_output(source), vm_with_output(source)]
}

#[test]
fn s1_arithmetic_precedence() {
    for (_, lines) in both("print((1 + 2) * 3 - 4 / 2)") {
        assert_eq!(lines, vec!["7"]);
    }
}

#[test]
fn s2_closures_and_recursion() {
    let source =
        "factorial = fn(n) { if (n <= 1) { 1 } else { n * factorial(n - 1) } }\nfactorial(5)";
    for (value, _) in both(source) {
        assert!(values_equal(&value, &Value::Int(120)));
    }
}

#[test]
fn s3_closure_adder() {
    let source = "newAdder = fn(x) { fn(y) { x + y } }\naddTwo = newAdder(2)\naddTwo(3)";
    for (value, _) in both(source) {
        assert!(values_equal(&value, &Value::Int(5)));
    }
}

#[test]
fn s4_hash_insertion_order() {
    let source = "h = {\"a\": 1, \"b\": 2, \"c\": 3}\nh[\"d\"] = 4\nkeys(h).join(\",\")";
    for (value, _) in both(source) {
        assert!(values_equal(&value, &Value::str("a,b,c,d")));
    }
}

#[test]
fn s5_exception_kinds_and_finally() {
    let source = "result = null\ntry { throw ValidationError(\"bad\") } catch (TypeError e) { result = \"t\" } catch (ValidationError e) { result = e.message\nprint(result) } finally { print(\"done\") }\nresult";
    for (value, lines) in both(source) {
        assert!(values_equal(&value, &Value::str("bad")));
        assert_eq!(lines, vec!["bad", "done"]);
    }
}

#[test]
fn s6_inheritance_and_super() {
    let source = "class A { fn greet() { \"A\" } }\nclass B < A { fn greet() { super() + \"B\" } }\nB.new().greet()";
    for (value, _) in both(source) {
        assert!(values_equal(&value, &Value::str("AB")));
    }
}

#[test]
fn hash_length_invariants() {
    let source = "h = {\"a\": 1, \"b\": 2}\nh[\"c\"] = 3\nlen(keys(h)) == len(values(h)) && len(keys(h)) == h.size";
    for (value, _) in both(source) {
        assert!(matches!(value, Value::Bool(true)));
    }
}

#[test]
fn array_cell_aliasing() {
    let source = "a = [1, 2]\nb = a\nb[0] = 9\na[0] == 9 && a == b";
    for (value, _) in both(source) {
        assert!(matches!(value, Value::Bool(true)));
    }
}

#[test]
fn aggregate_equality_is_identity() {
    let source = "[1] == [1]";
    for (value, _) in both(source) {
        assert!(matches!(value, Value::Bool(false)));
    }
    let source = "h = {}\ng = h\nh == g";
    for (value, _) in both(source) {
        assert!(matches!(value, Value::Bool(true)));
    }
}

#[test]
fn function_as_hash_key_is_type_error() {
    let source = "try { h = {fn() { 1 }: 2} } catch (type e) { \"unhashable\" }";
    for (value, _) in both(source) {
        assert!(values_equal(&value, &Value::str("unhashable")));
    }
}

#[test]
fn json_round_trip() {
    let source = "x = {\"n\": 1, \"xs\": [1.5, \"two\", true, null]}\nJSON.stringify(JSON.parse(JSON.stringify(x))) == JSON.stringify(x)";
    for (value, _) in both(source) {
        assert!(matches!(value, Value::Bool(true)));
    }
}

// ── Modules ──

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn eval_in_dir(dir: &Path, source: &str) -> Result<Value, String> {
    let program = parse_source(source).expect("parse");
    let out = Output::capture();
    let resolver = Resolver::new(dir.join("std"), out.clone());
    let mut evaluator = Evaluator::with_resolver(resolver, dir.to_path_buf(), out);
    let env = Evaluator::global_env();
    evaluator
        .eval_program(&program, &env)
        .map_err(|e| format!("{}: {}", e.kind, e.message))
}

fn vm_in_dir(dir: &Path, source: &str) -> Result<Value, String> {
    let program = parse_source(source).expect("parse");
    let out = Output::capture();
    let resolver = Resolver::new(dir.join("std"), out.clone());
    let loader = ResolverLoader {
        resolver: Rc::clone(&resolver),
        base: dir.to_path_buf(),
    };
    let bytecode = Compiler::with_loader(&loader)
        .compile(&program)
        .map_err(|e| e.to_string())?;
    let delegate = Evaluator::with_resolver(resolver, dir.to_path_buf(), out.clone());
    let mut vm = Vm::new(bytecode).with_output(out).with_delegate(delegate);
    vm.run().map_err(|e| e.to_string())
}

#[test]
fn imports_bind_exports_in_both_modes() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "math.brio",
        "export double = fn(n) { n * 2 }\nexport base = 10",
    );
    let source = "import { double, base as b } from \"./math\"\ndouble(b) + 1";
    let value = eval_in_dir(dir.path(), source).unwrap();
    assert!(values_equal(&value, &Value::Int(21)));
    let value = vm_in_dir(dir.path(), source).unwrap();
    assert!(values_equal(&value, &Value::Int(21)));
}

#[test]
fn imported_closures_keep_their_module_state() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "counter.brio",
        "count = 0\nexport bump = fn() { count = count + 1\ncount }",
    );
    let source = "import { bump } from \"./counter\"\nbump()\nbump()\nbump()";
    for value in [
        eval_in_dir(dir.path(), source).unwrap(),
        vm_in_dir(dir.path(), source).unwrap(),
    ] {
        assert!(values_equal(&value, &Value::Int(3)));
    }
}

#[test]
fn module_cache_shares_state_between_importers() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "store.brio",
        "items = []\nexport add = fn(x) { items.push(x)\nitems.length }",
    );
    write(
        dir.path(),
        "a.brio",
        "import { add } from \"./store\"\nexport add_a = fn() { add(\"a\") }",
    );
    write(
        dir.path(),
        "b.brio",
        "import { add } from \"./store\"\nexport add_b = fn() { add(\"b\") }",
    );
    // Both importers see one shared module instance, so the second add
    // observes the first one's item.
    let source = "import { add_a } from \"./a\"\nimport { add_b } from \"./b\"\nadd_a()\nadd_b()";
    let value = eval_in_dir(dir.path(), source).unwrap();
    assert!(values_equal(&value, &Value::Int(2)));
}

#[test]
fn import_cycles_error_in_both_modes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.brio", "import { y } from \"./y\"\nexport x = 1");
    write(dir.path(), "y.brio", "import { x } from \"./x\"\nexport y = 2");
    let source = "import { x } from \"./x\"";
    let err = eval_in_dir(dir.path(), source).unwrap_err();
    assert!(err.contains("cyclic import"), "{}", err);
    let err = vm_in_dir(dir.path(), source).unwrap_err();
    assert!(err.contains("cyclic import"), "{}", err);
}

#[test]
fn unknown_export_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.brio", "export a = 1");
    let source = "import { missing } from \"./m\"";
    let err = eval_in_dir(dir.path(), source).unwrap_err();
    assert!(err.contains("missing"), "{}", err);
    let err = vm_in_dir(dir.path(), source).unwrap_err();
    assert!(err.contains("missing"), "{}", err);
}

#[test]
fn printer_round_trip_is_stable() {
    let sources = [
        "x = 1\nwhile (x < 10) { x = x * 2 }\nprint(x)",
        "class A { fn initialize(v) { @v = v }\nfn get() { @v } }\nprint(A.new(3).get())",
        "try { throw E(\"m\") } catch (E e) { print(e.message) } finally { print(\"f\") }",
        "h = {\"a\": [1, 2.5], \"b\": fn(x) { x }}\nprint(len(h))",
        "for (i = 0; i < 3; i = i + 1) { switch (i) { case 0: print(\"z\")\ndefault: print(i) } }",
    ];
    for source in sources {
        let printed = parse_source(source).expect("parse").to_string();
        let reprinted = parse_source(&printed)
            .unwrap_or_else(|e| panic!("printed form failed to parse: {:?}\n{}", e, printed))
            .to_string();
        assert_eq!(printed, reprinted, "printer not a fixpoint for {:?}", source);
    }
}
