// End-to-end tests for the Rho compiler and VM.
//
// Each test compiles a complete program, loads the resulting image, and
// executes it, checking the captured output and (where relevant) the
// uncaught error value. This exercises the full pipeline: lexer, parser,
// symbol tables, compiler, loader, and evaluator.

use rho::compiler::compile_source;
use rho::errors::ErrorKind;
use rho::value::Value;
use rho::vm::{SharedBuffer, Vm};

/// Compiles and runs `src`, returning (captured output, uncaught error).
fn run(src: &str) -> (String, Value) {
    let image = compile_source(src).expect("compilation failed");
    let sink = SharedBuffer::new();
    let mut vm = Vm::with_sink(sink.clone());
    let err = vm.eval_image(&image, "<test>");
    (sink.contents(), err)
}

fn run_ok(src: &str) -> String {
    let (out, err) = run(src);
    assert!(err.is_empty(), "unexpected error: {:?}", err);
    out
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3"), "7\n");
}

#[test]
fn test_arithmetic_mixed_types() {
    assert_eq!(run_ok("print 1 + 2.5"), "3.5\n");
    assert_eq!(run_ok("print 2 ** 10"), "1024\n");
    assert_eq!(run_ok("print 7 % 3"), "1\n");
    assert_eq!(run_ok("print -(3 - 5)"), "2\n");
}

#[test]
fn test_bitwise_operators() {
    assert_eq!(run_ok("print (6 & 3) | (1 << 4)"), "18\n");
    assert_eq!(run_ok("print 5 ^ 1"), "4\n");
    assert_eq!(run_ok("print ~0"), "-1\n");
}

#[test]
fn test_string_concat_and_compare() {
    assert_eq!(run_ok("print \"foo\" + \"bar\""), "foobar\n");
    assert_eq!(run_ok("print \"abc\" < \"abd\""), "true\n");
    assert_eq!(run_ok("print \"x\" == \"x\""), "true\n");
}

#[test]
fn test_list_index_assignment() {
    let src = "x = [1, 2, 3]\nx[0] = 10\nprint x";
    assert_eq!(run_ok(src), "[10, 2, 3]\n");
}

#[test]
fn test_compound_assignment_simple() {
    assert_eq!(run_ok("x = 3\nx += 4\nprint x"), "7\n");
    assert_eq!(run_ok("x = 12\nx /= 4\nprint x"), "3\n");
}

#[test]
fn test_compound_assignment_index_target() {
    // the receiver is evaluated once (DUP_TWO path)
    let src = "x = [1, 2, 3]\nx[1] += 10\nprint x";
    assert_eq!(run_ok(src), "[1, 12, 3]\n");
}

#[test]
fn test_if_elif_else_chain() {
    let src = "
x = 7
if x < 5 {
    print \"small\"
} elif x < 10 {
    print \"medium\"
} else {
    print \"large\"
}";
    assert_eq!(run_ok(src), "medium\n");
}

#[test]
fn test_ternary_expression() {
    assert_eq!(run_ok("x = 3\nprint \"lo\" if x < 5 else \"hi\""), "lo\n");
    assert_eq!(run_ok("x = 9\nprint \"lo\" if x < 5 else \"hi\""), "hi\n");
}

#[test]
fn test_short_circuit_and_or() {
    assert_eq!(run_ok("print true and false"), "false\n");
    assert_eq!(run_ok("print false or true"), "true\n");
    // the rhs must not be evaluated when the lhs decides the result
    let src = "
def boom() {
    throw Exception(\"evaluated\")
}
x = false and boom()
print x";
    assert_eq!(run_ok(src), "false\n");
}

#[test]
fn test_while_loop_with_break_and_continue() {
    let src = "
x = 0
s = 0
while x < 100 {
    x += 1
    if x % 2 == 0 {
        continue
    }
    if x > 10 {
        break
    }
    s += x
}
print s";
    // 1 + 3 + 5 + 7 + 9 = 25
    assert_eq!(run_ok(src), "25\n");
}

#[test]
fn test_for_loop_over_list() {
    let src = "
s = 0
for n in [10, 20, 30] {
    s += n
}
print s";
    assert_eq!(run_ok(src), "60\n");
}

#[test]
fn test_for_loop_over_range() {
    let src = "
s = 0
for i in 0..5 {
    s += i
}
print s";
    assert_eq!(run_ok(src), "10\n");
}

#[test]
fn test_descending_range() {
    let src = "
out = []
for i in 3..1 {
    out.append(i)
}
print out";
    assert_eq!(run_ok(src), "[3, 2, 1]\n");
}

#[test]
fn test_for_loop_tuple_pattern() {
    let src = "
s = 0
for (a, b) in [(1, 2), (3, 4)] {
    s += a * b
}
print s";
    assert_eq!(run_ok(src), "14\n");
}

#[test]
fn test_sequence_expand_mismatch_is_catchable() {
    let src = "
caught = 0
try {
    for (a, b) in [(1, 2, 3)] {
        s = a
    }
} catch (SequenceExpandException) {
    caught = 1
}
print caught";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_function_defaults_and_named_args() {
    let src = "
def f(a, b = 5) {
    return a + b
}
print f(3)
print f(3, b = 7)";
    assert_eq!(run_ok(src), "8\n10\n");
}

#[test]
fn test_function_argument_errors_are_catchable() {
    let src = "
def f(a) {
    return a
}
caught = 0
try {
    x = f(1, 2)
} catch (TypeException) {
    caught = 1
}
try {
    x = f()
} catch (TypeException) {
    caught += 1
}
try {
    x = f(c = 3)
} catch (TypeException) {
    caught += 1
}
print caught";
    assert_eq!(run_ok(src), "3\n");
}

#[test]
fn test_recursive_function() {
    let src = "
def fib(n) {
    if n < 2 {
        return n
    }
    return fib(n - 1) + fib(n - 2)
}
print fib(15)";
    assert_eq!(run_ok(src), "610\n");
}

#[test]
fn test_type_hints_enforced() {
    let src = "
def f(a: Int) {
    return a + 1
}
caught = 0
try {
    x = f(\"nope\")
} catch (TypeException) {
    caught = 1
}
print caught
print f(41)";
    assert_eq!(run_ok(src), "1\n42\n");
}

#[test]
fn test_lambda_with_dollar_params() {
    let src = "
f = :$1 * $1
print f(9)";
    assert_eq!(run_ok(src), "81\n");
}

#[test]
fn test_apply_operator_over_list() {
    let src = "
double = :$1 * 2
print double @ [1, 2, 3]";
    assert_eq!(run_ok(src), "[2, 4, 6]\n");
}

#[test]
fn test_inplace_apply_operator() {
    let src = "
x = [1, 2, 3]
x @= :$1 + 1
print x";
    assert_eq!(run_ok(src), "[2, 3, 4]\n");
}

#[test]
fn test_try_catch_catches_thrown_exception() {
    let src = "try { throw Exception(\"oops\") } catch (Exception) { print \"caught\" }";
    assert_eq!(run_ok(src), "caught\n");
}

#[test]
fn test_catch_matches_subclasses() {
    let src = "
try {
    throw TypeException(\"bad type\")
} catch (Exception) {
    print \"caught\"
}";
    assert_eq!(run_ok(src), "caught\n");
}

#[test]
fn test_catch_mismatch_rethrows() {
    let src = "
try {
    try {
        throw TypeException(\"inner\")
    } catch (IndexException) {
        print \"wrong\"
    }
} catch (TypeException) {
    print \"outer\"
}";
    assert_eq!(run_ok(src), "outer\n");
}

#[test]
fn test_uncaught_exception_propagates_with_traceback() {
    let src = "
def f() {
    throw Exception(\"deep\")
}
f()";
    let (_, err) = run(src);
    match err {
        Value::Exc(obj) => match obj.payload() {
            rho::value::Payload::Exc(data) => {
                assert_eq!(data.msg.as_deref(), Some("deep"));
                let tb = data.traceback.lock().unwrap();
                assert_eq!(tb.len(), 2);
                assert_eq!(tb[0].func, "f");
                assert_eq!(tb[1].func, "<module>");
            }
            _ => panic!("expected an exception payload"),
        },
        other => panic!("expected an exception, got {:?}", other),
    }
}

#[test]
fn test_exception_message_member() {
    let src = "
e = Exception(\"boom\")
print e.message";
    assert_eq!(run_ok(src), "boom\n");
}

#[test]
fn test_division_by_zero_is_fatal() {
    let (_, err) = run("x = 1 / 0");
    match err {
        Value::Error(e) => {
            assert_eq!(e.kind, ErrorKind::DivByZero);
            assert_eq!(e.traceback[0].lineno, 1);
            assert_eq!(e.traceback[0].func, "<module>");
        }
        other => panic!("expected a fatal error, got {:?}", other),
    }
}

#[test]
fn test_division_by_zero_is_not_catchable() {
    let src = "
try {
    x = 1 / 0
} catch (Exception) {
    print \"caught\"
}";
    let (out, err) = run(src);
    assert_eq!(out, "");
    assert!(matches!(err, Value::Error(e) if e.kind == ErrorKind::DivByZero));
}

#[test]
fn test_unbound_variable_is_fatal() {
    let (_, err) = run("def f() {\n    return zzz_undefined\n}\nx = f()");
    assert!(matches!(err, Value::Error(e) if e.kind == ErrorKind::Name));
}

#[test]
fn test_fatal_error_traceback_lineno() {
    let (_, err) = run("x = 1\ny = 2\nz = y / (x - 1)");
    match err {
        Value::Error(e) => assert_eq!(e.traceback[0].lineno, 3),
        other => panic!("expected a fatal error, got {:?}", other),
    }
}

#[test]
fn test_generator_produces_in_order() {
    let src = "
gen g() {
    produce 1
    produce 2
}
for x in g() {
    print x
}";
    assert_eq!(run_ok(src), "1\n2\n");
}

#[test]
fn test_generator_with_loop_state() {
    let src = "
gen countdown(n) {
    while n > 0 {
        produce n
        n -= 1
    }
}
s = 0
for x in countdown(4) {
    s += x
}
print s";
    assert_eq!(run_ok(src), "10\n");
}

#[test]
fn test_generator_exhaustion_is_sticky() {
    let src = "
gen g() {
    produce 1
}
it = g()
print next(it)
print type(next(it))
print type(next(it))";
    assert_eq!(run_ok(src), "1\n<class IterStop>\n<class IterStop>\n");
}

#[test]
fn test_generator_keeps_stack_across_produce() {
    // the for loop's iterator lives on the generator's value stack across
    // every suspension, so it must survive each produce/resume cycle
    let src = "
gen g() {
    for i in [1, 2, 3] {
        produce i + 100
    }
}
for v in g() {
    print v
}";
    assert_eq!(run_ok(src), "101\n102\n103\n");
}

#[test]
fn test_builtin_functions() {
    assert_eq!(run_ok("print len([1, 2, 3])"), "3\n");
    assert_eq!(run_ok("print str(42)"), "42\n");
    assert_eq!(run_ok("print type(1)"), "<class Int>\n");
    assert_eq!(run_ok("print type(\"s\")"), "<class Str>\n");
}

#[test]
fn test_truthiness_of_not() {
    assert_eq!(run_ok("print not 0"), "true\n");
    assert_eq!(run_ok("print not not 5"), "true\n");
    assert_eq!(run_ok("print not \"\""), "true\n");
    assert_eq!(run_ok("print not [1]"), "false\n");
    assert_eq!(run_ok("print not null"), "true\n");
}

#[test]
fn test_in_operator() {
    assert_eq!(run_ok("print 2 in [1, 2, 3]"), "true\n");
    assert_eq!(run_ok("print 9 in [1, 2, 3]"), "false\n");
    assert_eq!(run_ok("print \"ell\" in \"hello\""), "true\n");
    assert_eq!(run_ok("print 3 in 0..5"), "true\n");
}

#[test]
fn test_dict_operations() {
    let src = "
d = {\"a\": 1}
d[\"b\"] = 2
print d[\"a\"] + d[\"b\"]
print len(d)
print \"a\" in d
print d.get(\"missing\", 9)";
    assert_eq!(run_ok(src), "3\n2\ntrue\n9\n");
}

#[test]
fn test_dict_missing_key_is_catchable() {
    let src = "
d = {}
caught = 0
try {
    x = d[\"nope\"]
} catch (IndexException) {
    caught = 1
}
print caught";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_set_operations() {
    let src = "
s = {1, 2, 3}
s.add(4)
s.remove(1)
print len(s)
print 4 in s
print 1 in s";
    assert_eq!(run_ok(src), "3\ntrue\nfalse\n");
}

#[test]
fn test_tuple_operations() {
    let src = "
t = (1, 2, 3)
print t[1]
print len(t)
print t == (1, 2, 3)";
    assert_eq!(run_ok(src), "2\n3\ntrue\n");
}

#[test]
fn test_list_out_of_bounds_is_catchable() {
    let src = "
x = [1]
caught = 0
try {
    y = x[5]
} catch (IndexException) {
    caught = 1
}
print caught";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_attribute_error_is_catchable() {
    let src = "
caught = 0
try {
    x = [1].nonsense
} catch (AttributeException) {
    caught = 1
}
print caught";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_import_math_module() {
    let (out, err) = run("import math\nprint math.pi");
    assert!(err.is_empty(), "unexpected error: {:?}", err);
    assert!(out.starts_with("3.141592"), "got: {}", out);
}

#[test]
fn test_math_module_functions() {
    let src = "
import math
print math.sqrt(16.0)
print math.floor(2.9)
print math.abs(-3)";
    assert_eq!(run_ok(src), "4.0\n2\n3\n");
}

#[test]
fn test_import_missing_module_is_catchable() {
    let src = "
caught = 0
try {
    import zz_no_such_module_zz
} catch (ImportException) {
    caught = 1
}
print caught";
    assert_eq!(run_ok(src), "1\n");
}

#[test]
fn test_import_compiled_module_from_disk() {
    // module names resolve to <name>.rhoc in the working directory
    let mod_src = "def triple(n) {\n    return n * 3\n}\nexport triple";
    let image = compile_source(mod_src).expect("module compilation failed");
    std::fs::write("rho_disk_mod_test.rhoc", &image).expect("cannot write module image");

    let out = run_ok("import rho_disk_mod_test\nprint rho_disk_mod_test.triple(14)");
    assert_eq!(out, "42\n");

    let _ = std::fs::remove_file("rho_disk_mod_test.rhoc");
}

#[test]
fn test_exports_are_collected() {
    let image = compile_source("x = 5\ny = 6\nexport x").expect("compilation failed");
    let sink = SharedBuffer::new();
    let mut vm = Vm::with_sink(sink);
    let err = vm.eval_image(&image, "<test>");
    assert!(err.is_empty());
    assert!(matches!(vm.exports.get("x"), Some(Value::Int(5))));
    assert!(vm.exports.get("y").is_none());
}

#[test]
fn test_global_access_from_function() {
    let src = "
counter = 0
def bump() {
    counter = counter + 1
}
bump()
bump()
print counter";
    assert_eq!(run_ok(src), "2\n");
}

#[test]
fn test_functions_calling_functions() {
    let src = "
def square(n) {
    return n * n
}
def sum_squares(a, b) {
    return square(a) + square(b)
}
print sum_squares(3, 4)";
    assert_eq!(run_ok(src), "25\n");
}

#[test]
fn test_throw_non_exception_is_fatal() {
    let (_, err) = run("throw 42");
    assert!(matches!(err, Value::Error(e) if e.kind == ErrorKind::Type));
}

#[test]
fn test_purge_wall_restores_stack_depth() {
    // the exception fires while an outer expression holds a stack
    // temporary; the handler must resume with the try-entry depth
    let src = "
def boom() {
    throw Exception(\"x\")
}
s = 0
try {
    s = 1 + boom()
} catch (Exception) {
    s = 99
}
print s";
    assert_eq!(run_ok(src), "99\n");
}

#[test]
fn test_str_of_int_round_trip() {
    for x in ["0", "7", "-13", "123456789"] {
        let src = format!("print str({})", x);
        assert_eq!(run_ok(&src), format!("{}\n", x));
    }
}

#[test]
fn test_float_printing() {
    assert_eq!(run_ok("print 2.5 * 2.0"), "5.0\n");
    assert_eq!(run_ok("print 1.5 + 1.25"), "2.75\n");
}

#[test]
fn test_nested_data_structures() {
    let src = "
grid = [[1, 2], [3, 4]]
print grid[1][0]
grid[0][1] = 9
print grid";
    assert_eq!(run_ok(src), "3\n[[1, 9], [3, 4]]\n");
}
