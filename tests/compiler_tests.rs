// Byte-level tests for the compiler, constant table, and loader.

use rho::bytecode::{Opcode, MAGIC};
use rho::codeobject::load_image;
use rho::compiler::compile_source;
use rho::errors::ErrorKind;
use rho::value::{Payload, Value};

fn compile(src: &str) -> Vec<u8> {
    compile_source(src).expect("compilation failed")
}

#[test]
fn test_image_starts_with_magic_and_depths() {
    let image = compile("x = 1");
    assert_eq!(&image[..4], &MAGIC);
    // module stack depth and try-catch depth follow as u16s
    assert!(image.len() > 8);
}

#[test]
fn test_loader_rejects_bad_magic() {
    let mut image = compile("x = 1");
    image[0] = 0x00;
    match load_image(&image, "bad") {
        Err(e) => assert_eq!(e.kind, ErrorKind::BadSignature),
        Ok(_) => panic!("expected a signature error"),
    }
}

#[test]
fn test_scalar_constants_are_interned() {
    let image = compile("a = 5\nb = 5\nc = \"s\"\nd = \"s\"\ne = 2.5\nf = 2.5");
    let co = load_image(&image, "test").expect("load failed");

    let ints = co.consts.iter().filter(|v| matches!(v, Value::Int(5))).count();
    let floats = co
        .consts
        .iter()
        .filter(|v| matches!(v, Value::Float(f) if *f == 2.5))
        .count();
    let strs = co
        .consts
        .iter()
        .filter(|v| {
            matches!(v.as_obj().map(|o| o.payload()), Some(Payload::Str(s)) if s == "s")
        })
        .count();

    assert_eq!(ints, 1);
    assert_eq!(floats, 1);
    assert_eq!(strs, 1);
}

#[test]
fn test_code_objects_are_not_deduplicated() {
    let image = compile("f = :$1\ng = :$1");
    let co = load_image(&image, "test").expect("load failed");
    let codes = co
        .consts
        .iter()
        .filter(|v| matches!(v.as_obj().map(|o| o.payload()), Some(Payload::Code(_))))
        .count();
    assert_eq!(codes, 2);
}

#[test]
fn test_symbol_tables_round_trip() {
    let image = compile("a = 1\nb = a\nc = b.foo\nd = len([])");
    let co = load_image(&image, "test").expect("load failed");

    assert_eq!(co.names, vec!["a", "b", "c", "d"]);
    assert_eq!(co.attrs, vec!["foo"]);
    assert_eq!(co.frees, vec!["len"]);
}

#[test]
fn test_nested_code_object_metadata() {
    let image = compile("def f(a, b) {\n    return a + b\n}");
    let co = load_image(&image, "test").expect("load failed");

    let nested = co
        .consts
        .iter()
        .find_map(|v| match v.as_obj().map(|o| o.payload()) {
            Some(Payload::Code(sub)) => Some(sub.clone()),
            _ => None,
        })
        .expect("missing nested code object");

    assert_eq!(nested.name, "f");
    assert_eq!(nested.argcount, 2);
    assert_eq!(nested.names, vec!["a", "b"]);
    assert!(nested.stack_depth >= 2);
}

#[test]
fn test_stack_depth_is_an_upper_bound_on_pushes() {
    let image = compile("x = 1 + (2 + (3 + (4 + 5)))");
    let co = load_image(&image, "test").expect("load failed");
    assert!(co.stack_depth >= 5, "declared depth {}", co.stack_depth);
}

#[test]
fn test_try_catch_depth_counts_nesting() {
    let image = compile(
        "try {\n    try {\n        x = 1\n    } catch (Exception) {\n        y = 1\n    }\n} catch (Exception) {\n    z = 1\n}",
    );
    let co = load_image(&image, "test").expect("load failed");
    assert_eq!(co.try_catch_depth, 2);
}

#[test]
fn test_lambda_argcount_from_dollar_idents() {
    let image = compile("f = :$1 + $3");
    let co = load_image(&image, "test").expect("load failed");
    let nested = co
        .consts
        .iter()
        .find_map(|v| match v.as_obj().map(|o| o.payload()) {
            Some(Payload::Code(sub)) => Some(sub.clone()),
            _ => None,
        })
        .expect("missing lambda code object");
    assert_eq!(nested.name, "<lambda>");
    assert_eq!(nested.argcount, 3);
    assert_eq!(nested.names, vec!["$1", "$2", "$3"]);
}

#[test]
fn test_opcode_operand_sizes() {
    assert_eq!(Opcode::Nop.arg_size(), 0);
    assert_eq!(Opcode::LoadConst.arg_size(), 2);
    assert_eq!(Opcode::TryBegin.arg_size(), 4);
    assert_eq!(Opcode::Pop.arg_size(), 0);
    assert_eq!(Opcode::Call.arg_size(), 2);
}

#[test]
fn test_opcode_numbering_starts_at_0x30() {
    assert_eq!(Opcode::Nop as u8, 0x30);
    assert_eq!(Opcode::from_byte(0x30), Some(Opcode::Nop));
    assert_eq!(Opcode::from_byte(0x2f), None);
}

#[test]
fn test_call_stack_delta_counts_named_pairs() {
    // operand packs (n_named << 8) | n_pos; named args occupy two slots
    let arg = (2u16 << 8) | 3;
    assert_eq!(Opcode::Call.stack_delta(arg), -7);
}

#[test]
fn test_builtin_module_identity() {
    let a = rho::module::builtin_module("math").expect("math module missing");
    let b = rho::module::builtin_module("math").expect("math module missing");
    match (a, b) {
        (Value::Obj(x), Value::Obj(y)) => assert!(x.is(&y), "module values differ"),
        _ => panic!("expected module objects"),
    }
}

#[test]
fn test_integer_literal_out_of_range_is_rejected() {
    assert!(compile_source("x = 99999999999999999999").is_err());
    assert!(compile_source("x = 5000000000").is_err());
}
