// File: src/vmops.rs
//
// Operation dispatchers. Each binary arithmetic operation tries the left
// operand's slot, then the right operand's reflected slot; `Unsupported`
// from both sides becomes a TypeException and `DivByZero` becomes a fatal
// arithmetic error. In-place operations try the in-place slot first and
// fall back to the plain and reflected forms.

use std::io::Write;

use crate::class::{self, is_subclass, Class};
use crate::errors;
use crate::objects::{
    BOOL_CLASS, FLOAT_CLASS, INT_CLASS, NULL_CLASS, STR_CLASS,
};
use crate::value::{Payload, Value};
use crate::vm::Vm;

pub fn class_of(v: &Value) -> &'static Class {
    match v {
        Value::Null => &NULL_CLASS,
        Value::Bool(_) => &BOOL_CLASS,
        Value::Int(_) => &INT_CLASS,
        Value::Float(_) => &FLOAT_CLASS,
        Value::Obj(o) | Value::Exc(o) => o.class(),
        // the sentinels never reach dispatch
        _ => &class::OBJ_CLASS,
    }
}

pub fn is_a(v: &Value, class: &'static Class) -> bool {
    is_subclass(class_of(v), class)
}

fn fold_dbz(result: Value) -> Value {
    match result {
        Value::DivByZero => errors::err_div_by_zero(),
        other => other,
    }
}

macro_rules! binop_dispatch {
    ($name:ident, $fwd:ident, $refl:ident, $tok:literal) => {
        pub fn $name(a: &Value, b: &Value) -> Value {
            let ca = class_of(a);
            let cb = class_of(b);

            let mut r_op = false;
            let mut result = match ca.resolved().num.$fwd {
                Some(op) => op(a, b),
                None => match cb.resolved().num.$refl {
                    Some(op) => {
                        r_op = true;
                        op(b, a)
                    }
                    None => return errors::type_exc_unsupported_2($tok, ca, cb),
                },
            };

            if result.is_error() {
                return result;
            }

            if matches!(result, Value::Unsupported) {
                if r_op {
                    return errors::type_exc_unsupported_2($tok, ca, cb);
                }
                result = match cb.resolved().num.$refl {
                    Some(op) => op(b, a),
                    None => return errors::type_exc_unsupported_2($tok, ca, cb),
                };
                if result.is_error() {
                    return result;
                }
                if matches!(result, Value::Unsupported) {
                    return errors::type_exc_unsupported_2($tok, ca, cb);
                }
            }

            fold_dbz(result)
        }
    };
}

macro_rules! unop_dispatch {
    ($name:ident, $slot:ident, $tok:literal) => {
        pub fn $name(a: &Value) -> Value {
            let class = class_of(a);
            match class.resolved().num.$slot {
                Some(op) => fold_dbz(op(a)),
                None => errors::type_exc_unsupported_1($tok, class),
            }
        }
    };
}

macro_rules! ibinop_dispatch {
    ($name:ident, $iop:ident, $fwd:ident, $refl:ident, $tok:literal) => {
        pub fn $name(a: &Value, b: &Value) -> Value {
            let ca = class_of(a);
            let cb = class_of(b);
            let num = &ca.resolved().num;

            if let Some(op) = num.$iop {
                let r = op(a, b);
                if r.is_error() {
                    return r;
                }
                if !matches!(r, Value::Unsupported) {
                    return fold_dbz(r);
                }
            }
            if let Some(op) = num.$fwd {
                let r = op(a, b);
                if r.is_error() {
                    return r;
                }
                if !matches!(r, Value::Unsupported) {
                    return fold_dbz(r);
                }
            }
            if let Some(op) = cb.resolved().num.$refl {
                let r = op(b, a);
                if r.is_error() {
                    return r;
                }
                if !matches!(r, Value::Unsupported) {
                    return fold_dbz(r);
                }
            }
            errors::type_exc_unsupported_2($tok, ca, cb)
        }
    };
}

binop_dispatch!(op_add, add, radd, "+");
binop_dispatch!(op_sub, sub, rsub, "-");
binop_dispatch!(op_mul, mul, rmul, "*");
binop_dispatch!(op_div, div, rdiv, "/");
binop_dispatch!(op_mod, mod_, rmod, "%");
binop_dispatch!(op_pow, pow, rpow, "**");
binop_dispatch!(op_bitand, bitand, rbitand, "&");
binop_dispatch!(op_bitor, bitor, rbitor, "|");
binop_dispatch!(op_xor, xor, rxor, "^");
binop_dispatch!(op_shiftl, shiftl, rshiftl, "<<");
binop_dispatch!(op_shiftr, shiftr, rshiftr, ">>");

unop_dispatch!(op_plus, plus, "unary +");
unop_dispatch!(op_minus, minus, "unary -");
unop_dispatch!(op_bitnot, bitnot, "~");

ibinop_dispatch!(op_iadd, iadd, add, radd, "+=");
ibinop_dispatch!(op_isub, isub, sub, rsub, "-=");
ibinop_dispatch!(op_imul, imul, mul, rmul, "*=");
ibinop_dispatch!(op_idiv, idiv, div, rdiv, "/=");
ibinop_dispatch!(op_imod, imod, mod_, rmod, "%=");
ibinop_dispatch!(op_ipow, ipow, pow, rpow, "**=");
ibinop_dispatch!(op_ibitand, ibitand, bitand, rbitand, "&=");
ibinop_dispatch!(op_ibitor, ibitor, bitor, rbitor, "|=");
ibinop_dispatch!(op_ixor, ixor, xor, rxor, "^=");
ibinop_dispatch!(op_ishiftl, ishiftl, shiftl, rshiftl, "<<=");
ibinop_dispatch!(op_ishiftr, ishiftr, shiftr, rshiftr, ">>=");

// --- truthiness and logic ------------------------------------------------

/// `nonzero` is defined on the base object class, so every value has it.
pub fn op_nonzero(v: &Value) -> bool {
    match class_of(v).resolved().num.nonzero {
        Some(f) => f(v),
        None => true,
    }
}

pub fn op_and(a: &Value, b: &Value) -> Value {
    Value::Bool(op_nonzero(a) && op_nonzero(b))
}

pub fn op_or(a: &Value, b: &Value) -> Value {
    Value::Bool(op_nonzero(a) || op_nonzero(b))
}

pub fn op_not(a: &Value) -> Value {
    Value::Bool(!op_nonzero(a))
}

// --- equality and comparison ---------------------------------------------

pub fn op_eq(a: &Value, b: &Value) -> Value {
    let class = class_of(a);
    match class.resolved().eq {
        Some(eq) => {
            let res = eq(a, b);
            if res.is_error() {
                return res;
            }
            match res {
                Value::Bool(_) => res,
                _ => errors::type_exc("equals method did not return a boolean value".to_string()),
            }
        }
        None => errors::type_exc_unsupported_2("==", class, class_of(b)),
    }
}

pub fn op_neq(a: &Value, b: &Value) -> Value {
    match op_eq(a, b) {
        Value::Bool(r) => Value::Bool(!r),
        other => other,
    }
}

macro_rules! cmpop_dispatch {
    ($name:ident, $tok:literal, $fold:expr) => {
        pub fn $name(a: &Value, b: &Value) -> Value {
            let class = class_of(a);
            let cmp = match class.resolved().cmp {
                Some(cmp) => cmp,
                None => return errors::type_exc_unsupported_2($tok, class, class_of(b)),
            };
            let res = cmp(a, b);
            if res.is_error() {
                return res;
            }
            match res {
                Value::Unsupported => errors::type_exc_unsupported_2($tok, class, class_of(b)),
                Value::Int(sign) => Value::Bool($fold(sign)),
                _ => errors::type_exc("comparison did not return an integer value".to_string()),
            }
        }
    };
}

cmpop_dispatch!(op_lt, "<", |sign: i64| sign < 0);
cmpop_dispatch!(op_gt, ">", |sign: i64| sign > 0);
cmpop_dispatch!(op_le, "<=", |sign: i64| sign <= 0);
cmpop_dispatch!(op_ge, ">=", |sign: i64| sign >= 0);

// --- general operations --------------------------------------------------

pub fn op_hash(v: &Value) -> Value {
    let class = class_of(v);
    match class.resolved().hash {
        Some(hash) => {
            let res = hash(v);
            if res.is_error() {
                return res;
            }
            match res {
                Value::Int(_) => res,
                _ => errors::type_exc("hash method did not return an integer value".to_string()),
            }
        }
        None => errors::type_exc_unsupported_1("hash", class),
    }
}

pub fn op_str(v: &Value) -> Value {
    let class = class_of(v);
    // `str` resolves on every class via the base object class
    let str_ = class
        .resolved()
        .str_
        .expect("str slot missing from base class");
    let res = str_(v);
    if res.is_error() {
        return res;
    }
    if !std::ptr::eq(class_of(&res), &STR_CLASS) {
        return errors::type_exc("str method did not return a string object".to_string());
    }
    res
}

/// Prints `v` plus a newline to `out`. Returns Empty, or a propagating
/// error from a failing `str` slot.
pub fn op_print(v: &Value, out: &mut dyn Write) -> Value {
    match v {
        Value::Null => {
            let _ = writeln!(out, "null");
        }
        Value::Bool(b) => {
            let _ = writeln!(out, "{}", if *b { "true" } else { "false" });
        }
        Value::Int(i) => {
            let _ = writeln!(out, "{}", i);
        }
        Value::Float(f) => {
            let _ = writeln!(out, "{}", crate::objects::fmt_float(*f));
        }
        Value::Obj(_) | Value::Exc(_) => {
            let s = op_str(v);
            if s.is_error() {
                return s;
            }
            match s.as_obj().map(|o| o.payload()) {
                Some(Payload::Str(text)) => {
                    let _ = writeln!(out, "{}", text);
                }
                _ => {}
            }
        }
        _ => {}
    }
    Value::Empty
}

// --- sequence protocol ---------------------------------------------------

pub fn op_get(v: &Value, index: &Value) -> Value {
    let class = class_of(v);
    match class.resolved().seq.get {
        Some(get) => get(v, index),
        None => errors::type_exc_cannot_index(class),
    }
}

pub fn op_set(v: &Value, index: &Value, value: &Value) -> Value {
    let class = class_of(v);
    match class.resolved().seq.set {
        Some(set) => set(v, index, value),
        None => errors::type_exc_cannot_index(class),
    }
}

pub fn op_len(v: &Value) -> Value {
    let class = class_of(v);
    match class.resolved().seq.len {
        Some(len) => len(v),
        None => errors::type_exc_unsupported_1("len", class),
    }
}

/// `element in container`.
pub fn op_in(element: &Value, container: &Value) -> Value {
    let class = class_of(container);
    match class.resolved().seq.contains {
        Some(contains) => contains(container, element),
        None => errors::type_exc_unsupported_2("in", class_of(element), class),
    }
}

/// `f @ seq`: maps `f` over the sequence.
pub fn op_apply(seq: &Value, func: &Value, vm: &mut Vm) -> Value {
    let class = class_of(seq);
    match class.resolved().seq.apply {
        Some(apply) => apply(seq, func, vm),
        None => errors::type_exc(format!(
            "object of type '{}' does not support '@'",
            class.name
        )),
    }
}

/// `target @= f`: in-place map, falling back to the plain apply.
pub fn op_iapply(target: &Value, func: &Value, vm: &mut Vm) -> Value {
    let class = class_of(target);
    let seq = &class.resolved().seq;
    match seq.iapply.or(seq.apply) {
        Some(apply) => apply(target, func, vm),
        None => errors::type_exc(format!(
            "object of type '{}' does not support '@='",
            class.name
        )),
    }
}

// --- attribute protocol --------------------------------------------------

pub fn op_get_attr(v: &Value, name: &str) -> Value {
    let class = class_of(v);
    if let Some(attr_get) = class.resolved().attr_get {
        return attr_get(v, name);
    }
    default_attr_get(v, name)
}

fn default_attr_get(v: &Value, name: &str) -> Value {
    let class = class_of(v);
    match class.find_attr(name) {
        Some((owner, entry)) => {
            if entry.is_method {
                class::method_value(v.clone(), owner.methods[entry.index].func)
            } else {
                match v.as_obj() {
                    Some(obj) => (owner.members[entry.index].get)(obj),
                    None => errors::attr_exc_not_found(class, name),
                }
            }
        }
        None => errors::attr_exc_not_found(class, name),
    }
}

pub fn op_set_attr(v: &Value, name: &str, value: &Value) -> Value {
    let class = class_of(v);
    if let Some(attr_set) = class.resolved().attr_set {
        return attr_set(v, name, value);
    }
    default_attr_set(v, name, value)
}

fn default_attr_set(v: &Value, name: &str, value: &Value) -> Value {
    let class = class_of(v);
    match class.find_attr(name) {
        Some((owner, entry)) => {
            if entry.is_method {
                return errors::attr_exc(format!(
                    "cannot assign to method '{}' of type '{}'",
                    name, class.name
                ));
            }
            let member = &owner.members[entry.index];
            if member.readonly {
                return errors::attr_exc_readonly(class, name);
            }
            if let Some(strict) = member.strict_type {
                if !is_a(value, strict) {
                    return errors::attr_exc_mismatch(class, name, class_of(value));
                }
            }
            match (member.set, v.as_obj()) {
                (Some(set), Some(obj)) => set(obj, value),
                _ => errors::attr_exc_readonly(class, name),
            }
        }
        None => errors::attr_exc_not_found(class, name),
    }
}

// --- iteration and calls -------------------------------------------------

pub fn op_iter(v: &Value) -> Value {
    let class = class_of(v);
    match class.resolved().iter {
        Some(iter) => iter(v),
        None => errors::type_exc_not_iterable(class),
    }
}

pub fn op_iternext(v: &Value, vm: &mut Vm) -> Value {
    let class = class_of(v);
    match class.resolved().iternext {
        Some(iternext) => iternext(v, vm),
        None => errors::type_exc_not_iterator(class),
    }
}

/// `named` holds (name, value) pairs flattened in stack order.
pub fn op_call(callee: &Value, vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    let class = class_of(callee);
    match class.resolved().call {
        Some(call) => call(callee, vm, args, named),
        None => errors::type_exc_not_callable(class),
    }
}
