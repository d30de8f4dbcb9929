// File: src/objects.rs
//
// Built-in value types and their class vtables: the primitive classes
// (Null, Bool, Int, Float), strings, containers (List, Tuple, Set, Dict),
// ranges and iterators, and files.

use once_cell::sync::OnceCell;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Mutex;

use ahash::RandomState;

use crate::class::{Class, MethodDesc, NumMethods, SeqMethods};
use crate::errors;
use crate::value::{HashKey, Obj, Payload, Value};
use crate::vm::Vm;
use crate::vmops::{self, class_of};

// --- constructors --------------------------------------------------------

pub fn str_value(s: String) -> Value {
    Obj::new(&STR_CLASS, Payload::Str(s)).into_value()
}

pub fn list_value(elems: Vec<Value>) -> Value {
    Obj::new(&LIST_CLASS, Payload::List(Mutex::new(elems))).into_value()
}

pub fn tuple_value(elems: Vec<Value>) -> Value {
    Obj::new(&TUPLE_CLASS, Payload::Tuple(elems)).into_value()
}

pub fn set_value(elems: &[Value]) -> Value {
    let mut set: HashSet<HashKey, RandomState> = HashSet::default();
    for elem in elems {
        match HashKey::try_new(elem.clone()) {
            Ok(key) => {
                set.insert(key);
            }
            Err(class) => return errors::type_exc_unhashable(class),
        }
    }
    Obj::new(&SET_CLASS, Payload::Set(Mutex::new(set))).into_value()
}

/// Builds a dict from `pairs` laid out key, value, key, value, ...
pub fn dict_value(pairs: &[Value]) -> Value {
    debug_assert!(pairs.len() % 2 == 0);
    let mut dict: HashMap<HashKey, Value, RandomState> = HashMap::default();
    for chunk in pairs.chunks(2) {
        match HashKey::try_new(chunk[0].clone()) {
            Ok(key) => {
                dict.insert(key, chunk[1].clone());
            }
            Err(class) => return errors::type_exc_unhashable(class),
        }
    }
    Obj::new(&DICT_CLASS, Payload::Dict(Mutex::new(dict))).into_value()
}

/// The IterStop singleton, returned by exhausted iterators.
pub fn iter_stop() -> Value {
    static ITER_STOP: Lazy<Value> =
        Lazy::new(|| Obj::new(&ITER_STOP_CLASS, Payload::IterStop).into_value());
    ITER_STOP.clone()
}

pub fn is_iter_stop(v: &Value) -> bool {
    matches!(v, Value::Obj(o) if matches!(o.payload(), Payload::IterStop))
}

pub fn range_value(from: i64, to: i64) -> Value {
    Obj::new(&RANGE_CLASS, Payload::Range(Mutex::new(RangeState { from, to, i: from })))
        .into_value()
}

/// Snapshot iterator over a fixed list of items.
pub fn seq_iter_value(items: Vec<Value>) -> Value {
    Obj::new(
        &SEQ_ITER_CLASS,
        Payload::SeqIter(SeqIter { items, idx: Mutex::new(0) }),
    )
    .into_value()
}

pub fn fmt_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

// --- payload state types -------------------------------------------------

#[derive(Debug)]
pub struct RangeState {
    pub from: i64,
    pub to: i64,
    pub i: i64,
}

#[derive(Debug)]
pub struct SeqIter {
    pub items: Vec<Value>,
    pub idx: Mutex<usize>,
}

/// Lazy result of `f @ it` when `it` is an iterator.
#[derive(Debug)]
pub struct AppliedIter {
    pub source: Value,
    pub func: Value,
}

#[derive(Debug)]
pub struct FileState {
    pub path: String,
    pub readable: bool,
    pub writable: bool,
    pub reader: Option<BufReader<std::fs::File>>,
    pub writer: Option<std::fs::File>,
}

// --- Null ---------------------------------------------------------------

fn null_eq(_this: &Value, other: &Value) -> Value {
    Value::Bool(matches!(other, Value::Null))
}

fn null_hash(_this: &Value) -> Value {
    Value::Int(0)
}

fn null_str(_this: &Value) -> Value {
    str_value("null".to_string())
}

fn null_nonzero(_this: &Value) -> bool {
    false
}

static NULL_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(null_nonzero),
    ..NumMethods::DEFAULT
};

pub static NULL_CLASS: Class = Class {
    name: "Null",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(null_eq),
    hash: Some(null_hash),
    str_: Some(null_str),
    num_methods: Some(&NULL_NUM_METHODS),
    init: None,
    cmp: None,
    call: None,
    iter: None,
    iternext: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Bool ---------------------------------------------------------------

fn bool_val(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn bool_eq(this: &Value, other: &Value) -> Value {
    match other {
        Value::Bool(b) => Value::Bool(bool_val(this) == *b),
        _ => Value::Bool(false),
    }
}

fn bool_hash(this: &Value) -> Value {
    Value::Int(bool_val(this) as i64)
}

fn bool_str(this: &Value) -> Value {
    str_value(if bool_val(this) { "true" } else { "false" }.to_string())
}

fn bool_nonzero(this: &Value) -> bool {
    bool_val(this)
}

static BOOL_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(bool_nonzero),
    ..NumMethods::DEFAULT
};

pub static BOOL_CLASS: Class = Class {
    name: "Bool",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(bool_eq),
    hash: Some(bool_hash),
    str_: Some(bool_str),
    num_methods: Some(&BOOL_NUM_METHODS),
    init: None,
    cmp: None,
    call: None,
    iter: None,
    iternext: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Int ----------------------------------------------------------------

fn intv(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        _ => 0,
    }
}

macro_rules! int_binop {
    ($name:ident, $int_case:expr, $float_case:expr) => {
        fn $name(this: &Value, other: &Value) -> Value {
            let a = intv(this);
            match other {
                Value::Int(b) => $int_case(a, *b),
                Value::Float(b) => $float_case(a as f64, *b),
                _ => Value::Unsupported,
            }
        }
    };
}

macro_rules! int_bitop {
    ($name:ident, $case:expr) => {
        fn $name(this: &Value, other: &Value) -> Value {
            match other {
                Value::Int(b) => $case(intv(this), *b),
                _ => Value::Unsupported,
            }
        }
    };
}

int_binop!(int_add, |a: i64, b: i64| Value::Int(a.wrapping_add(b)), |a: f64, b: f64| {
    Value::Float(a + b)
});
int_binop!(int_sub, |a: i64, b: i64| Value::Int(a.wrapping_sub(b)), |a: f64, b: f64| {
    Value::Float(a - b)
});
int_binop!(int_mul, |a: i64, b: i64| Value::Int(a.wrapping_mul(b)), |a: f64, b: f64| {
    Value::Float(a * b)
});
int_binop!(
    int_div,
    |a: i64, b: i64| {
        if b == 0 {
            Value::DivByZero
        } else {
            Value::Int(a.wrapping_div(b))
        }
    },
    |a: f64, b: f64| Value::Float(a / b)
);
int_binop!(
    int_mod,
    |a: i64, b: i64| {
        if b == 0 {
            Value::DivByZero
        } else {
            Value::Int(a.wrapping_rem(b))
        }
    },
    |a: f64, b: f64| Value::Float(a % b)
);
int_binop!(
    int_pow,
    |a: i64, b: i64| Value::Int((a as f64).powf(b as f64) as i64),
    |a: f64, b: f64| Value::Float(a.powf(b))
);

int_bitop!(int_bitand, |a: i64, b: i64| Value::Int(a & b));
int_bitop!(int_bitor, |a: i64, b: i64| Value::Int(a | b));
int_bitop!(int_xor, |a: i64, b: i64| Value::Int(a ^ b));
int_bitop!(int_shiftl, |a: i64, b: i64| Value::Int(a.wrapping_shl(b as u32)));
int_bitop!(int_shiftr, |a: i64, b: i64| Value::Int(a.wrapping_shr(b as u32)));

fn int_plus(this: &Value) -> Value {
    this.clone()
}

fn int_minus(this: &Value) -> Value {
    Value::Int(intv(this).wrapping_neg())
}

fn int_abs(this: &Value) -> Value {
    Value::Int(intv(this).wrapping_abs())
}

fn int_bitnot(this: &Value) -> Value {
    Value::Int(!intv(this))
}

fn int_eq(this: &Value, other: &Value) -> Value {
    match other {
        Value::Int(b) => Value::Bool(intv(this) == *b),
        Value::Float(b) => Value::Bool((intv(this) as f64) == *b),
        _ => Value::Bool(false),
    }
}

fn int_cmp(this: &Value, other: &Value) -> Value {
    let a = intv(this);
    match other {
        Value::Int(b) => Value::Int(match a.cmp(b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }),
        Value::Float(b) => {
            let a = a as f64;
            Value::Int(if a < *b {
                -1
            } else if a > *b {
                1
            } else {
                0
            })
        }
        _ => Value::Unsupported,
    }
}

fn int_hash(this: &Value) -> Value {
    Value::Int(intv(this))
}

fn int_str(this: &Value) -> Value {
    str_value(intv(this).to_string())
}

fn int_nonzero(this: &Value) -> bool {
    intv(this) != 0
}

fn int_to_int(this: &Value) -> Value {
    this.clone()
}

fn int_to_float(this: &Value) -> Value {
    Value::Float(intv(this) as f64)
}

static INT_NUM_METHODS: NumMethods = NumMethods {
    plus: Some(int_plus),
    minus: Some(int_minus),
    abs: Some(int_abs),
    add: Some(int_add),
    sub: Some(int_sub),
    mul: Some(int_mul),
    div: Some(int_div),
    mod_: Some(int_mod),
    pow: Some(int_pow),
    bitnot: Some(int_bitnot),
    bitand: Some(int_bitand),
    bitor: Some(int_bitor),
    xor: Some(int_xor),
    shiftl: Some(int_shiftl),
    shiftr: Some(int_shiftr),
    nonzero: Some(int_nonzero),
    to_int: Some(int_to_int),
    to_float: Some(int_to_float),
    ..NumMethods::DEFAULT
};

pub static INT_CLASS: Class = Class {
    name: "Int",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(int_eq),
    hash: Some(int_hash),
    cmp: Some(int_cmp),
    str_: Some(int_str),
    num_methods: Some(&INT_NUM_METHODS),
    init: None,
    call: None,
    iter: None,
    iternext: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Float --------------------------------------------------------------

fn floatv(v: &Value) -> f64 {
    match v {
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

macro_rules! float_binop {
    ($name:ident, $case:expr) => {
        fn $name(this: &Value, other: &Value) -> Value {
            let a = floatv(this);
            match other {
                Value::Int(b) => $case(a, *b as f64),
                Value::Float(b) => $case(a, *b),
                _ => Value::Unsupported,
            }
        }
    };
}

float_binop!(float_add, |a: f64, b: f64| Value::Float(a + b));
float_binop!(float_sub, |a: f64, b: f64| Value::Float(a - b));
float_binop!(float_mul, |a: f64, b: f64| Value::Float(a * b));
float_binop!(float_div, |a: f64, b: f64| Value::Float(a / b));
float_binop!(float_pow, |a: f64, b: f64| Value::Float(a.powf(b)));

fn float_plus(this: &Value) -> Value {
    this.clone()
}

fn float_minus(this: &Value) -> Value {
    Value::Float(-floatv(this))
}

fn float_abs(this: &Value) -> Value {
    Value::Float(floatv(this).abs())
}

fn float_eq(this: &Value, other: &Value) -> Value {
    match other {
        Value::Int(b) => Value::Bool(floatv(this) == *b as f64),
        Value::Float(b) => Value::Bool(floatv(this) == *b),
        _ => Value::Bool(false),
    }
}

fn float_cmp(this: &Value, other: &Value) -> Value {
    let a = floatv(this);
    let b = match other {
        Value::Int(b) => *b as f64,
        Value::Float(b) => *b,
        _ => return Value::Unsupported,
    };
    Value::Int(if a < b {
        -1
    } else if a > b {
        1
    } else {
        0
    })
}

fn float_hash(this: &Value) -> Value {
    Value::Int(floatv(this).to_bits() as i64)
}

fn float_str(this: &Value) -> Value {
    str_value(fmt_float(floatv(this)))
}

fn float_nonzero(this: &Value) -> bool {
    floatv(this) != 0.0
}

fn float_to_int(this: &Value) -> Value {
    Value::Int(floatv(this) as i64)
}

fn float_to_float(this: &Value) -> Value {
    this.clone()
}

// Reflected slots let `int op float` fall back here when the Int slot
// reports Unsupported (it does not; these exist for completeness and for
// user-facing symmetry of the dispatch contract).
fn float_radd(this: &Value, other: &Value) -> Value {
    float_add(this, other)
}

fn float_rmul(this: &Value, other: &Value) -> Value {
    float_mul(this, other)
}

fn float_rsub(this: &Value, other: &Value) -> Value {
    match other {
        Value::Int(b) => Value::Float(*b as f64 - floatv(this)),
        Value::Float(b) => Value::Float(*b - floatv(this)),
        _ => Value::Unsupported,
    }
}

fn float_rdiv(this: &Value, other: &Value) -> Value {
    match other {
        Value::Int(b) => Value::Float(*b as f64 / floatv(this)),
        Value::Float(b) => Value::Float(*b / floatv(this)),
        _ => Value::Unsupported,
    }
}

static FLOAT_NUM_METHODS: NumMethods = NumMethods {
    plus: Some(float_plus),
    minus: Some(float_minus),
    abs: Some(float_abs),
    add: Some(float_add),
    sub: Some(float_sub),
    mul: Some(float_mul),
    div: Some(float_div),
    pow: Some(float_pow),
    radd: Some(float_radd),
    rsub: Some(float_rsub),
    rmul: Some(float_rmul),
    rdiv: Some(float_rdiv),
    nonzero: Some(float_nonzero),
    to_int: Some(float_to_int),
    to_float: Some(float_to_float),
    ..NumMethods::DEFAULT
};

pub static FLOAT_CLASS: Class = Class {
    name: "Float",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(float_eq),
    hash: Some(float_hash),
    cmp: Some(float_cmp),
    str_: Some(float_str),
    num_methods: Some(&FLOAT_NUM_METHODS),
    init: None,
    call: None,
    iter: None,
    iternext: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Str ----------------------------------------------------------------

fn strv(v: &Value) -> &str {
    match v.as_obj().map(|o| o.payload()) {
        Some(Payload::Str(s)) => s,
        _ => "",
    }
}

fn str_eq(this: &Value, other: &Value) -> Value {
    match other.as_obj().map(|o| o.payload()) {
        Some(Payload::Str(s)) => Value::Bool(strv(this) == s),
        _ => Value::Bool(false),
    }
}

fn str_cmp(this: &Value, other: &Value) -> Value {
    match other.as_obj().map(|o| o.payload()) {
        Some(Payload::Str(s)) => Value::Int(match strv(this).cmp(s.as_str()) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }),
        _ => Value::Unsupported,
    }
}

fn str_hash(this: &Value) -> Value {
    use std::hash::{Hash, Hasher};
    let mut hasher = ahash::AHasher::default();
    strv(this).hash(&mut hasher);
    Value::Int(hasher.finish() as i64)
}

fn str_str(this: &Value) -> Value {
    this.clone()
}

fn str_nonzero(this: &Value) -> bool {
    !strv(this).is_empty()
}

fn str_cat(this: &Value, other: &Value) -> Value {
    match other.as_obj().map(|o| o.payload()) {
        Some(Payload::Str(s)) => str_value(format!("{}{}", strv(this), s)),
        _ => Value::Unsupported,
    }
}

fn str_len(this: &Value) -> Value {
    Value::Int(strv(this).chars().count() as i64)
}

fn str_get(this: &Value, index: &Value) -> Value {
    let idx = match index {
        Value::Int(i) => *i,
        _ => return errors::type_exc_cannot_index(&STR_CLASS),
    };
    let s = strv(this);
    let len = s.chars().count();
    if idx < 0 || idx as usize >= len {
        return errors::index_exc_out_of_bounds(idx, len);
    }
    str_value(s.chars().nth(idx as usize).unwrap().to_string())
}

fn str_contains(this: &Value, needle: &Value) -> Value {
    match needle.as_obj().map(|o| o.payload()) {
        Some(Payload::Str(n)) => Value::Bool(strv(this).contains(n.as_str())),
        _ => errors::type_exc_unsupported_2("in", class_of(needle), &STR_CLASS),
    }
}

static STR_NUM_METHODS: NumMethods = NumMethods {
    add: Some(str_cat),
    nonzero: Some(str_nonzero),
    ..NumMethods::DEFAULT
};

static STR_SEQ_METHODS: SeqMethods = SeqMethods {
    len: Some(str_len),
    get: Some(str_get),
    contains: Some(str_contains),
    ..SeqMethods::DEFAULT
};

pub static STR_CLASS: Class = Class {
    name: "Str",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(str_eq),
    hash: Some(str_hash),
    cmp: Some(str_cmp),
    str_: Some(str_str),
    num_methods: Some(&STR_NUM_METHODS),
    seq_methods: Some(&STR_SEQ_METHODS),
    init: None,
    call: None,
    iter: None,
    iternext: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- List ---------------------------------------------------------------

fn with_list<R>(v: &Value, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
    match v.as_obj().map(|o| o.payload()) {
        Some(Payload::List(elems)) => Some(f(&mut elems.lock().unwrap())),
        _ => None,
    }
}

fn render_elems(elems: &[Value], open: char, close: char) -> Value {
    let mut parts = Vec::with_capacity(elems.len());
    for elem in elems {
        let s = vmops::op_str(elem);
        if s.is_error() {
            return s;
        }
        parts.push(strv(&s).to_string());
    }
    str_value(format!("{}{}{}", open, parts.join(", "), close))
}

fn list_eq(this: &Value, other: &Value) -> Value {
    let a = match with_list(this, |elems| elems.clone()) {
        Some(elems) => elems,
        None => return Value::Bool(false),
    };
    let b = match with_list(other, |elems| elems.clone()) {
        Some(elems) => elems,
        None => return Value::Bool(false),
    };
    elems_eq(&a, &b)
}

fn elems_eq(a: &[Value], b: &[Value]) -> Value {
    if a.len() != b.len() {
        return Value::Bool(false);
    }
    for (x, y) in a.iter().zip(b) {
        let r = vmops::op_eq(x, y);
        if r.is_error() {
            return r;
        }
        if !bool_val(&r) {
            return Value::Bool(false);
        }
    }
    Value::Bool(true)
}

fn list_str(this: &Value) -> Value {
    let elems = with_list(this, |elems| elems.clone()).unwrap_or_default();
    render_elems(&elems, '[', ']')
}

fn list_nonzero(this: &Value) -> bool {
    with_list(this, |elems| !elems.is_empty()).unwrap_or(false)
}

fn list_len(this: &Value) -> Value {
    Value::Int(with_list(this, |elems| elems.len()).unwrap_or(0) as i64)
}

fn list_get(this: &Value, index: &Value) -> Value {
    let idx = match index {
        Value::Int(i) => *i,
        _ => {
            return errors::type_exc(format!(
                "list indices must be integers (got a {})",
                class_of(index).name
            ))
        }
    };
    with_list(this, |elems| {
        if idx < 0 || idx as usize >= elems.len() {
            errors::index_exc_out_of_bounds(idx, elems.len())
        } else {
            elems[idx as usize].clone()
        }
    })
    .unwrap_or(Value::Null)
}

fn list_set(this: &Value, index: &Value, value: &Value) -> Value {
    let idx = match index {
        Value::Int(i) => *i,
        _ => {
            return errors::type_exc(format!(
                "list indices must be integers (got a {})",
                class_of(index).name
            ))
        }
    };
    with_list(this, |elems| {
        if idx < 0 || idx as usize >= elems.len() {
            errors::index_exc_out_of_bounds(idx, elems.len())
        } else {
            elems[idx as usize] = value.clone();
            Value::Null
        }
    })
    .unwrap_or(Value::Null)
}

fn list_contains(this: &Value, needle: &Value) -> Value {
    let elems = with_list(this, |elems| elems.clone()).unwrap_or_default();
    for elem in &elems {
        let r = vmops::op_eq(elem, needle);
        if r.is_error() {
            return r;
        }
        if bool_val(&r) {
            return Value::Bool(true);
        }
    }
    Value::Bool(false)
}

fn list_apply(this: &Value, func: &Value, vm: &mut Vm) -> Value {
    let elems = with_list(this, |elems| elems.clone()).unwrap_or_default();
    let mut out = Vec::with_capacity(elems.len());
    for elem in &elems {
        let r = vmops::op_call(func, vm, std::slice::from_ref(elem), &[]);
        if r.is_error() {
            return r;
        }
        out.push(r);
    }
    list_value(out)
}

fn list_iapply(this: &Value, func: &Value, vm: &mut Vm) -> Value {
    let elems = with_list(this, |elems| elems.clone()).unwrap_or_default();
    let mut out = Vec::with_capacity(elems.len());
    for elem in &elems {
        let r = vmops::op_call(func, vm, std::slice::from_ref(elem), &[]);
        if r.is_error() {
            return r;
        }
        out.push(r);
    }
    with_list(this, |elems| *elems = out);
    this.clone()
}

fn list_iter(this: &Value) -> Value {
    let elems = with_list(this, |elems| elems.clone()).unwrap_or_default();
    seq_iter_value(elems)
}

fn list_append(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("append");
    }
    if args.len() != 1 {
        return errors::call_exc_num_args("append", args.len(), 1);
    }
    with_list(this, |elems| elems.push(args[0].clone()));
    Value::Null
}

fn list_pop(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("pop");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("pop", args.len(), 0);
    }
    with_list(this, |elems| match elems.pop() {
        Some(v) => v,
        None => errors::index_exc("pop from an empty list".to_string()),
    })
    .unwrap_or(Value::Null)
}

static LIST_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(list_nonzero),
    ..NumMethods::DEFAULT
};

static LIST_SEQ_METHODS: SeqMethods = SeqMethods {
    len: Some(list_len),
    get: Some(list_get),
    set: Some(list_set),
    contains: Some(list_contains),
    apply: Some(list_apply),
    iapply: Some(list_iapply),
};

static LIST_METHODS: [MethodDesc; 2] = [
    MethodDesc { name: "append", func: list_append },
    MethodDesc { name: "pop", func: list_pop },
];

pub static LIST_CLASS: Class = Class {
    name: "List",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(list_eq),
    str_: Some(list_str),
    iter: Some(list_iter),
    num_methods: Some(&LIST_NUM_METHODS),
    seq_methods: Some(&LIST_SEQ_METHODS),
    methods: &LIST_METHODS,
    init: None,
    hash: None,
    cmp: None,
    call: None,
    iternext: None,
    members: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Tuple --------------------------------------------------------------

fn tuplev(v: &Value) -> &[Value] {
    match v.as_obj().map(|o| o.payload()) {
        Some(Payload::Tuple(elems)) => elems,
        _ => &[],
    }
}

fn tuple_eq(this: &Value, other: &Value) -> Value {
    match other.as_obj().map(|o| o.payload()) {
        Some(Payload::Tuple(b)) => elems_eq(tuplev(this), b),
        _ => Value::Bool(false),
    }
}

fn tuple_hash(this: &Value) -> Value {
    let mut h: i64 = 17;
    for elem in tuplev(this) {
        let r = vmops::op_hash(elem);
        match r {
            Value::Int(x) => h = h.wrapping_mul(31).wrapping_add(x),
            other => return other,
        }
    }
    Value::Int(h)
}

fn tuple_str(this: &Value) -> Value {
    render_elems(tuplev(this), '(', ')')
}

fn tuple_nonzero(this: &Value) -> bool {
    !tuplev(this).is_empty()
}

fn tuple_len(this: &Value) -> Value {
    Value::Int(tuplev(this).len() as i64)
}

fn tuple_get(this: &Value, index: &Value) -> Value {
    let idx = match index {
        Value::Int(i) => *i,
        _ => {
            return errors::type_exc(format!(
                "tuple indices must be integers (got a {})",
                class_of(index).name
            ))
        }
    };
    let elems = tuplev(this);
    if idx < 0 || idx as usize >= elems.len() {
        return errors::index_exc_out_of_bounds(idx, elems.len());
    }
    elems[idx as usize].clone()
}

fn tuple_contains(this: &Value, needle: &Value) -> Value {
    for elem in tuplev(this) {
        let r = vmops::op_eq(elem, needle);
        if r.is_error() {
            return r;
        }
        if bool_val(&r) {
            return Value::Bool(true);
        }
    }
    Value::Bool(false)
}

fn tuple_iter(this: &Value) -> Value {
    seq_iter_value(tuplev(this).to_vec())
}

static TUPLE_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(tuple_nonzero),
    ..NumMethods::DEFAULT
};

static TUPLE_SEQ_METHODS: SeqMethods = SeqMethods {
    len: Some(tuple_len),
    get: Some(tuple_get),
    contains: Some(tuple_contains),
    ..SeqMethods::DEFAULT
};

pub static TUPLE_CLASS: Class = Class {
    name: "Tuple",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(tuple_eq),
    hash: Some(tuple_hash),
    str_: Some(tuple_str),
    iter: Some(tuple_iter),
    num_methods: Some(&TUPLE_NUM_METHODS),
    seq_methods: Some(&TUPLE_SEQ_METHODS),
    init: None,
    cmp: None,
    call: None,
    iternext: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Set ----------------------------------------------------------------

fn with_set<R>(v: &Value, f: impl FnOnce(&mut HashSet<HashKey, RandomState>) -> R) -> Option<R> {
    match v.as_obj().map(|o| o.payload()) {
        Some(Payload::Set(set)) => Some(f(&mut set.lock().unwrap())),
        _ => None,
    }
}

fn set_elems(v: &Value) -> Vec<Value> {
    with_set(v, |set| set.iter().map(|k| k.0.clone()).collect()).unwrap_or_default()
}

fn set_eq(this: &Value, other: &Value) -> Value {
    let a = match with_set(this, |set| set.clone()) {
        Some(set) => set,
        None => return Value::Bool(false),
    };
    match with_set(other, |set| set.clone()) {
        Some(b) => Value::Bool(a == b),
        None => Value::Bool(false),
    }
}

fn set_str(this: &Value) -> Value {
    let elems = set_elems(this);
    if elems.is_empty() {
        return str_value("{}".to_string());
    }
    render_elems(&elems, '{', '}')
}

fn set_nonzero(this: &Value) -> bool {
    with_set(this, |set| !set.is_empty()).unwrap_or(false)
}

fn set_len(this: &Value) -> Value {
    Value::Int(with_set(this, |set| set.len()).unwrap_or(0) as i64)
}

fn set_contains(this: &Value, needle: &Value) -> Value {
    match HashKey::try_new(needle.clone()) {
        Ok(key) => Value::Bool(with_set(this, |set| set.contains(&key)).unwrap_or(false)),
        Err(class) => errors::type_exc_unhashable(class),
    }
}

fn set_iter(this: &Value) -> Value {
    seq_iter_value(set_elems(this))
}

fn set_add(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("add");
    }
    if args.len() != 1 {
        return errors::call_exc_num_args("add", args.len(), 1);
    }
    match HashKey::try_new(args[0].clone()) {
        Ok(key) => {
            with_set(this, |set| set.insert(key));
            Value::Null
        }
        Err(class) => errors::type_exc_unhashable(class),
    }
}

fn set_remove(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("remove");
    }
    if args.len() != 1 {
        return errors::call_exc_num_args("remove", args.len(), 1);
    }
    match HashKey::try_new(args[0].clone()) {
        Ok(key) => {
            let removed = with_set(this, |set| set.remove(&key)).unwrap_or(false);
            if removed {
                Value::Null
            } else {
                errors::index_exc_key_not_found()
            }
        }
        Err(class) => errors::type_exc_unhashable(class),
    }
}

static SET_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(set_nonzero),
    ..NumMethods::DEFAULT
};

static SET_SEQ_METHODS: SeqMethods = SeqMethods {
    len: Some(set_len),
    contains: Some(set_contains),
    ..SeqMethods::DEFAULT
};

static SET_METHODS: [MethodDesc; 2] = [
    MethodDesc { name: "add", func: set_add },
    MethodDesc { name: "remove", func: set_remove },
];

pub static SET_CLASS: Class = Class {
    name: "Set",
    super_: Some(&crate::class::OBJ_CLASS),
    eq: Some(set_eq),
    str_: Some(set_str),
    iter: Some(set_iter),
    num_methods: Some(&SET_NUM_METHODS),
    seq_methods: Some(&SET_SEQ_METHODS),
    methods: &SET_METHODS,
    init: None,
    hash: None,
    cmp: None,
    call: None,
    iternext: None,
    members: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Dict ---------------------------------------------------------------

fn with_dict<R>(
    v: &Value,
    f: impl FnOnce(&mut HashMap<HashKey, Value, RandomState>) -> R,
) -> Option<R> {
    match v.as_obj().map(|o| o.payload()) {
        Some(Payload::Dict(dict)) => Some(f(&mut dict.lock().unwrap())),
        _ => None,
    }
}

fn dict_str(this: &Value) -> Value {
    let pairs: Vec<(Value, Value)> = with_dict(this, |dict| {
        dict.iter().map(|(k, v)| (k.0.clone(), v.clone())).collect()
    })
    .unwrap_or_default();

    let mut parts = Vec::with_capacity(pairs.len());
    for (k, v) in &pairs {
        let ks = vmops::op_str(k);
        if ks.is_error() {
            return ks;
        }
        let vs = vmops::op_str(v);
        if vs.is_error() {
            return vs;
        }
        parts.push(format!("{}: {}", strv(&ks), strv(&vs)));
    }
    str_value(format!("{{{}}}", parts.join(", ")))
}

fn dict_nonzero(this: &Value) -> bool {
    with_dict(this, |dict| !dict.is_empty()).unwrap_or(false)
}

fn dict_len(this: &Value) -> Value {
    Value::Int(with_dict(this, |dict| dict.len()).unwrap_or(0) as i64)
}

fn dict_get_impl(this: &Value, key: &Value) -> Result<Option<Value>, Value> {
    let key = HashKey::try_new(key.clone()).map_err(errors::type_exc_unhashable)?;
    Ok(with_dict(this, |dict| dict.get(&key).cloned()).unwrap_or(None))
}

fn dict_get(this: &Value, key: &Value) -> Value {
    match dict_get_impl(this, key) {
        Ok(Some(v)) => v,
        Ok(None) => errors::index_exc_key_not_found(),
        Err(e) => e,
    }
}

fn dict_set(this: &Value, key: &Value, value: &Value) -> Value {
    match HashKey::try_new(key.clone()) {
        Ok(key) => {
            with_dict(this, |dict| dict.insert(key, value.clone()));
            Value::Null
        }
        Err(class) => errors::type_exc_unhashable(class),
    }
}

fn dict_contains(this: &Value, key: &Value) -> Value {
    match HashKey::try_new(key.clone()) {
        Ok(key) => Value::Bool(with_dict(this, |dict| dict.contains_key(&key)).unwrap_or(false)),
        Err(class) => errors::type_exc_unhashable(class),
    }
}

fn dict_iter(this: &Value) -> Value {
    let keys = with_dict(this, |dict| dict.keys().map(|k| k.0.clone()).collect::<Vec<_>>())
        .unwrap_or_default();
    seq_iter_value(keys)
}

fn dict_get_method(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("get");
    }
    if args.is_empty() || args.len() > 2 {
        return errors::call_exc_num_args_between("get", args.len(), 1, 2);
    }
    match dict_get_impl(this, &args[0]) {
        Ok(Some(v)) => v,
        Ok(None) => args.get(1).cloned().unwrap_or(Value::Null),
        Err(e) => e,
    }
}

fn dict_keys_method(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("keys");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("keys", args.len(), 0);
    }
    let keys = with_dict(this, |dict| dict.keys().map(|k| k.0.clone()).collect::<Vec<_>>())
        .unwrap_or_default();
    list_value(keys)
}

fn dict_values_method(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("values");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("values", args.len(), 0);
    }
    let values =
        with_dict(this, |dict| dict.values().cloned().collect::<Vec<_>>()).unwrap_or_default();
    list_value(values)
}

static DICT_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(dict_nonzero),
    ..NumMethods::DEFAULT
};

static DICT_SEQ_METHODS: SeqMethods = SeqMethods {
    len: Some(dict_len),
    get: Some(dict_get),
    set: Some(dict_set),
    contains: Some(dict_contains),
    ..SeqMethods::DEFAULT
};

static DICT_METHODS: [MethodDesc; 3] = [
    MethodDesc { name: "get", func: dict_get_method },
    MethodDesc { name: "keys", func: dict_keys_method },
    MethodDesc { name: "values", func: dict_values_method },
];

pub static DICT_CLASS: Class = Class {
    name: "Dict",
    super_: Some(&crate::class::OBJ_CLASS),
    str_: Some(dict_str),
    iter: Some(dict_iter),
    num_methods: Some(&DICT_NUM_METHODS),
    seq_methods: Some(&DICT_SEQ_METHODS),
    methods: &DICT_METHODS,
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    call: None,
    iternext: None,
    members: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- iterators ----------------------------------------------------------

fn iter_self(this: &Value) -> Value {
    this.clone()
}

fn iter_apply(this: &Value, func: &Value, _vm: &mut Vm) -> Value {
    Obj::new(
        &APPLIED_ITER_CLASS,
        Payload::AppliedIter(AppliedIter { source: this.clone(), func: func.clone() }),
    )
    .into_value()
}

static ITER_SEQ_METHODS: SeqMethods = SeqMethods {
    apply: Some(iter_apply),
    ..SeqMethods::DEFAULT
};

/// Base class for all iterators.
pub static ITER_CLASS: Class = Class {
    name: "Iter",
    super_: Some(&crate::class::OBJ_CLASS),
    iter: Some(iter_self),
    seq_methods: Some(&ITER_SEQ_METHODS),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
    call: None,
    iternext: None,
    num_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

pub static ITER_STOP_CLASS: Class = Class {
    name: "IterStop",
    super_: Some(&crate::class::OBJ_CLASS),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
    call: None,
    iter: None,
    iternext: None,
    num_methods: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

fn seq_iter_next(this: &Value, _vm: &mut Vm) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::SeqIter(it)) => {
            let mut idx = it.idx.lock().unwrap();
            if *idx >= it.items.len() {
                iter_stop()
            } else {
                let v = it.items[*idx].clone();
                *idx += 1;
                v
            }
        }
        _ => iter_stop(),
    }
}

pub static SEQ_ITER_CLASS: Class = Class {
    name: "SeqIter",
    super_: Some(&ITER_CLASS),
    iternext: Some(seq_iter_next),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
    call: None,
    iter: None,
    num_methods: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

fn applied_iter_next(this: &Value, vm: &mut Vm) -> Value {
    let (source, func) = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::AppliedIter(ai)) => (ai.source.clone(), ai.func.clone()),
        _ => return iter_stop(),
    };
    let next = vmops::op_iternext(&source, vm);
    if next.is_error() || is_iter_stop(&next) {
        return next;
    }
    vmops::op_call(&func, vm, &[next], &[])
}

pub static APPLIED_ITER_CLASS: Class = Class {
    name: "AppliedIter",
    super_: Some(&ITER_CLASS),
    iternext: Some(applied_iter_next),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
    call: None,
    iter: None,
    num_methods: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- Range --------------------------------------------------------------

/// `a .. b`: ascending ranges are half-open, descending ranges closed.
pub fn range_make(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Int(a), Value::Int(b)) => range_value(*a, *b),
        _ => errors::type_exc_unsupported_2("..", class_of(from), class_of(to)),
    }
}

fn range_iternext(this: &Value, _vm: &mut Vm) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Range(state)) => {
            let mut state = state.lock().unwrap();
            let (from, to, i) = (state.from, state.to, state.i);
            if to >= from {
                if i < to {
                    state.i += 1;
                    Value::Int(i)
                } else {
                    iter_stop()
                }
            } else if i >= to {
                state.i -= 1;
                Value::Int(i)
            } else {
                iter_stop()
            }
        }
        _ => iter_stop(),
    }
}

fn range_contains(this: &Value, n: &Value) -> Value {
    let target = match n {
        Value::Int(i) => *i,
        _ => return Value::Bool(false),
    };
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Range(state)) => {
            let state = state.lock().unwrap();
            let (from, to) = (state.from, state.to);
            Value::Bool(if to >= from {
                from <= target && target < to
            } else {
                to <= target && target <= from
            })
        }
        _ => Value::Bool(false),
    }
}

fn range_str(this: &Value) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Range(state)) => {
            let state = state.lock().unwrap();
            str_value(format!("{}..{}", state.from, state.to))
        }
        _ => Value::Null,
    }
}

static RANGE_SEQ_METHODS: SeqMethods = SeqMethods {
    contains: Some(range_contains),
    apply: Some(iter_apply),
    ..SeqMethods::DEFAULT
};

pub static RANGE_CLASS: Class = Class {
    name: "Range",
    super_: Some(&ITER_CLASS),
    str_: Some(range_str),
    iternext: Some(range_iternext),
    seq_methods: Some(&RANGE_SEQ_METHODS),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    call: None,
    iter: None,
    num_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- File ---------------------------------------------------------------

pub fn file_value(path: &str, mode: &str) -> Value {
    let (readable, writable) = match mode {
        "r" => (true, false),
        "w" => (false, true),
        "a" => (false, true),
        _ => return errors::io_exc(format!("unknown file mode '{}'", mode)),
    };

    let mut opts = std::fs::OpenOptions::new();
    opts.read(readable).write(mode == "w").append(mode == "a").create(writable);
    opts.truncate(mode == "w");

    let file = match opts.open(path) {
        Ok(f) => f,
        Err(_) => return errors::io_exc_cannot_open_file(path, mode),
    };

    let (reader, writer) = if readable {
        (Some(BufReader::new(file)), None)
    } else {
        (None, Some(file))
    };

    Obj::new(
        &FILE_CLASS,
        Payload::File(Mutex::new(FileState {
            path: path.to_string(),
            readable,
            writable,
            reader,
            writer,
        })),
    )
    .into_value()
}

fn with_file<R>(v: &Value, f: impl FnOnce(&mut FileState) -> R) -> Option<R> {
    match v.as_obj().map(|o| o.payload()) {
        Some(Payload::File(state)) => Some(f(&mut state.lock().unwrap())),
        _ => None,
    }
}

fn file_read(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("read");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("read", args.len(), 0);
    }
    with_file(this, |state| {
        let path = state.path.clone();
        match &mut state.reader {
            Some(reader) => {
                let mut out = String::new();
                match reader.read_to_string(&mut out) {
                    Ok(_) => str_value(out),
                    Err(_) => errors::io_exc_cannot_read_file(&path),
                }
            }
            None if !state.readable => errors::io_exc(format!(
                "file '{}' is not open for reading",
                path
            )),
            None => errors::io_exc_file_closed(&path),
        }
    })
    .unwrap_or(Value::Null)
}

fn file_readline(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("readline");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("readline", args.len(), 0);
    }
    with_file(this, |state| {
        let path = state.path.clone();
        match &mut state.reader {
            Some(reader) => {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => Value::Null,
                    Ok(_) => {
                        if line.ends_with('\n') {
                            line.pop();
                        }
                        str_value(line)
                    }
                    Err(_) => errors::io_exc_cannot_read_file(&path),
                }
            }
            None if !state.readable => errors::io_exc(format!(
                "file '{}' is not open for reading",
                path
            )),
            None => errors::io_exc_file_closed(&path),
        }
    })
    .unwrap_or(Value::Null)
}

fn file_write(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("write");
    }
    if args.len() != 1 {
        return errors::call_exc_num_args("write", args.len(), 1);
    }
    let text = match args[0].as_obj().map(|o| o.payload()) {
        Some(Payload::Str(s)) => s.clone(),
        _ => {
            return errors::type_exc(format!(
                "write() takes a Str argument (got a {})",
                class_of(&args[0]).name
            ))
        }
    };
    with_file(this, |state| {
        let path = state.path.clone();
        match &mut state.writer {
            Some(writer) => match writer.write_all(text.as_bytes()) {
                Ok(()) => Value::Null,
                Err(_) => errors::io_exc_cannot_write_file(&path),
            },
            None if !state.writable => errors::io_exc(format!(
                "file '{}' is not open for writing",
                path
            )),
            None => errors::io_exc_file_closed(&path),
        }
    })
    .unwrap_or(Value::Null)
}

fn file_close(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("close");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("close", args.len(), 0);
    }
    with_file(this, |state| {
        state.reader = None;
        state.writer = None;
    });
    Value::Null
}

fn file_str(this: &Value) -> Value {
    let path = with_file(this, |state| state.path.clone()).unwrap_or_default();
    str_value(format!("<File '{}'>", path))
}

static FILE_METHODS: [MethodDesc; 4] = [
    MethodDesc { name: "read", func: file_read },
    MethodDesc { name: "readline", func: file_readline },
    MethodDesc { name: "write", func: file_write },
    MethodDesc { name: "close", func: file_close },
];

pub static FILE_CLASS: Class = Class {
    name: "File",
    super_: Some(&crate::class::OBJ_CLASS),
    str_: Some(file_str),
    methods: &FILE_METHODS,
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    call: None,
    iter: None,
    iternext: None,
    num_methods: None,
    seq_methods: None,
    members: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};
