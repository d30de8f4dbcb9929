// File: src/value.rs
//
// The Value tagged union and the heap object representation.
//
// A stack slot, local, or container element owns one reference to whatever
// it holds; `Obj` is an `Arc`, so cloning retains and dropping releases.
// The last three tags are internal sentinels that never appear on the value
// stack of a user-visible operation: the dispatchers fold `Unsupported` and
// `DivByZero` into exceptions/errors before anything is pushed.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use ahash::RandomState;

use crate::actor::{ActorState, FutureState, MessageData};
use crate::class::{Class, MethodFunc, NativeFn};
use crate::codeobject::CodeObject;
use crate::errors::{Error, ExcData};
use crate::function::{FuncData, GenState, ProxyData};
use crate::module::ModuleData;
use crate::objects::{AppliedIter, FileState, RangeState, SeqIter};

/// String-keyed dictionary used for exports, module contents, and builtins.
pub type StrDict = HashMap<String, Value, RandomState>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Marks "slot not written" in locals and argument binding.
    #[default]
    Empty,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Obj(Obj),
    /// An exception object in the raised state.
    Exc(Obj),
    /// Fatal internal error; not catchable by user code.
    Error(Box<Error>),
    /// Per-op sentinel: operand types not supported by the slot.
    Unsupported,
    /// Per-op sentinel: division or modulo by zero.
    DivByZero,
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Anything the evaluator must treat as an in-flight failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Exc(_) | Value::Error(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric coercion to f64 for Int/Float values.
    pub fn as_float_force(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            _ => 0.0,
        }
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Obj(o) | Value::Exc(o) => Some(o),
            _ => None,
        }
    }
}

/// A reference-counted heap object: class pointer plus payload.
#[derive(Debug, Clone)]
pub struct Obj(pub Arc<ObjCore>);

#[derive(Debug)]
pub struct ObjCore {
    pub class: &'static Class,
    pub payload: Payload,
}

impl Obj {
    pub fn new(class: &'static Class, payload: Payload) -> Obj {
        Obj(Arc::new(ObjCore { class, payload }))
    }

    pub fn class(&self) -> &'static Class {
        self.0.class
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// Pointer identity.
    pub fn is(&self, other: &Obj) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn into_value(self) -> Value {
        Value::Obj(self)
    }
}

#[derive(Debug)]
pub enum Payload {
    Str(String),
    List(Mutex<Vec<Value>>),
    Tuple(Vec<Value>),
    Set(Mutex<HashSet<HashKey, RandomState>>),
    Dict(Mutex<HashMap<HashKey, Value, RandomState>>),
    Range(Mutex<RangeState>),
    SeqIter(SeqIter),
    AppliedIter(AppliedIter),
    IterStop,
    File(Mutex<FileState>),
    Code(Arc<CodeObject>),
    Func(FuncData),
    GenProxy(ProxyData),
    Gen(GenState),
    ActorProxy(ProxyData),
    Actor(ActorState),
    Future(FutureState),
    Message(MessageData),
    Method { binder: Value, func: MethodFunc },
    NativeFunc(NativeFn),
    Module(ModuleData),
    Class(&'static Class),
    Exc(ExcData),
}

impl Payload {
    pub fn as_code(&self) -> Option<&Arc<CodeObject>> {
        match self {
            Payload::Code(co) => Some(co),
            _ => None,
        }
    }
}

/// Hashable key wrapper for Dict and Set storage. Only Null, Bool, Int,
/// Float, Str, and Tuple-of-hashable values may be keys; `try_new` rejects
/// the rest so the caller can raise a TypeException.
#[derive(Debug, Clone)]
pub struct HashKey(pub Value);

impl HashKey {
    pub fn try_new(v: Value) -> Result<HashKey, &'static Class> {
        if hashable(&v) {
            Ok(HashKey(v))
        } else {
            Err(crate::vmops::class_of(&v))
        }
    }
}

fn hashable(v: &Value) -> bool {
    match v {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => true,
        Value::Obj(o) => match o.payload() {
            Payload::Str(_) => true,
            Payload::Tuple(elems) => elems.iter().all(hashable),
            _ => false,
        },
        _ => false,
    }
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                // normalize -0.0 so it shares a bucket with 0.0
                let f = if *f == 0.0 { 0.0 } else { *f };
                f.to_bits().hash(state);
            }
            Value::Obj(o) => match o.payload() {
                Payload::Str(s) => {
                    4u8.hash(state);
                    s.hash(state);
                }
                Payload::Tuple(elems) => {
                    5u8.hash(state);
                    for elem in elems {
                        HashKey(elem.clone()).hash(state);
                    }
                }
                _ => 6u8.hash(state),
            },
            _ => 7u8.hash(state),
        }
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &HashKey) -> bool {
        key_eq(&self.0, &other.0)
    }
}

impl Eq for HashKey {}

fn key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => match (x.payload(), y.payload()) {
            (Payload::Str(s), Payload::Str(t)) => s == t,
            (Payload::Tuple(xs), Payload::Tuple(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(e, f)| key_eq(e, f))
            }
            _ => x.is(y),
        },
        _ => false,
    }
}

// Actors move Values across threads; everything a Value can hold must be
// Send + Sync.
#[allow(dead_code)]
fn _assert_value_send_sync() {
    fn is_send_sync<T: Send + Sync>() {}
    is_send_sync::<Value>();
}
