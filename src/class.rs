// File: src/class.rs
//
// Class records and method resolution.
//
// Every value has a class; classes hold optional operation slots plus
// number/sequence method tables, member and method descriptors, and an
// attribute dictionary. Lookup walks the super-chain; the result is
// memoized per class in a once-computed record, so steady-state dispatch
// is a single load.

use ahash::RandomState;
use once_cell::sync::OnceCell;
use std::collections::HashMap;

use crate::value::{Obj, Payload, Value};
use crate::vm::Vm;

pub type UnFunc = fn(&Value) -> Value;
pub type BinFunc = fn(&Value, &Value) -> Value;
pub type BoolFunc = fn(&Value) -> bool;
pub type SeqSetFunc = fn(&Value, &Value, &Value) -> Value;
/// Slots that may re-enter the evaluator take the VM.
pub type CallFunc = fn(&Value, &mut Vm, &[Value], &[Value]) -> Value;
pub type MethodFunc = CallFunc;
pub type NativeFn = fn(&mut Vm, &[Value]) -> Value;
pub type IterNextFunc = fn(&Value, &mut Vm) -> Value;
pub type ApplyFunc = fn(&Value, &Value, &mut Vm) -> Value;
pub type InitFunc = fn(&'static Class, &[Value]) -> Value;
pub type AttrGetFunc = fn(&Value, &str) -> Value;
pub type AttrSetFunc = fn(&Value, &str, &Value) -> Value;
pub type MemberGetFunc = fn(&Obj) -> Value;
pub type MemberSetFunc = fn(&Obj, &Value) -> Value;

/// Arithmetic slot table, including in-place and reflected families.
#[derive(Clone, Copy)]
pub struct NumMethods {
    pub plus: Option<UnFunc>,
    pub minus: Option<UnFunc>,
    pub abs: Option<UnFunc>,

    pub add: Option<BinFunc>,
    pub sub: Option<BinFunc>,
    pub mul: Option<BinFunc>,
    pub div: Option<BinFunc>,
    pub mod_: Option<BinFunc>,
    pub pow: Option<BinFunc>,

    pub bitnot: Option<UnFunc>,
    pub bitand: Option<BinFunc>,
    pub bitor: Option<BinFunc>,
    pub xor: Option<BinFunc>,
    pub shiftl: Option<BinFunc>,
    pub shiftr: Option<BinFunc>,

    pub iadd: Option<BinFunc>,
    pub isub: Option<BinFunc>,
    pub imul: Option<BinFunc>,
    pub idiv: Option<BinFunc>,
    pub imod: Option<BinFunc>,
    pub ipow: Option<BinFunc>,
    pub ibitand: Option<BinFunc>,
    pub ibitor: Option<BinFunc>,
    pub ixor: Option<BinFunc>,
    pub ishiftl: Option<BinFunc>,
    pub ishiftr: Option<BinFunc>,

    pub radd: Option<BinFunc>,
    pub rsub: Option<BinFunc>,
    pub rmul: Option<BinFunc>,
    pub rdiv: Option<BinFunc>,
    pub rmod: Option<BinFunc>,
    pub rpow: Option<BinFunc>,
    pub rbitand: Option<BinFunc>,
    pub rbitor: Option<BinFunc>,
    pub rxor: Option<BinFunc>,
    pub rshiftl: Option<BinFunc>,
    pub rshiftr: Option<BinFunc>,

    pub nonzero: Option<BoolFunc>,

    pub to_int: Option<UnFunc>,
    pub to_float: Option<UnFunc>,
}

impl NumMethods {
    pub const DEFAULT: NumMethods = NumMethods {
        plus: None,
        minus: None,
        abs: None,
        add: None,
        sub: None,
        mul: None,
        div: None,
        mod_: None,
        pow: None,
        bitnot: None,
        bitand: None,
        bitor: None,
        xor: None,
        shiftl: None,
        shiftr: None,
        iadd: None,
        isub: None,
        imul: None,
        idiv: None,
        imod: None,
        ipow: None,
        ibitand: None,
        ibitor: None,
        ixor: None,
        ishiftl: None,
        ishiftr: None,
        radd: None,
        rsub: None,
        rmul: None,
        rdiv: None,
        rmod: None,
        rpow: None,
        rbitand: None,
        rbitor: None,
        rxor: None,
        rshiftl: None,
        rshiftr: None,
        nonzero: None,
        to_int: None,
        to_float: None,
    };
}

impl std::fmt::Debug for NumMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NumMethods {..}")
    }
}

/// Sequence slot table.
#[derive(Clone, Copy)]
pub struct SeqMethods {
    pub len: Option<UnFunc>,
    pub get: Option<BinFunc>,
    pub set: Option<SeqSetFunc>,
    pub contains: Option<BinFunc>,
    pub apply: Option<ApplyFunc>,
    pub iapply: Option<ApplyFunc>,
}

impl SeqMethods {
    pub const DEFAULT: SeqMethods = SeqMethods {
        len: None,
        get: None,
        set: None,
        contains: None,
        apply: None,
        iapply: None,
    };
}

impl std::fmt::Debug for SeqMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SeqMethods {..}")
    }
}

/// Member descriptor: a named field with accessor functions and assignment
/// flags. READONLY members reject writes; TYPE_STRICT members narrow the
/// assigned value's class.
pub struct Member {
    pub name: &'static str,
    pub get: MemberGetFunc,
    pub set: Option<MemberSetFunc>,
    pub readonly: bool,
    pub strict_type: Option<&'static Class>,
}

/// Method descriptor: a named function bound to its receiver on access.
pub struct MethodDesc {
    pub name: &'static str,
    pub func: MethodFunc,
}

#[derive(Debug, Clone, Copy)]
pub struct AttrEntry {
    pub is_method: bool,
    pub index: usize,
}

pub struct Class {
    pub name: &'static str,
    pub super_: Option<&'static Class>,

    pub init: Option<InitFunc>,

    pub eq: Option<BinFunc>,
    pub hash: Option<UnFunc>,
    pub cmp: Option<BinFunc>,
    pub str_: Option<UnFunc>,
    pub call: Option<CallFunc>,

    pub iter: Option<UnFunc>,
    pub iternext: Option<IterNextFunc>,

    pub num_methods: Option<&'static NumMethods>,
    pub seq_methods: Option<&'static SeqMethods>,

    pub members: &'static [Member],
    pub methods: &'static [MethodDesc],

    pub attr_get: Option<AttrGetFunc>,
    pub attr_set: Option<AttrSetFunc>,

    pub resolved: OnceCell<Resolved>,
    pub attr_dict: OnceCell<HashMap<&'static str, AttrEntry, RandomState>>,
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Class({})", self.name)
    }
}

/// Flattened slot record for one class, computed once.
#[derive(Debug)]
pub struct Resolved {
    pub eq: Option<BinFunc>,
    pub hash: Option<UnFunc>,
    pub cmp: Option<BinFunc>,
    pub str_: Option<UnFunc>,
    pub call: Option<CallFunc>,
    pub iter: Option<UnFunc>,
    pub iternext: Option<IterNextFunc>,
    pub attr_get: Option<AttrGetFunc>,
    pub attr_set: Option<AttrSetFunc>,
    pub num: NumMethods,
    pub seq: SeqMethods,
}

impl Class {
    pub const DEFAULT: Class = Class {
        name: "",
        super_: None,
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

    fn chain(&'static self) -> Vec<&'static Class> {
        let mut chain = Vec::new();
        let mut c = Some(self);
        while let Some(class) = c {
            chain.push(class);
            c = class.super_;
        }
        chain
    }

    /// The once-computed resolution record for this class.
    pub fn resolved(&'static self) -> &'static Resolved {
        self.resolved.get_or_init(|| {
            let chain = self.chain();

            macro_rules! slot {
                ($field:ident) => {
                    chain.iter().find_map(|c| c.$field)
                };
            }
            macro_rules! num_slot {
                ($field:ident) => {
                    chain
                        .iter()
                        .find_map(|c| c.num_methods.and_then(|n| n.$field))
                };
            }
            macro_rules! seq_slot {
                ($field:ident) => {
                    chain
                        .iter()
                        .find_map(|c| c.seq_methods.and_then(|s| s.$field))
                };
            }

            Resolved {
                eq: slot!(eq),
                hash: slot!(hash),
                cmp: slot!(cmp),
                str_: slot!(str_),
                call: slot!(call),
                iter: slot!(iter),
                iternext: slot!(iternext),
                attr_get: slot!(attr_get),
                attr_set: slot!(attr_set),
                num: NumMethods {
                    plus: num_slot!(plus),
                    minus: num_slot!(minus),
                    abs: num_slot!(abs),
                    add: num_slot!(add),
                    sub: num_slot!(sub),
                    mul: num_slot!(mul),
                    div: num_slot!(div),
                    mod_: num_slot!(mod_),
                    pow: num_slot!(pow),
                    bitnot: num_slot!(bitnot),
                    bitand: num_slot!(bitand),
                    bitor: num_slot!(bitor),
                    xor: num_slot!(xor),
                    shiftl: num_slot!(shiftl),
                    shiftr: num_slot!(shiftr),
                    iadd: num_slot!(iadd),
                    isub: num_slot!(isub),
                    imul: num_slot!(imul),
                    idiv: num_slot!(idiv),
                    imod: num_slot!(imod),
                    ipow: num_slot!(ipow),
                    ibitand: num_slot!(ibitand),
                    ibitor: num_slot!(ibitor),
                    ixor: num_slot!(ixor),
                    ishiftl: num_slot!(ishiftl),
                    ishiftr: num_slot!(ishiftr),
                    radd: num_slot!(radd),
                    rsub: num_slot!(rsub),
                    rmul: num_slot!(rmul),
                    rdiv: num_slot!(rdiv),
                    rmod: num_slot!(rmod),
                    rpow: num_slot!(rpow),
                    rbitand: num_slot!(rbitand),
                    rbitor: num_slot!(rbitor),
                    rxor: num_slot!(rxor),
                    rshiftl: num_slot!(rshiftl),
                    rshiftr: num_slot!(rshiftr),
                    nonzero: num_slot!(nonzero),
                    to_int: num_slot!(to_int),
                    to_float: num_slot!(to_float),
                },
                seq: SeqMethods {
                    len: seq_slot!(len),
                    get: seq_slot!(get),
                    set: seq_slot!(set),
                    contains: seq_slot!(contains),
                    apply: seq_slot!(apply),
                    iapply: seq_slot!(iapply),
                },
            }
        })
    }

    /// The class's own attribute dictionary (members and methods declared
    /// directly on it); lookups walk the super-chain over these.
    pub fn attr_dict(&'static self) -> &'static HashMap<&'static str, AttrEntry, RandomState> {
        self.attr_dict.get_or_init(|| {
            let mut dict = HashMap::default();
            for (index, member) in self.members.iter().enumerate() {
                dict.insert(member.name, AttrEntry { is_method: false, index });
            }
            for (index, method) in self.methods.iter().enumerate() {
                dict.insert(method.name, AttrEntry { is_method: true, index });
            }
            dict
        })
    }

    /// Finds `name` in this class or a superclass, returning the owning
    /// class together with the entry.
    pub fn find_attr(&'static self, name: &str) -> Option<(&'static Class, AttrEntry)> {
        let mut c = Some(self);
        while let Some(class) = c {
            if let Some(entry) = class.attr_dict().get(name) {
                return Some((class, *entry));
            }
            c = class.super_;
        }
        None
    }
}

pub fn is_subclass(child: &'static Class, parent: &'static Class) -> bool {
    let mut c = Some(child);
    while let Some(class) = c {
        if std::ptr::eq(class, parent) {
            return true;
        }
        c = class.super_;
    }
    false
}

/// Wraps a class as a first-class value (an object of the meta class).
pub fn class_value(class: &'static Class) -> Value {
    Obj::new(&META_CLASS, Payload::Class(class)).into_value()
}

// --- base and meta classes ---------------------------------------------

fn obj_eq(this: &Value, other: &Value) -> Value {
    match (this.as_obj(), other.as_obj()) {
        (Some(a), Some(b)) => Value::Bool(a.is(b)),
        _ => Value::Bool(false),
    }
}

fn obj_str(this: &Value) -> Value {
    let class = crate::vmops::class_of(this);
    let addr = this
        .as_obj()
        .map(|o| std::sync::Arc::as_ptr(&o.0) as usize)
        .unwrap_or(0);
    crate::objects::str_value(format!("<{} at {:#x}>", class.name, addr))
}

fn obj_nonzero(_this: &Value) -> bool {
    true
}

pub static OBJ_NUM_METHODS: NumMethods = NumMethods {
    nonzero: Some(obj_nonzero),
    ..NumMethods::DEFAULT
};

pub static OBJ_SEQ_METHODS: SeqMethods = SeqMethods::DEFAULT;

pub static OBJ_CLASS: Class = Class {
    name: "Object",
    super_: None,
    eq: Some(obj_eq),
    str_: Some(obj_str),
    num_methods: Some(&OBJ_NUM_METHODS),
    seq_methods: Some(&OBJ_SEQ_METHODS),
    init: None,
    hash: None,
    cmp: None,
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

fn meta_str(this: &Value) -> Value {
    let name = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Class(c)) => c.name,
        _ => "?",
    };
    crate::objects::str_value(format!("<class {}>", name))
}

fn meta_call(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    let class = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Class(c)) => *c,
        _ => return crate::errors::type_exc("object is not a class".to_string()),
    };
    if !named.is_empty() {
        return crate::errors::type_exc("constructors take no named arguments".to_string());
    }
    match class.init {
        Some(init) => init(class, args),
        None => crate::errors::type_exc(format!("cannot instantiate class {}", class.name)),
    }
}

pub static META_CLASS: Class = Class {
    name: "Class",
    super_: Some(&OBJ_CLASS),
    eq: Some(obj_eq),
    str_: Some(meta_str),
    call: Some(meta_call),
    init: None,
    hash: None,
    cmp: None,
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

// --- bound methods and native functions ---------------------------------

fn method_call(this: &Value, vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Method { binder, func }) => func(binder, vm, args, named),
        _ => crate::errors::type_exc("object is not a method".to_string()),
    }
}

pub static METHOD_CLASS: Class = Class {
    name: "Method",
    super_: Some(&OBJ_CLASS),
    call: Some(method_call),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
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

fn native_func_call(this: &Value, vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::NativeFunc(f)) => {
            if !named.is_empty() {
                return crate::errors::type_exc(
                    "native functions take no named arguments".to_string(),
                );
            }
            f(vm, args)
        }
        _ => crate::errors::type_exc("object is not callable".to_string()),
    }
}

pub static NATIVE_FUNC_CLASS: Class = Class {
    name: "NativeFunc",
    super_: Some(&OBJ_CLASS),
    call: Some(native_func_call),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
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

pub fn native_func_value(f: NativeFn) -> Value {
    Obj::new(&NATIVE_FUNC_CLASS, Payload::NativeFunc(f)).into_value()
}

pub fn method_value(binder: Value, func: MethodFunc) -> Value {
    Obj::new(&METHOD_CLASS, Payload::Method { binder, func }).into_value()
}
