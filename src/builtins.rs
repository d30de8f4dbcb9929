// File: src/builtins.rs
//
// The global builtins dictionary: native functions, the `true`/`false`
// singletons, and every built-in class by name. Free variables compile to
// LOAD_NAME, which resolves here at run time.

use once_cell::sync::Lazy;

use crate::actor::{ACTOR_CLASS, ACTOR_PROXY_CLASS, FUTURE_CLASS, MESSAGE_CLASS};
use crate::class::{class_value, native_func_value, META_CLASS, METHOD_CLASS, NATIVE_FUNC_CLASS, OBJ_CLASS};
use crate::codeobject::CODE_CLASS;
use crate::errors::{self, EXC_CLASSES};
use crate::function::{FUNC_CLASS, GEN_CLASS, GEN_PROXY_CLASS};
use crate::module::MODULE_CLASS;
use crate::objects::{
    APPLIED_ITER_CLASS, BOOL_CLASS, DICT_CLASS, FILE_CLASS, FLOAT_CLASS, INT_CLASS, ITER_CLASS,
    ITER_STOP_CLASS, LIST_CLASS, NULL_CLASS, RANGE_CLASS, SEQ_ITER_CLASS, SET_CLASS, STR_CLASS,
    TUPLE_CLASS,
};
use crate::value::{StrDict, Value};
use crate::vm::Vm;
use crate::vmops;

fn builtin_hash(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("hash", args.len(), 1);
    }
    vmops::op_hash(&args[0])
}

fn builtin_str(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("str", args.len(), 1);
    }
    vmops::op_str(&args[0])
}

fn builtin_len(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("len", args.len(), 1);
    }
    vmops::op_len(&args[0])
}

fn builtin_iter(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("iter", args.len(), 1);
    }
    vmops::op_iter(&args[0])
}

fn builtin_next(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("next", args.len(), 1);
    }
    vmops::op_iternext(&args[0], vm)
}

fn builtin_type(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("type", args.len(), 1);
    }
    class_value(vmops::class_of(&args[0]))
}

static BUILTINS: Lazy<StrDict> = Lazy::new(|| {
    let mut dict = StrDict::default();

    dict.insert("true".to_string(), Value::Bool(true));
    dict.insert("false".to_string(), Value::Bool(false));

    dict.insert("hash".to_string(), native_func_value(builtin_hash));
    dict.insert("str".to_string(), native_func_value(builtin_str));
    dict.insert("len".to_string(), native_func_value(builtin_len));
    dict.insert("iter".to_string(), native_func_value(builtin_iter));
    dict.insert("next".to_string(), native_func_value(builtin_next));
    dict.insert("type".to_string(), native_func_value(builtin_type));

    let classes = [
        &OBJ_CLASS,
        &META_CLASS,
        &NULL_CLASS,
        &BOOL_CLASS,
        &INT_CLASS,
        &FLOAT_CLASS,
        &STR_CLASS,
        &LIST_CLASS,
        &TUPLE_CLASS,
        &SET_CLASS,
        &DICT_CLASS,
        &RANGE_CLASS,
        &ITER_CLASS,
        &SEQ_ITER_CLASS,
        &APPLIED_ITER_CLASS,
        &ITER_STOP_CLASS,
        &FILE_CLASS,
        &CODE_CLASS,
        &FUNC_CLASS,
        &GEN_PROXY_CLASS,
        &GEN_CLASS,
        &ACTOR_PROXY_CLASS,
        &ACTOR_CLASS,
        &FUTURE_CLASS,
        &MESSAGE_CLASS,
        &METHOD_CLASS,
        &NATIVE_FUNC_CLASS,
        &MODULE_CLASS,
    ];
    for class in classes {
        dict.insert(class.name.to_string(), class_value(class));
    }
    for class in EXC_CLASSES {
        dict.insert(class.name.to_string(), class_value(class));
    }

    dict
});

/// Resolves a free variable against the builtins dictionary.
pub fn lookup(name: &str) -> Option<Value> {
    BUILTINS.get(name).cloned()
}
