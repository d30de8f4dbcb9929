// File: src/module.rs
//
// Module values, the built-in module registry, and `.rhoc` disk loading.
//
// A module's contents is a string-keyed dictionary of its exports.
// Built-in modules carry a one-shot initializer that builds the dictionary
// the first time the module is imported; external plug-in loaders can
// register additional modules through `register_module`.

use once_cell::sync::OnceCell;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use ahash::RandomState;
use rand::Rng;

use crate::bytecode::RHOC_EXT;
use crate::class::{native_func_value, Class};
use crate::errors;
use crate::objects::{file_value, str_value};
use crate::value::{Obj, Payload, StrDict, Value};
use crate::vm::Vm;
use crate::vmops::class_of;

#[derive(Debug)]
pub struct ModuleData {
    pub name: String,
    pub contents: StrDict,
}

fn module_attr_get(this: &Value, attr: &str) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Module(data)) => match data.contents.get(attr) {
            Some(v) => v.clone(),
            None => errors::attr_exc(format!(
                "module '{}' has no attribute '{}'",
                data.name, attr
            )),
        },
        _ => errors::attr_exc_not_found(&MODULE_CLASS, attr),
    }
}

fn module_attr_set(_this: &Value, _attr: &str, _v: &Value) -> Value {
    errors::attr_exc("cannot re-assign module attributes".to_string())
}

fn module_str(this: &Value) -> Value {
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Module(data)) => str_value(format!("<module '{}'>", data.name)),
        _ => Value::Null,
    }
}

pub static MODULE_CLASS: Class = Class {
    name: "Module",
    super_: Some(&crate::class::OBJ_CLASS),
    str_: Some(module_str),
    attr_get: Some(module_attr_get),
    attr_set: Some(module_attr_set),
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
    methods: &[],
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

pub fn module_value(name: &str, contents: StrDict) -> Value {
    Obj::new(
        &MODULE_CLASS,
        Payload::Module(ModuleData { name: name.to_string(), contents }),
    )
    .into_value()
}

// --- disk loading --------------------------------------------------------

pub enum LoadError {
    NotFound,
}

/// Reads `<name>.rhoc` (or `name` as-is when it already has the extension).
pub fn load_file_bytes(name: &str) -> Result<Vec<u8>, LoadError> {
    let path = if name.ends_with(RHOC_EXT) {
        name.to_string()
    } else {
        format!("{}{}", name, RHOC_EXT)
    };
    if !Path::new(&path).exists() {
        return Err(LoadError::NotFound);
    }
    std::fs::read(&path).map_err(|_| LoadError::NotFound)
}

// --- built-in module registry --------------------------------------------

struct BuiltinModule {
    init: fn() -> StrDict,
    cached: Option<Value>,
}

static BUILTIN_MODULES: Lazy<Mutex<HashMap<String, BuiltinModule, RandomState>>> =
    Lazy::new(|| {
        let mut map: HashMap<String, BuiltinModule, RandomState> = HashMap::default();
        map.insert("math".to_string(), BuiltinModule { init: math_contents, cached: None });
        map.insert("io".to_string(), BuiltinModule { init: io_contents, cached: None });
        Mutex::new(map)
    });

/// Looks up a built-in module, running its initializer on first use.
pub fn builtin_module(name: &str) -> Option<Value> {
    let mut registry = BUILTIN_MODULES.lock().unwrap();
    let entry = registry.get_mut(name)?;
    if entry.cached.is_none() {
        entry.cached = Some(module_value(name, (entry.init)()));
    }
    entry.cached.clone()
}

/// Registers a ready-made module under `name`; used by plug-in loaders.
pub fn register_module(name: &str, contents: StrDict) {
    let mut registry = BUILTIN_MODULES.lock().unwrap();
    registry.insert(
        name.to_string(),
        BuiltinModule { init: StrDict::default, cached: Some(module_value(name, contents)) },
    );
}

// --- math module ---------------------------------------------------------

macro_rules! math_unary {
    ($name:ident, $label:literal, $f:expr) => {
        fn $name(_vm: &mut Vm, args: &[Value]) -> Value {
            if args.len() != 1 {
                return errors::call_exc_num_args($label, args.len(), 1);
            }
            if !args[0].is_number() {
                return errors::type_exc_unsupported_1($label, class_of(&args[0]));
            }
            $f(args[0].as_float_force())
        }
    };
}

math_unary!(math_cos, "cos", |d: f64| Value::Float(d.cos()));
math_unary!(math_sin, "sin", |d: f64| Value::Float(d.sin()));
math_unary!(math_sqrt, "sqrt", |d: f64| Value::Float(d.sqrt()));
math_unary!(math_floor, "floor", |d: f64| Value::Int(d.floor() as i64));
math_unary!(math_ceil, "ceil", |d: f64| Value::Int(d.ceil() as i64));
math_unary!(math_log, "log", |d: f64| Value::Float(d.ln()));

fn math_abs(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return errors::call_exc_num_args("abs", args.len(), 1);
    }
    match &args[0] {
        Value::Int(i) => Value::Int(i.wrapping_abs()),
        Value::Float(f) => Value::Float(f.abs()),
        other => errors::type_exc_unsupported_1("abs", class_of(other)),
    }
}

fn math_random(_vm: &mut Vm, args: &[Value]) -> Value {
    if !args.is_empty() {
        return errors::call_exc_num_args("random", args.len(), 0);
    }
    Value::Float(rand::thread_rng().gen::<f64>())
}

fn math_contents() -> StrDict {
    let mut contents = StrDict::default();
    contents.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
    contents.insert("e".to_string(), Value::Float(std::f64::consts::E));
    contents.insert("cos".to_string(), native_func_value(math_cos));
    contents.insert("sin".to_string(), native_func_value(math_sin));
    contents.insert("sqrt".to_string(), native_func_value(math_sqrt));
    contents.insert("floor".to_string(), native_func_value(math_floor));
    contents.insert("ceil".to_string(), native_func_value(math_ceil));
    contents.insert("abs".to_string(), native_func_value(math_abs));
    contents.insert("log".to_string(), native_func_value(math_log));
    contents.insert("random".to_string(), native_func_value(math_random));
    contents
}

// --- io module -----------------------------------------------------------

fn io_open(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.is_empty() || args.len() > 2 {
        return errors::call_exc_num_args_between("open", args.len(), 1, 2);
    }
    let path = match args[0].as_obj().map(|o| o.payload()) {
        Some(Payload::Str(s)) => s.clone(),
        _ => return errors::type_exc_unsupported_1("open", class_of(&args[0])),
    };
    let mode = match args.get(1) {
        None => "r".to_string(),
        Some(v) => match v.as_obj().map(|o| o.payload()) {
            Some(Payload::Str(s)) => s.clone(),
            _ => return errors::type_exc_unsupported_2("open", class_of(&args[0]), class_of(v)),
        },
    };
    file_value(&path, &mode)
}

fn io_contents() -> StrDict {
    let mut contents = StrDict::default();
    contents.insert("open".to_string(), native_func_value(io_open));
    contents
}
