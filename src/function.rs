// File: src/function.rs
//
// User functions and generators.
//
// A FuncObject call binds arguments into a frame (reusing the code
// object's persisted frame when it is free) and re-enters the dispatch
// loop. A generator call instead binds into a persistent frame owned by
// the Generator object; each iternext resumes that frame from its saved
// position until it returns IterStop.

use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

use crate::class::Class;
use crate::codeobject::CodeObject;
use crate::errors;
use crate::objects::{is_iter_stop, iter_stop};
use crate::value::{Obj, Payload, Value};
use crate::vm::{Frame, Vm};

/// Code plus default argument values.
#[derive(Debug)]
pub struct FuncData {
    pub co: Arc<CodeObject>,
    pub defaults: Vec<Value>,
}

/// Shared shape of generator and actor proxies: calling one instantiates
/// the generator / actor with the bound arguments.
#[derive(Debug)]
pub struct ProxyData {
    pub co: Arc<CodeObject>,
    pub defaults: Vec<Value>,
}

/// A live generator: its persistent frame, or None once exhausted.
#[derive(Debug)]
pub struct GenState {
    pub co: Arc<CodeObject>,
    pub frame: Mutex<Option<Box<Frame>>>,
}

pub fn func_value(co: Arc<CodeObject>, defaults: Vec<Value>) -> Value {
    Obj::new(&FUNC_CLASS, Payload::Func(FuncData { co, defaults })).into_value()
}

pub fn gen_proxy_value(co: Arc<CodeObject>, defaults: Vec<Value>) -> Value {
    Obj::new(&GEN_PROXY_CLASS, Payload::GenProxy(ProxyData { co, defaults })).into_value()
}

/// Takes the code object's persisted frame if it is free, else allocates.
fn acquire_frame(co: &Arc<CodeObject>) -> Box<Frame> {
    co.frame_pool
        .lock()
        .unwrap()
        .take()
        .unwrap_or_else(|| Box::new(Frame::new(co.clone())))
}

/// Re-attaches `frame` to its code object if the slot is empty.
fn release_frame(co: &Arc<CodeObject>, mut frame: Box<Frame>) {
    frame.reset();
    let mut slot = co.frame_pool.lock().unwrap();
    if slot.is_none() {
        *slot = Some(frame);
    }
}

fn func_call(this: &Value, vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    let data = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Func(data)) => data,
        _ => return errors::type_exc("object is not a function".to_string()),
    };
    let co = &data.co;

    let mut frame = acquire_frame(co);
    let status = co.bind_args(&data.defaults, args, named, &mut frame.locals);
    if status.is_error() {
        release_frame(co, frame);
        return status;
    }

    vm.eval_frame(&mut frame);
    let ret = std::mem::take(&mut frame.return_value);
    release_frame(co, frame);
    ret
}

pub static FUNC_CLASS: Class = Class {
    name: "FuncObject",
    super_: Some(&crate::class::OBJ_CLASS),
    call: Some(func_call),
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

fn gen_proxy_call(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    let data = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::GenProxy(data)) => data,
        _ => return errors::type_exc("object is not a generator".to_string()),
    };
    let co = &data.co;

    let mut frame = Box::new(Frame::new(co.clone()));
    frame.persistent = true;
    let status = co.bind_args(&data.defaults, args, named, &mut frame.locals);
    if status.is_error() {
        return status;
    }

    Obj::new(
        &GEN_CLASS,
        Payload::Gen(GenState { co: co.clone(), frame: Mutex::new(Some(frame)) }),
    )
    .into_value()
}

pub static GEN_PROXY_CLASS: Class = Class {
    name: "GeneratorProxy",
    super_: Some(&crate::class::OBJ_CLASS),
    call: Some(gen_proxy_call),
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

fn gen_iter(this: &Value) -> Value {
    this.clone()
}

/// Resumes the generator's frame. Exhaustion is sticky: once the frame
/// has returned IterStop (or failed), further calls return IterStop.
fn gen_iternext(this: &Value, vm: &mut Vm) -> Value {
    let state = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Gen(state)) => state,
        _ => return iter_stop(),
    };

    let mut guard = match state.frame.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            return errors::conc_access_exc("generator is already being resumed".to_string())
        }
    };
    let mut frame = match guard.take() {
        Some(frame) => frame,
        None => return iter_stop(),
    };
    drop(guard);

    vm.eval_frame(&mut frame);
    let res = std::mem::take(&mut frame.return_value);

    if !(res.is_error() || is_iter_stop(&res)) {
        *state.frame.lock().unwrap() = Some(frame);
    }
    res
}

pub static GEN_CLASS: Class = Class {
    name: "Generator",
    super_: Some(&crate::class::OBJ_CLASS),
    iter: Some(gen_iter),
    iternext: Some(gen_iternext),
    init: None,
    eq: None,
    hash: None,
    cmp: None,
    str_: None,
    call: None,
    num_methods: None,
    seq_methods: None,
    members: &[],
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};
