// File: src/actor.rs
//
// Actors, mailboxes, futures, and messages.
//
// Each actor owns a mailbox, a persistent frame, and (once started) an OS
// thread running its own VM. Communication is strictly by message passing:
// `send(v)` enqueues a Message and returns its Future; `receive` inside
// the actor body dequeues; `message.reply(x)` resolves the future exactly
// once. A message with Empty contents is the shutdown token.

use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use once_cell::sync::Lazy;

use crate::class::{Class, MethodDesc};
use crate::codeobject::CodeObject;
use crate::errors::{self, ErrorKind};
use crate::value::{Obj, Payload, Value};
use crate::vm::{Frame, Vm};

/// FIFO queue of boxed values, guarded by a mutex and condition variable.
#[derive(Debug, Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Value>>,
    cond: Condvar,
}

impl Mailbox {
    pub fn new() -> Arc<Mailbox> {
        Arc::new(Mailbox::default())
    }

    pub fn push(&self, v: Value) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(v);
        self.cond.notify_one();
    }

    /// Blocks until a message is available.
    pub fn pop(&self) -> Value {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if let Some(v) = queue.pop_front() {
                return v;
            }
            queue = self.cond.wait(queue).unwrap();
        }
    }

}

/// One-shot settable value conveying an actor's reply to a sender.
#[derive(Debug)]
pub struct FutureState {
    value: Mutex<Value>,
    cond: Condvar,
}

#[derive(Debug)]
pub struct MessageData {
    pub contents: Value,
    /// Cleared by the first reply; a second reply is an ActorException.
    pub future: Mutex<Option<Obj>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRunState {
    Ready,
    Running,
    Finished,
}

#[derive(Debug)]
pub struct ActorState {
    pub co: Arc<CodeObject>,
    pub mailbox: Arc<Mailbox>,
    pub frame: Mutex<Option<Box<Frame>>>,
    pub retval: Mutex<Value>,
    pub state: Mutex<ActorRunState>,
    pub state_cond: Condvar,
    pub handle: Mutex<Option<JoinHandle<()>>>,
}

impl ActorState {
    fn run_state(&self) -> ActorRunState {
        *self.state.lock().unwrap()
    }

    fn set_finished(&self) {
        *self.state.lock().unwrap() = ActorRunState::Finished;
        self.state_cond.notify_all();
    }

    /// Blocks until the actor's thread has finished. The join handle may
    /// already have been consumed elsewhere (interpreter shutdown joins
    /// every still-linked actor), so this waits on the run state instead
    /// of insisting on the handle.
    fn wait_finished(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
            return;
        }
        let mut state = self.state.lock().unwrap();
        while *state != ActorRunState::Finished {
            state = self.state_cond.wait(state).unwrap();
        }
    }
}

pub fn actor_proxy_value(co: Arc<CodeObject>, defaults: Vec<Value>) -> Value {
    Obj::new(
        &ACTOR_PROXY_CLASS,
        Payload::ActorProxy(crate::function::ProxyData { co, defaults }),
    )
    .into_value()
}

pub fn future_value() -> Obj {
    Obj::new(
        &FUTURE_CLASS,
        Payload::Future(FutureState { value: Mutex::new(Value::Empty), cond: Condvar::new() }),
    )
}

pub fn message_value(contents: Value) -> (Obj, Obj) {
    let future = future_value();
    let msg = Obj::new(
        &MESSAGE_CLASS,
        Payload::Message(MessageData { contents, future: Mutex::new(Some(future.clone())) }),
    );
    (msg, future)
}

/// The shutdown token: a message with Empty contents.
pub fn kill_message_value() -> Obj {
    message_value(Value::Empty).0
}

// Still-running actors, joined at interpreter shutdown.
static ACTORS: Lazy<Mutex<Vec<Obj>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn actor_link(actor: &Obj) {
    ACTORS.lock().unwrap().push(actor.clone());
}

fn actor_unlink(actor: &Obj) {
    ACTORS.lock().unwrap().retain(|a| !a.is(actor));
}

/// Joins every still-linked actor; runs at interpreter shutdown.
pub fn join_all() {
    loop {
        let actor = match ACTORS.lock().unwrap().pop() {
            Some(a) => a,
            None => break,
        };
        if let Payload::Actor(state) = actor.payload() {
            state.wait_finished();
        }
    }
}

fn actor_proxy_call(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    let data = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::ActorProxy(data)) => data,
        _ => return errors::type_exc("object is not an actor".to_string()),
    };
    let co = &data.co;

    let mailbox = Mailbox::new();
    let mut frame = Box::new(Frame::new(co.clone()));
    frame.persistent = true;
    frame.mailbox = Some(mailbox.clone());

    let status = co.bind_args(&data.defaults, args, named, &mut frame.locals);
    if status.is_error() {
        return status;
    }

    Obj::new(
        &ACTOR_CLASS,
        Payload::Actor(ActorState {
            co: co.clone(),
            mailbox,
            frame: Mutex::new(Some(frame)),
            retval: Mutex::new(Value::Empty),
            state: Mutex::new(ActorRunState::Ready),
            state_cond: Condvar::new(),
            handle: Mutex::new(None),
        }),
    )
    .into_value()
}

pub static ACTOR_PROXY_CLASS: Class = Class {
    name: "ActorProxy",
    super_: Some(&crate::class::OBJ_CLASS),
    call: Some(actor_proxy_call),
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

fn actor_state<'a>(this: &'a Value) -> Option<(&'a Obj, &'a ActorState)> {
    let obj = this.as_obj()?;
    match obj.payload() {
        Payload::Actor(state) => Some((obj, state)),
        _ => None,
    }
}

fn actor_start(this: &Value, vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("start");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("start", args.len(), 0);
    }
    let (obj, state) = match actor_state(this) {
        Some(pair) => pair,
        None => return errors::type_exc("object is not an actor".to_string()),
    };

    {
        let mut run_state = state.state.lock().unwrap();
        if *run_state != ActorRunState::Ready {
            return errors::actor_exc("cannot restart stopped actor".to_string());
        }
        *run_state = ActorRunState::Running;
    }

    let mut frame = match state.frame.lock().unwrap().take() {
        Some(frame) => frame,
        None => return errors::actor_exc("actor frame already consumed".to_string()),
    };

    actor_link(obj);

    let actor_obj = obj.clone();
    let out = vm.out_handle();

    let spawned = std::thread::Builder::new()
        .name(format!("actor-{}", state.co.name))
        .spawn(move || {
            let mut actor_vm = Vm::with_output(out);
            actor_vm.eval_frame(&mut frame);
            if let Payload::Actor(state) = actor_obj.payload() {
                *state.retval.lock().unwrap() = std::mem::take(&mut frame.return_value);
                state.set_finished();
            }
        });

    match spawned {
        Ok(handle) => {
            *state.handle.lock().unwrap() = Some(handle);
            Value::Null
        }
        Err(e) => {
            actor_unlink(obj);
            state.set_finished();
            errors::err_value(ErrorKind::Thread, format!("could not spawn actor thread: {}", e))
        }
    }
}

fn actor_check(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("check");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("check", args.len(), 0);
    }
    let (_, state) = match actor_state(this) {
        Some(pair) => pair,
        None => return errors::type_exc("object is not an actor".to_string()),
    };
    if *state.state.lock().unwrap() == ActorRunState::Finished {
        state.retval.lock().unwrap().clone()
    } else {
        Value::Null
    }
}

fn actor_join(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("join");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("join", args.len(), 0);
    }
    let (obj, state) = match actor_state(this) {
        Some(pair) => pair,
        None => return errors::type_exc("object is not an actor".to_string()),
    };

    if state.run_state() == ActorRunState::Ready {
        return errors::actor_exc("actor has not been started".to_string());
    }
    state.wait_finished();
    actor_unlink(obj);
    state.retval.lock().unwrap().clone()
}

fn actor_send(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("send");
    }
    if args.len() != 1 {
        return errors::call_exc_num_args("send", args.len(), 1);
    }
    let (_, state) = match actor_state(this) {
        Some(pair) => pair,
        None => return errors::type_exc("object is not an actor".to_string()),
    };
    if *state.state.lock().unwrap() == ActorRunState::Finished {
        return errors::actor_exc("actor has been stopped".to_string());
    }

    let (msg, future) = message_value(args[0].clone());
    state.mailbox.push(msg.into_value());
    future.into_value()
}

fn actor_stop(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("stop");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("stop", args.len(), 0);
    }
    let (_, state) = match actor_state(this) {
        Some(pair) => pair,
        None => return errors::type_exc("object is not an actor".to_string()),
    };
    if *state.state.lock().unwrap() == ActorRunState::Finished {
        return errors::actor_exc("actor has been stopped".to_string());
    }
    state.mailbox.push(kill_message_value().into_value());
    Value::Null
}

static ACTOR_METHODS: [MethodDesc; 5] = [
    MethodDesc { name: "start", func: actor_start },
    MethodDesc { name: "check", func: actor_check },
    MethodDesc { name: "join", func: actor_join },
    MethodDesc { name: "send", func: actor_send },
    MethodDesc { name: "stop", func: actor_stop },
];

pub static ACTOR_CLASS: Class = Class {
    name: "Actor",
    super_: Some(&crate::class::OBJ_CLASS),
    methods: &ACTOR_METHODS,
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
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- futures -------------------------------------------------------------

fn future_set(future: &Obj, v: &Value) {
    if let Payload::Future(state) = future.payload() {
        *state.value.lock().unwrap() = v.clone();
        state.cond.notify_all();
    }
}

fn future_get(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("get");
    }
    if args.len() > 1 {
        return errors::call_exc_num_args_at_most("get", args.len(), 1);
    }
    let state = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Future(state)) => state,
        _ => return errors::type_exc("object is not a future".to_string()),
    };

    let timeout_ms = match args.first() {
        None => None,
        Some(Value::Int(ms)) if *ms >= 0 => Some(*ms as u64),
        Some(Value::Int(_)) => {
            return errors::type_exc("get() got a negative timeout".to_string())
        }
        Some(other) => {
            return errors::type_exc(format!(
                "get() takes an integer argument (got a {})",
                crate::vmops::class_of(other).name
            ))
        }
    };

    let mut value = state.value.lock().unwrap();
    match timeout_ms {
        None => {
            while value.is_empty() {
                value = state.cond.wait(value).unwrap();
            }
        }
        Some(ms) => {
            let deadline = std::time::Duration::from_millis(ms);
            let start = std::time::Instant::now();
            while value.is_empty() {
                let remaining = match deadline.checked_sub(start.elapsed()) {
                    Some(remaining) => remaining,
                    None => return errors::actor_exc("get() timed out".to_string()),
                };
                let (guard, res) = state.cond.wait_timeout(value, remaining).unwrap();
                value = guard;
                if res.timed_out() && value.is_empty() {
                    return errors::actor_exc("get() timed out".to_string());
                }
            }
        }
    }
    value.clone()
}

static FUTURE_METHODS: [MethodDesc; 1] = [MethodDesc { name: "get", func: future_get }];

pub static FUTURE_CLASS: Class = Class {
    name: "Future",
    super_: Some(&crate::class::OBJ_CLASS),
    methods: &FUTURE_METHODS,
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
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

// --- messages ------------------------------------------------------------

fn message_contents(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("contents");
    }
    if !args.is_empty() {
        return errors::call_exc_num_args("contents", args.len(), 0);
    }
    match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Message(data)) => data.contents.clone(),
        _ => errors::type_exc("object is not a message".to_string()),
    }
}

fn message_reply(this: &Value, _vm: &mut Vm, args: &[Value], named: &[Value]) -> Value {
    if !named.is_empty() {
        return errors::call_exc_named_args("reply");
    }
    if args.len() != 1 {
        return errors::call_exc_num_args("reply", args.len(), 1);
    }
    let data = match this.as_obj().map(|o| o.payload()) {
        Some(Payload::Message(data)) => data,
        _ => return errors::type_exc("object is not a message".to_string()),
    };

    let mut slot = data.future.lock().unwrap();
    match slot.take() {
        Some(future) => {
            future_set(&future, &args[0]);
            Value::Null
        }
        None => errors::actor_exc("cannot reply to the same message twice".to_string()),
    }
}

static MESSAGE_METHODS: [MethodDesc; 2] = [
    MethodDesc { name: "contents", func: message_contents },
    MethodDesc { name: "reply", func: message_reply },
];

pub static MESSAGE_CLASS: Class = Class {
    name: "Message",
    super_: Some(&crate::class::OBJ_CLASS),
    methods: &MESSAGE_METHODS,
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
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};
