// File: src/vm.rs
//
// The frame evaluator: instruction dispatch loop, frame lifecycle,
// exception unwinding, imports, and the top-level execution driver.
//
// Evaluation is single-threaded and cooperative within one VM. Actors each
// own a separate VM on their own thread; the only inter-thread channel is
// the mailbox. A frame yields control only at RETURN, PRODUCE, RECEIVE of
// the shutdown token, or by returning to its caller.

use once_cell::sync::Lazy;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::actor::{self, Mailbox};
use crate::bytecode::{read_uint16_at, Opcode};
use crate::class::{is_subclass, META_CLASS};
use crate::codeobject::{self, CodeObject};
use crate::errors::{self, ErrorKind};
use crate::function;
use crate::module;
use crate::objects::{self, is_iter_stop, iter_stop};
use crate::value::{Payload, StrDict, Value};
use crate::vmops;

/// One entry of the per-frame exception-handler stack. `purge_wall` is the
/// value-stack depth at TRY_BEGIN; catching truncates back to it.
#[derive(Debug, Clone, Copy)]
pub struct ExcHandler {
    pub start: usize,
    pub end: usize,
    pub handler_pos: usize,
    pub purge_wall: usize,
}

/// A runtime activation record for one invocation of a code object.
#[derive(Debug)]
pub struct Frame {
    pub co: Arc<CodeObject>,
    pub locals: Vec<Value>,
    pub stack: Vec<Value>,
    pub exc_stack: Vec<ExcHandler>,
    pub pos: usize,
    pub return_value: Value,
    pub mailbox: Option<Arc<Mailbox>>,
    pub top_level: bool,
    pub persistent: bool,
}

impl Frame {
    pub fn new(co: Arc<CodeObject>) -> Frame {
        let locals = vec![Value::Empty; co.names.len()];
        Frame {
            locals,
            stack: Vec::with_capacity(co.stack_depth as usize),
            exc_stack: Vec::with_capacity(co.try_catch_depth as usize),
            pos: 0,
            return_value: Value::Empty,
            mailbox: None,
            top_level: false,
            persistent: false,
            co,
        }
    }

    /// The module frame: its locals are the module globals, which live in
    /// the shared Globals record instead of here.
    pub fn new_top_level(co: Arc<CodeObject>) -> Frame {
        let mut frame = Frame::new(co);
        frame.locals = Vec::new();
        frame.top_level = true;
        frame
    }

    /// Clears locals (module frames keep theirs: they are the globals),
    /// the exception stack, and the resume position.
    fn reset_for_return(&mut self) {
        if !self.top_level {
            for slot in &mut self.locals {
                *slot = Value::Empty;
            }
        }
        self.exc_stack.clear();
        self.pos = 0;
    }

    /// Full reset for frame pooling.
    pub fn reset(&mut self) {
        self.reset_for_return();
        self.stack.clear();
        self.return_value = Value::Empty;
    }
}

/// Shared writable sink, used by tests to capture program output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> SharedBuffer {
        SharedBuffer::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub type OutputSink = Arc<Mutex<Box<dyn Write + Send>>>;

static IMPORT_CACHE: Lazy<Mutex<StrDict>> = Lazy::new(|| Mutex::new(StrDict::default()));

pub struct Vm {
    /// This module's export dictionary.
    pub exports: StrDict,
    out: OutputSink,
}

impl Vm {
    /// A VM writing to stdout.
    pub fn new() -> Vm {
        Vm::with_output(Arc::new(Mutex::new(Box::new(std::io::stdout()))))
    }

    pub fn with_output(out: OutputSink) -> Vm {
        Vm { exports: StrDict::default(), out }
    }

    pub fn with_sink(sink: SharedBuffer) -> Vm {
        Vm::with_output(Arc::new(Mutex::new(Box::new(sink))))
    }

    pub fn out_handle(&self) -> OutputSink {
        self.out.clone()
    }

    fn print(&self, v: &Value) -> Value {
        let mut out = self.out.lock().unwrap();
        vmops::op_print(v, &mut **out)
    }

    /// Loads and executes a complete `.rhoc` image, rendering any uncaught
    /// error to stderr. Returns the process exit status.
    pub fn exec_image(&mut self, bytes: &[u8], origin: &str) -> i32 {
        let err = self.eval_image(bytes, origin);
        actor::join_all();
        match err {
            Value::Exc(obj) => {
                if let Payload::Exc(data) = obj.payload() {
                    eprint!("{}", data.render(obj.class().name));
                }
                1
            }
            Value::Error(e) => {
                eprint!("{}", e.render());
                1
            }
            _ => 0,
        }
    }

    /// Loads and executes an image without rendering anything. Returns
    /// Empty on success, or the uncaught error/exception value.
    pub fn eval_image(&mut self, bytes: &[u8], origin: &str) -> Value {
        match codeobject::load_image(bytes, origin) {
            Ok(co) => self.run_toplevel(co),
            Err(e) => Value::Error(e),
        }
    }

    /// Runs a module body; returns Empty on success or the in-flight
    /// error/exception value.
    pub fn run_toplevel(&mut self, co: Arc<CodeObject>) -> Value {
        let mut frame = Frame::new_top_level(co);
        self.eval_frame(&mut frame);
        let ret = std::mem::take(&mut frame.return_value);
        if ret.is_error() {
            ret
        } else {
            Value::Empty
        }
    }

    /// Resolves `import name`: import cache, then a compiled `.rhoc` on
    /// disk, then the built-in module registry.
    fn import_module(&mut self, name: &str) -> Value {
        if let Some(cached) = IMPORT_CACHE.lock().unwrap().get(name) {
            return cached.clone();
        }

        let bytes = match module::load_file_bytes(name) {
            Ok(bytes) => bytes,
            Err(module::LoadError::NotFound) => {
                return match module::builtin_module(name) {
                    Some(module) => module,
                    None => errors::import_exc_not_found(name),
                };
            }
        };

        let co = match codeobject::load_image(&bytes, name) {
            Ok(co) => co,
            Err(e) => return Value::Error(e),
        };

        // a freshly loaded module executes in a brand new VM
        let mut child = Vm::with_output(self.out.clone());
        let err = child.run_toplevel(co);
        if err.is_error() {
            return err;
        }

        let module = module::module_value(name, std::mem::take(&mut child.exports));
        IMPORT_CACHE
            .lock()
            .unwrap()
            .insert(name.to_string(), module.clone());
        module
    }

    /// Unwinds an in-flight error. Returns the handler position to resume
    /// at, or None when the frame aborts (the error is left in its return
    /// slot for the caller).
    fn handle_raise(&mut self, frame: &mut Frame, co: &CodeObject, res: Value) -> Option<usize> {
        match res {
            Value::Exc(obj) => {
                if let Some(handler) = frame.exc_stack.pop() {
                    frame.stack.truncate(handler.purge_wall);
                    frame.stack.push(Value::Exc(obj));
                    Some(handler.handler_pos)
                } else {
                    if let Payload::Exc(data) = obj.payload() {
                        data.traceback_append(&co.name, co.lineno_at(frame.pos));
                    }
                    frame.stack.clear();
                    frame.reset_for_return();
                    frame.return_value = Value::Exc(obj);
                    None
                }
            }
            Value::Error(mut e) => {
                e.traceback_append(&co.name, co.lineno_at(frame.pos));
                frame.stack.clear();
                frame.reset_for_return();
                frame.return_value = Value::Error(e);
                None
            }
            _ => unreachable!("handle_raise called on a non-error value"),
        }
    }

    /// The dispatch loop.
    pub fn eval_frame(&mut self, frame: &mut Frame) {
        let co = frame.co.clone();
        let bc: &[u8] = &co.bc;
        let ret_hint = co.ret_hint();
        let mut pos = frame.pos;

        macro_rules! raise {
            ($res:expr) => {{
                match self.handle_raise(frame, &co, $res) {
                    Some(handler_pos) => {
                        pos = handler_pos;
                        continue;
                    }
                    None => return,
                }
            }};
        }

        // the return-value hint check shared by RETURN / PRODUCE / shutdown
        macro_rules! check_ret_hint {
            () => {
                if let Some(hint) = ret_hint {
                    if !vmops::is_a(&frame.return_value, hint) {
                        let got = vmops::class_of(&frame.return_value);
                        frame.return_value = Value::Empty;
                        raise!(errors::type_exc_hint_mismatch(got, hint));
                    }
                }
            };
        }

        macro_rules! binop {
            ($opfn:expr) => {{
                let v2 = frame.stack.pop().unwrap();
                let v1 = frame.stack.last().unwrap();
                let res = $opfn(v1, &v2);
                if res.is_error() {
                    raise!(res);
                }
                *frame.stack.last_mut().unwrap() = res;
            }};
        }

        macro_rules! unop {
            ($opfn:expr) => {{
                let v1 = frame.stack.last().unwrap();
                let res = $opfn(v1);
                if res.is_error() {
                    raise!(res);
                }
                *frame.stack.last_mut().unwrap() = res;
            }};
        }

        loop {
            frame.pos = pos;

            // handler entries never outlive their protected range
            while let Some(handler) = frame.exc_stack.last() {
                if pos < handler.start || pos > handler.end {
                    frame.exc_stack.pop();
                } else {
                    break;
                }
            }

            debug_assert!(frame.stack.len() <= co.stack_depth as usize);

            let opcode = match Opcode::from_byte(bc[pos]) {
                Some(op) => op,
                None => raise!(errors::err_invalid_bytecode("unknown opcode")),
            };
            pos += 1;

            macro_rules! get_u16 {
                () => {{
                    let v = read_uint16_at(bc, pos);
                    pos += 2;
                    v
                }};
            }

            match opcode {
                Opcode::Nop => {}

                Opcode::LoadConst => {
                    let id = get_u16!() as usize;
                    frame.stack.push(co.consts[id].clone());
                }
                Opcode::LoadNull => frame.stack.push(Value::Null),
                Opcode::LoadIterStop => frame.stack.push(iter_stop()),

                Opcode::Add => binop!(vmops::op_add),
                Opcode::Sub => binop!(vmops::op_sub),
                Opcode::Mul => binop!(vmops::op_mul),
                Opcode::Div => binop!(vmops::op_div),
                Opcode::Mod => binop!(vmops::op_mod),
                Opcode::Pow => binop!(vmops::op_pow),
                Opcode::BitAnd => binop!(vmops::op_bitand),
                Opcode::BitOr => binop!(vmops::op_bitor),
                Opcode::Xor => binop!(vmops::op_xor),
                Opcode::Shiftl => binop!(vmops::op_shiftl),
                Opcode::Shiftr => binop!(vmops::op_shiftr),
                Opcode::And => binop!(vmops::op_and),
                Opcode::Or => binop!(vmops::op_or),

                Opcode::BitNot => unop!(vmops::op_bitnot),
                Opcode::Not => unop!(vmops::op_not),
                Opcode::UPlus => unop!(vmops::op_plus),
                Opcode::UMinus => unop!(vmops::op_minus),

                Opcode::Equal => binop!(vmops::op_eq),
                Opcode::NotEq => binop!(vmops::op_neq),
                Opcode::Lt => binop!(vmops::op_lt),
                Opcode::Gt => binop!(vmops::op_gt),
                Opcode::Le => binop!(vmops::op_le),
                Opcode::Ge => binop!(vmops::op_ge),

                Opcode::IAdd => binop!(vmops::op_iadd),
                Opcode::ISub => binop!(vmops::op_isub),
                Opcode::IMul => binop!(vmops::op_imul),
                Opcode::IDiv => binop!(vmops::op_idiv),
                Opcode::IMod => binop!(vmops::op_imod),
                Opcode::IPow => binop!(vmops::op_ipow),
                Opcode::IBitAnd => binop!(vmops::op_ibitand),
                Opcode::IBitOr => binop!(vmops::op_ibitor),
                Opcode::IXor => binop!(vmops::op_ixor),
                Opcode::IShiftl => binop!(vmops::op_ishiftl),
                Opcode::IShiftr => binop!(vmops::op_ishiftr),

                Opcode::MakeRange => binop!(objects::range_make),
                Opcode::In => binop!(vmops::op_in),

                Opcode::Store => {
                    let v = frame.stack.pop().unwrap();
                    let id = get_u16!() as usize;
                    if frame.top_level {
                        co.globals.values.lock().unwrap()[id] = v;
                    } else {
                        frame.locals[id] = v;
                    }
                }
                Opcode::StoreGlobal => {
                    let v = frame.stack.pop().unwrap();
                    let id = get_u16!() as usize;
                    co.globals.values.lock().unwrap()[id] = v;
                }
                Opcode::Load => {
                    let id = get_u16!() as usize;
                    let v = if frame.top_level {
                        co.globals.values.lock().unwrap()[id].clone()
                    } else {
                        frame.locals[id].clone()
                    };
                    if v.is_empty() {
                        let name = if frame.top_level {
                            &co.globals.names[id]
                        } else {
                            &co.names[id]
                        };
                        raise!(errors::err_unbound(name));
                    }
                    frame.stack.push(v);
                }
                Opcode::LoadGlobal => {
                    let id = get_u16!() as usize;
                    let v = co.globals.values.lock().unwrap()[id].clone();
                    if v.is_empty() {
                        raise!(errors::err_unbound(&co.globals.names[id]));
                    }
                    frame.stack.push(v);
                }
                Opcode::LoadName => {
                    let id = get_u16!() as usize;
                    let name = &co.frees[id];
                    match crate::builtins::lookup(name) {
                        Some(v) => frame.stack.push(v),
                        None => raise!(errors::err_unbound(name)),
                    }
                }

                Opcode::LoadAttr => {
                    let id = get_u16!() as usize;
                    let v1 = frame.stack.last().unwrap();
                    let res = vmops::op_get_attr(v1, &co.attrs[id]);
                    if res.is_error() {
                        raise!(res);
                    }
                    *frame.stack.last_mut().unwrap() = res;
                }
                Opcode::SetAttr => {
                    let obj = frame.stack.pop().unwrap();
                    let value = frame.stack.pop().unwrap();
                    let id = get_u16!() as usize;
                    let res = vmops::op_set_attr(&obj, &co.attrs[id], &value);
                    if res.is_error() {
                        raise!(res);
                    }
                }
                Opcode::LoadIndex => {
                    let index = frame.stack.pop().unwrap();
                    let v1 = frame.stack.last().unwrap();
                    let res = vmops::op_get(v1, &index);
                    if res.is_error() {
                        raise!(res);
                    }
                    *frame.stack.last_mut().unwrap() = res;
                }
                Opcode::SetIndex => {
                    // X[N] = Y with the stack laid out [Y, X, N]
                    let index = frame.stack.pop().unwrap();
                    let target = frame.stack.pop().unwrap();
                    let value = frame.stack.pop().unwrap();
                    let res = vmops::op_set(&target, &index, &value);
                    if res.is_error() {
                        raise!(res);
                    }
                }
                Opcode::Apply => {
                    let seq = frame.stack.pop().unwrap();
                    let func = frame.stack.last().unwrap().clone();
                    let res = vmops::op_apply(&seq, &func, self);
                    if res.is_error() {
                        raise!(res);
                    }
                    *frame.stack.last_mut().unwrap() = res;
                }
                Opcode::IApply => {
                    let func = frame.stack.pop().unwrap();
                    let target = frame.stack.last().unwrap().clone();
                    let res = vmops::op_iapply(&target, &func, self);
                    if res.is_error() {
                        raise!(res);
                    }
                    *frame.stack.last_mut().unwrap() = res;
                }

                Opcode::Print => {
                    let v = frame.stack.pop().unwrap();
                    let res = self.print(&v);
                    if res.is_error() {
                        raise!(res);
                    }
                }

                Opcode::Jmp => {
                    let jmp = get_u16!() as usize;
                    pos += jmp;
                }
                Opcode::JmpBack => {
                    let jmp = get_u16!() as usize;
                    pos -= jmp;
                }
                Opcode::JmpIfTrue => {
                    let v = frame.stack.pop().unwrap();
                    let jmp = get_u16!() as usize;
                    if vmops::op_nonzero(&v) {
                        pos += jmp;
                    }
                }
                Opcode::JmpIfFalse => {
                    let v = frame.stack.pop().unwrap();
                    let jmp = get_u16!() as usize;
                    if !vmops::op_nonzero(&v) {
                        pos += jmp;
                    }
                }
                Opcode::JmpBackIfTrue => {
                    let v = frame.stack.pop().unwrap();
                    let jmp = get_u16!() as usize;
                    if vmops::op_nonzero(&v) {
                        pos -= jmp;
                    }
                }
                Opcode::JmpBackIfFalse => {
                    let v = frame.stack.pop().unwrap();
                    let jmp = get_u16!() as usize;
                    if !vmops::op_nonzero(&v) {
                        pos -= jmp;
                    }
                }
                Opcode::JmpIfTrueElsePop => {
                    let jmp = get_u16!() as usize;
                    if vmops::op_nonzero(frame.stack.last().unwrap()) {
                        pos += jmp;
                    } else {
                        frame.stack.pop();
                    }
                }
                Opcode::JmpIfFalseElsePop => {
                    let jmp = get_u16!() as usize;
                    if !vmops::op_nonzero(frame.stack.last().unwrap()) {
                        pos += jmp;
                    } else {
                        frame.stack.pop();
                    }
                }

                Opcode::Call => {
                    let arg = get_u16!();
                    let nargs = (arg & 0xff) as usize;
                    let nargs_named = (arg >> 8) as usize;
                    let callee = frame.stack.pop().unwrap();
                    let base = frame.stack.len() - nargs - 2 * nargs_named;
                    let res = {
                        let (args, named) = frame.stack[base..].split_at(nargs);
                        vmops::op_call(&callee, self, args, named)
                    };
                    frame.stack.truncate(base);
                    if res.is_error() {
                        raise!(res);
                    }
                    frame.stack.push(res);
                }

                Opcode::Return => {
                    let v = frame.stack.pop().unwrap();
                    frame.reset_for_return();
                    frame.stack.clear();
                    frame.return_value = v;
                    check_ret_hint!();
                    return;
                }
                Opcode::Throw => {
                    let v = frame.stack.pop().unwrap();
                    let class = vmops::class_of(&v);
                    if !is_subclass(class, &errors::EXCEPTION_CLASS) {
                        raise!(errors::err_invalid_throw(class));
                    }
                    let exc = match v {
                        Value::Obj(o) | Value::Exc(o) => Value::Exc(o),
                        _ => unreachable!("exception values are objects"),
                    };
                    raise!(exc);
                }
                Opcode::Produce => {
                    let v = frame.stack.pop().unwrap();
                    frame.pos = pos;
                    frame.return_value = v;
                    check_ret_hint!();
                    return;
                }

                Opcode::TryBegin => {
                    let try_len = get_u16!() as usize;
                    let handler_off = get_u16!() as usize;
                    frame.exc_stack.push(ExcHandler {
                        start: pos,
                        end: pos + try_len,
                        handler_pos: pos + handler_off,
                        purge_wall: frame.stack.len(),
                    });
                }
                Opcode::TryEnd => {
                    frame.exc_stack.pop();
                }
                Opcode::JmpIfExcMismatch => {
                    let jmp = get_u16!() as usize;
                    let class_v = frame.stack.pop().unwrap();
                    let exc_v = frame.stack.pop().unwrap();
                    let meta = vmops::class_of(&class_v);
                    if !std::ptr::eq(meta, &META_CLASS) {
                        raise!(errors::err_invalid_catch(meta));
                    }
                    let target = match class_v.as_obj().map(|o| o.payload()) {
                        Some(Payload::Class(c)) => *c,
                        _ => raise!(errors::err_invalid_catch(meta)),
                    };
                    if !vmops::is_a(&exc_v, target) {
                        pos += jmp;
                    }
                }

                Opcode::MakeList => {
                    let len = get_u16!() as usize;
                    let elems = frame.stack.split_off(frame.stack.len() - len);
                    frame.stack.push(objects::list_value(elems));
                }
                Opcode::MakeTuple => {
                    let len = get_u16!() as usize;
                    let elems = frame.stack.split_off(frame.stack.len() - len);
                    frame.stack.push(objects::tuple_value(elems));
                }
                Opcode::MakeSet => {
                    let len = get_u16!() as usize;
                    let elems = frame.stack.split_off(frame.stack.len() - len);
                    let res = objects::set_value(&elems);
                    if res.is_error() {
                        raise!(res);
                    }
                    frame.stack.push(res);
                }
                Opcode::MakeDict => {
                    let len = get_u16!() as usize;
                    let pairs = frame.stack.split_off(frame.stack.len() - len);
                    let res = objects::dict_value(&pairs);
                    if res.is_error() {
                        raise!(res);
                    }
                    frame.stack.push(res);
                }

                Opcode::Import => {
                    let id = get_u16!() as usize;
                    let res = self.import_module(&co.names[id]);
                    if res.is_error() {
                        raise!(res);
                    }
                    frame.stack.push(res);
                }
                Opcode::Export => {
                    let id = get_u16!() as usize;
                    let v = frame.stack.pop().unwrap();
                    self.exports.insert(co.names[id].clone(), v);
                }
                Opcode::ExportGlobal => {
                    let id = get_u16!() as usize;
                    let v = frame.stack.pop().unwrap();
                    self.exports.insert(co.globals.names[id].clone(), v);
                }
                Opcode::ExportName => {
                    let id = get_u16!() as usize;
                    let v = frame.stack.pop().unwrap();
                    self.exports.insert(co.frees[id].clone(), v);
                }

                Opcode::Receive => {
                    let mailbox = frame.mailbox.clone();
                    let mailbox = match mailbox {
                        Some(mb) => mb,
                        None => raise!(errors::err_value(
                            ErrorKind::Fatal,
                            "receive outside of an actor",
                        )),
                    };
                    let msg_v = mailbox.pop();
                    let is_kill = matches!(
                        msg_v.as_obj().map(|o| o.payload()),
                        Some(Payload::Message(data)) if data.contents.is_empty()
                    );
                    if is_kill {
                        frame.reset_for_return();
                        frame.stack.clear();
                        frame.return_value = Value::Null;
                        check_ret_hint!();
                        return;
                    }
                    frame.stack.push(msg_v);
                }

                Opcode::GetIter => {
                    let v1 = frame.stack.last().unwrap();
                    let res = vmops::op_iter(v1);
                    if res.is_error() {
                        raise!(res);
                    }
                    *frame.stack.last_mut().unwrap() = res;
                }
                Opcode::LoopIter => {
                    let jmp = get_u16!() as usize;
                    let it = frame.stack.last().unwrap().clone();
                    let res = vmops::op_iternext(&it, self);
                    if res.is_error() {
                        raise!(res);
                    }
                    if is_iter_stop(&res) {
                        pos += jmp;
                    } else {
                        frame.stack.push(res);
                    }
                }

                Opcode::MakeFuncObj | Opcode::MakeGenerator | Opcode::MakeActor => {
                    let arg = get_u16!();
                    let num_hints = (arg >> 8) as usize;
                    let num_defaults = (arg & 0xff) as usize;
                    let offset = num_hints + num_defaults;
                    let len = frame.stack.len();

                    let sub_co = frame.stack[len - offset - 1]
                        .as_obj()
                        .and_then(|o| o.payload().as_code())
                        .cloned();
                    let sub_co = match sub_co {
                        Some(co) => co,
                        None => raise!(errors::err_invalid_bytecode(
                            "function creation without a code object",
                        )),
                    };

                    if num_hints > 0 {
                        let mut hints = Vec::with_capacity(num_hints);
                        let mut bad: Option<Value> = None;
                        for v in &frame.stack[len - offset..len - num_defaults] {
                            match v {
                                Value::Null => hints.push(None),
                                _ => match v.as_obj().map(|o| o.payload()) {
                                    Some(Payload::Class(c)) => hints.push(Some(*c)),
                                    _ => {
                                        bad = Some(errors::type_exc(format!(
                                            "type hint is a {}, not a type",
                                            vmops::class_of(v).name
                                        )));
                                        break;
                                    }
                                },
                            }
                        }
                        if let Some(exc) = bad {
                            raise!(exc);
                        }
                        *sub_co.hints.lock().unwrap() = Some(hints);
                    }

                    let defaults = frame.stack[len - num_defaults..].to_vec();
                    frame.stack.truncate(len - offset);

                    let made = match opcode {
                        Opcode::MakeFuncObj => function::func_value(sub_co, defaults),
                        Opcode::MakeGenerator => function::gen_proxy_value(sub_co, defaults),
                        _ => actor::actor_proxy_value(sub_co, defaults),
                    };
                    *frame.stack.last_mut().unwrap() = made;
                }

                Opcode::SeqExpand => {
                    let n = get_u16!() as usize;
                    let v = frame.stack.pop().unwrap();

                    // common case: a tuple of exactly the right arity
                    let tuple_elems = match v.as_obj().map(|o| o.payload()) {
                        Some(Payload::Tuple(elems)) => Some(elems.clone()),
                        _ => None,
                    };

                    if let Some(elems) = tuple_elems {
                        if elems.len() != n {
                            raise!(errors::seq_exp_exc_inconsistent(elems.len(), n));
                        }
                        for elem in elems {
                            frame.stack.push(elem);
                        }
                    } else {
                        let it = vmops::op_iter(&v);
                        if it.is_error() {
                            raise!(it);
                        }
                        let mut count = 0usize;
                        loop {
                            let next = vmops::op_iternext(&it, self);
                            if next.is_error() {
                                raise!(next);
                            }
                            if is_iter_stop(&next) {
                                break;
                            }
                            count += 1;
                            if count > n {
                                raise!(errors::seq_exp_exc_inconsistent(count, n));
                            }
                            frame.stack.push(next);
                        }
                        if count != n {
                            raise!(errors::seq_exp_exc_inconsistent(count, n));
                        }
                    }
                }

                Opcode::Pop => {
                    frame.stack.pop();
                }
                Opcode::Dup => {
                    let v = frame.stack.last().unwrap().clone();
                    frame.stack.push(v);
                }
                Opcode::DupTwo => {
                    let len = frame.stack.len();
                    let v2 = frame.stack[len - 2].clone();
                    let v1 = frame.stack[len - 1].clone();
                    frame.stack.push(v2);
                    frame.stack.push(v1);
                }
                Opcode::Rot => {
                    let len = frame.stack.len();
                    frame.stack.swap(len - 1, len - 2);
                }
                Opcode::RotThree => {
                    // [.., a, b, c] -> [.., c, a, b]
                    let len = frame.stack.len();
                    let top = frame.stack.remove(len - 1);
                    frame.stack.insert(len - 3, top);
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new()
    }
}

/// Registers a built-in module from the host side (the plug-in loader's
/// entry point).
pub fn vm_register_module(name: &str, contents: StrDict) {
    module::register_module(name, contents);
}
