// File: src/errors.rs
//
// Error handling for Rho: front-end errors (syntax, compile), fatal runtime
// errors (not catchable by user code), and the user-visible exception class
// hierarchy. Fatal errors and uncaught exceptions render with a traceback.

use once_cell::sync::OnceCell;
use colored::Colorize;
use std::fmt;
use std::sync::Mutex;

use crate::class::{Class, Member, OBJ_CLASS};
use crate::objects::str_value;
use crate::value::{Obj, Payload, Value};

/// One traceback entry: (code-object name, line number).
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub func: String,
    pub lineno: u32,
}

// --- front-end errors ----------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub lineno: u32,
    pub msg: String,
}

impl SyntaxError {
    pub fn new(lineno: u32, msg: impl Into<String>) -> SyntaxError {
        SyntaxError { lineno, msg: msg.into() }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            "Syntax Error".red().bold(),
            format!("(line {})", self.lineno).bright_blue(),
            self.msg
        )
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub lineno: u32,
    pub msg: String,
}

impl CompileError {
    pub fn new(lineno: u32, msg: impl Into<String>) -> CompileError {
        CompileError { lineno, msg: msg.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            "Compile Error".red().bold(),
            format!("(line {})", self.lineno).bright_blue(),
            self.msg
        )
    }
}

impl std::error::Error for CompileError {}

// --- fatal runtime errors ------------------------------------------------

/// Irrecoverable runtime failures. These abort the current frame chain with
/// a traceback and cannot be caught by `try`/`catch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Type,
    Name,
    DivByZero,
    BadSignature,
    InvalidBytecode,
    Thread,
}

impl ErrorKind {
    pub fn header(self) -> &'static str {
        match self {
            ErrorKind::Fatal => "Fatal Error",
            ErrorKind::Type => "Type Error",
            ErrorKind::Name => "Name Error",
            ErrorKind::DivByZero => "Arithmetic Error",
            ErrorKind::BadSignature => "Invalid File Signature Error",
            ErrorKind::InvalidBytecode => "Invalid Bytecode Error",
            ErrorKind::Thread => "Multithreading Error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
    pub traceback: Vec<TraceEntry>,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Error {
        Error { kind, msg: msg.into(), traceback: Vec::new() }
    }

    pub fn traceback_append(&mut self, func: &str, lineno: u32) {
        self.traceback.push(TraceEntry { func: func.to_string(), lineno });
    }

    /// Renders the traceback (most recent call last) and the message.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_traceback(&mut out, &self.traceback);
        out.push_str(&format!("{}: {}\n", self.kind.header().red().bold(), self.msg));
        out
    }
}

fn render_traceback(out: &mut String, tb: &[TraceEntry]) {
    if tb.is_empty() {
        return;
    }
    out.push_str(&format!("{}\n", "Traceback (most recent call last):".bright_blue()));
    for entry in tb.iter().rev() {
        out.push_str(&format!("  in {} (line {})\n", entry.func, entry.lineno));
    }
}

pub fn err_value(kind: ErrorKind, msg: impl Into<String>) -> Value {
    Value::Error(Box::new(Error::new(kind, msg)))
}

pub fn err_unbound(name: &str) -> Value {
    err_value(ErrorKind::Name, format!("unbound variable '{}'", name))
}

pub fn err_div_by_zero() -> Value {
    err_value(ErrorKind::DivByZero, "division or modulo by zero")
}

pub fn err_invalid_bytecode(detail: &str) -> Value {
    err_value(ErrorKind::InvalidBytecode, format!("invalid bytecode: {}", detail))
}

pub fn err_invalid_throw(class: &'static Class) -> Value {
    err_value(
        ErrorKind::Type,
        format!("cannot throw non-exception object of type '{}'", class.name),
    )
}

pub fn err_invalid_catch(class: &'static Class) -> Value {
    err_value(
        ErrorKind::Type,
        format!("cannot catch non-class object of type '{}'", class.name),
    )
}

// --- user-visible exceptions ---------------------------------------------

/// Payload of an exception object.
#[derive(Debug)]
pub struct ExcData {
    pub msg: Option<String>,
    pub traceback: Mutex<Vec<TraceEntry>>,
}

impl ExcData {
    pub fn new(msg: Option<String>) -> ExcData {
        ExcData { msg, traceback: Mutex::new(Vec::new()) }
    }

    pub fn traceback_append(&self, func: &str, lineno: u32) {
        self.traceback
            .lock()
            .unwrap()
            .push(TraceEntry { func: func.to_string(), lineno });
    }

    pub fn render(&self, class_name: &str) -> String {
        let mut out = String::new();
        render_traceback(&mut out, &self.traceback.lock().unwrap());
        match &self.msg {
            Some(msg) => out.push_str(&format!("{}: {}\n", class_name.red().bold(), msg)),
            None => out.push_str(&format!("{}\n", class_name.red().bold())),
        }
        out
    }
}

/// Constructor used by `Exception("...")` and friends.
fn exc_init(class: &'static Class, args: &[Value]) -> Value {
    if args.len() > 1 {
        return type_exc(format!(
            "{} constructor takes at most 1 argument (got {})",
            class.name,
            args.len()
        ));
    }
    let msg = match args.first() {
        None => None,
        Some(v) => match v.as_obj().map(|o| o.payload()) {
            Some(Payload::Str(s)) => Some(s.clone()),
            _ => {
                return type_exc(format!(
                    "{} constructor takes a Str argument, not a {}",
                    class.name,
                    crate::vmops::class_of(v).name
                ))
            }
        },
    };
    Obj::new(class, Payload::Exc(ExcData::new(msg))).into_value()
}

fn exc_message_get(obj: &Obj) -> Value {
    match obj.payload() {
        Payload::Exc(data) => match &data.msg {
            Some(msg) => str_value(msg.clone()),
            None => Value::Null,
        },
        _ => Value::Null,
    }
}

fn exc_str(this: &Value) -> Value {
    match this.as_obj() {
        Some(o) => match o.payload() {
            Payload::Exc(data) => match &data.msg {
                Some(msg) => str_value(format!("{}: {}", o.class().name, msg)),
                None => str_value(o.class().name.to_string()),
            },
            _ => Value::Null,
        },
        None => Value::Null,
    }
}

static EXC_MEMBERS: [Member; 1] = [Member {
    name: "message",
    get: exc_message_get,
    set: None,
    readonly: true,
    strict_type: None,
}];

pub static EXCEPTION_CLASS: Class = Class {
    name: "Exception",
    super_: Some(&OBJ_CLASS),
    init: Some(exc_init),
    str_: Some(exc_str),
    members: &EXC_MEMBERS,
    eq: None,
    hash: None,
    cmp: None,
    call: None,
    iter: None,
    iternext: None,
    num_methods: None,
    seq_methods: None,
    methods: &[],
    attr_get: None,
    attr_set: None,
    resolved: OnceCell::new(),
    attr_dict: OnceCell::new(),
};

macro_rules! exc_subclass {
    ($static_name:ident, $name:literal) => {
        pub static $static_name: Class = Class {
            name: $name,
            super_: Some(&EXCEPTION_CLASS),
            init: Some(exc_init),
            str_: Some(exc_str),
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
            attr_get: None,
            attr_set: None,
            resolved: OnceCell::new(),
            attr_dict: OnceCell::new(),
        };
    };
}

exc_subclass!(INDEX_EXC_CLASS, "IndexException");
exc_subclass!(TYPE_EXC_CLASS, "TypeException");
exc_subclass!(IO_EXC_CLASS, "IOException");
exc_subclass!(ATTR_EXC_CLASS, "AttributeException");
exc_subclass!(IMPORT_EXC_CLASS, "ImportException");
exc_subclass!(ISC_EXC_CLASS, "IllegalStateChangeException");
exc_subclass!(SEQ_EXP_EXC_CLASS, "SequenceExpandException");
exc_subclass!(ACTOR_EXC_CLASS, "ActorException");
exc_subclass!(CONC_ACCESS_EXC_CLASS, "ConcurrentAccessException");

/// All exception classes, in builtins-registration order.
pub static EXC_CLASSES: [&Class; 10] = [
    &EXCEPTION_CLASS,
    &INDEX_EXC_CLASS,
    &TYPE_EXC_CLASS,
    &IO_EXC_CLASS,
    &ATTR_EXC_CLASS,
    &IMPORT_EXC_CLASS,
    &ISC_EXC_CLASS,
    &SEQ_EXP_EXC_CLASS,
    &ACTOR_EXC_CLASS,
    &CONC_ACCESS_EXC_CLASS,
];

/// Makes an exception value in the raised (active) state.
pub fn exc_value(class: &'static Class, msg: String) -> Value {
    Value::Exc(Obj::new(class, Payload::Exc(ExcData::new(Some(msg)))))
}

pub fn type_exc(msg: String) -> Value {
    exc_value(&TYPE_EXC_CLASS, msg)
}

pub fn index_exc(msg: String) -> Value {
    exc_value(&INDEX_EXC_CLASS, msg)
}

pub fn io_exc(msg: String) -> Value {
    exc_value(&IO_EXC_CLASS, msg)
}

pub fn attr_exc(msg: String) -> Value {
    exc_value(&ATTR_EXC_CLASS, msg)
}

pub fn actor_exc(msg: String) -> Value {
    exc_value(&ACTOR_EXC_CLASS, msg)
}

pub fn conc_access_exc(msg: String) -> Value {
    exc_value(&CONC_ACCESS_EXC_CLASS, msg)
}

pub fn type_exc_unsupported_1(op: &str, class: &'static Class) -> Value {
    type_exc(format!("unsupported operand type for {}: '{}'", op, class.name))
}

pub fn type_exc_unsupported_2(op: &str, c1: &'static Class, c2: &'static Class) -> Value {
    type_exc(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op, c1.name, c2.name
    ))
}

pub fn type_exc_not_callable(class: &'static Class) -> Value {
    type_exc(format!("object of type '{}' is not callable", class.name))
}

pub fn type_exc_not_iterable(class: &'static Class) -> Value {
    type_exc(format!("object of type '{}' is not iterable", class.name))
}

pub fn type_exc_not_iterator(class: &'static Class) -> Value {
    type_exc(format!("object of type '{}' is not an iterator", class.name))
}

pub fn type_exc_cannot_index(class: &'static Class) -> Value {
    type_exc(format!("object of type '{}' cannot be indexed", class.name))
}

pub fn type_exc_hint_mismatch(got: &'static Class, want: &'static Class) -> Value {
    type_exc(format!(
        "type hint violated: expected a {}, got a {}",
        want.name, got.name
    ))
}

pub fn type_exc_unhashable(class: &'static Class) -> Value {
    type_exc(format!("object of type '{}' is not hashable", class.name))
}

pub fn call_exc_num_args(func: &str, got: usize, expected: usize) -> Value {
    type_exc(format!(
        "{}() takes {} argument(s) (got {})",
        func, expected, got
    ))
}

pub fn call_exc_num_args_at_most(func: &str, got: usize, expected: usize) -> Value {
    type_exc(format!(
        "{}() takes at most {} argument(s) (got {})",
        func, expected, got
    ))
}

pub fn call_exc_num_args_between(func: &str, got: usize, min: usize, max: usize) -> Value {
    type_exc(format!(
        "{}() takes between {} and {} arguments (got {})",
        func, min, max, got
    ))
}

pub fn call_exc_named_args(func: &str) -> Value {
    type_exc(format!("{}() takes no named arguments", func))
}

pub fn call_exc_dup_arg(func: &str, name: &str) -> Value {
    type_exc(format!("{}() got multiple values for argument '{}'", func, name))
}

pub fn call_exc_unknown_arg(func: &str, name: &str) -> Value {
    type_exc(format!("{}() got an unexpected named argument '{}'", func, name))
}

pub fn call_exc_missing_arg(func: &str, name: &str) -> Value {
    type_exc(format!("{}() missing argument '{}'", func, name))
}

pub fn index_exc_out_of_bounds(index: i64, len: usize) -> Value {
    index_exc(format!("index {} out of bounds (length {})", index, len))
}

pub fn index_exc_key_not_found() -> Value {
    index_exc("key not found".to_string())
}

pub fn io_exc_cannot_open_file(filename: &str, mode: &str) -> Value {
    io_exc(format!("cannot open file '{}' in mode '{}'", filename, mode))
}

pub fn io_exc_cannot_read_file(filename: &str) -> Value {
    io_exc(format!("cannot read file '{}'", filename))
}

pub fn io_exc_cannot_write_file(filename: &str) -> Value {
    io_exc(format!("cannot write file '{}'", filename))
}

pub fn io_exc_file_closed(filename: &str) -> Value {
    io_exc(format!("file '{}' has been closed", filename))
}

pub fn attr_exc_not_found(class: &'static Class, attr: &str) -> Value {
    attr_exc(format!("object of type '{}' has no attribute '{}'", class.name, attr))
}

pub fn attr_exc_readonly(class: &'static Class, attr: &str) -> Value {
    attr_exc(format!("attribute '{}' of type '{}' is read-only", attr, class.name))
}

pub fn attr_exc_mismatch(class: &'static Class, attr: &str, assigned: &'static Class) -> Value {
    attr_exc(format!(
        "cannot assign a {} to attribute '{}' of type '{}'",
        assigned.name, attr, class.name
    ))
}

pub fn import_exc_not_found(name: &str) -> Value {
    exc_value(&IMPORT_EXC_CLASS, format!("cannot find module '{}'", name))
}

pub fn seq_exp_exc_inconsistent(got: usize, expected: usize) -> Value {
    exc_value(
        &SEQ_EXP_EXC_CLASS,
        format!("sequence expanded to {} element(s) ({} expected)", got, expected),
    )
}
