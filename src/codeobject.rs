// File: src/codeobject.rs
//
// Executable code objects and the loader that parses them out of the
// serialized image: metadata, line-number table, symbol table, constant
// table (recursing into nested code objects), then raw bytecode.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::bytecode::{
    CodeReader, Opcode, CT_ENTRY_BEGIN, CT_ENTRY_CODEOBJ, CT_ENTRY_END, CT_ENTRY_FLOAT,
    CT_ENTRY_INT, CT_ENTRY_STRING, MAGIC, ST_ENTRY_BEGIN, ST_ENTRY_END,
};
use crate::class::Class;
use crate::errors::{self, Error, ErrorKind};
use crate::objects::str_value;
use crate::value::{Obj, Payload, Value};
use crate::vm::Frame;
use crate::vmops;

/// A module's global variables. The top-level frame's locals are the
/// globals; every code object compiled within the module shares this
/// record, so functions imported elsewhere still see their own module's
/// globals, and actors may touch them concurrently.
#[derive(Debug)]
pub struct Globals {
    pub names: Vec<String>,
    pub values: Mutex<Vec<Value>>,
}

impl Globals {
    pub fn new(names: Vec<String>) -> Arc<Globals> {
        let values = vec![Value::Empty; names.len()];
        Arc::new(Globals { names, values: Mutex::new(values) })
    }
}

/// Compiled code for one scope (module, function, generator or actor body,
/// lambda), plus its symbol and constant tables.
#[derive(Debug)]
pub struct CodeObject {
    pub name: String,
    pub bc: Vec<u8>,
    pub argcount: u16,
    pub stack_depth: u16,
    pub try_catch_depth: u16,

    /// Bound local names; the first `argcount` are the parameters.
    pub names: Vec<String>,
    /// Attribute names referenced by LOAD_ATTR / SET_ATTR.
    pub attrs: Vec<String>,
    /// Free-variable names, resolved from the builtins.
    pub frees: Vec<String>,
    pub consts: Vec<Value>,

    pub lno_table: Vec<u8>,
    pub first_lineno: u16,

    pub globals: Arc<Globals>,

    /// Parameter type hints plus return hint, installed by the
    /// MAKE_FUNCOBJ / MAKE_GENERATOR / MAKE_ACTOR instruction.
    pub hints: Mutex<Option<Vec<Option<&'static Class>>>>,

    /// Persisted frame reused by non-recursive invocations.
    pub frame_pool: Mutex<Option<Box<Frame>>>,

    /// Per-byte-offset line-number memo (0 = not yet computed).
    lineno_cache: Vec<AtomicU32>,
}

pub static CODE_CLASS: Class = Class {
    name: "CodeObject",
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

pub fn code_value(co: Arc<CodeObject>) -> Value {
    Obj::new(&CODE_CLASS, Payload::Code(co)).into_value()
}

fn invalid(detail: &str) -> Box<Error> {
    match errors::err_invalid_bytecode(detail) {
        Value::Error(e) => e,
        _ => unreachable!(),
    }
}

/// Loads a complete `.rhoc` image: magic, module depths, top-level body.
pub fn load_image(bytes: &[u8], origin: &str) -> Result<Arc<CodeObject>, Box<Error>> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Err(Box::new(Error::new(
            ErrorKind::BadSignature,
            format!("'{}' does not begin with a valid signature", origin),
        )));
    }
    let mut reader = CodeReader::new(&bytes[MAGIC.len()..]);
    let stack_depth = reader.read_uint16().ok_or_else(|| invalid("truncated header"))?;
    let try_catch_depth = reader.read_uint16().ok_or_else(|| invalid("truncated header"))?;
    read_code_object(&mut reader, "<module>", 0, stack_depth, try_catch_depth, None)
}

/// Parses one code-object body from `reader`, consuming it to the end.
/// `globals` is None only for the top-level scope, which creates the
/// record from its own symbol table.
fn read_code_object(
    reader: &mut CodeReader,
    name: &str,
    argcount: u16,
    stack_depth: u16,
    try_catch_depth: u16,
    globals: Option<Arc<Globals>>,
) -> Result<Arc<CodeObject>, Box<Error>> {
    let first_lineno = reader.read_uint16().ok_or_else(|| invalid("truncated preamble"))?;
    let lno_table_size = reader.read_uint16().ok_or_else(|| invalid("truncated preamble"))?;
    let lno_table = reader
        .read_slice(lno_table_size as usize)
        .ok_or_else(|| invalid("truncated line-number table"))?
        .to_vec();

    // symbol table: three NUL-terminated string arrays
    if reader.read_byte() != Some(ST_ENTRY_BEGIN) {
        return Err(invalid("missing symbol-table delimiter"));
    }
    let names = read_str_array(reader)?;
    let attrs = read_str_array(reader)?;
    let frees = read_str_array(reader)?;
    if reader.read_byte() != Some(ST_ENTRY_END) {
        return Err(invalid("missing symbol-table delimiter"));
    }

    let globals = match globals {
        Some(g) => g,
        None => Globals::new(names.clone()),
    };

    // constant table
    if reader.read_byte() != Some(CT_ENTRY_BEGIN) {
        return Err(invalid("missing constant-table delimiter"));
    }
    let ct_size = reader.read_uint16().ok_or_else(|| invalid("truncated constant table"))?;
    let mut consts = Vec::with_capacity(ct_size as usize);
    for _ in 0..ct_size {
        let tag = reader.read_byte().ok_or_else(|| invalid("truncated constant table"))?;
        let value = match tag {
            CT_ENTRY_INT => Value::Int(
                reader.read_int().ok_or_else(|| invalid("truncated int constant"))? as i64,
            ),
            CT_ENTRY_FLOAT => Value::Float(
                reader.read_double().ok_or_else(|| invalid("truncated float constant"))?,
            ),
            CT_ENTRY_STRING => str_value(
                reader.read_str().ok_or_else(|| invalid("bad string constant"))?,
            ),
            CT_ENTRY_CODEOBJ => {
                let sub_len =
                    reader.read_uint16().ok_or_else(|| invalid("truncated code constant"))?;
                let sub_name =
                    reader.read_str().ok_or_else(|| invalid("bad code-constant name"))?;
                let sub_argcount =
                    reader.read_uint16().ok_or_else(|| invalid("truncated code constant"))?;
                let sub_stack_depth =
                    reader.read_uint16().ok_or_else(|| invalid("truncated code constant"))?;
                let sub_try_catch_depth =
                    reader.read_uint16().ok_or_else(|| invalid("truncated code constant"))?;
                let body = reader
                    .read_slice(sub_len as usize)
                    .ok_or_else(|| invalid("truncated code constant"))?;
                let mut sub_reader = CodeReader::new(body);
                let sub = read_code_object(
                    &mut sub_reader,
                    &sub_name,
                    sub_argcount,
                    sub_stack_depth,
                    sub_try_catch_depth,
                    Some(globals.clone()),
                )?;
                code_value(sub)
            }
            _ => return Err(invalid("unknown constant tag")),
        };
        consts.push(value);
    }
    if reader.read_byte() != Some(CT_ENTRY_END) {
        return Err(invalid("missing constant-table delimiter"));
    }

    // everything that remains is bytecode
    let bc = reader
        .read_slice(reader.remaining())
        .ok_or_else(|| invalid("truncated bytecode"))?
        .to_vec();
    validate_bytecode(&bc)?;

    let lineno_cache = (0..bc.len()).map(|_| AtomicU32::new(0)).collect();

    Ok(Arc::new(CodeObject {
        name: name.to_string(),
        bc,
        argcount,
        stack_depth,
        try_catch_depth,
        names,
        attrs,
        frees,
        consts,
        lno_table,
        first_lineno,
        globals,
        hints: Mutex::new(None),
        frame_pool: Mutex::new(None),
        lineno_cache,
    }))
}

fn read_str_array(reader: &mut CodeReader) -> Result<Vec<String>, Box<Error>> {
    let count = reader.read_uint16().ok_or_else(|| invalid("truncated symbol table"))?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(reader.read_str().ok_or_else(|| invalid("bad symbol-table entry"))?);
    }
    Ok(out)
}

/// The evaluator tolerates only known opcodes with intact operands.
fn validate_bytecode(bc: &[u8]) -> Result<(), Box<Error>> {
    let mut pos = 0;
    while pos < bc.len() {
        let op = Opcode::from_byte(bc[pos]).ok_or_else(|| invalid("unknown opcode"))?;
        pos += 1 + op.arg_size();
        if pos > bc.len() {
            return Err(invalid("truncated operand"));
        }
    }
    Ok(())
}

impl CodeObject {
    /// Return-type hint, if one was installed.
    pub fn ret_hint(&self) -> Option<&'static Class> {
        self.hints.lock().unwrap().as_ref().and_then(|h| h.last().copied().flatten())
    }

    /// Translates a raw byte offset into a source line number, memoizing
    /// the answer per offset.
    pub fn lineno_at(&self, pos: usize) -> u32 {
        let pos = pos.min(self.bc.len().saturating_sub(1));
        if self.bc.is_empty() {
            return self.first_lineno as u32;
        }
        let cached = self.lineno_cache[pos].load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }

        // translate the byte offset into an instruction index
        let mut p = 0;
        let mut ins_pos = 0usize;
        while p < pos {
            match Opcode::from_byte(self.bc[p]) {
                Some(op) => p += 1 + op.arg_size(),
                None => break,
            }
            ins_pos += 1;
        }

        // accumulate (instruction-delta, line-delta) runs
        let mut lineno_offset = 0u32;
        let mut ins_offset = 0usize;
        let mut i = 0;
        while i + 1 < self.lno_table.len() {
            let ins_delta = self.lno_table[i] as usize;
            let lineno_delta = self.lno_table[i + 1] as u32;
            i += 2;
            if ins_delta == 0 && lineno_delta == 0 {
                break;
            }
            ins_offset += ins_delta;
            if ins_offset >= ins_pos {
                break;
            }
            lineno_offset += lineno_delta;
        }

        let lineno = self.first_lineno as u32 + lineno_offset;
        self.lineno_cache[pos].store(lineno, Ordering::Relaxed);
        lineno
    }

    /// Binds call arguments into `locals` per the calling convention:
    /// positionals in order, then named arguments matched against the
    /// parameter names, then defaults for trailing parameters. Type hints,
    /// if installed, are enforced per bound parameter. Returns Empty on
    /// success or a catchable exception.
    pub fn bind_args(
        &self,
        defaults: &[Value],
        args: &[Value],
        named: &[Value],
        locals: &mut [Value],
    ) -> Value {
        let argcount = self.argcount as usize;

        macro_rules! fail {
            ($exc:expr) => {{
                for slot in locals.iter_mut().take(argcount) {
                    *slot = Value::Empty;
                }
                return $exc;
            }};
        }

        if args.len() > argcount {
            return errors::call_exc_num_args(&self.name, args.len(), argcount);
        }

        for (i, arg) in args.iter().enumerate() {
            locals[i] = arg.clone();
        }

        let hints = self.hints.lock().unwrap();
        let hint_of = |i: usize| -> Option<&'static Class> {
            hints.as_ref().and_then(|h| h.get(i).copied().flatten())
        };

        debug_assert!(named.len() % 2 == 0);
        for pair in named.chunks(2) {
            let name = match pair[0].as_obj().map(|o| o.payload()) {
                Some(Payload::Str(s)) => s.clone(),
                _ => fail!(errors::type_exc("named-argument name is not a string".to_string())),
            };
            let value = &pair[1];

            let mut found = false;
            for j in 0..argcount {
                if self.names[j] == name {
                    if !locals[j].is_empty() {
                        fail!(errors::call_exc_dup_arg(&self.name, &name));
                    }
                    if let Some(hint) = hint_of(j) {
                        if !vmops::is_a(value, hint) {
                            fail!(errors::type_exc_hint_mismatch(vmops::class_of(value), hint));
                        }
                    }
                    locals[j] = value.clone();
                    found = true;
                    break;
                }
            }
            if !found {
                fail!(errors::call_exc_unknown_arg(&self.name, &name));
            }
        }

        let default_start = argcount.saturating_sub(defaults.len());
        for i in 0..argcount {
            if locals[i].is_empty() {
                if i >= default_start {
                    locals[i] = defaults[i - default_start].clone();
                } else {
                    fail!(errors::call_exc_missing_arg(&self.name, &self.names[i]));
                }
            }
            if let Some(hint) = hint_of(i) {
                if !vmops::is_a(&locals[i], hint) {
                    fail!(errors::type_exc_hint_mismatch(vmops::class_of(&locals[i]), hint));
                }
            }
        }

        Value::Empty
    }
}
