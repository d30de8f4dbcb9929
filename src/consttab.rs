// File: src/consttab.rs
//
// Compile-time constant table. Int/float/string keys are interned with
// stable sequential ids; nested code objects are never deduplicated and
// are tracked in a FIFO that the emitting pass polls in definition order.

use ahash::RandomState;
use std::collections::HashMap;

use crate::bytecode::CodeBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i32),
    /// Interned by bit pattern.
    Float(u64),
    Str(String),
}

#[derive(Debug)]
pub enum ConstEntry {
    Int(i32),
    Float(f64),
    Str(String),
    Code(CodeBuffer),
}

#[derive(Debug, Default)]
pub struct ConstTable {
    map: HashMap<ConstKey, u16, RandomState>,
    next_id: u16,
    /// (id, serialized body) in definition order.
    codeobjs: Vec<(u16, CodeBuffer)>,
    poll_pos: usize,
}

impl ConstTable {
    pub fn new() -> ConstTable {
        ConstTable::default()
    }

    pub fn len(&self) -> usize {
        self.next_id as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }

    fn intern(&mut self, key: ConstKey) -> u16 {
        if let Some(&id) = self.map.get(&key) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.map.insert(key, id);
        id
    }

    pub fn id_for_int(&mut self, n: i32) -> u16 {
        self.intern(ConstKey::Int(n))
    }

    pub fn id_for_float(&mut self, f: f64) -> u16 {
        self.intern(ConstKey::Float(f.to_bits()))
    }

    pub fn id_for_str(&mut self, s: &str) -> u16 {
        self.intern(ConstKey::Str(s.to_string()))
    }

    /// Adds a compiled code object; each gets a fresh id regardless of
    /// content.
    pub fn add_codeobj(&mut self, code: CodeBuffer) -> u16 {
        let id = self.next_id;
        self.next_id += 1;
        self.codeobjs.push((id, code));
        id
    }

    /// Yields code-object ids in definition order; the emitting pass calls
    /// this once per function/generator/actor/lambda literal.
    pub fn poll_codeobj(&mut self) -> u16 {
        let id = self.codeobjs[self.poll_pos].0;
        self.poll_pos += 1;
        id
    }

    /// All entries ordered by id.
    pub fn entries(&self) -> Vec<ConstEntry> {
        let mut out: Vec<Option<ConstEntry>> = (0..self.next_id).map(|_| None).collect();
        for (key, &id) in &self.map {
            out[id as usize] = Some(match key {
                ConstKey::Int(n) => ConstEntry::Int(*n),
                ConstKey::Float(bits) => ConstEntry::Float(f64::from_bits(*bits)),
                ConstKey::Str(s) => ConstEntry::Str(s.clone()),
            });
        }
        for (id, code) in &self.codeobjs {
            out[*id as usize] = Some(ConstEntry::Code(code.clone()));
        }
        out.into_iter().map(|e| e.expect("constant id gap")).collect()
    }
}
