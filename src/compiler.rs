// File: src/compiler.rs
//
// Bytecode compiler: lowers a symbol-table-annotated AST into the
// serialized image format. Two passes per scope: the first collects every
// constant (recursively compiling nested function bodies into code-object
// constants with stable ids), the second emits instructions. A linear scan
// over the emitted bytecode computes the maximum value-stack depth.

use crate::ast::{AssignOp, Ast, AstKind, BinOp, FuncKind, Program, UnOp};
use crate::bytecode::{
    read_uint16_at, CodeBuffer, Opcode, CT_ENTRY_BEGIN, CT_ENTRY_CODEOBJ, CT_ENTRY_END,
    CT_ENTRY_FLOAT, CT_ENTRY_INT, CT_ENTRY_STRING, MAGIC, ST_ENTRY_BEGIN, ST_ENTRY_END,
};
use crate::consttab::{ConstEntry, ConstTable};
use crate::errors::CompileError;
use crate::symtab::SymTable;

const DEFAULT_BC_CAPACITY: usize = 100;
const DEFAULT_LNO_TABLE_CAPACITY: usize = 30;

struct Metadata {
    max_vstack_depth: u16,
    max_try_catch_depth: u16,
}

struct LoopBlockInfo {
    start_index: usize,
    break_indices: Vec<usize>,
}

struct Compiler {
    code: CodeBuffer,
    lno_table: CodeBuffer,
    ct: ConstTable,
    loops: Vec<LoopBlockInfo>,
    try_catch_depth: u16,
    try_catch_depth_max: u16,
    first_lineno: u32,
    last_lineno: u32,
    first_ins_on_line_idx: u32,
    last_ins_idx: u32,
    in_generator: bool,
}

/// Compiles a program into a complete `.rhoc` image.
pub fn compile(program: &Program) -> Result<Vec<u8>, CompileError> {
    let mut st = SymTable::build(program);
    let mut compiler = Compiler::new(1, false);
    let meta = compiler.compile_raw(&mut st, program, false)?;

    let mut out = CodeBuffer::with_capacity(MAGIC.len() + 4 + compiler.code.len());
    for b in MAGIC {
        out.write_byte(b);
    }
    out.write_uint16(meta.max_vstack_depth);
    out.write_uint16(meta.max_try_catch_depth);
    out.append(&compiler.code);

    if std::env::var("RHO_DEBUG_BYTECODE").is_ok() {
        eprintln!(
            "DEBUG BYTECODE: image={}B stack_depth={} try_catch_depth={}",
            out.len(),
            meta.max_vstack_depth,
            meta.max_try_catch_depth
        );
    }

    Ok(out.into_bytes())
}

impl Compiler {
    fn new(first_lineno: u32, in_generator: bool) -> Compiler {
        Compiler {
            code: CodeBuffer::with_capacity(DEFAULT_BC_CAPACITY),
            lno_table: CodeBuffer::with_capacity(DEFAULT_LNO_TABLE_CAPACITY),
            ct: ConstTable::new(),
            loops: Vec::new(),
            try_catch_depth: 0,
            try_catch_depth_max: 0,
            first_lineno,
            last_lineno: first_lineno,
            first_ins_on_line_idx: 0,
            last_ins_idx: 0,
            in_generator,
        }
    }

    /// Compiles one scope into [first_lineno][lno table][symbols]
    /// [constants][bytecode], leaving the result in `self.code`.
    fn compile_raw(
        &mut self,
        st: &mut SymTable,
        stmts: &[Ast],
        is_single_expr: bool,
    ) -> Result<Metadata, CompileError> {
        self.fill_ct(st, stmts)?;
        self.write_sym_table(st);
        self.write_const_table();

        let bc_start = self.code.len();

        if is_single_expr {
            debug_assert!(stmts.len() == 1);
            self.compile_node(st, &stmts[0], false)?;
            self.write_ins(Opcode::Return, 0);
        } else {
            for stmt in stmts {
                self.compile_node(st, stmt, true)?;
            }
            self.write_ins(
                if self.in_generator { Opcode::LoadIterStop } else { Opcode::LoadNull },
                0,
            );
            self.write_ins(Opcode::Return, 0);
        }

        // two zeros mark the end of the line number table
        self.lno_table.write_byte(0);
        self.lno_table.write_byte(0);

        let max_vstack_depth = max_stack_depth(&self.code.as_bytes()[bc_start..]);
        let max_try_catch_depth = self.try_catch_depth_max;

        // The line-number table comes before the symbol/constant tables in
        // the serialized form, but it is not complete until compilation
        // is, so the finished product is assembled into a fresh buffer.
        let lno_table_size = self.lno_table.len();
        let mut complete = CodeBuffer::with_capacity(4 + lno_table_size + self.code.len());
        complete.write_uint16(self.first_lineno as u16);
        complete.write_uint16(lno_table_size as u16);
        complete.append(&self.lno_table);
        complete.append(&self.code);
        self.code = complete;

        Ok(Metadata { max_vstack_depth, max_try_catch_depth })
    }

    // --- low-level emission ----------------------------------------------

    /// Emits an opcode, maintaining the (instruction-delta, line-delta)
    /// run-length table. Compiler-generated instructions pass lineno 0.
    fn write_ins(&mut self, op: Opcode, lineno: u32) {
        let curr_lineno = self.last_lineno;
        if lineno > curr_lineno {
            let mut ins_delta = self.last_ins_idx - self.first_ins_on_line_idx;
            let mut lineno_delta = lineno - curr_lineno;
            self.first_ins_on_line_idx = self.last_ins_idx;

            while lineno_delta > 0 || ins_delta > 0 {
                let x = ins_delta.min(0xff) as u8;
                let y = lineno_delta.min(0xff) as u8;
                self.lno_table.write_byte(x);
                self.lno_table.write_byte(y);
                ins_delta -= x as u32;
                lineno_delta -= y as u32;
            }

            self.last_lineno = lineno;
        }
        self.last_ins_idx += 1;
        self.code.write_op(op);
    }

    fn write_uint16(&mut self, n: u16) {
        self.code.write_uint16(n);
    }

    fn write_uint16_at(&mut self, n: usize, pos: usize) {
        self.code.write_uint16_at(n as u16, pos);
    }

    /// Reserves a 2-byte operand slot, returning its position for
    /// backpatching.
    fn reserve_u16(&mut self) -> usize {
        let pos = self.code.len();
        self.code.write_uint16(0);
        pos
    }

    /// Patches a reserved forward-jump operand to land at the current
    /// position.
    fn patch_forward(&mut self, operand_pos: usize) {
        self.write_uint16_at(self.code.len() - operand_pos - 2, operand_pos);
    }

    fn push_loop(&mut self, start_index: usize) {
        self.loops.push(LoopBlockInfo { start_index, break_indices: Vec::new() });
    }

    fn pop_loop(&mut self) {
        let lbi = self.loops.pop().expect("loop stack underflow");
        let end_index = self.code.len();
        for break_index in lbi.break_indices {
            self.write_uint16_at(end_index - break_index - 2, break_index);
        }
    }

    fn err<T>(&self, lineno: u32, msg: impl Into<String>) -> Result<T, CompileError> {
        Err(CompileError::new(lineno, msg))
    }

    // --- constant-collection pass ----------------------------------------
    //
    // Visits the AST in emission order, so the FIFO of nested code objects
    // polls back in exactly the order the emitting pass encounters the
    // function literals.

    fn fill_ct(&mut self, st: &mut SymTable, stmts: &[Ast]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.fill_node(st, stmt)?;
        }
        Ok(())
    }

    fn fill_func(
        &mut self,
        st: &mut SymTable,
        name: &str,
        argcount: u16,
        body: &[Ast],
        kind: Option<FuncKind>,
        lineno: u32,
    ) -> Result<(), CompileError> {
        let first_lineno = body.first().map(|s| s.lineno).unwrap_or(lineno);

        st.descend();
        let mut sub = Compiler::new(first_lineno, kind == Some(FuncKind::Gen));
        let meta = sub.compile_raw(st, body, kind.is_none())?;
        st.ascend();

        let mut wrapped = CodeBuffer::with_capacity(name.len() + 7 + sub.code.len());
        wrapped.write_str(name);
        wrapped.write_uint16(argcount);
        wrapped.write_uint16(meta.max_vstack_depth);
        wrapped.write_uint16(meta.max_try_catch_depth);
        wrapped.append(&sub.code);

        self.ct.add_codeobj(wrapped);
        Ok(())
    }

    fn fill_node(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        match &ast.kind {
            AstKind::Null | AstKind::Ident(_) | AstKind::Break | AstKind::Continue
            | AstKind::Import(_) | AstKind::Export(_) | AstKind::Receive(_) => {}
            AstKind::Int(n) => {
                let n = i32::try_from(*n)
                    .map_err(|_| CompileError::new(ast.lineno, "integer literal out of range"))?;
                self.ct.id_for_int(n);
            }
            AstKind::Float(f) => {
                self.ct.id_for_float(*f);
            }
            AstKind::Str(s) => {
                self.ct.id_for_str(s);
            }
            AstKind::Un(_, operand) => self.fill_node(st, operand)?,
            AstKind::Bin(_, lhs, rhs) => {
                self.fill_node(st, lhs)?;
                self.fill_node(st, rhs)?;
            }
            AstKind::Cond { cond, then, els } => {
                self.fill_node(st, cond)?;
                self.fill_node(st, then)?;
                self.fill_node(st, els)?;
            }
            AstKind::Assign(op, lhs, rhs) => {
                if *op == AssignOp::Assign {
                    self.fill_node(st, rhs)?;
                    self.fill_node(st, lhs)?;
                } else {
                    self.fill_node(st, lhs)?;
                    self.fill_node(st, rhs)?;
                }
            }
            AstKind::Call { func, args, named } => {
                for arg in args {
                    self.fill_node(st, arg)?;
                }
                for (name, value) in named {
                    self.ct.id_for_str(name);
                    self.fill_node(st, value)?;
                }
                self.fill_node(st, func)?;
            }
            AstKind::Index(obj, index) => {
                self.fill_node(st, obj)?;
                self.fill_node(st, index)?;
            }
            AstKind::Attr(obj, _) => self.fill_node(st, obj)?,
            AstKind::ListLit(elems) | AstKind::TupleLit(elems) | AstKind::SetLit(elems) => {
                for elem in elems {
                    self.fill_node(st, elem)?;
                }
            }
            AstKind::DictLit(pairs) => {
                for (k, v) in pairs {
                    self.fill_node(st, k)?;
                    self.fill_node(st, v)?;
                }
            }
            AstKind::Lambda { body, max_dollar } => {
                let body_slice = std::slice::from_ref(body.as_ref());
                self.fill_func(st, "<lambda>", *max_dollar, body_slice, None, ast.lineno)?;
            }
            AstKind::Def { kind, name, params, ret_hint: _, body } => {
                self.fill_func(st, name, params.len() as u16, body, Some(*kind), ast.lineno)?;
                for param in params {
                    if let Some(default) = &param.default {
                        self.fill_node(st, default)?;
                    }
                }
            }
            AstKind::Print(expr) | AstKind::Throw(expr) | AstKind::Produce(expr) => {
                self.fill_node(st, expr)?
            }
            AstKind::Return(expr) => {
                if let Some(expr) = expr {
                    self.fill_node(st, expr)?;
                }
            }
            AstKind::If { cond, body, elifs, els } => {
                self.fill_node(st, cond)?;
                self.fill_ct(st, body)?;
                for (elif_cond, elif_body) in elifs {
                    self.fill_node(st, elif_cond)?;
                    self.fill_ct(st, elif_body)?;
                }
                if let Some(els) = els {
                    self.fill_ct(st, els)?;
                }
            }
            AstKind::While { cond, body } => {
                self.fill_node(st, cond)?;
                self.fill_ct(st, body)?;
            }
            AstKind::For { vars: _, iter, body } => {
                self.fill_node(st, iter)?;
                self.fill_ct(st, body)?;
            }
            AstKind::TryCatch { body, exc, catch } => {
                self.fill_ct(st, body)?;
                self.fill_node(st, exc)?;
                self.fill_ct(st, catch)?;
            }
        }
        Ok(())
    }

    // --- serialization of the tables --------------------------------------

    fn write_sym_table(&mut self, st: &SymTable) {
        let locals = st.locals_in_order();
        let attrs = st.attrs_in_order();
        let frees = st.frees_in_order();

        self.code.write_byte(ST_ENTRY_BEGIN);
        self.code.write_uint16(locals.len() as u16);
        for name in &locals {
            self.code.write_str(name);
        }
        self.code.write_uint16(attrs.len() as u16);
        for name in &attrs {
            self.code.write_str(name);
        }
        self.code.write_uint16(frees.len() as u16);
        for name in &frees {
            self.code.write_str(name);
        }
        self.code.write_byte(ST_ENTRY_END);
    }

    fn write_const_table(&mut self) {
        let entries = self.ct.entries();

        self.code.write_byte(CT_ENTRY_BEGIN);
        self.code.write_uint16(entries.len() as u16);

        for entry in entries {
            match entry {
                ConstEntry::Int(n) => {
                    self.code.write_byte(CT_ENTRY_INT);
                    self.code.write_int(n);
                }
                ConstEntry::Float(f) => {
                    self.code.write_byte(CT_ENTRY_FLOAT);
                    self.code.write_double(f);
                }
                ConstEntry::Str(s) => {
                    self.code.write_byte(CT_ENTRY_STRING);
                    self.code.write_str(&s);
                }
                ConstEntry::Code(wrapped) => {
                    self.code.write_byte(CT_ENTRY_CODEOBJ);
                    // length of the body, excluding the (name, argcount,
                    // stack_depth, try_catch_depth) preamble
                    let bytes = wrapped.as_bytes();
                    let name_len = bytes.iter().position(|&b| b == 0).unwrap_or(0);
                    self.code.write_uint16((wrapped.len() - (name_len + 1) - 6) as u16);
                    self.code.append(&wrapped);
                }
            }
        }

        self.code.write_byte(CT_ENTRY_END);
    }

    // --- emission pass ----------------------------------------------------

    fn compile_body(&mut self, st: &mut SymTable, stmts: &[Ast]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_node(st, stmt, true)?;
        }
        Ok(())
    }

    fn compile_node(
        &mut self,
        st: &mut SymTable,
        ast: &Ast,
        toplevel: bool,
    ) -> Result<(), CompileError> {
        let lineno = ast.lineno;
        match &ast.kind {
            AstKind::Null => self.write_ins(Opcode::LoadNull, lineno),
            AstKind::Int(_) | AstKind::Float(_) | AstKind::Str(_) => {
                self.compile_literal(ast)?;
            }
            AstKind::Ident(name) => self.compile_load(st, name, lineno)?,

            AstKind::Bin(BinOp::And, lhs, rhs) => {
                self.compile_node(st, lhs, false)?;
                self.write_ins(Opcode::JmpIfFalseElsePop, lhs.lineno);
                let jump = self.reserve_u16();
                self.compile_node(st, rhs, false)?;
                self.patch_forward(jump);
            }
            AstKind::Bin(BinOp::Or, lhs, rhs) => {
                self.compile_node(st, lhs, false)?;
                self.write_ins(Opcode::JmpIfTrueElsePop, lhs.lineno);
                let jump = self.reserve_u16();
                self.compile_node(st, rhs, false)?;
                self.patch_forward(jump);
            }
            AstKind::Bin(op, lhs, rhs) => {
                self.compile_node(st, lhs, false)?;
                self.compile_node(st, rhs, false)?;
                self.write_ins(bin_opcode(*op), lineno);
            }
            AstKind::Un(op, operand) => {
                self.compile_node(st, operand, false)?;
                // unary + is an identity on numbers; a type error on
                // anything else surfaces at the first real operation
                self.write_ins(un_opcode(*op), lineno);
            }
            AstKind::Cond { cond, then, els } => {
                self.compile_node(st, cond, false)?;
                self.write_ins(Opcode::JmpIfFalse, lineno);
                let jmp_to_false = self.reserve_u16();
                self.compile_node(st, then, false)?;
                self.write_ins(Opcode::Jmp, lineno);
                let jmp_out = self.reserve_u16();
                self.patch_forward(jmp_to_false);
                self.compile_node(st, els, false)?;
                self.patch_forward(jmp_out);
            }
            AstKind::Assign(..) => self.compile_assignment(st, ast)?,
            AstKind::Call { .. } => {
                self.compile_call(st, ast)?;
                if toplevel {
                    self.write_ins(Opcode::Pop, lineno);
                }
            }
            AstKind::Index(obj, index) => {
                self.compile_node(st, obj, false)?;
                self.compile_node(st, index, false)?;
                self.write_ins(Opcode::LoadIndex, lineno);
            }
            AstKind::Attr(obj, attr) => {
                let attr_id = self.attr_id(st, attr, lineno)?;
                self.compile_node(st, obj, false)?;
                self.write_ins(Opcode::LoadAttr, lineno);
                self.write_uint16(attr_id);
            }
            AstKind::ListLit(elems) => {
                for elem in elems {
                    self.compile_node(st, elem, false)?;
                }
                self.write_ins(Opcode::MakeList, lineno);
                self.write_uint16(elems.len() as u16);
            }
            AstKind::TupleLit(elems) => {
                for elem in elems {
                    self.compile_node(st, elem, false)?;
                }
                self.write_ins(Opcode::MakeTuple, lineno);
                self.write_uint16(elems.len() as u16);
            }
            AstKind::SetLit(elems) => {
                for elem in elems {
                    self.compile_node(st, elem, false)?;
                }
                self.write_ins(Opcode::MakeSet, lineno);
                self.write_uint16(elems.len() as u16);
            }
            AstKind::DictLit(pairs) => {
                for (k, v) in pairs {
                    self.compile_node(st, k, false)?;
                    self.compile_node(st, v, false)?;
                }
                self.write_ins(Opcode::MakeDict, lineno);
                self.write_uint16((pairs.len() * 2) as u16);
            }
            AstKind::Lambda { .. } => {
                // a lambda gets no hint record and no defaults
                let id = self.ct.poll_codeobj();
                self.write_ins(Opcode::LoadConst, lineno);
                self.write_uint16(id);
                self.write_ins(Opcode::MakeFuncObj, lineno);
                self.write_uint16(0);
            }
            AstKind::Def { .. } => self.compile_def(st, ast)?,

            AstKind::Print(expr) => {
                self.compile_node(st, expr, false)?;
                self.write_ins(Opcode::Print, lineno);
            }
            AstKind::If { .. } => self.compile_if(st, ast)?,
            AstKind::While { cond, body } => {
                let loop_start = self.code.len();
                self.compile_node(st, cond, false)?;
                self.write_ins(Opcode::JmpIfFalse, 0);
                let jump = self.reserve_u16();

                self.push_loop(loop_start);
                self.compile_body(st, body)?;

                self.write_ins(Opcode::JmpBack, 0);
                let back = self.code.len() - loop_start + 2;
                self.write_uint16(back as u16);

                self.patch_forward(jump);
                self.pop_loop();
            }
            AstKind::For { .. } => self.compile_for(st, ast)?,
            AstKind::Break => {
                if self.loops.is_empty() {
                    return self.err(lineno, "'break' outside of a loop");
                }
                self.write_ins(Opcode::Jmp, lineno);
                let break_index = self.reserve_u16();
                // the jump target is known only once the loop is finished
                self.loops.last_mut().unwrap().break_indices.push(break_index);
            }
            AstKind::Continue => {
                if self.loops.is_empty() {
                    return self.err(lineno, "'continue' outside of a loop");
                }
                self.write_ins(Opcode::JmpBack, lineno);
                let start_index = self.loops.last().unwrap().start_index;
                let back = self.code.len() - start_index + 2;
                self.write_uint16(back as u16);
            }
            AstKind::Return(expr) => {
                match expr {
                    Some(expr) => {
                        // the parser rejects this; the compiler double-checks
                        if self.in_generator {
                            return self.err(lineno, "generators cannot return values");
                        }
                        self.compile_node(st, expr, false)?;
                    }
                    None => {
                        self.write_ins(
                            if self.in_generator {
                                Opcode::LoadIterStop
                            } else {
                                Opcode::LoadNull
                            },
                            lineno,
                        );
                    }
                }
                self.write_ins(Opcode::Return, lineno);
            }
            AstKind::Throw(expr) => {
                self.compile_node(st, expr, false)?;
                self.write_ins(Opcode::Throw, lineno);
            }
            AstKind::Produce(expr) => {
                self.compile_node(st, expr, false)?;
                self.write_ins(Opcode::Produce, lineno);
            }
            AstKind::Receive(name) => {
                let sym = self.symbol(st, name, lineno)?;
                if !sym.bound {
                    return self.err(lineno, "'receive' into an unbound name");
                }
                self.write_ins(Opcode::Receive, lineno);
                self.write_ins(Opcode::Store, lineno);
                self.write_uint16(sym.id);
            }
            AstKind::TryCatch { .. } => self.compile_try_catch(st, ast)?,
            AstKind::Import(name) => {
                let sym = self.symbol(st, name, lineno)?;
                self.write_ins(Opcode::Import, lineno);
                self.write_uint16(sym.id);
                self.write_ins(Opcode::Store, lineno);
                self.write_uint16(sym.id);
            }
            AstKind::Export(name) => {
                self.compile_load(st, name, lineno)?;
                let sym = self.symbol(st, name, lineno)?;
                let op = if sym.bound {
                    Opcode::Export
                } else if sym.global {
                    Opcode::ExportGlobal
                } else {
                    Opcode::ExportName
                };
                self.write_ins(op, lineno);
                self.write_uint16(sym.id);
            }
        }
        Ok(())
    }

    fn symbol(
        &self,
        st: &SymTable,
        name: &str,
        lineno: u32,
    ) -> Result<crate::symtab::Symbol, CompileError> {
        st.symbol(name)
            .ok_or_else(|| CompileError::new(lineno, format!("unresolved name '{}'", name)))
    }

    fn attr_id(&self, st: &SymTable, name: &str, lineno: u32) -> Result<u16, CompileError> {
        st.attr_id(name)
            .ok_or_else(|| CompileError::new(lineno, format!("unresolved attribute '{}'", name)))
    }

    fn compile_literal(&mut self, ast: &Ast) -> Result<(), CompileError> {
        let id = match &ast.kind {
            AstKind::Int(n) => {
                let n = i32::try_from(*n)
                    .map_err(|_| CompileError::new(ast.lineno, "integer literal out of range"))?;
                self.ct.id_for_int(n)
            }
            AstKind::Float(f) => self.ct.id_for_float(*f),
            AstKind::Str(s) => self.ct.id_for_str(s),
            _ => unreachable!("not a literal"),
        };
        self.write_ins(Opcode::LoadConst, ast.lineno);
        self.write_uint16(id);
        Ok(())
    }

    fn compile_load(
        &mut self,
        st: &SymTable,
        name: &str,
        lineno: u32,
    ) -> Result<(), CompileError> {
        let sym = self.symbol(st, name, lineno)?;
        let op = if sym.bound {
            Opcode::Load
        } else if sym.global {
            Opcode::LoadGlobal
        } else {
            Opcode::LoadName
        };
        self.write_ins(op, lineno);
        self.write_uint16(sym.id);
        Ok(())
    }

    fn compile_assignment(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        let lineno = ast.lineno;
        let (op, lhs, rhs) = match &ast.kind {
            AstKind::Assign(op, lhs, rhs) => (*op, lhs.as_ref(), rhs.as_ref()),
            _ => unreachable!("not an assignment"),
        };

        match &lhs.kind {
            AstKind::Attr(obj, attr) => {
                let attr_id = self.attr_id(st, attr, lineno)?;
                if op == AssignOp::Assign {
                    self.compile_node(st, rhs, false)?;
                    self.compile_node(st, obj, false)?;
                    self.write_ins(Opcode::SetAttr, lineno);
                    self.write_uint16(attr_id);
                } else {
                    // compound assignment: evaluate the receiver once
                    self.compile_node(st, obj, false)?;
                    self.write_ins(Opcode::Dup, lineno);
                    self.write_ins(Opcode::LoadAttr, lineno);
                    self.write_uint16(attr_id);
                    self.compile_node(st, rhs, false)?;
                    self.write_ins(inplace_opcode(op), lineno);
                    self.write_ins(Opcode::Rot, lineno);
                    self.write_ins(Opcode::SetAttr, lineno);
                    self.write_uint16(attr_id);
                }
            }
            AstKind::Index(obj, index) => {
                if op == AssignOp::Assign {
                    // value first: SET_INDEX consumes value, target, index
                    self.compile_node(st, rhs, false)?;
                    self.compile_node(st, obj, false)?;
                    self.compile_node(st, index, false)?;
                    self.write_ins(Opcode::SetIndex, lineno);
                } else {
                    self.compile_node(st, obj, false)?;
                    self.compile_node(st, index, false)?;
                    self.write_ins(Opcode::DupTwo, lineno);
                    self.write_ins(Opcode::LoadIndex, lineno);
                    self.compile_node(st, rhs, false)?;
                    self.write_ins(inplace_opcode(op), lineno);
                    self.write_ins(Opcode::RotThree, lineno);
                    self.write_ins(Opcode::SetIndex, lineno);
                }
            }
            AstKind::Ident(name) => {
                let sym = self.symbol(st, name, lineno)?;
                if !(sym.bound || sym.global) {
                    return self.err(lineno, format!("cannot assign to '{}'", name));
                }
                if op == AssignOp::Assign {
                    self.compile_node(st, rhs, false)?;
                } else {
                    self.compile_load(st, name, lineno)?;
                    self.compile_node(st, rhs, false)?;
                    self.write_ins(inplace_opcode(op), lineno);
                }
                let store = if sym.bound { Opcode::Store } else { Opcode::StoreGlobal };
                self.write_ins(store, lineno);
                self.write_uint16(sym.id);
            }
            _ => return self.err(lineno, "invalid assignment target"),
        }
        Ok(())
    }

    fn compile_call(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        let lineno = ast.lineno;
        let (func, args, named) = match &ast.kind {
            AstKind::Call { func, args, named } => (func, args, named),
            _ => unreachable!("not a call"),
        };

        for arg in args {
            self.compile_node(st, arg, false)?;
        }
        for (name, value) in named {
            let id = self.ct.id_for_str(name);
            self.write_ins(Opcode::LoadConst, lineno);
            self.write_uint16(id);
            self.compile_node(st, value, false)?;
        }

        self.compile_node(st, func, false)?;
        self.write_ins(Opcode::Call, lineno);
        self.write_uint16(((named.len() as u16) << 8) | args.len() as u16);
        Ok(())
    }

    fn compile_if(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        let lineno = ast.lineno;
        let (cond, body, elifs, els) = match &ast.kind {
            AstKind::If { cond, body, elifs, els } => (cond, body, elifs, els),
            _ => unreachable!("not an if"),
        };

        // forward-jump placeholders after each branch body, all patched to
        // the same post-chain offset
        let mut out_jumps = Vec::with_capacity(1 + elifs.len());

        self.compile_node(st, cond, false)?;
        self.write_ins(Opcode::JmpIfFalse, lineno);
        let mut next_jump = self.reserve_u16();
        self.compile_body(st, body)?;
        self.write_ins(Opcode::Jmp, lineno);
        out_jumps.push(self.reserve_u16());
        self.patch_forward(next_jump);

        for (elif_cond, elif_body) in elifs {
            self.compile_node(st, elif_cond, false)?;
            self.write_ins(Opcode::JmpIfFalse, elif_cond.lineno);
            next_jump = self.reserve_u16();
            self.compile_body(st, elif_body)?;
            self.write_ins(Opcode::Jmp, elif_cond.lineno);
            out_jumps.push(self.reserve_u16());
            self.patch_forward(next_jump);
        }

        if let Some(els) = els {
            self.compile_body(st, els)?;
        }

        for jump in out_jumps {
            self.patch_forward(jump);
        }
        Ok(())
    }

    fn compile_for(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        let lineno = ast.lineno;
        let (vars, iter, body) = match &ast.kind {
            AstKind::For { vars, iter, body } => (vars, iter, body),
            _ => unreachable!("not a for"),
        };

        self.compile_node(st, iter, false)?;
        self.write_ins(Opcode::GetIter, lineno);

        let loop_start = self.code.len();
        self.push_loop(loop_start);
        self.write_ins(Opcode::LoopIter, iter.lineno);
        let exit_jump = self.reserve_u16();

        if vars.len() == 1 {
            let sym = self.symbol(st, &vars[0], lineno)?;
            self.write_ins(Opcode::Store, lineno);
            self.write_uint16(sym.id);
        } else {
            self.write_ins(Opcode::SeqExpand, lineno);
            self.write_uint16(vars.len() as u16);
            // the sequence expands left-to-right, so store in reverse
            for var in vars.iter().rev() {
                let sym = self.symbol(st, var, lineno)?;
                self.write_ins(Opcode::Store, lineno);
                self.write_uint16(sym.id);
            }
        }

        self.compile_body(st, body)?;

        self.write_ins(Opcode::JmpBack, 0);
        let back = self.code.len() - loop_start + 2;
        self.write_uint16(back as u16);

        self.patch_forward(exit_jump);
        self.pop_loop();

        // discard the iterator left behind by GET_ITER
        self.write_ins(Opcode::Pop, 0);
        Ok(())
    }

    fn compile_def(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        let lineno = ast.lineno;
        let (kind, name, params, ret_hint) = match &ast.kind {
            AstKind::Def { kind, name, params, ret_hint, body: _ } => {
                (*kind, name, params, ret_hint)
            }
            _ => unreachable!("not a def"),
        };

        // A function definition is the assignment of a code object to a
        // variable.
        let sym = self.symbol(st, name, lineno)?;

        let id = self.ct.poll_codeobj();
        self.write_ins(Opcode::LoadConst, lineno);
        self.write_uint16(id);

        // one hint slot per parameter plus the return slot
        for param in params {
            match &param.hint {
                Some(hint) => self.compile_load(st, hint, param.lineno)?,
                None => self.write_ins(Opcode::LoadNull, lineno),
            }
        }
        match ret_hint {
            Some(hint) => self.compile_load(st, hint, lineno)?,
            None => self.write_ins(Opcode::LoadNull, lineno),
        }
        let num_hints = params.len() + 1;

        let mut num_defaults = 0;
        for param in params {
            if let Some(default) = &param.default {
                self.compile_node(st, default, false)?;
                num_defaults += 1;
            }
        }

        let make = match kind {
            FuncKind::Def => Opcode::MakeFuncObj,
            FuncKind::Gen => Opcode::MakeGenerator,
            FuncKind::Act => Opcode::MakeActor,
        };
        self.write_ins(make, lineno);
        self.write_uint16(((num_hints as u16) << 8) | num_defaults as u16);

        self.write_ins(Opcode::Store, lineno);
        self.write_uint16(sym.id);
        Ok(())
    }

    fn compile_try_catch(&mut self, st: &mut SymTable, ast: &Ast) -> Result<(), CompileError> {
        let try_lineno = ast.lineno;
        let (body, exc, catch) = match &ast.kind {
            AstKind::TryCatch { body, exc, catch } => (body, exc, catch),
            _ => unreachable!("not a try/catch"),
        };
        let catch_lineno = exc.lineno;

        self.write_ins(Opcode::TryBegin, try_lineno);
        let try_len_index = self.reserve_u16();
        let handler_off_index = self.reserve_u16();

        self.try_catch_depth += 1;
        if self.try_catch_depth > self.try_catch_depth_max {
            self.try_catch_depth_max = self.try_catch_depth;
        }
        self.compile_body(st, body)?;
        self.try_catch_depth -= 1;

        self.write_ins(Opcode::TryEnd, catch_lineno);
        self.write_uint16_at(self.code.len() - try_len_index - 4, try_len_index);

        // jump past the handler when no exception was thrown
        self.write_ins(Opcode::Jmp, catch_lineno);
        let jmp_over_handler = self.reserve_u16();

        self.write_uint16_at(self.code.len() - handler_off_index - 2, handler_off_index);

        // handler: match the exception class or re-throw
        self.write_ins(Opcode::Dup, catch_lineno);
        self.compile_node(st, exc, false)?;
        self.write_ins(Opcode::JmpIfExcMismatch, catch_lineno);
        let mismatch_jump = self.reserve_u16();

        self.write_ins(Opcode::Pop, catch_lineno);
        self.compile_body(st, catch)?;

        // jump over the re-throw
        self.write_ins(Opcode::Jmp, catch_lineno);
        self.write_uint16(1);

        self.patch_forward(mismatch_jump);
        self.write_ins(Opcode::Throw, catch_lineno);

        self.patch_forward(jmp_over_handler);
        Ok(())
    }
}

fn bin_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        BinOp::Pow => Opcode::Pow,
        BinOp::BitAnd => Opcode::BitAnd,
        BinOp::BitOr => Opcode::BitOr,
        BinOp::Xor => Opcode::Xor,
        BinOp::Shiftl => Opcode::Shiftl,
        BinOp::Shiftr => Opcode::Shiftr,
        BinOp::Equal => Opcode::Equal,
        BinOp::NotEq => Opcode::NotEq,
        BinOp::Lt => Opcode::Lt,
        BinOp::Gt => Opcode::Gt,
        BinOp::Le => Opcode::Le,
        BinOp::Ge => Opcode::Ge,
        BinOp::In => Opcode::In,
        BinOp::Range => Opcode::MakeRange,
        BinOp::Apply => Opcode::Apply,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
    }
}

fn un_opcode(op: UnOp) -> Opcode {
    match op {
        UnOp::Plus => Opcode::Nop,
        UnOp::Minus => Opcode::UMinus,
        UnOp::BitNot => Opcode::BitNot,
        UnOp::Not => Opcode::Not,
    }
}

fn inplace_opcode(op: AssignOp) -> Opcode {
    match op {
        AssignOp::Assign => Opcode::Store,
        AssignOp::Add => Opcode::IAdd,
        AssignOp::Sub => Opcode::ISub,
        AssignOp::Mul => Opcode::IMul,
        AssignOp::Div => Opcode::IDiv,
        AssignOp::Mod => Opcode::IMod,
        AssignOp::Pow => Opcode::IPow,
        AssignOp::BitAnd => Opcode::IBitAnd,
        AssignOp::BitOr => Opcode::IBitOr,
        AssignOp::Xor => Opcode::IXor,
        AssignOp::Shiftl => Opcode::IShiftl,
        AssignOp::Shiftr => Opcode::IShiftr,
        AssignOp::Apply => Opcode::IApply,
    }
}

/// Computes the maximum value-stack reach of a bytecode sequence by
/// applying each instruction's signed stack delta in order. Statements
/// leave the stack at depth 0, so a linear scan with a floor of zero is
/// a sound upper bound.
fn max_stack_depth(bc: &[u8]) -> u16 {
    let mut depth: i32 = 0;
    let mut max_depth: i32 = 0;
    let mut pos = 0;

    while pos < bc.len() {
        let op = match Opcode::from_byte(bc[pos]) {
            Some(op) => op,
            None => break,
        };
        pos += 1;
        let arg_size = op.arg_size();
        let arg = if arg_size >= 2 { read_uint16_at(bc, pos) } else { 0 };
        pos += arg_size;

        depth += op.stack_delta(arg);
        if depth < 0 {
            depth = 0;
        }
        if depth > max_depth {
            max_depth = depth;
        }
    }

    max_depth as u16
}

/// Convenience front end: source text to image. The error string is the
/// rendered syntax or compile error.
pub fn compile_source(src: &str) -> Result<Vec<u8>, String> {
    let tokens = crate::lexer::tokenize(src).map_err(|e| e.to_string())?;
    let program = crate::parser::Parser::new(tokens)
        .parse()
        .map_err(|e| e.to_string())?;
    if std::env::var("RHO_DEBUG_AST").is_ok() {
        eprintln!("DEBUG AST: {:#?}", program);
    }
    compile(&program).map_err(|e| e.to_string())
}
