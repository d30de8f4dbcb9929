// File: src/symtab.rs
//
// Symbol-table builder. Two passes over each scope: the first registers
// bindings (parameters first, then assigned/import/receive/loop names) and
// creates the scope tree; the second classifies every identifier reference
// as bound-here, global (bound at module scope), or free (resolved from the
// builtins at run time), and numbers attribute names.
//
// All passes here, and the compiler's constant-collection pass, traverse
// the AST in the same canonical order, so the Nth scope created under a
// parent is also the Nth scope entered by any later traversal.

use ahash::RandomState;
use std::collections::HashMap;

use crate::ast::{Ast, AstKind, AssignOp, Program};

#[derive(Debug, Clone, Copy, Default)]
pub struct Symbol {
    pub id: u16,
    pub bound: bool,
    pub global: bool,
    pub free: bool,
}

#[derive(Debug)]
pub struct Scope {
    symbols: HashMap<String, Symbol, RandomState>,
    next_local_id: u16,
    next_free_id: u16,
    attrs: HashMap<String, u16, RandomState>,
    next_attr_id: u16,
    children: Vec<usize>,
    child_pos: usize,
    parent: Option<usize>,
}

impl Scope {
    fn new(parent: Option<usize>) -> Scope {
        Scope {
            symbols: HashMap::default(),
            next_local_id: 0,
            next_free_id: 0,
            attrs: HashMap::default(),
            next_attr_id: 0,
            children: Vec::new(),
            child_pos: 0,
            parent,
        }
    }
}

#[derive(Debug)]
pub struct SymTable {
    scopes: Vec<Scope>,
    pub module: usize,
    pub current: usize,
}

impl SymTable {
    /// Builds the full symbol table for `program`.
    pub fn build(program: &Program) -> SymTable {
        let mut st = SymTable {
            scopes: vec![Scope::new(None)],
            module: 0,
            current: 0,
        };
        for stmt in program {
            st.bind_node(stmt);
        }
        st.reset_cursors();
        for stmt in program {
            st.classify_node(stmt);
        }
        st.reset_cursors();
        st
    }

    // --- queries (always against the current scope) ---------------------

    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        self.scopes[self.current].symbols.get(name).copied()
    }

    pub fn attr_id(&self, name: &str) -> Option<u16> {
        self.scopes[self.current].attrs.get(name).copied()
    }

    /// Local names of the current scope, ordered by slot id.
    pub fn locals_in_order(&self) -> Vec<String> {
        self.names_in_order(|sym| if sym.bound { Some(sym.id) } else { None })
    }

    /// Free-variable names of the current scope, ordered by id.
    pub fn frees_in_order(&self) -> Vec<String> {
        self.names_in_order(|sym| if sym.free { Some(sym.id) } else { None })
    }

    /// Attribute names of the current scope, ordered by id.
    pub fn attrs_in_order(&self) -> Vec<String> {
        let scope = &self.scopes[self.current];
        let mut out = vec![String::new(); scope.next_attr_id as usize];
        for (name, &id) in &scope.attrs {
            out[id as usize] = name.clone();
        }
        out
    }

    fn names_in_order(&self, select: impl Fn(&Symbol) -> Option<u16>) -> Vec<String> {
        let scope = &self.scopes[self.current];
        let mut pairs: Vec<(u16, &String)> = scope
            .symbols
            .iter()
            .filter_map(|(name, sym)| select(sym).map(|id| (id, name)))
            .collect();
        pairs.sort_by_key(|&(id, _)| id);
        pairs.into_iter().map(|(_, name)| name.clone()).collect()
    }

    // --- scope traversal -------------------------------------------------

    /// Enters the next child of the current scope, in creation order.
    pub fn descend(&mut self) {
        let scope = &mut self.scopes[self.current];
        let child = scope.children[scope.child_pos];
        scope.child_pos += 1;
        self.current = child;
    }

    pub fn ascend(&mut self) {
        self.current = self.scopes[self.current]
            .parent
            .expect("ascend from module scope");
    }

    /// Rewinds every scope's child cursor so the table can be re-walked.
    pub fn reset_cursors(&mut self) {
        for scope in &mut self.scopes {
            scope.child_pos = 0;
        }
        self.current = self.module;
    }

    // --- binding pass ----------------------------------------------------

    fn bind(&mut self, name: &str) {
        let global = self.current == self.module;
        let scope = &mut self.scopes[self.current];
        if scope.symbols.contains_key(name) {
            return;
        }
        let id = scope.next_local_id;
        scope.next_local_id += 1;
        scope.symbols.insert(
            name.to_string(),
            Symbol { id, bound: true, global, ..Symbol::default() },
        );
    }

    fn new_child(&mut self) -> usize {
        let child = self.scopes.len();
        self.scopes.push(Scope::new(Some(self.current)));
        self.scopes[self.current].children.push(child);
        child
    }

    fn bind_node(&mut self, ast: &Ast) {
        match &ast.kind {
            AstKind::Assign(op, lhs, rhs) => {
                // visit the two sides in the same order as the other passes
                // so scope creation stays aligned with scope consumption
                if *op == AssignOp::Assign {
                    if let AstKind::Ident(name) = &lhs.kind {
                        self.bind(name);
                        self.bind_node(rhs);
                    } else {
                        self.bind_node(rhs);
                        self.bind_node(lhs);
                    }
                } else {
                    if !matches!(lhs.kind, AstKind::Ident(_)) {
                        self.bind_node(lhs);
                    }
                    self.bind_node(rhs);
                }
            }
            AstKind::For { vars, iter, body } => {
                for var in vars {
                    self.bind(var);
                }
                self.bind_node(iter);
                for stmt in body {
                    self.bind_node(stmt);
                }
            }
            AstKind::Import(name) => self.bind(name),
            AstKind::Receive(name) => self.bind(name),
            AstKind::Def { kind: _, name, params, ret_hint: _, body } => {
                self.bind(name);

                let child = self.new_child();
                let parent = self.current;
                self.current = child;
                for param in params {
                    self.bind(&param.name);
                }
                for stmt in body {
                    self.bind_node(stmt);
                }
                self.current = parent;

                // defaults are evaluated in the enclosing scope
                for param in params {
                    if let Some(default) = &param.default {
                        self.bind_node(default);
                    }
                }
            }
            AstKind::Lambda { body, max_dollar } => {
                let child = self.new_child();
                let parent = self.current;
                self.current = child;
                for i in 1..=*max_dollar {
                    self.bind(&format!("${}", i));
                }
                self.bind_node(body);
                self.current = parent;
            }
            _ => self.walk_children(ast, Self::bind_node),
        }
    }

    // --- classification pass ---------------------------------------------

    fn classify_ref(&mut self, name: &str) {
        if self.scopes[self.current].symbols.contains_key(name) {
            return;
        }
        // only names *bound* at module scope are globals; a module-level
        // reference to a builtin leaves a free entry that must not shadow
        let module_sym = self.scopes[self.module]
            .symbols
            .get(name)
            .copied()
            .filter(|sym| sym.bound);
        let scope = &mut self.scopes[self.current];
        match module_sym {
            Some(global_sym) => {
                scope.symbols.insert(
                    name.to_string(),
                    Symbol { id: global_sym.id, global: true, ..Symbol::default() },
                );
            }
            None => {
                let id = scope.next_free_id;
                scope.next_free_id += 1;
                scope
                    .symbols
                    .insert(name.to_string(), Symbol { id, free: true, ..Symbol::default() });
            }
        }
    }

    fn classify_attr(&mut self, name: &str) {
        let scope = &mut self.scopes[self.current];
        if !scope.attrs.contains_key(name) {
            let id = scope.next_attr_id;
            scope.next_attr_id += 1;
            scope.attrs.insert(name.to_string(), id);
        }
    }

    fn classify_node(&mut self, ast: &Ast) {
        match &ast.kind {
            AstKind::Ident(name) => self.classify_ref(name),
            AstKind::Export(name) => self.classify_ref(name),
            AstKind::Attr(obj, attr) => {
                self.classify_node(obj);
                self.classify_attr(attr);
            }
            AstKind::Def { kind: _, name: _, params, ret_hint, body } => {
                self.descend();
                for stmt in body {
                    self.classify_node(stmt);
                }
                self.ascend();

                for param in params {
                    if let Some(default) = &param.default {
                        self.classify_node(default);
                    }
                    if let Some(hint) = &param.hint {
                        self.classify_ref(hint);
                    }
                }
                if let Some(hint) = ret_hint {
                    self.classify_ref(hint);
                }
            }
            AstKind::Lambda { body, .. } => {
                self.descend();
                self.classify_node(body);
                self.ascend();
            }
            _ => self.walk_children(ast, Self::classify_node),
        }
    }

    /// Canonical child traversal shared by both passes (and mirrored by the
    /// compiler's constant-collection pass): source order, except that a
    /// plain assignment visits its value before its target.
    fn walk_children(&mut self, ast: &Ast, mut f: impl FnMut(&mut Self, &Ast)) {
        match &ast.kind {
            AstKind::Null
            | AstKind::Int(_)
            | AstKind::Float(_)
            | AstKind::Str(_)
            | AstKind::Ident(_)
            | AstKind::Break
            | AstKind::Continue
            | AstKind::Import(_)
            | AstKind::Receive(_)
            | AstKind::Export(_) => {}
            AstKind::Un(_, operand) => f(self, operand),
            AstKind::Bin(_, lhs, rhs) => {
                f(self, lhs);
                f(self, rhs);
            }
            AstKind::Cond { cond, then, els } => {
                f(self, cond);
                f(self, then);
                f(self, els);
            }
            AstKind::Assign(op, lhs, rhs) => {
                if *op == AssignOp::Assign {
                    f(self, rhs);
                    f(self, lhs);
                } else {
                    f(self, lhs);
                    f(self, rhs);
                }
            }
            AstKind::Call { func, args, named } => {
                for arg in args {
                    f(self, arg);
                }
                for (_, value) in named {
                    f(self, value);
                }
                f(self, func);
            }
            AstKind::Index(obj, index) => {
                f(self, obj);
                f(self, index);
            }
            AstKind::Attr(obj, _) => f(self, obj),
            AstKind::ListLit(elems) | AstKind::TupleLit(elems) | AstKind::SetLit(elems) => {
                for elem in elems {
                    f(self, elem);
                }
            }
            AstKind::DictLit(pairs) => {
                for (k, v) in pairs {
                    f(self, k);
                    f(self, v);
                }
            }
            AstKind::Print(expr) | AstKind::Throw(expr) | AstKind::Produce(expr) => f(self, expr),
            AstKind::Return(expr) => {
                if let Some(expr) = expr {
                    f(self, expr);
                }
            }
            AstKind::If { cond, body, elifs, els } => {
                f(self, cond);
                for stmt in body {
                    f(self, stmt);
                }
                for (elif_cond, elif_body) in elifs {
                    f(self, elif_cond);
                    for stmt in elif_body {
                        f(self, stmt);
                    }
                }
                if let Some(els) = els {
                    for stmt in els {
                        f(self, stmt);
                    }
                }
            }
            AstKind::While { cond, body } => {
                f(self, cond);
                for stmt in body {
                    f(self, stmt);
                }
            }
            AstKind::For { vars: _, iter, body } => {
                f(self, iter);
                for stmt in body {
                    f(self, stmt);
                }
            }
            AstKind::TryCatch { body, exc, catch } => {
                for stmt in body {
                    f(self, stmt);
                }
                f(self, exc);
                for stmt in catch {
                    f(self, stmt);
                }
            }
            AstKind::Def { .. } | AstKind::Lambda { .. } => {
                unreachable!("scoped nodes are handled by the pass dispatchers")
            }
        }
    }
}
