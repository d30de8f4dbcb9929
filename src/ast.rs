// File: src/ast.rs
//
// AST node definitions produced by the parser and consumed by the
// symbol-table builder and the bytecode compiler.

/// A node together with the source line it started on.
#[derive(Debug, Clone)]
pub struct Ast {
    pub kind: AstKind,
    pub lineno: u32,
}

impl Ast {
    pub fn new(kind: AstKind, lineno: u32) -> Ast {
        Ast { kind, lineno }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    Xor,
    Shiftl,
    Shiftr,
    Equal,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    In,
    Range,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    BitNot,
    Not,
}

/// Compound-assignment flavor; `Assign` is the plain `=` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    Xor,
    Shiftl,
    Shiftr,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    Def,
    Gen,
    Act,
}

/// A single `def`/`gen`/`act` parameter: optional type hint, optional
/// default value (defaults must trail non-defaults; the parser enforces it).
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub hint: Option<String>,
    pub default: Option<Ast>,
    pub lineno: u32,
}

#[derive(Debug, Clone)]
pub enum AstKind {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    Un(UnOp, Box<Ast>),
    Bin(BinOp, Box<Ast>, Box<Ast>),
    /// `x if cond else y`
    Cond {
        cond: Box<Ast>,
        then: Box<Ast>,
        els: Box<Ast>,
    },
    Assign(AssignOp, Box<Ast>, Box<Ast>),

    Call {
        func: Box<Ast>,
        args: Vec<Ast>,
        named: Vec<(String, Ast)>,
    },
    Index(Box<Ast>, Box<Ast>),
    Attr(Box<Ast>, String),

    ListLit(Vec<Ast>),
    TupleLit(Vec<Ast>),
    SetLit(Vec<Ast>),
    DictLit(Vec<(Ast, Ast)>),

    /// `:expr` with `$1..$N` parameters; `max_dollar` is the argcount.
    Lambda {
        body: Box<Ast>,
        max_dollar: u16,
    },

    Print(Box<Ast>),
    If {
        cond: Box<Ast>,
        body: Vec<Ast>,
        elifs: Vec<(Ast, Vec<Ast>)>,
        els: Option<Vec<Ast>>,
    },
    While {
        cond: Box<Ast>,
        body: Vec<Ast>,
    },
    For {
        vars: Vec<String>,
        iter: Box<Ast>,
        body: Vec<Ast>,
    },
    Def {
        kind: FuncKind,
        name: String,
        params: Vec<Param>,
        ret_hint: Option<String>,
        body: Vec<Ast>,
    },
    Break,
    Continue,
    Return(Option<Box<Ast>>),
    Throw(Box<Ast>),
    Produce(Box<Ast>),
    Receive(String),
    TryCatch {
        body: Vec<Ast>,
        exc: Box<Ast>,
        catch: Vec<Ast>,
    },
    Import(String),
    Export(String),
}

impl AstKind {
    /// Expressions that are also valid statements on their own.
    pub fn is_expr_stmt(&self) -> bool {
        matches!(self, AstKind::Call { .. } | AstKind::Assign(..))
    }

    /// Targets an assignment may write to.
    pub fn is_assignable(&self) -> bool {
        matches!(self, AstKind::Ident(_) | AstKind::Index(..) | AstKind::Attr(..))
    }
}

pub type Program = Vec<Ast>;
