// File: src/parser.rs
//
// Recursive-descent parser for Rho. Expressions use precedence climbing;
// statements are newline- or semicolon-terminated; blocks are `{ ... }` or
// `: stmt`.

use crate::ast::{Ast, AstKind, AssignOp, BinOp, FuncKind, Param, Program, UnOp};
use crate::errors::SyntaxError;
use crate::lexer::{Token, TokType};

pub const FUNCTION_MAX_PARAMS: usize = 128;

struct OpInfo {
    prec: u32,
    left_assoc: bool,
}

fn op_info(t: TokType) -> Option<OpInfo> {
    use TokType::*;
    let (prec, left_assoc) = match t {
        In => (9, true),
        Assign | AssignAdd | AssignSub | AssignMul | AssignDiv | AssignMod | AssignPow
        | AssignBitAnd | AssignBitOr | AssignXor | AssignShiftl | AssignShiftr | AssignAt => {
            (10, true)
        }
        Or => (20, true),
        And => (21, true),
        If => (22, true), // ternary operator
        BitOr => (30, true),
        Xor => (31, true),
        BitAnd => (32, true),
        Equal | NotEq => (40, true),
        Lt | Gt | Le | Ge => (50, true),
        Shiftl | Shiftr => (60, true),
        Plus | Minus => (70, true),
        Mul | Div | Mod => (80, true),
        Pow => (90, false),
        At => (91, false),
        DotDot => (92, true),
        _ => return None,
    };
    Some(OpInfo { prec, left_assoc })
}

fn is_assign_tok(t: TokType) -> bool {
    use TokType::*;
    matches!(
        t,
        Assign | AssignAdd | AssignSub | AssignMul | AssignDiv | AssignMod | AssignPow
            | AssignBitAnd | AssignBitOr | AssignXor | AssignShiftl | AssignShiftr | AssignAt
    )
}

fn assign_op(t: TokType) -> AssignOp {
    use TokType::*;
    match t {
        Assign => AssignOp::Assign,
        AssignAdd => AssignOp::Add,
        AssignSub => AssignOp::Sub,
        AssignMul => AssignOp::Mul,
        AssignDiv => AssignOp::Div,
        AssignMod => AssignOp::Mod,
        AssignPow => AssignOp::Pow,
        AssignBitAnd => AssignOp::BitAnd,
        AssignBitOr => AssignOp::BitOr,
        AssignXor => AssignOp::Xor,
        AssignShiftl => AssignOp::Shiftl,
        AssignShiftr => AssignOp::Shiftr,
        AssignAt => AssignOp::Apply,
        _ => unreachable!("not an assignment token"),
    }
}

fn bin_op(t: TokType) -> BinOp {
    use TokType::*;
    match t {
        Plus => BinOp::Add,
        Minus => BinOp::Sub,
        Mul => BinOp::Mul,
        Div => BinOp::Div,
        Mod => BinOp::Mod,
        Pow => BinOp::Pow,
        BitAnd => BinOp::BitAnd,
        BitOr => BinOp::BitOr,
        Xor => BinOp::Xor,
        Shiftl => BinOp::Shiftl,
        Shiftr => BinOp::Shiftr,
        Equal => BinOp::Equal,
        NotEq => BinOp::NotEq,
        Lt => BinOp::Lt,
        Gt => BinOp::Gt,
        Le => BinOp::Le,
        Ge => BinOp::Ge,
        And => BinOp::And,
        Or => BinOp::Or,
        In => BinOp::In,
        DotDot => BinOp::Range,
        At => BinOp::Apply,
        _ => unreachable!("not a binary operator token"),
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    in_loop: bool,
    in_function: bool,
    in_generator: bool,
    in_actor: bool,
    in_lambda: bool,
    max_dollar: u16,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser {
            tokens,
            pos: 0,
            in_loop: false,
            in_function: false,
            in_generator: false,
            in_actor: false,
            in_lambda: false,
            max_dollar: 0,
        }
    }

    /// Parses a whole program (list of statements).
    pub fn parse(mut self) -> Result<Program, SyntaxError> {
        let mut program = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().ttype == TokType::Eof {
                break;
            }
            if let Some(stmt) = self.parse_stmt()? {
                program.push(stmt);
            }
        }
        Ok(program)
    }

    // --- token plumbing -------------------------------------------------

    fn skip_newlines(&mut self) {
        while self.tokens[self.pos].ttype == TokType::Newline {
            self.pos += 1;
        }
    }

    /// Next significant token (newlines skipped, not consumed).
    fn peek(&self) -> &Token {
        let mut i = self.pos;
        while self.tokens[i].ttype == TokType::Newline {
            i += 1;
        }
        &self.tokens[i]
    }

    /// Next token with newlines visible.
    fn peek_direct(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        self.skip_newlines();
        let tok = self.tokens[self.pos].clone();
        if tok.ttype != TokType::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, ttype: TokType, what: &str) -> Result<Token, SyntaxError> {
        let tok = self.next();
        if tok.ttype != ttype {
            return Err(SyntaxError::new(
                tok.lineno,
                format!("expected {}, found '{}'", what, tok.value),
            ));
        }
        Ok(tok)
    }

    fn err<T>(&self, lineno: u32, msg: impl Into<String>) -> Result<T, SyntaxError> {
        Err(SyntaxError::new(lineno, msg))
    }

    // --- statements -----------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Option<Ast>, SyntaxError> {
        use TokType::*;
        let tok = self.peek().clone();

        let stmt = match tok.ttype {
            Print => self.parse_print()?,
            If => self.parse_if()?,
            While => self.parse_while()?,
            For => self.parse_for()?,
            Def => self.parse_def(FuncKind::Def)?,
            Gen => self.parse_def(FuncKind::Gen)?,
            Act => self.parse_def(FuncKind::Act)?,
            Break => self.parse_break()?,
            Continue => self.parse_continue()?,
            Return => self.parse_return()?,
            Throw => self.parse_throw()?,
            Produce => self.parse_produce()?,
            Receive => self.parse_receive()?,
            Try => self.parse_try_catch()?,
            Import => self.parse_import()?,
            Export => self.parse_export()?,
            Semicolon => {
                self.next();
                return Ok(None);
            }
            Eof => return Ok(None),
            _ => {
                // Not every expression is a statement: `2 + 2` on its own
                // has no effect and is rejected; calls and assignments pass.
                let expr = self.parse_expr()?;
                if !expr.kind.is_expr_stmt() {
                    return self.err(tok.lineno, "expression is not a statement");
                }
                expr
            }
        };

        // statements end at a newline, semicolon, '}', or end of input;
        // the terminator is left for the statement-list loops to consume
        let end = self.peek_direct();
        match end.ttype {
            Newline | Semicolon | Eof | BraceClose => {}
            _ => {
                let (l, v) = (end.lineno, end.value.clone());
                return self.err(l, format!("unexpected token '{}' after statement", v));
            }
        }
        Ok(Some(stmt))
    }

    fn parse_block(&mut self) -> Result<Vec<Ast>, SyntaxError> {
        if self.peek().ttype == TokType::Colon {
            self.next();
            match self.parse_stmt()? {
                Some(stmt) => Ok(vec![stmt]),
                None => Ok(Vec::new()),
            }
        } else {
            let open = self.expect(TokType::BraceOpen, "'{' or ':'")?;
            let mut body = Vec::new();
            loop {
                self.skip_newlines();
                match self.peek().ttype {
                    TokType::BraceClose => break,
                    TokType::Eof => return self.err(open.lineno, "unclosed '{'"),
                    _ => {
                        if let Some(stmt) = self.parse_stmt()? {
                            body.push(stmt);
                        }
                    }
                }
            }
            self.expect(TokType::BraceClose, "'}'")?;
            Ok(body)
        }
    }

    fn parse_print(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Print, "'print'")?;
        let expr = self.parse_expr_no_assign()?;
        Ok(Ast::new(AstKind::Print(Box::new(expr)), tok.lineno))
    }

    fn parse_if(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::If, "'if'")?;
        let cond = self.parse_expr_no_assign()?;
        let body = self.parse_block()?;

        let mut elifs = Vec::new();
        while self.peek().ttype == TokType::Elif {
            self.next();
            let elif_cond = self.parse_expr_no_assign()?;
            let elif_body = self.parse_block()?;
            elifs.push((elif_cond, elif_body));
        }

        let els = if self.peek().ttype == TokType::Else {
            self.next();
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Ast::new(
            AstKind::If { cond: Box::new(cond), body, elifs, els },
            tok.lineno,
        ))
    }

    fn parse_while(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::While, "'while'")?;
        let cond = self.parse_expr_no_assign()?;
        let old_in_loop = self.in_loop;
        self.in_loop = true;
        let body = self.parse_block();
        self.in_loop = old_in_loop;
        Ok(Ast::new(AstKind::While { cond: Box::new(cond), body: body? }, tok.lineno))
    }

    fn parse_for(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::For, "'for'")?;

        let mut vars = Vec::new();
        if self.peek().ttype == TokType::ParenOpen {
            self.next();
            loop {
                let ident = self.expect(TokType::Ident, "a loop variable")?;
                vars.push(ident.value);
                match self.peek().ttype {
                    TokType::Comma => {
                        self.next();
                    }
                    TokType::ParenClose => break,
                    _ => {
                        let t = self.peek().clone();
                        return self.err(t.lineno, format!("unexpected token '{}'", t.value));
                    }
                }
            }
            self.expect(TokType::ParenClose, "')'")?;
            if vars.is_empty() {
                return self.err(tok.lineno, "empty loop-variable list");
            }
        } else {
            let ident = self.expect(TokType::Ident, "a loop variable")?;
            vars.push(ident.value);
        }

        self.expect(TokType::In, "'in'")?;
        let iter = self.parse_expr_no_assign()?;

        let old_in_loop = self.in_loop;
        self.in_loop = true;
        let body = self.parse_block();
        self.in_loop = old_in_loop;

        Ok(Ast::new(AstKind::For { vars, iter: Box::new(iter), body: body? }, tok.lineno))
    }

    fn parse_def(&mut self, kind: FuncKind) -> Result<Ast, SyntaxError> {
        let tok = self.next(); // def / gen / act
        let name_tok = self.expect(TokType::Ident, "a function name")?;

        self.expect(TokType::ParenOpen, "'('")?;
        let mut params: Vec<Param> = Vec::new();
        let mut seen_default = false;
        loop {
            if self.peek().ttype == TokType::ParenClose {
                break;
            }
            let p_name = self.expect(TokType::Ident, "a parameter name")?;

            if params.iter().any(|p| p.name == p_name.value) {
                return self.err(
                    p_name.lineno,
                    format!("duplicate parameter '{}'", p_name.value),
                );
            }

            let hint = if self.peek().ttype == TokType::Colon {
                self.next();
                Some(self.expect(TokType::Ident, "a type name")?.value)
            } else {
                None
            };

            let default = if self.peek().ttype == TokType::Assign {
                self.next();
                seen_default = true;
                Some(self.parse_expr_no_assign()?)
            } else {
                if seen_default {
                    return self.err(
                        p_name.lineno,
                        "non-default parameter follows default parameter",
                    );
                }
                None
            };

            params.push(Param {
                name: p_name.value,
                hint,
                default,
                lineno: p_name.lineno,
            });

            match self.peek().ttype {
                TokType::Comma => {
                    self.next();
                }
                TokType::ParenClose => break,
                _ => {
                    let t = self.peek().clone();
                    return self.err(t.lineno, format!("unexpected token '{}'", t.value));
                }
            }
        }
        self.expect(TokType::ParenClose, "')'")?;

        if params.len() > FUNCTION_MAX_PARAMS {
            return self.err(name_tok.lineno, "too many parameters");
        }

        let ret_hint = if self.peek().ttype == TokType::Arrow {
            self.next();
            Some(self.expect(TokType::Ident, "a type name")?.value)
        } else {
            None
        };

        let old = (
            self.in_function,
            self.in_generator,
            self.in_actor,
            self.in_lambda,
            self.in_loop,
        );
        self.in_function = kind == FuncKind::Def;
        self.in_generator = kind == FuncKind::Gen;
        self.in_actor = kind == FuncKind::Act;
        self.in_lambda = false;
        self.in_loop = false;
        let body = self.parse_block();
        (
            self.in_function,
            self.in_generator,
            self.in_actor,
            self.in_lambda,
            self.in_loop,
        ) = old;

        Ok(Ast::new(
            AstKind::Def { kind, name: name_tok.value, params, ret_hint, body: body? },
            tok.lineno,
        ))
    }

    fn parse_break(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Break, "'break'")?;
        if !self.in_loop {
            return self.err(tok.lineno, "misplaced 'break' (not inside a loop)");
        }
        Ok(Ast::new(AstKind::Break, tok.lineno))
    }

    fn parse_continue(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Continue, "'continue'")?;
        if !self.in_loop {
            return self.err(tok.lineno, "misplaced 'continue' (not inside a loop)");
        }
        Ok(Ast::new(AstKind::Continue, tok.lineno))
    }

    fn parse_return(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Return, "'return'")?;
        if !(self.in_function || self.in_generator || self.in_actor) {
            return self.err(tok.lineno, "misplaced 'return' (not inside a function)");
        }

        let next = self.peek_direct();
        let has_value = !matches!(
            next.ttype,
            TokType::Newline | TokType::Semicolon | TokType::Eof | TokType::BraceClose
        );

        if !has_value {
            return Ok(Ast::new(AstKind::Return(None), tok.lineno));
        }
        if self.in_generator {
            return self.err(tok.lineno, "generators cannot return values");
        }
        let expr = self.parse_expr_no_assign()?;
        Ok(Ast::new(AstKind::Return(Some(Box::new(expr))), tok.lineno))
    }

    fn parse_throw(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Throw, "'throw'")?;
        let expr = self.parse_expr_no_assign()?;
        Ok(Ast::new(AstKind::Throw(Box::new(expr)), tok.lineno))
    }

    fn parse_produce(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Produce, "'produce'")?;
        if !self.in_generator {
            return self.err(tok.lineno, "misplaced 'produce' (not inside a generator)");
        }
        let expr = self.parse_expr_no_assign()?;
        Ok(Ast::new(AstKind::Produce(Box::new(expr)), tok.lineno))
    }

    fn parse_receive(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Receive, "'receive'")?;
        if !self.in_actor {
            return self.err(tok.lineno, "misplaced 'receive' (not inside an actor)");
        }
        let ident = self.expect(TokType::Ident, "a variable name")?;
        Ok(Ast::new(AstKind::Receive(ident.value), tok.lineno))
    }

    fn parse_try_catch(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Try, "'try'")?;
        let body = self.parse_block()?;
        let catch_tok = self.expect(TokType::Catch, "'catch'")?;

        self.expect(TokType::ParenOpen, "'('")?;
        if self.peek().ttype == TokType::ParenClose {
            return self.err(catch_tok.lineno, "empty catch clause");
        }
        let exc = self.parse_expr_no_assign()?;
        self.expect(TokType::ParenClose, "')'")?;

        let catch = self.parse_block()?;
        Ok(Ast::new(
            AstKind::TryCatch { body, exc: Box::new(exc), catch },
            tok.lineno,
        ))
    }

    fn parse_import(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Import, "'import'")?;
        let ident = self.expect(TokType::Ident, "a module name")?;
        Ok(Ast::new(AstKind::Import(ident.value), tok.lineno))
    }

    fn parse_export(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.expect(TokType::Export, "'export'")?;
        let ident = self.expect(TokType::Ident, "a variable name")?;
        Ok(Ast::new(AstKind::Export(ident.value), tok.lineno))
    }

    // --- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Ast, SyntaxError> {
        self.parse_expr_min_prec(1, true)
    }

    fn parse_expr_no_assign(&mut self) -> Result<Ast, SyntaxError> {
        self.parse_expr_min_prec(1, false)
    }

    /// Precedence climbing.
    fn parse_expr_min_prec(
        &mut self,
        min_prec: u32,
        mut allow_assigns: bool,
    ) -> Result<Ast, SyntaxError> {
        let mut lhs = self.parse_atom()?;

        loop {
            let tok = self.peek().clone();
            let ttype = tok.ttype;

            // An `if` continues the expression only as the ternary operator,
            // and only when it sits on the same line:
            //
            //     print x if c else y       (ternary)
            //     print x
            //     if c { ... }              (statement)
            if ttype == TokType::If && self.peek_direct().ttype != TokType::If {
                break;
            }

            let info = match op_info(ttype) {
                Some(info) => info,
                None => break,
            };
            if info.prec < min_prec {
                break;
            }

            if is_assign_tok(ttype)
                && (!allow_assigns || min_prec != 1 || !lhs.kind.is_assignable())
            {
                return self.err(tok.lineno, "misplaced assignment");
            }

            let next_min_prec = if info.left_assoc { info.prec + 1 } else { info.prec };
            self.next();

            if ttype == TokType::If {
                // ternary operator
                let cond = self.parse_expr_no_assign()?;
                self.expect(TokType::Else, "'else'")?;
                let rhs = self.parse_expr_min_prec(next_min_prec, false)?;
                lhs = Ast::new(
                    AstKind::Cond {
                        cond: Box::new(cond),
                        then: Box::new(lhs),
                        els: Box::new(rhs),
                    },
                    tok.lineno,
                );
            } else if is_assign_tok(ttype) {
                let rhs = self.parse_expr_min_prec(next_min_prec, false)?;
                lhs = Ast::new(
                    AstKind::Assign(assign_op(ttype), Box::new(lhs), Box::new(rhs)),
                    tok.lineno,
                );
            } else {
                let rhs = self.parse_expr_min_prec(next_min_prec, false)?;
                lhs = Ast::new(
                    AstKind::Bin(bin_op(ttype), Box::new(lhs), Box::new(rhs)),
                    tok.lineno,
                );
            }

            allow_assigns = false;
        }

        Ok(lhs)
    }

    /// A single unit of code: literal, parenthesized expression or tuple,
    /// identifier, unary operation, collection literal, or lambda, plus any
    /// chain of postfix calls / indexes / attribute accesses.
    fn parse_atom(&mut self) -> Result<Ast, SyntaxError> {
        use TokType::*;
        let tok = self.peek().clone();

        let mut ast = match tok.ttype {
            ParenOpen => self.parse_parens()?,
            Null => {
                self.next();
                Ast::new(AstKind::Null, tok.lineno)
            }
            Int => {
                self.next();
                let n: i64 = tok
                    .value
                    .parse()
                    .map_err(|_| SyntaxError::new(tok.lineno, "integer literal out of range"))?;
                Ast::new(AstKind::Int(n), tok.lineno)
            }
            Float => {
                self.next();
                let f: f64 = tok
                    .value
                    .parse()
                    .map_err(|_| SyntaxError::new(tok.lineno, "bad float literal"))?;
                Ast::new(AstKind::Float(f), tok.lineno)
            }
            Str => {
                self.next();
                Ast::new(AstKind::Str(tok.value), tok.lineno)
            }
            Ident => {
                self.next();
                Ast::new(AstKind::Ident(tok.value), tok.lineno)
            }
            Dollar => {
                self.next();
                if !self.in_lambda {
                    return self.err(tok.lineno, "'$' identifier outside of a lambda");
                }
                let n: usize = tok.value[1..]
                    .parse()
                    .map_err(|_| SyntaxError::new(tok.lineno, "bad '$' identifier"))?;
                if n == 0 || n > FUNCTION_MAX_PARAMS {
                    return self.err(tok.lineno, "'$' identifier out of range");
                }
                if n as u16 > self.max_dollar {
                    self.max_dollar = n as u16;
                }
                Ast::new(AstKind::Ident(tok.value), tok.lineno)
            }
            BrackOpen => self.parse_list()?,
            BraceOpen => self.parse_set_or_dict()?,
            Not | BitNot | Plus | Minus => self.parse_unop()?,
            Colon => self.parse_lambda()?,
            _ => {
                return self.err(tok.lineno, format!("unexpected token '{}'", tok.value));
            }
        };

        // Deal with chains like `foo[7].bar(42)`.
        loop {
            match self.peek().ttype {
                Dot => {
                    let dot = self.next();
                    let ident = self.expect(TokType::Ident, "an attribute name")?;
                    ast = Ast::new(AstKind::Attr(Box::new(ast), ident.value), dot.lineno);
                }
                ParenOpen => {
                    let open = self.next();
                    let (args, named) = self.parse_call_args(open.lineno)?;
                    ast = Ast::new(
                        AstKind::Call { func: Box::new(ast), args, named },
                        open.lineno,
                    );
                }
                BrackOpen => {
                    let open = self.next();
                    let index = self.parse_expr_no_assign()?;
                    self.expect(TokType::BrackClose, "']'")?;
                    ast = Ast::new(AstKind::Index(Box::new(ast), Box::new(index)), open.lineno);
                }
                _ => break,
            }
        }

        Ok(ast)
    }

    /// `(` already consumed. Positional arguments in source order, then
    /// named ones; a positional after a named one is rejected.
    fn parse_call_args(
        &mut self,
        open_lineno: u32,
    ) -> Result<(Vec<Ast>, Vec<(String, Ast)>), SyntaxError> {
        let mut args = Vec::new();
        let mut named: Vec<(String, Ast)> = Vec::new();

        loop {
            match self.peek().ttype {
                TokType::ParenClose => break,
                TokType::Eof => return self.err(open_lineno, "unclosed '('"),
                _ => {}
            }

            // `name = expr` is a named argument; anything else is positional.
            let is_named = self.peek().ttype == TokType::Ident && {
                let mut i = self.pos;
                while self.tokens[i].ttype == TokType::Newline {
                    i += 1;
                }
                let mut j = i + 1;
                while self.tokens[j].ttype == TokType::Newline {
                    j += 1;
                }
                self.tokens[j].ttype == TokType::Assign
            };

            if is_named {
                let name = self.expect(TokType::Ident, "an argument name")?;
                self.expect(TokType::Assign, "'='")?;
                let value = self.parse_expr_no_assign()?;
                if named.iter().any(|(n, _)| *n == name.value) {
                    return self.err(
                        name.lineno,
                        format!("duplicate named argument '{}'", name.value),
                    );
                }
                named.push((name.value, value));
            } else {
                if !named.is_empty() {
                    let t = self.peek().clone();
                    return self.err(t.lineno, "positional argument after named argument");
                }
                args.push(self.parse_expr_no_assign()?);
            }

            match self.peek().ttype {
                TokType::Comma => {
                    self.next();
                }
                TokType::ParenClose => break,
                _ => {
                    let t = self.peek().clone();
                    return self.err(t.lineno, format!("unexpected token '{}'", t.value));
                }
            }
        }
        self.expect(TokType::ParenClose, "')'")?;

        if args.len() > 0xff || named.len() > 0xff {
            return self.err(open_lineno, "too many arguments");
        }
        Ok((args, named))
    }

    /// Parenthesized expression or tuple literal.
    fn parse_parens(&mut self) -> Result<Ast, SyntaxError> {
        let open = self.expect(TokType::ParenOpen, "'('")?;

        if self.peek().ttype == TokType::ParenClose {
            self.next();
            return Ok(Ast::new(AstKind::TupleLit(Vec::new()), open.lineno));
        }

        let first = self.parse_expr_no_assign()?;

        if self.peek().ttype == TokType::Comma {
            let mut elems = vec![first];
            while self.peek().ttype == TokType::Comma {
                self.next();
                if self.peek().ttype == TokType::ParenClose {
                    break;
                }
                elems.push(self.parse_expr_no_assign()?);
            }
            self.expect(TokType::ParenClose, "')'")?;
            return Ok(Ast::new(AstKind::TupleLit(elems), open.lineno));
        }

        self.expect(TokType::ParenClose, "')'")?;
        Ok(first)
    }

    fn parse_unop(&mut self) -> Result<Ast, SyntaxError> {
        let tok = self.next();
        let op = match tok.ttype {
            TokType::Plus => UnOp::Plus,
            TokType::Minus => UnOp::Minus,
            TokType::BitNot => UnOp::BitNot,
            TokType::Not => UnOp::Not,
            _ => unreachable!("not a unary operator token"),
        };
        let atom = self.parse_atom()?;
        Ok(Ast::new(AstKind::Un(op, Box::new(atom)), tok.lineno))
    }

    fn parse_list(&mut self) -> Result<Ast, SyntaxError> {
        let open = self.expect(TokType::BrackOpen, "'['")?;
        let mut elems = Vec::new();
        loop {
            match self.peek().ttype {
                TokType::BrackClose => break,
                TokType::Eof => return self.err(open.lineno, "unclosed '['"),
                _ => {}
            }
            elems.push(self.parse_expr_no_assign()?);
            match self.peek().ttype {
                TokType::Comma => {
                    self.next();
                }
                TokType::BrackClose => break,
                _ => {
                    let t = self.peek().clone();
                    return self.err(t.lineno, format!("unexpected token '{}'", t.value));
                }
            }
        }
        self.expect(TokType::BrackClose, "']'")?;
        Ok(Ast::new(AstKind::ListLit(elems), open.lineno))
    }

    /// `{}` is an empty dict; `{a, b}` a set; `{a: 1}` a dict. Mixing
    /// the two element forms is an error.
    fn parse_set_or_dict(&mut self) -> Result<Ast, SyntaxError> {
        let open = self.expect(TokType::BraceOpen, "'{'")?;
        let mut set_elems: Vec<Ast> = Vec::new();
        let mut dict_elems: Vec<(Ast, Ast)> = Vec::new();

        loop {
            match self.peek().ttype {
                TokType::BraceClose => break,
                TokType::Eof => return self.err(open.lineno, "unclosed '{'"),
                _ => {}
            }

            let key = self.parse_expr_no_assign()?;
            if self.peek().ttype == TokType::Colon {
                self.next();
                let value = self.parse_expr_no_assign()?;
                if !set_elems.is_empty() {
                    return self.err(open.lineno, "mixed set and dict elements");
                }
                dict_elems.push((key, value));
            } else {
                if !dict_elems.is_empty() {
                    return self.err(open.lineno, "mixed set and dict elements");
                }
                set_elems.push(key);
            }

            match self.peek().ttype {
                TokType::Comma => {
                    self.next();
                }
                TokType::BraceClose => break,
                _ => {
                    let t = self.peek().clone();
                    return self.err(t.lineno, format!("unexpected token '{}'", t.value));
                }
            }
        }
        self.expect(TokType::BraceClose, "'}'")?;

        if !set_elems.is_empty() {
            Ok(Ast::new(AstKind::SetLit(set_elems), open.lineno))
        } else {
            Ok(Ast::new(AstKind::DictLit(dict_elems), open.lineno))
        }
    }

    fn parse_lambda(&mut self) -> Result<Ast, SyntaxError> {
        let colon = self.expect(TokType::Colon, "':'")?;

        let old = (
            self.max_dollar,
            self.in_function,
            self.in_generator,
            self.in_actor,
            self.in_lambda,
            self.in_loop,
        );
        self.max_dollar = 0;
        self.in_function = true;
        self.in_generator = false;
        self.in_actor = false;
        self.in_lambda = true;
        self.in_loop = false;
        let body = self.parse_expr();
        let max_dollar = self.max_dollar;
        (
            self.max_dollar,
            self.in_function,
            self.in_generator,
            self.in_actor,
            self.in_lambda,
            self.in_loop,
        ) = old;

        Ok(Ast::new(
            AstKind::Lambda { body: Box::new(body?), max_dollar },
            colon.lineno,
        ))
    }
}
