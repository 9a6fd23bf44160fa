//! Recursive-descent parser
//!
//! Builds an [`ast::Program`] from the token stream. Constructs outside the
//! grammar are still parsed far enough to be named (`import`, `class`,
//! `lambda`, ...) so the validator can reject them with a precise reason.
//!
//! Every level of recursion counts against [`MAX_DEPTH`] and every link in
//! a binary operator chain against [`MAX_CHAIN_LINKS`]; together they bound
//! the height of the resulting tree.

use crate::ast::{
    BinOp, CmpOp, Comprehension, Expr, FunctionDef, Param, Program, Stmt, StmtKind, UnaryOp,
};
use crate::lexer::{tokenize, SyntaxError, Tok, Token};
use std::sync::Arc;

/// Maximum nesting of blocks, brackets and operator chains.
pub const MAX_DEPTH: usize = 100;

/// Maximum operands joined by `+ - * / // % and or` along one path.
pub const MAX_CHAIN_LINKS: usize = 1000;

type PResult<T> = Result<T, SyntaxError>;

/// Parse a complete program.
pub fn parse(source: &str) -> PResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    links: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            links: 0,
        }
    }

    // --- token helpers ---

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(SyntaxError::new(self.line(), message))
    }

    fn unexpected<T>(&self) -> PResult<T> {
        let found = match self.peek() {
            Tok::Name(n) => format!("name '{}'", n),
            Tok::Keyword(k) => format!("'{}'", k),
            Tok::Int(_) | Tok::Float(_) => "number".to_string(),
            Tok::Str(_) => "string".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax: unexpected {}", found))
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", op))
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", kw))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => self.unexpected(),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => self.unexpected(),
        }
    }

    // --- depth accounting ---

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return self.error("too many nested levels");
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn link(&mut self) -> PResult<()> {
        self.links += 1;
        if self.links > MAX_CHAIN_LINKS {
            return self.error("operator chain too long");
        }
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.enter()?;
        let result = f(self);
        self.leave();
        result
    }

    /// Run a left-associative chain; links and levels it charges are
    /// returned when it ends.
    fn chain<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = (self.depth, self.links);
        let result = f(self);
        (self.depth, self.links) = saved;
        result
    }

    // --- statements ---

    fn program(mut self) -> PResult<Program> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Program { body })
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Keyword("if") => self.if_stmt()?,
            Tok::Keyword("while") => self.while_stmt()?,
            Tok::Keyword("for") => self.for_stmt()?,
            Tok::Keyword("def") => self.def_stmt()?,
            Tok::Keyword("class") => self.unsupported_block("class")?,
            Tok::Keyword("with") => self.unsupported_block("with")?,
            Tok::Keyword("async") => self.unsupported_block("async")?,
            Tok::Keyword("try") => self.try_stmt()?,
            Tok::Indent => return self.error("unexpected indent"),
            _ => return self.simple_line(),
        };
        Ok(vec![Stmt { line, kind }])
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        self.nested(|p| {
            if !matches!(p.peek(), Tok::Newline) {
                return p.simple_line();
            }
            p.pos += 1;
            if !matches!(p.peek(), Tok::Indent) {
                return p.error("expected an indented block");
            }
            p.pos += 1;

            let mut body = Vec::new();
            loop {
                match p.peek() {
                    Tok::Dedent => {
                        p.pos += 1;
                        break;
                    }
                    Tok::Eof => break,
                    Tok::Newline => p.pos += 1,
                    _ => body.extend(p.statement()?),
                }
            }
            Ok(body)
        })
    }

    fn if_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.check_kw("elif") {
            let line = self.line();
            let kind = self.if_stmt()?;
            vec![Stmt { line, kind }]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        if self.check_kw("else") {
            return self.error("'else' clause on loops is not supported");
        }
        Ok(StmtKind::While { test, body })
    }

    fn for_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        if self.check_kw("else") {
            return self.error("'else' clause on loops is not supported");
        }
        Ok(StmtKind::For { target, iter, body })
    }

    fn def_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;

        let mut params: Vec<Param> = Vec::new();
        while !self.check_op(")") {
            let pname = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return self.error("non-default argument follows default argument");
                }
                None
            };
            if params.iter().any(|p| p.name == pname) {
                return self.error(format!("duplicate argument '{}' in function definition", pname));
            }
            params.push(Param {
                name: pname,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;

        let body = self.block()?;
        Ok(StmtKind::FunctionDef(Arc::new(FunctionDef { name, params, body })))
    }

    /// `class`, `with` and `async`: skip the header, parse and drop the body.
    fn unsupported_block(&mut self, construct: &'static str) -> PResult<StmtKind> {
        self.advance();
        self.skip_header()?;
        self.block()?;
        Ok(StmtKind::Unsupported(construct))
    }

    fn try_stmt(&mut self) -> PResult<StmtKind> {
        self.advance();
        self.block()?;
        let mut handlers = 0;
        while self.check_kw("except") {
            self.advance();
            self.skip_header()?;
            self.block()?;
            handlers += 1;
        }
        if handlers > 0 && self.eat_kw("else") {
            self.block()?;
        }
        if self.eat_kw("finally") {
            self.block()?;
        } else if handlers == 0 {
            return self.error("expected 'except' or 'finally' block");
        }
        Ok(StmtKind::Unsupported("try"))
    }

    fn skip_header(&mut self) -> PResult<()> {
        while !self.check_op(":") {
            match self.peek() {
                Tok::Newline | Tok::Eof => return self.error("expected ':'"),
                _ => {
                    self.advance();
                }
            }
        }
        Ok(())
    }

    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.small_stmt()?;
            stmts.push(Stmt { line, kind });
            if !self.eat_op(";") {
                break;
            }
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn small_stmt(&mut self) -> PResult<StmtKind> {
        match self.peek() {
            Tok::Keyword("pass") => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            Tok::Keyword("break") => {
                self.advance();
                Ok(StmtKind::Break)
            }
            Tok::Keyword("continue") => {
                self.advance();
                Ok(StmtKind::Continue)
            }
            Tok::Keyword("return") => {
                self.advance();
                if self.at_stmt_end() {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.testlist()?)))
                }
            }
            Tok::Keyword("del") => {
                self.advance();
                let target = self.target_list()?;
                let targets = match target {
                    Expr::Tuple(items) => items,
                    other => vec![other],
                };
                Ok(StmtKind::Delete(targets))
            }
            Tok::Keyword("assert") => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                Ok(StmtKind::Assert { test, msg })
            }
            Tok::Keyword("import") => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    names.push(self.dotted_name()?);
                    if self.eat_kw("as") {
                        self.expect_name()?;
                    }
                    if !self.eat_op(",") {
                        break;
                    }
                }
                Ok(StmtKind::Import(names))
            }
            Tok::Keyword("from") => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_kw("import")?;
                let mut names = Vec::new();
                if self.eat_op("*") {
                    names.push("*".to_string());
                } else {
                    let parens = self.eat_op("(");
                    loop {
                        names.push(self.expect_name()?);
                        if self.eat_kw("as") {
                            self.expect_name()?;
                        }
                        if !self.eat_op(",") || (parens && self.check_op(")")) {
                            break;
                        }
                    }
                    if parens {
                        self.expect_op(")")?;
                    }
                }
                Ok(StmtKind::ImportFrom { module, names })
            }
            Tok::Keyword("global") => {
                self.advance();
                Ok(StmtKind::Global(self.name_list()?))
            }
            Tok::Keyword("nonlocal") => {
                self.advance();
                Ok(StmtKind::Nonlocal(self.name_list()?))
            }
            Tok::Keyword("raise") => {
                self.advance();
                if !self.at_stmt_end() {
                    self.testlist()?;
                    if self.eat_kw("from") {
                        self.test()?;
                    }
                }
                Ok(StmtKind::Unsupported("raise"))
            }
            _ => self.expr_stmt(),
        }
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Op(";"))
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.expect_name()?];
        while self.eat_op(",") {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn expr_stmt(&mut self) -> PResult<StmtKind> {
        let first = self.testlist()?;

        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            if !matches!(first, Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. }) {
                return self.error("illegal expression for augmented assignment");
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if !self.check_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![first];
        let mut value;
        loop {
            self.expect_op("=")?;
            value = self.testlist()?;
            if !self.check_op("=") {
                break;
            }
            targets.push(value);
        }
        for target in &targets {
            self.check_assignable(target)?;
        }
        Ok(StmtKind::Assign { targets, value })
    }

    fn check_assignable(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.check_assignable(item)?;
                }
                Ok(())
            }
            _ => self.error("cannot assign to expression"),
        }
    }

    /// Targets of `for` / `del` / comprehensions: primaries, comma-separated.
    fn target_list(&mut self) -> PResult<Expr> {
        let first = self.primary()?;
        if !self.check_op(",") {
            self.check_assignable(&first)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_kw("in") || self.at_stmt_end() {
                break;
            }
            items.push(self.primary()?);
        }
        let target = Expr::Tuple(items);
        self.check_assignable(&target)?;
        Ok(target)
    }

    // --- expressions ---

    fn testlist(&mut self) -> PResult<Expr> {
        let first = self.test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_testlist_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_testlist_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::Eof
                | Tok::Op(";" | "=" | ")" | ":")
                | Tok::Op("+=" | "-=" | "*=" | "/=" | "//=" | "%=" | "**=")
        )
    }

    fn test(&mut self) -> PResult<Expr> {
        self.nested(|p| {
            if p.check_kw("lambda") {
                return p.lambda();
            }
            let body = p.or_test()?;
            if !p.eat_kw("if") {
                return Ok(body);
            }
            let test = p.or_test()?;
            p.expect_kw("else")?;
            let orelse = p.test()?;
            Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            })
        })
    }

    fn lambda(&mut self) -> PResult<Expr> {
        self.advance();
        let mut params = Vec::new();
        while !self.check_op(":") {
            params.push(self.expect_name()?);
            if self.eat_op("=") {
                self.test()?;
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn or_test(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.and_test()?;
            while p.eat_kw("or") {
                p.link()?;
                let right = p.and_test()?;
                left = Expr::Or(Box::new(left), Box::new(right));
            }
            Ok(left)
        })
    }

    fn and_test(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.not_test()?;
            while p.eat_kw("and") {
                p.link()?;
                let right = p.not_test()?;
                left = Expr::And(Box::new(left), Box::new(right));
            }
            Ok(left)
        })
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            let operand = self.nested(|p| p.not_test())?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("not") if matches!(self.peek_at(1), Tok::Keyword("in")) => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Keyword("is") => {
                    if matches!(self.peek_at(1), Tok::Keyword("not")) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn arith(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.term()?;
            loop {
                let op = match p.peek() {
                    Tok::Op("+") => BinOp::Add,
                    Tok::Op("-") => BinOp::Sub,
                    _ => break,
                };
                p.advance();
                p.link()?;
                let right = p.term()?;
                left = Expr::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
            }
            Ok(left)
        })
    }

    fn term(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.factor()?;
            loop {
                let op = match p.peek() {
                    Tok::Op("*") => BinOp::Mul,
                    Tok::Op("/") => BinOp::Div,
                    Tok::Op("//") => BinOp::FloorDiv,
                    Tok::Op("%") => BinOp::Mod,
                    _ => break,
                };
                p.advance();
                p.link()?;
                let right = p.factor()?;
                left = Expr::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
            }
            Ok(left)
        })
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested(|p| p.factor())?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.primary()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        let exponent = self.nested(|p| p.factor())?;
        Ok(Expr::BinOp {
            left: Box::new(base),
            op: BinOp::Pow,
            right: Box::new(exponent),
        })
    }

    fn primary(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut expr = p.atom()?;
            loop {
                if p.eat_op("(") {
                    p.enter()?;
                    expr = p.call(expr)?;
                } else if p.eat_op("[") {
                    p.enter()?;
                    let index = p.subscript()?;
                    p.expect_op("]")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                } else if p.eat_op(".") {
                    p.enter()?;
                    let attr = p.expect_name()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                } else {
                    break;
                }
            }
            Ok(expr)
        })
    }

    fn call(&mut self, func: Expr) -> PResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.check_op(")") {
            if self.check_op("*") || self.check_op("**") {
                return self.error("argument unpacking is not supported");
            }
            let is_keyword = matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_at(1), Tok::Op("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return self.error(format!("keyword argument repeated: {}", name));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return self.error("positional argument follows keyword argument");
                }
                let arg = self.test()?;
                if self.check_kw("for") {
                    if !args.is_empty() {
                        return self.error("generator expression must be parenthesized");
                    }
                    args.push(self.comprehension(arg)?);
                    if !self.check_op(")") {
                        return self.error("generator expression must be parenthesized");
                    }
                    break;
                }
                args.push(arg);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;

        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let lower = if self.check_op(":") {
            None
        } else {
            let first = self.test()?;
            if !self.check_op(":") {
                if self.check_op(",") {
                    let mut items = vec![first];
                    while self.eat_op(",") {
                        if self.check_op("]") {
                            break;
                        }
                        items.push(self.test()?);
                    }
                    return Ok(Expr::Tuple(items));
                }
                return Ok(first);
            }
            Some(Box::new(first))
        };

        self.expect_op(":")?;
        let upper = if self.check_op(":") || self.check_op("]") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.check_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn comprehension(&mut self, elt: Expr) -> PResult<Expr> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.nested(|p| p.or_test())?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.nested(|p| p.or_test())?);
            }
            generators.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }
        Ok(Expr::ListComp {
            elt: Box::new(elt),
            generators,
        })
    }

    fn atom(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            Tok::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            Tok::Str(s) => {
                self.advance();
                let mut s = s;
                while let Tok::Str(more) = self.peek() {
                    s.push_str(more);
                    self.advance();
                }
                Ok(Expr::Str(s))
            }
            Tok::Keyword("True") => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Tok::Keyword("False") => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Tok::Keyword("None") => {
                self.advance();
                Ok(Expr::None)
            }
            Tok::Keyword(kw @ ("yield" | "await")) => {
                self.advance();
                if !self.at_testlist_end() && !self.check_op("]") && !self.check_op("}") {
                    self.testlist()?;
                }
                Ok(Expr::Unsupported(kw))
            }
            Tok::Op("(") => {
                self.advance();
                self.nested(|p| p.paren())
            }
            Tok::Op("[") => {
                self.advance();
                self.nested(|p| p.list())
            }
            Tok::Op("{") => {
                self.advance();
                self.nested(|p| p.dict())
            }
            _ => self.unexpected(),
        }
    }

    fn paren(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.check_kw("for") {
            let comp = self.comprehension(first)?;
            self.expect_op(")")?;
            return Ok(comp);
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.check_kw("for") {
            let comp = self.comprehension(first)?;
            self.expect_op("]")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict(&mut self) -> PResult<Expr> {
        let mut pairs = Vec::new();
        while !self.check_op("}") {
            let key = self.test()?;
            if !self.eat_op(":") {
                return self.error("set literals are not supported");
            }
            let value = self.test()?;
            if self.check_kw("for") {
                return self.error("dict comprehensions are not supported");
            }
            pairs.push((key, value));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(src: &str) -> StmtKind {
        let mut program = parse(src).unwrap();
        assert_eq!(program.body.len(), 1, "expected one statement in {:?}", src);
        program.body.remove(0).kind
    }

    #[test]
    fn test_parse_assignment() {
        match stmt("x = 1 + 1") {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets, vec![Expr::Name("x".into())]);
                assert_eq!(
                    value,
                    Expr::BinOp {
                        left: Box::new(Expr::Int(1)),
                        op: BinOp::Add,
                        right: Box::new(Expr::Int(1)),
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_program() {
        assert!(parse("").unwrap().body.is_empty());
        assert!(parse("\n   \n# nothing\n").unwrap().body.is_empty());
    }

    #[test]
    fn test_precedence() {
        match stmt("1 + 2 * 3 ** 2") {
            StmtKind::Expr(Expr::BinOp { op, right, .. }) => {
                assert_eq!(op, BinOp::Add);
                assert!(matches!(*right, Expr::BinOp { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_import_forms() {
        assert_eq!(stmt("import os"), StmtKind::Import(vec!["os".into()]));
        assert_eq!(
            stmt("import os.path as p, sys"),
            StmtKind::Import(vec!["os.path".into(), "sys".into()])
        );
        assert_eq!(
            stmt("from subprocess import (run, Popen)"),
            StmtKind::ImportFrom {
                module: "subprocess".into(),
                names: vec!["run".into(), "Popen".into()],
            }
        );
    }

    #[test]
    fn test_unsupported_blocks_are_named() {
        assert_eq!(stmt("class A:\n    pass\n"), StmtKind::Unsupported("class"));
        assert_eq!(
            stmt("with x as y:\n    pass\n"),
            StmtKind::Unsupported("with")
        );
        assert_eq!(
            stmt("try:\n    x = 1\nexcept ValueError as e:\n    pass\nfinally:\n    pass\n"),
            StmtKind::Unsupported("try")
        );
        assert_eq!(stmt("raise ValueError('x')"), StmtKind::Unsupported("raise"));
    }

    #[test]
    fn test_compound_statements() {
        let program = parse(
            "def f(a, b=2):\n    if a > b:\n        return a\n    elif a == b:\n        return 0\n    else:\n        return b\nfor i, v in enumerate([1, 2]):\n    total = f(i, v)\nwhile False: pass\n",
        )
        .unwrap();
        assert_eq!(program.body.len(), 3);
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[1].default.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(program.body[1].line, 8);
    }

    #[test]
    fn test_chained_assignment_and_unpacking() {
        match stmt("a = b = 1") {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match stmt("a, b = b, a") {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(targets[0], Expr::Tuple(_)));
                assert!(matches!(value, Expr::Tuple(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comprehensions_and_calls() {
        match stmt("sum(x * x for x in range(10) if x % 2)") {
            StmtKind::Expr(Expr::Call { args, .. }) => {
                assert!(matches!(args[0], Expr::ListComp { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        match stmt("sorted(xs, reverse=True)") {
            StmtKind::Expr(Expr::Call { args, kwargs, .. }) => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs[0].0, "reverse");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slices() {
        match stmt("s[1:-1:2]") {
            StmtKind::Expr(Expr::Subscript { index, .. }) => {
                assert!(matches!(*index, Expr::Slice { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        match stmt("s[::-1]") {
            StmtKind::Expr(Expr::Subscript { index, .. }) => match *index {
                Expr::Slice { lower, upper, step } => {
                    assert!(lower.is_none() && upper.is_none() && step.is_some());
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lambda_and_yield_are_parsed() {
        match stmt("f = lambda x: x + 1") {
            StmtKind::Assign { value, .. } => assert!(matches!(value, Expr::Lambda { .. })),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stmt("yield 1"), StmtKind::Expr(Expr::Unsupported("yield")));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("x = ").is_err());
        assert!(parse("1 = x").is_err());
        assert!(parse("if x\n    pass").is_err());
        assert!(parse("def f(a=1, b): pass").is_err());
        assert!(parse("f(a=1, 2)").is_err());
        assert!(parse("  x = 1").is_err());
        assert!(parse("{1, 2}").is_err());
        assert!(parse("while x:\n    pass\nelse:\n    pass\n").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("x = {}1{}", "(".repeat(MAX_DEPTH + 5), ")".repeat(MAX_DEPTH + 5));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nested"));

        let ok_chain = format!("x = 1{}", " + 1".repeat(MAX_DEPTH / 2));
        assert!(parse(&ok_chain).is_ok());
    }

    #[test]
    fn test_long_operator_chains() {
        let sum = format!("x = 1{}", " + 1".repeat(149));
        assert!(parse(&sum).is_ok());
        let product = format!("x = 2{}", " * 1 // 1".repeat(100));
        assert!(parse(&product).is_ok());
        let all = format!("x = True{}", " and True".repeat(149));
        assert!(parse(&all).is_ok());
        let any = format!("x = False{}", " or False".repeat(149));
        assert!(parse(&any).is_ok());

        let too_long = format!("x = 1{}", " + 1".repeat(MAX_CHAIN_LINKS + 1));
        let err = parse(&too_long).unwrap_err();
        assert!(err.message.contains("chain"));

        // Links along one path add up across parentheses.
        let half = " + 1".repeat(MAX_CHAIN_LINKS / 2 + 1);
        let split = format!("x = 1{} + (1{})", half, half);
        assert!(parse(&split).is_err());
    }
}
