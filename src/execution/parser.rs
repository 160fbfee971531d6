//! Recursive-descent parser for the program subset.
//!
//! Expression precedence (lowest → highest):
//! 1. `x if c else y`
//! 2. `or`
//! 3. `and`
//! 4. `not`
//! 5. comparisons (`< <= > >= == != in not in is is not`, chaining allowed)
//! 6. `+`, `-`
//! 7. `*`, `/`, `//`, `%`
//! 8. unary `-`, `+`
//! 9. `**` (right-associative, binds tighter than a unary on its left)
//! 10. call, subscript, attribute

use super::ast::*;
use super::error::{RunResult, RuntimeError};
use super::lexer::{tokenize, Token, TokenKind, UNSUPPORTED_KEYWORDS};

/// How deep expressions and blocks may nest. Binary operator chains count
/// one level per operator, since they nest in the tree.
const MAX_DEPTH: usize = 1000;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    fn_depth: usize,
    loop_depth: usize,
    depth: usize,
}

/// Parse a whole program.
pub fn parse_program(source: &str) -> RunResult<Vec<Stmt>> {
    Parser::new(tokenize(source)?).parse_program()
}

/// Parse a single expression (surrounding whitespace ignored).
pub fn parse_expression(source: &str) -> RunResult<Expr> {
    Parser::new(tokenize(source.trim())?).parse_expression_only()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, fn_depth: 0, loop_depth: 0, depth: 0 }
    }

    fn deepen(&mut self) -> RunResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("too many nested expressions or blocks"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> RunResult<T>) -> RunResult<T> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    pub fn parse_program(mut self) -> RunResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::Eof) {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            stmts.extend(self.parse_statement()?);
        }
        Ok(stmts)
    }

    pub fn parse_expression_only(mut self) -> RunResult<Expr> {
        while self.eat(&TokenKind::Newline) {}
        if self.at(&TokenKind::Eof) {
            return Err(self.error("unexpected end of input"));
        }
        let expr = self.parse_testlist()?;
        while self.eat(&TokenKind::Newline) {}
        if !self.at(&TokenKind::Eof) {
            return Err(self.invalid_syntax());
        }
        Ok(expr)
    }

    // ── Token cursor ──────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        // The lexer guarantees a trailing Eof, so the last token is a safe fallback.
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn look_ahead(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn line(&self) -> usize {
        self.peek().line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> RunResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_name(&mut self) -> RunResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::syntax(self.line(), message)
    }

    fn invalid_syntax(&self) -> RuntimeError {
        match self.peek_kind() {
            TokenKind::Indent => self.error("unexpected indent"),
            TokenKind::Eof | TokenKind::Newline => self.error("unexpected end of line"),
            kind => self.error(format!("invalid syntax near {kind:?}")),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof | TokenKind::Semicolon)
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Name(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::FStr(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Not
        )
    }

    // ── Statements ────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> RunResult<Vec<Stmt>> {
        match self.peek_kind() {
            TokenKind::Def => Ok(vec![self.parse_def()?]),
            TokenKind::If => Ok(vec![self.parse_if()?]),
            TokenKind::For => Ok(vec![self.parse_for()?]),
            TokenKind::While => Ok(vec![self.parse_while()?]),
            TokenKind::Elif | TokenKind::Else => Err(self.invalid_syntax()),
            _ => self.parse_simple_line(),
        }
    }

    /// One or more `;`-separated simple statements ending the line.
    fn parse_simple_line(&mut self) -> RunResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple()?];
        while self.eat(&TokenKind::Semicolon) {
            if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_simple()?);
        }
        if !self.eat(&TokenKind::Newline) && !self.at(&TokenKind::Eof) {
            return Err(self.invalid_syntax());
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> RunResult<Vec<Stmt>> {
        self.nested(Self::parse_suite)
    }

    fn parse_suite(&mut self) -> RunResult<Vec<Stmt>> {
        self.expect(&TokenKind::Colon, "':'")?;
        if !self.eat(&TokenKind::Newline) {
            return self.parse_simple_line();
        }
        if !self.eat(&TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&TokenKind::Dedent) {
            if self.at(&TokenKind::Eof) {
                break;
            }
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_def(&mut self) -> RunResult<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_name()?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            if matches!(self.peek_kind(), TokenKind::Star | TokenKind::DoubleStar) {
                return Err(self.error("variadic parameters are not supported"));
            }
            let pname = self.expect_name()?;
            if self.eat(&TokenKind::Colon) {
                self.parse_expression()?; // annotation
            }
            let default = if self.eat(&TokenKind::Assign) { Some(self.parse_expression()?) } else { None };
            if default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            params.push(Param { name: pname, default });
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen, "')'")?;
                break;
            }
        }
        if self.eat(&TokenKind::Arrow) {
            self.parse_expression()?; // return annotation
        }

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.fn_depth += 1;
        let body = self.parse_block();
        self.fn_depth -= 1;
        self.loop_depth = saved_loops;

        Ok(Stmt { kind: StmtKind::FunctionDef { name, params, body: body? }, line })
    }

    /// Handles both `if` and `elif` (an `elif` chain nests in `orelse`).
    fn parse_if(&mut self) -> RunResult<Stmt> {
        let line = self.line();
        self.advance();
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        let orelse = match self.peek_kind() {
            TokenKind::Elif => vec![self.parse_if()?],
            TokenKind::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt { kind: StmtKind::If { cond, body, orelse }, line })
    }

    fn parse_for(&mut self) -> RunResult<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect(&TokenKind::In, "'in'")?;
        let iter = self.parse_testlist()?;
        let body = self.parse_loop_body()?;
        if self.at(&TokenKind::Else) {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(Stmt { kind: StmtKind::For { target, iter, body }, line })
    }

    fn parse_while(&mut self) -> RunResult<Stmt> {
        let line = self.line();
        self.advance();
        let cond = self.parse_expression()?;
        let body = self.parse_loop_body()?;
        if self.at(&TokenKind::Else) {
            return Err(self.error("'while ... else' is not supported"));
        }
        Ok(Stmt { kind: StmtKind::While { cond, body }, line })
    }

    fn parse_loop_body(&mut self) -> RunResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    fn parse_simple(&mut self) -> RunResult<Stmt> {
        let line = self.line();
        let kind = match self.peek_kind().clone() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break | TokenKind::Continue => {
                let is_break = self.at(&TokenKind::Break);
                if self.loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(self.error(format!("'{word}' outside loop")));
                }
                self.advance();
                if is_break { StmtKind::Break } else { StmtKind::Continue }
            }
            TokenKind::Return => {
                if self.fn_depth == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                let value = if self.at_line_end() { None } else { Some(self.parse_testlist()?) };
                StmtKind::Return(value)
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expression()?;
                let msg = if self.eat(&TokenKind::Comma) { Some(self.parse_expression()?) } else { None };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Import => {
                self.advance();
                let module = self.parse_dotted_name()?;
                let alias = if self.eat(&TokenKind::As) { Some(self.expect_name()?) } else { None };
                if self.at(&TokenKind::Comma) {
                    return Err(self.error("import one module per statement"));
                }
                StmtKind::Import { module, alias }
            }
            TokenKind::From => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect(&TokenKind::Import, "'import'")?;
                let mut names = Vec::new();
                if !self.eat(&TokenKind::Star) {
                    let parens = self.eat(&TokenKind::LParen);
                    loop {
                        let name = self.expect_name()?;
                        let alias = if self.eat(&TokenKind::As) { Some(self.expect_name()?) } else { None };
                        names.push((name, alias));
                        if !self.eat(&TokenKind::Comma) || (parens && self.at(&TokenKind::RParen)) {
                            break;
                        }
                    }
                    if parens {
                        self.expect(&TokenKind::RParen, "')'")?;
                    }
                }
                StmtKind::ImportFrom { module, names }
            }
            TokenKind::Name(word) if UNSUPPORTED_KEYWORDS.contains(&word.as_str()) => {
                return Err(self.error(format!("'{word}' statements are not supported")));
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn parse_dotted_name(&mut self) -> RunResult<String> {
        let mut name = self.expect_name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_expression_statement(&mut self) -> RunResult<StmtKind> {
        let first = self.parse_testlist()?;

        // Annotated assignment: `x: int = 5` (bare `x: int` declares nothing).
        if self.at(&TokenKind::Colon) {
            if !matches!(first, Expr::Name(_)) {
                return Err(self.invalid_syntax());
            }
            self.advance();
            self.parse_expression()?;
            if !self.eat(&TokenKind::Assign) {
                return Ok(StmtKind::Pass);
            }
            let value = self.parse_testlist()?;
            let target = self.to_target(first)?;
            return Ok(StmtKind::Assign { targets: vec![target], value });
        }

        if let Some(op) = self.augmented_op() {
            self.advance();
            let target = match self.to_target(first)? {
                Target::Tuple(_) => {
                    return Err(self.error("illegal expression for augmented assignment"))
                }
                t => t,
            };
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.at(&TokenKind::Assign) {
            let mut exprs = vec![first];
            while self.eat(&TokenKind::Assign) {
                exprs.push(self.parse_testlist()?);
            }
            let value = exprs.pop().ok_or_else(|| self.invalid_syntax())?;
            let targets = exprs.into_iter().map(|e| self.to_target(e)).collect::<RunResult<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn augmented_op(&self) -> Option<BinOp> {
        let op = match self.peek_kind() {
            TokenKind::PlusAssign => BinOp::Add,
            TokenKind::MinusAssign => BinOp::Sub,
            TokenKind::StarAssign => BinOp::Mul,
            TokenKind::SlashAssign => BinOp::Div,
            TokenKind::DoubleSlashAssign => BinOp::FloorDiv,
            TokenKind::PercentAssign => BinOp::Mod,
            TokenKind::DoubleStarAssign => BinOp::Pow,
            _ => return None,
        };
        Some(op)
    }

    fn to_target(&self, expr: Expr) -> RunResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { value, index } => Ok(Target::Subscript { value: *value, index: *index }),
            Expr::Tuple(items) | Expr::List(items) => {
                let targets = items.into_iter().map(|e| self.to_target(e)).collect::<RunResult<Vec<_>>>()?;
                Ok(Target::Tuple(targets))
            }
            Expr::Attribute { .. } => Err(self.error("attribute assignment is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// Loop targets: postfix expressions separated by commas, stopping at `in`.
    fn parse_target_list(&mut self) -> RunResult<Target> {
        let mut items = vec![self.parse_postfix()?];
        let mut is_tuple = false;
        while self.eat(&TokenKind::Comma) {
            is_tuple = true;
            if self.at(&TokenKind::In) {
                break;
            }
            items.push(self.parse_postfix()?);
        }
        if is_tuple {
            self.to_target(Expr::Tuple(items))
        } else {
            let item = items.pop().ok_or_else(|| self.invalid_syntax())?;
            self.to_target(item)
        }
    }

    // ── Expressions ───────────────────────────────────────────────────

    /// Comma-separated expressions; more than one (or a trailing comma) makes a tuple.
    fn parse_testlist(&mut self) -> RunResult<Expr> {
        let first = self.parse_expression()?;
        if !self.at(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_expression(&mut self) -> RunResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> RunResult<Expr> {
        let body = self.parse_or()?;
        if !self.eat(&TokenKind::If) {
            return Ok(body);
        }
        let cond = self.parse_or()?;
        self.expect(&TokenKind::Else, "'else' in conditional expression")?;
        let orelse = self.parse_expression()?;
        Ok(Expr::IfExp { cond: Box::new(cond), then: Box::new(body), orelse: Box::new(orelse) })
    }

    fn parse_or(&mut self) -> RunResult<Expr> {
        let outer = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            self.deepen()?;
            let right = self.parse_and()?;
            left = Expr::BoolOp { op: BoolOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        self.depth = outer;
        Ok(left)
    }

    fn parse_and(&mut self) -> RunResult<Expr> {
        let outer = self.depth;
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            self.deepen()?;
            let right = self.parse_not()?;
            left = Expr::BoolOp { op: BoolOp::And, left: Box::new(left), right: Box::new(right) };
        }
        self.depth = outer;
        Ok(left)
    }

    fn parse_not(&mut self) -> RunResult<Expr> {
        if self.eat(&TokenKind::Not) {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> RunResult<Expr> {
        let left = self.parse_arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Less => CmpOp::Lt,
                TokenKind::LessEq => CmpOp::LtE,
                TokenKind::Greater => CmpOp::Gt,
                TokenKind::GreaterEq => CmpOp::GtE,
                TokenKind::In => CmpOp::In,
                TokenKind::Not if self.look_ahead(1) == Some(&TokenKind::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Is if self.look_ahead(1) == Some(&TokenKind::Not) => {
                    self.advance();
                    CmpOp::IsNot
                }
                TokenKind::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            rest.push((op, self.parse_arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare { left: Box::new(left), rest })
        }
    }

    fn parse_arith(&mut self) -> RunResult<Expr> {
        let outer = self.depth;
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_term()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right) };
        }
        self.depth = outer;
        Ok(left)
    }

    fn parse_term(&mut self) -> RunResult<Expr> {
        let outer = self.depth;
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_factor()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right) };
        }
        self.depth = outer;
        Ok(left)
    }

    fn parse_factor(&mut self) -> RunResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(Self::parse_factor)?;
        Ok(Expr::Unary { op, operand: Box::new(operand) })
    }

    fn parse_power(&mut self) -> RunResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.eat(&TokenKind::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.nested(Self::parse_factor)?;
        Ok(Expr::Binary { left: Box::new(base), op: BinOp::Pow, right: Box::new(exponent) })
    }

    fn parse_postfix(&mut self) -> RunResult<Expr> {
        let outer = self.depth;
        let mut expr = self.parse_atom()?;
        loop {
            if matches!(self.peek_kind(), TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot) {
                self.deepen()?;
            }
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call { func: Box::new(expr), args, kwargs };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    expr = Expr::Subscript { value: Box::new(expr), index: Box::new(index) };
                }
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_name()?;
                    expr = Expr::Attribute { value: Box::new(expr), attr };
                }
                _ => {
                    self.depth = outer;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_call_args(&mut self) -> RunResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            if matches!(self.peek_kind(), TokenKind::Star | TokenKind::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword = matches!(self.peek_kind(), TokenKind::Name(_))
                && self.look_ahead(1) == Some(&TokenKind::Assign);
            if is_keyword {
                let name = self.expect_name()?;
                self.advance();
                kwargs.push((name, self.parse_expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.parse_expression()?;
                if self.at(&TokenKind::For) {
                    args.push(self.parse_comprehension(arg)?);
                } else {
                    args.push(arg);
                }
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self) -> RunResult<Expr> {
        let lower = if self.at(&TokenKind::Colon) { None } else { Some(self.parse_expression()?) };
        if !self.eat(&TokenKind::Colon) {
            return match lower {
                Some(index) if self.at(&TokenKind::Comma) => {
                    let mut items = vec![index];
                    while self.eat(&TokenKind::Comma) {
                        if self.at(&TokenKind::RBracket) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                    Ok(Expr::Tuple(items))
                }
                Some(index) => Ok(index),
                None => Err(self.invalid_syntax()),
            };
        }
        let upper = if matches!(self.peek_kind(), TokenKind::RBracket | TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.at(&TokenKind::RBracket) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower: lower.map(Box::new), upper, step })
    }

    fn parse_comprehension(&mut self, elt: Expr) -> RunResult<Expr> {
        let mut generators = Vec::new();
        while self.eat(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.expect(&TokenKind::In, "'in'")?;
            let iter = self.parse_or()?;
            let mut conds = Vec::new();
            while self.eat(&TokenKind::If) {
                conds.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, conds });
        }
        Ok(Expr::ListComp { elt: Box::new(elt), generators })
    }

    fn parse_atom(&mut self) -> RunResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::FStr(body) => {
                self.advance();
                Ok(Expr::FString(parse_fstring(&body, token.line)?))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::None)
            }
            TokenKind::Name(name) => {
                if UNSUPPORTED_KEYWORDS.contains(&name.as_str()) {
                    return Err(self.error(format!("'{name}' is not supported")));
                }
                self.advance();
                Ok(Expr::Name(name))
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expression()?;
                let expr = if self.at(&TokenKind::For) {
                    self.parse_comprehension(first)?
                } else if self.at(&TokenKind::Comma) {
                    let mut items = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        if self.at(&TokenKind::RParen) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                    Expr::Tuple(items)
                } else {
                    first
                };
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                if self.eat(&TokenKind::RBracket) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expression()?;
                let expr = if self.at(&TokenKind::For) {
                    self.parse_comprehension(first)?
                } else {
                    let mut items = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        if self.at(&TokenKind::RBracket) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                    Expr::List(items)
                };
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(expr)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.eat(&TokenKind::RBrace) {
                    let key = self.parse_expression()?;
                    if !self.eat(&TokenKind::Colon) {
                        return Err(self.error("set literals are not supported"));
                    }
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBrace, "'}'")?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            _ => Err(self.invalid_syntax()),
        }
    }
}

/// Split an f-string body into literal text and `{expr[!r][:spec]}` fields.
fn parse_fstring(body: &str, line: usize) -> RunResult<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(RuntimeError::syntax(line, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }

        let start = i + 1;
        let mut j = start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut colon_at = None;
        let mut bang_at = None;
        while j < chars.len() {
            let ch = chars[j];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
            } else {
                match ch {
                    '\'' | '"' => quote = Some(ch),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth == 0 => break,
                    '}' => depth -= 1,
                    ':' if depth == 0 && colon_at.is_none() => colon_at = Some(j),
                    '!' if depth == 0
                        && colon_at.is_none()
                        && chars.get(j + 1) != Some(&'=') =>
                    {
                        bang_at = Some(j)
                    }
                    _ => {}
                }
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(RuntimeError::syntax(line, "f-string: expecting '}'"));
        }

        let expr_end = bang_at.or(colon_at).unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        let expr = parse_expression(&source).map_err(|mut e| {
            e.line = Some(line);
            e
        })?;
        let repr = bang_at.is_some_and(|b| chars.get(b + 1) == Some(&'r'));
        let spec = colon_at.map(|c| chars[c + 1..j].iter().collect::<String>());

        if !literal.is_empty() {
            parts.push(FPart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(FPart::Field { expr, spec, repr });
        i = j + 1;
    }
    if !literal.is_empty() {
        parts.push(FPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error::ErrorKind;

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let chain = vec!["1"; 5000].join(" + ");
        let err = parse_expression(&chain).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert!(parse_expression(&format!("{}1", "-".repeat(5000))).is_err());
        assert!(parse_expression(&vec!["1"; 500].join(" * ")).is_ok());
        let fine = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert!(parse_expression(&fine).is_ok());
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let expr = parse_expression("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn chained_comparison_keeps_all_links() {
        let expr = parse_expression("0 < x <= 10").unwrap();
        match expr {
            Expr::Compare { rest, .. } => assert_eq!(rest.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_with_defaults_and_annotations() {
        let program = parse_program("def f(a: int, b=2) -> int:\n    return a + b\n").unwrap();
        match &program[0].kind {
            StmtKind::FunctionDef { name, params, body } => {
                assert_eq!(name, "f");
                assert_eq!(params.len(), 2);
                assert!(params[1].default.is_some());
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn elif_chain_nests_in_orelse() {
        let src = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        let program = parse_program(src).unwrap();
        match &program[0].kind {
            StmtKind::If { orelse, .. } => {
                assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tuple_unpacking_and_chained_assignment() {
        let program = parse_program("a, b = 1, 2\nx = y = 0\n").unwrap();
        assert!(matches!(&program[0].kind, StmtKind::Assign { targets, .. } if matches!(targets[0], Target::Tuple(_))));
        assert!(matches!(&program[1].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
    }

    #[test]
    fn fstring_fields_with_spec() {
        let parts = parse_fstring("total: {a + b:.2f}!", 1).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], FPart::Field { spec: Some(s), .. } if s == ".2f"));
    }

    #[test]
    fn return_outside_function_is_rejected() {
        let err = parse_program("return 5\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn unsupported_statement_is_a_syntax_error() {
        let err = parse_program("try:\n    x = 1\nexcept:\n    pass\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn generator_argument_becomes_comprehension() {
        let expr = parse_expression("sum(x * 2 for x in xs if x > 1)").unwrap();
        match expr {
            Expr::Call { args, .. } => assert!(matches!(args[0], Expr::ListComp { .. })),
            other => panic!("unexpected {other:?}"),
        }
    }
}
