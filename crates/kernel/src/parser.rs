//! Recursive-descent parser for the kernel language.
//!
//! Grammar (informal):
//! ```text
//! program    = statement* EOF
//! statement  = def | if | while | for | simple NEWLINE
//! def        = "def" NAME "(" [NAME ("," NAME)* [","]] ")" ":" block
//! if         = "if" expr ":" block ("elif" expr ":" block)* ["else" ":" block]
//! while      = "while" expr ":" block
//! for        = "for" NAME "in" expr ":" block
//! block      = NEWLINE INDENT statement+ DEDENT | simple NEWLINE
//! simple     = "return" [expr] | "raise" expr | "pass" | "break" | "continue"
//!            | NAME ("=" | "+=" | "-=" | "*=") expr | expr
//! ```
//!
//! Parsing is pure: it never evaluates anything, which is what makes it
//! safe to run speculatively from the validator.

use std::sync::Arc;

use duet_core::Diagnostic;

use crate::ast::*;
use crate::lexer::{Token, TokenKind, tokenize};

/// Deepest bracket, block or prefix-operator nesting accepted. Each level
/// is a few frames of parser recursion.
const MAX_NESTING: usize = 100;

/// Tallest syntax tree accepted. Operator chains such as `a + b + c` grow the
/// tree one level per operator without recursing in the parser, but dropping
/// or evaluating the tree walks it recursively.
const MAX_HEIGHT: usize = 1_000;

/// Parse kernel source text into a [`Program`].
pub fn parse(source: &str) -> Result<Program, Diagnostic> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens);
    parser.parse_program()
}

/// Parse a single expression (used for `call`-style evaluation in a session).
pub fn parse_expression(source: &str) -> Result<Expr, Diagnostic> {
    let tokens = tokenize(source.trim())?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expr()?;
    while parser.check(&TokenKind::Newline) {
        parser.advance();
    }
    if !parser.check(&TokenKind::EndOfFile) {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    in_function: bool,
    loop_depth: usize,
    nesting: usize,
    height: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            in_function: false,
            loop_depth: 0,
            nesting: 0,
            height: 0,
        }
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with EndOfFile
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        let idx = self.pos.min(last);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let tok = self.peek();
        Diagnostic::new(
            tok.line,
            tok.column,
            format!("expected {expected}, found {}", tok.kind.describe()),
        )
    }

    fn too_deep(&self) -> Diagnostic {
        let tok = self.peek();
        Diagnostic::new(tok.line, tok.column, "expression too deeply nested")
    }

    /// Step one level into a nested construct. Pair with [`leave`](Self::leave).
    fn enter(&mut self) -> Result<(), Diagnostic> {
        self.nesting += 1;
        self.height += 1;
        if self.nesting > MAX_NESTING || self.height > MAX_HEIGHT {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
        self.height -= 1;
    }

    /// Account for one more link in a left-leaning operator chain.
    fn extend_chain(&mut self, links: &mut usize) -> Result<(), Diagnostic> {
        *links += 1;
        self.height += 1;
        if self.height > MAX_HEIGHT {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), Diagnostic> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self, expected: &str) -> Result<String, Diagnostic> {
        match &self.peek().kind {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_end_of_statement(&mut self) -> Result<(), Diagnostic> {
        if self.eat(&TokenKind::Newline) || self.check(&TokenKind::EndOfFile) {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.check(&TokenKind::EndOfFile) {
                break;
            }
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let tok = self.peek();
        let line = tok.line;
        match tok.kind {
            TokenKind::Def => self.parse_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Indent => Err(Diagnostic::new(line, tok.column, "unexpected indent")),
            _ => {
                let stmt = self.parse_simple()?;
                self.expect_end_of_statement()?;
                Ok(stmt)
            }
        }
    }

    // block = NEWLINE INDENT statement+ DEDENT | simple NEWLINE
    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        if self.eat(&TokenKind::Newline) {
            if !self.eat(&TokenKind::Indent) {
                return Err(self.unexpected("an indented block"));
            }
            self.enter()?;
            let mut body = Vec::new();
            while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::EndOfFile) {
                body.push(self.parse_statement()?);
            }
            self.expect(TokenKind::Dedent, "dedent")?;
            self.leave();
            Ok(body)
        } else {
            let stmt = self.parse_simple()?;
            self.expect_end_of_statement()?;
            Ok(vec![stmt])
        }
    }

    fn parse_def(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.advance().line;
        let name = self.expect_name("function name")?;
        self.expect(TokenKind::LParen, "'('")?;

        let mut params: Vec<String> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let tok = self.peek().clone();
            let param = self.expect_name("parameter name")?;
            if params.contains(&param) {
                return Err(Diagnostic::new(
                    tok.line,
                    tok.column,
                    format!("duplicate argument '{param}' in function definition"),
                ));
            }
            params.push(param);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;

        let saved = (self.in_function, self.loop_depth);
        self.in_function = true;
        self.loop_depth = 0;
        let body = self.parse_block();
        (self.in_function, self.loop_depth) = saved;

        Ok(Stmt {
            kind: StmtKind::FunctionDef(Arc::new(FunctionDef {
                name,
                params,
                body: body?,
            })),
            line,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.advance().line;
        let mut branches = Vec::new();

        let condition = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        branches.push((condition, self.parse_block()?));

        while self.eat(&TokenKind::Elif) {
            let condition = self.parse_expr()?;
            self.expect(TokenKind::Colon, "':'")?;
            branches.push((condition, self.parse_block()?));
        }

        let orelse = if self.eat(&TokenKind::Else) {
            self.expect(TokenKind::Colon, "':'")?;
            self.parse_block()?
        } else {
            Vec::new()
        };

        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn parse_loop_body(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.advance().line;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_loop_body()?;
        Ok(Stmt {
            kind: StmtKind::While { condition, body },
            line,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.advance().line;
        let target = self.expect_name("loop variable")?;
        self.expect(TokenKind::In, "'in'")?;
        let iter = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_loop_body()?;
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn parse_simple(&mut self) -> Result<Stmt, Diagnostic> {
        let tok = self.peek().clone();
        let line = tok.line;
        let kind = match tok.kind {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break | TokenKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(Diagnostic::new(
                        line,
                        tok.column,
                        format!("{} outside loop", tok.kind.describe()),
                    ));
                }
                self.advance();
                if tok.kind == TokenKind::Break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            TokenKind::Return => {
                if !self.in_function {
                    return Err(Diagnostic::new(line, tok.column, "'return' outside function"));
                }
                self.advance();
                if self.check(&TokenKind::Newline) || self.check(&TokenKind::EndOfFile) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expr()?))
                }
            }
            TokenKind::Raise => {
                self.advance();
                StmtKind::Raise(self.parse_expr()?)
            }
            _ => {
                let expr = self.parse_expr()?;
                let aug = match self.peek().kind {
                    TokenKind::Assign => None,
                    TokenKind::PlusAssign => Some(BinOp::Add),
                    TokenKind::MinusAssign => Some(BinOp::Sub),
                    TokenKind::StarAssign => Some(BinOp::Mul),
                    _ => return Ok(Stmt { kind: StmtKind::Expr(expr), line }),
                };
                let Expr::Name(target) = expr else {
                    return Err(Diagnostic::new(line, tok.column, "cannot assign to expression"));
                };
                self.advance();
                let value = self.parse_expr()?;
                match aug {
                    None => StmtKind::Assign { target, value },
                    Some(op) => StmtKind::AugAssign { target, op, value },
                }
            }
        };
        Ok(Stmt { kind, line })
    }

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.enter()?;
        let expr = self.parse_or()?;
        self.leave();
        Ok(expr)
    }

    // expr = and ("or" and)*
    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut links = 0;
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            self.extend_chain(&mut links)?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.height -= links;
        Ok(left)
    }

    // and = not ("and" not)*
    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut links = 0;
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            self.extend_chain(&mut links)?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.height -= links;
        Ok(left)
    }

    // not = "not" not | comparison
    fn parse_not(&mut self) -> Result<Expr, Diagnostic> {
        if self.eat(&TokenKind::Not) {
            self.enter()?;
            let operand = self.parse_not()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek().kind {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::LtEq => CmpOp::LtEq,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::GtEq => CmpOp::GtEq,
            TokenKind::In => CmpOp::In,
            TokenKind::Not => {
                // `not in` is the only place `not` follows an operand
                let next = self.tokens.get(self.pos + 1).map(|t| &t.kind);
                if next != Some(&TokenKind::In) {
                    return None;
                }
                self.advance();
                CmpOp::NotIn
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    // comparison = additive (CMP additive)*
    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    // additive = term (("+" | "-") term)*
    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut links = 0;
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.extend_chain(&mut links)?;
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.height -= links;
        Ok(left)
    }

    // term = unary (("*" | "/" | "//" | "%") unary)*
    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut links = 0;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.extend_chain(&mut links)?;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.height -= links;
        Ok(left)
    }

    // unary = ("-" | "+") unary | postfix
    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    // postfix = primary ("(" args ")" | "[" expr "]")*
    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut links = 0;
        let mut expr = self.parse_primary()?;
        loop {
            if matches!(self.peek().kind, TokenKind::LParen | TokenKind::LBracket) {
                self.extend_chain(&mut links)?;
            }
            if self.eat(&TokenKind::LParen) {
                let args = self.parse_sequence(TokenKind::RParen, "')'")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        self.height -= links;
        Ok(expr)
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed.
    fn parse_sequence(&mut self, close: TokenKind, expected: &str) -> Result<Vec<Expr>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, expected)?;
        Ok(items)
    }

    // primary = NUMBER | STRING | "True" | "False" | "None" | NAME
    //         | "(" expr ")" | "[" [expr ("," expr)* [","]] "]"
    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let expr = match &self.peek().kind {
            TokenKind::Int(i) => Expr::Int(*i),
            TokenKind::Float(f) => Expr::Float(*f),
            TokenKind::Str(s) => Expr::Str(s.clone()),
            TokenKind::True => Expr::Bool(true),
            TokenKind::False => Expr::Bool(false),
            TokenKind::None => Expr::None,
            TokenKind::Name(n) => Expr::Name(n.clone()),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.parse_sequence(TokenKind::RBracket, "']'")?;
                return Ok(Expr::List(items));
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(expr)
    }
}
