//! Recursive-descent parser for the policy expression language.
//!
//! Precedence, low to high: `||`, `&&`, equality, comparison, additive,
//! multiplicative, unary, postfix (`.exists`, call), primary.

use crate::error::{Error, Result};
use crate::policy::ast::{BinaryOp, Expr, Program, UnaryOp};
use crate::policy::lexer::{lex, snippet_at, Token, TokenKind};

const CONTEXT_NAMESPACES: &[&str] = &["principal", "resource", "request", "action"];

pub fn parse(source: &str) -> Result<Program> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0, source };
    let root = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(Program { root })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].position
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let position = self.position();
        Error::policy_parse(message, position, snippet_at(self.source, position))
    }

    fn expect_eof(&self) -> Result<()> {
        if matches!(self.peek(), TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error(format!("unexpected trailing token {:?}", self.peek())))
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<()> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), TokenKind::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), TokenKind::And) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Lte => BinaryOp::Lte,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Gte => BinaryOp::Gte,
                TokenKind::In => BinaryOp::In,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            TokenKind::Not => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr) })
            }
            TokenKind::Minus => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(expr) })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    if matches!(self.peek(), TokenKind::LParen) && name == "exists" {
                        self.advance();
                        let binding = self.expect_ident()?;
                        self.expect(&TokenKind::Comma)?;
                        let predicate = self.parse_or()?;
                        self.expect(&TokenKind::RParen)?;
                        expr = Expr::Exists {
                            collection: Box::new(expr),
                            binding,
                            predicate: Box::new(predicate),
                        };
                    } else if let Expr::Path(mut segments) = expr {
                        segments.push(name);
                        expr = Expr::Path(segments);
                    } else {
                        return Err(self.error("'.' is only valid after a path expression"));
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            TokenKind::True => {
                self.advance();
                Ok(Expr::BoolLit(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLit(false))
            }
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::IntLit(v))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::FloatLit(v))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::StringLit(s))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !matches!(self.peek(), TokenKind::RBracket) {
                    items.push(self.parse_or()?);
                    while matches!(self.peek(), TokenKind::Comma) {
                        self.advance();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::ListLit(items))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if matches!(self.peek(), TokenKind::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), TokenKind::RParen) {
                        args.push(self.parse_or()?);
                        while matches!(self.peek(), TokenKind::Comma) {
                            self.advance();
                            args.push(self.parse_or()?);
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    Ok(Expr::Call { name, args })
                } else if CONTEXT_NAMESPACES.contains(&name.as_str()) {
                    Ok(Expr::Path(vec![name]))
                } else {
                    Ok(Expr::Path(vec![name]))
                }
            }
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {other:?}"))),
        }
    }
}
