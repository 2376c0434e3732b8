//! The parser: recursive descent with standard precedence climbing
//! (unary > multiplicative > additive > relational > equality).
//!
//! Stops at the first malformed construct; there is no error recovery.

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::*;
use crate::common::{Id, Line};

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(pub String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(input)?;
    let stmts = parser.parse_stmts_until_eof()?;
    Ok(Program { stmts })
}

struct Parser<'input> {
    lexer: Lexer<'input>,
    peeked: Option<Token<'input>>,
    last_line: Line,
}

impl<'input> Parser<'input> {
    fn new(input: &'input str) -> Result<Self, ParseError> {
        Ok(Parser {
            lexer: Lexer::new(input),
            peeked: None,
            last_line: 1,
        })
    }

    fn peek(&mut self) -> Result<Option<Token<'input>>, ParseError> {
        if self.peeked.is_none() {
            self.peeked = self
                .lexer
                .next()
                .map_err(|e| ParseError(e.to_string()))?;
        }
        Ok(self.peeked)
    }

    fn bump(&mut self) -> Result<Option<Token<'input>>, ParseError> {
        let tok = self.peek()?;
        self.peeked = None;
        if let Some(t) = tok {
            self.last_line = t.line;
        }
        Ok(tok)
    }

    fn at(&mut self, kind: TokenKind) -> Result<bool, ParseError> {
        Ok(self.peek()?.map(|t| t.kind == kind).unwrap_or(false))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'input>, ParseError> {
        match self.bump()? {
            Some(t) if t.kind == kind => Ok(t),
            Some(t) => Err(ParseError(format!(
                "expected {kind} but found {} at line {}",
                t.kind, t.line
            ))),
            None => Err(ParseError(format!("expected {kind} but found end of input"))),
        }
    }

    fn expect_id(&mut self) -> Result<Id, ParseError> {
        let tok = self.expect(TokenKind::Id)?;
        Ok(Id::new(tok.text.to_string()))
    }

    fn parse_stmts_until_eof(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while self.peek()?.is_some() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace)? {
            if self.peek()?.is_none() {
                return Err(ParseError("unterminated block".into()));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let tok = self
            .peek()?
            .ok_or_else(|| ParseError("expected statement, found end of input".into()))?;
        match tok.kind {
            TokenKind::Print => {
                self.bump()?;
                let line = tok.line;
                let e = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Print(e, line))
            }
            TokenKind::If => {
                self.bump()?;
                let line = tok.line;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let then_body = self.parse_block()?;
                let else_body = if self.at(TokenKind::Else)? {
                    self.bump()?;
                    if self.at(TokenKind::If)? {
                        vec![self.parse_stmt()?]
                    } else {
                        self.parse_block()?
                    }
                } else {
                    Vec::new()
                };
                Ok(Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    line,
                })
            }
            TokenKind::While => {
                self.bump()?;
                let line = tok.line;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body, line })
            }
            TokenKind::For => {
                self.bump()?;
                let line = tok.line;
                self.expect(TokenKind::LParen)?;
                let var = self.expect_id()?;
                self.expect(TokenKind::Assign)?;
                let start = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                let end = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::For {
                    var,
                    start,
                    end,
                    body,
                    line,
                })
            }
            TokenKind::Func => {
                self.bump()?;
                let line = tok.line;
                let name = self.expect_id()?;
                self.expect(TokenKind::LParen)?;
                let mut params = Vec::new();
                if !self.at(TokenKind::RParen)? {
                    params.push(self.expect_id()?);
                    while self.at(TokenKind::Comma)? {
                        self.bump()?;
                        params.push(self.expect_id()?);
                    }
                }
                self.expect(TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::FuncDecl {
                    name,
                    params,
                    body,
                    line,
                })
            }
            TokenKind::Return => {
                self.bump()?;
                let line = tok.line;
                let value = if self.at(TokenKind::Semi)? {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(value, line))
            }
            TokenKind::Try => {
                self.bump()?;
                let line = tok.line;
                let body = self.parse_block()?;
                self.expect(TokenKind::Catch)?;
                let catch_body = self.parse_block()?;
                Ok(Stmt::Try {
                    body,
                    catch_body,
                    line,
                })
            }
            TokenKind::Throw => {
                self.bump()?;
                let line = tok.line;
                let e = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Throw(e, line))
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Id => {
                // Disambiguate `name := expr;` from an expression statement
                // by peeking one token further is not possible with a
                // single-token lookahead buffer, so we parse an expression
                // first and special-case a trailing `:=`.
                let line = tok.line;
                let name_text = tok.text.to_string();
                self.bump()?;
                if self.at(TokenKind::Assign)? {
                    self.bump()?;
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::Semi)?;
                    Ok(Stmt::Assign {
                        name: Id::new(name_text),
                        value,
                        line,
                    })
                } else {
                    let e = self.parse_postfix_from_id(name_text, line)?;
                    let e = self.parse_binary_rest(e, 0)?;
                    self.expect(TokenKind::Semi)?;
                    Ok(Stmt::ExprStmt(e, line))
                }
            }
            _ => Err(ParseError(format!(
                "unexpected token {} at line {}",
                tok.kind, tok.line
            ))),
        }
    }

    // ---- expressions ----
    //
    // Binding power, loosest to tightest: equality, relational, additive,
    // multiplicative, unary, postfix, primary.

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_unary_entry()?;
        self.parse_binary_rest(lhs, 0)
    }

    fn parse_unary_entry(&mut self) -> Result<Expr, ParseError> {
        self.parse_unary()
    }

    fn binop_power(kind: TokenKind) -> Option<(BinOp, u8)> {
        use TokenKind::*;
        Some(match kind {
            Eq => (BinOp::Eq, 1),
            Neq => (BinOp::Neq, 1),
            Lt => (BinOp::Lt, 2),
            Gt => (BinOp::Gt, 2),
            Lte => (BinOp::Lte, 2),
            Gte => (BinOp::Gte, 2),
            Plus => (BinOp::Add, 3),
            Minus => (BinOp::Sub, 3),
            Mul => (BinOp::Mul, 4),
            Div => (BinOp::Div, 4),
            Mod => (BinOp::Mod, 4),
            _ => return None,
        })
    }

    fn parse_binary_rest(&mut self, mut lhs: Expr, min_power: u8) -> Result<Expr, ParseError> {
        loop {
            let Some(tok) = self.peek()? else { break };
            let Some((op, power)) = Self::binop_power(tok.kind) else {
                break;
            };
            if power < min_power {
                break;
            }
            self.bump()?;
            let line = tok.line;
            let mut rhs = self.parse_unary()?;
            loop {
                let Some(next) = self.peek()? else { break };
                match Self::binop_power(next.kind) {
                    Some((_, next_power)) if next_power > power => {
                        rhs = self.parse_binary_rest(rhs, power + 1)?;
                    }
                    _ => break,
                }
            }
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let tok = self
            .peek()?
            .ok_or_else(|| ParseError("expected expression, found end of input".into()))?;
        match tok.kind {
            TokenKind::Minus => {
                self.bump()?;
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    expr: Box::new(expr),
                    line: tok.line,
                })
            }
            TokenKind::Not => {
                self.bump()?;
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    expr: Box::new(expr),
                    line: tok.line,
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self
            .peek()?
            .ok_or_else(|| ParseError("expected expression, found end of input".into()))?;
        match tok.kind {
            TokenKind::Int => {
                self.bump()?;
                let v: i64 = tok
                    .text
                    .parse()
                    .map_err(|_| ParseError(format!("malformed integer literal {:?}", tok.text)))?;
                Ok(Expr::Int(v))
            }
            TokenKind::Float => {
                self.bump()?;
                let v: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| ParseError(format!("malformed float literal {:?}", tok.text)))?;
                Ok(Expr::Float(v))
            }
            TokenKind::Str => {
                self.bump()?;
                let inner = &tok.text[1..tok.text.len() - 1];
                Ok(Expr::Str(inner.to_string()))
            }
            TokenKind::LParen => {
                self.bump()?;
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                self.parse_postfix(e, tok.line)
            }
            TokenKind::LBracket => {
                self.bump()?;
                let size = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::ArrayDecl {
                    size: Box::new(size),
                    line: tok.line,
                })
            }
            TokenKind::Id => {
                let name_text = tok.text.to_string();
                self.bump()?;
                self.parse_postfix_from_id(name_text, tok.line)
            }
            _ => Err(ParseError(format!(
                "unexpected token {} at line {}",
                tok.kind, tok.line
            ))),
        }
    }

    /// Handles what can follow a bare identifier: a call `f(...)`, an array
    /// index `a[i]`, a postfix increment/decrement, or a plain variable
    /// reference.
    fn parse_postfix_from_id(&mut self, name_text: String, line: Line) -> Result<Expr, ParseError> {
        let name = Id::new(name_text);
        if self.at(TokenKind::LParen)? {
            self.bump()?;
            let mut args = Vec::new();
            if !self.at(TokenKind::RParen)? {
                args.push(self.parse_expr()?);
                while self.at(TokenKind::Comma)? {
                    self.bump()?;
                    args.push(self.parse_expr()?);
                }
            }
            self.expect(TokenKind::RParen)?;
            let call = Expr::Call { name, args, line };
            self.parse_postfix(call, line)
        } else if self.at(TokenKind::LBracket)? {
            self.bump()?;
            let index = self.parse_expr()?;
            self.expect(TokenKind::RBracket)?;
            let access = Expr::ArrayAccess {
                name,
                index: Box::new(index),
                line,
            };
            self.parse_postfix(access, line)
        } else {
            self.parse_postfix(Expr::Var(name), line)
        }
    }

    fn parse_postfix(&mut self, e: Expr, line: Line) -> Result<Expr, ParseError> {
        if self.at(TokenKind::Inc)? {
            self.bump()?;
            Ok(Expr::Unary {
                op: UnOp::Inc,
                expr: Box::new(e),
                line,
            })
        } else if self.at(TokenKind::Dec)? {
            self.bump()?;
            Ok(Expr::Unary {
                op: UnOp::Dec,
                expr: Box::new(e),
                line,
            })
        } else {
            Ok(e)
        }
    }
}
