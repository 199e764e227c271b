//! Recursive descent parser with Pratt expression parsing for Brio.
//!
//! Errors accumulate on the parser so one pass can report several
//! problems; after an error the parser synchronizes to the next statement
//! boundary and continues. Callers must refuse to execute a program when
//! any error was recorded.

use brio_core::ast::*;
use brio_core::tokens::{Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected token {found} at line {line}, col {col}; expected {expected}")]
    Unexpected {
        found: String,
        expected: String,
        line: usize,
        col: usize,
    },
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("{message} at line {line}, col {col}")]
    Lex {
        message: String,
        line: usize,
        col: usize,
    },
    #[error("invalid assignment target at line {line}, col {col}")]
    InvalidAssignTarget { line: usize, col: usize },
    #[error("'try' needs at least one catch clause or a finally block at line {line}, col {col}")]
    BareTry { line: usize, col: usize },
    #[error("duplicate 'default' clause in switch at line {line}, col {col}")]
    DuplicateDefault { line: usize, col: usize },
}

/// Maximum number of parse errors to collect before giving up.
/// Prevents cascading error spam from a single root cause.
const MAX_PARSE_ERRORS: usize = 10;

/// Operator binding strength, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Equality,
    Relational,
    Additive,
    Multiplicative,
    Prefix,
    Call,
    Index,
}

fn precedence_of(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::OrOr => Precedence::Or,
        TokenKind::AndAnd => Precedence::And,
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equality,
        TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq => {
            Precedence::Relational
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Additive,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Multiplicative,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket | TokenKind::Dot => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

fn infix_op(kind: &TokenKind) -> Option<InfixOp> {
    let op = match kind {
        TokenKind::Plus => InfixOp::Add,
        TokenKind::Minus => InfixOp::Sub,
        TokenKind::Star => InfixOp::Mul,
        TokenKind::Slash => InfixOp::Div,
        TokenKind::Percent => InfixOp::Mod,
        TokenKind::Eq => InfixOp::Eq,
        TokenKind::NotEq => InfixOp::NotEq,
        TokenKind::Lt => InfixOp::Lt,
        TokenKind::Gt => InfixOp::Gt,
        TokenKind::LtEq => InfixOp::LtEq,
        TokenKind::GtEq => InfixOp::GtEq,
        TokenKind::AndAnd => InfixOp::And,
        TokenKind::OrOr => InfixOp::Or,
        _ => return None,
    };
    Some(op)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with Eof"))
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek2_kind(&self) -> &TokenKind {
        match self.tokens.get(self.pos + 1) {
            Some(t) => &t.kind,
            None => &TokenKind::Eof,
        }
    }

    fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> PResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> PResult<(String, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.advance();
                Ok((name, token.span))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        if matches!(token.kind, TokenKind::Eof) {
            return ParseError::UnexpectedEof;
        }
        if let TokenKind::Illegal(message) = &token.kind {
            return ParseError::Lex {
                message: message.clone(),
                line: token.span.line,
                col: token.span.col,
            };
        }
        ParseError::Unexpected {
            found: token.kind.to_string(),
            expected: expected.to_string(),
            line: token.span.line,
            col: token.span.col,
        }
    }

    fn record_error(&mut self, error: ParseError) -> bool {
        self.errors.push(error);
        self.errors.len() >= MAX_PARSE_ERRORS
    }

    /// Skip tokens until a statement boundary so one mistake does not
    /// cascade into a wall of follow-on errors.
    fn synchronize(&mut self) {
        while !self.at_end() {
            if self.peek_kind().is_terminator() {
                self.advance();
                return;
            }
            match self.peek_kind() {
                TokenKind::RBrace
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Switch
                | TokenKind::Try
                | TokenKind::Throw
                | TokenKind::Class
                | TokenKind::Import
                | TokenKind::Export => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn skip_terminators(&mut self) {
        while self.peek_kind().is_terminator() {
            self.advance();
        }
    }

    /// Consume a newline only when the token after it continues the
    /// in-progress expression (method chaining `.` or a binary operator).
    fn skip_continuation_newline(&mut self) {
        if matches!(self.peek_kind(), TokenKind::Newline) && self.peek2_kind().continues_expression()
        {
            self.advance();
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let start = self.peek().span;
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            if self.at_end() || self.errors.len() >= MAX_PARSE_ERRORS {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => {
                    statements.push(stmt);
                    if let Err(err) = self.expect_statement_end() {
                        if self.record_error(err) {
                            break;
                        }
                        self.synchronize();
                    }
                }
                Err(err) => {
                    if self.record_error(err) {
                        break;
                    }
                    self.synchronize();
                }
            }
        }
        let end = self.peek().span;
        Program {
            statements,
            span: start.merge(end),
        }
    }

    fn expect_statement_end(&mut self) -> PResult<()> {
        match self.peek_kind() {
            k if k.is_terminator() => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof | TokenKind::RBrace => Ok(()),
            _ => Err(self.unexpected("newline or ';'")),
        }
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        match self.peek_kind() {
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => Ok(Stmt::Break(self.advance().span)),
            TokenKind::Continue => Ok(Stmt::Continue(self.advance().span)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Throw => self.parse_throw(),
            TokenKind::Class => self.parse_class(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Export => self.parse_export(),
            _ => self.parse_expression_or_assignment(),
        }
    }

    /// Parse an expression; if it is followed by `=`, reinterpret it as an
    /// assignment target (identifier, instance variable, or index).
    fn parse_expression_or_assignment(&mut self) -> PResult<Stmt> {
        let expr = self.parse_expression(Precedence::Lowest)?;
        if !matches!(self.peek_kind(), TokenKind::Assign) {
            return Ok(Stmt::Expr(expr));
        }
        let assign = self.advance();
        let value = self.parse_expression(Precedence::Lowest)?;
        let span = expr.span().merge(value.span());
        match expr {
            Expr::Ident(name, _) => Ok(Stmt::Assign {
                target: AssignTarget::Name(name),
                value,
                span,
            }),
            Expr::InstanceVar(name, _) => Ok(Stmt::Assign {
                target: AssignTarget::InstanceVar(name),
                value,
                span,
            }),
            Expr::Index(object, index, _) => Ok(Stmt::IndexAssign {
                object: *object,
                index: *index,
                value,
                span,
            }),
            _ => Err(ParseError::InvalidAssignTarget {
                line: assign.span.line,
                col: assign.span.col,
            }),
        }
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        let value = if self.peek_kind().is_terminator()
            || matches!(self.peek_kind(), TokenKind::RBrace | TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expression(Precedence::Lowest)?)
        };
        let span = match &value {
            Some(v) => token.span.merge(v.span()),
            None => token.span,
        };
        Ok(Stmt::Return { value, span })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let open = self.expect(&TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            if matches!(self.peek_kind(), TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                return Err(ParseError::UnexpectedEof);
            }
            let stmt = self.parse_statement()?;
            statements.push(stmt);
            match self.peek_kind() {
                k if k.is_terminator() => {
                    self.advance();
                }
                TokenKind::RBrace => break,
                _ => return Err(self.unexpected("newline, ';', or '}'")),
            }
        }
        let close = self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Block {
            statements,
            span: open.span.merge(close.span),
        })
    }

    /// Look past any newline for a keyword chaining onto a closing brace
    /// (`else`, `catch`, `finally`); consume the newline only on a match.
    fn chained_keyword(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            return true;
        }
        if matches!(self.peek_kind(), TokenKind::Newline) && self.peek2_kind() == kind {
            self.advance();
            self.advance();
            return true;
        }
        false
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'if'")?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::RParen, "')'")?;
        let consequence = self.parse_block()?;
        let mut span = token.span.merge(consequence.span);
        let alternative = if self.chained_keyword(&TokenKind::Else) {
            if matches!(self.peek_kind(), TokenKind::If) {
                // `else if` nests as an alternative holding a single if.
                let nested = self.parse_if()?;
                let nested_span = nested.span();
                span = span.merge(nested_span);
                Some(Block {
                    statements: vec![nested],
                    span: nested_span,
                })
            } else {
                let block = self.parse_block()?;
                span = span.merge(block.span);
                Some(block)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            consequence,
            alternative,
            span,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'while'")?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        let span = token.span.merge(body.span);
        Ok(Stmt::While {
            condition,
            body,
            span,
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'for'")?;
        let init = if matches!(self.peek_kind(), TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_expression_or_assignment()?))
        };
        self.expect(&TokenKind::Semicolon, "';' after for-loop initializer")?;
        let condition = if matches!(self.peek_kind(), TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression(Precedence::Lowest)?)
        };
        self.expect(&TokenKind::Semicolon, "';' after for-loop condition")?;
        let update = if matches!(self.peek_kind(), TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_expression_or_assignment()?))
        };
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        let span = token.span.merge(body.span);
        Ok(Stmt::For {
            init,
            condition,
            update,
            body,
            span,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'switch'")?;
        let subject = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut cases = Vec::new();
        let mut default: Option<Block> = None;
        loop {
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::Case => {
                    let case_token = self.advance();
                    let mut values = vec![self.parse_expression(Precedence::Lowest)?];
                    while matches!(self.peek_kind(), TokenKind::Comma) {
                        self.advance();
                        values.push(self.parse_expression(Precedence::Lowest)?);
                    }
                    self.expect(&TokenKind::Colon, "':' after case values")?;
                    let body = self.parse_case_body()?;
                    let span = case_token.span.merge(body.span);
                    cases.push(SwitchCase { values, body, span });
                }
                TokenKind::Default => {
                    let default_token = self.advance();
                    if default.is_some() {
                        return Err(ParseError::DuplicateDefault {
                            line: default_token.span.line,
                            col: default_token.span.col,
                        });
                    }
                    self.expect(&TokenKind::Colon, "':' after 'default'")?;
                    default = Some(self.parse_case_body()?);
                }
                TokenKind::RBrace => break,
                _ => return Err(self.unexpected("'case', 'default', or '}'")),
            }
        }
        let close = self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Switch {
            subject,
            cases,
            default,
            span: token.span.merge(close.span),
        })
    }

    /// A case body is either a brace block or a bare statement list
    /// running to the next `case`/`default`/`}`.
    fn parse_case_body(&mut self) -> PResult<Block> {
        self.skip_terminators();
        if matches!(self.peek_kind(), TokenKind::LBrace) {
            return self.parse_block();
        }
        let start = self.peek().span;
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            if matches!(
                self.peek_kind(),
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace
            ) || self.at_end()
            {
                break;
            }
            statements.push(self.parse_statement()?);
            match self.peek_kind() {
                k if k.is_terminator() => {
                    self.advance();
                }
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace => break,
                _ => return Err(self.unexpected("newline, 'case', 'default', or '}'")),
            }
        }
        let end = self.peek().span;
        Ok(Block {
            statements,
            span: start.merge(end),
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        let body = self.parse_block()?;
        let mut catches = Vec::new();
        let mut span = token.span.merge(body.span);
        while self.chained_keyword(&TokenKind::Catch) {
            let open = self.expect(&TokenKind::LParen, "'(' after 'catch'")?;
            let (first, _) = self.expect_ident("exception kind or binding name")?;
            let (kind, name) = match self.peek_kind().clone() {
                TokenKind::Ident(second) => {
                    self.advance();
                    (Some(first), second)
                }
                _ => (None, first),
            };
            self.expect(&TokenKind::RParen, "')'")?;
            let block = self.parse_block()?;
            span = span.merge(block.span);
            catches.push(CatchClause {
                kind,
                name,
                body: block,
                span: open.span,
            });
        }
        let finally = if self.chained_keyword(&TokenKind::Finally) {
            let block = self.parse_block()?;
            span = span.merge(block.span);
            Some(block)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(ParseError::BareTry {
                line: token.span.line,
                col: token.span.col,
            });
        }
        Ok(Stmt::Try {
            body,
            catches,
            finally,
            span,
        })
    }

    fn parse_throw(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        let value = self.parse_expression(Precedence::Lowest)?;
        let span = token.span.merge(value.span());
        Ok(Stmt::Throw { value, span })
    }

    fn parse_class(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        let (name, _) = self.expect_ident("class name")?;
        let superclass = if matches!(self.peek_kind(), TokenKind::Lt) {
            self.advance();
            let (sup, _) = self.expect_ident("superclass name")?;
            Some(sup)
        } else {
            None
        };
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut methods = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::RBrace => break,
                TokenKind::Fn => {
                    let fn_token = self.advance();
                    let (method_name, _) = self.expect_ident("method name")?;
                    let params = self.parse_params()?;
                    let body = self.parse_block()?;
                    let span = fn_token.span.merge(body.span);
                    methods.push(MethodDef {
                        name: method_name,
                        params,
                        body,
                        span,
                    });
                }
                _ => return Err(self.unexpected("method declaration or '}'")),
            }
        }
        let close = self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Class {
            name,
            superclass,
            methods,
            span: token.span.merge(close.span),
        })
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        self.expect(&TokenKind::LBrace, "'{' after 'import'")?;
        let mut items = Vec::new();
        loop {
            let (name, _) = self.expect_ident("import name")?;
            let alias = if matches!(self.peek_kind(), TokenKind::As) {
                self.advance();
                let (alias, _) = self.expect_ident("alias name")?;
                Some(alias)
            } else {
                None
            };
            items.push(ImportItem { name, alias });
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBrace => break,
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        self.expect(&TokenKind::From, "'from'")?;
        let path_token = self.advance();
        let path = match path_token.kind {
            TokenKind::StringLit(path) => path,
            _ => {
                return Err(ParseError::Unexpected {
                    found: path_token.kind.to_string(),
                    expected: "module path string".to_string(),
                    line: path_token.span.line,
                    col: path_token.span.col,
                })
            }
        };
        Ok(Stmt::Import {
            items,
            path,
            span: token.span.merge(path_token.span),
        })
    }

    fn parse_export(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        let (name, name_span) = self.expect_ident("export name")?;
        let (value, span) = if matches!(self.peek_kind(), TokenKind::Assign) {
            self.advance();
            let value = self.parse_expression(Precedence::Lowest)?;
            let span = token.span.merge(value.span());
            (Some(value), span)
        } else {
            (None, token.span.merge(name_span))
        };
        Ok(Stmt::Export { name, value, span })
    }

    fn parse_params(&mut self) -> PResult<Vec<String>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if matches!(self.peek_kind(), TokenKind::RParen) {
            self.advance();
            return Ok(params);
        }
        loop {
            let (name, _) = self.expect_ident("parameter name")?;
            params.push(name);
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
        Ok(params)
    }

    // ── Expressions ──

    fn parse_expression(&mut self, min: Precedence) -> PResult<Expr> {
        let mut left = self.parse_prefix()?;
        loop {
            self.skip_continuation_newline();
            let precedence = precedence_of(self.peek_kind());
            if precedence <= min {
                break;
            }
            left = match self.peek_kind() {
                TokenKind::LParen => self.parse_call(left)?,
                TokenKind::LBracket => self.parse_index(left)?,
                TokenKind::Dot => self.parse_property(left)?,
                _ => self.parse_infix(left, precedence)?,
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> PResult<Expr> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.advance();
                Ok(Expr::Ident(name, token.span))
            }
            TokenKind::InstanceVar(name) => {
                let token = self.advance();
                Ok(Expr::InstanceVar(name, token.span))
            }
            TokenKind::IntLit(n) => {
                let token = self.advance();
                Ok(Expr::IntLit(n, token.span))
            }
            TokenKind::FloatLit(x) => {
                let token = self.advance();
                Ok(Expr::FloatLit(x, token.span))
            }
            TokenKind::StringLit(s) => {
                let token = self.advance();
                Ok(Expr::StringLit(s, token.span))
            }
            TokenKind::True => Ok(Expr::BoolLit(true, self.advance().span)),
            TokenKind::False => Ok(Expr::BoolLit(false, self.advance().span)),
            TokenKind::Null => Ok(Expr::NullLit(self.advance().span)),
            TokenKind::Minus => {
                let token = self.advance();
                let operand = self.parse_expression(Precedence::Prefix)?;
                let span = token.span.merge(operand.span());
                Ok(Expr::Prefix(PrefixOp::Neg, Box::new(operand), span))
            }
            TokenKind::Bang => {
                let token = self.advance();
                let operand = self.parse_expression(Precedence::Prefix)?;
                let span = token.span.merge(operand.span());
                Ok(Expr::Prefix(PrefixOp::Not, Box::new(operand), span))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LBrace => self.parse_hash(),
            TokenKind::Fn => self.parse_fn_literal(),
            TokenKind::Super => {
                let token = self.advance();
                let args = self.parse_args()?;
                Ok(Expr::Super(args, token.span))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_array(&mut self) -> PResult<Expr> {
        let open = self.advance();
        let mut items = Vec::new();
        self.skip_terminators();
        if matches!(self.peek_kind(), TokenKind::RBracket) {
            let close = self.advance();
            return Ok(Expr::Array(items, open.span.merge(close.span)));
        }
        loop {
            self.skip_terminators();
            items.push(self.parse_expression(Precedence::Lowest)?);
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBracket => break,
                _ => return Err(self.unexpected("',' or ']'")),
            }
        }
        self.skip_terminators();
        let close = self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::Array(items, open.span.merge(close.span)))
    }

    fn parse_hash(&mut self) -> PResult<Expr> {
        let open = self.advance();
        let mut pairs = Vec::new();
        self.skip_terminators();
        if matches!(self.peek_kind(), TokenKind::RBrace) {
            let close = self.advance();
            return Ok(Expr::Hash(pairs, open.span.merge(close.span)));
        }
        loop {
            self.skip_terminators();
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(&TokenKind::Colon, "':' between key and value")?;
            self.skip_terminators();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBrace => break,
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
        self.skip_terminators();
        let close = self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::Hash(pairs, open.span.merge(close.span)))
    }

    fn parse_fn_literal(&mut self) -> PResult<Expr> {
        let token = self.advance();
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        let span = token.span.merge(body.span);
        Ok(Expr::FnLit(params, body, span))
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        self.skip_terminators();
        if matches!(self.peek_kind(), TokenKind::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            self.skip_terminators();
            args.push(self.parse_expression(Precedence::Lowest)?);
            self.skip_terminators();
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
        Ok(args)
    }

    fn parse_call(&mut self, callee: Expr) -> PResult<Expr> {
        let args = self.parse_args()?;
        let span = callee.span().merge(self.peek().span);
        // `Cls.new(args)` is object construction, not a method call.
        if let Expr::Property(object, name, _) = &callee {
            if name == "new" {
                return Ok(Expr::New(object.clone(), args, span));
            }
        }
        Ok(Expr::Call(Box::new(callee), args, span))
    }

    fn parse_index(&mut self, object: Expr) -> PResult<Expr> {
        self.advance(); // '['
        let index = self.parse_expression(Precedence::Lowest)?;
        let close = self.expect(&TokenKind::RBracket, "']'")?;
        let span = object.span().merge(close.span);
        Ok(Expr::Index(Box::new(object), Box::new(index), span))
    }

    fn parse_property(&mut self, object: Expr) -> PResult<Expr> {
        self.advance(); // '.'
        let (name, name_span) = self.expect_ident("property name")?;
        let span = object.span().merge(name_span);
        Ok(Expr::Property(Box::new(object), name, span))
    }

    fn parse_infix(&mut self, left: Expr, precedence: Precedence) -> PResult<Expr> {
        let op_token = self.advance();
        let op = infix_op(&op_token.kind).ok_or_else(|| self.unexpected("a binary operator"))?;
        let right = self.parse_expression(precedence)?;
        let span = left.span().merge(right.span());
        Ok(Expr::Infix(Box::new(left), op, Box::new(right), span))
    }
}
