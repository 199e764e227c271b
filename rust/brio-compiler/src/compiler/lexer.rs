//! Hand-written lexer for Brio source code.
//!
//! Consumes the source character by character. Newlines are significant:
//! each run of newlines produces a single terminator token, which the
//! parser treats as a statement boundary or an expression continuation
//! depending on what follows. Bad input (unterminated strings, unknown
//! characters) becomes `Illegal` tokens so the parser can report them
//! with positions and keep going.

use brio_core::tokens::{Span, Token, TokenKind};

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    byte_offset: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            byte_offset: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span_from(&self, start_offset: usize, start_line: usize, start_col: usize) -> Span {
        Span::new(start_offset, self.byte_offset, start_line, start_col)
    }

    /// Lex the whole source. The result always ends with an `Eof` token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            let is_newline = token.kind == TokenKind::Newline;
            // Collapse consecutive newlines; drop leading ones entirely.
            if is_newline
                && tokens
                    .last()
                    .is_none_or(|t: &Token| t.kind == TokenKind::Newline)
            {
                continue;
            }
            tokens.push(token);
        }
        let eof_span = self.span_from(self.byte_offset, self.line, self.col);
        tokens.push(Token::new(TokenKind::Eof, eof_span));
        tokens
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_non_newline_whitespace_and_comments();
        let (so, sl, sc) = (self.byte_offset, self.line, self.col);
        let ch = self.current()?;

        let kind = match ch {
            '\n' => {
                self.advance();
                TokenKind::Newline
            }
            '0'..='9' => return Some(self.read_number(so, sl, sc)),
            '"' => return Some(self.read_string(so, sl, sc)),
            '@' => {
                self.advance();
                match self.current() {
                    Some(c) if is_ident_start(c) => {
                        let name = self.read_ident_text();
                        TokenKind::InstanceVar(name)
                    }
                    _ => TokenKind::Illegal("'@' without a following name".to_string()),
                }
            }
            c if is_ident_start(c) => {
                let text = self.read_ident_text();
                TokenKind::keyword(&text).unwrap_or(TokenKind::Ident(text))
            }
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),
            '=' => self.one_or_two('=', TokenKind::Assign, TokenKind::Eq),
            '!' => self.one_or_two('=', TokenKind::Bang, TokenKind::NotEq),
            '<' => self.one_or_two('=', TokenKind::Lt, TokenKind::LtEq),
            '>' => self.one_or_two('=', TokenKind::Gt, TokenKind::GtEq),
            '&' => {
                self.advance();
                if self.current() == Some('&') {
                    self.advance();
                    TokenKind::AndAnd
                } else {
                    TokenKind::Illegal("'&' is not an operator; did you mean '&&'?".to_string())
                }
            }
            '|' => {
                self.advance();
                if self.current() == Some('|') {
                    self.advance();
                    TokenKind::OrOr
                } else {
                    TokenKind::Illegal("'|' is not an operator; did you mean '||'?".to_string())
                }
            }
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            ',' => self.single(TokenKind::Comma),
            '.' => self.single(TokenKind::Dot),
            ':' => self.single(TokenKind::Colon),
            ';' => self.single(TokenKind::Semicolon),
            other => {
                self.advance();
                TokenKind::Illegal(format!("unexpected character '{}'", other))
            }
        };
        Some(Token::new(kind, self.span_from(so, sl, sc)))
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn one_or_two(&mut self, second: char, short: TokenKind, long: TokenKind) -> TokenKind {
        self.advance();
        if self.current() == Some(second) {
            self.advance();
            long
        } else {
            short
        }
    }

    fn skip_non_newline_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '#' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() && ch != '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_ident_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        // A trailing `?` is part of the name: `has_key?`, `matches?`.
        if self.current() == Some('?') {
            text.push('?');
            self.advance();
        }
        text
    }

    fn read_number(&mut self, so: usize, sl: usize, sc: usize) -> Token {
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.advance();
            while let Some(ch) = self.current() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let kind = if is_float {
            match text.parse::<f64>() {
                Ok(x) => TokenKind::FloatLit(x),
                Err(_) => TokenKind::Illegal(format!("invalid float literal '{}'", text)),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::IntLit(n),
                Err(_) => TokenKind::Illegal(format!("integer literal '{}' out of range", text)),
            }
        };
        Token::new(kind, self.span_from(so, sl, sc))
    }

    fn read_string(&mut self, so: usize, sl: usize, sc: usize) -> Token {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.current() {
                None | Some('\n') => {
                    let kind = TokenKind::Illegal("unterminated string".to_string());
                    return Token::new(kind, self.span_from(so, sl, sc));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some(other) => value.push(other),
                        None => {
                            let kind = TokenKind::Illegal("unterminated string".to_string());
                            return Token::new(kind, self.span_from(so, sl, sc));
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    value.push(ch);
                    self.advance();
                }
            }
        }
        Token::new(TokenKind::StringLit(value), self.span_from(so, sl, sc))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}
