use std::iter::Peekable;
use std::str::CharIndices;

use audience_core::{AudienceError, AudienceResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token's first character.
    pub offset: usize,
}

pub fn tokenize(input: &str) -> AudienceResult<Vec<Token>> {
    Lexer {
        input,
        chars: input.char_indices().peekable(),
    }
    .run()
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> AudienceResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            let kind = match c {
                '0'..='9' => self.number(offset)?,
                c if c.is_alphabetic() || c == '_' => self.word(offset),
                '`' => TokenKind::Ident(self.quoted(offset, '`')?),
                '\'' | '"' => TokenKind::Str(self.quoted(offset, c)?),
                _ => self.symbol(offset, c)?,
            };
            tokens.push(Token { kind, offset });
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            offset: self.input.len(),
        });
        Ok(tokens)
    }

    fn number(&mut self, start: usize) -> AudienceResult<TokenKind> {
        let mut end = start;
        let mut seen_dot = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || (c == '.' && !seen_dot) || c == '_' {
                seen_dot |= c == '.';
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text: String = self.input[start..end].chars().filter(|c| *c != '_').collect();
        if seen_dot {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| syntax(start, format!("invalid number '{text}'")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| syntax(start, format!("integer '{text}' out of range")))
        }
    }

    fn word(&mut self, start: usize) -> TokenKind {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let word = &self.input[start..end];
        match word.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" | "none" => TokenKind::Null,
            _ => TokenKind::Ident(word.to_string()),
        }
    }

    /// Quoted string or backtick identifier. Backslash escapes the next char.
    fn quoted(&mut self, start: usize, quote: char) -> AudienceResult<String> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                Some((_, c)) if c == quote => return Ok(out),
                Some((_, c)) => out.push(c),
                None => break,
            }
        }
        Err(syntax(start, format!("unterminated {quote}-quoted text")))
    }

    fn symbol(&mut self, offset: usize, c: char) -> AudienceResult<TokenKind> {
        self.chars.next();
        let next = self.chars.peek().map(|&(_, n)| n);
        let (kind, consume_next) = match (c, next) {
            ('=', Some('=')) => (TokenKind::Eq, true),
            ('=', _) => (TokenKind::Eq, false),
            ('!', Some('=')) => (TokenKind::Ne, true),
            ('!', _) => (TokenKind::Not, false),
            ('<', Some('=')) => (TokenKind::Le, true),
            ('<', Some('>')) => (TokenKind::Ne, true),
            ('<', _) => (TokenKind::Lt, false),
            ('>', Some('=')) => (TokenKind::Ge, true),
            ('>', _) => (TokenKind::Gt, false),
            ('&', Some('&')) => (TokenKind::And, true),
            ('|', Some('|')) => (TokenKind::Or, true),
            ('-', _) => (TokenKind::Minus, false),
            ('(', _) => (TokenKind::LParen, false),
            (')', _) => (TokenKind::RParen, false),
            ('[', _) => (TokenKind::LBracket, false),
            (']', _) => (TokenKind::RBracket, false),
            (',', _) => (TokenKind::Comma, false),
            _ => return Err(syntax(offset, format!("unexpected character '{c}'"))),
        };
        if consume_next {
            self.chars.next();
        }
        Ok(kind)
    }
}

pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> AudienceError {
    AudienceError::ExpressionSyntax {
        offset,
        message: message.into(),
    }
}
