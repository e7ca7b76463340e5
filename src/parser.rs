// src/parser.rs
use serde_json::Value;

use crate::errors::ParseError;

/// Character cursor shared by the query and template parsers.
pub struct Parser<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Parser<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { s, i: 0 }
    }

    /// Starts reading `s` at byte offset `i`.
    pub fn at(s: &'a str, i: usize) -> Self {
        Self { s, i }
    }

    pub fn offset(&self) -> usize {
        self.i
    }

    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::InvalidSyntax {
            message: message.into(),
            offset: self.i,
        }
    }

    pub fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.take_while_nonempty(|c| c == '_' || c.is_ascii_alphanumeric(), "identifier expected")
    }

    /// A bare key inside a query path; looser than an identifier so `$` and
    /// dashed names can be addressed without quoting.
    pub fn parse_key(&mut self) -> Result<String, ParseError> {
        self.take_while_nonempty(is_key_char, "key expected")
    }

    fn take_while_nonempty(
        &mut self,
        pred: impl Fn(char) -> bool,
        expected: &str,
    ) -> Result<String, ParseError> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if pred(c) {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(self.error(expected));
        }
        Ok(self.s[start..self.i].to_string())
    }

    pub fn parse_index(&mut self) -> Result<usize, ParseError> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.i += 1;
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(self.error("expected index"));
        }
        self.s[start..self.i]
            .parse::<usize>()
            .map_err(|_| self.error("bad index"))
    }

    /// Unsigned number literal; a leading minus is a unary operator in
    /// expressions and is handled by the caller.
    pub fn parse_number_literal(&mut self) -> Result<Value, ParseError> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.i += 1;
            } else {
                break;
            }
        }
        let is_float = self.peek_char() == Some('.')
            && self.s[self.i + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit());
        if is_float {
            self.i += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.i += 1;
                } else {
                    break;
                }
            }
        }
        let s = &self.s[start..self.i];
        if s.is_empty() {
            return Err(self.error("number expected"));
        }
        if is_float {
            let f: f64 = s.parse().map_err(|_| self.error("bad float"))?;
            Ok(Value::from(f))
        } else {
            let i: i64 = s.parse().map_err(|_| self.error("bad int"))?;
            Ok(Value::from(i))
        }
    }

    pub fn parse_quoted_string(&mut self) -> Result<String, ParseError> {
        let quote = self.peek_char().ok_or_else(|| self.error("string expected"))?;
        if quote != '\'' && quote != '"' {
            return Err(self.error("expected quoted string"));
        }
        self.i += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                if let Some(nc) = self.peek_char() {
                    self.i += nc.len_utf8();
                    match nc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        _ => {
                            out.push('\\');
                            out.push(nc);
                        }
                    }
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        Err(self.error("unterminated string"))
    }

    pub fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    pub fn expect_str(&mut self, lit: &str) -> Result<(), ParseError> {
        if self.consume_str(lit) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{lit}'")))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn consume_str(&mut self, lit: &str) -> bool {
        if self.peek_str(lit) {
            self.i += lit.len();
            true
        } else {
            false
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    pub fn peek_str(&self, lit: &str) -> bool {
        self.s[self.i..].starts_with(lit)
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }
}

pub fn is_key_char(c: char) -> bool {
    c == '_' || c == '$' || c == '-' || c.is_ascii_alphanumeric()
}
