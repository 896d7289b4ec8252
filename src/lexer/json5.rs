//! Lenient JSON5 reader for comment metadata
//!
//! Flight-software comments carry metadata such as
//! `/*{ cal_def: "TEMP", num_cal: [[0, -40.0], [4095, 85.0],], }*/`.
//! That is JSON5 rather than JSON: unquoted keys, single-quoted strings,
//! hex numbers and trailing commas all occur. Only values are produced;
//! there is no serializer.

use crate::error::{Error, Result};
use serde_json::{Map, Number, Value};

/// Parse `text` as exactly one JSON5 value (surrounding whitespace allowed)
pub fn parse_value(text: &str) -> Result<Value> {
    let mut reader = Reader::new(text);
    reader.skip_whitespace();
    let value = reader.value()?;
    reader.skip_whitespace();
    if !reader.is_at_end() {
        return Err(reader.error("trailing characters after value"));
    }
    Ok(value)
}

struct Reader {
    source: Vec<char>,
    current: usize,
}

impl Reader {
    fn new(text: &str) -> Self {
        Reader {
            source: text.chars().collect(),
            current: 0,
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek() {
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') | Some('\'') => Ok(Value::String(self.string()?)),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => {
                let word = self.identifier();
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => Err(self.error(&format!("unexpected identifier `{}`", word))),
                }
            }
            Some(c) => Err(self.error(&format!("unexpected character `{}`", c))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn object(&mut self) -> Result<Value> {
        self.advance();
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.advance();
                    return Ok(Value::Object(map));
                }
                None => return Err(self.error("unterminated object")),
                _ => {}
            }

            let key = match self.peek() {
                Some('"') | Some('\'') => self.string()?,
                Some(c) if is_ident_start(c) => self.identifier(),
                Some(c) if c.is_ascii_digit() => self.identifier(),
                _ => return Err(self.error("expected object key")),
            };

            self.skip_whitespace();
            if !self.match_char(':') {
                return Err(self.error(&format!("expected `:` after key `{}`", key)));
            }
            self.skip_whitespace();
            let value = self.value()?;
            map.insert(key, value);

            self.skip_whitespace();
            if !self.match_char(',') && self.peek() != Some('}') {
                return Err(self.error("expected `,` or `}` in object"));
            }
        }
    }

    fn array(&mut self) -> Result<Value> {
        self.advance();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') => {
                    self.advance();
                    return Ok(Value::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }
            items.push(self.value()?);
            self.skip_whitespace();
            if !self.match_char(',') && self.peek() != Some(']') {
                return Err(self.error("expected `,` or `]` in array"));
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.advance();
        let mut out = String::new();
        loop {
            match self.advance_opt() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.advance_opt() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.advance_opt()).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| self.error("invalid unicode escape"))?;
                        out.push(code);
                    }
                    Some('\n') => {}
                    Some(other) => out.push(other),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.current;
        let negative = match self.peek() {
            Some('-') => {
                self.advance();
                true
            }
            Some('+') => {
                self.advance();
                false
            }
            _ => false,
        };

        if self.peek() == Some('0') && matches!(self.peek_next(), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let digits_start = self.current;
            while self.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits: String = self.source[digits_start..self.current].iter().collect();
            let magnitude = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("invalid hex number"))?;
            return Ok(Value::from(if negative { -magnitude } else { magnitude }));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' || c == 'e' || c == 'E' {
                is_float = true;
                self.advance();
                if (c == 'e' || c == 'E') && matches!(self.peek(), Some('-') | Some('+')) {
                    self.advance();
                }
            } else {
                break;
            }
        }

        let text: String = self.source[start..self.current].iter().collect();
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Value::from(n));
            }
        }
        text.trim_start_matches('+')
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error(&format!("invalid number `{}`", text)))
    }

    fn identifier(&mut self) -> String {
        let start = self.current;
        while self
            .peek()
            .map_or(false, |c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.advance();
        }
        self.source[start..self.current].iter().collect()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn advance_opt(&mut self) -> Option<char> {
        if self.is_at_end() {
            None
        } else {
            Some(self.advance())
        }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.current + 1).copied()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::lex(format!("{} at character {}", message, self.current))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}
