//! Harvested comments and their tag:value metadata

use super::json5;
use super::span::Span;
use crate::error::Error;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

lazy_static::lazy_static! {
    /// `key: value` line inside a comment
    static ref TAG_LINE: Regex = Regex::new(r"^@?([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*)$").unwrap();
}

/// Tag→value entries of one or more comments
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, Value>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First present key among `keys`
    pub fn get_any(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.0.get(*k))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// String form of a scalar entry; numbers and booleans are rendered
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text)
    }

    /// [`Tags::text`] over the first present key
    pub fn text_any(&self, keys: &[&str]) -> Option<String> {
        self.get_any(keys).and_then(value_text)
    }

    /// Integer entry; accepts numbers and decimal or `0x` strings
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(value_int)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness: `true`, a non-zero number, or `"true"`/`"yes"`
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map_or(false, |v| v != 0.0),
            Some(Value::String(s)) => matches!(s.trim(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    /// Overlay `other`; its keys win
    pub fn merge(&mut self, other: &Tags) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Tags {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Tags(iter.into_iter().collect())
    }
}

/// Render a scalar JSON value as text
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer form of a JSON value
pub fn value_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// One source comment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    /// Position in the original text, delimiters included
    pub span: Span,
    /// Text including delimiters
    pub raw: String,
    /// Parsed metadata
    pub entries: Tags,
    /// Free text that is not metadata
    pub description: Option<String>,
}

impl Comment {
    /// Parse the raw text of a comment found at `span`
    ///
    /// A malformed `/*{ ... }*/` block yields the comment with no entries
    /// plus the error describing why.
    pub fn parse(raw: &str, span: Span) -> (Comment, Option<Error>) {
        let body = strip_delimiters(raw);
        let trimmed = body.trim();
        let mut comment = Comment {
            span,
            raw: raw.to_string(),
            entries: Tags::new(),
            description: None,
        };

        if trimmed.starts_with('{') {
            return match json5::parse_value(trimmed) {
                Ok(Value::Object(map)) => {
                    comment.entries = map.into_iter().collect();
                    (comment, None)
                }
                Ok(_) => (comment, Some(Error::lex("metadata block is not an object"))),
                Err(e) => (
                    comment,
                    Some(Error::lex(format!("invalid metadata block: {}", e.message()))),
                ),
            };
        }

        let mut free_text = Vec::new();
        for line in body.lines() {
            let line = line
                .trim()
                .trim_start_matches(|c| c == '*' || c == '/' || c == '!' || c == '<')
                .trim();
            if line.is_empty() {
                continue;
            }
            match TAG_LINE.captures(line) {
                Some(caps) => {
                    let rest = caps[2].trim();
                    let value = json5::parse_value(rest)
                        .unwrap_or_else(|_| Value::String(rest.to_string()));
                    comment.entries.insert(&caps[1], value);
                }
                None => free_text.push(line.to_string()),
            }
        }
        if !free_text.is_empty() {
            comment.description = Some(free_text.join(" "));
        }
        (comment, None)
    }
}

fn strip_delimiters(raw: &str) -> &str {
    if let Some(inner) = raw.strip_prefix("/*") {
        inner.strip_suffix("*/").unwrap_or(inner)
    } else if let Some(inner) = raw.strip_prefix("//") {
        inner
    } else {
        raw
    }
}
