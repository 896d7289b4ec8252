use super::span::Span;
use serde::{Deserialize, Serialize};

/// A single token of cleaned C text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub kind: TokenKind,
    /// Position in the original text
    pub span: Span,
}

impl Token {
    /// Creates a new token with the given properties
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }

    /// True if this is the identifier or keyword `word`
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Identifier(w) if w == word)
    }

    /// True if this is the punctuation character `c`
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    /// Identifier text, if any
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(w) => Some(w),
            _ => None,
        }
    }
}

/// Token types the structural parser distinguishes
///
/// C keywords are plain identifiers here; the parser decides by text.
/// Multi-character operators arrive as consecutive [`TokenKind::Punct`]
/// tokens, since expressions are re-read from their source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Identifier or keyword
    Identifier(String),
    /// Numeric literal, raw text including suffixes
    Number(String),
    /// String literal (contents already blanked)
    StringLiteral,
    /// Character literal (contents already blanked)
    CharLiteral,
    /// `#define NAME[(params)] body`, continuation lines included
    Define {
        /// Macro name
        name: String,
        /// Parameter names of a function-like macro
        params: Option<Vec<String>>,
        /// Replacement text, trimmed, continuations joined
        body: String,
    },
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `;`
    Semicolon,
    /// Any other single punctuation character
    Punct(char),
    /// End of file
    Eof,
}
