use super::span::Span;
use super::token::{Token, TokenKind};

/// Scanner for cleaned, preprocessor-filtered C text
///
/// Comments and literal contents are already blanked, so the scanner only
/// has to split identifiers, numbers and punctuation. `#define` lines
/// become single [`TokenKind::Define`] tokens; any other directive line
/// still present is skipped.
pub struct CScanner<'a> {
    /// Source text, offset-aligned with the original
    source: &'a str,
    bytes: &'a [u8],
    /// Accumulated tokens
    tokens: Vec<Token>,
    /// Start position of current token
    start: usize,
    /// Current position in source
    current: usize,
    /// Only whitespace seen since the last newline
    at_line_start: bool,
}

impl<'a> CScanner<'a> {
    /// Creates a new scanner over cleaned text
    pub fn new(source: &'a str) -> Self {
        CScanner {
            source,
            bytes: source.as_bytes(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            at_line_start: true,
        }
    }

    /// Scans all tokens; the last token is always [`TokenKind::Eof`]
    pub fn scan_tokens(mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }
        let end = self.bytes.len();
        self.tokens
            .push(Token::new(TokenKind::Eof, Span::new(end, end)));
        self.tokens
    }

    fn scan_token(&mut self) {
        let c = self.advance();
        let line_start = self.at_line_start;
        self.at_line_start = false;

        match c {
            b'\n' => self.at_line_start = true,
            b' ' | b'\t' | b'\r' | 0x0b | 0x0c => self.at_line_start = line_start,
            // Stray continuation outside a directive
            b'\\' => self.at_line_start = line_start,

            b'#' if line_start => self.scan_directive(),

            b'{' => self.add_token(TokenKind::LeftBrace),
            b'}' => self.add_token(TokenKind::RightBrace),
            b';' => self.add_token(TokenKind::Semicolon),
            b'"' => self.scan_quoted(b'"', TokenKind::StringLiteral),
            b'\'' => self.scan_quoted(b'\'', TokenKind::CharLiteral),

            c if c.is_ascii_digit() => self.scan_number(),
            b'.' if self.peek().map_or(false, |n| n.is_ascii_digit()) => self.scan_number(),
            c if is_ident_start(c) => self.scan_identifier(),

            c if c.is_ascii() => self.add_token(TokenKind::Punct(c as char)),
            // Non-ASCII outside comments: skip the rest of the UTF-8 sequence
            _ => {
                while self.peek().map_or(false, |b| (b & 0xC0) == 0x80) {
                    self.advance();
                }
            }
        }
    }

    fn scan_directive(&mut self) {
        self.skip_blanks();
        let word_start = self.current;
        while self.peek().map_or(false, is_ident_char) {
            self.advance();
        }
        let word = &self.source[word_start..self.current];

        if word != "define" {
            self.skip_logical_line();
            self.at_line_start = true;
            return;
        }

        self.skip_blanks();
        let name_start = self.current;
        while self.peek().map_or(false, is_ident_char) {
            self.advance();
        }
        let name = self.source[name_start..self.current].to_string();
        if name.is_empty() {
            self.skip_logical_line();
            self.at_line_start = true;
            return;
        }

        // Function-like only when `(` follows the name immediately
        let params = if self.peek() == Some(b'(') {
            self.advance();
            let params_start = self.current;
            while let Some(c) = self.peek() {
                if c == b')' || c == b'\n' {
                    break;
                }
                self.advance();
            }
            let list = self.source[params_start..self.current]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if self.peek() == Some(b')') {
                self.advance();
            }
            Some(list)
        } else {
            None
        };

        let body_start = self.current;
        self.skip_logical_line();
        let body = self.source[body_start..self.current]
            .replace("\\\r\n", " ")
            .replace("\\\n", " ")
            .trim()
            .to_string();

        self.add_token(TokenKind::Define { name, params, body });
        self.at_line_start = true;
    }

    /// Advance to (not past) the newline ending the logical line
    fn skip_logical_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                let mut back = self.current;
                while back > 0 && matches!(self.bytes[back - 1], b' ' | b'\t' | b'\r') {
                    back -= 1;
                }
                if back > 0 && self.bytes[back - 1] == b'\\' {
                    self.advance();
                    continue;
                }
                break;
            }
            self.advance();
        }
    }

    fn scan_quoted(&mut self, quote: u8, kind: TokenKind) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.advance();
            if c == quote {
                break;
            }
        }
        self.add_token(kind);
    }

    fn scan_number(&mut self) {
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == b'.' || c == b'_')
        {
            self.advance();
        }
        let text = self.source[self.start..self.current].to_string();
        self.add_token(TokenKind::Number(text));
    }

    fn scan_identifier(&mut self) {
        while self.peek().map_or(false, is_ident_char) {
            self.advance();
        }
        let text = self.source[self.start..self.current].to_string();
        self.add_token(TokenKind::Identifier(text));
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.current).copied()
    }

    fn add_token(&mut self, kind: TokenKind) {
        self.tokens
            .push(Token::new(kind, Span::new(self.start, self.current)));
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        CScanner::new(source)
            .scan_tokens()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_struct_tokens() {
        let tokens = CScanner::new("struct A { uint8_t x[4]; };").scan_tokens();
        for token in &tokens {
            println!("{:?}", token);
        }
        assert_eq!(tokens.len(), 12);
        assert!(tokens[0].is_word("struct"));
        assert_eq!(tokens[2].kind, TokenKind::LeftBrace);
        assert!(tokens[5].is_punct('['));
        assert_eq!(tokens[6].kind, TokenKind::Number("4".to_string()));
        assert_eq!(tokens[6].span, Span::new(21, 22));
        assert_eq!(tokens[11].kind, TokenKind::Eof);
    }

    #[test]
    fn test_define_with_continuation() {
        let toks = kinds("#define MAX (4 + \\\n  2)\nint x;");
        assert_eq!(
            toks[0],
            TokenKind::Define {
                name: "MAX".to_string(),
                params: None,
                body: "(4 +    2)".to_string(),
            }
        );
        assert_eq!(toks[1], TokenKind::Identifier("int".to_string()));
    }

    #[test]
    fn test_function_like_define_and_other_directives() {
        let toks = kinds("  #  define SQ(a, b) ((a)*(b))\n#include <x.h>\n#pragma pack(1)\n;");
        assert_eq!(
            toks[0],
            TokenKind::Define {
                name: "SQ".to_string(),
                params: Some(vec!["a".to_string(), "b".to_string()]),
                body: "((a)*(b))".to_string(),
            }
        );
        assert_eq!(toks[1], TokenKind::Semicolon);
    }

    #[test]
    fn test_hash_mid_line_is_punct() {
        let toks = kinds("a # b");
        assert_eq!(toks[1], TokenKind::Punct('#'));
    }
}
