//! Lexical cleaner and comment harvester
//!
//! Produces the comment-stripped text variant: comment bodies and the
//! contents of string/character literals are overwritten with spaces (line
//! breaks kept) so every retained byte keeps its absolute offset. The
//! removed comments are returned with their parsed metadata.

use super::comment::Comment;
use super::span::Span;
use crate::error::Error;

/// Output of [`clean`]
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedSource {
    /// Same length as the input; comments and literal contents blanked
    pub text: String,
    /// Comments in source order
    pub comments: Vec<Comment>,
    /// Lexical defects with the offset they start at
    pub errors: Vec<(Error, usize)>,
}

/// Strip comments and literal contents from `source`
pub fn clean(source: &str) -> CleanedSource {
    let mut cleaner = Cleaner::new(source);
    cleaner.run();
    CleanedSource {
        text: cleaner.finish_text(),
        comments: cleaner.comments,
        errors: cleaner.errors,
    }
}

struct Cleaner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    out: Vec<u8>,
    current: usize,
    comments: Vec<Comment>,
    errors: Vec<(Error, usize)>,
}

impl<'a> Cleaner<'a> {
    fn new(source: &'a str) -> Self {
        Cleaner {
            source,
            bytes: source.as_bytes(),
            out: source.as_bytes().to_vec(),
            current: 0,
            comments: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(&mut self) {
        while !self.is_at_end() {
            let start = self.current;
            match self.advance() {
                b'/' if self.peek() == Some(b'*') => self.block_comment(start),
                b'/' if self.peek() == Some(b'/') => self.line_comment(start),
                b'"' => self.literal(start, b'"', "string"),
                b'\'' => self.literal(start, b'\'', "character"),
                _ => {}
            }
        }
    }

    fn block_comment(&mut self, start: usize) {
        self.advance();
        let end = match self.source[self.current..].find("*/") {
            Some(rel) => self.current + rel + 2,
            None => {
                self.errors
                    .push((Error::lex("unterminated block comment"), start));
                self.bytes.len()
            }
        };
        self.current = end;
        self.harvest(start, end);
    }

    fn line_comment(&mut self, start: usize) {
        // A backslash before the newline continues the comment
        while let Some(c) = self.peek() {
            if c == b'\n' && self.bytes[self.current - 1] != b'\\' {
                break;
            }
            self.advance();
        }
        self.harvest(start, self.current);
    }

    fn literal(&mut self, start: usize, quote: u8, what: &str) {
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    self.errors.push((
                        Error::lex(format!("unterminated {} literal", what)),
                        start,
                    ));
                    self.blank(start + 1, self.current);
                    return;
                }
                Some(b'\\') => {
                    self.advance();
                    if self.peek().is_some() {
                        self.advance();
                    }
                }
                Some(c) if c == quote => {
                    self.blank(start + 1, self.current);
                    self.advance();
                    return;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn harvest(&mut self, start: usize, end: usize) {
        let (comment, error) = Comment::parse(&self.source[start..end], Span::new(start, end));
        if let Some(error) = error {
            self.errors.push((error, start));
        }
        self.comments.push(comment);
        self.blank(start, end);
    }

    fn blank(&mut self, start: usize, end: usize) {
        for byte in &mut self.out[start..end] {
            if *byte != b'\n' {
                *byte = b' ';
            }
        }
    }

    fn finish_text(&mut self) -> String {
        let out = std::mem::take(&mut self.out);
        // Blanked regions always start and end on ASCII delimiters
        String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
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
}
