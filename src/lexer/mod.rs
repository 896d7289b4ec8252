//! Lexical analysis for C headers
//!
//! Turns raw file text into the comment-stripped variant plus harvested
//! comments ([`cleaner`]), and cleaned text into tokens ([`CScanner`]).
//! Every stage keeps byte offsets aligned with the original text; a single
//! [`LineMap`] translates them for diagnostics.

mod cleaner;
mod comment;
pub mod json5;
mod scanner;
mod span;
mod token;

pub use cleaner::{clean, CleanedSource};
pub use comment::{value_int, value_text, Comment, Tags};
pub use scanner::CScanner;
pub use span::{LineMap, Span};
pub use token::{Token, TokenKind};
