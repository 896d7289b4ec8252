//! Byte spans and the offset→(line, column) table
//!
//! Every text variant produced by the cleaner and the preprocessor is
//! offset-aligned with the original, so one [`LineMap`] built from the
//! original text serves all later stages.

use crate::error::Location;
use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` into the original text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// First byte
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if `offset` falls inside the span
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// True if `other` lies entirely inside this span
    pub fn encloses(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest span covering both
    pub fn join(&self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Line start table for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMap {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineMap {
    /// Build the table from the original text
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        LineMap {
            line_starts,
            len: text.len(),
        }
    }

    /// 1-based (line, column) of a byte offset; offsets past the end clamp
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        (line + 1, offset - self.line_starts[line] + 1)
    }

    /// 1-based line of a byte offset
    pub fn line(&self, offset: usize) -> usize {
        self.line_col(offset).0
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Diagnostic location of `offset` in `file`
    pub fn locate(&self, file: &str, offset: usize) -> Location {
        let (line, column) = self.line_col(offset);
        Location {
            file: file.to_string(),
            offset,
            line,
            column,
        }
    }
}
