//! Per-file pipeline: clean, filter, parse

use super::ast::{FileId, Structure};
use super::c_parser::CParser;
use crate::config::MacroConfig;
use crate::error::{Diagnostic, Diagnostics, Error, Location, Result};
use crate::lexer::{clean, CScanner, Comment, LineMap};
use crate::preprocessor::{filter, ConditionalRegion};
use serde::Serialize;
use std::path::Path;

/// Raw input: a file name and its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Name used in diagnostics
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        SourceFile {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Read a file from disk; the path becomes the name
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| Error::io(&name, &e))?;
        let text = String::from_utf8(bytes).map_err(|e| {
            let offset = e.utf8_error().valid_up_to();
            tracing::warn!(file = %name, offset, "file is not valid UTF-8");
            Error::IoError {
                path: name.clone(),
                message: format!("invalid UTF-8 at byte {}", offset),
            }
        })?;
        Ok(SourceFile { name, text })
    }
}

/// The four text variants of one file, all the same length
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceText {
    pub original: String,
    /// Comments and literal contents blanked
    pub stripped: String,
    /// Inactive conditional branches blanked too
    pub filtered: String,
    /// Every directive except `#define` blanked too
    pub cleaned: String,
}

/// Everything known about one file before linking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFile {
    pub id: FileId,
    pub name: String,
    #[serde(skip)]
    pub text: SourceText,
    #[serde(skip)]
    pub line_map: LineMap,
    /// Comments in retained text, in source order
    pub comments: Vec<Comment>,
    /// Per comment: attached to a declaration
    pub attached: Vec<bool>,
    pub structures: Vec<Structure>,
    /// Decided conditional branches
    pub regions: Vec<ConditionalRegion>,
    /// Lexical, preprocessor and structural defects of this file
    pub diagnostics: Diagnostics,
}

impl ParsedFile {
    /// Location of an offset in this file
    pub fn locate(&self, offset: usize) -> Location {
        self.line_map.locate(&self.name, offset)
    }

    /// First top-level structure declaring `name`
    pub fn structure(&self, name: &str) -> Option<&Structure> {
        self.structures.iter().find(|s| s.name() == Some(name))
    }

    /// Comments no declaration claimed
    pub fn unattached_comments(&self) -> impl Iterator<Item = &Comment> {
        self.comments
            .iter()
            .zip(&self.attached)
            .filter(|(_, attached)| !**attached)
            .map(|(comment, _)| comment)
    }
}

/// Run cleaning, conditional filtering and structural parsing on one file
pub fn parse_file(id: FileId, source: &SourceFile, macros: &MacroConfig) -> ParsedFile {
    let line_map = LineMap::new(&source.text);
    let mut diagnostics = Diagnostics::new();
    let report = |errors: Vec<(Error, usize)>, diagnostics: &mut Diagnostics| {
        for (error, offset) in errors {
            diagnostics.push(Diagnostic::at(error, line_map.locate(&source.name, offset)));
        }
    };

    let stripped = clean(&source.text);
    report(stripped.errors, &mut diagnostics);

    let filtered = filter(&stripped.text, macros);
    report(filtered.errors.clone(), &mut diagnostics);

    // Comments inside blanked branches go with them
    let comments: Vec<Comment> = stripped
        .comments
        .into_iter()
        .filter(|c| filtered.is_retained(c.span.start))
        .collect();

    let tokens = CScanner::new(&filtered.cleaned).scan_tokens();
    let output = CParser::new(tokens, &filtered.cleaned, &comments, id).parse();
    report(output.errors, &mut diagnostics);

    tracing::debug!(
        file = %source.name,
        structures = output.structures.len(),
        comments = comments.len(),
        conditionals = filtered.regions.len(),
        defects = diagnostics.len(),
        "parsed file"
    );

    ParsedFile {
        id,
        name: source.name.clone(),
        text: SourceText {
            original: source.text.clone(),
            stripped: stripped.text,
            filtered: filtered.filtered,
            cleaned: filtered.cleaned,
        },
        line_map,
        comments,
        attached: output.attached,
        structures: output.structures,
        regions: filtered.regions,
        diagnostics,
    }
}
