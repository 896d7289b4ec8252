//! Error types and defect records for MIB extraction
//!
//! Two layers live here. [`Error`] is the thiserror enum every stage speaks;
//! fatal conditions (an unreadable file, a bad configuration) travel through
//! `Result`. Everything else is a *defect*: it is wrapped in a [`Diagnostic`]
//! that remembers where it happened and pushed onto a [`Diagnostics`]
//! accumulator, while processing carries on with the unaffected siblings.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// MIB extraction errors
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum Error {
    /// Malformed comment, string or character literal
    ///
    /// **Triggered by:** `/* never closed`, a string running to end of line,
    /// a `/*{ ... }*/` metadata block that is not valid JSON5
    #[error("Lexical error: {message}")]
    LexError {
        /// Error description
        message: String,
    },

    /// Conditional compilation problem
    ///
    /// **Triggered by:** an `#if` referencing a macro absent from the
    /// configuration, an `#endif` with no opening conditional
    #[error("Preprocessor error: {message}")]
    PreprocessorError {
        /// Error description
        message: String,
    },

    /// A declaration could not be parsed
    #[error("Structural error: {message}")]
    StructuralError {
        /// Error description
        message: String,
    },

    /// Cross-file resolution failed
    ///
    /// **Triggered by:** two incompatible definitions of one name, a
    /// reference to a type nobody defines, a struct containing itself
    #[error("Link error: {message}")]
    LinkError {
        /// Error description
        message: String,
    },

    /// A field could not be mapped onto the packet model
    #[error("Mapping error: {message}")]
    MappingError {
        /// Error description
        message: String,
    },

    /// Calibration or verification metadata could not be applied
    #[error("Calibration error: {message}")]
    CalibrationError {
        /// Error description
        message: String,
    },

    /// Source file could not be read
    #[error("Cannot read {path}: {message}")]
    IoError {
        /// Path as given by the caller
        path: String,
        /// Operating system message
        message: String,
    },

    /// Invalid run configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Constant or verification expression failure
    #[error("Expression error: {0}")]
    ExpressionError(String),
}

/// Result type for extraction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorSeverity {
    /// The owning entity contributes nothing
    Fatal,
    /// The owning entity is kept in degraded form
    Recoverable,
    /// Informational; the result is complete
    Warning,
}

/// Defect taxonomy used to filter diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DefectKind {
    /// See [`Error::LexError`]
    Lex,
    /// See [`Error::PreprocessorError`]
    Preprocessor,
    /// See [`Error::StructuralError`]
    Structural,
    /// See [`Error::LinkError`]
    Link,
    /// See [`Error::MappingError`]
    Mapping,
    /// See [`Error::CalibrationError`]
    Calibration,
    /// See [`Error::IoError`]
    Io,
    /// See [`Error::ConfigError`] and [`Error::ExpressionError`]
    Config,
}

impl Error {
    /// Create a lexical error
    pub fn lex(message: impl Into<String>) -> Self {
        Error::LexError {
            message: message.into(),
        }
    }

    /// Create a preprocessor error
    pub fn preprocessor(message: impl Into<String>) -> Self {
        Error::PreprocessorError {
            message: message.into(),
        }
    }

    /// Create a structural error
    pub fn structural(message: impl Into<String>) -> Self {
        Error::StructuralError {
            message: message.into(),
        }
    }

    /// Create a link error
    pub fn link(message: impl Into<String>) -> Self {
        Error::LinkError {
            message: message.into(),
        }
    }

    /// Create a mapping error
    pub fn mapping(message: impl Into<String>) -> Self {
        Error::MappingError {
            message: message.into(),
        }
    }

    /// Create a calibration error
    pub fn calibration(message: impl Into<String>) -> Self {
        Error::CalibrationError {
            message: message.into(),
        }
    }

    /// Create an I/O error for `path`
    pub fn io(path: impl Into<String>, source: &std::io::Error) -> Self {
        Error::IoError {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::IoError { .. } => ErrorSeverity::Fatal,
            Error::ConfigError(_) => ErrorSeverity::Fatal,

            Error::LexError { .. } => ErrorSeverity::Recoverable,
            Error::PreprocessorError { .. } => ErrorSeverity::Recoverable,
            Error::StructuralError { .. } => ErrorSeverity::Recoverable,
            Error::LinkError { .. } => ErrorSeverity::Recoverable,
            Error::MappingError { .. } => ErrorSeverity::Recoverable,
            Error::CalibrationError { .. } => ErrorSeverity::Recoverable,
            Error::ExpressionError(_) => ErrorSeverity::Recoverable,
        }
    }

    /// Defect kind this error belongs to
    pub fn kind(&self) -> DefectKind {
        match self {
            Error::LexError { .. } => DefectKind::Lex,
            Error::PreprocessorError { .. } => DefectKind::Preprocessor,
            Error::StructuralError { .. } => DefectKind::Structural,
            Error::LinkError { .. } => DefectKind::Link,
            Error::MappingError { .. } => DefectKind::Mapping,
            Error::CalibrationError { .. } => DefectKind::Calibration,
            Error::IoError { .. } => DefectKind::Io,
            Error::ConfigError(_) | Error::ExpressionError(_) => DefectKind::Config,
        }
    }

    /// Message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            Error::LexError { message }
            | Error::PreprocessorError { message }
            | Error::StructuralError { message }
            | Error::LinkError { message }
            | Error::MappingError { message }
            | Error::CalibrationError { message } => message.clone(),
            Error::IoError { path, message } => format!("{}: {}", path, message),
            Error::ConfigError(message) | Error::ExpressionError(message) => message.clone(),
        }
    }
}

/// A position in one source file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Location {
    /// File name as given to the extractor
    pub file: String,
    /// Byte offset into the original text
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One recorded defect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// What went wrong
    pub error: Error,
    /// How bad it is
    pub severity: ErrorSeverity,
    /// Where it happened, when the defect has a source position
    pub location: Option<Location>,
    /// Other positions involved (the kept definition of a link conflict)
    pub related: Vec<Location>,
}

impl Diagnostic {
    /// Diagnostic without a source position
    pub fn new(error: Error) -> Self {
        let severity = error.classify();
        Diagnostic {
            error,
            severity,
            location: None,
            related: Vec::new(),
        }
    }

    /// Diagnostic at `location`
    pub fn at(error: Error, location: Location) -> Self {
        Diagnostic {
            location: Some(location),
            ..Diagnostic::new(error)
        }
    }

    /// Attach a secondary location
    pub fn with_related(mut self, location: Location) -> Self {
        self.related.push(location);
        self
    }

    /// Downgrade to a warning
    pub fn warning(mut self) -> Self {
        self.severity = ErrorSeverity::Warning;
        self
    }

    pub fn kind(&self) -> DefectKind {
        self.error.kind()
    }

    pub fn file(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.file.as_str())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
        write!(f, "{}", self.error)?;
        for related in &self.related {
            write!(f, " (see {})", related)?;
        }
        Ok(())
    }
}

/// Ordered defect accumulator
///
/// Every stage appends to one of these instead of returning early. The
/// final list travels with the (possibly partial) extraction result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(
            kind = ?diagnostic.kind(),
            severity = ?diagnostic.severity,
            "{}",
            diagnostic
        );
        self.entries.push(diagnostic);
    }

    /// Record `error` at an optional location
    pub fn report(&mut self, error: Error, location: Option<Location>) {
        let diagnostic = match location {
            Some(location) => Diagnostic::at(error, location),
            None => Diagnostic::new(error),
        };
        self.push(diagnostic);
    }

    /// Append another accumulator, keeping order
    pub fn merge(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    /// True if anything above warning severity was recorded
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity != ErrorSeverity::Warning)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.entries.iter()
    }

    /// Diagnostics of one kind, in recording order
    pub fn of_kind(&self, kind: DefectKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind() == kind)
    }

    /// Number of diagnostics of one kind
    pub fn count(&self, kind: DefectKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        for diagnostic in iter {
            self.push(diagnostic);
        }
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
