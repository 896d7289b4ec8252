use super::expr::{self, EvalError, Resolver};
use crate::config::{MacroConfig, MacroValue};
use crate::error::Error;
use crate::lexer::Span;
use regex::Regex;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

lazy_static::lazy_static! {
    /// A directive line, continuation lines included
    static ref DIRECTIVE: Regex =
        Regex::new(r"(?s)^[ \t]*#[ \t]*([A-Za-z_][A-Za-z0-9_]*)(.*)$").unwrap();
    /// Name (and function-like marker) at the start of a `#define`
    static ref DEFINE_HEAD: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\()?").unwrap();
}

/// How a conditional branch was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    /// Condition held; branch retained
    Taken,
    /// Condition failed or an earlier sibling was taken; branch blanked
    Skipped,
    /// Condition could not be decided; branch retained (fail-open)
    Unresolved,
    /// Nested inside a blanked branch; never evaluated
    Inactive,
}

impl Decision {
    /// True if the branch text survives filtering
    pub fn retained(&self) -> bool {
        matches!(self, Decision::Taken | Decision::Unresolved)
    }
}

/// One branch of a conditional
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionalRegion {
    /// `if`, `ifdef`, `ifndef`, `elif` or `else`
    pub directive: String,
    /// Condition text as written
    pub condition: String,
    /// The directive line
    pub line: Span,
    /// Branch contents, up to the next sibling directive
    pub body: Span,
    pub decision: Decision,
}

/// Output of [`filter`]
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutput {
    /// Inactive branches and conditional directive lines blanked
    pub filtered: String,
    /// `filtered` with every non-`#define` directive line blanked too
    pub cleaned: String,
    /// Every conditional branch in source order
    pub regions: Vec<ConditionalRegion>,
    /// Preprocessor defects with the offset they start at
    pub errors: Vec<(Error, usize)>,
}

impl FilterOutput {
    /// True if the byte at `offset` survived filtering
    pub fn is_retained(&self, offset: usize) -> bool {
        !self
            .regions
            .iter()
            .any(|r| !r.decision.retained() && r.body.contains(offset))
    }
}

/// Resolve conditional compilation in comment-stripped text
///
/// Branches whose condition is false are overwritten with spaces, line
/// breaks kept. Conditions over names the configuration does not mention
/// fail open: the `#if` branch is kept, its siblings dropped, and the
/// decision recorded as [`Decision::Unresolved`] with a defect.
pub fn filter(code: &str, macros: &MacroConfig) -> FilterOutput {
    let directives = directive_lines(code);
    let unterminated = unterminated_conditionals(&directives);
    let env = MacroEnv::new(macros);

    let mut out = code.as_bytes().to_vec();
    let mut cleaned_blanks = Vec::new();
    let mut regions: Vec<ConditionalRegion> = Vec::new();
    let mut errors = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut cursor = 0;

    for (index, directive) in directives.iter().enumerate() {
        let active = stack.last().map_or(true, |f| f.branch_active);
        if !active {
            blank(&mut out, cursor, directive.span.start);
        }
        cursor = directive.span.end;
        let offset = directive.span.start;

        match directive.name.as_str() {
            "if" | "ifdef" | "ifndef" => {
                blank(&mut out, directive.span.start, directive.span.end);
                let open_ended = unterminated.contains(&index);
                let (decision, branch_active) = if !active {
                    (Decision::Inactive, false)
                } else if open_ended {
                    errors.push((
                        Error::preprocessor(format!(
                            "#{} {} is never closed; text kept to end of file",
                            directive.name, directive.rest
                        )),
                        offset,
                    ));
                    (Decision::Unresolved, true)
                } else {
                    let guard = directive.name == "ifndef"
                        && is_include_guard(code, directive, directives.get(index + 1));
                    let outcome = if guard {
                        Ok(true)
                    } else {
                        env.decide(&directive.name, &directive.rest)
                    };
                    outcome_to_decision(outcome, directive, &mut errors)
                };
                regions.push(region(directive, code.len(), decision));
                stack.push(Frame {
                    parent_active: active,
                    branch_active,
                    taken: branch_active,
                    seen_else: false,
                    open_ended,
                    region: regions.len() - 1,
                });
            }
            "elif" | "else" => {
                blank(&mut out, directive.span.start, directive.span.end);
                let Some(frame) = stack.last_mut() else {
                    errors.push((
                        Error::preprocessor(format!("#{} without matching #if", directive.name)),
                        offset,
                    ));
                    continue;
                };
                regions[frame.region].body.end = directive.span.start;
                if frame.seen_else {
                    errors.push((
                        Error::preprocessor(format!("#{} after #else", directive.name)),
                        offset,
                    ));
                }

                let (decision, branch_active) = if !frame.parent_active {
                    (Decision::Inactive, false)
                } else if frame.open_ended {
                    (Decision::Unresolved, true)
                } else if frame.taken || frame.seen_else {
                    (Decision::Skipped, false)
                } else if directive.name == "else" {
                    (Decision::Taken, true)
                } else {
                    outcome_to_decision(env.decide("if", &directive.rest), directive, &mut errors)
                };

                if directive.name == "else" {
                    frame.seen_else = true;
                }
                frame.taken |= branch_active;
                frame.branch_active = branch_active;
                regions.push(region(directive, code.len(), decision));
                frame.region = regions.len() - 1;
            }
            "endif" => {
                blank(&mut out, directive.span.start, directive.span.end);
                match stack.pop() {
                    Some(frame) => regions[frame.region].body.end = directive.span.start,
                    None => errors.push((
                        Error::preprocessor("#endif without matching #if"),
                        offset,
                    )),
                }
            }
            "define" if active => env.define(&directive.rest),
            "undef" if active => {
                env.undefine(directive.rest.trim());
                cleaned_blanks.push(directive.span);
            }
            _ if active => cleaned_blanks.push(directive.span),
            _ => blank(&mut out, directive.span.start, directive.span.end),
        }
    }

    if !stack.last().map_or(true, |f| f.branch_active) {
        blank(&mut out, cursor, code.len());
    }

    let filtered = into_string(out.clone());
    for span in cleaned_blanks {
        blank(&mut out, span.start, span.end);
    }
    let cleaned = into_string(out);

    tracing::debug!(
        conditionals = regions.len(),
        defects = errors.len(),
        "preprocessor filter"
    );

    FilterOutput {
        filtered,
        cleaned,
        regions,
        errors,
    }
}

struct Frame {
    parent_active: bool,
    branch_active: bool,
    taken: bool,
    seen_else: bool,
    open_ended: bool,
    region: usize,
}

#[derive(Debug)]
struct DirectiveLine {
    /// Logical line without its final newline
    span: Span,
    name: String,
    /// Everything after the directive name, continuations joined
    rest: String,
}

fn directive_lines(code: &str) -> Vec<DirectiveLine> {
    let bytes = code.as_bytes();
    let mut lines = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let mut end = line_end(bytes, pos);
        while end < bytes.len() && continues(bytes, pos, end) {
            end = line_end(bytes, end + 1);
        }
        if let Some(caps) = DIRECTIVE.captures(&code[pos..end]) {
            lines.push(DirectiveLine {
                span: Span::new(pos, end),
                name: caps[1].to_string(),
                rest: caps[2]
                    .replace("\\\r\n", " ")
                    .replace("\\\n", " ")
                    .trim()
                    .to_string(),
            });
        }
        pos = end + 1;
    }
    lines
}

fn line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |rel| from + rel)
}

/// True if the physical line `[start, end)` ends in a continuation backslash
fn continues(bytes: &[u8], start: usize, end: usize) -> bool {
    let mut back = end;
    while back > start && matches!(bytes[back - 1], b' ' | b'\t' | b'\r') {
        back -= 1;
    }
    back > start && bytes[back - 1] == b'\\'
}

fn unterminated_conditionals(directives: &[DirectiveLine]) -> BTreeSet<usize> {
    let mut open = Vec::new();
    for (index, directive) in directives.iter().enumerate() {
        match directive.name.as_str() {
            "if" | "ifdef" | "ifndef" => open.push(index),
            "endif" => {
                open.pop();
            }
            _ => {}
        }
    }
    open.into_iter().collect()
}

/// `#ifndef X` directly followed by `#define X`
fn is_include_guard(code: &str, directive: &DirectiveLine, next: Option<&DirectiveLine>) -> bool {
    let Some(next) = next else {
        return false;
    };
    let name = directive.rest.trim();
    next.name == "define"
        && DEFINE_HEAD
            .captures(&next.rest)
            .map_or(false, |caps| &caps[1] == name)
        && code[directive.span.end..next.span.start].trim().is_empty()
}

fn outcome_to_decision(
    outcome: Result<bool, String>,
    directive: &DirectiveLine,
    errors: &mut Vec<(Error, usize)>,
) -> (Decision, bool) {
    match outcome {
        Ok(true) => (Decision::Taken, true),
        Ok(false) => (Decision::Skipped, false),
        Err(reason) => {
            errors.push((
                Error::preprocessor(format!(
                    "cannot decide #{} {}: {}; branch kept",
                    directive.name, directive.rest, reason
                )),
                directive.span.start,
            ));
            (Decision::Unresolved, true)
        }
    }
}

fn region(directive: &DirectiveLine, len: usize, decision: Decision) -> ConditionalRegion {
    ConditionalRegion {
        directive: directive.name.clone(),
        condition: directive.rest.clone(),
        line: directive.span,
        body: Span::new(directive.span.end, len),
        decision,
    }
}

fn blank(out: &mut [u8], start: usize, end: usize) {
    for byte in &mut out[start..end] {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

fn into_string(bytes: Vec<u8>) -> String {
    // Blanked ranges start and end at line boundaries
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[derive(Debug, Clone)]
struct LocalMacro {
    body: String,
    function_like: bool,
}

/// Configured macros overlaid with the file's own `#define`/`#undef`
struct MacroEnv<'a> {
    config: &'a MacroConfig,
    /// `None` marks a local `#undef`
    local: RefCell<BTreeMap<String, Option<LocalMacro>>>,
    expanding: RefCell<Vec<String>>,
}

impl<'a> MacroEnv<'a> {
    fn new(config: &'a MacroConfig) -> Self {
        MacroEnv {
            config,
            local: RefCell::new(BTreeMap::new()),
            expanding: RefCell::new(Vec::new()),
        }
    }

    fn define(&self, rest: &str) {
        let Some(caps) = DEFINE_HEAD.captures(rest) else {
            return;
        };
        let name = caps[1].to_string();
        if self.config.get(&name).is_some() {
            return;
        }
        let function_like = caps.get(2).is_some();
        let after = &rest[caps[0].len()..];
        let body = if function_like {
            after.split_once(')').map_or("", |(_, b)| b)
        } else {
            after
        };
        self.local.borrow_mut().insert(
            name,
            Some(LocalMacro {
                body: body.trim().to_string(),
                function_like,
            }),
        );
    }

    fn undefine(&self, name: &str) {
        if self.config.get(name).is_none() {
            self.local.borrow_mut().insert(name.to_string(), None);
        }
    }

    /// Truth value of `#if`/`#ifdef`/`#ifndef`; `Err` explains why undecidable
    fn decide(&self, directive: &str, rest: &str) -> Result<bool, String> {
        match directive {
            "ifdef" | "ifndef" => {
                let name = rest.split_whitespace().next().unwrap_or("");
                let defined = self
                    .is_defined(name)
                    .ok_or_else(|| format!("macro `{}` is not configured", name))?;
                Ok(if directive == "ifdef" { defined } else { !defined })
            }
            _ => match expr::evaluate(rest, self) {
                Ok(value) => Ok(value != 0),
                Err(EvalError::Unresolved(name)) => {
                    Err(format!("macro `{}` is not configured", name))
                }
                Err(e) => Err(e.to_string()),
            },
        }
    }

    fn expand(&self, name: &str, body: &str) -> Result<i64, EvalError> {
        if self.expanding.borrow().iter().any(|n| n == name) {
            return Err(EvalError::Syntax(format!("macro `{}` expands to itself", name)));
        }
        self.expanding.borrow_mut().push(name.to_string());
        let result = expr::evaluate(body, self);
        self.expanding.borrow_mut().pop();
        result
    }
}

impl Resolver for MacroEnv<'_> {
    fn value(&self, name: &str) -> Result<i64, EvalError> {
        match self.config.get(name) {
            Some(MacroValue::Undefined) => return Ok(0),
            Some(MacroValue::Defined) => return Ok(1),
            Some(MacroValue::Value(v)) => return Ok(*v),
            Some(MacroValue::Text(text)) => return self.expand(name, text),
            None => {}
        }
        let local = self.local.borrow().get(name).cloned();
        match local {
            Some(Some(m)) if m.function_like => Err(EvalError::Syntax(format!(
                "function-like macro `{}` in condition",
                name
            ))),
            Some(Some(m)) if m.body.is_empty() => Err(EvalError::Syntax(format!(
                "macro `{}` expands to nothing",
                name
            ))),
            Some(Some(m)) => self.expand(name, &m.body),
            Some(None) => Ok(0),
            None => Err(EvalError::Unresolved(name.to_string())),
        }
    }

    fn is_defined(&self, name: &str) -> Option<bool> {
        match self.config.get(name) {
            Some(MacroValue::Undefined) => Some(false),
            Some(_) => Some(true),
            None => self.local.borrow().get(name).map(|m| m.is_some()),
        }
    }
}
