//! Integer constant expressions
//!
//! Used for `#if`/`#elif` conditions and, after linking, for enum values,
//! array dimensions and bit-field widths. Parsing is recursive descent with
//! one function per C precedence level; evaluation is a separate pass so
//! `&&`, `||` and `?:` short-circuit around unresolved names.

use std::fmt;

/// Why an expression has no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// An identifier with no known value
    Unresolved(String),
    /// Malformed expression
    Syntax(String),
    /// Division or remainder by zero
    DivisionByZero,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Unresolved(name) => write!(f, "unresolved identifier `{}`", name),
            EvalError::Syntax(message) => write!(f, "{}", message),
            EvalError::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

impl From<EvalError> for crate::error::Error {
    fn from(error: EvalError) -> Self {
        crate::error::Error::ExpressionError(error.to_string())
    }
}

/// Name lookup for [`evaluate`]
pub trait Resolver {
    /// Value of an identifier
    fn value(&self, name: &str) -> Result<i64, EvalError>;

    /// Definedness for `defined NAME`; `None` means unknown
    fn is_defined(&self, name: &str) -> Option<bool>;
}

/// Resolver that knows no names
pub struct NoNames;

impl Resolver for NoNames {
    fn value(&self, name: &str) -> Result<i64, EvalError> {
        Err(EvalError::Unresolved(name.to_string()))
    }

    fn is_defined(&self, _name: &str) -> Option<bool> {
        None
    }
}

/// Parse and evaluate `text`
pub fn evaluate(text: &str, resolver: &dyn Resolver) -> Result<i64, EvalError> {
    parse(text)?.eval(resolver)
}

/// Parse `text` into an expression tree
pub fn parse(text: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".to_string()));
    }
    let mut parser = ExprParser { tokens, current: 0 };
    let expr = parser.ternary()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(EvalError::Syntax(format!("unexpected `{}`", tok))),
    }
}

/// Parse a C integer literal (`0x1F`, `017`, `0b101`, `42UL`, `'A'`)
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let trimmed = text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let (digits, radix) = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        (hex, 16)
    } else if let Some(bin) = trimmed
        .strip_prefix("0b")
        .or_else(|| trimmed.strip_prefix("0B"))
    {
        (bin, 2)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    Ident(String),
    Defined(String),
    /// `sizeof(type)` with the size in bytes already known
    Sizeof(i64),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate against `resolver`
    pub fn eval(&self, resolver: &dyn Resolver) -> Result<i64, EvalError> {
        match self {
            Expr::Number(n) | Expr::Sizeof(n) => Ok(*n),
            Expr::Ident(name) => resolver.value(name),
            Expr::Defined(name) => resolver
                .is_defined(name)
                .map(i64::from)
                .ok_or_else(|| EvalError::Unresolved(name.clone())),
            Expr::Unary(op, inner) => {
                let v = inner.eval(resolver)?;
                Ok(match *op {
                    "-" => v.wrapping_neg(),
                    "+" => v,
                    "!" => (v == 0) as i64,
                    "~" => !v,
                    _ => return Err(EvalError::Syntax(format!("unknown operator `{}`", op))),
                })
            }
            Expr::Binary("&&", lhs, rhs) => match lhs.eval(resolver) {
                Ok(0) => Ok(0),
                Ok(_) => Ok((rhs.eval(resolver)? != 0) as i64),
                // A false right side decides the result on its own
                Err(e) => match rhs.eval(resolver) {
                    Ok(0) => Ok(0),
                    _ => Err(e),
                },
            },
            Expr::Binary("||", lhs, rhs) => match lhs.eval(resolver) {
                Ok(0) => Ok((rhs.eval(resolver)? != 0) as i64),
                Ok(_) => Ok(1),
                Err(e) => match rhs.eval(resolver) {
                    Ok(v) if v != 0 => Ok(1),
                    _ => Err(e),
                },
            },
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(resolver)?;
                let b = rhs.eval(resolver)?;
                binary(op, a, b)
            }
            Expr::Ternary(cond, then, otherwise) => {
                if cond.eval(resolver)? != 0 {
                    then.eval(resolver)
                } else {
                    otherwise.eval(resolver)
                }
            }
        }
    }

    /// Identifiers referenced anywhere in the tree
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Ident(name) | Expr::Defined(name) => out.push(name),
            Expr::Unary(_, inner) => inner.collect_identifiers(out),
            Expr::Binary(_, a, b) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
            }
            Expr::Ternary(a, b, c) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
                c.collect_identifiers(out);
            }
            Expr::Number(_) | Expr::Sizeof(_) => {}
        }
    }
}

fn binary(op: &str, a: i64, b: i64) -> Result<i64, EvalError> {
    Ok(match op {
        "*" => a.wrapping_mul(b),
        "/" if b == 0 => return Err(EvalError::DivisionByZero),
        "/" => a.wrapping_div(b),
        "%" if b == 0 => return Err(EvalError::DivisionByZero),
        "%" => a.wrapping_rem(b),
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "<<" => a.wrapping_shl(b as u32),
        ">>" => a.wrapping_shr(b as u32),
        "<" => (a < b) as i64,
        "<=" => (a <= b) as i64,
        ">" => (a > b) as i64,
        ">=" => (a >= b) as i64,
        "==" => (a == b) as i64,
        "!=" => (a != b) as i64,
        "&" => a & b,
        "^" => a ^ b,
        "|" => a | b,
        _ => return Err(EvalError::Syntax(format!("unknown operator `{}`", op))),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Num(n) => write!(f, "{}", n),
            Tok::Ident(s) => write!(f, "{}", s),
            Tok::Op(op) => write!(f, "{}", op),
        }
    }
}

const OPERATORS: [&str; 26] = [
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "(", ")", "+", "-", "*", "/", "%", "<", ">",
    "&", "|", "^", "!", "~", "?", ":", ",", "#",
];

fn tokenize(text: &str) -> Result<Vec<Tok>, EvalError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() || c == b'\\' {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            let literal = &text[start..i];
            let value = parse_int_literal(literal)
                .ok_or_else(|| EvalError::Syntax(format!("invalid integer `{}`", literal)))?;
            tokens.push(Tok::Num(value));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Tok::Ident(text[start..i].to_string()));
        } else if c == b'\'' {
            // Character literal; contents may have been blanked upstream
            let end = text[i + 1..]
                .find('\'')
                .map(|rel| i + 1 + rel)
                .ok_or_else(|| EvalError::Syntax("unterminated character literal".to_string()))?;
            let inner = &text[i + 1..end];
            let value = inner.chars().next().map(|ch| ch as i64).unwrap_or(0);
            tokens.push(Tok::Num(value));
            i = end + 1;
        } else {
            let op = OPERATORS
                .iter()
                .find(|op| text[i..].starts_with(**op))
                .ok_or_else(|| {
                    EvalError::Syntax(format!("unexpected character `{}`", c as char))
                })?;
            tokens.push(Tok::Op(op));
            i += op.len();
        }
    }
    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Tok>,
    current: usize,
}

impl ExprParser {
    fn ternary(&mut self) -> Result<Expr, EvalError> {
        let cond = self.binary_level(0)?;
        if self.match_op("?") {
            let then = self.ternary()?;
            self.expect_op(":")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    /// Binary operators from loosest (`||`) to tightest (`* / %`)
    fn binary_level(&mut self, level: usize) -> Result<Expr, EvalError> {
        const LEVELS: [&[&str]; 10] = [
            &["||"],
            &["&&"],
            &["|"],
            &["^"],
            &["&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["<<", ">>"],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary_level(level + 1)?;
        while let Some(Tok::Op(op)) = self.peek() {
            let op = *op;
            if !LEVELS[level].contains(&op) {
                break;
            }
            self.current += 1;
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        for op in ["-", "+", "!", "~"] {
            if self.match_op(op) {
                return Ok(Expr::Unary(op, Box::new(self.unary()?)));
            }
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Tok::Num(n)) => Ok(Expr::Number(n)),
            Some(Tok::Ident(name)) if name == "defined" => {
                let parens = self.match_op("(");
                let name = match self.advance() {
                    Some(Tok::Ident(name)) => name,
                    _ => return Err(EvalError::Syntax("expected macro name after `defined`".to_string())),
                };
                if parens {
                    self.expect_op(")")?;
                }
                Ok(Expr::Defined(name))
            }
            Some(Tok::Ident(name)) if name == "sizeof" => {
                self.expect_op("(")?;
                let mut words = Vec::new();
                while let Some(Tok::Ident(word)) = self.peek() {
                    words.push(word.clone());
                    self.current += 1;
                }
                self.expect_op(")")?;
                let bits = crate::parser::Primitive::from_words(&words)
                    .map(|p| p.bits())
                    .ok_or_else(|| EvalError::Syntax(format!("sizeof({}) is unknown", words.join(" "))))?;
                Ok(Expr::Sizeof(i64::from(bits / 8)))
            }
            Some(Tok::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Tok::Op("(")) => {
                // Casts to primitive types are dropped: `(uint8_t)X`
                let save = self.current;
                let mut words = Vec::new();
                while let Some(Tok::Ident(word)) = self.peek() {
                    words.push(word.clone());
                    self.current += 1;
                }
                if !words.is_empty()
                    && self.match_op(")")
                    && crate::parser::Primitive::from_words(&words).is_some()
                {
                    return self.unary();
                }
                self.current = save;
                let inner = self.ternary()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Some(tok) => Err(EvalError::Syntax(format!("unexpected `{}`", tok))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_string())),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.current)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.current).cloned();
        if tok.is_some() {
            self.current += 1;
        }
        tok
    }

    fn match_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(o)) if *o == op) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), EvalError> {
        if self.match_op(op) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!("expected `{}`", op)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_eval_error_converts_to_expression_error() {
        let error: crate::error::Error = EvalError::Unresolved("N_MAX".to_string()).into();
        assert_eq!(error, crate::error::Error::ExpressionError("unresolved identifier `N_MAX`".to_string()));
        assert_eq!(error.kind(), crate::error::DefectKind::Config);
    }

    struct Map(BTreeMap<&'static str, i64>);

    impl Resolver for Map {
        fn value(&self, name: &str) -> Result<i64, EvalError> {
            self.0
                .get(name)
                .copied()
                .ok_or_else(|| EvalError::Unresolved(name.to_string()))
        }

        fn is_defined(&self, name: &str) -> Option<bool> {
            self.0.get(name).map(|_| true)
        }
    }

    fn env() -> Map {
        Map([("N", 4), ("MODE", 2)].into_iter().collect())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("1 + 2 * 3", &NoNames), Ok(7));
        assert_eq!(evaluate("(1 + 2) * 3", &NoNames), Ok(9));
        assert_eq!(evaluate("1 << 4 | 1", &NoNames), Ok(17));
        assert_eq!(evaluate("-3 + ~0", &NoNames), Ok(-4));
        assert_eq!(evaluate("2 > 1 ? 10 : 20", &NoNames), Ok(10));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_int_literal("0x1F"), Some(31));
        assert_eq!(parse_int_literal("017"), Some(15));
        assert_eq!(parse_int_literal("0b101"), Some(5));
        assert_eq!(parse_int_literal("42UL"), Some(42));
        assert_eq!(parse_int_literal("0"), Some(0));
        assert_eq!(parse_int_literal("0x"), None);
        assert_eq!(evaluate("'A'", &NoNames), Ok(65));
    }

    #[test]
    fn test_names_and_defined() {
        assert_eq!(evaluate("N * 2 + MODE", &env()), Ok(10));
        assert_eq!(evaluate("defined(N) && !defined MODE", &env()), Ok(0));
        assert_eq!(
            evaluate("X + 1", &env()),
            Err(EvalError::Unresolved("X".to_string()))
        );
    }

    #[test]
    fn test_short_circuit_around_unknowns() {
        assert_eq!(evaluate("0 && X", &env()), Ok(0));
        assert_eq!(evaluate("X && 0", &env()), Ok(0));
        assert_eq!(evaluate("N || X", &env()), Ok(1));
        assert_eq!(
            evaluate("X || 0", &env()),
            Err(EvalError::Unresolved("X".to_string()))
        );
    }

    #[test]
    fn test_casts_sizeof_and_errors() {
        assert_eq!(evaluate("(uint8_t)300 + 0", &NoNames), Ok(300));
        assert_eq!(evaluate("sizeof(uint32_t) * 8", &NoNames), Ok(32));
        assert_eq!(evaluate("4 / 0", &NoNames), Err(EvalError::DivisionByZero));
        assert!(matches!(evaluate("1 +", &NoNames), Err(EvalError::Syntax(_))));
        assert!(matches!(evaluate("", &NoNames), Err(EvalError::Syntax(_))));
        assert!(matches!(evaluate("(1", &NoNames), Err(EvalError::Syntax(_))));
    }
}
