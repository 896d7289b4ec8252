//! Verification rules and command verification stages
//!
//! A rule is a boolean expression over a parameter's calibrated value,
//! written in a comment as `verify: value > 3 && value < 10`. The value is
//! visible as `value`, `x`, `eng` and under the parameter's own name.
//! Stages describe when the ground checks a telecommand (CVS rows).

use super::curve::EngValue;
use crate::error::Location;
use crate::lexer::Tags;
use serde::Serialize;
use std::fmt;

/// Names every rule may use for the checked value
const VALUE_NAMES: [&str; 3] = ["value", "x", "eng"];

/// A boolean check over one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRule {
    /// Expression as written
    pub expression: String,
    /// Truth value the expression must have
    pub expected: bool,
    #[serde(skip)]
    condition: Condition,
}

impl VerificationRule {
    /// Parse a rule for the parameter called `field`
    ///
    /// Identifiers other than the value names and `field` are rejected here
    /// rather than at evaluation time.
    pub fn parse(expression: &str, expected: bool, field: &str) -> Result<Self, String> {
        let condition = Parser::new(expression)?.parse()?;
        let mut names = Vec::new();
        condition.identifiers(&mut names);
        if let Some(unknown) = names
            .iter()
            .find(|n| !VALUE_NAMES.contains(&n.as_str()) && n.as_str() != field)
        {
            return Err(format!("unknown name `{}` in `{}`", unknown, expression));
        }
        Ok(VerificationRule {
            expression: expression.trim().to_string(),
            expected,
            condition,
        })
    }

    /// Rules declared by a parameter's `verify`/`check` tags
    pub fn from_tags(tags: &Tags, field: &str) -> Vec<Result<Self, String>> {
        let expected = match tags.get("expect") {
            Some(_) => tags.flag("expect"),
            None => true,
        };
        ["verify", "check"]
            .iter()
            .filter_map(|key| tags.text(key))
            .map(|text| Self::parse(&text, expected, field))
            .collect()
    }

    /// Value of the expression for `value`
    pub fn evaluate(&self, value: &EngValue) -> Result<bool, String> {
        match self.condition.eval(value)? {
            Operand::Bool(b) => Ok(b),
            other => Err(format!("`{}` yields {} instead of a truth value", self.expression, other)),
        }
    }

    /// True when the expression has its expected truth value
    pub fn check(&self, value: &EngValue) -> Result<bool, String> {
        Ok(self.evaluate(value)? == self.expected)
    }
}

/// Kind of a verification stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageType {
    #[serde(rename = "A")]
    Acceptance,
    #[serde(rename = "S")]
    Start,
    #[serde(rename = "P")]
    Progress,
    #[serde(rename = "C")]
    Completion,
}

impl StageType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "A" => Some(StageType::Acceptance),
            "S" => Some(StageType::Start),
            "P" => Some(StageType::Progress),
            "C" => Some(StageType::Completion),
            _ => None,
        }
    }
}

/// Where a stage's report comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageSource {
    /// Telemetry report
    #[serde(rename = "R")]
    Report,
    /// Verification expression
    #[serde(rename = "V")]
    Expression,
}

/// A command verification stage (CVS)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationStage {
    pub id: String,
    pub stage_type: StageType,
    /// Seconds after release the window opens
    pub start: i64,
    /// Window length in seconds
    pub interval: i64,
    pub source: StageSource,
    /// Applied to commands that list no stages
    pub default: bool,
    pub description: Option<String>,
    pub location: Option<Location>,
}

impl VerificationStage {
    /// Stage declared by a comment carrying `cvs_def`
    pub fn from_tags(tags: &Tags) -> Result<Self, String> {
        let id = tags
            .text("cvs_def")
            .ok_or_else(|| "stage has no `cvs_def` identifier".to_string())?;
        let code = tags
            .text("cvs_type")
            .ok_or_else(|| format!("stage `{}` has no `cvs_type`", id))?;
        let stage_type = StageType::from_code(&code)
            .ok_or_else(|| format!("stage `{}` has unknown type `{}`", id, code))?;
        let source = match tags.text("cvs_source").as_deref() {
            Some("cve") => StageSource::Expression,
            _ => StageSource::Report,
        };
        Ok(VerificationStage {
            id,
            stage_type,
            start: tags.int("cvs_start").unwrap_or(0),
            interval: tags.int("cvs_interval").unwrap_or(0),
            source,
            default: tags.flag("default"),
            description: tags.text("desc"),
            location: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "number {}", n),
            Operand::Text(s) => write!(f, "text \"{}\"", s),
            Operand::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Literal(Operand),
    Name(String),
    Not(Box<Condition>),
    Negate(Box<Condition>),
    Binary(BinaryOp, Box<Condition>, Box<Condition>),
}

impl Condition {
    fn identifiers(&self, out: &mut Vec<String>) {
        match self {
            Condition::Name(name) => out.push(name.clone()),
            Condition::Not(inner) | Condition::Negate(inner) => inner.identifiers(out),
            Condition::Binary(_, lhs, rhs) => {
                lhs.identifiers(out);
                rhs.identifiers(out);
            }
            Condition::Literal(_) => {}
        }
    }

    fn eval(&self, value: &EngValue) -> Result<Operand, String> {
        match self {
            Condition::Literal(operand) => Ok(operand.clone()),
            Condition::Name(_) => Ok(match value {
                EngValue::Number(n) => Operand::Number(*n),
                EngValue::Text(s) => Operand::Text(s.clone()),
            }),
            Condition::Not(inner) => match inner.eval(value)? {
                Operand::Bool(b) => Ok(Operand::Bool(!b)),
                other => Err(format!("cannot negate {}", other)),
            },
            Condition::Negate(inner) => match inner.eval(value)? {
                Operand::Number(n) => Ok(Operand::Number(-n)),
                other => Err(format!("cannot negate {}", other)),
            },
            Condition::Binary(BinaryOp::And, lhs, rhs) => {
                if !truth(lhs.eval(value)?)? {
                    return Ok(Operand::Bool(false));
                }
                Ok(Operand::Bool(truth(rhs.eval(value)?)?))
            }
            Condition::Binary(BinaryOp::Or, lhs, rhs) => {
                if truth(lhs.eval(value)?)? {
                    return Ok(Operand::Bool(true));
                }
                Ok(Operand::Bool(truth(rhs.eval(value)?)?))
            }
            Condition::Binary(op, lhs, rhs) => binary(*op, lhs.eval(value)?, rhs.eval(value)?),
        }
    }
}

fn truth(operand: Operand) -> Result<bool, String> {
    match operand {
        Operand::Bool(b) => Ok(b),
        other => Err(format!("{} is not a truth value", other)),
    }
}

fn binary(op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Operand, String> {
    let ordering = matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge);
    let result = match (op, &lhs, &rhs) {
        (BinaryOp::Eq, _, _) => Operand::Bool(lhs == rhs),
        (BinaryOp::Ne, _, _) => Operand::Bool(lhs != rhs),
        (_, Operand::Number(a), Operand::Number(b)) if ordering => Operand::Bool(compare(op, a, b)),
        (_, Operand::Text(a), Operand::Text(b)) if ordering => Operand::Bool(compare(op, a, b)),
        (BinaryOp::Add, Operand::Number(a), Operand::Number(b)) => Operand::Number(a + b),
        (BinaryOp::Sub, Operand::Number(a), Operand::Number(b)) => Operand::Number(a - b),
        (BinaryOp::Mul, Operand::Number(a), Operand::Number(b)) => Operand::Number(a * b),
        (BinaryOp::Div, Operand::Number(_), Operand::Number(b)) if *b == 0.0 => {
            return Err("division by zero".to_string())
        }
        (BinaryOp::Div, Operand::Number(a), Operand::Number(b)) => Operand::Number(a / b),
        _ => return Err(format!("cannot apply {:?} to {} and {}", op, lhs, rhs)),
    };
    Ok(result)
}

fn compare<T: PartialOrd + ?Sized>(op: BinaryOp, a: &T, b: &T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Word(String),
    Op(&'static str),
    LeftParen,
    RightParen,
}

/// Recursive descent, one function per precedence level
struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(text: &str) -> Result<Self, String> {
        Ok(Parser {
            tokens: tokenize(text)?,
            current: 0,
        })
    }

    fn parse(mut self) -> Result<Condition, String> {
        if self.tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let condition = self.or()?;
        match self.tokens.get(self.current) {
            None => Ok(condition),
            Some(token) => Err(format!("unexpected {:?}", token)),
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.tokens.get(self.current), Some(Token::Op(o)) if *o == op) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Condition, String> {
        let mut lhs = self.and()?;
        while self.eat("||") {
            let rhs = self.and()?;
            lhs = Condition::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Condition, String> {
        let mut lhs = self.comparison()?;
        while self.eat("&&") {
            let rhs = self.comparison()?;
            lhs = Condition::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Condition, String> {
        let lhs = self.additive()?;
        let op = [
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ]
        .into_iter()
        .find(|(text, _)| self.eat(text));
        match op {
            Some((_, op)) => {
                let rhs = self.additive()?;
                Ok(Condition::Binary(op, Box::new(lhs), Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn additive(&mut self) -> Result<Condition, String> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.multiplicative()?;
            lhs = Condition::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Condition, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Condition::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Condition, String> {
        if self.eat("!") {
            return Ok(Condition::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Condition::Negate(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Condition, String> {
        let token = self
            .tokens
            .get(self.current)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.current += 1;
        match token {
            Token::Number(n) => Ok(Condition::Literal(Operand::Number(n))),
            Token::Text(s) => Ok(Condition::Literal(Operand::Text(s))),
            Token::Word(w) if w == "true" => Ok(Condition::Literal(Operand::Bool(true))),
            Token::Word(w) if w == "false" => Ok(Condition::Literal(Operand::Bool(false))),
            Token::Word(w) => Ok(Condition::Name(w)),
            Token::LeftParen => {
                let inner = self.or()?;
                match self.tokens.get(self.current) {
                    Some(Token::RightParen) => {
                        self.current += 1;
                        Ok(inner)
                    }
                    _ => Err("missing `)`".to_string()),
                }
            }
            other => Err(format!("unexpected {:?}", other)),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    const OPERATORS: [&str; 14] = [
        "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "=",
    ];
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let value = match literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).map(|v| v as f64).ok(),
                None => literal.parse::<f64>().ok(),
            };
            tokens.push(Token::Number(
                value.ok_or_else(|| format!("invalid number `{}`", literal))?,
            ));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i == chars.len() {
                return Err("unterminated string".to_string());
            }
            tokens.push(Token::Text(chars[start..i].iter().collect()));
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LeftParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RightParen);
            i += 1;
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op: &'static str = OPERATORS
                .iter()
                .copied()
                .find(|op| rest.starts_with(op))
                .ok_or_else(|| format!("unexpected character `{}`", c))?;
            // A lone `=` is read as `==`
            tokens.push(Token::Op(if op == "=" { "==" } else { op }));
            i += op.len();
        }
    }
    Ok(tokens)
}
