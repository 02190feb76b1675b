//! Boolean expressions evaluated against an [`Outcome`].
//!
//! Expressions are parsed once, when the policy is built, and evaluated on every
//! classified outcome. The language is deliberately small:
//!
//! - roots: `response` (body parsed as JSON), `body` (raw body text), `headers`
//!   (case-insensitive header lookup) and `status` (numeric status code)
//! - member access: `response.error.code`, `response["error-code"]`, `response.items[0]`
//! - literals: strings in single or double quotes, numbers, `true`, `false`, `null`
//! - membership: `'code' in response` (object key, array element or substring)
//! - comparison: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - logic: `and` / `&&`, `or` / `||`, `not` / `!`, parentheses
//!
//! An expression may be wrapped in `{{ ... }}`. Any value can be used as a
//! condition: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
//!
//! ```
//! use rebound::{HttpResponse, Outcome, Predicate};
//! use http::StatusCode;
//!
//! let predicate = Predicate::parse("{{ 'code' in response and status >= 400 }}").unwrap();
//! let outcome = Outcome::from(HttpResponse::new(StatusCode::BAD_REQUEST, r#"{"code": 7}"#));
//! assert!(predicate.evaluate(&outcome));
//! ```

use crate::{Error, Outcome, Result};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A parsed condition over an outcome.
#[derive(Clone)]
pub struct Predicate {
    source: String,
    kind: PredicateKind,
}

#[derive(Clone)]
enum PredicateKind {
    Expression(Expr),
    Custom(fn(&Outcome) -> bool),
}

impl Predicate {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPredicate`] if the expression is not well formed.
    pub fn parse(expression: &str) -> Result<Self> {
        let inner = strip_template(expression);
        let mut offset = expression.len() - expression.trim_start().len();
        if inner.len() < expression.trim().len() {
            offset += 2;
        }

        let tokens = lex(inner).map_err(|(position, reason)| Error::InvalidPredicate {
            expression: expression.to_string(),
            position: position + offset,
            reason,
        })?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser
            .parse_complete()
            .map_err(|(position, reason)| Error::InvalidPredicate {
                expression: expression.to_string(),
                position: position + offset,
                reason,
            })?;

        Ok(Self {
            source: expression.to_string(),
            kind: PredicateKind::Expression(expr),
        })
    }

    /// Wraps a plain function.
    pub fn custom(f: fn(&Outcome) -> bool) -> Self {
        Self {
            source: "<custom>".to_string(),
            kind: PredicateKind::Custom(f),
        }
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the outcome satisfies the condition.
    pub fn evaluate(&self, outcome: &Outcome) -> bool {
        match &self.kind {
            PredicateKind::Expression(expr) => truthy(&expr.eval(outcome)),
            PredicateKind::Custom(f) => f(outcome),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.source).finish()
    }
}

fn strip_template(expression: &str) -> &str {
    let trimmed = expression.trim();
    match trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        Some(inner) => inner,
        None => trimmed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Response,
    Body,
    Headers,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Root, Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, outcome: &Outcome) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(root, segments) => resolve(*root, segments, outcome),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(outcome))),
            Expr::And(l, r) => Value::Bool(truthy(&l.eval(outcome)) && truthy(&r.eval(outcome))),
            Expr::Or(l, r) => Value::Bool(truthy(&l.eval(outcome)) || truthy(&r.eval(outcome))),
            Expr::Compare(op, l, r) => Value::Bool(compare(*op, &l.eval(outcome), &r.eval(outcome))),
            Expr::In(needle, haystack) => {
                Value::Bool(contains(&haystack.eval(outcome), &needle.eval(outcome)))
            }
        }
    }
}

fn resolve(root: Root, segments: &[Segment], outcome: &Outcome) -> Value {
    match root {
        Root::Response => {
            let json = match outcome {
                Outcome::Response(r) => r.json(),
                Outcome::Transport(_) => None,
            };
            match json {
                Some(value) => walk(value, segments).cloned().unwrap_or(Value::Null),
                None => {
                    if matches!(outcome, Outcome::Response(_)) {
                        tracing::warn!("predicate references response but the body is not JSON");
                    }
                    Value::Null
                }
            }
        }
        Root::Body => {
            if segments.is_empty() {
                Value::String(outcome.error_text().to_string())
            } else {
                Value::Null
            }
        }
        Root::Status => match (outcome.status(), segments.is_empty()) {
            (Some(status), true) => Value::from(status.as_u16()),
            _ => Value::Null,
        },
        Root::Headers => {
            let Some(headers) = outcome.headers() else {
                return Value::Null;
            };
            match segments {
                [] => Value::Object(
                    headers
                        .iter()
                        .filter_map(|(name, value)| {
                            let value = value.to_str().ok()?;
                            Some((name.as_str().to_string(), Value::String(value.to_string())))
                        })
                        .collect(),
                ),
                [Segment::Key(name)] => headers
                    .get(name.to_ascii_lowercase().as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(|v| Value::String(v.to_string()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
    }
}

fn walk<'a>(mut value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    for segment in segments {
        value = match segment {
            Segment::Key(key) => value.get(key.as_str())?,
            Segment::Index(i) => value.get(*i)?,
        };
    }
    Some(value)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq => return values_equal(left, right),
        CmpOp::Ne => return !values_equal(left, right),
        _ => {}
    }

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match (op, ordering) {
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Object(map) => match needle {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(text) => match needle {
            Value::String(sub) => text.contains(sub.as_str()),
            _ => false,
        },
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Cmp(CmpOp),
    Not,
    And,
    Or,
}

type ParseResult<T> = std::result::Result<T, (usize, String)>;

fn lex(input: &str) -> ParseResult<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | '.' => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Dot,
                };
                tokens.push((pos, token));
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    return Err((pos, "unterminated string literal".to_string()));
                }
                tokens.push((pos, Token::Str(text)));
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let token = match (c, next) {
                    ('=', Some('=')) => Token::Cmp(CmpOp::Eq),
                    ('!', Some('=')) => Token::Cmp(CmpOp::Ne),
                    ('<', Some('=')) => Token::Cmp(CmpOp::Le),
                    ('>', Some('=')) => Token::Cmp(CmpOp::Ge),
                    ('&', Some('&')) => Token::And,
                    ('|', Some('|')) => Token::Or,
                    ('<', _) => Token::Cmp(CmpOp::Lt),
                    ('>', _) => Token::Cmp(CmpOp::Gt),
                    ('!', _) => Token::Not,
                    _ => return Err((pos, format!("unexpected character `{}`", c))),
                };
                if !matches!(token, Token::Cmp(CmpOp::Lt | CmpOp::Gt) | Token::Not) {
                    chars.next();
                }
                tokens.push((pos, token));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = text
                    .parse::<f64>()
                    .map_err(|_| (pos, format!("invalid number `{}`", text)))?;
                tokens.push((pos, Token::Num(number)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '-' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match text.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(text),
                };
                tokens.push((pos, token));
            }
            other => return Err((pos, format!("unexpected character `{}`", other))),
        }
    }

    Ok(tokens)
}

/// Deepest expression tree the parser will build.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn parse_complete(&mut self) -> ParseResult<Expr> {
        if self.tokens.is_empty() {
            return Err((0, "empty expression".to_string()));
        }
        let expr = self.parse_or()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some((pos, token)) => Err((*pos, format!("unexpected token {:?}", token))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> ParseResult<()> {
        let position = self.position();
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            _ => Err((position, format!("expected {}", what))),
        }
    }

    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err((self.position(), "expression nested too deeply".to_string()));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.descend()?;
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.descend()?;
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.descend()?;
            self.advance();
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_operand()?;
        match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.advance();
                let right = self.parse_operand()?;
                Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
            }
            Some(Token::Ident(word)) if word == "in" => {
                self.advance();
                let right = self.parse_operand()?;
                Ok(Expr::In(Box::new(left), Box::new(right)))
            }
            Some(Token::Not)
                if matches!(self.tokens.get(self.pos + 1), Some((_, Token::Ident(w))) if w == "in") =>
            {
                self.pos += 2;
                let right = self.parse_operand()?;
                Ok(Expr::Not(Box::new(Expr::In(Box::new(left), Box::new(right)))))
            }
            _ => Ok(left),
        }
    }

    fn parse_operand(&mut self) -> ParseResult<Expr> {
        let position = self.position();
        match self.advance() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "`)`")?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                "response" => self.parse_path(Root::Response),
                "body" => self.parse_path(Root::Body),
                "headers" => self.parse_path(Root::Headers),
                "status" | "status_code" => self.parse_path(Root::Status),
                other => Err((position, format!("unknown name `{}`", other))),
            },
            Some(token) => Err((position, format!("unexpected token {:?}", token))),
            None => Err((position, "unexpected end of expression".to_string())),
        }
    }

    fn parse_path(&mut self, root: Root) -> ParseResult<Expr> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let position = self.position();
                    match self.advance() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        _ => return Err((position, "expected a field name after `.`".to_string())),
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let position = self.position();
                    match self.advance() {
                        Some(Token::Str(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => {
                            segments.push(Segment::Index(n as usize))
                        }
                        _ => return Err((position, "expected a string key or index".to_string())),
                    }
                    self.expect(Token::RBracket, "`]`")?;
                }
                _ => break,
            }
        }
        Ok(Expr::Path(root, segments))
    }
}
