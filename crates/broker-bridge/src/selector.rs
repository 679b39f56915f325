//! Message selectors.
//!
//! A selector is a conditional expression over message properties, written in
//! the SQL-92 subset brokers use for consumer-side filtering:
//!
//! ```text
//! region = 'EU' AND (priority > 3 OR urgent) AND code NOT LIKE 'TMP\_%' ESCAPE '\'
//! ```
//!
//! Evaluation follows SQL three-valued logic. Any comparison touching a missing
//! property is *unknown*, and a message is selected only when the whole
//! expression evaluates to *true*.
//!
//! # Example
//!
//! ```rust
//! use broker_bridge::selector::Selector;
//! use broker_bridge::message::{PropertyMap, PropertyValue};
//!
//! let selector = Selector::parse("KEY = 'valueTest2'").unwrap();
//!
//! let mut properties = PropertyMap::new();
//! properties.insert("KEY".to_string(), PropertyValue::from("valueTest2"));
//! assert!(selector.matches(&properties));
//! assert!(!selector.matches(&PropertyMap::new()));
//! ```

use crate::error::SelectorError;
use crate::message::{PropertyMap, PropertyValue};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;

// ============================================================================
// Public API
// ============================================================================

/// A parsed, ready-to-evaluate message selector
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    tokens: Vec<Token>,
    expression: Expr,
}

impl Selector {
    /// Parse a selector expression
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser {
            tokens: tokens.clone(),
            position: 0,
        };
        let expression = parser.parse_or()?;
        parser.expect(&Token::End, "end of selector")?;

        Ok(Self {
            source: source.trim().to_string(),
            tokens,
            expression,
        })
    }

    /// Parse an optional selector; `None`, empty and blank input mean "select all"
    pub fn parse_optional(source: Option<&str>) -> Result<Option<Self>, SelectorError> {
        match source {
            Some(text) if !text.trim().is_empty() => Self::parse(text).map(Some),
            _ => Ok(None),
        }
    }

    /// Get the selector text as written (trimmed)
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether a message with these properties is selected
    pub fn matches(&self, properties: &PropertyMap) -> bool {
        truth(&self.expression.evaluate(properties)) == Some(true)
    }
}

/// Selectors are equal when they tokenize alike: whitespace and keyword case are ignored
impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}

impl Eq for Selector {}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Str(String),
    Long(i64),
    Double(f64),
    LeftParen,
    RightParen,
    Comma,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    And,
    Or,
    Not,
    Between,
    In,
    Like,
    Escape,
    Is,
    Null,
    True,
    False,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(name) => write!(f, "identifier '{}'", name),
            Self::Str(text) => write!(f, "string '{}'", text),
            Self::Long(value) => write!(f, "number {}", value),
            Self::Double(value) => write!(f, "number {}", value),
            Self::End => write!(f, "end of selector"),
            other => write!(f, "'{}'", format!("{:?}", other).to_uppercase()),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, SelectorError> {
        let mut tokens = Vec::new();

        while let Some(&(position, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }

            let token = match c {
                '(' => self.single(Token::LeftParen),
                ')' => self.single(Token::RightParen),
                ',' => self.single(Token::Comma),
                '=' => self.single(Token::Equal),
                '+' => self.single(Token::Plus),
                '-' => self.single(Token::Minus),
                '*' => self.single(Token::Star),
                '/' => self.single(Token::Slash),
                '<' => {
                    self.chars.next();
                    match self.chars.peek() {
                        Some(&(_, '=')) => self.single(Token::LessEqual),
                        Some(&(_, '>')) => self.single(Token::NotEqual),
                        _ => Token::Less,
                    }
                }
                '>' => {
                    self.chars.next();
                    match self.chars.peek() {
                        Some(&(_, '=')) => self.single(Token::GreaterEqual),
                        _ => Token::Greater,
                    }
                }
                '\'' => self.string(position)?,
                c if c.is_ascii_digit() || c == '.' => self.number(position)?,
                c if c.is_alphabetic() || c == '_' || c == '$' => self.word(position),
                other => {
                    return Err(SelectorError::UnexpectedCharacter {
                        character: other,
                        position,
                    })
                }
            };
            tokens.push(token);
        }

        tokens.push(Token::End);
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn string(&mut self, start: usize) -> Result<Token, SelectorError> {
        self.chars.next();
        let mut text = String::new();

        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    // '' is an escaped quote
                    if let Some(&(_, '\'')) = self.chars.peek() {
                        self.chars.next();
                        text.push('\'');
                    } else {
                        return Ok(Token::Str(text));
                    }
                }
                Some((_, c)) => text.push(c),
                None => return Err(SelectorError::UnterminatedString { position: start }),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Token, SelectorError> {
        let mut end = start;
        let mut is_decimal = false;

        while let Some(&(position, c)) = self.chars.peek() {
            let accept = match c {
                '0'..='9' => true,
                '.' => {
                    is_decimal = true;
                    true
                }
                'e' | 'E' => {
                    is_decimal = true;
                    true
                }
                // sign of an exponent
                '+' | '-' => matches!(self.source[start..position].chars().last(), Some('e' | 'E')),
                _ => false,
            };
            if !accept {
                break;
            }
            end = position + c.len_utf8();
            self.chars.next();
        }

        let literal = &self.source[start..end];
        let invalid = || SelectorError::InvalidNumber {
            literal: literal.to_string(),
        };

        if is_decimal {
            literal.parse::<f64>().map(Token::Double).map_err(|_| invalid())
        } else {
            literal.parse::<i64>().map(Token::Long).map_err(|_| invalid())
        }
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(position, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' || c == '.' {
                end = position + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }

        let word = &self.source[start..end];
        match word.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "BETWEEN" => Token::Between,
            "IN" => Token::In,
            "LIKE" => Token::Like,
            "ESCAPE" => Token::Escape,
            "IS" => Token::Is,
            "NULL" => Token::Null,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            _ => Token::Identifier(word.to_string()),
        }
    }
}

// ============================================================================
// Syntax Tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Property(String),
    Negate(Box<Expr>),
    Arithmetic(ArithmeticOp, Box<Expr>, Box<Expr>),
    Compare(ComparisonOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    In {
        value: Box<Expr>,
        candidates: Vec<String>,
        negated: bool,
    },
    Like {
        value: Box<Expr>,
        pattern: Regex,
        negated: bool,
    },
    IsNull {
        value: Box<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
}

impl From<&PropertyValue> for Value {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Bool(b) => Self::Bool(*b),
            PropertyValue::Long(l) => Self::Long(*l),
            PropertyValue::Double(d) => Self::Double(*d),
            PropertyValue::String(s) => Self::Str(s.clone()),
        }
    }
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(l) => Some(*l as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

static END: Token = Token::End;

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&END)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &str) -> Result<(), SelectorError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> SelectorError {
        SelectorError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.peek().to_string(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SelectorError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, SelectorError> {
        let value = self.parse_additive()?;

        let comparison = match self.peek() {
            Token::Equal => Some(ComparisonOp::Equal),
            Token::NotEqual => Some(ComparisonOp::NotEqual),
            Token::Less => Some(ComparisonOp::Less),
            Token::LessEqual => Some(ComparisonOp::LessEqual),
            Token::Greater => Some(ComparisonOp::Greater),
            Token::GreaterEqual => Some(ComparisonOp::GreaterEqual),
            _ => None,
        };
        if let Some(op) = comparison {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Compare(op, Box::new(value), Box::new(right)));
        }

        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            self.expect(&Token::Null, "NULL")?;
            return Ok(Expr::IsNull {
                value: Box::new(value),
                negated,
            });
        }

        let negated = self.eat(&Token::Not);
        match self.advance() {
            Token::Between => {
                let low = self.parse_additive()?;
                self.expect(&Token::And, "AND")?;
                let high = self.parse_additive()?;
                Ok(Expr::Between {
                    value: Box::new(value),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            Token::In => {
                self.expect(&Token::LeftParen, "'('")?;
                let mut candidates = vec![self.parse_string("string literal")?];
                while self.eat(&Token::Comma) {
                    candidates.push(self.parse_string("string literal")?);
                }
                self.expect(&Token::RightParen, "')'")?;
                Ok(Expr::In {
                    value: Box::new(value),
                    candidates,
                    negated,
                })
            }
            Token::Like => {
                let pattern = self.parse_string("LIKE pattern")?;
                let escape = if self.eat(&Token::Escape) {
                    Some(self.parse_string("ESCAPE character")?)
                } else {
                    None
                };
                Ok(Expr::Like {
                    value: Box::new(value),
                    pattern: like_to_regex(&pattern, escape.as_deref())?,
                    negated,
                })
            }
            _ if negated => {
                self.position -= 1;
                Err(self.unexpected("BETWEEN, IN or LIKE after NOT"))
            }
            _ => {
                self.position -= 1;
                Ok(value)
            }
        }
    }

    fn parse_string(&mut self, expected: &str) -> Result<String, SelectorError> {
        match self.peek().clone() {
            Token::Str(text) => {
                self.advance();
                Ok(text)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Subtract,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithmeticOp::Multiply,
                Token::Slash => ArithmeticOp::Divide,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arithmetic(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, SelectorError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SelectorError> {
        let expr = match self.peek().clone() {
            Token::Identifier(name) => Expr::Property(name),
            Token::Str(text) => Expr::Literal(Value::Str(text)),
            Token::Long(value) => Expr::Literal(Value::Long(value)),
            Token::Double(value) => Expr::Literal(Value::Double(value)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&Token::RightParen, "')'")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("property, literal or '('")),
        };
        self.advance();
        Ok(expr)
    }
}

/// Translate a LIKE pattern into an anchored regular expression
fn like_to_regex(pattern: &str, escape: Option<&str>) -> Result<Regex, SelectorError> {
    let invalid = |message: &str| SelectorError::InvalidPattern {
        pattern: pattern.to_string(),
        message: message.to_string(),
    };

    let escape = match escape {
        None => None,
        Some(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => return Err(invalid("ESCAPE must be a single character")),
            }
        }
    };

    let mut regex = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(literal) => regex.push_str(&regex::escape(&literal.to_string())),
                None => return Err(invalid("pattern ends with the escape character")),
            }
        } else if c == '%' {
            regex.push_str(".*");
        } else if c == '_' {
            regex.push('.');
        } else {
            regex.push_str(&regex::escape(&c.to_string()));
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| invalid(&e.to_string()))
}

// ============================================================================
// Evaluation
// ============================================================================

fn truth(value: &Option<Value>) -> Option<bool> {
    match value {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn from_truth(value: Option<bool>) -> Option<Value> {
    value.map(Value::Bool)
}

fn negate_if(value: Option<bool>, negated: bool) -> Option<bool> {
    if negated {
        value.map(|b| !b)
    } else {
        value
    }
}

impl Expr {
    fn evaluate(&self, properties: &PropertyMap) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Property(name) => properties.get(name).map(Value::from),
            Self::Negate(inner) => match inner.evaluate(properties)? {
                Value::Long(l) => l.checked_neg().map(Value::Long),
                Value::Double(d) => Some(Value::Double(-d)),
                _ => None,
            },
            Self::Arithmetic(op, left, right) => {
                arithmetic(*op, left.evaluate(properties)?, right.evaluate(properties)?)
            }
            Self::Compare(op, left, right) => from_truth(compare(
                *op,
                &left.evaluate(properties)?,
                &right.evaluate(properties)?,
            )),
            Self::Not(inner) => from_truth(truth(&inner.evaluate(properties)).map(|b| !b)),
            Self::And(left, right) => {
                let left = truth(&left.evaluate(properties));
                if left == Some(false) {
                    return Some(Value::Bool(false));
                }
                match (left, truth(&right.evaluate(properties))) {
                    (_, Some(false)) => Some(Value::Bool(false)),
                    (Some(true), Some(true)) => Some(Value::Bool(true)),
                    _ => None,
                }
            }
            Self::Or(left, right) => {
                let left = truth(&left.evaluate(properties));
                if left == Some(true) {
                    return Some(Value::Bool(true));
                }
                match (left, truth(&right.evaluate(properties))) {
                    (_, Some(true)) => Some(Value::Bool(true)),
                    (Some(false), Some(false)) => Some(Value::Bool(false)),
                    _ => None,
                }
            }
            Self::Between {
                value,
                low,
                high,
                negated,
            } => {
                let value = value.evaluate(properties)?;
                let lower = compare(ComparisonOp::GreaterEqual, &value, &low.evaluate(properties)?);
                let upper = compare(ComparisonOp::LessEqual, &value, &high.evaluate(properties)?);
                let within = match (lower, upper) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                from_truth(negate_if(within, *negated))
            }
            Self::In {
                value,
                candidates,
                negated,
            } => match value.evaluate(properties)? {
                Value::Str(text) => from_truth(negate_if(
                    Some(candidates.iter().any(|candidate| *candidate == text)),
                    *negated,
                )),
                _ => None,
            },
            Self::Like {
                value,
                pattern,
                negated,
            } => match value.evaluate(properties)? {
                Value::Str(text) => from_truth(negate_if(Some(pattern.is_match(&text)), *negated)),
                _ => None,
            },
            Self::IsNull { value, negated } => {
                let is_null = value.evaluate(properties).is_none();
                Some(Value::Bool(is_null != *negated))
            }
        }
    }
}

fn arithmetic(op: ArithmeticOp, left: Value, right: Value) -> Option<Value> {
    if let (Value::Long(a), Value::Long(b)) = (&left, &right) {
        let result = match op {
            ArithmeticOp::Add => a.checked_add(*b),
            ArithmeticOp::Subtract => a.checked_sub(*b),
            ArithmeticOp::Multiply => a.checked_mul(*b),
            ArithmeticOp::Divide => a.checked_div(*b),
        };
        return result.map(Value::Long);
    }

    let (a, b) = (left.as_f64()?, right.as_f64()?);
    let result = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Subtract => a - b,
        ArithmeticOp::Multiply => a * b,
        ArithmeticOp::Divide => a / b,
    };
    result.is_finite().then_some(Value::Double(result))
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Option<bool> {
    let ordering = match (left, right) {
        (Value::Long(a), Value::Long(b)) => a.cmp(b),
        (Value::Str(a), Value::Str(b)) => return equality_only(op, a == b),
        (Value::Bool(a), Value::Bool(b)) => return equality_only(op, a == b),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?)?,
    };

    Some(match op {
        ComparisonOp::Equal => ordering == Ordering::Equal,
        ComparisonOp::NotEqual => ordering != Ordering::Equal,
        ComparisonOp::Less => ordering == Ordering::Less,
        ComparisonOp::LessEqual => ordering != Ordering::Greater,
        ComparisonOp::Greater => ordering == Ordering::Greater,
        ComparisonOp::GreaterEqual => ordering != Ordering::Less,
    })
}

/// Strings and booleans only support `=` and `<>`
fn equality_only(op: ComparisonOp, equal: bool) -> Option<bool> {
    match op {
        ComparisonOp::Equal => Some(equal),
        ComparisonOp::NotEqual => Some(!equal),
        _ => None,
    }
}
