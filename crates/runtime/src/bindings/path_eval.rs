//! Reference evaluator for variable-path expressions.
//!
//! Grammar:
//!
//! ```text
//! expr    := literal | list | call | path
//! literal := INT | DECIMAL | 'text' | "text" | true | false | null
//! list    := '[' (expr (',' expr)*)? ']'
//! call    := ('len' | 'prop') '(' expr ')'
//! path    := IDENT ( '.' IDENT | '[' INT ']' | '[' '*' ']' )*
//! ```
//!
//! `[*]` projects the rest of the path over every list element, so
//! `branches_context[*].name` yields the `name` of every branch result.

use std::iter::Peekable;
use std::str::{Chars, FromStr};

use lanes_core::{Output, Value, Variables};
use rust_decimal::Decimal;

use super::{ContextView, ExpressionEvaluator};
use crate::error::BindingError;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Dot,
    Comma,
    Star,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(i64),
    All,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Call { name: String, arg: Box<Expr> },
    Path { root: String, segments: Vec<Segment> },
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '[' | ']' | '(' | ')' | '.' | ',' | '*' => {
                chars.next();
                tokens.push(match c {
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '.' => Token::Dot,
                    ',' => Token::Comma,
                    _ => Token::Star,
                });
            }
            '\'' | '"' => {
                chars.next();
                tokens.push(Token::Text(read_quoted(&mut chars, c)?));
            }
            c if c.is_ascii_digit() || c == '-' => tokens.push(read_number(&mut chars)?),
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, String> {
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => text.push(escaped),
                None => break,
            },
            c if c == quote => return Ok(text),
            c => text.push(c),
        }
    }
    Err("unterminated string literal".to_string())
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Result<Token, String> {
    let mut repr = String::new();
    if chars.peek() == Some(&'-') {
        repr.push('-');
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            repr.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if repr.contains('.') {
        Decimal::from_str(&repr)
            .map(Token::Decimal)
            .map_err(|e| format!("invalid decimal '{}': {}", repr, e))
    } else {
        repr.parse::<i64>()
            .map(Token::Int)
            .map_err(|e| format!("invalid integer '{}': {}", repr, e))
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of input", expected)),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Decimal(d)) => Ok(Expr::Literal(Value::Decimal(d))),
            Some(Token::Text(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::LBracket) => self.parse_list(),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.next();
                    let arg = self.parse_expr()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call {
                        name,
                        arg: Box::new(arg),
                    })
                }
                _ => self.parse_path(name),
            },
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("empty expression".to_string()),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, String> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RBracket) {
            self.next();
            return Ok(Expr::List(items));
        }
        loop {
            items.push(self.parse_expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => return Ok(Expr::List(items)),
                other => return Err(format!("expected ',' or ']' in list, found {:?}", other)),
            }
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, String> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(field)) => segments.push(Segment::Field(field)),
                        other => return Err(format!("expected field name, found {:?}", other)),
                    }
                }
                Some(Token::LBracket) => {
                    self.next();
                    match self.next() {
                        Some(Token::Star) => segments.push(Segment::All),
                        Some(Token::Int(i)) => segments.push(Segment::Index(i)),
                        other => return Err(format!("expected index or '*', found {:?}", other)),
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(Expr::Path { root, segments }),
            }
        }
    }
}

fn parse(source: &str) -> Result<Expr, BindingError> {
    let syntax = |message: String| BindingError::Syntax {
        expression: source.to_string(),
        message,
    };
    let tokens = tokenize(source).map_err(syntax)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr().map_err(syntax)?;
    if let Some(extra) = parser.peek() {
        return Err(syntax(format!("unexpected trailing {:?}", extra)));
    }
    Ok(expr)
}

/// Evaluator for literals, variable paths, `len(..)` and `prop('name')`
/// (system property lookup).
#[derive(Debug, Default, Clone, Copy)]
pub struct PathEvaluator;

impl PathEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn eval(
        &self,
        expr: &Expr,
        view: &ContextView<'_>,
        props: &Variables,
        source: &str,
    ) -> Result<Value, BindingError> {
        let type_error = |message: String| BindingError::Type {
            expression: source.to_string(),
            message,
        };
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item, view, props, source))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Path { root, segments } => {
                let value = view
                    .lookup(root)
                    .ok_or_else(|| BindingError::UnboundVariable {
                        name: root.clone(),
                        expression: source.to_string(),
                    })?;
                apply_segments(value, segments).map_err(type_error)
            }
            Expr::Call { name, arg } => {
                let value = self.eval(arg, view, props, source)?;
                match (name.as_str(), &value) {
                    ("len", Value::List(items)) => Ok(Value::Int(items.len() as i64)),
                    ("len", Value::Map(entries)) => Ok(Value::Int(entries.len() as i64)),
                    ("len", Value::Text(s)) => Ok(Value::Int(s.chars().count() as i64)),
                    ("len", other) => Err(type_error(format!(
                        "len() expects List, Map or Text, got {}",
                        other.type_name()
                    ))),
                    ("prop", Value::Text(key)) => Ok(props.get(key).cloned().unwrap_or_default()),
                    ("prop", other) => Err(type_error(format!(
                        "prop() expects Text, got {}",
                        other.type_name()
                    ))),
                    (unknown, _) => Err(BindingError::Syntax {
                        expression: source.to_string(),
                        message: format!("unknown function '{}'", unknown),
                    }),
                }
            }
        }
    }
}

fn apply_segments(value: &Value, segments: &[Segment]) -> Result<Value, String> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };
    match (segment, value) {
        (Segment::Field(name), Value::Map(entries)) => {
            apply_segments(entries.get(name).unwrap_or(&NULL), rest)
        }
        (Segment::Field(_), Value::Null) => Ok(Value::Null),
        (Segment::Field(name), other) => Err(format!(
            "cannot read field '{}' of {}",
            name,
            other.type_name()
        )),
        (Segment::Index(i), Value::List(items)) => {
            let len = items.len() as i64;
            let idx = if *i < 0 { len + i } else { *i };
            let item = usize::try_from(idx)
                .ok()
                .and_then(|idx| items.get(idx))
                .ok_or_else(|| format!("index {} out of range for list of {}", i, len))?;
            apply_segments(item, rest)
        }
        (Segment::All, Value::List(items)) => items
            .iter()
            .map(|item| apply_segments(item, rest))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (_, other) => Err(format!("cannot index into {}", other.type_name())),
    }
}

impl ExpressionEvaluator for PathEvaluator {
    fn evaluate_iterable(
        &self,
        expression: &str,
        view: &ContextView<'_>,
        system_properties: &Variables,
    ) -> Result<Vec<Value>, BindingError> {
        match self.evaluate_scalar(expression, view, system_properties)? {
            Value::List(items) => Ok(items),
            // Comma-separated text splits into trimmed items.
            Value::Text(s) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(Value::text)
                .collect()),
            other => Err(BindingError::Type {
                expression: expression.to_string(),
                message: format!("expected List or Text to iterate, got {}", other.type_name()),
            }),
        }
    }

    fn evaluate_scalar(
        &self,
        expression: &str,
        view: &ContextView<'_>,
        system_properties: &Variables,
    ) -> Result<Value, BindingError> {
        let expr = parse(expression)?;
        self.eval(&expr, view, system_properties, expression)
    }

    fn bind_publish(
        &self,
        outputs: &[Output],
        view: &ContextView<'_>,
        system_properties: &Variables,
    ) -> Result<Variables, BindingError> {
        outputs
            .iter()
            .map(|output| {
                self.evaluate_scalar(output.expression(), view, system_properties)
                    .map(|value| (output.name.clone(), value))
            })
            .collect()
    }
}
