//! Hand-written recursive-descent parser and evaluator for the `custom`
//! alert rule kind's boolean expression grammar.
//!
//! Grammar (operator precedence lowest to highest):
//!   expr       := or_expr
//!   or_expr    := and_expr ("or" and_expr)*
//!   and_expr   := unary ("and" unary)*
//!   unary      := "not" unary | comparison
//!   comparison := operand ("==" | "!=" | "<" | "<=" | ">" | ">=") operand
//!              |  "(" expr ")"
//!   operand    := number | "true" | "false" | identifier
//!
//! No function calls, no string operators, no property access — an
//! identifier resolves directly to `speed`, `ignition`, `satellites`,
//! `altitude`, or a bare key in the position's `sensors` map. Unknown
//! identifiers resolve to null at evaluation time, and a comparison
//! involving null is always false; validation at parse time only rejects
//! expressions that do not match the grammar's shape, since sensor keys
//! are protocol-dependent and not enumerable ahead of time.

use crate::error::ExpressionError;
use telemetry_types::NormalizedPosition;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(&'static str),
    LParen,
    RParen,
    And,
    Or,
    Not,
}

fn lex(input: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push((start, Token::Op("==")));
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push((start, Token::Op("!=")));
                i += 2;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((start, Token::Op("<=")));
                    i += 2;
                } else {
                    tokens.push((start, Token::Op("<")));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((start, Token::Op(">=")));
                    i += 2;
                } else {
                    tokens.push((start, Token::Op(">")));
                    i += 1;
                }
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut j = i + 1;
                while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b'.') {
                    j += 1;
                }
                let text = &input[i..j];
                let value: f64 = text
                    .parse()
                    .map_err(|_| ExpressionError::Parse { offset: start, message: format!("bad number literal '{text}'") })?;
                tokens.push((start, Token::Number(value)));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                let word = &input[i..j];
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((start, token));
                i = j;
            }
            other => {
                return Err(ExpressionError::Parse { offset: start, message: format!("unexpected character '{other}'") });
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Ident(String),
    Number(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare { left: Operand, op: &'static str, right: Operand },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(usize::MAX)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and_expr()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let inner = self.expr()?;
            match self.advance() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(ExpressionError::Parse { offset: self.offset(), message: "expected ')'".into() }),
            }
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.operand()?;
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            _ => return Err(ExpressionError::Parse { offset: self.offset(), message: "expected comparison operator".into() }),
        };
        let right = self.operand()?;
        Ok(Expr::Compare { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, ExpressionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Ident(id)) => match id.as_str() {
                "true" => Ok(Operand::Bool(true)),
                "false" => Ok(Operand::Bool(false)),
                _ => Ok(Operand::Ident(id)),
            },
            _ => Err(ExpressionError::Parse { offset: self.offset(), message: "expected an operand".into() }),
        }
    }
}

/// Parses and validates a custom rule expression. Parse-time validation
/// only checks grammar shape — an identifier that does not resolve to a
/// known field evaluates to "unmatched" at runtime rather than failing to
/// parse, since sensor keys are protocol-dependent and not enumerable here.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Parse { offset: 0, message: "empty expression".into() });
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExpressionError::Parse { offset: parser.offset(), message: "trailing tokens after expression".into() });
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
    Missing,
}

/// Resolves a bare identifier against the position's fixed fields first
/// (`speed`, `ignition`, `satellites`, `altitude`), then its `sensors` map
/// by the same bare name — there is no dotted or prefixed form, per the
/// "no property access" grammar rule.
fn resolve(position: &NormalizedPosition, ident: &str) -> Value {
    match ident {
        "speed" => Value::Number(position.speed_kmh),
        "altitude" => Value::Number(position.altitude_m),
        "satellites" => Value::Number(position.satellites as f64),
        "ignition" => position.ignition.map(Value::Bool).unwrap_or(Value::Missing),
        other => match position.sensors.get(other) {
            Some(telemetry_types::SensorValue::Bool(b)) => Value::Bool(*b),
            Some(telemetry_types::SensorValue::Int(i)) => Value::Number(*i as f64),
            Some(telemetry_types::SensorValue::Float(f)) => Value::Number(*f),
            None => Value::Missing,
        },
    }
}

fn operand_value(position: &NormalizedPosition, operand: &Operand) -> Value {
    match operand {
        Operand::Ident(id) => resolve(position, id),
        Operand::Number(n) => Value::Number(*n),
        Operand::Bool(b) => Value::Bool(*b),
    }
}

fn compare(op: &str, left: Value, right: Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match op {
            "==" => l == r,
            "!=" => l != r,
            "<" => l < r,
            "<=" => l <= r,
            ">" => l > r,
            ">=" => l >= r,
            _ => false,
        },
        (Value::Bool(l), Value::Bool(r)) => match op {
            "==" => l == r,
            "!=" => l != r,
            _ => false,
        },
        _ => false, // a comparison involving a null/missing identifier is always false
    }
}

pub fn evaluate(expr: &Expr, position: &NormalizedPosition) -> bool {
    match expr {
        Expr::Compare { left, op, right } => {
            compare(op, operand_value(position, left), operand_value(position, right))
        }
        Expr::And(a, b) => evaluate(a, position) && evaluate(b, position),
        Expr::Or(a, b) => evaluate(a, position) || evaluate(b, position),
        Expr::Not(inner) => !evaluate(inner, position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_types::{ProtocolKind, SensorValue};

    fn sample(speed: f64, ignition: Option<bool>) -> NormalizedPosition {
        let mut sensors = telemetry_types::Sensors::new();
        sensors.insert("battery_voltage".into(), SensorValue::Int(11800));
        NormalizedPosition {
            device_identifier: "dev".into(),
            protocol: ProtocolKind::Teltonika,
            timestamp: chrono::Utc::now(),
            latitude: 0.0,
            longitude: 0.0,
            speed_kmh: speed,
            course_deg: 0.0,
            altitude_m: 0.0,
            satellites: 0,
            ignition,
            sensors,
        }
    }

    #[test]
    fn parses_and_evaluates_simple_comparison() {
        let expr = parse("speed > 100").unwrap();
        assert!(evaluate(&expr, &sample(120.0, None)));
        assert!(!evaluate(&expr, &sample(50.0, None)));
    }

    #[test]
    fn parses_and_combinators_with_parens() {
        let expr = parse("(speed > 100 AND ignition == true) OR speed > 200").unwrap();
        assert!(evaluate(&expr, &sample(150.0, Some(true))));
        assert!(!evaluate(&expr, &sample(150.0, Some(false))));
        assert!(evaluate(&expr, &sample(250.0, Some(false))));
    }

    #[test]
    fn resolves_sensor_fields_by_bare_name() {
        let expr = parse("battery_voltage < 12000").unwrap();
        assert!(evaluate(&expr, &sample(0.0, None)));
    }

    #[test]
    fn unknown_identifier_is_null_and_never_compares_true() {
        let expr = parse("nonexistent_field == 1").unwrap();
        assert!(!evaluate(&expr, &sample(0.0, None)));
    }

    #[test]
    fn not_negates_inner_expression() {
        let expr = parse("NOT ignition == true").unwrap();
        assert!(evaluate(&expr, &sample(0.0, Some(false))));
        assert!(!evaluate(&expr, &sample(0.0, Some(true))));
    }

    #[test]
    fn rejects_malformed_expression_at_parse_time() {
        assert!(parse("speed >").is_err());
        assert!(parse("speed 100").is_err());
        assert!(parse("(speed > 100").is_err());
        assert!(parse("speed = 100").is_err()); // single '=' is not in the grammar
    }
}
