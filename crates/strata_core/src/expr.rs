use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{FieldType, Path, StrataError, StrataResult, Timestamp, Value, ValueKind};

/// Runtime value of an expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprValue {
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Text(String),
    Boolean(bool),
    Date(Timestamp),
}

impl ExprValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ExprValue::Integer(_) | ExprValue::Real(_) => ValueKind::Number,
            ExprValue::Decimal(_) => ValueKind::Decimal,
            ExprValue::Text(_) => ValueKind::Text,
            ExprValue::Boolean(_) => ValueKind::Boolean,
            ExprValue::Date(_) => ValueKind::Date,
        }
    }

    pub fn from_value(value: &Value) -> StrataResult<Self> {
        match value {
            Value::Text(text) => Ok(ExprValue::Text(text.clone())),
            Value::Integer(v) => Ok(ExprValue::Integer(*v)),
            Value::Real(v) => Ok(ExprValue::Real(*v)),
            Value::Decimal(v) => Ok(ExprValue::Decimal(*v)),
            Value::Bool(v) => Ok(ExprValue::Boolean(*v)),
            Value::Instant(v) => Ok(ExprValue::Date(*v)),
            Value::Ref(_) | Value::Other(_) => Err(StrataError::type_mismatch(
                "references cannot be used as expression values",
            )),
        }
    }

    /// Converts a computed value into a storable value for `field_type`.
    pub fn into_value(self, field_type: &FieldType) -> StrataResult<Value> {
        let value = match (field_type.kind(), self) {
            (Some(ValueKind::Number), ExprValue::Integer(v)) => Value::Integer(v),
            (Some(ValueKind::Number), ExprValue::Real(v)) => match field_type {
                FieldType::Idouble | FieldType::Udouble => Value::Real(v),
                _ => integral(v)
                    .map(Value::Integer)
                    .ok_or_else(|| StrataError::evaluation(format!("{v} is not an integer")))?,
            },
            (Some(ValueKind::Decimal), ExprValue::Decimal(v)) => Value::Decimal(v),
            (Some(ValueKind::Decimal), ExprValue::Integer(v)) => Value::Decimal(Decimal::from(v)),
            (Some(ValueKind::Text), ExprValue::Text(v)) => Value::Text(v),
            (Some(ValueKind::Boolean), ExprValue::Boolean(v)) => Value::Bool(v),
            (Some(ValueKind::Date), ExprValue::Date(v)) => Value::Instant(v),
            (_, other) => {
                return Err(StrataError::type_mismatch(format!(
                    "{other:?} cannot be stored in a {field_type:?} field"
                )));
            }
        };
        field_type
            .coerce(value)
            .map_err(|err| StrataError::evaluation(err.to_string()))
    }

    pub fn as_bool(&self) -> StrataResult<bool> {
        match self {
            ExprValue::Boolean(v) => Ok(*v),
            other => Err(StrataError::type_mismatch(format!(
                "expected boolean, found {other:?}"
            ))),
        }
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Whether a computed kind can be stored in a field of the given type.
pub fn assignable(kind: ValueKind, field_type: &FieldType) -> bool {
    match (kind, field_type.kind()) {
        (ValueKind::Number, Some(ValueKind::Number | ValueKind::Decimal)) => true,
        (kind, Some(target)) => kind == target,
        (_, None) => false,
    }
}

/// Resolves path operands while evaluating.
pub trait PathLookup {
    fn lookup(&self, path: &Path) -> StrataResult<ExprValue>;
}

/// Resolves path operand types while type checking.
pub trait PathTyper {
    fn path_type(&self, path: &Path) -> StrataResult<FieldType>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(ExprValue),
    Dot(Path),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    Like(Box<Expr>, Box<Expr>),
    Glob(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy)]
enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Expr {
    pub fn dot(path: impl Into<Path>) -> Self {
        Expr::Dot(path.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(ExprValue::Integer(value))
    }

    pub fn real(value: f64) -> Self {
        Expr::Literal(ExprValue::Real(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::Literal(ExprValue::Text(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Expr::Literal(ExprValue::Boolean(value))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Expr::Add(Box::new(lhs), Box::new(rhs))
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Expr::Sub(Box::new(lhs), Box::new(rhs))
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Expr::Mul(Box::new(lhs), Box::new(rhs))
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Expr::Div(Box::new(lhs), Box::new(rhs))
    }

    pub fn modulo(lhs: Expr, rhs: Expr) -> Self {
        Expr::Mod(Box::new(lhs), Box::new(rhs))
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Expr::Eq(Box::new(lhs), Box::new(rhs))
    }

    pub fn ne(lhs: Expr, rhs: Expr) -> Self {
        Expr::Ne(Box::new(lhs), Box::new(rhs))
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Expr::Lt(Box::new(lhs), Box::new(rhs))
    }

    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Expr::Gt(Box::new(lhs), Box::new(rhs))
    }

    pub fn like(lhs: Expr, rhs: Expr) -> Self {
        Expr::Like(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    /// Every path the expression reads, in first-use order.
    pub fn paths(&self) -> Vec<Path> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths(&self, out: &mut Vec<Path>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Dot(path) => {
                if !out.contains(path) {
                    out.push(path.clone());
                }
            }
            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Mul(lhs, rhs)
            | Expr::Div(lhs, rhs)
            | Expr::Mod(lhs, rhs)
            | Expr::Eq(lhs, rhs)
            | Expr::Ne(lhs, rhs)
            | Expr::Lt(lhs, rhs)
            | Expr::Le(lhs, rhs)
            | Expr::Gt(lhs, rhs)
            | Expr::Ge(lhs, rhs)
            | Expr::Like(lhs, rhs)
            | Expr::Glob(lhs, rhs) => {
                lhs.collect_paths(out);
                rhs.collect_paths(out);
            }
            Expr::Not(inner) => inner.collect_paths(out),
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_paths(out);
                }
            }
        }
    }

    pub fn infer(&self, typer: &dyn PathTyper) -> StrataResult<ValueKind> {
        match self {
            Expr::Literal(value) => Ok(value.kind()),
            Expr::Dot(path) => {
                let field_type = typer.path_type(path)?;
                field_type.kind().ok_or_else(|| {
                    StrataError::type_mismatch(format!("path {path} is a reference"))
                })
            }
            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Mul(lhs, rhs)
            | Expr::Div(lhs, rhs) => {
                match (lhs.infer(typer)?, rhs.infer(typer)?) {
                    (ValueKind::Number, ValueKind::Number) => Ok(ValueKind::Number),
                    (ValueKind::Decimal, ValueKind::Decimal | ValueKind::Number)
                    | (ValueKind::Number, ValueKind::Decimal) => Ok(ValueKind::Decimal),
                    (left, right) => Err(StrataError::type_mismatch(format!(
                        "arithmetic on {left:?} and {right:?}"
                    ))),
                }
            }
            Expr::Mod(lhs, rhs) => match (lhs.infer(typer)?, rhs.infer(typer)?) {
                (ValueKind::Number, ValueKind::Number) => Ok(ValueKind::Number),
                (left, right) => Err(StrataError::type_mismatch(format!(
                    "modulus on {left:?} and {right:?}"
                ))),
            },
            Expr::Eq(lhs, rhs) | Expr::Ne(lhs, rhs) => {
                let (left, right) = (lhs.infer(typer)?, rhs.infer(typer)?);
                if comparable(left, right) {
                    Ok(ValueKind::Boolean)
                } else {
                    Err(StrataError::type_mismatch(format!(
                        "cannot compare {left:?} with {right:?}"
                    )))
                }
            }
            Expr::Lt(lhs, rhs) | Expr::Le(lhs, rhs) | Expr::Gt(lhs, rhs) | Expr::Ge(lhs, rhs) => {
                let (left, right) = (lhs.infer(typer)?, rhs.infer(typer)?);
                if comparable(left, right) && left != ValueKind::Boolean {
                    Ok(ValueKind::Boolean)
                } else {
                    Err(StrataError::type_mismatch(format!(
                        "cannot order {left:?} against {right:?}"
                    )))
                }
            }
            Expr::Like(lhs, rhs) | Expr::Glob(lhs, rhs) => {
                match (lhs.infer(typer)?, rhs.infer(typer)?) {
                    (ValueKind::Text, ValueKind::Text) => Ok(ValueKind::Boolean),
                    (left, right) => Err(StrataError::type_mismatch(format!(
                        "pattern match on {left:?} and {right:?}"
                    ))),
                }
            }
            Expr::Not(inner) => match inner.infer(typer)? {
                ValueKind::Boolean => Ok(ValueKind::Boolean),
                other => Err(StrataError::type_mismatch(format!("not on {other:?}"))),
            },
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    let kind = item.infer(typer)?;
                    if kind != ValueKind::Boolean {
                        return Err(StrataError::type_mismatch(format!(
                            "logical operand of kind {kind:?}"
                        )));
                    }
                }
                Ok(ValueKind::Boolean)
            }
        }
    }

    pub fn eval(&self, lookup: &dyn PathLookup) -> StrataResult<ExprValue> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Dot(path) => lookup.lookup(path),
            Expr::Add(lhs, rhs) => arithmetic(Arith::Add, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Sub(lhs, rhs) => arithmetic(Arith::Sub, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Mul(lhs, rhs) => arithmetic(Arith::Mul, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Div(lhs, rhs) => arithmetic(Arith::Div, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Mod(lhs, rhs) => arithmetic(Arith::Mod, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Eq(lhs, rhs) => compare(Compare::Eq, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Ne(lhs, rhs) => compare(Compare::Ne, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Lt(lhs, rhs) => compare(Compare::Lt, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Le(lhs, rhs) => compare(Compare::Le, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Gt(lhs, rhs) => compare(Compare::Gt, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Ge(lhs, rhs) => compare(Compare::Ge, lhs.eval(lookup)?, rhs.eval(lookup)?),
            Expr::Like(lhs, rhs) => pattern_match(lhs.eval(lookup)?, rhs.eval(lookup)?, false),
            Expr::Glob(lhs, rhs) => pattern_match(lhs.eval(lookup)?, rhs.eval(lookup)?, true),
            Expr::Not(inner) => Ok(ExprValue::Boolean(!inner.eval(lookup)?.as_bool()?)),
            Expr::And(items) => {
                for item in items {
                    if !item.eval(lookup)?.as_bool()? {
                        return Ok(ExprValue::Boolean(false));
                    }
                }
                Ok(ExprValue::Boolean(true))
            }
            Expr::Or(items) => {
                for item in items {
                    if item.eval(lookup)?.as_bool()? {
                        return Ok(ExprValue::Boolean(true));
                    }
                }
                Ok(ExprValue::Boolean(false))
            }
        }
    }
}

fn comparable(left: ValueKind, right: ValueKind) -> bool {
    left == right
        || matches!(
            (left, right),
            (ValueKind::Number, ValueKind::Decimal) | (ValueKind::Decimal, ValueKind::Number)
        )
}

fn overflow() -> StrataError {
    StrataError::evaluation("arithmetic overflow")
}

fn zero_divisor() -> StrataError {
    StrataError::evaluation("division by zero")
}

fn arithmetic(op: Arith, lhs: ExprValue, rhs: ExprValue) -> StrataResult<ExprValue> {
    match (lhs, rhs) {
        (ExprValue::Integer(a), ExprValue::Integer(b)) => integer_arithmetic(op, a, b),
        (ExprValue::Integer(a), ExprValue::Real(b)) => real_arithmetic(op, a as f64, b),
        (ExprValue::Real(a), ExprValue::Integer(b)) => real_arithmetic(op, a, b as f64),
        (ExprValue::Real(a), ExprValue::Real(b)) => real_arithmetic(op, a, b),
        (ExprValue::Decimal(a), ExprValue::Decimal(b)) => decimal_arithmetic(op, a, b),
        (ExprValue::Decimal(a), ExprValue::Integer(b)) => {
            decimal_arithmetic(op, a, Decimal::from(b))
        }
        (ExprValue::Integer(a), ExprValue::Decimal(b)) => {
            decimal_arithmetic(op, Decimal::from(a), b)
        }
        (lhs, rhs) => Err(StrataError::type_mismatch(format!(
            "arithmetic on {lhs:?} and {rhs:?}"
        ))),
    }
}

fn integer_arithmetic(op: Arith, a: i64, b: i64) -> StrataResult<ExprValue> {
    let value = match op {
        Arith::Add => a.checked_add(b).ok_or_else(overflow)?,
        Arith::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        Arith::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        Arith::Div => {
            if b == 0 {
                return Err(zero_divisor());
            }
            if a.checked_rem(b).ok_or_else(overflow)? != 0 {
                return Ok(ExprValue::Real(a as f64 / b as f64));
            }
            a.checked_div(b).ok_or_else(overflow)?
        }
        Arith::Mod => {
            if b == 0 {
                return Err(zero_divisor());
            }
            a.checked_rem(b).ok_or_else(overflow)?
        }
    };
    Ok(ExprValue::Integer(value))
}

fn real_arithmetic(op: Arith, a: f64, b: f64) -> StrataResult<ExprValue> {
    let value = match op {
        Arith::Add => a + b,
        Arith::Sub => a - b,
        Arith::Mul => a * b,
        Arith::Div => {
            if b == 0.0 {
                return Err(zero_divisor());
            }
            a / b
        }
        Arith::Mod => {
            return Err(StrataError::type_mismatch(
                "modulus is only defined for integers",
            ));
        }
    };
    if value.is_finite() {
        Ok(ExprValue::Real(value))
    } else {
        Err(overflow())
    }
}

fn decimal_arithmetic(op: Arith, a: Decimal, b: Decimal) -> StrataResult<ExprValue> {
    let value = match op {
        Arith::Add => a.checked_add(b).ok_or_else(overflow)?,
        Arith::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        Arith::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        Arith::Div => {
            if b.is_zero() {
                return Err(zero_divisor());
            }
            a.checked_div(b).ok_or_else(overflow)?
        }
        Arith::Mod => {
            return Err(StrataError::type_mismatch(
                "modulus is only defined for integers",
            ));
        }
    };
    Ok(ExprValue::Decimal(value))
}

fn compare(op: Compare, lhs: ExprValue, rhs: ExprValue) -> StrataResult<ExprValue> {
    let ordering = match (&lhs, &rhs) {
        (ExprValue::Integer(a), ExprValue::Integer(b)) => Some(a.cmp(b)),
        (ExprValue::Integer(a), ExprValue::Real(b)) => (*a as f64).partial_cmp(b),
        (ExprValue::Real(a), ExprValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (ExprValue::Real(a), ExprValue::Real(b)) => a.partial_cmp(b),
        (ExprValue::Decimal(a), ExprValue::Decimal(b)) => Some(a.cmp(b)),
        (ExprValue::Decimal(a), ExprValue::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
        (ExprValue::Integer(a), ExprValue::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
        (ExprValue::Text(a), ExprValue::Text(b)) => Some(a.cmp(b)),
        (ExprValue::Date(a), ExprValue::Date(b)) => Some(a.cmp(b)),
        (ExprValue::Boolean(a), ExprValue::Boolean(b)) => match op {
            Compare::Eq | Compare::Ne => Some(a.cmp(b)),
            _ => {
                return Err(StrataError::type_mismatch("booleans are not ordered"));
            }
        },
        _ => {
            return Err(StrataError::type_mismatch(format!(
                "cannot compare {lhs:?} with {rhs:?}"
            )));
        }
    };
    let Some(ordering) = ordering else {
        return Ok(ExprValue::Boolean(matches!(op, Compare::Ne)));
    };
    let result = match op {
        Compare::Eq => ordering == Ordering::Equal,
        Compare::Ne => ordering != Ordering::Equal,
        Compare::Lt => ordering == Ordering::Less,
        Compare::Le => ordering != Ordering::Greater,
        Compare::Gt => ordering == Ordering::Greater,
        Compare::Ge => ordering != Ordering::Less,
    };
    Ok(ExprValue::Boolean(result))
}

fn pattern_match(value: ExprValue, pattern: ExprValue, case_sensitive: bool) -> StrataResult<ExprValue> {
    match (value, pattern) {
        (ExprValue::Text(value), ExprValue::Text(pattern)) => Ok(ExprValue::Boolean(
            contains_tokens_in_order(&value, &pattern, case_sensitive),
        )),
        (value, pattern) => Err(StrataError::type_mismatch(format!(
            "pattern match on {value:?} and {pattern:?}"
        ))),
    }
}

/// Whitespace-separated search tokens joined by a wildcard, anchored by
/// wildcards on both ends.
fn tokens_joined(search: &str, wildcard: &str) -> String {
    let tokens: Vec<&str> = search.split_whitespace().collect();
    if tokens.is_empty() {
        return wildcard.to_string();
    }
    format!("{wildcard}{}{wildcard}", tokens.join(wildcard))
}

pub fn like_pattern(search: &str) -> String {
    tokens_joined(search, "%")
}

pub fn glob_pattern(search: &str) -> String {
    tokens_joined(search, "*")
}

/// In-memory equivalent of matching against `like_pattern`/`glob_pattern`:
/// every token must occur, in order, without overlapping.
pub fn contains_tokens_in_order(value: &str, search: &str, case_sensitive: bool) -> bool {
    let haystack = if case_sensitive {
        value.to_string()
    } else {
        value.to_ascii_lowercase()
    };
    let mut cursor = 0;
    for token in search.split_whitespace() {
        let needle = if case_sensitive {
            token.to_string()
        } else {
            token.to_ascii_lowercase()
        };
        match haystack[cursor..].find(&needle) {
            Some(found) => cursor += found + needle.len(),
            None => return false,
        }
    }
    true
}
