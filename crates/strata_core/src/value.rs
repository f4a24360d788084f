use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Entity, Id, Operator, StrataError, StrataResult, Timestamp};

/// Declared type of a struct field.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Str,
    Lstr,
    Clob,
    I32,
    U32,
    I64,
    U64,
    Idouble,
    Udouble,
    Idecimal,
    Udecimal,
    Bool,
    Date,
    Time,
    Timestamp,
    /// Reference to an entity of the named struct.
    Other(String),
}

/// Value kinds understood by the expression language.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Number,
    Decimal,
    Text,
    Boolean,
    Date,
}

/// The single payload column a field's values are stored in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StorageColumn {
    Text,
    Integer,
    Real,
}

impl FieldType {
    pub fn storage(&self) -> StorageColumn {
        match self {
            FieldType::Str
            | FieldType::Lstr
            | FieldType::Clob
            | FieldType::Idecimal
            | FieldType::Udecimal => StorageColumn::Text,
            FieldType::I32
            | FieldType::U32
            | FieldType::I64
            | FieldType::U64
            | FieldType::Bool
            | FieldType::Date
            | FieldType::Time
            | FieldType::Timestamp
            | FieldType::Other(_) => StorageColumn::Integer,
            FieldType::Idouble | FieldType::Udouble => StorageColumn::Real,
        }
    }

    /// Expression kind of the field; references have none.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            FieldType::Str | FieldType::Lstr | FieldType::Clob => Some(ValueKind::Text),
            FieldType::I32
            | FieldType::U32
            | FieldType::I64
            | FieldType::U64
            | FieldType::Idouble
            | FieldType::Udouble => Some(ValueKind::Number),
            FieldType::Idecimal | FieldType::Udecimal => Some(ValueKind::Decimal),
            FieldType::Bool => Some(ValueKind::Boolean),
            FieldType::Date | FieldType::Time | FieldType::Timestamp => Some(ValueKind::Date),
            FieldType::Other(_) => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            FieldType::Other(target) => Some(target.as_str()),
            _ => None,
        }
    }

    pub fn is_other(&self) -> bool {
        matches!(self, FieldType::Other(_))
    }

    pub fn supports(&self, op: Operator) -> bool {
        match self {
            FieldType::Str | FieldType::Lstr | FieldType::Clob => true,
            FieldType::I32
            | FieldType::U32
            | FieldType::I64
            | FieldType::U64
            | FieldType::Idouble
            | FieldType::Udouble
            | FieldType::Idecimal
            | FieldType::Udecimal
            | FieldType::Date
            | FieldType::Time
            | FieldType::Timestamp => !matches!(op, Operator::Like | Operator::Glob),
            FieldType::Bool | FieldType::Other(_) => matches!(op, Operator::Eq | Operator::Ne),
        }
    }

    /// Value an unset field evaluates to when no default is declared.
    pub fn zero_value(&self) -> Option<Value> {
        match self {
            FieldType::Str | FieldType::Lstr | FieldType::Clob => Some(Value::Text(String::new())),
            FieldType::I32 | FieldType::U32 | FieldType::I64 | FieldType::U64 => {
                Some(Value::Integer(0))
            }
            FieldType::Idouble | FieldType::Udouble => Some(Value::Real(0.0)),
            FieldType::Idecimal | FieldType::Udecimal => Some(Value::Decimal(Decimal::ZERO)),
            FieldType::Bool => Some(Value::Bool(false)),
            FieldType::Date | FieldType::Time | FieldType::Timestamp => {
                Some(Value::Instant(Timestamp::EPOCH))
            }
            FieldType::Other(_) => None,
        }
    }

    /// Validates `value` against the declared type, normalising numeric
    /// representations (integers written into double/decimal fields).
    pub fn coerce(&self, value: Value) -> StrataResult<Value> {
        let mismatch = |value: &Value| {
            StrataError::type_mismatch(format!("{value:?} is not a valid {self:?} value"))
        };
        match (self, value) {
            (FieldType::Str | FieldType::Lstr | FieldType::Clob, Value::Text(text)) => {
                Ok(Value::Text(text))
            }
            (FieldType::I32, Value::Integer(v)) if i32::try_from(v).is_ok() => {
                Ok(Value::Integer(v))
            }
            (FieldType::U32, Value::Integer(v)) if u32::try_from(v).is_ok() => {
                Ok(Value::Integer(v))
            }
            (FieldType::I64, Value::Integer(v)) => Ok(Value::Integer(v)),
            (FieldType::U64, Value::Integer(v)) if v >= 0 => Ok(Value::Integer(v)),
            (FieldType::Idouble, Value::Real(v)) if !v.is_nan() => Ok(Value::Real(v)),
            (FieldType::Udouble, Value::Real(v)) if v >= 0.0 => Ok(Value::Real(v)),
            (FieldType::Idouble, Value::Integer(v)) => Ok(Value::Real(v as f64)),
            (FieldType::Udouble, Value::Integer(v)) if v >= 0 => Ok(Value::Real(v as f64)),
            (FieldType::Idecimal, Value::Decimal(v)) => Ok(Value::Decimal(v)),
            (FieldType::Udecimal, Value::Decimal(v)) if !v.is_sign_negative() || v.is_zero() => {
                Ok(Value::Decimal(v))
            }
            (FieldType::Idecimal, Value::Integer(v)) => Ok(Value::Decimal(Decimal::from(v))),
            (FieldType::Udecimal, Value::Integer(v)) if v >= 0 => {
                Ok(Value::Decimal(Decimal::from(v)))
            }
            (FieldType::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
            (FieldType::Date | FieldType::Time | FieldType::Timestamp, Value::Instant(v)) => {
                Ok(Value::Instant(v))
            }
            (FieldType::Other(target), Value::Ref(reference))
                if reference.struct_name == *target =>
            {
                Ok(Value::Ref(reference))
            }
            (FieldType::Other(target), Value::Other(entity)) if entity.struct_name == *target => {
                Ok(Value::Other(entity))
            }
            (_, value) => Err(mismatch(&value)),
        }
    }

    pub fn decode(&self, payload: Payload) -> StrataResult<Value> {
        match (self, payload) {
            (FieldType::Str | FieldType::Lstr | FieldType::Clob, Payload::Text(text)) => {
                Ok(Value::Text(text))
            }
            (FieldType::Idecimal | FieldType::Udecimal, Payload::Text(key)) => {
                Ok(Value::Decimal(decimal_from_sort_key(&key)?))
            }
            (FieldType::I32 | FieldType::U32 | FieldType::I64 | FieldType::U64, Payload::Integer(v)) => {
                Ok(Value::Integer(v))
            }
            (FieldType::Bool, Payload::Integer(v)) => Ok(Value::Bool(v != 0)),
            (FieldType::Date | FieldType::Time | FieldType::Timestamp, Payload::Integer(v)) => {
                Ok(Value::Instant(Timestamp(v)))
            }
            (FieldType::Other(target), Payload::Integer(v)) => Ok(Value::Ref(EntityRef {
                struct_name: target.clone(),
                id: Id(v),
            })),
            (FieldType::Idouble | FieldType::Udouble, Payload::Real(v)) => Ok(Value::Real(v)),
            (field_type, payload) => Err(StrataError::storage(format!(
                "stored payload {payload:?} does not match field type {field_type:?}"
            ))),
        }
    }
}

/// Pointer to a stored entity without its field values.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub struct_name: String,
    pub id: Id,
}

impl EntityRef {
    pub fn new(struct_name: impl Into<String>, id: Id) -> Self {
        Self {
            struct_name: struct_name.into(),
            id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Bool(bool),
    Instant(Timestamp),
    Ref(EntityRef),
    /// A nested entity graph reached through a reference field.
    Other(Box<Entity>),
}

impl Value {
    /// Target of a reference value, loaded or not.
    pub fn as_ref_target(&self) -> Option<EntityRef> {
        match self {
            Value::Ref(reference) => Some(reference.clone()),
            Value::Other(entity) => entity
                .id
                .map(|id| EntityRef::new(entity.struct_name.clone(), id)),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Other(entity) => Some(entity),
            _ => None,
        }
    }

    /// Equality where references compare by target only.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self.as_ref_target(), other.as_ref_target()) {
            (Some(left), Some(right)) => left == right,
            (None, None) => self == other,
            _ => false,
        }
    }

    pub fn to_payload(&self) -> StrataResult<Payload> {
        match self {
            Value::Text(text) => Ok(Payload::Text(text.clone())),
            Value::Integer(v) => Ok(Payload::Integer(*v)),
            Value::Real(v) => Ok(Payload::Real(*v)),
            Value::Decimal(v) => Ok(Payload::Text(decimal_sort_key(v))),
            Value::Bool(v) => Ok(Payload::Integer(i64::from(*v))),
            Value::Instant(v) => Ok(Payload::Integer(v.0)),
            Value::Ref(reference) => Ok(Payload::Integer(reference.id.0)),
            Value::Other(entity) => entity.id.map(|id| Payload::Integer(id.0)).ok_or_else(|| {
                StrataError::invalid(format!(
                    "nested {} entity has not been written",
                    entity.struct_name
                ))
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Instant(value)
    }
}

impl From<EntityRef> for Value {
    fn from(value: EntityRef) -> Self {
        Value::Ref(value)
    }
}

impl From<Entity> for Value {
    fn from(value: Entity) -> Self {
        Value::Other(Box::new(value))
    }
}

/// A stored field value: exactly one payload column is populated.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl Payload {
    pub fn column(&self) -> StorageColumn {
        match self {
            Payload::Text(_) => StorageColumn::Text,
            Payload::Integer(_) => StorageColumn::Integer,
            Payload::Real(_) => StorageColumn::Real,
        }
    }
}

const DECIMAL_INT_DIGITS: usize = 29;
const DECIMAL_FRAC_DIGITS: usize = 28;

/// Fixed-width key whose lexicographic order equals numeric order, so
/// decimals compare exactly inside SQL.
pub fn decimal_sort_key(value: &Decimal) -> String {
    let normalized = value.normalize();
    let negative = normalized.is_sign_negative() && !normalized.is_zero();
    let text = normalized.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let mut digits = String::with_capacity(DECIMAL_INT_DIGITS + DECIMAL_FRAC_DIGITS);
    digits.push_str(&"0".repeat(DECIMAL_INT_DIGITS.saturating_sub(int_part.len())));
    digits.push_str(int_part);
    digits.push_str(frac_part);
    digits.push_str(&"0".repeat(DECIMAL_FRAC_DIGITS.saturating_sub(frac_part.len())));
    if negative {
        let complement: String = digits
            .chars()
            .map(|digit| match digit.to_digit(10) {
                Some(d) => char::from(b'0' + (9 - d) as u8),
                None => digit,
            })
            .collect();
        format!("0{complement}")
    } else {
        format!("1{digits}")
    }
}

pub fn decimal_from_sort_key(key: &str) -> StrataResult<Decimal> {
    let invalid = || StrataError::storage(format!("invalid decimal key '{key}'"));
    if key.len() != 1 + DECIMAL_INT_DIGITS + DECIMAL_FRAC_DIGITS || !key.is_ascii() {
        return Err(invalid());
    }
    let (sign, body) = key.split_at(1);
    let negative = match sign {
        "0" => true,
        "1" => false,
        _ => return Err(invalid()),
    };
    let digits: String = if negative {
        body.chars()
            .map(|digit| match digit.to_digit(10) {
                Some(d) => char::from(b'0' + (9 - d) as u8),
                None => digit,
            })
            .collect()
    } else {
        body.to_string()
    };
    let (int_part, frac_part) = digits.split_at(DECIMAL_INT_DIGITS);
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let mut text = String::new();
    if negative {
        text.push('-');
    }
    text.push_str(if int_part.is_empty() { "0" } else { int_part });
    if !frac_part.is_empty() {
        text.push('.');
        text.push_str(frac_part);
    }
    Decimal::from_str(&text).map_err(|_| invalid())
}
