use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use sift_error::{Result, SiftError};
use sift_parser::ast::{BinaryOperator, Literal};
use sift_parser::datatype::DataType;
use sift_parser::escape::escape;

/// Fields of a structured value, ordered by name.
pub type StructFields = BTreeMap<String, ScalarValue>;

/// A single value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScalarValue {
    #[default]
    Null,
    Boolean(bool),
    Int64(i64),
    Decimal(Decimal),
    Utf8(String),
    /// Nested document value. Shared since rows get copied around a lot
    /// during joins and grouping.
    Struct(Arc<StructFields>),
}

impl ScalarValue {
    /// Data type of this value, None if null.
    pub fn datatype(&self) -> Option<DataType> {
        Some(match self {
            Self::Null => return None,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int64(_) => DataType::Int64,
            Self::Decimal(_) => DataType::Decimal,
            Self::Utf8(_) => DataType::Utf8,
            Self::Struct(_) => DataType::Struct,
        })
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn from_literal(lit: &Literal) -> Result<Self> {
        Ok(match lit {
            Literal::Null => Self::Null,
            Literal::Boolean(b) => Self::Boolean(*b),
            Literal::Integer(i) => Self::Int64(*i),
            Literal::Decimal(s) => Self::Decimal(
                Decimal::from_str(s)
                    .map_err(|e| {
                        SiftError::semantic(format!("Invalid decimal literal '{s}'"))
                            .with_source(Box::new(e))
                    })?,
            ),
            Literal::String(s) => Self::Utf8(s.clone()),
        })
    }

    pub fn new_struct<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ScalarValue)>,
        K: Into<String>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Struct(Arc::new(fields))
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            other => Err(SiftError::execution(format!("Not a bool: {other}"))),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Self::Int64(i) => Ok(*i),
            other => Err(SiftError::execution(format!("Not an integer: {other}"))),
        }
    }

    pub fn try_as_usize(&self) -> Result<usize> {
        let i = self.try_as_i64()?;
        usize::try_from(i).map_err(|_| SiftError::execution(format!("Not a usize: {i}")))
    }

    /// Get this value as a decimal, widening integers.
    pub fn try_as_decimal(&self) -> Result<Decimal> {
        match self {
            Self::Decimal(d) => Ok(*d),
            Self::Int64(i) => Ok(Decimal::from(*i)),
            other => Err(SiftError::execution(format!("Not a decimal: {other}"))),
        }
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(SiftError::execution(format!("Not a string: {other}"))),
        }
    }

    pub fn try_into_string(self) -> Result<String> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(SiftError::execution(format!("Not a string: {other}"))),
        }
    }

    /// Look up a field on a struct value, case insensitive when there's no
    /// exact match.
    ///
    /// Accessing a missing field, or any field on null, produces null.
    pub fn property(&self, name: &str) -> Result<ScalarValue> {
        match self {
            Self::Null => Ok(Self::Null),
            Self::Struct(fields) => {
                if let Some(v) = fields.get(name) {
                    return Ok(v.clone());
                }
                Ok(fields
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Self::Null))
            }
            other => Err(SiftError::execution(format!(
                "Cannot access property '{name}' on non-struct value {other}"
            ))),
        }
    }

    /// Equality used for keys, joins and IN lists. Integers and decimals
    /// compare by numeric value, null only equals null.
    pub fn key_eq(&self, other: &ScalarValue) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Int64(a), Self::Decimal(b)) | (Self::Decimal(b), Self::Int64(a)) => {
                Decimal::from(*a) == *b
            }
            (a, b) => a == b,
        }
    }

    /// Hash consistent with `key_eq`.
    pub fn key_hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Int64(i) => {
                2u8.hash(state);
                Decimal::from(*i).normalize().hash(state);
            }
            Self::Decimal(d) => {
                2u8.hash(state);
                d.normalize().hash(state);
            }
            Self::Utf8(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Struct(fields) => {
                4u8.hash(state);
                for (k, v) in fields.iter() {
                    k.hash(state);
                    v.key_hash(state);
                }
            }
        }
    }

    /// Compare two non-null values of compatible types.
    ///
    /// Returns None if either side is null or the types can't be compared.
    pub fn partial_compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Self::Decimal(a), Self::Int64(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting. Nulls sort first, values of different
    /// types are ordered by type.
    pub fn sort_cmp(&self, other: &ScalarValue) -> Ordering {
        if let Some(ord) = self.partial_compare(other) {
            return ord;
        }
        self.sort_rank().cmp(&other.sort_rank())
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Int64(_) | Self::Decimal(_) => 2,
            Self::Utf8(_) => 3,
            Self::Struct(_) => 4,
        }
    }

    /// Convert this value to the given type. Null converts to null.
    pub fn cast(self, to: DataType) -> Result<ScalarValue> {
        Ok(match (self, to) {
            (Self::Null, _) => Self::Null,
            (v, DataType::Any) => v,
            (Self::Boolean(b), DataType::Boolean) => Self::Boolean(b),
            (Self::Int64(i), DataType::Int64) => Self::Int64(i),
            (Self::Int64(i), DataType::Decimal) => Self::Decimal(Decimal::from(i)),
            (Self::Decimal(d), DataType::Decimal) => Self::Decimal(d),
            (Self::Decimal(d), DataType::Int64) => Self::Int64(
                i64::try_from(d.trunc())
                    .map_err(|_| SiftError::execution(format!("Decimal {d} out of range")))?,
            ),
            (Self::Utf8(s), DataType::Utf8) => Self::Utf8(s),
            (Self::Utf8(s), DataType::Int64) => Self::Int64(s.trim().parse().map_err(|_| {
                SiftError::execution(format!("Cannot convert '{s}' to {}", DataType::Int64))
            })?),
            (Self::Utf8(s), DataType::Decimal) => {
                Self::Decimal(Decimal::from_str(s.trim()).map_err(|_| {
                    SiftError::execution(format!("Cannot convert '{s}' to {}", DataType::Decimal))
                })?)
            }
            (Self::Utf8(s), DataType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Self::Boolean(true),
                "false" => Self::Boolean(false),
                _ => {
                    return Err(SiftError::execution(format!(
                        "Cannot convert '{s}' to {}",
                        DataType::Boolean
                    )));
                }
            },
            (v, DataType::Utf8) => Self::Utf8(v.to_string()),
            (Self::Struct(s), DataType::Struct) => Self::Struct(s),
            (v, to) => {
                return Err(SiftError::execution(format!(
                    "Cannot convert {v} to {to}"
                )));
            }
        })
    }
}

/// Apply an arithmetic operator to two values whose types are only known at
/// runtime.
pub fn arithmetic(op: BinaryOperator, left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    match (left, right) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => Ok(ScalarValue::Null),
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Ok(ScalarValue::Int64(int_op(op, *a, *b)?)),
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) if op == BinaryOperator::Plus => {
            Ok(ScalarValue::Utf8(format!("{a}{b}")))
        }
        (a, b) => {
            let (a, b) = match (a.try_as_decimal(), b.try_as_decimal()) {
                (Ok(a), Ok(b)) => (a, b),
                _ => {
                    return Err(SiftError::execution(format!(
                        "Cannot apply '{}' to {a} and {b}",
                        op.symbol()
                    ))
                    .with_field("operator", op.symbol()));
                }
            };
            Ok(ScalarValue::Decimal(decimal_op(op, a, b)?))
        }
    }
}

pub fn int_op(op: BinaryOperator, a: i64, b: i64) -> Result<i64> {
    let out = match op {
        BinaryOperator::Plus => a.checked_add(b),
        BinaryOperator::Minus => a.checked_sub(b),
        BinaryOperator::Multiply => a.checked_mul(b),
        BinaryOperator::Divide => {
            if b == 0 {
                return Err(division_by_zero(op));
            }
            a.checked_div(b)
        }
        BinaryOperator::Modulo => {
            if b == 0 {
                return Err(division_by_zero(op));
            }
            a.checked_rem(b)
        }
    };
    out.ok_or_else(|| {
        SiftError::execution(format!("Integer overflow: {a} {} {b}", op.symbol()))
            .with_field("operator", op.symbol())
    })
}

pub fn decimal_op(op: BinaryOperator, a: Decimal, b: Decimal) -> Result<Decimal> {
    let out = match op {
        BinaryOperator::Plus => a.checked_add(b),
        BinaryOperator::Minus => a.checked_sub(b),
        BinaryOperator::Multiply => a.checked_mul(b),
        BinaryOperator::Divide => {
            if b.is_zero() {
                return Err(division_by_zero(op));
            }
            a.checked_div(b)
        }
        BinaryOperator::Modulo => {
            if b.is_zero() {
                return Err(division_by_zero(op));
            }
            a.checked_rem(b)
        }
    };
    out.ok_or_else(|| {
        SiftError::execution(format!("Decimal overflow: {a} {} {b}", op.symbol()))
            .with_field("operator", op.symbol())
    })
}

fn division_by_zero(op: BinaryOperator) -> SiftError {
    SiftError::execution("Division by zero").with_field("operator", op.symbol())
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Utf8(s) => write!(f, "{s}"),
            Self::Struct(fields) => {
                write!(f, "{{")?;
                for (idx, (k, v)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    match v {
                        Self::Utf8(s) => write!(f, "{k}: '{}'", escape(s))?,
                        other => write!(f, "{k}: {other}")?,
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<usize> for ScalarValue {
    fn from(value: usize) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<Decimal> for ScalarValue {
    fn from(value: Decimal) -> Self {
        ScalarValue::Decimal(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => ScalarValue::Null,
        }
    }
}
