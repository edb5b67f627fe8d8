use rust_decimal::Decimal;
use sift_error::{Result, SiftError};

use crate::program::StackKind;
use crate::scalar::ScalarValue;

/// Values of one type. None is null.
#[derive(Debug)]
pub struct TypedStack<T> {
    values: Vec<Option<T>>,
}

impl<T> Default for TypedStack<T> {
    fn default() -> Self {
        TypedStack { values: Vec::new() }
    }
}

impl<T> TypedStack<T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Option<T>) {
        self.values.push(value);
    }

    pub fn pop(&mut self, op: &str) -> Result<Option<T>> {
        let [value] = self.pop_array::<1>(op)?;
        Ok(value)
    }

    /// Pop two values, returned as (left, right).
    pub fn pop_pair(&mut self, op: &str) -> Result<(Option<T>, Option<T>)> {
        let [left, right] = self.pop_array::<2>(op)?;
        Ok((left, right))
    }

    /// Pop two values that must both be non-null.
    pub fn pop_operands(&mut self, op: &str) -> Result<(T, T)> {
        let (left, right) = self.pop_pair(op)?;
        Ok((non_null(left, op)?, non_null(right, op)?))
    }

    /// Pop `n` values, returned in push order.
    pub fn pop_many(&mut self, op: &str, n: usize) -> Result<Vec<Option<T>>> {
        let actual = self.values.len();
        if actual < n {
            return Err(underflow(op, n, actual));
        }
        Ok(self.values.split_off(actual - n))
    }

    fn pop_array<const N: usize>(&mut self, op: &str) -> Result<[Option<T>; N]> {
        let values = self.pop_many(op, N)?;
        <[Option<T>; N]>::try_from(values)
            .map_err(|_| SiftError::execution(format!("Wrong operand count for '{op}'")))
    }

    /// Whether any of the top `n` values is null. None if there are fewer
    /// than `n` values.
    pub fn top_has_null(&self, n: usize) -> Option<bool> {
        let len = self.values.len();
        if len < n {
            return None;
        }
        Some(self.values[len - n..].iter().any(Option::is_none))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

fn underflow(op: &str, required: usize, actual: usize) -> SiftError {
    SiftError::execution(format!("Not enough operands for '{op}'"))
        .with_field("operator", op.to_string())
        .with_field("required", required)
        .with_field("actual", actual)
}

pub fn non_null<T>(value: Option<T>, op: &str) -> Result<T> {
    value.ok_or_else(|| {
        SiftError::execution(format!("Null operand for '{op}'")).with_field("operator", op.to_string())
    })
}

/// The five typed stacks of a frame.
#[derive(Debug, Default)]
pub struct Stacks {
    pub bools: TypedStack<bool>,
    pub ints: TypedStack<i64>,
    pub decimals: TypedStack<Decimal>,
    pub strs: TypedStack<String>,
    pub objects: TypedStack<ScalarValue>,
}

impl Stacks {
    pub fn len(&self, kind: StackKind) -> usize {
        match kind {
            StackKind::Bool => self.bools.len(),
            StackKind::Int => self.ints.len(),
            StackKind::Decimal => self.decimals.len(),
            StackKind::Str => self.strs.len(),
            StackKind::Object => self.objects.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bools.is_empty()
            && self.ints.is_empty()
            && self.decimals.is_empty()
            && self.strs.is_empty()
            && self.objects.is_empty()
    }

    pub fn push_null(&mut self, kind: StackKind) {
        match kind {
            StackKind::Bool => self.bools.push(None),
            StackKind::Int => self.ints.push(None),
            StackKind::Decimal => self.decimals.push(None),
            StackKind::Str => self.strs.push(None),
            StackKind::Object => self.objects.push(None),
        }
    }

    /// Push a value, casting it to the stack's type.
    pub fn push_value(&mut self, kind: StackKind, value: ScalarValue) -> Result<()> {
        if value.is_null() {
            self.push_null(kind);
            return Ok(());
        }

        let value = value.cast(kind.data_type())?;
        match kind {
            StackKind::Bool => self.bools.push(Some(value.try_as_bool()?)),
            StackKind::Int => self.ints.push(Some(value.try_as_i64()?)),
            StackKind::Decimal => self.decimals.push(Some(value.try_as_decimal()?)),
            StackKind::Str => self.strs.push(Some(value.try_into_string()?)),
            StackKind::Object => self.objects.push(Some(value)),
        }
        Ok(())
    }

    pub fn pop_value(&mut self, kind: StackKind, op: &str) -> Result<ScalarValue> {
        Ok(match kind {
            StackKind::Bool => self.bools.pop(op)?.map(ScalarValue::Boolean),
            StackKind::Int => self.ints.pop(op)?.map(ScalarValue::Int64),
            StackKind::Decimal => self.decimals.pop(op)?.map(ScalarValue::Decimal),
            StackKind::Str => self.strs.pop(op)?.map(ScalarValue::Utf8),
            StackKind::Object => self.objects.pop(op)?,
        }
        .unwrap_or_default())
    }

    /// Pop two values of one kind, returned as (left, right).
    pub fn pop_value_pair(
        &mut self,
        kind: StackKind,
        op: &str,
    ) -> Result<(ScalarValue, ScalarValue)> {
        let (left, right) = match kind {
            StackKind::Bool => {
                let (l, r) = self.bools.pop_pair(op)?;
                (l.map(ScalarValue::Boolean), r.map(ScalarValue::Boolean))
            }
            StackKind::Int => {
                let (l, r) = self.ints.pop_pair(op)?;
                (l.map(ScalarValue::Int64), r.map(ScalarValue::Int64))
            }
            StackKind::Decimal => {
                let (l, r) = self.decimals.pop_pair(op)?;
                (l.map(ScalarValue::Decimal), r.map(ScalarValue::Decimal))
            }
            StackKind::Str => {
                let (l, r) = self.strs.pop_pair(op)?;
                (l.map(ScalarValue::Utf8), r.map(ScalarValue::Utf8))
            }
            StackKind::Object => self.objects.pop_pair(op)?,
        };
        Ok((left.unwrap_or_default(), right.unwrap_or_default()))
    }

    /// Pop `n` objects as values, nulls included.
    pub fn pop_objects(&mut self, op: &str, n: usize) -> Result<Vec<ScalarValue>> {
        Ok(self
            .objects
            .pop_many(op, n)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect())
    }

    pub fn push_object(&mut self, value: ScalarValue) {
        if value.is_null() {
            self.objects.push(None);
        } else {
            self.objects.push(Some(value));
        }
    }

    pub fn top_has_null(&self, kind: StackKind, n: usize) -> Option<bool> {
        match kind {
            StackKind::Bool => self.bools.top_has_null(n),
            StackKind::Int => self.ints.top_has_null(n),
            StackKind::Decimal => self.decimals.top_has_null(n),
            StackKind::Str => self.strs.top_has_null(n),
            StackKind::Object => self.objects.top_has_null(n),
        }
    }

    /// Pop `n` values of any null-ness from a stack.
    pub fn discard(&mut self, kind: StackKind, n: usize, op: &str) -> Result<()> {
        for _ in 0..n {
            self.pop_value(kind, op)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bools.clear();
        self.ints.clear();
        self.decimals.clear();
        self.strs.clear();
        self.objects.clear();
    }
}
