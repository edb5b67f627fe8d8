use rust_decimal::Decimal;
use sift_error::{Result, SiftError};
use sift_parser::ast::BinaryOperator;
use sift_parser::datatype::DataType;

use super::{FunctionInfo, Signature};
use crate::scalar::{ScalarValue, arithmetic};

pub trait AggregateFunction: FunctionInfo {
    /// Whether `Func(*)` is accepted.
    fn accepts_star(&self) -> bool {
        false
    }

    /// Create a fresh accumulator for a group.
    fn new_accumulator(&self) -> Accumulator;
}

pub static BUILTIN_AGGREGATE_FUNCTIONS: &[&dyn AggregateFunction] =
    &[&Count, &Sum, &Avg, &Min, &Max];

/// Per-group aggregate state.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count(i64),
    Sum(ScalarValue),
    Avg { sum: Decimal, count: i64 },
    Min(ScalarValue),
    Max(ScalarValue),
}

impl Accumulator {
    /// Fold a value into the state. Nulls are ignored.
    pub fn update(&mut self, value: &ScalarValue) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }

        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(sum) => {
                *sum = if sum.is_null() {
                    if value.datatype().is_some_and(|t| t.is_numeric()) {
                        value.clone()
                    } else {
                        return Err(SiftError::execution(format!(
                            "Cannot sum non-numeric value {value}"
                        )));
                    }
                } else {
                    arithmetic(BinaryOperator::Plus, sum, value)?
                };
            }
            Self::Avg { sum, count } => {
                *sum = sum
                    .checked_add(value.try_as_decimal()?)
                    .ok_or_else(|| SiftError::execution("Decimal overflow in Avg"))?;
                *count += 1;
            }
            Self::Min(current) => {
                if current.is_null() || value.sort_cmp(current).is_lt() {
                    *current = value.clone();
                }
            }
            Self::Max(current) => {
                if current.is_null() || value.sort_cmp(current).is_gt() {
                    *current = value.clone();
                }
            }
        }

        Ok(())
    }

    /// Final value of the aggregate.
    pub fn finalize(&self) -> Result<ScalarValue> {
        Ok(match self {
            Self::Count(n) => ScalarValue::Int64(*n),
            Self::Sum(sum) => sum.clone(),
            Self::Avg { count: 0, .. } => ScalarValue::Null,
            Self::Avg { sum, count } => ScalarValue::Decimal(
                sum.checked_div(Decimal::from(*count))
                    .ok_or_else(|| SiftError::execution("Decimal overflow in Avg"))?,
            ),
            Self::Min(v) | Self::Max(v) => v.clone(),
        })
    }
}

/// `Count(expr)` counts non-null values, `Count(*)` counts rows.
#[derive(Debug, Clone, Copy)]
pub struct Count;

impl FunctionInfo for Count {
    fn name(&self) -> &'static str {
        "Count"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[Signature::new(&[DataType::Any], DataType::Int64)] }
    }
}

impl AggregateFunction for Count {
    fn accepts_star(&self) -> bool {
        true
    }

    fn new_accumulator(&self) -> Accumulator {
        Accumulator::Count(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sum;

impl FunctionInfo for Sum {
    fn name(&self) -> &'static str {
        "Sum"
    }

    fn signatures(&self) -> &'static [Signature] {
        const {
            &[
                Signature::new(&[DataType::Int64], DataType::Int64),
                Signature::new(&[DataType::Decimal], DataType::Decimal),
                Signature::new(&[DataType::Any], DataType::Any),
            ]
        }
    }
}

impl AggregateFunction for Sum {
    fn new_accumulator(&self) -> Accumulator {
        Accumulator::Sum(ScalarValue::Null)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Avg;

impl FunctionInfo for Avg {
    fn name(&self) -> &'static str {
        "Avg"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[Signature::new(&[DataType::Decimal], DataType::Decimal)] }
    }
}

impl AggregateFunction for Avg {
    fn new_accumulator(&self) -> Accumulator {
        Accumulator::Avg {
            sum: Decimal::ZERO,
            count: 0,
        }
    }
}

macro_rules! min_max_function {
    ($name:ident, $display:literal, $variant:ident) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl FunctionInfo for $name {
            fn name(&self) -> &'static str {
                $display
            }

            fn signatures(&self) -> &'static [Signature] {
                const { &[Signature::new(&[DataType::Any], DataType::Any)] }
            }

            /// Same type as the input.
            fn return_type(&self, inputs: &[DataType]) -> Result<DataType> {
                match inputs {
                    [t] if *t != DataType::Struct => Ok(*t),
                    _ => Err(SiftError::semantic(format!(
                        "{} expects one comparable argument",
                        $display
                    ))
                    .with_field("function", $display)),
                }
            }
        }

        impl AggregateFunction for $name {
            fn new_accumulator(&self) -> Accumulator {
                Accumulator::$variant(ScalarValue::Null)
            }
        }
    };
}

min_max_function!(Min, "Min", Min);
min_max_function!(Max, "Max", Max);
