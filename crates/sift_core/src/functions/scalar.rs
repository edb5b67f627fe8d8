use rust_decimal::RoundingStrategy;
use sift_error::{Result, SiftError};
use sift_parser::datatype::DataType;

use super::{FunctionInfo, Signature};
use crate::scalar::ScalarValue;

pub trait ScalarFunction: FunctionInfo {
    /// If any argument is null the result is null without calling `invoke`.
    fn propagates_nulls(&self) -> bool {
        true
    }

    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue>;
}

/// Call a scalar function, handling null propagation.
pub fn call_scalar(func: &dyn ScalarFunction, args: &[ScalarValue]) -> Result<ScalarValue> {
    if func.propagates_nulls() && args.iter().any(|a| a.is_null()) {
        return Ok(ScalarValue::Null);
    }
    func.invoke(args)
        .map_err(|e| e.with_field("function", func.name()))
}

pub static BUILTIN_SCALAR_FUNCTIONS: &[&dyn ScalarFunction] = &[
    &Upper,
    &Lower,
    &Length,
    &Trim,
    &Substring,
    &Concat,
    &Abs,
    &Round,
    &Coalesce,
    &CastToString,
    &CastToDecimal,
    &CastToInt,
    &Contains,
    &StartsWith,
    &EndsWith,
];

fn arg(args: &[ScalarValue], idx: usize) -> Result<&ScalarValue> {
    args.get(idx)
        .ok_or_else(|| SiftError::execution(format!("Missing argument {idx}")))
}

macro_rules! string_to_string_function {
    ($name:ident, $display:literal, $f:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl FunctionInfo for $name {
            fn name(&self) -> &'static str {
                $display
            }

            fn signatures(&self) -> &'static [Signature] {
                const { &[Signature::new(&[DataType::Utf8], DataType::Utf8)] }
            }
        }

        impl ScalarFunction for $name {
            fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
                let s = arg(args, 0)?.try_as_str()?;
                let f: fn(&str) -> String = $f;
                Ok(ScalarValue::Utf8(f(s)))
            }
        }
    };
}

string_to_string_function!(Upper, "Upper", |s| s.to_uppercase());
string_to_string_function!(Lower, "Lower", |s| s.to_lowercase());
string_to_string_function!(Trim, "Trim", |s| s.trim().to_string());

macro_rules! string_predicate_function {
    ($name:ident, $display:literal, $f:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl FunctionInfo for $name {
            fn name(&self) -> &'static str {
                $display
            }

            fn signatures(&self) -> &'static [Signature] {
                const { &[Signature::new(
                    &[DataType::Utf8, DataType::Utf8],
                    DataType::Boolean,
                )] }
            }
        }

        impl ScalarFunction for $name {
            fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
                let s = arg(args, 0)?.try_as_str()?;
                let needle = arg(args, 1)?.try_as_str()?;
                let f: fn(&str, &str) -> bool = $f;
                Ok(ScalarValue::Boolean(f(s, needle)))
            }
        }
    };
}

string_predicate_function!(Contains, "Contains", |s, n| s.contains(n));
string_predicate_function!(StartsWith, "StartsWith", |s, n| s.starts_with(n));
string_predicate_function!(EndsWith, "EndsWith", |s, n| s.ends_with(n));

/// Number of characters in a string.
#[derive(Debug, Clone, Copy)]
pub struct Length;

impl FunctionInfo for Length {
    fn name(&self) -> &'static str {
        "Length"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[Signature::new(&[DataType::Utf8], DataType::Int64)] }
    }
}

impl ScalarFunction for Length {
    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        let s = arg(args, 0)?.try_as_str()?;
        Ok(ScalarValue::Int64(s.chars().count() as i64))
    }
}

/// `Substring(s, start)` or `Substring(s, start, length)`.
///
/// `start` is zero based and counts characters. Out of range positions are
/// clamped.
#[derive(Debug, Clone, Copy)]
pub struct Substring;

impl FunctionInfo for Substring {
    fn name(&self) -> &'static str {
        "Substring"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[
            Signature::new(&[DataType::Utf8, DataType::Int64], DataType::Utf8),
            Signature::new(
                &[DataType::Utf8, DataType::Int64, DataType::Int64],
                DataType::Utf8,
            ),
        ] }
    }
}

impl ScalarFunction for Substring {
    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        let s = arg(args, 0)?.try_as_str()?;
        let start = arg(args, 1)?.try_as_i64()?.max(0) as usize;
        let chars = s.chars().skip(start);
        let out: String = match args.get(2) {
            Some(len) => chars.take(len.try_as_i64()?.max(0) as usize).collect(),
            None => chars.collect(),
        };
        Ok(ScalarValue::Utf8(out))
    }
}

/// Concatenate the string form of every non-null argument.
#[derive(Debug, Clone, Copy)]
pub struct Concat;

impl FunctionInfo for Concat {
    fn name(&self) -> &'static str {
        "Concat"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[Signature::variadic(&[DataType::Any], DataType::Utf8)] }
    }
}

impl ScalarFunction for Concat {
    fn propagates_nulls(&self) -> bool {
        false
    }

    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        let mut out = String::new();
        for arg in args.iter().filter(|a| !a.is_null()) {
            match arg {
                ScalarValue::Utf8(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        Ok(ScalarValue::Utf8(out))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Abs;

impl FunctionInfo for Abs {
    fn name(&self) -> &'static str {
        "Abs"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[
            Signature::new(&[DataType::Int64], DataType::Int64),
            Signature::new(&[DataType::Decimal], DataType::Decimal),
        ] }
    }
}

impl ScalarFunction for Abs {
    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        match arg(args, 0)? {
            ScalarValue::Int64(i) => i
                .checked_abs()
                .map(ScalarValue::Int64)
                .ok_or_else(|| SiftError::execution(format!("Integer overflow: Abs({i})"))),
            other => Ok(ScalarValue::Decimal(other.try_as_decimal()?.abs())),
        }
    }
}

/// Round half away from zero to the given number of decimal places.
#[derive(Debug, Clone, Copy)]
pub struct Round;

impl FunctionInfo for Round {
    fn name(&self) -> &'static str {
        "Round"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[
            Signature::new(&[DataType::Int64], DataType::Int64),
            Signature::new(&[DataType::Decimal], DataType::Decimal),
            Signature::new(&[DataType::Decimal, DataType::Int64], DataType::Decimal),
        ] }
    }
}

impl ScalarFunction for Round {
    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        let value = arg(args, 0)?;
        if let (ScalarValue::Int64(_), None) = (value, args.get(1)) {
            return Ok(value.clone());
        }

        let places = match args.get(1) {
            Some(places) => u32::try_from(places.try_as_i64()?).map_err(|_| {
                SiftError::execution("Round expects a non-negative number of places")
            })?,
            None => 0,
        };
        let d = value.try_as_decimal()?;
        Ok(ScalarValue::Decimal(
            d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
        ))
    }
}

/// First non-null argument.
#[derive(Debug, Clone, Copy)]
pub struct Coalesce;

impl FunctionInfo for Coalesce {
    fn name(&self) -> &'static str {
        "Coalesce"
    }

    fn signatures(&self) -> &'static [Signature] {
        const { &[Signature::variadic(&[DataType::Any], DataType::Any)] }
    }

    fn return_type(&self, inputs: &[DataType]) -> Result<DataType> {
        let mut iter = inputs.iter().copied();
        let Some(first) = iter.next() else {
            return Err(SiftError::semantic("Coalesce expects at least one argument")
                .with_field("function", self.name()));
        };
        iter.try_fold(first, DataType::common_supertype)
            .ok_or_else(|| {
                SiftError::semantic("Coalesce arguments have no common type")
                    .with_field("function", self.name())
            })
    }
}

impl ScalarFunction for Coalesce {
    fn propagates_nulls(&self) -> bool {
        false
    }

    fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        Ok(args
            .iter()
            .find(|a| !a.is_null())
            .cloned()
            .unwrap_or(ScalarValue::Null))
    }
}

macro_rules! cast_function {
    ($name:ident, $display:literal, $to:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl FunctionInfo for $name {
            fn name(&self) -> &'static str {
                $display
            }

            fn signatures(&self) -> &'static [Signature] {
                const { &[Signature::new(&[DataType::Any], $to)] }
            }
        }

        impl ScalarFunction for $name {
            fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
                arg(args, 0)?.clone().cast($to)
            }
        }
    };
}

cast_function!(CastToString, "ToString", DataType::Utf8);
cast_function!(CastToDecimal, "ToDecimal", DataType::Decimal);
cast_function!(CastToInt, "ToInt", DataType::Int64);

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    use super::*;

    fn s(v: &str) -> ScalarValue {
        ScalarValue::from(v)
    }

    #[test]
    fn invoke_builtins() {
        // (function, args, expected)
        let tests: Vec<(&dyn ScalarFunction, Vec<ScalarValue>, ScalarValue)> = vec![
            (&Upper, vec![s("abc")], s("ABC")),
            (&Lower, vec![s("AbC")], s("abc")),
            (&Trim, vec![s("  x ")], s("x")),
            (&Length, vec![s("héllo")], ScalarValue::Int64(5)),
            (
                &Substring,
                vec![s("abcdef"), ScalarValue::Int64(2)],
                s("cdef"),
            ),
            (
                &Substring,
                vec![s("abcdef"), ScalarValue::Int64(1), ScalarValue::Int64(3)],
                s("bcd"),
            ),
            (
                &Substring,
                vec![s("abc"), ScalarValue::Int64(10)],
                s(""),
            ),
            (
                &Concat,
                vec![s("a"), ScalarValue::Null, ScalarValue::Int64(1)],
                s("a1"),
            ),
            (&Abs, vec![ScalarValue::Int64(-3)], ScalarValue::Int64(3)),
            (
                &Round,
                vec![ScalarValue::Decimal(Decimal::new(125, 2)), ScalarValue::Int64(1)],
                ScalarValue::Decimal(Decimal::new(13, 1)),
            ),
            (
                &Coalesce,
                vec![ScalarValue::Null, ScalarValue::Int64(2), ScalarValue::Int64(3)],
                ScalarValue::Int64(2),
            ),
            (&CastToString, vec![ScalarValue::Int64(7)], s("7")),
            (&CastToInt, vec![s("42")], ScalarValue::Int64(42)),
            (
                &CastToDecimal,
                vec![ScalarValue::Int64(4)],
                ScalarValue::Decimal(Decimal::from(4)),
            ),
            (&Contains, vec![s("hello"), s("ell")], ScalarValue::Boolean(true)),
            (&StartsWith, vec![s("hello"), s("he")], ScalarValue::Boolean(true)),
            (&EndsWith, vec![s("hello"), s("he")], ScalarValue::Boolean(false)),
        ];

        for (func, args, expected) in tests {
            assert_eq!(
                expected,
                call_scalar(func, &args).unwrap(),
                "{}",
                func.name()
            );
        }
    }

    #[test]
    fn nulls_propagate() {
        assert_eq!(
            ScalarValue::Null,
            call_scalar(&Upper, &[ScalarValue::Null]).unwrap()
        );
    }

    #[test]
    fn errors_name_function() {
        let err = call_scalar(&CastToInt, &[s("abc")]).unwrap_err();
        assert_eq!(Some("ToInt"), err.field("function"));
    }

    #[test]
    fn coalesce_return_type() {
        assert_eq!(
            DataType::Decimal,
            Coalesce
                .return_type(&[DataType::Int64, DataType::Decimal])
                .unwrap()
        );
        assert!(
            Coalesce
                .return_type(&[DataType::Utf8, DataType::Int64])
                .is_err()
        );
    }
}
