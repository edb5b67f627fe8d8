pub mod aggregate;
pub mod scalar;

use std::fmt::Debug;

use sift_error::{Result, SiftError};
use sift_parser::datatype::DataType;

use self::aggregate::{AggregateFunction, BUILTIN_AGGREGATE_FUNCTIONS};
use self::scalar::{BUILTIN_SCALAR_FUNCTIONS, ScalarFunction};

/// Function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Expected input types. `Any` accepts any type.
    pub input: &'static [DataType],
    /// Accept any number of trailing arguments matching the last input type.
    pub variadic: bool,
    pub return_type: DataType,
}

impl Signature {
    pub const fn new(input: &'static [DataType], return_type: DataType) -> Self {
        Signature {
            input,
            variadic: false,
            return_type,
        }
    }

    pub const fn variadic(input: &'static [DataType], return_type: DataType) -> Self {
        Signature {
            input,
            variadic: true,
            return_type,
        }
    }

    fn expected_at(&self, idx: usize) -> Option<DataType> {
        match self.input.get(idx) {
            Some(t) => Some(*t),
            None if self.variadic => self.input.last().copied(),
            None => None,
        }
    }

    fn arity_matches(&self, n: usize) -> bool {
        if self.variadic {
            n + 1 >= self.input.len()
        } else {
            n == self.input.len()
        }
    }

    /// Inputs match without any conversion.
    fn exact_match(&self, inputs: &[DataType]) -> bool {
        self.arity_matches(inputs.len())
            && inputs.iter().enumerate().all(|(idx, have)| {
                matches!(self.expected_at(idx), Some(expected) if expected == DataType::Any || expected == *have)
            })
    }

    /// Inputs match if unknown types are checked at runtime and integers are
    /// widened to decimals.
    fn loose_match(&self, inputs: &[DataType]) -> bool {
        self.arity_matches(inputs.len())
            && inputs.iter().enumerate().all(|(idx, have)| {
                match self.expected_at(idx) {
                    Some(expected) => {
                        expected == DataType::Any
                            || *have == DataType::Any
                            || expected == *have
                            || (expected == DataType::Decimal && *have == DataType::Int64)
                    }
                    None => false,
                }
            })
    }
}

/// Information shared by scalar and aggregate functions.
pub trait FunctionInfo: Debug + Sync + Send {
    /// Name of the function as written in queries.
    fn name(&self) -> &'static str;

    fn signatures(&self) -> &'static [Signature];

    /// Return type for the given inputs.
    ///
    /// Errors if no signature accepts the inputs.
    fn return_type(&self, inputs: &[DataType]) -> Result<DataType> {
        let sigs = self.signatures();
        let sig = sigs
            .iter()
            .find(|sig| sig.exact_match(inputs))
            .or_else(|| sigs.iter().find(|sig| sig.loose_match(inputs)));

        match sig {
            Some(sig) => Ok(sig.return_type),
            None => {
                let inputs: Vec<_> = inputs.iter().map(|t| t.to_string()).collect();
                Err(SiftError::semantic(format!(
                    "No signature of '{}' accepts ({})",
                    self.name(),
                    inputs.join(", ")
                ))
                .with_field("function", self.name()))
            }
        }
    }
}

/// A function found by name.
#[derive(Debug, Clone, Copy)]
pub enum FunctionRef {
    Scalar(usize, &'static dyn ScalarFunction),
    Aggregate(usize, &'static dyn AggregateFunction),
}

/// Lookup of built-in functions by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct FunctionRegistry;

impl FunctionRegistry {
    /// Find a function by name, case insensitive.
    pub fn find(&self, name: &str) -> Option<FunctionRef> {
        if let Some((id, func)) = BUILTIN_SCALAR_FUNCTIONS
            .iter()
            .enumerate()
            .find(|(_, f)| f.name().eq_ignore_ascii_case(name))
        {
            return Some(FunctionRef::Scalar(id, *func));
        }
        BUILTIN_AGGREGATE_FUNCTIONS
            .iter()
            .enumerate()
            .find(|(_, f)| f.name().eq_ignore_ascii_case(name))
            .map(|(id, func)| FunctionRef::Aggregate(id, *func))
    }

    pub fn scalar(&self, id: usize) -> Result<&'static dyn ScalarFunction> {
        BUILTIN_SCALAR_FUNCTIONS
            .get(id)
            .copied()
            .ok_or_else(|| SiftError::new(format!("Missing scalar function with id {id}")))
    }

    pub fn aggregate(&self, id: usize) -> Result<&'static dyn AggregateFunction> {
        BUILTIN_AGGREGATE_FUNCTIONS
            .get(id)
            .copied()
            .ok_or_else(|| SiftError::new(format!("Missing aggregate function with id {id}")))
    }

    /// Names of known functions closest to `name`, for error messages.
    ///
    /// Only candidates at the smallest edit distance are returned.
    pub fn suggest(&self, name: &str) -> Vec<&'static str> {
        let lower = name.to_ascii_lowercase();
        let mut candidates: Vec<_> = BUILTIN_SCALAR_FUNCTIONS
            .iter()
            .map(|f| f.name())
            .chain(BUILTIN_AGGREGATE_FUNCTIONS.iter().map(|f| f.name()))
            .map(|n| (strsim::levenshtein(&lower, &n.to_ascii_lowercase()), n))
            .filter(|(dist, _)| *dist <= 3 && *dist < name.len())
            .collect();
        candidates.sort();
        let best = match candidates.first() {
            Some((dist, _)) => *dist,
            None => return Vec::new(),
        };
        candidates
            .into_iter()
            .take_while(|(dist, _)| *dist == best)
            .take(3)
            .map(|(_, n)| n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn find_case_insensitive() {
        let registry = FunctionRegistry;
        assert!(matches!(
            registry.find("upper"),
            Some(FunctionRef::Scalar(_, _))
        ));
        assert!(matches!(
            registry.find("COUNT"),
            Some(FunctionRef::Aggregate(_, _))
        ));
        assert!(registry.find("Uper").is_none());
    }

    #[test]
    fn suggestions() {
        let tests = [
            ("Uper", vec!["Upper"]),
            ("lenght", vec!["Length"]),
            ("Mix", vec!["Max", "Min"]),
            ("xyzzyplugh", vec![]),
        ];

        for (input, expected) in tests {
            assert_eq!(expected, FunctionRegistry.suggest(input), "{input}");
        }
    }

    #[test]
    fn signature_matching() {
        // (function, inputs, expected)
        let tests = [
            ("Upper", vec![DataType::Utf8], Some(DataType::Utf8)),
            ("Upper", vec![DataType::Any], Some(DataType::Utf8)),
            ("Upper", vec![DataType::Int64], None),
            ("Abs", vec![DataType::Int64], Some(DataType::Int64)),
            ("Abs", vec![DataType::Decimal], Some(DataType::Decimal)),
            ("Round", vec![DataType::Int64, DataType::Int64], Some(DataType::Decimal)),
            (
                "Concat",
                vec![DataType::Utf8, DataType::Int64, DataType::Any],
                Some(DataType::Utf8),
            ),
            ("Substring", vec![DataType::Utf8], None),
        ];

        for (name, inputs, expected) in tests {
            let func = match FunctionRegistry.find(name) {
                Some(FunctionRef::Scalar(_, f)) => f,
                other => panic!("unexpected: {other:?}"),
            };
            assert_eq!(expected, func.return_type(&inputs).ok(), "{name} {inputs:?}");
        }
    }
}
