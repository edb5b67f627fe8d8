use std::fmt;

/// Value type of a column or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Boolean,
    Int64,
    Decimal,
    Utf8,
    /// Nested key/value structure produced by document-like sources.
    Struct,
    /// Type isn't known until runtime.
    Any,
}

impl DataType {
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64 | Self::Decimal)
    }

    /// Check if a value of type `other` may be stored in a column of this
    /// type.
    pub fn is_assignable_from(&self, other: DataType) -> bool {
        *self == DataType::Any || *self == other
    }

    /// Get the type both inputs can be converted to without losing
    /// information.
    ///
    /// Returns None if no such type exists.
    pub fn common_supertype(a: DataType, b: DataType) -> Option<DataType> {
        match (a, b) {
            (a, b) if a == b => Some(a),
            (DataType::Any, _) | (_, DataType::Any) => Some(DataType::Any),
            (DataType::Int64, DataType::Decimal) | (DataType::Decimal, DataType::Int64) => {
                Some(DataType::Decimal)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::Int64 => write!(f, "Int64"),
            Self::Decimal => write!(f, "Decimal"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::Struct => write!(f, "Struct"),
            Self::Any => write!(f, "Any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supertypes() {
        // (a, b, expected)
        let tests = [
            (DataType::Int64, DataType::Int64, Some(DataType::Int64)),
            (DataType::Int64, DataType::Decimal, Some(DataType::Decimal)),
            (DataType::Utf8, DataType::Any, Some(DataType::Any)),
            (DataType::Utf8, DataType::Int64, None),
            (DataType::Boolean, DataType::Decimal, None),
        ];

        for (a, b, expected) in tests {
            assert_eq!(expected, DataType::common_supertype(a, b), "{a} {b}");
        }
    }

    #[test]
    fn assignability() {
        assert!(DataType::Any.is_assignable_from(DataType::Utf8));
        assert!(DataType::Int64.is_assignable_from(DataType::Int64));
        assert!(!DataType::Decimal.is_assignable_from(DataType::Int64));
    }
}
