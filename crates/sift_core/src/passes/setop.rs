//! Checks and key resolution for UNION, EXCEPT and INTERSECT.

use sift_error::{Result, SiftError};
use sift_parser::ast::{Ident, SetOperator};
use sift_parser::datatype::DataType;

use crate::binder::scope::with_suggestions;
use crate::table::Column;

/// Resolve the key list of a set operation to column positions.
///
/// UNION ALL doesn't compare rows and needs no keys. Every other operator
/// requires keys naming output columns of the left side.
pub fn resolve_keys(
    op: SetOperator,
    keys: Option<&[Ident]>,
    left: &[Column],
    right: &[Column],
) -> Result<Vec<usize>> {
    if left.len() != right.len() {
        return Err(SiftError::semantic(format!(
            "Both sides of {op} must have the same number of columns"
        ))
        .with_field("operator", op)
        .with_field("left", left.len())
        .with_field("right", right.len()));
    }

    let keys = match (op, keys) {
        (SetOperator::UnionAll, None) => return Ok(Vec::new()),
        (_, Some(keys)) if !keys.is_empty() => keys,
        _ => {
            return Err(SiftError::semantic(format!(
                "{op} requires key columns, e.g. {op} (Name)"
            ))
            .with_field("operator", op));
        }
    };

    keys.iter()
        .map(|key| {
            let pos = left
                .iter()
                .position(|c| c.name == key.value)
                .or_else(|| left.iter().position(|c| c.name.eq_ignore_ascii_case(&key.value)));
            pos.ok_or_else(|| {
                with_suggestions(
                    SiftError::semantic(format!("Unknown key column '{}' for {op}", key.value))
                        .with_field("operator", op)
                        .with_field("column", &key.value),
                    &key.value,
                    left.iter().map(|c| c.name.as_str()),
                )
            })
        })
        .collect()
}

/// Columns of a set operation's result. Names come from the left side,
/// types are widened to fit both sides.
pub fn output_columns(left: &[Column], right: &[Column]) -> Vec<Column> {
    left.iter()
        .zip(right)
        .map(|(l, r)| {
            let data_type =
                DataType::common_supertype(l.data_type, r.data_type).unwrap_or(DataType::Any);
            Column::new(l.name.clone(), data_type)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_error::ErrorKind;

    use super::*;

    fn cols(cols: &[(&str, DataType)]) -> Vec<Column> {
        cols.iter().map(|(n, t)| Column::new(*n, *t)).collect()
    }

    #[test]
    fn keys_resolved_by_name() {
        let left = cols(&[("Name", DataType::Utf8), ("City", DataType::Utf8)]);
        let right = cols(&[("N", DataType::Utf8), ("C", DataType::Utf8)]);
        let keys = [Ident::new("city"), Ident::new("Name")];
        assert_eq!(
            vec![1, 0],
            resolve_keys(SetOperator::Union, Some(&keys), &left, &right).unwrap()
        );
    }

    #[test]
    fn union_all_without_keys() {
        let left = cols(&[("A", DataType::Int64)]);
        assert_eq!(
            Vec::<usize>::new(),
            resolve_keys(SetOperator::UnionAll, None, &left, &left).unwrap()
        );
    }

    #[test]
    fn invalid_set_operations() {
        let one = cols(&[("A", DataType::Int64)]);
        let two = cols(&[("A", DataType::Int64), ("B", DataType::Int64)]);
        let keys = [Ident::new("A")];
        let bad_keys = [Ident::new("Z")];

        let tests: [(SetOperator, Option<&[Ident]>, &[Column], &[Column]); 4] = [
            (SetOperator::Union, None, &one, &one),
            (SetOperator::Except, Some(&keys), &one, &two),
            (SetOperator::Intersect, Some(&bad_keys), &one, &one),
            (SetOperator::Union, Some(&[]), &one, &one),
        ];

        for (op, keys, left, right) in tests {
            let err = resolve_keys(op, keys, left, right).unwrap_err();
            assert_eq!(ErrorKind::Semantic, err.kind(), "{op}");
        }
    }

    #[test]
    fn output_types_widened() {
        let left = cols(&[("A", DataType::Int64), ("B", DataType::Utf8)]);
        let right = cols(&[("X", DataType::Decimal), ("Y", DataType::Int64)]);
        assert_eq!(
            cols(&[("A", DataType::Decimal), ("B", DataType::Any)]),
            output_columns(&left, &right)
        );
    }
}
