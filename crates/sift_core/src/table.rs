use std::cmp::Ordering;
use std::fmt;

use hashbrown::HashMap;
use sift_error::{Result, SiftError};
use sift_parser::datatype::DataType;

use crate::key::Key;
use crate::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            name: name.into(),
            data_type,
        }
    }
}

/// Secondary index over a subset of columns.
#[derive(Debug, Clone)]
struct TableIndex {
    columns: Vec<usize>,
    rows: HashMap<Key, Vec<usize>>,
}

impl TableIndex {
    fn insert(&mut self, row_idx: usize, row: &[ScalarValue]) {
        let key = Key::new(self.columns.iter().map(|&c| row[c].clone()).collect());
        // Null never matches anything during a probe.
        if key.has_null() {
            return;
        }
        self.rows.entry(key).or_default().push(row_idx);
    }
}

/// Identifier of an index on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexId(usize);

/// Named, typed collection of rows.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<ScalarValue>>,
    indexes: Vec<TableIndex>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Table {
            name: name.into(),
            columns,
            rows: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<ScalarValue>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[ScalarValue]> {
        self.rows.get(idx).map(|r| r.as_slice())
    }

    pub fn into_rows(self) -> Vec<Vec<ScalarValue>> {
        self.rows
    }

    /// Append a row, checking arity and column types.
    ///
    /// A non-null cell must be exactly the column's type unless the column
    /// is `Any`. Every index is updated with the new row.
    pub fn add_row(&mut self, row: Vec<ScalarValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SiftError::execution(format!(
                "Row has {} values, table '{}' has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            ))
            .with_field("table", &self.name)
            .with_field("expected", self.columns.len())
            .with_field("actual", row.len()));
        }

        for (value, column) in row.iter().zip(&self.columns) {
            let Some(value_type) = value.datatype() else {
                continue;
            };
            if !column.data_type.is_assignable_from(value_type) {
                return Err(SiftError::execution(format!(
                    "Value {value} of type {value_type} cannot be stored in column '{}' of type {}",
                    column.name, column.data_type
                ))
                .with_field("table", &self.name)
                .with_field("column", &column.name));
            }
        }

        let row_idx = self.rows.len();
        for index in &mut self.indexes {
            index.insert(row_idx, &row);
        }
        self.rows.push(row);

        Ok(())
    }

    /// Create an index over the given columns, indexing existing rows.
    pub fn create_index(&mut self, columns: Vec<usize>) -> Result<IndexId> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.columns.len()) {
            return Err(SiftError::new(format!(
                "Index column {bad} out of range for table '{}'",
                self.name
            )));
        }

        let mut index = TableIndex {
            columns,
            rows: HashMap::new(),
        };
        for (idx, row) in self.rows.iter().enumerate() {
            index.insert(idx, row);
        }
        self.indexes.push(index);

        Ok(IndexId(self.indexes.len() - 1))
    }

    /// Row indices matching a key on an index.
    pub fn lookup(&self, index: IndexId, key: &Key) -> &[usize] {
        self.indexes
            .get(index.0)
            .and_then(|idx| idx.rows.get(key))
            .map(|rows| rows.as_slice())
            .unwrap_or(&[])
    }

    /// Stable sort of rows by the given (column, descending) pairs.
    ///
    /// Indexes are dropped since row positions change.
    pub fn sort_by_columns(&mut self, keys: &[(usize, bool)]) {
        self.indexes.clear();
        self.rows.sort_by(|a, b| {
            for &(col, desc) in keys {
                let ord = a[col].sort_cmp(&b[col]);
                let ord = if desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Keep only the first `width` columns.
    pub fn truncate_columns(&mut self, width: usize) {
        self.indexes.clear();
        self.columns.truncate(width);
        for row in &mut self.rows {
            row.truncate(width);
        }
    }

    /// Drop the first `skip` rows and keep at most `take` of the rest.
    pub fn skip_take(&mut self, skip: Option<u64>, take: Option<u64>) {
        self.indexes.clear();
        let skip = skip.map(|s| s as usize).unwrap_or(0).min(self.rows.len());
        self.rows.drain(..skip);
        if let Some(take) = take {
            self.rows.truncate(take as usize);
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect();
        writeln!(f, "{}", names.join(" | "))?;
        for row in &self.rows {
            let vals: Vec<_> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", vals.join(" | "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn people() -> Table {
        Table::new(
            "people",
            vec![
                Column::new("Name", DataType::Utf8),
                Column::new("Age", DataType::Int64),
                Column::new("Extra", DataType::Any),
            ],
        )
    }

    #[test]
    fn add_row_checks_arity() {
        let mut table = people();
        let err = table
            .add_row(vec![ScalarValue::from("a"), ScalarValue::Int64(1)])
            .unwrap_err();
        assert_eq!(Some("3"), err.field("expected"));
        assert_eq!(Some("2"), err.field("actual"));
        assert!(table.is_empty());
    }

    #[test]
    fn add_row_checks_types() {
        let mut table = people();
        let err = table
            .add_row(vec![
                ScalarValue::from("a"),
                ScalarValue::from("not a number"),
                ScalarValue::Null,
            ])
            .unwrap_err();
        assert_eq!(Some("Age"), err.field("column"));

        // Nulls go anywhere, Any takes anything.
        table
            .add_row(vec![
                ScalarValue::Null,
                ScalarValue::Int64(4),
                ScalarValue::from("x"),
            ])
            .unwrap();
        assert_eq!(1, table.num_rows());
    }

    #[test]
    fn decimal_column_rejects_integer() {
        let mut table = Table::new("t", vec![Column::new("d", DataType::Decimal)]);
        assert!(table.add_row(vec![ScalarValue::Int64(1)]).is_err());
    }

    #[test]
    fn indexes_updated_on_insert() {
        let mut table = people();
        table
            .add_row(vec![
                ScalarValue::from("a"),
                ScalarValue::Int64(1),
                ScalarValue::Null,
            ])
            .unwrap();
        let by_age = table.create_index(vec![1]).unwrap();
        let by_name_age = table.create_index(vec![0, 1]).unwrap();

        table
            .add_row(vec![
                ScalarValue::from("b"),
                ScalarValue::Int64(1),
                ScalarValue::Null,
            ])
            .unwrap();
        table
            .add_row(vec![ScalarValue::Null, ScalarValue::Int64(1), ScalarValue::Null])
            .unwrap();

        assert_eq!(
            &[0, 1, 2],
            table.lookup(by_age, &Key::new(vec![ScalarValue::Int64(1)]))
        );
        assert_eq!(
            &[1],
            table.lookup(
                by_name_age,
                &Key::new(vec![ScalarValue::from("b"), ScalarValue::Int64(1)])
            )
        );
        // Null keys aren't indexed.
        assert!(
            table
                .lookup(
                    by_name_age,
                    &Key::new(vec![ScalarValue::Null, ScalarValue::Int64(1)])
                )
                .is_empty()
        );
    }

    #[test]
    fn sort_and_limit() {
        let mut table = Table::new("t", vec![Column::new("v", DataType::Int64)]);
        for v in [3, 1, 2, 5, 4] {
            table.add_row(vec![ScalarValue::Int64(v)]).unwrap();
        }
        table.sort_by_columns(&[(0, true)]);
        table.skip_take(Some(1), Some(2));

        let got: Vec<_> = table.rows().iter().map(|r| r[0].clone()).collect();
        assert_eq!(vec![ScalarValue::Int64(4), ScalarValue::Int64(3)], got);
    }
}
