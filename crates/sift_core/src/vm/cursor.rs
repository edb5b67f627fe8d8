use std::sync::Arc;

use hashbrown::HashMap;
use sift_error::{OptionExt, Result};

use crate::group::{GroupArena, GroupId, GroupRow};
use crate::scalar::ScalarValue;
use crate::schema::{RowResolver, RowSource};
use crate::table::Table;

/// Row currently held by a slot.
#[derive(Debug, Default)]
pub enum SlotRow {
    /// No row, or the null side of an outer join. Every column reads as
    /// null.
    #[default]
    Empty,
    Source(Box<dyn RowResolver>),
    Table { table: Arc<Table>, row: usize },
    Group { arena: String, row: GroupRow },
}

impl SlotRow {
    pub fn value(&self, index: usize, groups: &HashMap<String, GroupArena>) -> Result<ScalarValue> {
        Ok(match self {
            Self::Empty => ScalarValue::Null,
            Self::Source(row) => row.get(index).unwrap_or_default(),
            Self::Table { table, row } => table
                .row(*row)
                .and_then(|values| values.get(index))
                .cloned()
                .unwrap_or_default(),
            Self::Group { arena, row } => {
                let arena = groups.get(arena).required("group arena")?;
                row.get(index, arena)?
            }
        })
    }
}

/// Iteration state of an open slot.
#[derive(Debug)]
pub enum Cursor {
    Source(Box<dyn RowSource>),
    Table {
        table: Arc<Table>,
        next: usize,
    },
    /// Selected rows of a table, from a hash probe.
    Rows {
        table: Arc<Table>,
        rows: Vec<usize>,
        next: usize,
    },
    Groups {
        arena: String,
        aggregates: Arc<[String]>,
        groups: Vec<GroupId>,
        next: usize,
    },
}

impl Cursor {
    pub fn next_row(&mut self) -> Result<Option<SlotRow>> {
        Ok(match self {
            Self::Source(source) => source.next_row()?.map(SlotRow::Source),
            Self::Table { table, next } => {
                if *next < table.num_rows() {
                    *next += 1;
                    Some(SlotRow::Table {
                        table: table.clone(),
                        row: *next - 1,
                    })
                } else {
                    None
                }
            }
            Self::Rows { table, rows, next } => match rows.get(*next) {
                Some(&row) => {
                    *next += 1;
                    Some(SlotRow::Table {
                        table: table.clone(),
                        row,
                    })
                }
                None => None,
            },
            Self::Groups {
                arena,
                aggregates,
                groups,
                next,
            } => match groups.get(*next) {
                Some(&group) => {
                    *next += 1;
                    Some(SlotRow::Group {
                        arena: arena.clone(),
                        row: GroupRow {
                            group,
                            aggregates: aggregates.clone(),
                        },
                    })
                }
                None => None,
            },
        })
    }

    /// Whether rows from this cursor count as processed rows.
    pub fn counts_rows(&self) -> bool {
        !matches!(self, Self::Groups { .. })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::datatype::DataType;

    use super::*;
    use crate::table::Column;

    #[test]
    fn table_cursor_reads_rows() {
        let mut table = Table::new("t", vec![Column::new("A", DataType::Int64)]);
        table.add_row(vec![ScalarValue::Int64(1)]).unwrap();
        table.add_row(vec![ScalarValue::Int64(2)]).unwrap();

        let groups = HashMap::new();
        let mut cursor = Cursor::Table {
            table: Arc::new(table),
            next: 0,
        };
        let mut values = Vec::new();
        while let Some(row) = cursor.next_row().unwrap() {
            values.push(row.value(0, &groups).unwrap());
            // Out of range columns read as null.
            assert_eq!(ScalarValue::Null, row.value(5, &groups).unwrap());
        }

        assert_eq!(vec![ScalarValue::Int64(1), ScalarValue::Int64(2)], values);
    }
}
