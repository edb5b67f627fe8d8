//! Interfaces to data sources.
//!
//! A query reads from `#schema.method(args)`. The provider resolves the
//! schema by name, the schema describes the method's columns at compile time
//! and produces a row source when the query runs.

pub mod background;
pub mod memory;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use sift_error::Result;
use sift_parser::datatype::DataType;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    /// Position used with `RowResolver::get`.
    pub index: usize,
    pub data_type: DataType,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, index: usize, data_type: DataType) -> Self {
        SchemaColumn {
            name: name.into(),
            index,
            data_type,
        }
    }
}

/// Columns exposed by a schema method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaTable {
    pub columns: Vec<SchemaColumn>,
}

impl SchemaTable {
    pub fn new(columns: Vec<SchemaColumn>) -> Self {
        SchemaTable { columns }
    }

    /// Find a column by name. Exact matches win over case insensitive ones.
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }
}

/// Passed to a schema when opening a row source.
#[derive(Debug, Clone)]
pub struct RowSourceContext {
    /// Names of the columns the query reads. None means all columns.
    pub used_columns: Option<Vec<String>>,
    pub token: CancellationToken,
    /// Scratch directory removed when the run ends. Sources that spill or
    /// unpack files put them here.
    pub temp_dir: Option<PathBuf>,
}

impl RowSourceContext {
    pub fn is_used(&self, column: &str) -> bool {
        match &self.used_columns {
            Some(used) => used.iter().any(|c| c.eq_ignore_ascii_case(column)),
            None => true,
        }
    }
}

/// A single row produced by a row source.
pub trait RowResolver: Debug + Send {
    fn has_column(&self, name: &str) -> bool;

    fn get_by_name(&self, name: &str) -> Option<ScalarValue>;

    fn get(&self, index: usize) -> Option<ScalarValue>;

    /// Provenance values for this row, if the source tracks any.
    fn contexts(&self) -> Option<&[ScalarValue]> {
        None
    }
}

/// Lazily produced sequence of rows.
pub trait RowSource: Debug + Send {
    /// Get the next row, None once exhausted.
    fn next_row(&mut self) -> Result<Option<Box<dyn RowResolver>>>;
}

pub trait Schema: Debug + Send + Sync {
    /// Describe a method's columns for the given arguments.
    ///
    /// Returns None if the method doesn't exist.
    fn get_table(&self, method: &str, params: &[ScalarValue]) -> Result<Option<SchemaTable>>;

    fn get_row_source(
        &self,
        method: &str,
        ctx: &RowSourceContext,
        params: &[ScalarValue],
    ) -> Result<Box<dyn RowSource>>;

    /// Names of methods, used for suggestions in error messages.
    fn method_names(&self) -> Vec<String> {
        Vec::new()
    }
}

pub trait SchemaProvider: Debug + Send + Sync {
    /// Returns None if the schema doesn't exist.
    fn get_schema(&self, name: &str) -> Result<Option<Arc<dyn Schema>>>;

    /// Stable identity of this provider.
    ///
    /// Compiled plans and schema metadata are only cached for providers
    /// returning an id.
    fn id(&self) -> Option<Uuid> {
        None
    }
}
