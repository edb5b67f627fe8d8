//! Schemas backed by in-memory collections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use scc::HashIndex;
use scc::ebr::Guard;
use sift_error::{Result, SiftError};
use uuid::Uuid;

use super::{
    RowResolver, RowSource, RowSourceContext, Schema, SchemaColumn, SchemaProvider, SchemaTable,
};
use crate::scalar::ScalarValue;
use crate::table::Table;

type RowGenerator = dyn Fn(&[ScalarValue]) -> Result<Vec<Vec<ScalarValue>>> + Send + Sync;

#[derive(Debug)]
pub struct MemorySchemaProvider {
    id: Uuid,
    schemas: HashIndex<String, Arc<MemorySchema>>,
}

impl Default for MemorySchemaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySchemaProvider {
    pub fn new() -> Self {
        MemorySchemaProvider {
            id: Uuid::new_v4(),
            schemas: HashIndex::new(),
        }
    }

    /// Register a schema, replacing any existing schema with the same name.
    pub fn insert_schema(&self, name: impl Into<String>, schema: Arc<MemorySchema>) {
        let name = name.into().to_ascii_lowercase();
        use scc::hash_index::Entry;
        match self.schemas.entry(name) {
            Entry::Vacant(ent) => {
                ent.insert_entry(schema);
            }
            Entry::Occupied(ent) => {
                ent.update(schema);
            }
        }
    }

    pub fn with_schema(self, name: impl Into<String>, schema: MemorySchema) -> Self {
        self.insert_schema(name, Arc::new(schema));
        self
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn get_schema(&self, name: &str) -> Result<Option<Arc<dyn Schema>>> {
        let guard = Guard::new();
        let schema = self
            .schemas
            .peek(&name.to_ascii_lowercase(), &guard)
            .cloned();
        Ok(schema.map(|s| s as Arc<dyn Schema>))
    }

    fn id(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

enum MemoryMethod {
    Static(Arc<Table>),
    Generated {
        columns: SchemaTable,
        generate: Arc<RowGenerator>,
    },
}

impl fmt::Debug for MemoryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(table) => f.debug_tuple("Static").field(&table.name()).finish(),
            Self::Generated { columns, .. } => {
                f.debug_struct("Generated").field("columns", columns).finish()
            }
        }
    }
}

/// A schema whose methods return rows held in memory.
#[derive(Debug, Default)]
pub struct MemorySchema {
    methods: HashIndex<String, Arc<MemoryMethod>>,
    /// Number of row sources opened so far.
    opened: AtomicUsize,
}

impl MemorySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method returning the rows of a table regardless of arguments.
    pub fn with_table(self, method: impl Into<String>, table: Table) -> Self {
        self.insert_method(method.into(), MemoryMethod::Static(Arc::new(table)));
        self
    }

    /// Add a method computing its rows from the call arguments.
    pub fn with_generator<F>(
        self,
        method: impl Into<String>,
        columns: Vec<SchemaColumn>,
        generate: F,
    ) -> Self
    where
        F: Fn(&[ScalarValue]) -> Result<Vec<Vec<ScalarValue>>> + Send + Sync + 'static,
    {
        self.insert_method(
            method.into(),
            MemoryMethod::Generated {
                columns: SchemaTable::new(columns),
                generate: Arc::new(generate),
            },
        );
        self
    }

    fn insert_method(&self, name: String, method: MemoryMethod) {
        use scc::hash_index::Entry;
        match self.methods.entry(name.to_ascii_lowercase()) {
            Entry::Vacant(ent) => {
                ent.insert_entry(Arc::new(method));
            }
            Entry::Occupied(ent) => {
                ent.update(Arc::new(method));
            }
        }
    }

    fn method(&self, name: &str) -> Option<Arc<MemoryMethod>> {
        let guard = Guard::new();
        self.methods
            .peek(&name.to_ascii_lowercase(), &guard)
            .cloned()
    }

    /// Number of row sources opened from this schema.
    pub fn opened_sources(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl Schema for MemorySchema {
    fn get_table(&self, method: &str, _params: &[ScalarValue]) -> Result<Option<SchemaTable>> {
        Ok(self.method(method).map(|m| match m.as_ref() {
            MemoryMethod::Static(table) => SchemaTable::new(
                table
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| SchemaColumn::new(c.name.clone(), idx, c.data_type))
                    .collect(),
            ),
            MemoryMethod::Generated { columns, .. } => columns.clone(),
        }))
    }

    fn get_row_source(
        &self,
        method: &str,
        ctx: &RowSourceContext,
        params: &[ScalarValue],
    ) -> Result<Box<dyn RowSource>> {
        let found = self
            .method(method)
            .ok_or_else(|| SiftError::execution(format!("Unknown method '{method}'")))?;
        let table = self.get_table(method, params)?.unwrap_or_default();

        let rows = match found.as_ref() {
            MemoryMethod::Static(table) => table.rows().to_vec(),
            MemoryMethod::Generated { generate, .. } => generate(params)?,
        };

        // Only copy the columns the query reads.
        let keep: Vec<bool> = table
            .columns
            .iter()
            .map(|c| ctx.is_used(&c.name))
            .collect();
        let names: Arc<[String]> = table.columns.iter().map(|c| c.name.clone()).collect();

        self.opened.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryRowSource {
            method: method.to_string(),
            names,
            keep,
            rows: rows.into_iter(),
            position: 0,
        }))
    }

    fn method_names(&self) -> Vec<String> {
        let guard = Guard::new();
        self.methods.iter(&guard).map(|(k, _)| k.clone()).collect()
    }
}

#[derive(Debug)]
struct MemoryRowSource {
    method: String,
    names: Arc<[String]>,
    keep: Vec<bool>,
    rows: std::vec::IntoIter<Vec<ScalarValue>>,
    position: usize,
}

impl RowSource for MemoryRowSource {
    fn next_row(&mut self) -> Result<Option<Box<dyn RowResolver>>> {
        let Some(row) = self.rows.next() else {
            return Ok(None);
        };
        let values = row
            .into_iter()
            .zip(&self.keep)
            .map(|(v, &keep)| if keep { v } else { ScalarValue::Null })
            .collect();

        let contexts = vec![
            ScalarValue::Utf8(self.method.clone()),
            ScalarValue::from(self.position),
        ];
        self.position += 1;

        Ok(Some(Box::new(MemoryRow {
            names: self.names.clone(),
            values,
            contexts,
        })))
    }
}

#[derive(Debug)]
pub struct MemoryRow {
    names: Arc<[String]>,
    values: Vec<ScalarValue>,
    /// Method name and row position.
    contexts: Vec<ScalarValue>,
}

impl MemoryRow {
    fn position(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .or_else(|| self.names.iter().position(|n| n.eq_ignore_ascii_case(name)))
    }
}

impl RowResolver for MemoryRow {
    fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn get_by_name(&self, name: &str) -> Option<ScalarValue> {
        self.position(name).and_then(|idx| self.get(idx))
    }

    fn get(&self, index: usize) -> Option<ScalarValue> {
        self.values.get(index).cloned()
    }

    fn contexts(&self) -> Option<&[ScalarValue]> {
        Some(&self.contexts)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::datatype::DataType;

    use super::*;
    use crate::cancel::CancellationToken;
    use crate::table::Column;

    fn provider() -> MemorySchemaProvider {
        let mut table = Table::new(
            "cities",
            vec![
                Column::new("Name", DataType::Utf8),
                Column::new("Population", DataType::Int64),
            ],
        );
        table
            .add_row(vec![ScalarValue::from("Oslo"), ScalarValue::Int64(700_000)])
            .unwrap();
        table
            .add_row(vec![ScalarValue::from("Tokyo"), ScalarValue::Int64(14_000_000)])
            .unwrap();

        let schema = MemorySchema::new()
            .with_table("Cities", table)
            .with_generator(
                "range",
                vec![SchemaColumn::new("Value", 0, DataType::Int64)],
                |params| {
                    let n = params.first().map(|p| p.try_as_i64()).transpose()?.unwrap_or(0);
                    Ok((0..n).map(|i| vec![ScalarValue::Int64(i)]).collect())
                },
            );
        MemorySchemaProvider::new().with_schema("src", schema)
    }

    fn ctx(used: Option<Vec<&str>>) -> RowSourceContext {
        RowSourceContext {
            used_columns: used.map(|u| u.into_iter().map(String::from).collect()),
            token: CancellationToken::new(),
            temp_dir: None,
        }
    }

    #[test]
    fn lookup_case_insensitive() {
        let provider = provider();
        let schema = provider.get_schema("SRC").unwrap().unwrap();
        let table = schema.get_table("cities", &[]).unwrap().unwrap();
        assert_eq!(
            vec!["Name", "Population"],
            table
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
        );
        assert!(schema.get_table("towns", &[]).unwrap().is_none());
        assert!(provider.get_schema("other").unwrap().is_none());
    }

    #[test]
    fn rows_with_contexts() {
        let provider = provider();
        let schema = provider.get_schema("src").unwrap().unwrap();
        let mut source = schema.get_row_source("Cities", &ctx(None), &[]).unwrap();

        let first = source.next_row().unwrap().unwrap();
        assert!(first.has_column("name"));
        assert_eq!(Some(ScalarValue::from("Oslo")), first.get_by_name("Name"));
        assert_eq!(
            Some(&[ScalarValue::from("Cities"), ScalarValue::Int64(0)][..]),
            first.contexts()
        );

        assert!(source.next_row().unwrap().is_some());
        assert!(source.next_row().unwrap().is_none());
    }

    #[test]
    fn unused_columns_not_copied() {
        let provider = provider();
        let schema = provider.get_schema("src").unwrap().unwrap();
        let mut source = schema
            .get_row_source("Cities", &ctx(Some(vec!["Name"])), &[])
            .unwrap();
        let row = source.next_row().unwrap().unwrap();
        assert_eq!(Some(ScalarValue::from("Oslo")), row.get(0));
        assert_eq!(Some(ScalarValue::Null), row.get(1));
    }

    #[test]
    fn generated_rows_use_params() {
        let provider = provider();
        let schema = provider.get_schema("src").unwrap().unwrap();
        let mut source = schema
            .get_row_source("range", &ctx(None), &[ScalarValue::Int64(3)])
            .unwrap();
        let mut count = 0;
        while source.next_row().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(3, count);
    }
}
