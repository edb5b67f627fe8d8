use std::sync::Arc;

use sift_core::schema::SchemaColumn;
use sift_core::{
    CancellationToken, Column, CompileOptions, MemorySchema, MemorySchemaProvider, QueryEngine,
    ScalarValue, Table,
};
use sift_error::{Result, SiftError};
use sift_parser::datatype::DataType;

pub fn cities() -> Table {
    let mut table = Table::new(
        "cities",
        vec![
            Column::new("Name", DataType::Utf8),
            Column::new("Country", DataType::Utf8),
            Column::new("Population", DataType::Int64),
        ],
    );
    let rows = [
        ("Oslo", "NO", 700_000),
        ("Bergen", "NO", 285_000),
        ("Tokyo", "JP", 14_000_000),
        ("Osaka", "JP", 2_700_000),
        ("Lima", "PE", 10_000_000),
    ];
    for (name, country, population) in rows {
        table
            .add_row(vec![
                ScalarValue::from(name),
                ScalarValue::from(country),
                ScalarValue::Int64(population),
            ])
            .unwrap();
    }
    table
}

pub fn countries() -> Table {
    let mut table = Table::new(
        "countries",
        vec![
            Column::new("Code", DataType::Utf8),
            Column::new("Name", DataType::Utf8),
        ],
    );
    for (code, name) in [("NO", "Norway"), ("JP", "Japan"), ("FR", "France")] {
        table
            .add_row(vec![ScalarValue::from(code), ScalarValue::from(name)])
            .unwrap();
    }
    table
}

/// `range(n)` yields `N` from 0 to n-1. `fail()` errors when read.
pub fn generators() -> MemorySchema {
    MemorySchema::new()
        .with_generator(
            "range",
            vec![SchemaColumn::new("N", 0, DataType::Int64)],
            |args| {
                let n = match args.first() {
                    Some(ScalarValue::Int64(n)) => *n,
                    _ => 0,
                };
                Ok((0..n).map(|i| vec![ScalarValue::Int64(i)]).collect())
            },
        )
        .with_generator(
            "fail",
            vec![SchemaColumn::new("N", 0, DataType::Int64)],
            |_| -> Result<Vec<Vec<ScalarValue>>> { Err(SiftError::execution("source failed")) },
        )
}

#[allow(dead_code)]
pub struct Fixture {
    pub engine: QueryEngine,
    pub provider: Arc<MemorySchemaProvider>,
    pub geo: Arc<MemorySchema>,
}

pub fn fixture() -> Fixture {
    logutil::init_test();

    let geo = Arc::new(
        MemorySchema::new()
            .with_table("cities", cities())
            .with_table("countries", countries()),
    );
    let provider = MemorySchemaProvider::new().with_schema("gen", generators());
    provider.insert_schema("geo", geo.clone());

    Fixture {
        engine: QueryEngine::default(),
        provider: Arc::new(provider),
        geo,
    }
}

impl Fixture {
    pub fn run_with(&self, query: &str, options: CompileOptions) -> Result<Table> {
        self.engine
            .compile(query, self.provider.clone(), options)?
            .run(&CancellationToken::new())
    }

    pub fn run(&self, query: &str) -> Result<Table> {
        self.run_with(query, CompileOptions::default())
    }
}

/// Rows rendered as strings, nulls as "NULL".
pub fn rows(table: &Table) -> Vec<Vec<String>> {
    table
        .rows()
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect()
}

#[allow(dead_code)]
pub fn expected(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect()
}
