//! Caches shared by all queries compiled through one engine.

use std::sync::Arc;

use moka::sync::Cache;
use sift_error::Result;
use tracing::trace;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::program::Program;
use crate::scalar::ScalarValue;
use crate::schema::{Schema, SchemaTable};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanCacheKey {
    pub provider: Uuid,
    pub options: String,
    pub statement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaCacheKey {
    provider: Uuid,
    schema: String,
    method: String,
    params: String,
}

#[derive(Debug, Clone)]
pub struct CacheService {
    plans: Cache<PlanCacheKey, Arc<Program>>,
    tables: Cache<SchemaCacheKey, Option<SchemaTable>>,
}

impl CacheService {
    pub fn new(config: &EngineConfig) -> Self {
        CacheService {
            plans: Cache::builder()
                .max_capacity(config.plan_cache_capacity)
                .time_to_live(config.plan_cache_ttl)
                .build(),
            tables: Cache::builder()
                .max_capacity(config.schema_cache_capacity)
                .time_to_live(config.schema_cache_ttl)
                .build(),
        }
    }

    pub fn get_plan(&self, key: &PlanCacheKey) -> Option<Arc<Program>> {
        self.plans.get(key)
    }

    pub fn insert_plan(&self, key: PlanCacheKey, program: Arc<Program>) {
        self.plans.insert(key, program);
    }

    pub fn plan_count(&self) -> u64 {
        self.plans.run_pending_tasks();
        self.plans.entry_count()
    }

    /// Describe a schema method, going through the cache when the provider
    /// has an id.
    pub fn get_table(
        &self,
        provider: Option<Uuid>,
        schema_name: &str,
        schema: &dyn Schema,
        method: &str,
        params: &[ScalarValue],
    ) -> Result<Option<SchemaTable>> {
        let Some(provider) = provider else {
            return schema.get_table(method, params);
        };

        let key = SchemaCacheKey {
            provider,
            schema: schema_name.to_ascii_lowercase(),
            method: method.to_ascii_lowercase(),
            params: params
                .iter()
                .map(|p| format!("{p:?}"))
                .collect::<Vec<_>>()
                .join(","),
        };

        if let Some(table) = self.tables.get(&key) {
            trace!(%schema_name, %method, "schema cache hit");
            return Ok(table);
        }

        let table = schema.get_table(method, params)?;
        self.tables.insert(key, table.clone());
        Ok(table)
    }

    pub fn invalidate_all(&self) {
        self.plans.invalidate_all();
        self.tables.invalidate_all();
    }
}
