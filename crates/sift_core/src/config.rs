use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use sift_error::{Result, SiftError};
use sift_parser::parser::DEFAULT_MAX_DIAGNOSTICS;

use crate::scalar::ScalarValue;
use crate::table::Table;

pub const DEFAULT_ALIAS_SEED: u64 = 0x5eed;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Options for compiling a query.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub enable_hash_join: bool,
    pub alias_seed: u64,
    pub enable_plan_cache: bool,
    pub max_diagnostics: usize,
    /// Chunks buffered between a background row source and the executor.
    /// Zero reads sources on the executing thread.
    pub source_channel_capacity: usize,
    pub source_chunk_size: usize,
    /// Tables queries can reference by bare name.
    memory_tables: BTreeMap<String, Arc<Table>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            enable_hash_join: true,
            alias_seed: DEFAULT_ALIAS_SEED,
            enable_plan_cache: true,
            max_diagnostics: DEFAULT_MAX_DIAGNOSTICS,
            source_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            source_chunk_size: DEFAULT_CHUNK_SIZE,
            memory_tables: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash_join(mut self, enabled: bool) -> Self {
        self.enable_hash_join = enabled;
        self
    }

    pub fn with_source_channel_capacity(mut self, capacity: usize) -> Self {
        self.source_channel_capacity = capacity;
        self
    }

    /// Register a table that can be referenced by name in FROM.
    pub fn with_memory_table(mut self, name: impl Into<String>, table: Table) -> Self {
        self.memory_tables
            .insert(name.into().to_ascii_lowercase(), Arc::new(table));
        self
    }

    pub fn memory_table(&self, name: &str) -> Option<&Arc<Table>> {
        self.memory_tables.get(&name.to_ascii_lowercase())
    }

    pub(crate) fn memory_tables(&self) -> &BTreeMap<String, Arc<Table>> {
        &self.memory_tables
    }

    pub fn memory_table_names(&self) -> impl Iterator<Item = &str> {
        self.memory_tables.keys().map(|k| k.as_str())
    }

    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| SiftError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| SiftError::new(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| SiftError::new(format!("Missing setting for '{name}'")))?;

        let scalar = (func.get)(&Self::default());
        (func.set)(scalar, self)
    }

    /// Text identifying every option that affects the compiled program.
    pub(crate) fn fingerprint(&self) -> String {
        let mut names: Vec<_> = GET_SET_FUNCTIONS.keys().collect();
        names.sort();

        let mut s = String::new();
        for name in names {
            if let Some(func) = GET_SET_FUNCTIONS.get(name) {
                let _ = write!(s, "{name}={};", (func.get)(self));
            }
        }
        for (name, table) in &self.memory_tables {
            let _ = write!(s, "{name}(");
            for col in table.columns() {
                let _ = write!(s, "{}:{},", col.name, col.data_type);
            }
            let _ = write!(s, ");");
        }
        s
    }
}

/// Describe all settings as (name, description) pairs.
pub fn settings() -> Vec<(&'static str, &'static str)> {
    let mut out: Vec<_> = GET_SET_FUNCTIONS
        .iter()
        .map(|(name, func)| (*name, func.description))
        .collect();
    out.sort();
    out
}

struct SettingFunctions {
    set: fn(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()>,
    get: fn(conf: &CompileOptions) -> ScalarValue,
    description: &'static str,
}

impl SettingFunctions {
    const fn new<S: Setting>() -> Self {
        SettingFunctions {
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
            description: S::DESCRIPTION,
        }
    }
}

fn insert_setting<S: Setting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<EnableHashJoin>(&mut map);
    insert_setting::<AliasSeed>(&mut map);
    insert_setting::<EnablePlanCache>(&mut map);
    insert_setting::<MaxDiagnostics>(&mut map);
    insert_setting::<SourceChannelCapacity>(&mut map);
    insert_setting::<SourceChunkSize>(&mut map);

    map
});

pub trait Setting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()>;
    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue;
}

pub struct EnableHashJoin;

impl Setting for EnableHashJoin {
    const NAME: &'static str = "enable_hash_join";
    const DESCRIPTION: &'static str = "Use hash joins for equality join conditions";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()> {
        conf.enable_hash_join = scalar.try_as_bool()?;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue {
        conf.enable_hash_join.into()
    }
}

pub struct AliasSeed;

impl Setting for AliasSeed {
    const NAME: &'static str = "alias_seed";
    const DESCRIPTION: &'static str = "Seed for generating aliases of unnamed sources";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()> {
        conf.alias_seed = scalar.try_as_i64()? as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue {
        ScalarValue::Int64(conf.alias_seed as i64)
    }
}

pub struct EnablePlanCache;

impl Setting for EnablePlanCache {
    const NAME: &'static str = "enable_plan_cache";
    const DESCRIPTION: &'static str = "Reuse compiled programs for identical queries";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()> {
        conf.enable_plan_cache = scalar.try_as_bool()?;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue {
        conf.enable_plan_cache.into()
    }
}

const MIN_DIAGNOSTICS: usize = 1;
const MAX_DIAGNOSTICS: usize = 1024;

pub struct MaxDiagnostics;

impl Setting for MaxDiagnostics {
    const NAME: &'static str = "max_diagnostics";
    const DESCRIPTION: &'static str = "Maximum number of diagnostics reported for one query";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()> {
        let val = scalar.try_as_usize()?;
        if !(MIN_DIAGNOSTICS..=MAX_DIAGNOSTICS).contains(&val) {
            return Err(SiftError::new(format!(
                "max_diagnostics must be between {MIN_DIAGNOSTICS} and {MAX_DIAGNOSTICS}"
            )));
        }
        conf.max_diagnostics = val;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue {
        conf.max_diagnostics.into()
    }
}

pub struct SourceChannelCapacity;

impl Setting for SourceChannelCapacity {
    const NAME: &'static str = "source_channel_capacity";
    const DESCRIPTION: &'static str =
        "Chunks buffered per background row source, 0 disables background reads";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()> {
        conf.source_channel_capacity = scalar.try_as_usize()?;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue {
        conf.source_channel_capacity.into()
    }
}

pub struct SourceChunkSize;

impl Setting for SourceChunkSize {
    const NAME: &'static str = "source_chunk_size";
    const DESCRIPTION: &'static str = "Rows per chunk sent from a background row source";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut CompileOptions) -> Result<()> {
        let val = scalar.try_as_usize()?;
        if val == 0 {
            return Err(SiftError::new("source_chunk_size cannot be zero"));
        }
        conf.source_chunk_size = val;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileOptions) -> ScalarValue {
        conf.source_chunk_size.into()
    }
}

/// Sizing for caches shared by every query compiled through an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub plan_cache_capacity: u64,
    pub plan_cache_ttl: Duration,
    pub schema_cache_capacity: u64,
    pub schema_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            plan_cache_capacity: 256,
            plan_cache_ttl: Duration::from_secs(600),
            schema_cache_capacity: 1024,
            schema_cache_ttl: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::datatype::DataType;

    use super::*;
    use crate::table::Column;

    #[test]
    fn get_set_reset() {
        let mut opts = CompileOptions::default();
        opts.set_from_scalar("enable_hash_join", false.into())
            .unwrap();
        assert!(!opts.enable_hash_join);
        assert_eq!(
            ScalarValue::Boolean(false),
            opts.get_as_scalar("enable_hash_join").unwrap()
        );

        opts.reset("enable_hash_join").unwrap();
        assert!(opts.enable_hash_join);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut opts = CompileOptions::default();
        assert!(opts.set_from_scalar("max_diagnostics", 0i64.into()).is_err());
        assert!(opts.set_from_scalar("source_chunk_size", 0i64.into()).is_err());
        assert!(
            opts.set_from_scalar("enable_hash_join", ScalarValue::from("yes"))
                .is_err()
        );
        assert!(opts.set_from_scalar("no_such_setting", true.into()).is_err());
    }

    #[test]
    fn fingerprint_tracks_options() {
        let a = CompileOptions::default();
        let mut b = CompileOptions::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.alias_seed = 7;
        assert_ne!(a.fingerprint(), b.fingerprint());

        let c = CompileOptions::default().with_memory_table(
            "people",
            Table::new("people", vec![Column::new("Name", DataType::Utf8)]),
        );
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn settings_described() {
        let names: Vec<_> = settings().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            vec![
                "alias_seed",
                "enable_hash_join",
                "enable_plan_cache",
                "max_diagnostics",
                "source_channel_capacity",
                "source_chunk_size",
            ],
            names
        );
    }
}
