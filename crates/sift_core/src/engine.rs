//! Compiling queries and running them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sift_error::{Result, SiftError};
use sift_parser::Parser;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::binder::Binder;
use crate::cache::{CacheService, PlanCacheKey};
use crate::cancel::CancellationToken;
use crate::config::{CompileOptions, EngineConfig};
use crate::passes::alias::assign_aliases;
use crate::passes::for_each_select_mut;
use crate::passes::join_strategy::choose_join_strategies;
use crate::passes::used_columns::compute_used_columns;
use crate::program::Program;
use crate::program::emitter::Emitter;
use crate::schema::SchemaProvider;
use crate::table::Table;
use crate::vm::phase::PhaseListener;
use crate::vm::{RunContext, VmPool};

/// Entry point for compiling queries.
///
/// Engines own the caches shared by everything they compile, so an engine
/// should be kept around for as long as queries are being compiled.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    cache: Arc<CacheService>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> Self {
        QueryEngine {
            cache: Arc::new(CacheService::new(&config)),
        }
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// Compile a query against a schema provider.
    ///
    /// Syntax errors carry every diagnostic collected while parsing.
    pub fn compile(
        &self,
        script: &str,
        provider: Arc<dyn SchemaProvider>,
        options: CompileOptions,
    ) -> Result<CompiledQuery> {
        let output = Parser::new(script)
            .with_max_diagnostics(options.max_diagnostics)
            .parse();
        if output.has_errors() {
            return Err(SiftError::syntax(output.diagnostics));
        }
        let mut statement = output.statement;

        let cache_key = match provider.id() {
            Some(id) if options.enable_plan_cache => Some(PlanCacheKey {
                provider: id,
                options: options.fingerprint(),
                statement: statement.cache_key(),
            }),
            _ => None,
        };

        let cached = cache_key.as_ref().and_then(|key| self.cache.get_plan(key));
        let program = match cached {
            Some(program) => {
                debug!("using cached program");
                program
            }
            None => {
                assign_aliases(&mut statement, options.alias_seed);

                let binder = Binder::new(provider.as_ref(), &self.cache, &options);
                let mut plan = binder.bind_statement(&statement)?;
                for_each_select_mut(&mut plan, &mut |select| {
                    choose_join_strategies(select, options.enable_hash_join);
                    // After join strategies so hash keys count as used.
                    compute_used_columns(select);
                });
                trace!(?plan, "bound statement");

                let program = Arc::new(Emitter::new().emit_statement(&plan)?);
                debug!(
                    instructions = program.instructions().len(),
                    "compiled program"
                );
                trace!(%program, "program listing");

                if let Some(key) = cache_key {
                    self.cache.insert_plan(key, program.clone());
                }
                program
            }
        };

        Ok(CompiledQuery {
            program,
            provider,
            memory_tables: options.memory_tables().clone(),
            channel_capacity: options.source_channel_capacity,
            chunk_size: options.source_chunk_size,
            pool: VmPool::default(),
            rows_processed: AtomicU64::new(0),
            listener: None,
        })
    }
}

/// A compiled query that can be run any number of times, from any number
/// of threads.
#[derive(Debug)]
pub struct CompiledQuery {
    program: Arc<Program>,
    provider: Arc<dyn SchemaProvider>,
    memory_tables: BTreeMap<String, Arc<Table>>,
    channel_capacity: usize,
    chunk_size: usize,
    pool: VmPool,
    rows_processed: AtomicU64,
    listener: Option<PhaseListener>,
}

impl CompiledQuery {
    /// Report execution phases of every run to `listener`.
    pub fn with_phase_listener(mut self, listener: PhaseListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Run the query. Cancelling the token stops the run at the next row.
    pub fn run(&self, token: &CancellationToken) -> Result<Table> {
        let query_id = Uuid::new_v4();
        debug!(%query_id, "running query");

        let ctx = RunContext {
            provider: self.provider.as_ref(),
            memory_tables: &self.memory_tables,
            token,
            listener: self.listener.as_ref(),
            query_id,
            channel_capacity: self.channel_capacity,
            chunk_size: self.chunk_size,
            rows_processed: &self.rows_processed,
        };

        let mut vm = self.pool.take();
        let result = vm.run(&self.program, &ctx);
        self.pool.put(vm);

        match &result {
            Ok(table) => debug!(%query_id, rows = table.num_rows(), "query finished"),
            Err(e) => debug!(%query_id, %e, "query failed"),
        }
        result
    }

    /// Rows read from sources by the most recent run.
    pub fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Relaxed)
    }

    pub fn idle_vms(&self) -> usize {
        self.pool.idle_count()
    }
}
