//! Entry point tying translation, rewriting, caching and execution together.

use std::sync::Arc;

use relshape_error::Result;
use tracing::debug;

use crate::cache::{CacheKey, CacheStats, CommandCache};
use crate::config::session::SessionConfig;
use crate::execution::retry::{ExecutionStrategy, NoRetry, RetryTransient};
use crate::execution::results::{ExecutionEnv, QueryResults, QueryStream};
use crate::execution::{Driver, QueryHandle};
use crate::expr::select_expr::SelectExpr;
use crate::metadata::MetadataProvider;
use crate::query::Queryable;
use crate::rewrite::compile_query;
use crate::rewrite::parameters::{ParameterProcessor, ParameterValues};
use crate::shaper::ResultShaper;
use crate::sqlgen::dialect::{AnsiDialect, Dialect};
use crate::sqlgen::{self, Command, CommandTemplate};
use crate::translate::TranslatorRegistry;
use crate::translate::context::{CompilationContext, DiagnosticsSink, NopDiagnostics};
use crate::translate::queryable::QueryableTranslator;

/// A compiled statement.
///
/// Never mutated once compiled. The command cache keys on the identity of the
/// statement, so recompiling a query produces new cache entries.
#[derive(Debug, PartialEq)]
pub struct QueryStatement {
    pub select: SelectExpr,
}

/// A query compiled up to the point of knowing parameter values.
#[derive(Debug)]
pub struct PreparedQuery {
    /// Root statement first, then split collection statements.
    pub statements: Vec<Arc<QueryStatement>>,
    pub shaper: Arc<ResultShaper>,
}

#[derive(Debug)]
pub struct Engine {
    config: SessionConfig,
    metadata: Arc<dyn MetadataProvider>,
    registry: TranslatorRegistry,
    diagnostics: Arc<dyn DiagnosticsSink>,
    dialect: Arc<dyn Dialect>,
    driver: Arc<dyn Driver>,
    strategy: Arc<dyn ExecutionStrategy>,
    cache: CommandCache,
}

impl Engine {
    pub fn new(config: SessionConfig, metadata: Arc<dyn MetadataProvider>, driver: Arc<dyn Driver>) -> Self {
        let strategy: Arc<dyn ExecutionStrategy> = match config.max_retry_count {
            0 => Arc::new(NoRetry),
            max_retries => Arc::new(RetryTransient { max_retries }),
        };

        Engine {
            cache: CommandCache::new(config.command_cache_capacity),
            config,
            metadata,
            registry: TranslatorRegistry::with_builtins(),
            diagnostics: Arc::new(NopDiagnostics),
            dialect: Arc::new(AnsiDialect),
            driver,
            strategy,
        }
    }

    pub fn with_registry(mut self, registry: TranslatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_execution_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Translate and rewrite a query.
    ///
    /// All compile time errors surface here, before any command runs.
    pub fn compile(&self, query: &Queryable) -> Result<Arc<PreparedQuery>> {
        let mut ctx = CompilationContext::new(self.config.query_splitting_behavior, self.diagnostics.clone());
        ctx.warn_multiple_collections = self.config.warn_multiple_collections;

        let shaped = QueryableTranslator::new(self.metadata.as_ref(), &self.registry, &mut ctx).translate(query)?;
        let compiled = compile_query(&mut ctx, shaped)?;

        Ok(Arc::new(PreparedQuery {
            statements: compiled
                .statements
                .into_iter()
                .map(|select| Arc::new(QueryStatement { select }))
                .collect(),
            shaper: Arc::new(compiled.shaper),
        }))
    }

    /// Get the command template for a statement, going through the cache.
    pub fn command_template(
        &self,
        statement: &Arc<QueryStatement>,
        values: &ParameterValues,
    ) -> Result<Arc<CommandTemplate>> {
        let key = CacheKey::new(statement, values);
        self.cache.get_or_compile(&key, || {
            let processor = ParameterProcessor::new(values, self.config.parameterized_collection_mode);
            let (select, cacheable) = processor.process(statement.select.clone())?;
            let template = sqlgen::generate(self.dialect.as_ref(), &select)?;
            Ok((template, cacheable))
        })
    }

    /// Build the commands to run for a prepared query.
    pub fn commands(&self, prepared: &PreparedQuery, values: &ParameterValues) -> Result<Vec<Command>> {
        prepared
            .statements
            .iter()
            .map(|statement| {
                let template = self.command_template(statement, values)?;
                Ok(Command {
                    sql: template.sql.clone(),
                    values: template.bind(values)?,
                })
            })
            .collect()
    }

    /// Execute a prepared query, returning a blocking iterator over the
    /// results.
    pub fn execute(&self, prepared: &PreparedQuery, values: &ParameterValues) -> Result<QueryResults> {
        self.execute_with_handle(prepared, values, QueryHandle::new())
    }

    pub fn execute_with_handle(
        &self,
        prepared: &PreparedQuery,
        values: &ParameterValues,
        handle: QueryHandle,
    ) -> Result<QueryResults> {
        let commands = self.commands(prepared, values)?;
        debug!(commands = commands.len(), "built commands");
        Ok(QueryResults::new(prepared.shaper.clone(), commands, self.execution_env(handle)))
    }

    /// Execute a prepared query, returning an async stream over the results.
    pub fn execute_async(
        &self,
        prepared: &PreparedQuery,
        values: &ParameterValues,
        handle: QueryHandle,
    ) -> Result<QueryStream> {
        let commands = self.commands(prepared, values)?;
        debug!(commands = commands.len(), "built commands");
        Ok(QueryStream::new(prepared.shaper.clone(), commands, self.execution_env(handle)))
    }

    fn execution_env(&self, handle: QueryHandle) -> ExecutionEnv {
        ExecutionEnv {
            driver: self.driver.clone(),
            strategy: self.strategy.clone(),
            buffer_results: self.config.buffer_results,
            handle,
        }
    }
}
