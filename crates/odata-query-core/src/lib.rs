//! OData v4 query expression engine.
//!
//! Turns the system query options of one request (`$filter`, `$orderby`,
//! `$apply`, `$compute`, `$select`, `$expand`, `$top`, `$skip`, `$count`)
//! into parameterized SQL, or applies them to an in-memory collection.
//!
//! [`QueryEngine`] bundles an [`EngineConfig`] with a [`ParserPool`] and is
//! the usual entry point; the modules are usable on their own.

pub mod apply;
pub mod compile;
pub mod config;
pub mod expression;
pub mod memory;
pub mod options;
pub mod pool;

use odata_query_model::{QueryError, QueryResult, Schema};
use tracing::warn;

pub use compile::{CompiledExpand, CompiledQuery, CompiledStatement, Dialect, SqlParam};
pub use config::EngineConfig;
pub use expression::{Expr, parse_expression};
pub use memory::{AccessorPredicate, FieldAccessor, FieldValue, PredicateEvaluator};
pub use options::QueryOptions;
pub use pool::ParserPool;

/// Parser pool and configuration shared across requests.
///
/// `QueryEngine` is `Send + Sync`; wrap it in an `Arc` to share it.
#[derive(Debug, Default)]
pub struct QueryEngine {
    config: EngineConfig,
    pool: ParserPool,
}

impl QueryEngine {
    /// Create an engine whose pool holds `config.pool_capacity` buffers.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let pool = ParserPool::new(config.pool_capacity);
        Self { config, pool }
    }

    /// Create an engine from [`EngineConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The token buffer pool.
    #[must_use]
    pub fn pool(&self) -> &ParserPool {
        &self.pool
    }

    /// Parse one boolean or value expression.
    pub fn parse_expression(&self, input: &str) -> QueryResult<Expr> {
        if input.chars().count() > self.config.max_option_length {
            warn!(
                length = input.len(),
                limit = self.config.max_option_length,
                "expression rejected by length limit"
            );
            return Err(QueryError::InvalidOption {
                option: "expression".to_owned(),
                message: format!(
                    "longer than {} characters",
                    self.config.max_option_length
                ),
            });
        }
        let mut tokens = self.pool.acquire();
        expression::parse_expression_with(input, &mut tokens)
    }

    /// Parse `(name, value)` option pairs.
    pub fn parse_options<I, K, V>(&self, pairs: I) -> QueryResult<QueryOptions>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        QueryOptions::parse_pairs_pooled(pairs, &self.config, &self.pool)
    }

    /// Parse a raw URL query string such as `$filter=Price%20gt%205&$top=10`.
    pub fn parse_query_string(&self, query: &str) -> QueryResult<QueryOptions> {
        let query = query.strip_prefix('?').unwrap_or(query);
        self.parse_options(form_urlencoded::parse(query.as_bytes()))
    }

    /// Compile `options` for `entity` in the configured dialect.
    pub fn compile(
        &self,
        schema: &Schema,
        entity: &str,
        options: &QueryOptions,
    ) -> QueryResult<CompiledQuery> {
        compile::compile_query(schema, entity, options, self.config.dialect)
    }

    /// Parse and compile a raw query string in one step.
    pub fn compile_query_string(
        &self,
        schema: &Schema,
        entity: &str,
        query: &str,
    ) -> QueryResult<CompiledQuery> {
        let options = self.parse_query_string(query)?;
        self.compile(schema, entity, &options)
    }

    /// Apply `options` to an in-memory collection; see [`memory::evaluate`].
    pub fn evaluate<T, P>(
        &self,
        items: &[T],
        options: &QueryOptions,
        predicate: &P,
    ) -> QueryResult<Vec<T>>
    where
        T: FieldAccessor + Clone,
        P: PredicateEvaluator<T> + ?Sized,
    {
        memory::evaluate(items, options, predicate)
    }
}
