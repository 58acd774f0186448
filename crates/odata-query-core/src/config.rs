//! Engine configuration.
//!
//! Provides [`EngineConfig`] for the limits and SQL dialect the engine uses.
//! Values can be loaded from environment variables via
//! [`EngineConfig::from_env`]; anything missing or unparsable keeps its
//! default.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::compile::Dialect;

/// Default cap on the length of a single raw option value, in characters.
pub const DEFAULT_MAX_OPTION_LENGTH: usize = 8 * 1024;

/// Default maximum nesting of `$expand`.
pub const DEFAULT_MAX_EXPAND_DEPTH: usize = 4;

/// Default number of idle token buffers kept by the parser pool.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// Query engine configuration.
///
/// # Examples
///
/// ```
/// use odata_query_core::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_expand_depth, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// SQL flavour for placeholders and function spellings.
    #[builder(default)]
    pub dialect: Dialect,

    /// Longest accepted raw option value; longer values are rejected before tokenizing.
    #[builder(default = DEFAULT_MAX_OPTION_LENGTH)]
    pub max_option_length: usize,

    /// Deepest accepted `$expand` nesting (1 = no nested `$expand`).
    #[builder(default = DEFAULT_MAX_EXPAND_DEPTH)]
    pub max_expand_depth: usize,

    /// Idle token buffers retained by [`crate::pool::ParserPool`].
    #[builder(default = DEFAULT_POOL_CAPACITY)]
    pub pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            max_option_length: DEFAULT_MAX_OPTION_LENGTH,
            max_expand_depth: DEFAULT_MAX_EXPAND_DEPTH,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ODATA_SQL_DIALECT` | `postgres` |
    /// | `ODATA_MAX_OPTION_LENGTH` | `8192` |
    /// | `ODATA_MAX_EXPAND_DEPTH` | `4` |
    /// | `ODATA_POOL_CAPACITY` | `32` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("ODATA_SQL_DIALECT") {
            if let Ok(dialect) = v.parse() {
                config.dialect = dialect;
            }
        }
        if let Some(n) = env_usize("ODATA_MAX_OPTION_LENGTH") {
            config.max_option_length = n;
        }
        if let Some(n) = env_usize("ODATA_MAX_EXPAND_DEPTH") {
            config.max_expand_depth = n;
        }
        if let Some(n) = env_usize("ODATA_POOL_CAPACITY") {
            config.pool_capacity = n;
        }

        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_create_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.dialect, Dialect::Postgres);
        assert_eq!(config.max_option_length, 8192);
        assert_eq!(config.max_expand_depth, 4);
        assert_eq!(config.pool_capacity, 32);
    }

    #[test]
    fn test_should_load_from_env() {
        let config = EngineConfig::from_env();
        assert!(config.max_option_length > 0);
    }

    #[test]
    fn test_should_build_with_typed_builder() {
        let config = EngineConfig::builder()
            .dialect(Dialect::Sqlite)
            .max_expand_depth(1)
            .build();
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert_eq!(config.max_expand_depth, 1);
        assert_eq!(config.max_option_length, DEFAULT_MAX_OPTION_LENGTH);
    }

    #[test]
    fn test_should_deserialize_partial_camel_case_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"dialect":"sqlite","maxOptionLength":16}"#).unwrap();
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert_eq!(config.max_option_length, 16);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
    }
}
