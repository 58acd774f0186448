//! odata-query - compile an OData query string to SQL.
//!
//! Loads entity metadata from a JSON file, parses the raw query string and
//! prints the compiled statement with its bound parameters.
//!
//! # Usage
//!
//! ```text
//! odata-query metadata.json Products '$filter=Price gt 5&$orderby=Name&$top=10'
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ODATA_SQL_DIALECT` | `postgres` | `postgres` or `sqlite` |
//! | `ODATA_MAX_OPTION_LENGTH` | `8192` | Longest accepted option value |
//! | `ODATA_MAX_EXPAND_DEPTH` | `4` | Deepest accepted `$expand` nesting |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `LOG_FORMAT` | *(unset)* | `json` for JSON log lines |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use odata_query_core::{CompiledExpand, EngineConfig, QueryEngine, SqlParam};
use odata_query_model::{QueryError, Schema};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: odata-query <metadata.json> <EntityName> '<query string>'";

/// What gets printed on success.
#[derive(Debug, Serialize)]
struct Output<'a> {
    sql: &'a str,
    params: &'a [SqlParam],
    #[serde(skip_serializing_if = "Option::is_none")]
    count_sql: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    expand: &'a [CompiledExpand],
}

/// Initialize the tracing subscriber on stderr.
///
/// Uses `RUST_LOG` if set, otherwise `log_level`. `LOG_FORMAT=json` switches
/// to JSON lines.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

fn log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

fn load_schema(path: &str) -> Result<Schema> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read metadata file {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid metadata in {path}"))
}

/// Compile the query named by `args` and render the JSON output.
fn run(args: &[String], config: EngineConfig) -> Result<String> {
    let [metadata, entity, query] = args else {
        bail!(USAGE);
    };
    let schema = load_schema(metadata)?;
    debug!(entities = schema.entities.len(), path = %metadata, "loaded metadata");

    let engine = QueryEngine::new(config);
    info!(entity = %entity, dialect = %engine.config().dialect, "compiling query");
    let compiled = engine.compile_query_string(&schema, entity, query)?;

    let output = Output {
        sql: &compiled.statement.sql,
        params: &compiled.statement.params,
        count_sql: compiled.count.as_ref().map(|c| c.sql.as_str()),
        expand: &compiled.expand,
    };
    serde_json::to_string_pretty(&output).context("failed to serialize output")
}

fn main() -> ExitCode {
    if let Err(e) = init_tracing(&log_level()) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args, EngineConfig::from_env()) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            match err.downcast_ref::<QueryError>() {
                Some(query_error) => match query_error.position() {
                    Some(position) => eprintln!(
                        "{} error at position {position}: {query_error}",
                        query_error.kind()
                    ),
                    None => eprintln!("{} error: {query_error}", query_error.kind()),
                },
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
