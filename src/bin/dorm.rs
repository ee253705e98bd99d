// SPDX-License-Identifier: Apache-2.0

//! dorm command line
//!
//! Discovers the configured nodes and prints results as JSON lines.
//!
//! - `discover`: contact every endpoint and report its model count.
//! - `models`: list every synthesized model per node.
//! - `find`: query one model across every primary node.
//! - `rollback`: roll back open transactions on every node.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;

use dorm::federation::FanoutReport;
use dorm::{
    observability, EngineError, EngineResult, FederationConfig, NodeRegistry, Value,
};

#[derive(Parser)]
#[command(name = "dorm")]
#[command(about = "Federated model layer over relational nodes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Endpoint URL, repeatable (e.g. postgres://10.0.0.5:5432/dorm?replica=true)
    #[arg(long = "endpoint", global = true, env = "DORM_ENDPOINTS", value_delimiter = ',')]
    endpoints: Vec<String>,

    /// JSON configuration file; DORM_* variables are used when absent
    #[arg(long, global = true, env = "DORM_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for log files (default ~/.dorm/logs)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Contact every endpoint and synthesize its schema
    Discover,
    /// List the models found on every node
    Models,
    /// Query a model across every primary node
    Find {
        /// Table or model name
        table: String,
        /// Comma-separated columns to return
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
        /// Equality filter `column=value`, repeatable
        #[arg(long = "where", value_parser = parse_condition)]
        conditions: Vec<(String, Value)>,
        /// Maximum rows per node
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Roll back open transactions on every node
    Rollback,
}

/// Splits `column=value`; the value is read as null, bool, integer or float
/// before falling back to text.
fn parse_condition(raw: &str) -> Result<(String, Value), String> {
    let (column, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected column=value, got '{}'", raw))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("missing column in '{}'", raw));
    }

    let value = match value.trim() {
        "null" | "NULL" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        v => v
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| v.parse::<f64>().map(Value::Float))
            .unwrap_or_else(|_| Value::Text(v.to_string())),
    };
    Ok((column.to_string(), value))
}

fn emit<T: Serialize>(line: &T) {
    match serde_json::to_string(line) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{}", json!({ "error": e.to_string() })),
    }
}

fn emit_failures<T>(report: &FanoutReport<T>) {
    for failure in &report.failed {
        emit(&json!({
            "node": failure.node,
            "address": failure.address,
            "error": failure.error.to_string(),
        }));
    }
    for skipped in &report.skipped {
        emit(&json!({
            "node": skipped.node,
            "address": skipped.address,
            "skipped": skipped.reason.to_string(),
        }));
    }
}

fn load_config(cli: &Cli) -> EngineResult<FederationConfig> {
    let mut config = match &cli.config {
        Some(path) => FederationConfig::from_file(path)?,
        None => FederationConfig::from_env()?,
    };
    if !cli.endpoints.is_empty() {
        config.endpoints = cli.endpoints.clone();
    }
    if config.endpoints.is_empty() {
        return Err(EngineError::validation(
            "no endpoints configured; pass --endpoint or set DORM_ENDPOINTS",
        ));
    }
    Ok(config)
}

async fn run(cli: Cli) -> EngineResult<bool> {
    let config = load_config(&cli)?;
    let registry = NodeRegistry::from_config(config)?;
    let discovery = registry.discover_nodes().await?;

    let mut clean = discovery.is_complete();
    match cli.command {
        Commands::Discover => {
            for node in registry.nodes().await {
                emit(&json!({
                    "node": node.id(),
                    "address": node.address(),
                    "port": node.port(),
                    "backend": node.backend(),
                    "replica": node.is_replica(),
                    "models": node.schema().len(),
                }));
            }
            emit_failures(&discovery);
        }
        Commands::Models => {
            for node in registry.nodes().await {
                let schema = node.schema();
                for model in schema.models() {
                    let fields: Vec<_> = model
                        .fields()
                        .iter()
                        .map(|f| {
                            json!({
                                "name": f.name,
                                "kind": f.kind,
                                "native_type": f.native_type,
                                "nullable": f.nullable,
                                "references": f
                                    .foreign_key
                                    .as_ref()
                                    .and_then(|fk| fk.model)
                                    .and_then(|id| schema.get(id))
                                    .map(|m| m.name()),
                            })
                        })
                        .collect();
                    emit(&json!({
                        "node": node.id(),
                        "model": model.name(),
                        "table": model.table_name(),
                        "fields": fields,
                    }));
                }
            }
            emit_failures(&discovery);
        }
        Commands::Find {
            table,
            select,
            conditions,
            limit,
        } => {
            let mut query = registry.find_model(&table).await;
            if !select.is_empty() {
                query = query.select(select);
            }
            for (column, value) in conditions {
                query = query.where_eq(column, value);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }

            let mut records = query.all();
            while let Some(item) = records.next().await {
                match item {
                    Ok(record) => emit(&record),
                    Err(e) => {
                        clean = false;
                        eprintln!("{}", json!({ "error": e.to_string() }));
                    }
                }
            }
        }
        Commands::Rollback => match registry.rollback_all().await {
            Ok(report) => {
                for node in report.succeeded_nodes() {
                    emit(&json!({ "node": node, "rolled_back": true }));
                }
                emit_failures(&report);
                clean &= report.failed.is_empty();
            }
            Err(e) => {
                clean = false;
                eprintln!("{}", json!({ "error": e.to_string() }));
            }
        },
    }

    let _ = registry.rollback_all().await;
    registry.shutdown().await;
    Ok(clean)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    observability::init_tracing(cli.log_dir.as_deref());

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!(error = %e, "dorm failed");
            eprintln!("{}", json!({ "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}
