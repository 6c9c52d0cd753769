//! nlsql server
//!
//! Accepts natural-language questions over HTTP or MCP, generates SQL with
//! OpenAI or Azure OpenAI, checks it against the guardrail rules, runs it on
//! DuckDB and repairs it within a bounded budget.

use anyhow::{anyhow, Context};
use nlsql_core::LoopConfig;
use nlsql_duck::{DuckGateway, ExecutionBudget};
use nlsql_rules::RuleSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod app;
mod catalog;
mod chart;
mod config;
mod http;
mod llm;
mod logging;
mod mcp;
mod metrics;

use crate::app::AppState;
use crate::catalog::SchemaCache;
use crate::config::{Config, Transport};
use crate::llm::LlmGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("NLSQL_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path).with_context(|| format!("loading {}", config_path))?;
    config.apply_logging_env();
    logging::init();

    // Invalid rules are fatal at startup
    let rules = RuleSet::load(&config.orchestrator.rules_path)
        .with_context(|| format!("loading rules from {}", config.orchestrator.rules_path))?;
    info!(rules = rules.len(), "Guardrail rules loaded");

    let db = &config.database;
    let gateway = match &db.path {
        Some(path) => DuckGateway::open(path, db.read_only).with_context(|| format!("opening database {}", path))?,
        None => DuckGateway::in_memory()?,
    }
    .with_budget(ExecutionBudget {
        max_time_ms: Some(db.timeout_ms),
        max_memory_mb: None,
        max_rows: Some(db.max_rows),
    })?;
    info!(path = ?db.path, read_only = db.read_only, "Database ready");

    let llm = Arc::new(LlmGenerator::from_config(&config.llm)?);

    let state = AppState::new(
        llm.clone(),
        Arc::new(gateway.clone()),
        Arc::new(rules),
        SchemaCache::new(gateway),
        LoopConfig::new(config.orchestrator.max_regenerations),
        Duration::from_millis(config.orchestrator.request_timeout_ms),
    )?
    .with_summarizer(llm);

    let host = config.server.host.clone();
    let port = config.server.port;
    match config.server.transport {
        Transport::Http => http::serve(state, &host, port).await?,
        Transport::Mcp => mcp::serve(state, host, port).await.map_err(|e| anyhow!(e))?,
    }

    Ok(())
}
