//! Application state shared by the HTTP and MCP entry points

use chrono::{DateTime, Utc};
use nlsql_core::{
    CancellationToken, LoopConfig, Orchestrator, QueryGateway, Request, RequestError, RunResult, StatementGenerator,
    Turn,
};
use nlsql_rules::{RuleSet, Severity, Validator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn, Level};
use uuid::Uuid;

use crate::catalog::{DatabaseCatalog, SchemaCache};
use crate::chart::{ChartHint, ChartRecommender};
use crate::llm::AnswerSummarizer;
use crate::metrics::Metrics;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Catalog unavailable: {0}")]
    Catalog(#[from] nlsql_duck::GatewayError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid chart pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Body of a query call
#[derive(Debug, Clone, Deserialize)]
pub struct QueryInput {
    pub query: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    /// Schema text to use instead of the database catalog
    #[serde(default)]
    pub schema_hint: Option<String>,
    /// Per-request repair budget, capped by the configured one
    #[serde(default)]
    pub max_regenerations: Option<u32>,
    /// Ask for a prose answer after a successful run
    #[serde(default)]
    pub summarize: bool,
}

impl QueryInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            history: Vec::new(),
            schema_hint: None,
            max_regenerations: None,
            summarize: false,
        }
    }
}

/// Terminal result plus what the service adds around it
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub request_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub result: RunResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Public view of a loaded rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub severity: Severity,
    pub description: String,
}

#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    rules: Arc<RuleSet>,
    catalog: Arc<SchemaCache>,
    summarizer: Option<Arc<dyn AnswerSummarizer>>,
    charts: Arc<ChartRecommender>,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn StatementGenerator>,
        gateway: Arc<dyn QueryGateway>,
        rules: Arc<RuleSet>,
        catalog: SchemaCache,
        loop_config: LoopConfig,
        request_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let orchestrator = Orchestrator::new(generator, gateway, Validator::new(rules.clone()), loop_config);
        let charts = ChartRecommender::new()?;

        Ok(Self {
            orchestrator,
            rules,
            catalog: Arc::new(catalog),
            summarizer: None,
            charts: Arc::new(charts),
            metrics: Arc::new(Metrics::new()?),
            request_timeout,
        })
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn AnswerSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn rule_summaries(&self) -> Vec<RuleSummary> {
        self.rules
            .iter()
            .map(|rule| RuleSummary {
                name: rule.name().to_string(),
                severity: rule.severity(),
                description: rule.description().to_string(),
            })
            .collect()
    }

    pub async fn catalog(&self) -> Result<Arc<DatabaseCatalog>, ServerError> {
        Ok(self.catalog.get().await?)
    }

    /// Run one request to a terminal result.
    ///
    /// Only malformed input is an error; every loop outcome is a response.
    pub async fn answer(&self, input: QueryInput) -> Result<QueryResponse, ServerError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let mut request = Request::new(input.query)?.with_history(input.history);
        request = match input.schema_hint {
            Some(hint) => request.with_schema_hint(hint),
            None => match self.catalog.prompt_context().await {
                Some(schema) => request.with_schema_hint(schema),
                None => request,
            },
        };

        let configured = self.orchestrator.config();
        let orchestrator = match input.max_regenerations {
            Some(max) if max < configured.max_regenerations => {
                self.orchestrator.clone().with_config(LoopConfig::new(max))
            }
            _ => self.orchestrator.clone(),
        };

        info!(%request_id, "Handling query: {}", request.text());

        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let deadline = {
            let cancel = cancel.clone();
            let timeout = self.request_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };
        let result = orchestrator.run_until_cancelled(&request, &cancel).await;
        deadline.abort();

        let chart = match &result {
            RunResult::Success { statement, rows, .. } => Some(self.charts.recommend(request.text(), statement, rows)),
            _ => None,
        };

        let answer = match (&result, &self.summarizer) {
            (RunResult::Success { statement, rows, .. }, Some(summarizer)) if input.summarize => {
                // The summary shares the request deadline with the loop
                let remaining = self.request_timeout.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, summarizer.summarize(request.text(), statement, rows)).await {
                    Ok(Ok(answer)) => {
                        self.metrics.observe_summary(true);
                        Some(answer)
                    }
                    Ok(Err(e)) => {
                        warn!(%request_id, "Answer summary failed: {}", e);
                        self.metrics.observe_summary(false);
                        None
                    }
                    Err(_) => {
                        warn!(%request_id, "Answer summary skipped, request deadline reached");
                        self.metrics.observe_summary(false);
                        None
                    }
                }
            }
            _ => None,
        };

        let elapsed = started.elapsed();
        self.metrics.observe_run(&result, elapsed);
        crate::log_event!(
            level: Level::INFO,
            event: "run_finished",
            request_id: request_id,
            outcome: result.label(),
            attempts: result.history().len(),
            elapsed_ms: elapsed.as_millis()
        );

        Ok(QueryResponse {
            request_id,
            completed_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            result,
            chart,
            answer,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators for handler tests

    use super::*;
    use async_trait::async_trait;
    use nlsql_core::{GenerationContext, GenerationFailure, ResultSet};
    use nlsql_duck::DuckGateway;

    use crate::llm::LlmError;

    pub const RULES: &str = r#"
rules:
  - name: no-destructive
    kind: forbidden_keywords
    keywords: [DELETE, DROP, UPDATE, INSERT]
"#;

    /// Answers attempt `n` with `statements[n]`, repeating the last one
    pub struct ScriptedGenerator(pub Vec<&'static str>);

    #[async_trait]
    impl StatementGenerator for ScriptedGenerator {
        async fn generate(&self, context: GenerationContext<'_>) -> Result<String, GenerationFailure> {
            let idx = (context.attempt as usize).min(self.0.len() - 1);
            Ok(self.0[idx].to_string())
        }
    }

    pub struct FixedSummary(pub Result<&'static str, ()>);

    #[async_trait]
    impl AnswerSummarizer for FixedSummary {
        async fn summarize(&self, _question: &str, _statement: &str, _rows: &ResultSet) -> Result<String, LlmError> {
            self.0.map(str::to_string).map_err(|_| LlmError::EmptyResponse)
        }
    }

    pub fn sales_gateway() -> DuckGateway {
        let gateway = DuckGateway::in_memory().unwrap();
        gateway
            .execute_batch(
                "CREATE TABLE sales (region VARCHAR, year INTEGER, amount DOUBLE);
                 INSERT INTO sales VALUES
                   ('north', 2024, 100.0), ('north', 2024, 20.5),
                   ('south', 2024, 80.0), ('east', 2024, 42.25),
                   ('west', 2024, 99.0), ('west', 2023, 10.0);",
            )
            .unwrap();
        gateway
    }

    pub fn state(statements: Vec<&'static str>, max_regenerations: u32) -> AppState {
        let gateway = sales_gateway();
        AppState::new(
            Arc::new(ScriptedGenerator(statements)),
            Arc::new(gateway.clone()),
            Arc::new(RuleSet::from_yaml_str(RULES).unwrap()),
            SchemaCache::new(gateway),
            LoopConfig::new(max_regenerations),
            Duration::from_secs(10),
        )
        .unwrap()
    }
}
