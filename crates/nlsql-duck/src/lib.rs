//! DuckDB query gateway
//!
//! Executes validated statements on a blocking thread against a cloned
//! connection, bounded by a wall-clock timeout and a row budget, and
//! classifies DuckDB errors for the repair loop.

pub mod classify;
pub mod value;

use async_trait::async_trait;
use duckdb::{AccessMode, Config, Connection};
use nlsql_core::{ExecutionFailure, FailureCategory, QueryGateway, ResultSet, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub use classify::classify;
pub use value::{row_to_json, value_to_json};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Row budget exceeded: more than {0} rows")]
    RowBudget(u64),

    #[error("Query timed out after {0} ms")]
    Timeout(u64),

    #[error("Query worker failed: {0}")]
    Worker(String),

    #[error("Connection lock poisoned")]
    Poisoned,
}

impl GatewayError {
    pub fn category(&self) -> FailureCategory {
        match self {
            GatewayError::Database(e) => classify(&e.to_string()),
            GatewayError::RowBudget(_) => FailureCategory::Data,
            GatewayError::Timeout(_) => FailureCategory::Timeout,
            GatewayError::Worker(_) | GatewayError::Poisoned => FailureCategory::Connectivity,
        }
    }
}

impl From<GatewayError> for ExecutionFailure {
    fn from(err: GatewayError) -> Self {
        ExecutionFailure::new(err.category(), err.to_string())
    }
}

/// Resource limits applied to every execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBudget {
    pub max_time_ms: Option<u64>,
    pub max_memory_mb: Option<u64>,
    pub max_rows: Option<u64>,
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self {
            max_time_ms: Some(30_000),
            max_memory_mb: None,
            max_rows: Some(10_000),
        }
    }
}

/// DuckDB-backed [`QueryGateway`]
#[derive(Clone)]
pub struct DuckGateway {
    conn: Arc<Mutex<Connection>>,
    budget: ExecutionBudget,
}

impl DuckGateway {
    /// Open a database file, optionally read-only.
    ///
    /// External access is disabled: statements cannot read or write files
    /// or remote data beyond the database itself.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let mut config = Config::default().enable_external_access(false)?;
        if read_only {
            config = config.access_mode(AccessMode::ReadOnly)?;
        }
        let conn = Connection::open_with_flags(path, config)?;
        debug!(path = %path.display(), read_only, "Opened DuckDB database");
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, external access disabled
    pub fn in_memory() -> Result<Self, GatewayError> {
        let config = Config::default().enable_external_access(false)?;
        Ok(Self::from_connection(Connection::open_in_memory_with_flags(config)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            budget: ExecutionBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: ExecutionBudget) -> Result<Self, GatewayError> {
        if let Some(max_memory_mb) = budget.max_memory_mb {
            let pragma = format!("PRAGMA memory_limit='{}MB'", max_memory_mb);
            self.connection()?.execute_batch(&pragma)?;
        }
        self.budget = budget;
        Ok(self)
    }

    pub fn budget(&self) -> ExecutionBudget {
        self.budget
    }

    /// A fresh connection to the same database
    pub fn connection(&self) -> Result<Connection, GatewayError> {
        let base = self.conn.lock().map_err(|_| GatewayError::Poisoned)?;
        Ok(base.try_clone()?)
    }

    /// Run statements that return no rows (schema setup, fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<(), GatewayError> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    /// Run a statement on the current thread
    pub fn query_blocking(&self, sql: &str) -> Result<ResultSet, GatewayError> {
        run_query(&self.connection()?, sql, self.budget.max_rows)
    }

    /// Run a statement on a blocking thread, bounded by the time budget.
    ///
    /// A statement that overruns is interrupted so the worker thread is
    /// released.
    pub async fn query(&self, sql: &str) -> Result<ResultSet, GatewayError> {
        let conn = self.connection()?;
        let interrupt = conn.interrupt_handle();
        let max_rows = self.budget.max_rows;
        let owned = sql.to_string();
        let task = tokio::task::spawn_blocking(move || run_query(&conn, &owned, max_rows));

        let joined = match self.budget.max_time_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), task).await {
                Ok(joined) => joined,
                Err(_) => {
                    interrupt.interrupt();
                    warn!(timeout_ms = ms, "Query timed out, interrupted");
                    return Err(GatewayError::Timeout(ms));
                }
            },
            None => task.await,
        };

        joined.map_err(|e| GatewayError::Worker(e.to_string()))?
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: Option<u64>) -> Result<ResultSet, GatewayError> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;

    let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut result_rows = Vec::new();
    while let Some(row) = rows.next()? {
        if let Some(max_rows) = max_rows {
            if result_rows.len() as u64 >= max_rows {
                return Err(GatewayError::RowBudget(max_rows));
            }
        }

        let values = row_to_json(row, columns.len())?;
        let json_row: Row = columns.iter().cloned().zip(values).collect();
        result_rows.push(json_row);
    }

    debug!(
        rows = result_rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Query complete"
    );
    Ok(ResultSet::new(columns, result_rows))
}

#[async_trait]
impl QueryGateway for DuckGateway {
    async fn execute(&self, sql: &str) -> Result<ResultSet, ExecutionFailure> {
        self.query(sql).await.map_err(|e| {
            let failure = ExecutionFailure::from(e);
            warn!(category = %failure.category, "Query failed: {}", failure.message);
            failure
        })
    }
}
