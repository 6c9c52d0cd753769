//! Candidates, attempts and terminal results

use nlsql_rules::Verdict;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::failure::{AbortReason, ExecutionFailure, RepairReason};

/// One result row: column name to value
pub type Row = Map<String, Value>;

/// Rows returned by a successful execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column names in select-list order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A generated statement plus where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStatement {
    pub sql: String,
    /// 0 for the original generation, n for the n-th regeneration
    pub attempt: u32,
    /// The failure that prompted this regeneration, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompted_by: Option<RepairReason>,
}

/// What the generator is told when asked to repair a statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationContext {
    pub previous_statement: String,
    pub reason: RepairReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows { result: ResultSet },
    Failed { failure: ExecutionFailure },
}

/// One pass through generate, validate and (if valid) execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub candidate: CandidateStatement,
    pub verdict: Verdict,
    /// Absent when validation failed and the statement never ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
}

/// Terminal result of a run. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunResult {
    Success {
        statement: String,
        rows: ResultSet,
        history: Vec<Attempt>,
    },
    Exhausted {
        last_statement: String,
        last_failure: RepairReason,
        history: Vec<Attempt>,
    },
    Aborted {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_statement: Option<String>,
        failure: AbortReason,
        history: Vec<Attempt>,
    },
}

impl RunResult {
    pub fn history(&self) -> &[Attempt] {
        match self {
            RunResult::Success { history, .. }
            | RunResult::Exhausted { history, .. }
            | RunResult::Aborted { history, .. } => history,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success { .. })
    }

    /// Short label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RunResult::Success { .. } => "success",
            RunResult::Exhausted { .. } => "exhausted",
            RunResult::Aborted {
                failure: AbortReason::Cancelled,
                ..
            } => "cancelled",
            RunResult::Aborted { .. } => "aborted",
        }
    }

    /// The last statement produced, whatever the outcome
    pub fn statement(&self) -> Option<&str> {
        match self {
            RunResult::Success { statement, .. } => Some(statement),
            RunResult::Exhausted { last_statement, .. } => Some(last_statement),
            RunResult::Aborted { last_statement, .. } => last_statement.as_deref(),
        }
    }
}
