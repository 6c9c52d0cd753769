//! Failure taxonomy for the repair loop
//!
//! - [`GenerationFailure`]: the generator itself is unusable. Fatal.
//! - validation violations: recoverable by regeneration.
//! - [`ExecutionFailure`] with a retryable category: recoverable by regeneration.
//! - [`ExecutionFailure`] with a fatal category: infrastructure problem, not retried.

use nlsql_rules::Violation;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classified execution failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Statement does not parse
    Syntax,
    /// Statement parses but does not bind against the schema (unknown column, table)
    Semantic,
    /// Statement ran into the data (bad cast, row budget exceeded)
    Data,
    Permission,
    Timeout,
    Connectivity,
}

impl FailureCategory {
    /// Whether producing a different statement could fix this failure
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureCategory::Syntax | FailureCategory::Semantic | FailureCategory::Data
        )
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::Syntax => "syntax",
            FailureCategory::Semantic => "semantic",
            FailureCategory::Data => "data",
            FailureCategory::Permission => "permission",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Connectivity => "connectivity",
        };
        f.write_str(name)
    }
}

/// Structured failure returned by a query gateway
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category} error: {message}")]
pub struct ExecutionFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

/// The statement generator could not produce a candidate
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GenerationFailure {
    #[error("Generator unreachable: {0}")]
    Unreachable(String),

    #[error("Generator timed out after {0} ms")]
    Timeout(u64),

    #[error("Generator returned an empty statement")]
    Empty,

    #[error("Generator returned unusable output: {0}")]
    Malformed(String),
}

/// Why a regeneration was requested. Only recoverable failures qualify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum RepairReason {
    Validation { violations: Vec<Violation> },
    Execution { failure: ExecutionFailure },
}

impl fmt::Display for RepairReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairReason::Validation { violations } => {
                let rules: Vec<&str> = violations.iter().map(|v| v.rule.as_str()).collect();
                write!(f, "validation failed: {}", rules.join(", "))
            }
            RepairReason::Execution { failure } => write!(f, "execution failed: {}", failure),
        }
    }
}

/// Why a run stopped without exhausting its repair budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum AbortReason {
    Generation { failure: GenerationFailure },
    Execution { failure: ExecutionFailure },
    /// The caller abandoned the request
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Generation { failure } => write!(f, "{}", failure),
            AbortReason::Execution { failure } => write!(f, "execution aborted: {}", failure),
            AbortReason::Cancelled => f.write_str("request cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categories() {
        assert!(FailureCategory::Syntax.is_retryable());
        assert!(FailureCategory::Semantic.is_retryable());
        assert!(FailureCategory::Data.is_retryable());
        assert!(!FailureCategory::Permission.is_retryable());
        assert!(!FailureCategory::Timeout.is_retryable());
        assert!(!FailureCategory::Connectivity.is_retryable());
    }

    #[test]
    fn test_display() {
        let failure = ExecutionFailure::new(FailureCategory::Semantic, "column \"regoin\" not found");
        assert_eq!(failure.to_string(), "semantic error: column \"regoin\" not found");
        assert_eq!(
            AbortReason::Generation {
                failure: GenerationFailure::Timeout(500)
            }
            .to_string(),
            "Generator timed out after 500 ms"
        );
    }

    #[test]
    fn test_serialized_shape() {
        let reason = RepairReason::Execution {
            failure: ExecutionFailure::new(FailureCategory::Syntax, "near FORM"),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["stage"], "execution");
        assert_eq!(json["failure"]["category"], "syntax");

        let json = serde_json::to_value(GenerationFailure::Empty).unwrap();
        assert_eq!(json["kind"], "empty");
    }
}
