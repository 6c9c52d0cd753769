//! nlsql core - the generate, validate, execute, repair loop
//!
//! The statement generator and the query gateway are traits so that a
//! language model and a database can be swapped for deterministic fakes.

pub mod attempt;
pub mod capability;
pub mod failure;
pub mod orchestrator;
pub mod request;

pub use attempt::{Attempt, CandidateStatement, ExecutionOutcome, RegenerationContext, ResultSet, Row, RunResult};
pub use capability::{GenerationContext, QueryGateway, StatementGenerator};
pub use failure::{AbortReason, ExecutionFailure, FailureCategory, GenerationFailure, RepairReason};
pub use orchestrator::{LoopConfig, Orchestrator};
pub use request::{Request, RequestError, Role, Turn};

pub use tokio_util::sync::CancellationToken;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::attempt::{ResultSet, RunResult};
    pub use crate::capability::{QueryGateway, StatementGenerator};
    pub use crate::orchestrator::{LoopConfig, Orchestrator};
    pub use crate::request::Request;
    pub use nlsql_rules::{RuleSet, Validator};
}
