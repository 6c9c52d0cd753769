//! External capabilities the loop drives
//!
//! Both are I/O-bound and owned by collaborators (a language model client, a
//! database). Their own timeouts must surface as failures, never as hangs.

use async_trait::async_trait;

use crate::attempt::{RegenerationContext, ResultSet};
use crate::failure::{ExecutionFailure, GenerationFailure};
use crate::request::Request;

/// Everything the generator gets for one call
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub request: &'a Request,
    /// 0 for the original generation
    pub attempt: u32,
    /// Present on regeneration: the previous statement and why it failed
    pub repair: Option<&'a RegenerationContext>,
}

/// Maps a request (and optionally a prior failure) to SQL text
#[async_trait]
pub trait StatementGenerator: Send + Sync {
    async fn generate(&self, context: GenerationContext<'_>) -> Result<String, GenerationFailure>;
}

/// Executes validated SQL against the backing store
#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ResultSet, ExecutionFailure>;
}
