//! The bounded repair loop
//!
//! ```text
//! Generating -> Validating -> Executing -> Succeeded
//!     ^             |             |
//!     +--- repair --+-------------+   (recoverable failure, budget left)
//!                   |             |
//!               Exhausted     Exhausted / Aborted
//! ```
//!
//! Each step consumes the current [`LoopState`] (which carries the attempt
//! trail) and returns the next one, so the machine has no ambient mutable
//! fields. One `Orchestrator::run` call serves exactly one request, and steps
//! never overlap.

use nlsql_rules::{Validator, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attempt::{Attempt, CandidateStatement, ExecutionOutcome, RegenerationContext, RunResult};
use crate::capability::{GenerationContext, QueryGateway, StatementGenerator};
use crate::failure::{AbortReason, GenerationFailure, RepairReason};
use crate::request::Request;

/// The only knob the loop itself consumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Regenerations allowed after the first attempt; total generator calls
    /// never exceed `max_regenerations + 1`
    pub max_regenerations: u32,
}

impl LoopConfig {
    pub fn new(max_regenerations: u32) -> Self {
        Self { max_regenerations }
    }
}

/// Attempt counter and audit trail for one request
#[derive(Debug, Default)]
struct Trail {
    regenerations: u32,
    history: Vec<Attempt>,
    last_statement: Option<String>,
}

impl Trail {
    fn abort(self, failure: AbortReason) -> RunResult {
        RunResult::Aborted {
            last_statement: self.last_statement,
            failure,
            history: self.history,
        }
    }
}

enum LoopState {
    Generating {
        trail: Trail,
        repair: Option<RegenerationContext>,
    },
    Validating {
        trail: Trail,
        candidate: CandidateStatement,
    },
    Executing {
        trail: Trail,
        candidate: CandidateStatement,
        verdict: Verdict,
    },
    Done(RunResult),
}

/// Drives generate, validate, execute and repair for a single request
#[derive(Clone)]
pub struct Orchestrator {
    generator: Arc<dyn StatementGenerator>,
    gateway: Arc<dyn QueryGateway>,
    validator: Validator,
    config: LoopConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn StatementGenerator>,
        gateway: Arc<dyn QueryGateway>,
        validator: Validator,
        config: LoopConfig,
    ) -> Self {
        Self {
            generator,
            gateway,
            validator,
            config,
        }
    }

    pub fn config(&self) -> LoopConfig {
        self.config
    }

    /// Same collaborators, different repair budget
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the loop to a terminal result
    pub async fn run(&self, request: &Request) -> RunResult {
        self.run_until_cancelled(request, &CancellationToken::new()).await
    }

    /// Run the loop, stopping at the next step boundary once `cancel` fires.
    ///
    /// An in-flight generator or gateway call is not awaited any further after
    /// cancellation; whatever it was doing is left to the collaborator.
    pub async fn run_until_cancelled(&self, request: &Request, cancel: &CancellationToken) -> RunResult {
        let started = Instant::now();
        info!(
            fingerprint = %request.fingerprint(),
            max_regenerations = self.config.max_regenerations,
            "Starting run: {}",
            request.text()
        );

        let mut state = LoopState::Generating {
            trail: Trail::default(),
            repair: None,
        };

        loop {
            state = match state {
                LoopState::Done(result) => {
                    info!(
                        outcome = result.label(),
                        attempts = result.history().len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Run finished"
                    );
                    return result;
                }
                LoopState::Generating { trail, .. }
                | LoopState::Validating { trail, .. }
                | LoopState::Executing { trail, .. }
                    if cancel.is_cancelled() =>
                {
                    warn!("Request cancelled between steps");
                    LoopState::Done(trail.abort(AbortReason::Cancelled))
                }
                LoopState::Generating { trail, repair } => {
                    self.generate(request, trail, repair, cancel).await
                }
                LoopState::Validating { trail, candidate } => self.validate(trail, candidate),
                LoopState::Executing {
                    trail,
                    candidate,
                    verdict,
                } => self.execute(trail, candidate, verdict, cancel).await,
            };
        }
    }

    async fn generate(
        &self,
        request: &Request,
        mut trail: Trail,
        repair: Option<RegenerationContext>,
        cancel: &CancellationToken,
    ) -> LoopState {
        let attempt = trail.regenerations;
        let context = GenerationContext {
            request,
            attempt,
            repair: repair.as_ref(),
        };

        let started = Instant::now();
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(attempt, "Request cancelled while generating");
                return LoopState::Done(trail.abort(AbortReason::Cancelled));
            }
            generated = self.generator.generate(context) => generated,
        };

        let sql = match generated.and_then(|text| {
            let sql = text.trim();
            if sql.is_empty() {
                Err(GenerationFailure::Empty)
            } else {
                Ok(sql.to_string())
            }
        }) {
            Ok(sql) => sql,
            Err(failure) => {
                warn!(attempt, error = %failure, "Statement generation failed, aborting");
                return LoopState::Done(trail.abort(AbortReason::Generation { failure }));
            }
        };

        debug!(
            attempt,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated candidate: {}",
            sql
        );
        trail.last_statement = Some(sql.clone());

        LoopState::Validating {
            trail,
            candidate: CandidateStatement {
                sql,
                attempt,
                prompted_by: repair.map(|r| r.reason),
            },
        }
    }

    fn validate(&self, trail: Trail, candidate: CandidateStatement) -> LoopState {
        let verdict = self.validator.validate(&candidate.sql);

        for advisory in verdict.advisories() {
            info!(attempt = candidate.attempt, rule = %advisory.rule, "Advisory rule violated: {}", advisory.detail);
        }

        if verdict.passed() {
            return LoopState::Executing {
                trail,
                candidate,
                verdict,
            };
        }

        let reason = RepairReason::Validation {
            violations: verdict.blocking().cloned().collect(),
        };
        warn!(attempt = candidate.attempt, "Candidate rejected: {}", reason);
        let attempt = Attempt {
            candidate,
            verdict,
            outcome: None,
        };
        self.repair_or_exhaust(trail, attempt, reason)
    }

    async fn execute(
        &self,
        mut trail: Trail,
        candidate: CandidateStatement,
        verdict: Verdict,
        cancel: &CancellationToken,
    ) -> LoopState {
        let started = Instant::now();
        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(attempt = candidate.attempt, "Request cancelled while executing");
                return LoopState::Done(trail.abort(AbortReason::Cancelled));
            }
            executed = self.gateway.execute(&candidate.sql) => executed,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match executed {
            Ok(rows) => {
                info!(attempt = candidate.attempt, rows = rows.len(), elapsed_ms, "Statement executed");
                let statement = candidate.sql.clone();
                trail.history.push(Attempt {
                    candidate,
                    verdict,
                    outcome: Some(ExecutionOutcome::Rows {
                        result: rows.clone(),
                    }),
                });
                LoopState::Done(RunResult::Success {
                    statement,
                    rows,
                    history: trail.history,
                })
            }
            Err(failure) if failure.is_retryable() => {
                warn!(attempt = candidate.attempt, elapsed_ms, "Execution failed: {}", failure);
                let reason = RepairReason::Execution {
                    failure: failure.clone(),
                };
                let attempt = Attempt {
                    candidate,
                    verdict,
                    outcome: Some(ExecutionOutcome::Failed { failure }),
                };
                self.repair_or_exhaust(trail, attempt, reason)
            }
            Err(failure) => {
                warn!(attempt = candidate.attempt, elapsed_ms, "Execution failed, not retryable: {}", failure);
                trail.history.push(Attempt {
                    candidate,
                    verdict,
                    outcome: Some(ExecutionOutcome::Failed {
                        failure: failure.clone(),
                    }),
                });
                LoopState::Done(trail.abort(AbortReason::Execution { failure }))
            }
        }
    }

    /// Record a recoverable failure, then regenerate if budget remains
    fn repair_or_exhaust(&self, mut trail: Trail, attempt: Attempt, reason: RepairReason) -> LoopState {
        let previous_statement = attempt.candidate.sql.clone();
        trail.history.push(attempt);
        debug_assert!(trail.history.len() as u32 <= self.config.max_regenerations + 1);

        if trail.regenerations < self.config.max_regenerations {
            trail.regenerations += 1;
            info!(
                regeneration = trail.regenerations,
                max_regenerations = self.config.max_regenerations,
                "Requesting repaired statement"
            );
            LoopState::Generating {
                trail,
                repair: Some(RegenerationContext {
                    previous_statement,
                    reason,
                }),
            }
        } else {
            warn!(max_regenerations = self.config.max_regenerations, "Repair budget exhausted");
            LoopState::Done(RunResult::Exhausted {
                last_statement: previous_statement,
                last_failure: reason,
                history: trail.history,
            })
        }
    }
}
