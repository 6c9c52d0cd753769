//! Prometheus metrics for the repair loop

use nlsql_core::RunResult;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    runs: IntCounterVec,
    attempts: Histogram,
    duration: Histogram,
    summaries: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nlsql".to_string()), None)?;

        let runs = IntCounterVec::new(
            Opts::new("runs_total", "Completed runs by terminal outcome"),
            &["outcome"],
        )?;
        let attempts = Histogram::with_opts(
            HistogramOpts::new("run_attempts", "Attempts recorded per run").buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0]),
        )?;
        let duration = Histogram::with_opts(HistogramOpts::new(
            "run_duration_seconds",
            "Wall-clock time per run",
        ))?;
        let summaries = IntCounterVec::new(
            Opts::new("summaries_total", "Answer summaries by result"),
            &["result"],
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(attempts.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(summaries.clone()))?;

        Ok(Self {
            registry,
            runs,
            attempts,
            duration,
            summaries,
        })
    }

    pub fn observe_run(&self, result: &RunResult, elapsed: Duration) {
        self.runs.with_label_values(&[result.label()]).inc();
        self.attempts.observe(result.history().len() as f64);
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub fn observe_summary(&self, ok: bool) {
        let label = if ok { "ok" } else { "failed" };
        self.summaries.with_label_values(&[label]).inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
