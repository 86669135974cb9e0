//! Accountant: per-iteration tallies and running totals.
//!
//! Each iteration produces an `IterationReport`; the accountant folds it
//! into lifetime counters used by the supervisor and the shutdown summary.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::engine::executor::ExecutionOutcome;
use crate::strategy::Decision;

// ---------------------------------------------------------------------------
// Iteration report
// ---------------------------------------------------------------------------

/// Summary of one fetch → discover → evaluate → execute pass.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: u64,
    pub records_fetched: usize,
    pub records_admitted: usize,
    pub edges: usize,
    pub opportunities: usize,
    pub evaluated: usize,
    /// Rejection counts keyed by `RejectionReason::label`.
    pub rejected: BTreeMap<&'static str, usize>,
    pub skipped: usize,
    pub executed: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
}

impl IterationReport {
    pub fn new(iteration: u64) -> Self {
        Self {
            iteration,
            records_fetched: 0,
            records_admitted: 0,
            edges: 0,
            opportunities: 0,
            evaluated: 0,
            rejected: BTreeMap::new(),
            skipped: 0,
            executed: 0,
            failed: 0,
            started_at: Utc::now(),
        }
    }

    /// Tally one settled opportunity.
    pub fn record(&mut self, decision: &Decision, outcome: Option<&ExecutionOutcome>) {
        self.evaluated += 1;
        if let Decision::Rejected { reason, .. } = decision {
            *self.rejected.entry(reason.label()).or_default() += 1;
        }
        match outcome {
            Some(ExecutionOutcome::Executed(_)) => self.executed += 1,
            Some(ExecutionOutcome::Failed(_)) => self.failed += 1,
            Some(ExecutionOutcome::Skipped(_)) => self.skipped += 1,
            None => {}
        }
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Accountant {
    iterations: u64,
    failed_iterations: u64,
    consecutive_failures: u32,
    opportunities_seen: u64,
    trades_submitted: u64,
    trades_failed: u64,
}

impl Accountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number to assign to the next iteration.
    pub fn next_iteration(&self) -> u64 {
        self.iterations + 1
    }

    /// Fold in a completed iteration.
    pub fn reconcile(&mut self, report: &IterationReport) {
        self.iterations += 1;
        self.consecutive_failures = 0;
        self.opportunities_seen += report.opportunities as u64;
        self.trades_submitted += report.executed as u64;
        self.trades_failed += report.failed as u64;

        info!(
            iteration = report.iteration,
            fetched = report.records_fetched,
            admitted = report.records_admitted,
            edges = report.edges,
            opportunities = report.opportunities,
            evaluated = report.evaluated,
            rejected = report.rejected_total(),
            skipped = report.skipped,
            executed = report.executed,
            failed = report.failed,
            elapsed_ms = (Utc::now() - report.started_at).num_milliseconds(),
            "Iteration complete"
        );
    }

    /// Record an aborted iteration. Returns the consecutive-failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.iterations += 1;
        self.failed_iterations += 1;
        self.consecutive_failures += 1;
        if self.consecutive_failures > 1 {
            warn!(
                consecutive = self.consecutive_failures,
                "Iterations failing back to back"
            );
        }
        self.consecutive_failures
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn trades_submitted(&self) -> u64 {
        self.trades_submitted
    }

    /// Final summary line on shutdown.
    pub fn log_summary(&self) {
        info!(
            iterations = self.iterations,
            failed_iterations = self.failed_iterations,
            opportunities = self.opportunities_seen,
            trades_submitted = self.trades_submitted,
            trades_failed = self.trades_failed,
            "Session summary"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
