//! Trade executor.
//!
//! Guards the single execution slot. At most one trade is in flight
//! process-wide; an opportunity that finds the slot taken is skipped, not
//! queued. The slot is released only once the execution service has
//! answered. A submission that outlives the timeout is reported as failed
//! to the caller but keeps the slot until it settles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::platforms::ExecutionService;
use crate::strategy::TradePlan;
use crate::types::{ExecutionError, OpportunityState, TradeReceipt};

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another submission holds the slot.
    SlotBusy,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SlotBusy => write!(f, "execution slot busy"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Executed(TradeReceipt),
    Failed(ExecutionError),
    Skipped(SkipReason),
}

impl ExecutionOutcome {
    /// State the opportunity reached before settling back to `Idle`.
    pub fn state(&self) -> OpportunityState {
        match self {
            ExecutionOutcome::Executed(_) | ExecutionOutcome::Failed(_) => {
                OpportunityState::Executing
            }
            ExecutionOutcome::Skipped(_) => OpportunityState::Skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ExecutionGuard {
    slot: Arc<Semaphore>,
    service: Arc<dyn ExecutionService>,
    submit_timeout: Duration,
}

impl ExecutionGuard {
    pub fn new(service: Arc<dyn ExecutionService>, submit_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            service,
            submit_timeout,
        }
    }

    /// Whether a submission is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Submit the plan's trade if the slot is free.
    pub async fn try_execute(&self, plan: &TradePlan) -> ExecutionOutcome {
        let Ok(permit) = self.slot.clone().try_acquire_owned() else {
            info!(route = %plan.cycle.route(), "Another trade in progress, skipping");
            return ExecutionOutcome::Skipped(SkipReason::SlotBusy);
        };

        info!(
            route = %plan.cycle.route(),
            amount_in = %plan.trade.amount_in,
            min_out = %plan.trade.amount_out_minimum,
            gas_limit = ?plan.trade.gas_limit,
            net = %plan.net_profit,
            "Executing trade"
        );

        // The permit travels with the submission, not with this call.
        let service = self.service.clone();
        let trade = plan.trade.clone();
        let mut submission = tokio::spawn(async move {
            let result = service.submit(&trade).await;
            debug!(ok = result.is_ok(), "Submission settled, releasing execution slot");
            drop(permit);
            result
        });

        let limit = self.submit_timeout;
        let result = match tokio::time::timeout(limit, &mut submission).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ExecutionError::Aborted(e.to_string())),
            Err(_) => {
                warn!(
                    route = %plan.cycle.route(),
                    timeout = ?limit,
                    "Submission unacknowledged, slot held until it settles"
                );
                Err(ExecutionError::Timeout(limit))
            }
        };

        match result {
            Ok(receipt) => {
                info!(route = %plan.cycle.route(), receipt = %receipt, "Trade executed");
                ExecutionOutcome::Executed(receipt)
            }
            Err(e) => {
                warn!(route = %plan.cycle.route(), error = %e, "Trade execution failed");
                ExecutionOutcome::Failed(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
