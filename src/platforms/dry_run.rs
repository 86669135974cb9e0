//! Dry-run execution.
//!
//! Wraps a real `ExecutionService` so gas estimation and pricing still hit
//! the network (a reverting trade is still rejected), but `submit` only
//! logs what would have been sent.

use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use tracing::info;

use super::ExecutionService;
use crate::types::{ExecutionError, GasEstimationError, TradeDescriptor, TradeReceipt};

pub struct DryRunExecution {
    inner: Arc<dyn ExecutionService>,
}

impl DryRunExecution {
    pub fn new(inner: Arc<dyn ExecutionService>) -> Self {
        Self { inner }
    }
}

impl TradeReceipt {
    /// Create a dry-run receipt (no real execution).
    pub fn dry_run() -> Self {
        Self {
            tx_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
            tx_hash: None,
            gas_used: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl ExecutionService for DryRunExecution {
    async fn estimate_gas(&self, trade: &TradeDescriptor) -> Result<U256, GasEstimationError> {
        self.inner.estimate_gas(trade).await
    }

    async fn gas_price(&self) -> Result<U256, GasEstimationError> {
        self.inner.gas_price().await
    }

    async fn submit(&self, trade: &TradeDescriptor) -> Result<TradeReceipt, ExecutionError> {
        info!(
            path = %trade.path,
            amount_in = %trade.amount_in,
            min_out = %trade.amount_out_minimum,
            gas_limit = ?trade.gas_limit,
            "[DRY RUN] Would submit swap"
        );
        Ok(TradeReceipt::dry_run())
    }
}
