//! External collaborators.
//!
//! Defines the three narrow interfaces the engine consumes and provides
//! implementations for:
//! - Uniswap V3 subgraph, pool snapshots (`MarketDataProvider`)
//! - Uniswap V3 Quoter / SwapRouter02 over JSON-RPC (`QuotingOracle`, `ExecutionService`)
//! - Dry-run wrapper that never broadcasts (`ExecutionService`)

pub mod dry_run;
pub mod subgraph;
pub mod uniswap;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};

use crate::types::{
    DataFetchError, ExecutionError, GasEstimationError, PairRecord, QuoteError, TradeDescriptor,
    TradeReceipt,
};

/// Source of raw pool snapshots.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the current set of pool records. May fail transiently.
    async fn fetch_pairs(&self) -> Result<Vec<PairRecord>, DataFetchError>;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}

/// Read-only swap simulation. Never has side effects.
#[async_trait]
pub trait QuotingOracle: Send + Sync {
    /// Output of swapping `amount_in` along a packed multi-hop path.
    async fn quote_exact_input(&self, path: &Bytes, amount_in: U256) -> Result<U256, QuoteError>;

    /// Output of a single pool hop.
    async fn quote_exact_input_single(
        &self,
        token_in: Address,
        token_out: Address,
        fee_tier: u32,
        amount_in: U256,
    ) -> Result<U256, QuoteError>;
}

/// Gas estimation and irreversible trade submission.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Gas units the trade would consume. Fails if it would revert.
    async fn estimate_gas(&self, trade: &TradeDescriptor) -> Result<U256, GasEstimationError>;

    /// Current price per gas unit, in wei.
    async fn gas_price(&self) -> Result<U256, GasEstimationError>;

    /// Submit the trade and wait for the network to acknowledge the outcome.
    async fn submit(&self, trade: &TradeDescriptor) -> Result<TradeReceipt, ExecutionError>;
}
