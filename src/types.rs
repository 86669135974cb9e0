//! Shared types for the CYCLEARB engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that platform, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, I256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Assets and market records
// ---------------------------------------------------------------------------

/// A tradeable unit. Only `id` takes part in equality; the symbol is for logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Address,
    pub symbol: String,
}

impl Asset {
    pub fn new(id: Address, symbol: impl Into<String>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
        }
    }
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Asset {}

impl std::hash::Hash for Asset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.symbol.is_empty() {
            write!(f, "{:?}", self.id)
        } else {
            write!(f, "{}", self.symbol)
        }
    }
}

/// Trailing-24h statistics for a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDayData {
    pub tvl_usd: Decimal,
    pub volume_usd: Decimal,
}

/// One pool snapshot as delivered by a `MarketDataProvider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRecord {
    pub pool_id: String,
    pub token0: Asset,
    pub token1: Asset,
    /// token0 units obtained per token1 unit.
    pub token0_price: Decimal,
    /// token1 units obtained per token0 unit.
    pub token1_price: Decimal,
    /// Fee tier in hundredths of a basis point (500, 3000, 10000, ...).
    pub fee_tier: u32,
    /// Lifetime volume in USD.
    pub volume_usd: Decimal,
    /// Raw in-range liquidity as reported on-chain.
    pub liquidity: U256,
    /// Daily buckets inside the trailing 24h window, newest first.
    pub day_data: Vec<PoolDayData>,
}

impl fmt::Display for PairRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} fee={} pool={}",
            self.token0, self.token1, self.fee_tier, self.pool_id
        )
    }
}

// ---------------------------------------------------------------------------
// Graph edges and cycles
// ---------------------------------------------------------------------------

/// One direction of one pool at one fee tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectedEdge {
    pub from: Asset,
    pub to: Asset,
    pub fee_tier: u32,
    /// `to` units per `from` unit, before slippage.
    pub rate: Decimal,
    pub pool_id: String,
    pub volume_usd: Decimal,
}

impl fmt::Display for DirectedEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{} @ {}]-> {}",
            self.from, self.fee_tier, self.rate, self.to
        )
    }
}

/// A closed 3- or 4-hop route that starts and ends at the base asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageCycle {
    pub hops: Vec<DirectedEdge>,
    /// Product of all hop rates.
    pub cycle_rate: Decimal,
}

impl ArbitrageCycle {
    pub fn base(&self) -> &Asset {
        &self.hops[0].from
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Assets visited strictly between leaving and returning to the base.
    pub fn intermediates(&self) -> impl Iterator<Item = &Asset> {
        self.hops[..self.hops.len() - 1].iter().map(|h| &h.to)
    }

    /// Human-readable route, e.g. `WETH -> USDC -> DAI -> WETH`.
    pub fn route(&self) -> String {
        let mut parts = Vec::with_capacity(self.hops.len() + 1);
        parts.push(self.base().to_string());
        for hop in &self.hops {
            parts.push(hop.to.to_string());
        }
        parts.join(" -> ")
    }
}

impl fmt::Display for ArbitrageCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tiers: Vec<String> = self.hops.iter().map(|h| h.fee_tier.to_string()).collect();
        write!(
            f,
            "{} (rate {}, tiers {})",
            self.route(),
            self.cycle_rate.round_dp(6),
            tiers.join("/")
        )
    }
}

// ---------------------------------------------------------------------------
// Sizing and trades
// ---------------------------------------------------------------------------

/// Best point found by the size optimizer for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingResult {
    pub amount_in: U256,
    pub amount_out: U256,
    /// `amount_out - amount_in`, may be negative.
    pub profit: I256,
}

impl SizingResult {
    /// Fails when either amount does not fit a signed 256-bit value.
    pub fn new(amount_in: U256, amount_out: U256) -> Result<Self, QuoteError> {
        let signed_in = signed(amount_in).ok_or(QuoteError::OutOfRange(amount_in))?;
        let signed_out = signed(amount_out).ok_or(QuoteError::OutOfRange(amount_out))?;
        Ok(Self {
            amount_in,
            amount_out,
            profit: signed_out - signed_in,
        })
    }
}

impl fmt::Display for SizingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={} out={} profit={}",
            self.amount_in, self.amount_out, self.profit
        )
    }
}

/// Signed view of a base-unit amount for profit arithmetic. `None` at or
/// above 2^255.
pub fn signed(amount: U256) -> Option<I256> {
    I256::try_from(amount).ok()
}

/// Everything an `ExecutionService` needs to simulate or submit a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeDescriptor {
    pub path: Bytes,
    pub recipient: Address,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
    pub gas_limit: Option<U256>,
}

/// Acknowledgement returned by an `ExecutionService` after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeReceipt {
    /// Transaction hash, or a synthetic id for dry runs.
    pub tx_id: String,
    pub tx_hash: Option<H256>,
    pub gas_used: Option<U256>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TradeReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gas_used {
            Some(gas) => write!(f, "{} gas={gas}", self.tx_id),
            None => write!(f, "{}", self.tx_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunity lifecycle
// ---------------------------------------------------------------------------

/// Per-opportunity state. Every opportunity returns to `Idle` once settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpportunityState {
    Idle,
    Evaluating,
    Executing,
    Skipped,
}

impl fmt::Display for OpportunityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpportunityState::Idle => write!(f, "IDLE"),
            OpportunityState::Evaluating => write!(f, "EVALUATING"),
            OpportunityState::Executing => write!(f, "EXECUTING"),
            OpportunityState::Skipped => write!(f, "SKIPPED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Market snapshot could not be obtained. Transient; retried next iteration.
#[derive(Debug, thiserror::Error)]
pub enum DataFetchError {
    #[error("Request to {provider} failed: {message}")]
    Request { provider: String, message: String },

    #[error("Malformed response from {provider}: {message}")]
    Malformed { provider: String, message: String },

    #[error("Market data fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// A read-only quote failed. Drops the opportunity.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuoteError {
    #[error("Quote reverted: {0}")]
    Reverted(String),

    #[error("Quote timed out after {0:?}")]
    Timeout(Duration),

    #[error("Quote transport error: {0}")]
    Transport(String),

    #[error("Quoted amount {0} out of range")]
    OutOfRange(U256),
}

/// Gas could not be estimated, which means the trade would fail on-chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GasEstimationError {
    #[error("Trade would revert: {0}")]
    WouldRevert(String),

    #[error("Gas estimation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gas estimation transport error: {0}")]
    Transport(String),
}

/// Submission did not end in an accepted, successful transaction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Transaction {0:?} reverted")]
    Reverted(H256),

    #[error("Transaction dropped before inclusion")]
    Dropped,

    #[error("Submission unacknowledged after {0:?}")]
    Timeout(Duration),

    #[error("Submission aborted: {0}")]
    Aborted(String),
}

/// Umbrella error for anything that can abort an orchestration iteration.
/// Quote and execution failures stay inside their opportunity and never
/// reach it.
#[derive(Debug, thiserror::Error)]
pub enum ArbError {
    #[error(transparent)]
    DataFetch(#[from] DataFetchError),

    #[error(transparent)]
    GasEstimation(#[from] GasEstimationError),

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl ArbError {
    /// Whether the error only invalidates the current iteration's data.
    pub fn is_data_fetch(&self) -> bool {
        matches!(self, ArbError::DataFetch(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
