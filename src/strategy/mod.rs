//! Strategy engine: price graph, cycle search, trade sizing, and the
//! per-opportunity evaluation pipeline.

pub mod cycles;
pub mod graph;
pub mod path;
pub mod sizing;

use ethers::types::{Address, I256, U256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::platforms::{ExecutionService, QuotingOracle};
use crate::types::{
    signed, ArbitrageCycle, GasEstimationError, QuoteError, SizingResult, TradeDescriptor,
};
use sizing::{SizeOptimizer, SizingError};

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Why an opportunity was passed on.
#[derive(Debug, Clone)]
pub enum RejectionReason {
    /// A single-hop quote along the route failed.
    Preflight(QuoteError),
    /// The seed-sized trade would revert on-chain.
    WouldRevert(GasEstimationError),
    /// No usable trade size could be found.
    SizingUnavailable(String),
    /// Best sized trade loses money before gas.
    NegativeProfit { profit: I256 },
    /// Profit does not cover the gas cost.
    BelowGasCost { net: I256 },
    /// Net profit is positive but under the absolute floor.
    BelowFloor { net: I256, floor: U256 },
    /// Evaluation or execution panicked.
    Panicked(String),
}

impl RejectionReason {
    /// Short stable tag for tallies.
    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::Preflight(_) => "preflight",
            RejectionReason::WouldRevert(_) => "would_revert",
            RejectionReason::SizingUnavailable(_) => "sizing_unavailable",
            RejectionReason::NegativeProfit { .. } => "negative_profit",
            RejectionReason::BelowGasCost { .. } => "below_gas_cost",
            RejectionReason::BelowFloor { .. } => "below_floor",
            RejectionReason::Panicked(_) => "panicked",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Preflight(e) => write!(f, "preflight quote failed: {e}"),
            RejectionReason::WouldRevert(e) => write!(f, "gas estimation failed: {e}"),
            RejectionReason::SizingUnavailable(e) => write!(f, "sizing unavailable: {e}"),
            RejectionReason::NegativeProfit { profit } => write!(f, "negative profit {profit}"),
            RejectionReason::BelowGasCost { net } => write!(f, "net {net} after gas"),
            RejectionReason::BelowFloor { net, floor } => {
                write!(f, "net {net} below floor {floor}")
            }
            RejectionReason::Panicked(message) => write!(f, "panicked: {message}"),
        }
    }
}

/// A sized opportunity that cleared the profit bar.
#[derive(Debug, Clone)]
pub struct TradePlan {
    pub cycle: ArbitrageCycle,
    pub sizing: SizingResult,
    pub gas_units: U256,
    pub gas_cost: U256,
    /// `sizing.profit - gas_cost`.
    pub net_profit: I256,
    pub trade: TradeDescriptor,
}

/// Outcome of evaluating one opportunity.
#[derive(Debug, Clone)]
pub enum Decision {
    Approved(TradePlan),
    Rejected {
        cycle: ArbitrageCycle,
        reason: RejectionReason,
    },
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved(_))
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EvaluationParams {
    /// Receives the swap output.
    pub recipient: Address,
    /// Preflight amount and upper end of the sizing interval.
    pub seed_amount: U256,
    /// Absolute net-profit floor, in wei.
    pub min_profit: U256,
    pub quote_timeout: Duration,
    pub gas_timeout: Duration,
}

/// Pipelines preflight → gas estimation → sizing → profit bar.
///
/// Shared by every opportunity of an iteration; holds no mutable state, so
/// evaluations run concurrently.
pub struct OpportunityEvaluator {
    oracle: Arc<dyn QuotingOracle>,
    execution: Arc<dyn ExecutionService>,
    sizer: SizeOptimizer,
    params: EvaluationParams,
}

impl OpportunityEvaluator {
    pub fn new(
        oracle: Arc<dyn QuotingOracle>,
        execution: Arc<dyn ExecutionService>,
        sizer: SizeOptimizer,
        params: EvaluationParams,
    ) -> Self {
        Self {
            oracle,
            execution,
            sizer,
            params,
        }
    }

    /// Evaluate one cycle at the iteration's gas price.
    ///
    /// Every failure is folded into `Decision::Rejected`; nothing escapes
    /// the opportunity.
    pub async fn evaluate(&self, cycle: &ArbitrageCycle, gas_price: U256) -> Decision {
        let reject = |reason: RejectionReason| {
            debug!(route = %cycle.route(), reason = %reason, "Opportunity rejected");
            Decision::Rejected {
                cycle: cycle.clone(),
                reason,
            }
        };

        let path = path::encode(cycle);
        let seed = self.params.seed_amount;

        // Step 1 – hop-by-hop preflight
        if let Err(e) = self.preflight(cycle, seed).await {
            return reject(RejectionReason::Preflight(e));
        }

        // Step 2 – gas estimation doubles as a revert check
        let seed_trade = TradeDescriptor {
            path: path.clone(),
            recipient: self.params.recipient,
            amount_in: seed,
            amount_out_minimum: seed,
            gas_limit: None,
        };
        let gas_units = match self.estimate_gas(&seed_trade).await {
            Ok(units) => units,
            Err(e) => return reject(RejectionReason::WouldRevert(e)),
        };
        let gas_cost = gas_units.saturating_mul(gas_price);

        // Step 3 – sizing
        let sizing = match self
            .sizer
            .optimal_amount(self.oracle.as_ref(), &path, gas_cost, seed)
            .await
        {
            Ok(sizing) => sizing,
            Err(e) => return reject(sizing_unavailable(e)),
        };

        // Step 4 – profit bar
        let net_profit = match profit_bar(&sizing, gas_cost, self.params.min_profit) {
            Ok(net) => net,
            Err(reason) => return reject(reason),
        };

        info!(
            route = %cycle.route(),
            rate = %cycle.cycle_rate.round_dp(6),
            amount_in = %sizing.amount_in,
            amount_out = %sizing.amount_out,
            gas_cost = %gas_cost,
            net = %net_profit,
            "Opportunity approved"
        );

        let trade = TradeDescriptor {
            path,
            recipient: self.params.recipient,
            amount_in: sizing.amount_in,
            amount_out_minimum: sizing.amount_in.saturating_add(gas_cost),
            gas_limit: Some(gas_units),
        };

        Decision::Approved(TradePlan {
            cycle: cycle.clone(),
            sizing,
            gas_units,
            gas_cost,
            net_profit,
            trade,
        })
    }

    /// Quote each hop on its own, feeding each output into the next hop.
    async fn preflight(&self, cycle: &ArbitrageCycle, seed: U256) -> Result<U256, QuoteError> {
        let limit = self.params.quote_timeout;
        let mut amount = seed;
        for hop in &cycle.hops {
            amount = tokio::time::timeout(
                limit,
                self.oracle
                    .quote_exact_input_single(hop.from.id, hop.to.id, hop.fee_tier, amount),
            )
            .await
            .map_err(|_| QuoteError::Timeout(limit))??;
        }
        Ok(amount)
    }

    async fn estimate_gas(&self, trade: &TradeDescriptor) -> Result<U256, GasEstimationError> {
        let limit = self.params.gas_timeout;
        tokio::time::timeout(limit, self.execution.estimate_gas(trade))
            .await
            .map_err(|_| GasEstimationError::Timeout(limit))?
    }
}

fn sizing_unavailable(e: SizingError) -> RejectionReason {
    RejectionReason::SizingUnavailable(e.to_string())
}

/// Apply the three profit gates in order. Returns the net profit.
pub fn profit_bar(
    sizing: &SizingResult,
    gas_cost: U256,
    min_profit: U256,
) -> Result<I256, RejectionReason> {
    if sizing.profit < I256::zero() {
        return Err(RejectionReason::NegativeProfit {
            profit: sizing.profit,
        });
    }
    // Costs beyond the signed range can never be covered.
    let gas = signed(gas_cost).unwrap_or(I256::MAX);
    let net = sizing.profit.saturating_sub(gas);
    if net < I256::zero() {
        return Err(RejectionReason::BelowGasCost { net });
    }
    if net < signed(min_profit).unwrap_or(I256::MAX) {
        return Err(RejectionReason::BelowFloor {
            net,
            floor: min_profit,
        });
    }
    Ok(net)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
