//! Trade sizing.
//!
//! Realised output is concave in input size because of pool slippage, so
//! the most profitable input is not simply the largest one. The optimizer
//! runs a bounded three-point local search over `[10 × gas_cost,
//! initial_guess]` against the quoting oracle:
//!
//! ```text
//!   l ─── lmid ─── mid ─── rmid ─── r
//! ```
//!
//! Each round quotes the three interior points (memoized by exact amount),
//! stops if `mid` beats both neighbours, otherwise keeps the half whose
//! quarter point did better. The best point seen anywhere in the search is
//! returned, not the final midpoint.
//!
//! The "mid beats both neighbours" stop can settle on a local optimum when
//! the curve is not strictly concave. That is a known limitation.

use ethers::types::{Bytes, U256};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::platforms::QuotingOracle;
use crate::types::{QuoteError, SizingResult};

/// Lower search bound as a multiple of the gas cost.
const GAS_COST_MULTIPLIER: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum SizingError {
    #[error("Empty search interval: lower bound {lower} exceeds {upper}")]
    EmptyInterval { lower: U256, upper: U256 },

    #[error(transparent)]
    Quote(#[from] QuoteError),
}

/// Sizing configuration.
#[derive(Debug, Clone)]
pub struct SizingParams {
    /// Maximum search rounds.
    pub rounds: u32,
    /// Per-quote timeout.
    pub quote_timeout: Duration,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            rounds: 6,
            quote_timeout: Duration::from_secs(10),
        }
    }
}

pub struct SizeOptimizer {
    params: SizingParams,
}

impl SizeOptimizer {
    pub fn new(params: SizingParams) -> Self {
        Self { params }
    }

    /// Find the profit-maximising input for `path`.
    ///
    /// Any quote failure aborts the whole search; callers must skip the
    /// cycle rather than act on a partial result.
    pub async fn optimal_amount(
        &self,
        oracle: &dyn QuotingOracle,
        path: &Bytes,
        gas_cost: U256,
        initial_guess: U256,
    ) -> Result<SizingResult, SizingError> {
        let mut l = gas_cost.saturating_mul(U256::from(GAS_COST_MULTIPLIER));
        let mut r = initial_guess;
        if l > r {
            return Err(SizingError::EmptyInterval { lower: l, upper: r });
        }

        let mut memo: HashMap<U256, U256> = HashMap::new();
        let mut best: Option<SizingResult> = None;
        let mut round = 0;

        while l <= r && round < self.params.rounds {
            round += 1;
            let mid = (l + r) / 2;
            let lmid = (l + mid) / 2;
            let rmid = (mid + r) / 2;

            let [out_l, out_m, out_r] = self
                .quote_round(oracle, path, [lmid, mid, rmid], &mut memo)
                .await?;
            let left = SizingResult::new(lmid, out_l)?;
            let centre = SizingResult::new(mid, out_m)?;
            let right = SizingResult::new(rmid, out_r)?;

            for point in [left, centre, right] {
                if best.map_or(true, |b| point.profit > b.profit) {
                    best = Some(point);
                }
            }

            debug!(
                round,
                lmid = %lmid,
                mid = %mid,
                rmid = %rmid,
                profit_l = %left.profit,
                profit_m = %centre.profit,
                profit_r = %right.profit,
                "Sizing round"
            );

            if centre.profit > left.profit && centre.profit > right.profit {
                break;
            }
            if left.profit >= right.profit {
                r = mid;
            } else {
                l = mid;
            }
        }

        debug!(rounds = round, quotes = memo.len(), "Sizing search finished");
        best.ok_or(SizingError::EmptyInterval { lower: l, upper: r })
    }

    /// Quote whichever of the three points are not memoized yet, concurrently.
    async fn quote_round(
        &self,
        oracle: &dyn QuotingOracle,
        path: &Bytes,
        points: [U256; 3],
        memo: &mut HashMap<U256, U256>,
    ) -> Result<[U256; 3], QuoteError> {
        let mut pending: Vec<U256> = points
            .iter()
            .copied()
            .filter(|amount| !memo.contains_key(amount))
            .collect();
        // Points are ascending, so equal amounts are adjacent.
        pending.dedup();

        let outputs =
            try_join_all(pending.iter().map(|&amount| self.quote(oracle, path, amount))).await?;
        memo.extend(pending.into_iter().zip(outputs));

        // Every point was either memoized or just quoted.
        Ok(points.map(|amount| memo.get(&amount).copied().unwrap_or_default()))
    }

    async fn quote(
        &self,
        oracle: &dyn QuotingOracle,
        path: &Bytes,
        amount: U256,
    ) -> Result<U256, QuoteError> {
        let limit = self.params.quote_timeout;
        tokio::time::timeout(limit, oracle.quote_exact_input(path, amount))
            .await
            .map_err(|_| QuoteError::Timeout(limit))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
