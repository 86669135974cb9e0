//! Orchestrator: the outer fetch → discover → evaluate → execute loop.
//!
//! Each iteration rebuilds the price graph from scratch, searches it for
//! cycles through the base asset, evaluates every cycle concurrently and
//! lets the execution guard admit at most one submission. Iteration
//! failures are logged and the loop carries on; only the shutdown future
//! (or an optional consecutive-failure ceiling) ends it.

use anyhow::Context;
use ethers::types::{Address, U256};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::engine::accountant::{Accountant, IterationReport};
use crate::engine::executor::{ExecutionGuard, ExecutionOutcome};
use crate::platforms::{ExecutionService, MarketDataProvider, QuotingOracle};
use crate::strategy::cycles::{find_opportunities, RateWindow};
use crate::strategy::graph::{Admission, PriceGraph};
use crate::strategy::sizing::{SizeOptimizer, SizingParams};
use crate::strategy::{Decision, EvaluationParams, OpportunityEvaluator, RejectionReason};
use crate::types::{
    ArbError, ArbitrageCycle, DataFetchError, GasEstimationError, OpportunityState, PairRecord,
};

/// Loop-level settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub base_asset: Address,
    pub window: RateWindow,
    /// Evaluate only the best N cycles per iteration.
    pub max_opportunities: Option<usize>,
    pub admission: Admission,
    pub iteration_delay: Duration,
    /// Unset means retry forever.
    pub max_consecutive_failures: Option<u32>,
    pub fetch_timeout: Duration,
    pub gas_timeout: Duration,
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    market: Arc<dyn MarketDataProvider>,
    execution: Arc<dyn ExecutionService>,
    evaluator: OpportunityEvaluator,
    guard: ExecutionGuard,
    accountant: Accountant,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        market: Arc<dyn MarketDataProvider>,
        execution: Arc<dyn ExecutionService>,
        evaluator: OpportunityEvaluator,
        guard: ExecutionGuard,
    ) -> Self {
        Self {
            settings,
            market,
            execution,
            evaluator,
            guard,
            accountant: Accountant::new(),
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(
        cfg: &AppConfig,
        recipient: Address,
        market: Arc<dyn MarketDataProvider>,
        oracle: Arc<dyn QuotingOracle>,
        execution: Arc<dyn ExecutionService>,
    ) -> anyhow::Result<Self> {
        let seed_amount = cfg.sizing.initial_amount()?;
        let min_profit = cfg.execution.min_profit()?;
        let admission = Admission::from_config(&cfg.discovery.admission)
            .context("Invalid admission thresholds")?;

        let settings = OrchestratorSettings {
            base_asset: cfg.discovery.base_asset,
            window: RateWindow {
                min_rate: cfg.discovery.min_rate_threshold,
                upper_bound: cfg.discovery.upper_sanity_bound,
            },
            max_opportunities: cfg.discovery.max_opportunities,
            admission,
            iteration_delay: cfg.iteration_delay(),
            max_consecutive_failures: cfg.agent.max_consecutive_failures,
            fetch_timeout: cfg.timeouts.fetch(),
            gas_timeout: cfg.timeouts.gas(),
        };

        let sizer = SizeOptimizer::new(SizingParams {
            rounds: cfg.sizing.rounds,
            quote_timeout: cfg.timeouts.quote(),
        });
        let evaluator = OpportunityEvaluator::new(
            oracle,
            execution.clone(),
            sizer,
            EvaluationParams {
                recipient,
                seed_amount,
                min_profit,
                quote_timeout: cfg.timeouts.quote(),
                gas_timeout: cfg.timeouts.gas(),
            },
        );
        let guard = ExecutionGuard::new(execution.clone(), cfg.timeouts.submit());

        Ok(Self::new(settings, market, execution, evaluator, guard))
    }

    pub fn accountant(&self) -> &Accountant {
        &self.accountant
    }

    /// Run one iteration. Per-opportunity failures are tallied in the
    /// report; only iteration-wide failures are returned as errors.
    pub async fn run_iteration(&self) -> Result<IterationReport, ArbError> {
        let mut report = IterationReport::new(self.accountant.next_iteration());
        info!(iteration = report.iteration, "Starting iteration");

        // 1. Fetch snapshots
        let records = self.fetch().await?;
        report.records_fetched = records.len();

        // 2. Build graph
        let graph = PriceGraph::build(&records, &self.settings.admission);
        report.records_admitted = graph.admitted_records();
        report.edges = graph.edge_count();

        let Some(base) = graph.asset(self.settings.base_asset) else {
            warn!(base = ?self.settings.base_asset, "Base asset has no admitted pools");
            return Ok(report);
        };
        debug!(
            base = %base.symbol,
            assets = graph.asset_count(),
            edges = report.edges,
            "Price graph built"
        );

        // 3. Discover cycles
        let window = self.settings.window;
        let mut cycles = find_opportunities(
            &graph,
            self.settings.base_asset,
            window.min_rate,
            window.upper_bound,
        );
        if let Some(max) = self.settings.max_opportunities {
            cycles.truncate(max);
        }
        report.opportunities = cycles.len();

        if cycles.is_empty() {
            return Ok(report);
        }

        // 4. One gas price for the whole iteration
        let gas_price = self.gas_price().await?;

        // 5. Evaluate and attempt execution, highest rate first
        let attempts = cycles.iter().map(|cycle| self.attempt(cycle, gas_price));
        for (decision, outcome) in join_all(attempts).await {
            report.record(&decision, outcome.as_ref());
        }

        Ok(report)
    }

    async fn attempt(
        &self,
        cycle: &ArbitrageCycle,
        gas_price: U256,
    ) -> (Decision, Option<ExecutionOutcome>) {
        debug!(route = %cycle.route(), state = %OpportunityState::Evaluating, "Opportunity state");
        let (decision, outcome) = AssertUnwindSafe(self.evaluate_and_execute(cycle, gas_price))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(
                    route = %cycle.route(),
                    panic = %message,
                    "Opportunity panicked, abandoning it"
                );
                let reason = RejectionReason::Panicked(message);
                (
                    Decision::Rejected {
                        cycle: cycle.clone(),
                        reason,
                    },
                    None,
                )
            });
        let settled = outcome
            .as_ref()
            .map_or(OpportunityState::Skipped, ExecutionOutcome::state);
        debug!(
            route = %cycle.route(),
            state = %settled,
            next = %OpportunityState::Idle,
            "Opportunity settled"
        );
        (decision, outcome)
    }

    async fn evaluate_and_execute(
        &self,
        cycle: &ArbitrageCycle,
        gas_price: U256,
    ) -> (Decision, Option<ExecutionOutcome>) {
        let decision = self.evaluator.evaluate(cycle, gas_price).await;
        let outcome = match &decision {
            Decision::Approved(plan) => Some(self.guard.try_execute(plan).await),
            Decision::Rejected { .. } => None,
        };
        (decision, outcome)
    }

    async fn fetch(&self) -> Result<Vec<PairRecord>, DataFetchError> {
        let limit = self.settings.fetch_timeout;
        tokio::time::timeout(limit, self.market.fetch_pairs())
            .await
            .map_err(|_| DataFetchError::Timeout(limit))?
    }

    async fn gas_price(&self) -> Result<U256, GasEstimationError> {
        let limit = self.settings.gas_timeout;
        tokio::time::timeout(limit, self.execution.gas_price())
            .await
            .map_err(|_| GasEstimationError::Timeout(limit))?
    }

    /// Loop until `shutdown` resolves.
    ///
    /// A panicking iteration is logged and counted like any other failed
    /// one. Returns `ArbError::Fatal` only when a consecutive-failure ceiling
    /// is configured and reached.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), ArbError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            base = ?self.settings.base_asset,
            min_rate = %self.settings.window.min_rate,
            upper_bound = %self.settings.window.upper_bound,
            delay_ms = self.settings.iteration_delay.as_millis() as u64,
            "Entering main loop"
        );

        loop {
            let result = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
                result = AssertUnwindSafe(self.run_iteration()).catch_unwind() => {
                    result.unwrap_or_else(|panic| {
                        Err(ArbError::Fatal(format!(
                            "iteration panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    })
                }
            };

            match result {
                Ok(report) => self.accountant.reconcile(&report),
                Err(e) => {
                    if e.is_data_fetch() {
                        warn!(error = %e, "Market data unavailable, skipping iteration");
                    } else {
                        error!(error = %e, "Iteration failed, continuing to next");
                    }
                    let consecutive = self.accountant.record_failure();
                    if let Some(max) = self.settings.max_consecutive_failures {
                        if consecutive >= max {
                            self.accountant.log_summary();
                            return Err(ArbError::Fatal(format!(
                                "{consecutive} consecutive failed iterations, last: {e}"
                            )));
                        }
                    }
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
                _ = tokio::time::sleep(self.settings.iteration_delay) => {}
            }
        }

        self.accountant.log_summary();
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mocks::{MockExecution, MockQuoter};
    use crate::types::{Asset, PoolDayData, QuoteError};
    use async_trait::async_trait;
    use ethers::types::Bytes;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    struct FixedMarket {
        records: Vec<PairRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for FixedMarket {
        async fn fetch_pairs(&self) -> Result<Vec<PairRecord>, DataFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn asset(n: u64, symbol: &str) -> Asset {
        Asset::new(Address::from_low_u64_be(n), symbol)
    }

    fn pool(a: &Asset, b: &Asset, ab: Decimal, ba: Decimal) -> PairRecord {
        PairRecord {
            pool_id: format!("{}-{}", a.symbol, b.symbol),
            token0: a.clone(),
            token1: b.clone(),
            token0_price: ba,
            token1_price: ab,
            fee_tier: 3000,
            volume_usd: dec!(1000000),
            liquidity: U256::exp10(20),
            day_data: vec![PoolDayData {
                tvl_usd: dec!(100000),
                volume_usd: dec!(100000),
            }],
        }
    }

    fn settings(max_failures: Option<u32>) -> OrchestratorSettings {
        OrchestratorSettings {
            base_asset: Address::from_low_u64_be(1),
            window: RateWindow {
                min_rate: dec!(1.04),
                upper_bound: dec!(1.07),
            },
            max_opportunities: None,
            admission: Admission::default(),
            iteration_delay: Duration::from_millis(1),
            max_consecutive_failures: max_failures,
            fetch_timeout: Duration::from_secs(1),
            gas_timeout: Duration::from_secs(1),
        }
    }

    fn orchestrator(
        records: Vec<PairRecord>,
        quoter: MockQuoter,
        execution: MockExecution,
        max_failures: Option<u32>,
    ) -> Orchestrator {
        let execution: Arc<dyn ExecutionService> = Arc::new(execution);
        let evaluator = OpportunityEvaluator::new(
            Arc::new(quoter),
            execution.clone(),
            SizeOptimizer::new(SizingParams::default()),
            EvaluationParams {
                recipient: Address::from_low_u64_be(0xbeef),
                seed_amount: U256::from(1_000_000),
                min_profit: U256::from(1_000),
                quote_timeout: Duration::from_secs(1),
                gas_timeout: Duration::from_secs(1),
            },
        );
        let guard = ExecutionGuard::new(execution.clone(), Duration::from_secs(1));
        Orchestrator::new(
            settings(max_failures),
            Arc::new(FixedMarket {
                records,
                calls: AtomicUsize::new(0),
            }),
            execution,
            evaluator,
            guard,
        )
    }

    #[tokio::test]
    async fn test_no_cycles_skips_gas_price() {
        let (base, x) = (asset(1, "WETH"), asset(2, "X"));
        let mut execution = MockExecution::new();
        execution.expect_gas_price().never();

        let orc = orchestrator(
            vec![pool(&base, &x, dec!(1), dec!(1))],
            MockQuoter::new(),
            execution,
            None,
        );
        let report = assert_ok!(orc.run_iteration().await);
        assert_eq!(report.records_fetched, 1);
        assert_eq!(report.records_admitted, 1);
        assert_eq!(report.edges, 2);
        assert_eq!(report.opportunities, 0);
        assert_eq!(report.evaluated, 0);
    }

    #[tokio::test]
    async fn test_gas_price_failure_fails_iteration() {
        let (base, x, y) = (asset(1, "WETH"), asset(2, "X"), asset(3, "Y"));
        let mut execution = MockExecution::new();
        execution
            .expect_gas_price()
            .returning(|| Err(GasEstimationError::Transport("503".into())));

        let mut orc = orchestrator(
            vec![
                pool(&base, &x, dec!(2), dec!(0.5)),
                pool(&x, &y, dec!(1.5), dec!(0.5)),
                pool(&y, &base, dec!(0.35), dec!(0.5)),
            ],
            MockQuoter::new(),
            execution,
            Some(2),
        );

        let err = orc.run_iteration().await.unwrap_err();
        assert!(matches!(err, ArbError::GasEstimation(_)));

        // The ceiling turns repeated failures into a fatal stop.
        let err = orc.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ArbError::Fatal(_)));
        assert_eq!(orc.accountant().consecutive_failures(), 2);
    }

    /// Panics on its first fetch, then serves `records`.
    struct PanicOnceMarket {
        records: Vec<PairRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for PanicOnceMarket {
        async fn fetch_pairs(&self) -> Result<Vec<PairRecord>, DataFetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("malformed snapshot");
            }
            Ok(self.records.clone())
        }

        fn name(&self) -> &str {
            "panic-once"
        }
    }

    #[tokio::test]
    async fn test_panicking_iteration_is_survived() {
        let market = Arc::new(PanicOnceMarket {
            records: Vec::new(),
            calls: AtomicUsize::new(0),
        });
        let mut orc = orchestrator(Vec::new(), MockQuoter::new(), MockExecution::new(), Some(2));
        orc.market = market.clone() as Arc<dyn MarketDataProvider>;

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        assert_ok!(orc.run(shutdown).await);

        assert!(market.calls.load(Ordering::SeqCst) >= 2);
        assert!(orc.accountant().iterations() >= 2);
        assert_eq!(orc.accountant().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_repeated_panics_hit_failure_ceiling() {
        struct AlwaysPanics;

        #[async_trait]
        impl MarketDataProvider for AlwaysPanics {
            async fn fetch_pairs(&self) -> Result<Vec<PairRecord>, DataFetchError> {
                panic!("malformed snapshot");
            }

            fn name(&self) -> &str {
                "always-panics"
            }
        }

        let mut orc = orchestrator(Vec::new(), MockQuoter::new(), MockExecution::new(), Some(2));
        orc.market = Arc::new(AlwaysPanics) as Arc<dyn MarketDataProvider>;

        let err = orc.run(std::future::pending()).await.unwrap_err();
        let ArbError::Fatal(message) = err else {
            panic!("expected fatal, got {err:?}");
        };
        assert!(message.contains("malformed snapshot"));
        assert_eq!(orc.accountant().consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn test_panicking_opportunity_is_rejected() {
        struct PanickingQuoter;

        #[async_trait]
        impl QuotingOracle for PanickingQuoter {
            async fn quote_exact_input(&self, _: &Bytes, _: U256) -> Result<U256, QuoteError> {
                panic!("quote decoder");
            }

            async fn quote_exact_input_single(
                &self,
                _: Address,
                _: Address,
                _: u32,
                _: U256,
            ) -> Result<U256, QuoteError> {
                panic!("quote decoder");
            }
        }

        let (base, x, y) = (asset(1, "WETH"), asset(2, "X"), asset(3, "Y"));
        let mut execution = MockExecution::new();
        execution
            .expect_gas_price()
            .returning(|| Ok(U256::one()));
        execution.expect_submit().never();

        let mut orc = orchestrator(
            vec![
                pool(&base, &x, dec!(2), dec!(0.5)),
                pool(&x, &y, dec!(1.5), dec!(0.5)),
                pool(&y, &base, dec!(0.35), dec!(0.5)),
            ],
            MockQuoter::new(),
            execution,
            None,
        );
        orc.evaluator = OpportunityEvaluator::new(
            Arc::new(PanickingQuoter),
            orc.execution.clone(),
            SizeOptimizer::new(SizingParams::default()),
            EvaluationParams {
                recipient: Address::from_low_u64_be(0xbeef),
                seed_amount: U256::from(1_000_000),
                min_profit: U256::from(1_000),
                quote_timeout: Duration::from_secs(1),
                gas_timeout: Duration::from_secs(1),
            },
        );

        let report = assert_ok!(orc.run_iteration().await);
        assert_eq!(report.opportunities, 1);
        assert_eq!(report.rejected.get("panicked"), Some(&1));
        assert_eq!(report.executed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let mut orc = orchestrator(Vec::new(), MockQuoter::new(), MockExecution::new(), None);
        let shutdown = tokio::time::sleep(Duration::from_millis(30));
        assert_ok!(orc.run(shutdown).await);
        assert!(orc.accountant().iterations() >= 1);
    }
}
