//! End-to-end iterations against the in-memory collaborators.

use ethers::types::{Address, U256};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use cyclearb::config::AppConfig;
use cyclearb::engine::orchestrator::Orchestrator;
use cyclearb::platforms::dry_run::DryRunExecution;
use cyclearb::platforms::ExecutionService;

use crate::mock_platform::*;

fn recipient() -> Address {
    Address::from_low_u64_be(0xbeef)
}

fn build(
    cfg: &AppConfig,
    market: Arc<MockMarket>,
    quoter: Arc<MockQuoter>,
    execution: Arc<dyn ExecutionService>,
) -> Orchestrator {
    Orchestrator::from_config(cfg, recipient(), market, quoter, execution).unwrap()
}

#[tokio::test]
async fn test_two_opportunities_one_submission() {
    let market = Arc::new(MockMarket::new(triangle(&[500, 3000])));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(50)));
    let orc = build(&test_config(), market, quoter, execution.clone());

    let report = assert_ok!(orc.run_iteration().await);

    assert_eq!(report.opportunities, 2);
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.rejected_total(), 0);
    assert_eq!(report.executed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(execution.submitted().len(), 1);
    assert_eq!(execution.max_in_flight(), 1);
}

#[tokio::test]
async fn test_higher_rate_cycle_wins_the_slot() {
    // WETH → X at 2.12 (fee 500) or 2.1 (fee 3000), then × 1 × 0.5:
    // cycles at 1.06 and 1.05.
    let (base, x, y) = (weth(), token(2, "X"), token(3, "Y"));
    let records = vec![
        pool(&base, &x, 3000, dec!(2.1), dec!(0.5)),
        pool(&base, &x, 500, dec!(2.12), dec!(0.5)),
        pool(&x, &y, 3000, dec!(1), dec!(0.5)),
        pool(&y, &base, 3000, dec!(0.5), dec!(0.5)),
    ];
    let market = Arc::new(MockMarket::new(records));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(50)));
    let orc = build(&test_config(), market, quoter, execution.clone());

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.opportunities, 2);
    assert_eq!(report.executed, 1);
    assert_eq!(report.skipped, 1);

    let trades = execution.submitted();
    assert_eq!(trades.len(), 1);
    // First fee tier sits right after the base asset address.
    assert_eq!(&trades[0].path[20..23], &[0x00, 0x01, 0xf4]);
}

#[tokio::test]
async fn test_submitted_trade_covers_gas() {
    let market = Arc::new(MockMarket::new(triangle(&[3000])));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let cfg = test_config();
    let orc = build(&cfg, market, quoter, execution.clone());

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.executed, 1);

    let trades = execution.submitted();
    let trade = &trades[0];
    let gas_cost = execution.gas_cost();
    assert_eq!(trade.recipient, recipient());
    assert_eq!(trade.amount_out_minimum, trade.amount_in + gas_cost);
    assert_eq!(trade.gas_limit, Some(execution.gas_units));
    assert!(trade.amount_in >= gas_cost * U256::from(10));
    assert!(trade.amount_in <= cfg.sizing.initial_amount().unwrap());
    // 20 bytes per asset, 3 per fee tier, three hops back to WETH.
    assert_eq!(trade.path.len(), 20 * 4 + 3 * 3);
    assert_eq!(&trade.path[..20], weth().id.as_bytes());
}

#[tokio::test]
async fn test_unprofitable_cycle_not_submitted() {
    let market = Arc::new(MockMarket::new(triangle(&[3000])));
    let quoter = Arc::new(MockQuoter::new(9_900));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let orc = build(&test_config(), market, quoter, execution.clone());

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.opportunities, 1);
    assert_eq!(report.rejected.get("negative_profit"), Some(&1));
    assert_eq!(report.executed, 0);
    assert!(execution.submitted().is_empty());
}

#[tokio::test]
async fn test_preflight_failure_abandons_only_that_cycle() {
    let market = Arc::new(MockMarket::new(triangle(&[500, 3000])));
    let quoter = Arc::new(MockQuoter::new(10_500).with_broken_fee(500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let orc = build(&test_config(), market, quoter, execution.clone());

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.rejected.get("preflight"), Some(&1));
    assert_eq!(report.executed, 1);
    assert_eq!(report.skipped, 0);
    assert!(execution.submitted()[0].gas_limit.is_some());
}

#[tokio::test]
async fn test_fetch_failure_then_recovery() {
    let market = Arc::new(MockMarket::new(triangle(&[3000])).then_fail("HTTP 503"));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let mut orc = build(&test_config(), market.clone(), quoter, execution.clone());

    let first = orc.run_iteration().await;
    assert!(first.unwrap_err().is_data_fetch());

    let shutdown = tokio::time::sleep(Duration::from_millis(200));
    assert_ok!(orc.run(shutdown).await);

    assert!(market.calls() >= 2);
    assert!(orc.accountant().iterations() >= 1);
    assert!(orc.accountant().trades_submitted() >= 1);
    assert!(!execution.submitted().is_empty());
}

#[tokio::test]
async fn test_fetch_failures_inside_loop_are_survived() {
    let market = Arc::new(
        MockMarket::new(triangle(&[3000]))
            .then_fail("HTTP 503")
            .then_fail("HTTP 502"),
    );
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let mut cfg = test_config();
    cfg.agent.max_consecutive_failures = Some(3);
    let mut orc = build(&cfg, market.clone(), quoter, execution.clone());

    let shutdown = tokio::time::sleep(Duration::from_millis(200));
    assert_ok!(orc.run(shutdown).await);

    assert!(orc.accountant().iterations() >= 3);
    assert_eq!(orc.accountant().consecutive_failures(), 0);
    assert!(orc.accountant().trades_submitted() >= 1);
}

#[tokio::test]
async fn test_dry_run_never_reaches_service() {
    let market = Arc::new(MockMarket::new(triangle(&[3000])));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let inner = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let dry: Arc<dyn ExecutionService> = Arc::new(DryRunExecution::new(inner.clone()));
    let orc = build(&test_config(), market, quoter, dry);

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.executed, 1);
    assert!(inner.submitted().is_empty());
}

#[tokio::test]
async fn test_unadmitted_pools_yield_nothing() {
    let mut records = triangle(&[3000]);
    for r in &mut records {
        r.day_data.clear();
    }
    let market = Arc::new(MockMarket::new(records));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let orc = build(&test_config(), market, quoter.clone(), execution);

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.records_fetched, 3);
    assert_eq!(report.records_admitted, 0);
    assert_eq!(report.opportunities, 0);
    assert_eq!(quoter.calls(), 0);
}

#[tokio::test]
async fn test_opportunity_cap() {
    let market = Arc::new(MockMarket::new(triangle(&[100, 500, 3000, 10000])));
    let quoter = Arc::new(MockQuoter::new(10_500));
    let execution = Arc::new(MockExecution::new(Duration::from_millis(1)));
    let mut cfg = test_config();
    cfg.discovery.max_opportunities = Some(2);
    let orc = build(&cfg, market, quoter, execution);

    let report = assert_ok!(orc.run_iteration().await);
    assert_eq!(report.opportunities, 2);
    assert_eq!(report.evaluated, 2);
}
