//! In-memory collaborators for integration testing.
//!
//! Deterministic `MarketDataProvider`, `QuotingOracle` and
//! `ExecutionService` implementations with no network access. Failure
//! modes and latencies are controllable from test code.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use cyclearb::config::AppConfig;
use cyclearb::platforms::{ExecutionService, MarketDataProvider, QuotingOracle};
use cyclearb::types::*;

pub const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

pub fn weth() -> Asset {
    Asset::new(WETH.parse().unwrap(), "WETH")
}

pub fn token(n: u64, symbol: &str) -> Asset {
    Asset::new(Address::from_low_u64_be(n), symbol)
}

/// A liquid pool whose `a → b` rate is `ab` and `b → a` rate is `ba`.
pub fn pool(a: &Asset, b: &Asset, fee: u32, ab: Decimal, ba: Decimal) -> PairRecord {
    PairRecord {
        pool_id: format!("{}-{}-{fee}", a.symbol, b.symbol),
        token0: a.clone(),
        token1: b.clone(),
        token0_price: ba,
        token1_price: ab,
        fee_tier: fee,
        volume_usd: dec!(25000000),
        liquidity: U256::exp10(21),
        day_data: vec![PoolDayData {
            tvl_usd: dec!(5000000),
            volume_usd: dec!(750000),
        }],
    }
}

/// `WETH → X → Y → WETH` at 2 × 1.5 × 0.35 = 1.05, with the first hop
/// available at each of `first_hop_fees`.
pub fn triangle(first_hop_fees: &[u32]) -> Vec<PairRecord> {
    let (base, x, y) = (weth(), token(2, "X"), token(3, "Y"));
    let mut records: Vec<PairRecord> = first_hop_fees
        .iter()
        .map(|&fee| pool(&base, &x, fee, dec!(2), dec!(0.5)))
        .collect();
    records.push(pool(&x, &y, 3000, dec!(1.5), dec!(0.5)));
    records.push(pool(&y, &base, 3000, dec!(0.35), dec!(0.5)));
    records
}

pub fn test_config() -> AppConfig {
    AppConfig::from_toml(&format!(
        r#"
[agent]
name = "CYCLEARB-TEST"
iteration_delay_ms = 5

[discovery]
base_asset = "{WETH}"

[sizing]
initial_amount_eth = "10"

[execution]
min_profit_eth = "0.01"
recipient_env = "WALLET_ADDRESS"

[data_source]
subgraph_url = "http://localhost/unused"

[rpc]
url_env = "RPC_URL"
private_key_env = "PRIVATE_KEY"
chain_id = 1
quoter_address = "0xb27308f9F90D607463bb33eA1BeBb41C27CE5AB6"
router_address = "0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"

[timeouts]
fetch_secs = 2
quote_secs = 2
gas_secs = 2
submit_secs = 2
"#
    ))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Serves scripted responses in order, then repeats the steady state.
pub struct MockMarket {
    script: Mutex<VecDeque<Result<Vec<PairRecord>, String>>>,
    steady: Vec<PairRecord>,
    calls: AtomicUsize,
}

impl MockMarket {
    pub fn new(steady: Vec<PairRecord>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            steady,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next fetch with `message`.
    pub fn then_fail(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    async fn fetch_pairs(&self) -> Result<Vec<PairRecord>, DataFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(records)) => Ok(records),
            Some(Err(message)) => Err(DataFetchError::Request {
                provider: "mock".to_string(),
                message,
            }),
            None => Ok(self.steady.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

/// Multi-hop quotes return `amount × gain_bps / 10_000`; single hops pass
/// the amount through unless the fee tier is marked broken.
pub struct MockQuoter {
    gain_bps: u64,
    broken_fee: Option<u32>,
    calls: AtomicUsize,
}

impl MockQuoter {
    pub fn new(gain_bps: u64) -> Self {
        Self {
            gain_bps,
            broken_fee: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Single-hop quotes through `fee` revert.
    pub fn with_broken_fee(mut self, fee: u32) -> Self {
        self.broken_fee = Some(fee);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuotingOracle for MockQuoter {
    async fn quote_exact_input(&self, _path: &Bytes, amount_in: U256) -> Result<U256, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(amount_in * U256::from(self.gain_bps) / U256::from(10_000))
    }

    async fn quote_exact_input_single(
        &self,
        _token_in: Address,
        _token_out: Address,
        fee_tier: u32,
        amount_in: U256,
    ) -> Result<U256, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_fee == Some(fee_tier) {
            return Err(QuoteError::Reverted("SPL".to_string()));
        }
        Ok(amount_in)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Records every submission; each submit takes `latency` to settle.
pub struct MockExecution {
    pub gas_units: U256,
    pub gas_price: U256,
    latency: Duration,
    submitted: Mutex<Vec<TradeDescriptor>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExecution {
    pub fn new(latency: Duration) -> Self {
        Self {
            gas_units: U256::from(150_000),
            // 20 gwei
            gas_price: U256::from(20_000_000_000u64),
            latency,
            submitted: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn gas_cost(&self) -> U256 {
        self.gas_units * self.gas_price
    }

    pub fn submitted(&self) -> Vec<TradeDescriptor> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionService for MockExecution {
    async fn estimate_gas(&self, _trade: &TradeDescriptor) -> Result<U256, GasEstimationError> {
        Ok(self.gas_units)
    }

    async fn gas_price(&self) -> Result<U256, GasEstimationError> {
        Ok(self.gas_price)
    }

    async fn submit(&self, trade: &TradeDescriptor) -> Result<TradeReceipt, ExecutionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(trade.clone());

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TradeReceipt::dry_run())
    }
}
