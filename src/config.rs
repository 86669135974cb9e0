//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (RPC URL, signing key, subgraph API key) are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    pub execution: ExecutionConfig,
    pub data_source: DataSourceConfig,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Pause between orchestration iterations.
    pub iteration_delay_ms: u64,
    /// Log trades instead of submitting them.
    #[serde(default)]
    pub dry_run: bool,
    /// Consecutive failed iterations tolerated before `run` gives up.
    /// Unset means retry forever.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Every cycle starts and ends at this asset (WETH on mainnet).
    pub base_asset: Address,
    #[serde(default = "default_min_rate")]
    pub min_rate_threshold: Decimal,
    #[serde(default = "default_upper_bound")]
    pub upper_sanity_bound: Decimal,
    /// Only the best N cycles per iteration are evaluated.
    #[serde(default)]
    pub max_opportunities: Option<usize>,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Thresholds a pool snapshot must meet before it enters the graph.
#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "default_min_usd")]
    pub min_tvl_usd: Decimal,
    #[serde(default = "default_min_usd")]
    pub min_volume_usd: Decimal,
    /// Decimal string of raw liquidity units.
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_tvl_usd: default_min_usd(),
            min_volume_usd: default_min_usd(),
            min_liquidity: default_min_liquidity(),
        }
    }
}

impl AdmissionConfig {
    pub fn min_liquidity(&self) -> Result<U256> {
        U256::from_dec_str(&self.min_liquidity)
            .with_context(|| format!("Invalid min_liquidity: {}", self.min_liquidity))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SizingConfig {
    /// Upper end of the search interval, in ether.
    #[serde(default = "default_initial_amount")]
    pub initial_amount_eth: String,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            initial_amount_eth: default_initial_amount(),
            rounds: default_rounds(),
        }
    }
}

impl SizingConfig {
    pub fn initial_amount(&self) -> Result<U256> {
        parse_ether(&self.initial_amount_eth)
            .with_context(|| format!("Invalid initial_amount_eth: {}", self.initial_amount_eth))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Absolute net-profit floor, in ether.
    #[serde(default = "default_min_profit")]
    pub min_profit_eth: String,
    /// Env var holding the address that receives swap output.
    pub recipient_env: String,
}

impl ExecutionConfig {
    pub fn min_profit(&self) -> Result<U256> {
        parse_ether(&self.min_profit_eth)
            .with_context(|| format!("Invalid min_profit_eth: {}", self.min_profit_eth))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSourceConfig {
    pub subgraph_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_pages")]
    pub pages: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub url_env: String,
    pub private_key_env: String,
    pub chain_id: u64,
    pub quoter_address: Address,
    pub router_address: Address,
}

/// Upper bounds on every external call, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    pub fetch_secs: u64,
    pub quote_secs: u64,
    pub gas_secs: u64,
    pub submit_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            fetch_secs: 30,
            quote_secs: 10,
            gas_secs: 10,
            submit_secs: 180,
        }
    }
}

impl TimeoutsConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn quote(&self) -> Duration {
        Duration::from_secs(self.quote_secs)
    }

    pub fn gas(&self) -> Duration {
        Duration::from_secs(self.gas_secs)
    }

    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit_secs)
    }
}

fn default_min_rate() -> Decimal {
    dec!(1.04)
}

fn default_upper_bound() -> Decimal {
    dec!(1.07)
}

fn default_min_usd() -> Decimal {
    dec!(10000)
}

fn default_min_liquidity() -> String {
    "1000000000000000000".to_string()
}

fn default_initial_amount() -> String {
    "0.1".to_string()
}

fn default_rounds() -> u32 {
    6
}

fn default_min_profit() -> String {
    "0.01".to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_pages() -> u32 {
    2
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let d = &self.discovery;
        if d.min_rate_threshold > d.upper_sanity_bound {
            anyhow::bail!(
                "min_rate_threshold ({}) exceeds upper_sanity_bound ({})",
                d.min_rate_threshold,
                d.upper_sanity_bound
            );
        }
        if self.sizing.rounds == 0 {
            anyhow::bail!("sizing.rounds must be at least 1");
        }
        self.sizing.initial_amount()?;
        self.execution.min_profit()?;
        d.admission.min_liquidity()?;
        Ok(())
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.agent.iteration_delay_ms)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
