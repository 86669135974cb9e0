//! Uniswap V3 subgraph market-data provider.
//!
//! Pulls the most-traded pools (ordered by lifetime USD volume) together
//! with their trailing-24h `poolDayData` buckets, in `pages` concurrent
//! GraphQL requests of `page_size` pools each.
//!
//! Rows whose numbers or addresses fail to parse are dropped here; the
//! admission thresholds themselves are applied by the price graph.

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, U256};
use futures::future::try_join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::MarketDataProvider;
use crate::types::{Asset, DataFetchError, PairRecord, PoolDayData};

const PROVIDER_NAME: &str = "uniswap-v3-subgraph";

/// Fee tiers are encoded as `uint24` in swap paths.
const MAX_FEE_TIER: u32 = (1 << 24) - 1;

// ---------------------------------------------------------------------------
// GraphQL response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Option<PoolsData>,
    #[serde(default)]
    errors: Option<Vec<GraphError>>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PoolsData {
    pools: Vec<RawPool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPool {
    id: String,
    token0: RawToken,
    token1: RawToken,
    token0_price: String,
    token1_price: String,
    fee_tier: String,
    liquidity: String,
    #[serde(rename = "volumeUSD")]
    volume_usd: String,
    #[serde(default)]
    pool_day_data: Vec<RawDayData>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    id: String,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct RawDayData {
    #[serde(rename = "tvlUSD")]
    tvl_usd: String,
    #[serde(rename = "volumeUSD")]
    volume_usd: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SubgraphClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    page_size: u32,
    pages: u32,
}

impl SubgraphClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        page_size: u32,
        pages: u32,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("cyclearb/0.1")
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            api_key,
            page_size,
            pages,
        })
    }

    async fn fetch_page(&self, skip: u32, since: i64) -> Result<Vec<RawPool>, DataFetchError> {
        let body = serde_json::json!({ "query": pools_query(self.page_size, skip, since) });

        let mut req = self.http.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(request_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DataFetchError::Request {
                provider: PROVIDER_NAME.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let parsed: GraphResponse = resp.json().await.map_err(|e| DataFetchError::Malformed {
            provider: PROVIDER_NAME.to_string(),
            message: e.to_string(),
        })?;

        into_pools(parsed)
    }
}

#[async_trait]
impl MarketDataProvider for SubgraphClient {
    async fn fetch_pairs(&self) -> Result<Vec<PairRecord>, DataFetchError> {
        let since = Utc::now().timestamp() - 24 * 60 * 60;

        let pages = (0..self.pages).map(|page| self.fetch_page(page * self.page_size, since));
        let raw: Vec<RawPool> = try_join_all(pages).await?.into_iter().flatten().collect();

        let fetched = raw.len();
        let records: Vec<PairRecord> = raw.into_iter().filter_map(into_record).collect();

        info!(
            fetched,
            parsed = records.len(),
            "Subgraph pools fetched"
        );
        Ok(records)
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn pools_query(first: u32, skip: u32, since: i64) -> String {
    format!(
        r#"{{
  pools(first: {first}, skip: {skip}, orderBy: volumeUSD, orderDirection: desc) {{
    id
    token0 {{ id symbol }}
    token1 {{ id symbol }}
    token0Price
    token1Price
    feeTier
    liquidity
    volumeUSD
    poolDayData(first: 10, orderBy: date, orderDirection: desc, where: {{ date_gt: {since} }}) {{
      tvlUSD
      volumeUSD
    }}
  }}
}}"#
    )
}

fn request_error(e: reqwest::Error) -> DataFetchError {
    DataFetchError::Request {
        provider: PROVIDER_NAME.to_string(),
        message: e.to_string(),
    }
}

fn into_pools(resp: GraphResponse) -> Result<Vec<RawPool>, DataFetchError> {
    if let Some(errors) = resp.errors.filter(|e| !e.is_empty()) {
        let message = errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(DataFetchError::Malformed {
            provider: PROVIDER_NAME.to_string(),
            message,
        });
    }

    resp.data
        .map(|d| d.pools)
        .ok_or_else(|| DataFetchError::Malformed {
            provider: PROVIDER_NAME.to_string(),
            message: "response has no data".to_string(),
        })
}

/// Subgraph BigDecimals may carry more digits than `Decimal` holds, or use
/// scientific notation. Excess precision is rounded; overflow is rejected.
fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn into_record(raw: RawPool) -> Option<PairRecord> {
    let parsed = (|| {
        let token0 = Asset::new(raw.token0.id.parse::<Address>().ok()?, raw.token0.symbol.clone());
        let token1 = Asset::new(raw.token1.id.parse::<Address>().ok()?, raw.token1.symbol.clone());
        let fee_tier = raw.fee_tier.parse::<u32>().ok().filter(|f| *f <= MAX_FEE_TIER)?;
        let day_data = raw
            .pool_day_data
            .iter()
            .map(|d| {
                Some(PoolDayData {
                    tvl_usd: parse_decimal(&d.tvl_usd)?,
                    volume_usd: parse_decimal(&d.volume_usd)?,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(PairRecord {
            pool_id: raw.id.clone(),
            token0,
            token1,
            token0_price: parse_decimal(&raw.token0_price)?,
            token1_price: parse_decimal(&raw.token1_price)?,
            fee_tier,
            volume_usd: parse_decimal(&raw.volume_usd)?,
            liquidity: U256::from_dec_str(&raw.liquidity).ok()?,
            day_data,
        })
    })();

    if parsed.is_none() {
        debug!(pool = %raw.id, "Dropping unparseable pool row");
    }
    parsed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
