//! Price graph.
//!
//! Directed multigraph of admitted pools: one edge per direction and fee
//! tier. Edges live in a flat table keyed by `(from, to, fee_tier)`; a
//! separate insertion-ordered neighbour index drives cycle enumeration so
//! results are deterministic for a given input order. Asset metadata is kept
//! in its own table, never mixed into the neighbour lookup.
//!
//! A graph is built once per iteration and is read-only afterwards.

use ethers::types::{Address, U256};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::AdmissionConfig;
use crate::types::{Asset, DirectedEdge, PairRecord};
use rust_decimal::Decimal;

/// Composite edge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from: Address,
    pub to: Address,
    pub fee_tier: u32,
}

/// Resolved admission thresholds.
#[derive(Debug, Clone)]
pub struct Admission {
    pub min_tvl_usd: Decimal,
    pub min_volume_usd: Decimal,
    pub min_liquidity: U256,
}

impl Admission {
    pub fn from_config(cfg: &AdmissionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            min_tvl_usd: cfg.min_tvl_usd,
            min_volume_usd: cfg.min_volume_usd,
            min_liquidity: cfg.min_liquidity()?,
        })
    }

    /// Why a record fails admission, or `None` if it passes.
    pub fn reject_reason(&self, record: &PairRecord) -> Option<&'static str> {
        let Some(latest) = record.day_data.first() else {
            return Some("no trading history");
        };
        if latest.tvl_usd < self.min_tvl_usd {
            return Some("tvl below minimum");
        }
        if latest.volume_usd < self.min_volume_usd {
            return Some("24h volume below minimum");
        }
        if record.liquidity < self.min_liquidity {
            return Some("liquidity below minimum");
        }
        None
    }

    pub fn admits(&self, record: &PairRecord) -> bool {
        self.reject_reason(record).is_none()
    }
}

impl Default for Admission {
    fn default() -> Self {
        Self {
            min_tvl_usd: Decimal::from(10_000),
            min_volume_usd: Decimal::from(10_000),
            min_liquidity: U256::exp10(18),
        }
    }
}

#[derive(Debug, Default)]
pub struct PriceGraph {
    edges: HashMap<EdgeKey, DirectedEdge>,
    /// Outgoing neighbours per asset, in first-seen order.
    neighbors: HashMap<Address, Vec<Address>>,
    /// Fee tiers per ordered pair, in first-seen order.
    tiers: HashMap<(Address, Address), Vec<u32>>,
    assets: HashMap<Address, Asset>,
    admitted: usize,
}

impl PriceGraph {
    /// Build a graph from raw records, silently dropping any that fail
    /// admission. Duplicate `(from, to, fee_tier)` edges keep the first.
    pub fn build(records: &[PairRecord], admission: &Admission) -> Self {
        let mut graph = PriceGraph::default();
        let mut rejected = 0usize;

        for record in records {
            if let Some(reason) = admission.reject_reason(record) {
                debug!(pool = %record.pool_id, pair = %record, reason, "Pool not admitted");
                rejected += 1;
                continue;
            }
            graph.admitted += 1;
            graph.remember(&record.token0);
            graph.remember(&record.token1);

            graph.insert(DirectedEdge {
                from: record.token1.clone(),
                to: record.token0.clone(),
                fee_tier: record.fee_tier,
                rate: record.token0_price,
                pool_id: record.pool_id.clone(),
                volume_usd: record.volume_usd,
            });
            graph.insert(DirectedEdge {
                from: record.token0.clone(),
                to: record.token1.clone(),
                fee_tier: record.fee_tier,
                rate: record.token1_price,
                pool_id: record.pool_id.clone(),
                volume_usd: record.volume_usd,
            });
        }

        info!(
            records = records.len(),
            admitted = graph.admitted,
            rejected,
            assets = graph.assets.len(),
            edges = graph.edges.len(),
            "Price graph built"
        );
        graph
    }

    fn remember(&mut self, asset: &Asset) {
        self.assets.entry(asset.id).or_insert_with(|| asset.clone());
    }

    fn insert(&mut self, edge: DirectedEdge) {
        let key = EdgeKey {
            from: edge.from.id,
            to: edge.to.id,
            fee_tier: edge.fee_tier,
        };
        if self.edges.contains_key(&key) {
            return;
        }

        let tiers = self.tiers.entry((key.from, key.to)).or_default();
        if tiers.is_empty() {
            self.neighbors.entry(key.from).or_default().push(key.to);
        }
        tiers.push(key.fee_tier);
        self.edges.insert(key, edge);
    }

    pub fn edge(&self, from: Address, to: Address, fee_tier: u32) -> Option<&DirectedEdge> {
        self.edges.get(&EdgeKey { from, to, fee_tier })
    }

    /// Assets reachable in one hop from `asset`.
    pub fn neighbors(&self, asset: Address) -> &[Address] {
        self.neighbors.get(&asset).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fee tiers available for the ordered pair.
    pub fn fee_tiers(&self, from: Address, to: Address) -> &[u32] {
        self.tiers.get(&(from, to)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every parallel edge from `from` to `to`, one per fee tier.
    pub fn edges_between(&self, from: Address, to: Address) -> impl Iterator<Item = &DirectedEdge> {
        self.fee_tiers(from, to)
            .iter()
            .filter_map(move |&fee| self.edge(from, to, fee))
    }

    pub fn asset(&self, id: Address) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Records that passed admission.
    pub fn admitted_records(&self) -> usize {
        self.admitted
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
