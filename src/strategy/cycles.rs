//! Cycle detection.
//!
//! Enumerates every simple 3-hop (`base → i → j → base`) and 4-hop
//! (`base → i → j → k → base`) cycle through the base asset, across every
//! fee-tier combination at every hop, and keeps those whose rate product
//! lies within `[min_rate, upper_bound]`.
//!
//! Rates above the upper bound come from stale or corrupt snapshots: real
//! post-fee margins are small. Depth stops at four hops; fan-out times
//! fee tiers per hop makes deeper search expensive while each extra
//! fee-bearing hop eats into the margin.

use ethers::types::Address;
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::graph::PriceGraph;
use crate::types::{ArbitrageCycle, DirectedEdge};

/// Rate bounds applied to every candidate.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub min_rate: Decimal,
    pub upper_bound: Decimal,
}

impl RateWindow {
    pub fn contains(&self, rate: Decimal) -> bool {
        rate >= self.min_rate && rate <= self.upper_bound
    }
}

/// Find all in-window cycles through `base`, best rate first.
///
/// 3-hop cycles are discovered before 4-hop ones and the final sort is
/// stable, so equal rates keep discovery order.
pub fn find_opportunities(
    graph: &PriceGraph,
    base: Address,
    min_rate_threshold: Decimal,
    upper_sanity_bound: Decimal,
) -> Vec<ArbitrageCycle> {
    let window = RateWindow {
        min_rate: min_rate_threshold,
        upper_bound: upper_sanity_bound,
    };

    let mut search = Search {
        graph,
        base,
        window,
        found: Vec::new(),
        candidates: 0,
    };
    search.three_hop();
    let three_hop = search.found.len();
    search.four_hop();

    let Search {
        mut found,
        candidates,
        ..
    } = search;
    found.sort_by(|a, b| b.cycle_rate.cmp(&a.cycle_rate));

    info!(
        candidates,
        three_hop,
        four_hop = found.len() - three_hop,
        best = ?found.first().map(|c| c.cycle_rate),
        "Cycle search complete"
    );
    found
}

struct Search<'g> {
    graph: &'g PriceGraph,
    base: Address,
    window: RateWindow,
    found: Vec<ArbitrageCycle>,
    candidates: usize,
}

impl<'g> Search<'g> {
    fn three_hop(&mut self) {
        let (graph, base) = (self.graph, self.base);
        for &i in graph.neighbors(base) {
            if i == base {
                continue;
            }
            for first in graph.edges_between(base, i) {
                for &j in graph.neighbors(i) {
                    if j == base || j == i {
                        continue;
                    }
                    for second in graph.edges_between(i, j) {
                        for third in graph.edges_between(j, base) {
                            self.consider(&[first, second, third]);
                        }
                    }
                }
            }
        }
    }

    fn four_hop(&mut self) {
        let (graph, base) = (self.graph, self.base);
        for &i in graph.neighbors(base) {
            if i == base {
                continue;
            }
            for first in graph.edges_between(base, i) {
                for &j in graph.neighbors(i) {
                    if j == base || j == i {
                        continue;
                    }
                    for second in graph.edges_between(i, j) {
                        for &k in graph.neighbors(j) {
                            if k == base || k == i || k == j {
                                continue;
                            }
                            for third in graph.edges_between(j, k) {
                                for fourth in graph.edges_between(k, base) {
                                    self.consider(&[first, second, third, fourth]);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn consider(&mut self, hops: &[&DirectedEdge]) {
        self.candidates += 1;

        let rate = hops
            .iter()
            .try_fold(Decimal::ONE, |acc, hop| acc.checked_mul(hop.rate));

        match rate {
            Some(rate) if self.window.contains(rate) => {
                self.found.push(ArbitrageCycle {
                    hops: hops.iter().map(|h| (*h).clone()).collect(),
                    cycle_rate: rate,
                });
            }
            Some(_) => {}
            None => debug!(hops = hops.len(), "Cycle rate overflowed, treating as corrupt"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
