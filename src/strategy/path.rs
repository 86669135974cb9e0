//! Packed swap-path encoding.
//!
//! Uniswap V3 multi-hop paths are `encodePacked(address, uint24, address,
//! uint24, ..., address)`: 20 bytes per asset and 3 big-endian bytes per fee
//! tier, ending with the base asset.

use ethers::types::Bytes;

use crate::types::ArbitrageCycle;

const ADDRESS_LEN: usize = 20;
const FEE_LEN: usize = 3;

/// Encode the hop sequence of a cycle.
pub fn encode(cycle: &ArbitrageCycle) -> Bytes {
    let mut out = Vec::with_capacity(ADDRESS_LEN + cycle.hops.len() * (FEE_LEN + ADDRESS_LEN));
    out.extend_from_slice(cycle.base().id.as_bytes());
    for hop in &cycle.hops {
        out.extend_from_slice(&hop.fee_tier.to_be_bytes()[1..]);
        out.extend_from_slice(hop.to.id.as_bytes());
    }
    Bytes::from(out)
}
