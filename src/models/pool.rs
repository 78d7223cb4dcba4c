use std::collections::HashMap;
use std::time::Instant;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Canonical map-key form of an EVM address.
pub fn normalize_address(addr: &str) -> String {
    addr.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DexType {
    V2,
    V3,
}

impl DexType {
    /// Relative multicall cost of reading this pool: V3 needs two sub-calls
    /// (slot0 + liquidity), V2 one (getReserves).
    pub fn weight(&self) -> u32 {
        match self {
            DexType::V2 => 1,
            DexType::V3 => 2,
        }
    }
}

/// A liquidity pool known to the registry. `fee_tier` is present iff the
/// pool is V3. `token0 < token1` lexicographically (EVM convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetadata {
    pub address: String,
    pub dex_type: DexType,
    pub token0: String,
    pub token1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_tier: Option<u32>,
    pub weight: u32,
}

impl PoolMetadata {
    pub fn v2(address: String, token0: String, token1: String) -> Self {
        Self {
            address,
            dex_type: DexType::V2,
            token0,
            token1,
            fee_tier: None,
            weight: DexType::V2.weight(),
        }
    }

    pub fn v3(address: String, token0: String, token1: String, fee_tier: u32) -> Self {
        Self {
            address,
            dex_type: DexType::V3,
            token0,
            token1,
            fee_tier: Some(fee_tier),
            weight: DexType::V3.weight(),
        }
    }

    pub fn key(&self) -> String {
        normalize_address(&self.address)
    }

    pub fn is_token0(&self, token: &str) -> bool {
        normalize_address(&self.token0) == normalize_address(token)
    }
}

/// An edge stating "this token's price can be derived from `pool` by
/// normalizing against `base`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRoute {
    pub pool: String,
    pub base: String,
}

/// Persisted per-chain registry of pools and pricing routes.
///
/// Map keys are lowercase addresses; stored address fields keep their
/// original checksum form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRegistry {
    #[serde(default)]
    pub pools: HashMap<String, PoolMetadata>,
    #[serde(default)]
    pub pricing_routes: HashMap<String, Vec<PricingRoute>>,
}

impl PoolRegistry {
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pool(&self, address: &str) -> Option<&PoolMetadata> {
        self.pools.get(&normalize_address(address))
    }

    pub fn routes_for(&self, token: &str) -> Option<&Vec<PricingRoute>> {
        self.pricing_routes.get(&normalize_address(token))
    }

    /// Insert a pool and its two symmetric pricing-route edges. Duplicate
    /// (pool, base) edges are not inserted twice, so re-discovery is a no-op.
    pub fn insert_pool(&mut self, meta: PoolMetadata) {
        let pool_key = meta.key();
        self.add_route(&meta.token0, &pool_key, &meta.token1);
        self.add_route(&meta.token1, &pool_key, &meta.token0);
        self.pools.insert(pool_key, meta);
    }

    fn add_route(&mut self, token: &str, pool_key: &str, base: &str) {
        let routes = self
            .pricing_routes
            .entry(normalize_address(token))
            .or_default();
        let edge = PricingRoute {
            pool: pool_key.to_string(),
            base: normalize_address(base),
        };
        if !routes.contains(&edge) {
            routes.push(edge);
        }
    }

    /// Best route for a token: highest pool weight, ties broken by lowest
    /// lowercase pool address. Routes pointing at unknown pools are skipped.
    pub fn best_route(&self, token: &str) -> Option<(&PricingRoute, &PoolMetadata)> {
        let routes = self.routes_for(token)?;
        routes
            .iter()
            .filter_map(|r| self.pools.get(&r.pool).map(|m| (r, m)))
            .min_by(|(ra, ma), (rb, mb)| {
                mb.weight.cmp(&ma.weight).then_with(|| ra.pool.cmp(&rb.pool))
            })
    }
}

/// Raw pool state as read by the multicall engine. V3 pools report a sqrt
/// price and in-range liquidity; V2 pools report reserves, which the V2
/// pricing formulas need.
#[derive(Debug, Clone, Default)]
pub struct PoolStateData {
    pub sqrt_price_x96: U256,
    pub liquidity: U256,
    pub reserve0: Option<U256>,
    pub reserve1: Option<U256>,
}

/// A cached observation of one pool at one block.
#[derive(Debug, Clone)]
pub struct PoolStateSample {
    pub pool_address: String,
    pub data: PoolStateData,
    pub block_number: u64,
    pub observed_at: Instant,
}
