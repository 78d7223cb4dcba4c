use std::sync::Arc;

use crate::chains::{AdapterRegistry, ChainAdapter};
use crate::error::AggregatorError;
use crate::models::{
    ChainSnapshot, PoolMetadata, PoolRegistry, PoolStateSample, PricingRoute, SnapshotEntry, Token,
};
use crate::pricing;
use crate::services::cache::{EntryCache, StateCache};
use crate::services::controller::PoolController;
use crate::services::discovery::DiscoveryManager;
use crate::services::storage::RegistryStore;
use crate::sources::TokenCatalog;
use crate::tokens;

pub const DEFAULT_LIMIT: usize = 25;
pub const MAX_LIMIT: usize = 100;

// Cold-start placeholders, so the response keeps its shape while
// discovery and the scheduler warm up behind the scenes.
const FALLBACK_PRICE_USD: f64 = 1.0;
const FALLBACK_LIQUIDITY_USD: f64 = 500_000.0;

// Acknowledged heuristics; kept for response-contract compatibility.
const VOLUME_FACTOR: f64 = 0.15;
const MARKET_CAP_FACTOR: f64 = 10_000_000.0;

/// Joins token catalog, pool registry, and state cache into paginated
/// market snapshots, and kicks off discovery for whatever the join could
/// not price.
pub struct SnapshotService {
    adapters: Arc<AdapterRegistry>,
    store: Arc<RegistryStore>,
    controller: Arc<PoolController>,
    state_cache: Arc<StateCache>,
    entry_cache: Arc<EntryCache>,
    discovery: Arc<DiscoveryManager>,
    catalog: Arc<TokenCatalog>,
}

impl SnapshotService {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        store: Arc<RegistryStore>,
        controller: Arc<PoolController>,
        state_cache: Arc<StateCache>,
        entry_cache: Arc<EntryCache>,
        discovery: Arc<DiscoveryManager>,
        catalog: Arc<TokenCatalog>,
    ) -> Self {
        Self {
            adapters,
            store,
            controller,
            state_cache,
            entry_cache,
            discovery,
            catalog,
        }
    }

    /// Assemble the snapshot window `[offset, offset+limit)` for a chain.
    /// Transient problems never error out of here; entries degrade to
    /// synthetic placeholders instead.
    pub async fn snapshot(
        &self,
        chain: &str,
        offset: usize,
        limit: usize,
    ) -> Result<ChainSnapshot, AggregatorError> {
        let adapter = self
            .adapters
            .by_name(chain)
            .ok_or_else(|| AggregatorError::ChainNotSupported(chain.to_string()))?;
        let chain_id = adapter.chain_id();
        let chain_name = adapter.chain_name().to_lowercase();

        let all_tokens = self.catalog.tokens(chain_id);
        let limit = limit.min(MAX_LIMIT);
        let window: &[Token] = if offset >= all_tokens.len() || limit == 0 {
            &[]
        } else {
            &all_tokens[offset..(offset + limit).min(all_tokens.len())]
        };

        let registry = self.store.load(chain_id).await;
        let mut missing: Vec<Token> = Vec::new();
        let mut entries = Vec::with_capacity(window.len());
        for token in window {
            entries.push(self.entry_for(chain_id, &chain_name, token, &registry, &mut missing));
        }

        if !missing.is_empty() {
            tracing::info!(
                "{} of {} tokens on {} have no pricing route, starting discovery",
                missing.len(),
                window.len(),
                chain_name
            );
            self.discovery.clone().spawn(chain_id, missing);
        }

        Ok(ChainSnapshot {
            timestamp: chrono::Utc::now().timestamp_millis(),
            chain: chain_name,
            entries,
        })
    }

    fn entry_for(
        &self,
        chain_id: u64,
        chain_name: &str,
        token: &Token,
        registry: &PoolRegistry,
        missing: &mut Vec<Token>,
    ) -> SnapshotEntry {
        if let Some(hit) = self.entry_cache.get(chain_name, &token.address) {
            return hit;
        }

        let Some((route, pool)) = registry.best_route(&token.address) else {
            missing.push(token.clone());
            return Self::synthetic_entry(token);
        };

        // referenced by a live request: make sure the scheduler keeps it warm
        self.controller.track(chain_id, pool);

        let Some(sample) = self.state_cache.get(chain_id, &pool.address) else {
            return Self::synthetic_entry(token);
        };
        let Some((price_usd, liquidity_usd)) =
            self.price_and_liquidity(chain_id, token, route, pool, &sample, registry)
        else {
            return Self::synthetic_entry(token);
        };

        self.controller.mark_requested(chain_id, &pool.address);
        let entry = SnapshotEntry {
            token: token.into(),
            price_usd,
            liquidity_usd,
            volume_usd: liquidity_usd * VOLUME_FACTOR,
            market_cap_usd: price_usd * MARKET_CAP_FACTOR,
        };
        self.entry_cache.set(chain_name, &token.address, entry.clone());
        entry
    }

    fn price_and_liquidity(
        &self,
        chain_id: u64,
        token: &Token,
        route: &PricingRoute,
        pool: &PoolMetadata,
        sample: &PoolStateSample,
        registry: &PoolRegistry,
    ) -> Option<(f64, f64)> {
        let base_usd = self.base_usd_price(chain_id, &route.base, registry)?;
        let target_is_token0 = pool.is_token0(&token.address);
        let dec0 = self.decimals_of(chain_id, &pool.token0, token);
        let dec1 = self.decimals_of(chain_id, &pool.token1, token);

        let spot = pricing::spot_price(&sample.data, target_is_token0, dec0, dec1);
        let price_usd = spot * base_usd;

        let (price0_usd, price1_usd) = if target_is_token0 {
            (price_usd, base_usd)
        } else {
            (base_usd, price_usd)
        };
        let liquidity_usd =
            pricing::liquidity_usd(&sample.data, dec0, dec1, price0_usd, price1_usd);
        Some((price_usd, liquidity_usd))
    }

    /// USD price of the quote leg. Stables are the anchor at 1.0; a
    /// non-stable base (WETH, WMATIC) is priced through its own best
    /// stable route, if that pool has been observed.
    fn base_usd_price(&self, chain_id: u64, base: &str, registry: &PoolRegistry) -> Option<f64> {
        if tokens::is_stable(chain_id, base) {
            return Some(1.0);
        }
        let routes = registry.routes_for(base)?;
        let (_, pool) = routes
            .iter()
            .filter(|r| tokens::is_stable(chain_id, &r.base))
            .filter_map(|r| registry.pool(&r.pool).map(|m| (r, m)))
            .min_by(|(ra, ma), (rb, mb)| {
                mb.weight.cmp(&ma.weight).then_with(|| ra.pool.cmp(&rb.pool))
            })?;

        let sample = self.state_cache.get(chain_id, &pool.address)?;
        let dec0 = tokens::decimals_for(chain_id, &pool.token0).unwrap_or(18);
        let dec1 = tokens::decimals_for(chain_id, &pool.token1).unwrap_or(18);
        let spot = pricing::spot_price(&sample.data, pool.is_token0(base), dec0, dec1);
        (spot > 0.0).then_some(spot)
    }

    fn decimals_of(&self, chain_id: u64, address: &str, requested: &Token) -> u8 {
        if requested.key() == crate::models::normalize_address(address) {
            return requested.decimals;
        }
        tokens::decimals_for(chain_id, address)
            .or_else(|| self.catalog.decimals(chain_id, address))
            .unwrap_or(18)
    }

    fn synthetic_entry(token: &Token) -> SnapshotEntry {
        SnapshotEntry {
            token: token.into(),
            price_usd: FALLBACK_PRICE_USD,
            liquidity_usd: FALLBACK_LIQUIDITY_USD,
            volume_usd: FALLBACK_LIQUIDITY_USD * VOLUME_FACTOR,
            market_cap_usd: FALLBACK_PRICE_USD * MARKET_CAP_FACTOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::mock::MockAdapter;
    use crate::models::PoolStateData;
    use crate::services::controller::TierIntervals;
    use alloy_primitives::U256;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const Q96: f64 = 79228162514264337593543950336.0;

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const LINK: &str = "0x514910771AF9Ca656af840dff83E8264EcF986CA";

    struct Rig {
        service: SnapshotService,
        store: Arc<RegistryStore>,
        state_cache: Arc<StateCache>,
        discovery: Arc<DiscoveryManager>,
        _dir: TempDir,
    }

    fn rig() -> Rig {
        let dir = TempDir::new().unwrap();
        let mut adapters = AdapterRegistry::default();
        adapters.register(Arc::new(MockAdapter::new("ethereum", 1)));
        let adapters = Arc::new(adapters);

        let store = Arc::new(RegistryStore::new(dir.path()));
        let controller = Arc::new(PoolController::new(
            TierIntervals::default(),
            Duration::from_secs(5),
        ));
        let state_cache = Arc::new(StateCache::new());
        let entry_cache = Arc::new(EntryCache::new(Duration::from_secs(10)));
        let discovery = Arc::new(DiscoveryManager::new(
            adapters.clone(),
            store.clone(),
            controller.clone(),
            state_cache.clone(),
            Duration::from_secs(300),
            Duration::from_millis(0),
        ));
        let catalog = Arc::new(TokenCatalog::new(&[1], Duration::from_secs(15)));

        let service = SnapshotService::new(
            adapters,
            store.clone(),
            controller,
            state_cache.clone(),
            entry_cache,
            discovery.clone(),
            catalog,
        );
        Rig {
            service,
            store,
            state_cache,
            discovery,
            _dir: dir,
        }
    }

    fn sqrt_x96_for_raw_price(raw: f64) -> U256 {
        U256::from((raw.sqrt() * Q96) as u128)
    }

    fn v3_sample(pool: &str, raw_price: f64, block: u64) -> PoolStateSample {
        PoolStateSample {
            pool_address: pool.to_string(),
            data: PoolStateData {
                sqrt_price_x96: sqrt_x96_for_raw_price(raw_price),
                liquidity: U256::from(10u128.pow(12)),
                reserve0: None,
                reserve1: None,
            },
            block_number: block,
            observed_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() {
        let r = rig();
        let err = r.service.snapshot("solana", 0, 10).await.unwrap_err();
        assert!(matches!(err, AggregatorError::ChainNotSupported(_)));
    }

    #[tokio::test]
    async fn window_boundaries_return_empty_entries() {
        let r = rig();
        let snap = r.service.snapshot("Ethereum", 10_000, 25).await.unwrap();
        assert!(snap.entries.is_empty());
        assert_eq!(snap.chain, "ethereum");

        let snap = r.service.snapshot("ethereum", 0, 0).await.unwrap();
        assert!(snap.entries.is_empty());
    }

    #[tokio::test]
    async fn cold_start_serves_synthetic_and_triggers_discovery() {
        let r = rig();
        // WETH is first in the static ethereum list; the registry is empty
        let snap = r.service.snapshot("ethereum", 0, 1).await.unwrap();
        assert_eq!(snap.entries.len(), 1);
        let entry = &snap.entries[0];
        assert_eq!(entry.token.symbol, "WETH");
        assert_eq!(entry.price_usd, 1.0);
        assert_eq!(entry.liquidity_usd, 500_000.0);

        // the fire-and-forget discovery job fills the registry
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if !r.store.load(1).await.is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "discovery never populated registry");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let registry = r.store.load(1).await;
        assert!(registry.routes_for(WETH).map_or(0, |r| r.len()) >= 1);
    }

    async fn seed_weth_usdc(r: &Rig, raw_price: f64) -> String {
        // USDC < WETH lexicographically, so USDC is token0
        let pool = "0x00000000000000000000000000000000000000e1";
        let mut registry = PoolRegistry::default();
        registry.insert_pool(PoolMetadata::v3(
            pool.into(),
            USDC.into(),
            WETH.into(),
            500,
        ));
        r.store.save(1, &registry).await.unwrap();
        r.state_cache.insert(1, v3_sample(pool, raw_price, 100));
        pool.to_string()
    }

    #[tokio::test]
    async fn prices_token_against_stable_base() {
        let r = rig();
        // raw price 5e8 = 2000 USDC per WETH after 6/18 decimal adjustment
        seed_weth_usdc(&r, 5e8).await;

        let snap = r.service.snapshot("ethereum", 0, 5).await.unwrap();
        let weth = snap
            .entries
            .iter()
            .find(|e| e.token.symbol == "WETH")
            .unwrap();
        assert!((weth.price_usd - 2000.0).abs() / 2000.0 < 1e-3);
        assert!(weth.liquidity_usd > 0.0);
        assert!((weth.volume_usd - weth.liquidity_usd * 0.15).abs() < 1e-6);
        assert!((weth.market_cap_usd - weth.price_usd * 1e7).abs() < 1.0);
    }

    #[tokio::test]
    async fn warm_entries_are_served_from_cache() {
        let r = rig();
        let pool = seed_weth_usdc(&r, 5e8).await;

        let first = r.service.snapshot("ethereum", 0, 5).await.unwrap();
        let p1 = first
            .entries
            .iter()
            .find(|e| e.token.symbol == "WETH")
            .unwrap()
            .price_usd;

        // the pool moves, but within the entry TTL the snapshot must not
        // recompute
        r.state_cache.insert(1, v3_sample(&pool, 9e8, 101));
        let second = r.service.snapshot("ethereum", 0, 5).await.unwrap();
        let p2 = second
            .entries
            .iter()
            .find(|e| e.token.symbol == "WETH")
            .unwrap()
            .price_usd;
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn non_stable_base_is_priced_through_its_own_route() {
        let r = rig();
        seed_weth_usdc(&r, 5e8).await;

        // LINK/WETH pool; LINK < WETH so LINK is token0; raw price 0.001
        // WETH per LINK => LINK = 0.001 * 2000 = 2 USD
        let link_weth = "0x00000000000000000000000000000000000000e2";
        let mut registry = r.store.load(1).await;
        registry.insert_pool(PoolMetadata::v3(
            link_weth.into(),
            LINK.into(),
            WETH.into(),
            3000,
        ));
        r.store.save(1, &registry).await.unwrap();
        r.state_cache.insert(1, v3_sample(link_weth, 1e-3, 100));

        let snap = r.service.snapshot("ethereum", 0, 10).await.unwrap();
        let link = snap
            .entries
            .iter()
            .find(|e| e.token.symbol == "LINK")
            .unwrap();
        assert!(
            (link.price_usd - 2.0).abs() / 2.0 < 1e-3,
            "LINK priced at {}",
            link.price_usd
        );
    }

    #[tokio::test]
    async fn missing_sample_falls_back_but_keeps_shape() {
        let r = rig();
        // registry knows the pool but the cache has never seen it
        let pool = "0x00000000000000000000000000000000000000e3";
        let mut registry = PoolRegistry::default();
        registry.insert_pool(PoolMetadata::v3(pool.into(), USDC.into(), WETH.into(), 500));
        r.store.save(1, &registry).await.unwrap();

        let snap = r.service.snapshot("ethereum", 0, 1).await.unwrap();
        assert_eq!(snap.entries[0].price_usd, 1.0);
        assert_eq!(snap.entries[0].liquidity_usd, 500_000.0);
        // no discovery needed: the route exists
        assert!(r.discovery.attempted_at(1, WETH).is_none());
    }
}
