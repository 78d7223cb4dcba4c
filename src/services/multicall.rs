use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use futures::future::join_all;

use crate::chains::evm::{IUniswapV2Pair, IUniswapV3Pool};
use crate::chains::{AdapterRegistry, ChainAdapter};
use crate::models::{DexType, PoolRegistry, PoolStateData};
use crate::services::controller::AlivePool;

/// One pool's share of a batch: its decoded identity plus the raw
/// sub-calls it contributes.
#[derive(Debug, Clone)]
pub struct PoolCall {
    pub address: String,
    pub dex_type: DexType,
    subcalls: Vec<(Address, Bytes)>,
}

/// A weight-bounded group of sub-calls destined for one aggregate call.
#[derive(Debug, Clone)]
pub struct Batch {
    pub chain_id: u64,
    pub pools: Vec<PoolCall>,
    pub total_weight: u32,
}

impl Batch {
    fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            pools: Vec::new(),
            total_weight: 0,
        }
    }
}

/// Outcome of reading one pool in a batch.
#[derive(Debug, Clone)]
pub struct PoolReadResult {
    pub pool_address: String,
    pub success: bool,
    pub block_number: u64,
    pub data: Option<PoolStateData>,
}

impl PoolReadResult {
    fn failed(pool_address: String, block_number: u64) -> Self {
        Self {
            pool_address,
            success: false,
            block_number,
            data: None,
        }
    }
}

/// Coalesces per-pool reads into chain-level multicall round-trips.
///
/// V3 pools cost two sub-calls (slot0 + liquidity, weight 2), V2 one
/// (getReserves, weight 1). Batches stay under `max_batch_weight` and are
/// spread round-robin across the chain's providers.
pub struct MulticallEngine {
    adapters: Arc<AdapterRegistry>,
    max_batch_weight: u32,
}

impl MulticallEngine {
    pub fn new(adapters: Arc<AdapterRegistry>, max_batch_weight: u32) -> Self {
        Self {
            adapters,
            max_batch_weight: max_batch_weight.max(1),
        }
    }

    /// Pack due pools into weight-bounded batches, preserving the given
    /// pool order. Pools missing from the registry or carrying an
    /// unparsable address are dropped here, never sent to the chain.
    pub fn create_batches(
        &self,
        chain_id: u64,
        due: &[AlivePool],
        registry: &PoolRegistry,
    ) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current = Batch::new(chain_id);

        for pool in due.iter().filter(|p| p.chain_id == chain_id) {
            let Some(meta) = registry.pool(&pool.address) else {
                tracing::debug!("pool {} not in registry, skipping", pool.address);
                continue;
            };
            let Ok(target) = Address::from_str(&meta.address) else {
                tracing::warn!("invalid pool address {} filtered from batch", meta.address);
                continue;
            };
            let subcalls = match meta.dex_type {
                DexType::V3 => vec![
                    (target, Bytes::from(IUniswapV3Pool::slot0Call {}.abi_encode())),
                    (
                        target,
                        Bytes::from(IUniswapV3Pool::liquidityCall {}.abi_encode()),
                    ),
                ],
                DexType::V2 => vec![(
                    target,
                    Bytes::from(IUniswapV2Pair::getReservesCall {}.abi_encode()),
                )],
            };

            if !current.pools.is_empty() && current.total_weight + meta.weight > self.max_batch_weight
            {
                batches.push(std::mem::replace(&mut current, Batch::new(chain_id)));
            }
            current.total_weight += meta.weight;
            current.pools.push(PoolCall {
                address: meta.key(),
                dex_type: meta.dex_type,
                subcalls,
            });
        }

        if !current.pools.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Execute all batches concurrently, batch `i` on provider
    /// `i % provider_count`. Results preserve pool-input order; a failed
    /// aggregate fails only its own batch.
    pub async fn execute_batches(&self, batches: Vec<Batch>) -> Vec<PoolReadResult> {
        let Some(first) = batches.first() else {
            return Vec::new();
        };
        let Some(adapter) = self.adapters.by_id(first.chain_id) else {
            tracing::warn!("no adapter for chain {}", first.chain_id);
            return batches
                .iter()
                .flat_map(|b| b.pools.iter())
                .map(|p| PoolReadResult::failed(p.address.clone(), 0))
                .collect();
        };
        let providers = adapter.provider_count().max(1);

        let futures = batches.into_iter().enumerate().map(|(i, batch)| {
            let adapter = adapter.clone();
            async move { Self::run_batch(adapter, i % providers, batch).await }
        });
        join_all(futures).await.into_iter().flatten().collect()
    }

    async fn run_batch(
        adapter: Arc<dyn ChainAdapter>,
        provider: usize,
        batch: Batch,
    ) -> Vec<PoolReadResult> {
        let calls: Vec<(Address, Bytes)> = batch
            .pools
            .iter()
            .flat_map(|p| p.subcalls.iter().cloned())
            .collect();

        let (block, returns) = match adapter.aggregate(provider, calls).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(
                    "aggregate failed on chain {} ({} pools): {}",
                    batch.chain_id,
                    batch.pools.len(),
                    e
                );
                return batch
                    .pools
                    .into_iter()
                    .map(|p| PoolReadResult::failed(p.address, 0))
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(batch.pools.len());
        let mut offset = 0;
        for pool in batch.pools {
            let count = pool.subcalls.len();
            let slice = returns.get(offset..offset + count);
            offset += count;
            results.push(Self::decode_pool(pool, block, slice));
        }
        results
    }

    fn decode_pool(
        pool: PoolCall,
        block: u64,
        returns: Option<&[Option<Bytes>]>,
    ) -> PoolReadResult {
        let Some(returns) = returns else {
            return PoolReadResult::failed(pool.address, block);
        };
        let data = match pool.dex_type {
            DexType::V3 => Self::decode_v3(returns),
            DexType::V2 => Self::decode_v2(returns),
        };
        match data {
            Some(data) => PoolReadResult {
                pool_address: pool.address,
                success: true,
                block_number: block,
                data: Some(data),
            },
            None => PoolReadResult::failed(pool.address, block),
        }
    }

    fn decode_v3(returns: &[Option<Bytes>]) -> Option<PoolStateData> {
        let [Some(slot0), Some(liquidity)] = returns else {
            return None;
        };
        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(slot0).ok()?;
        let liquidity = IUniswapV3Pool::liquidityCall::abi_decode_returns(liquidity).ok()?;
        Some(PoolStateData {
            sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
            liquidity: U256::from(liquidity),
            reserve0: None,
            reserve1: None,
        })
    }

    fn decode_v2(returns: &[Option<Bytes>]) -> Option<PoolStateData> {
        let [Some(reserves)] = returns else {
            return None;
        };
        let reserves = IUniswapV2Pair::getReservesCall::abi_decode_returns(reserves).ok()?;
        Some(PoolStateData {
            sqrt_price_x96: U256::ZERO,
            liquidity: U256::ZERO,
            reserve0: Some(U256::from(reserves.reserve0)),
            reserve1: Some(U256::from(reserves.reserve1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::mock::MockAdapter;
    use crate::chains::PoolProbe;
    use crate::error::AggregatorError;
    use crate::models::PoolMetadata;
    use crate::services::controller::{PoolController, TierIntervals};
    use async_trait::async_trait;
    use std::time::Duration;

    fn alive(chain_id: u64, addr: &str) -> AlivePool {
        let c = PoolController::new(TierIntervals::default(), Duration::from_secs(5));
        c.track(
            chain_id,
            &PoolMetadata::v3(addr.into(), "0xa".into(), "0xb".into(), 3000),
        );
        c.get(chain_id, addr).unwrap()
    }

    fn registry_of(pools: &[PoolMetadata]) -> PoolRegistry {
        let mut reg = PoolRegistry::default();
        for p in pools {
            reg.insert_pool(p.clone());
        }
        reg
    }

    fn v3(addr: &str) -> PoolMetadata {
        PoolMetadata::v3(addr.into(), "0xa".into(), "0xb".into(), 3000)
    }

    fn v2(addr: &str) -> PoolMetadata {
        PoolMetadata::v2(addr.into(), "0xa".into(), "0xb".into())
    }

    fn engine_with(adapter: Arc<dyn ChainAdapter>, max_weight: u32) -> MulticallEngine {
        let mut adapters = AdapterRegistry::default();
        adapters.register(adapter);
        MulticallEngine::new(Arc::new(adapters), max_weight)
    }

    fn addr(n: u8) -> String {
        format!("0x{:040x}", n)
    }

    #[test]
    fn batches_respect_weight_bound() {
        let engine = engine_with(Arc::new(MockAdapter::new("ethereum", 1)), 4);
        let metas: Vec<PoolMetadata> = (1..=5).map(|i| v3(&addr(i))).collect();
        let registry = registry_of(&metas);
        let due: Vec<AlivePool> = metas.iter().map(|m| alive(1, &m.address)).collect();

        let batches = engine.create_batches(1, &due, &registry);
        // five v3 pools of weight 2 under a cap of 4 => 2 + 2 + 1
        assert_eq!(batches.len(), 3);
        for b in &batches {
            assert!(b.total_weight <= 4);
        }
        assert_eq!(batches[2].pools.len(), 1);
        // input order preserved across batches
        let flat: Vec<&str> = batches
            .iter()
            .flat_map(|b| b.pools.iter().map(|p| p.address.as_str()))
            .collect();
        let expect: Vec<String> = (1..=5).map(addr).collect();
        assert_eq!(flat, expect.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    }

    #[test]
    fn single_pool_heavier_than_cap_gets_own_batch() {
        let engine = engine_with(Arc::new(MockAdapter::new("ethereum", 1)), 1);
        let meta = v3(&addr(1));
        let registry = registry_of(std::slice::from_ref(&meta));
        let due = vec![alive(1, &meta.address)];
        let batches = engine.create_batches(1, &due, &registry);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_weight, 2);
    }

    #[test]
    fn mixed_weights_pack_greedily() {
        let engine = engine_with(Arc::new(MockAdapter::new("ethereum", 1)), 3);
        let metas = vec![v3(&addr(1)), v2(&addr(2)), v3(&addr(3))];
        let registry = registry_of(&metas);
        let due: Vec<AlivePool> = metas.iter().map(|m| alive(1, &m.address)).collect();
        let batches = engine.create_batches(1, &due, &registry);
        // 2 + 1 fills the first batch, the second v3 spills over
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].total_weight, 3);
        assert_eq!(batches[1].total_weight, 2);
    }

    #[test]
    fn unknown_pools_are_filtered() {
        let engine = engine_with(Arc::new(MockAdapter::new("ethereum", 1)), 10);
        let registry = PoolRegistry::default();
        let due = vec![alive(1, &addr(9))];
        assert!(engine.create_batches(1, &due, &registry).is_empty());
    }

    #[tokio::test]
    async fn executes_against_mock_chain() {
        let mock = Arc::new(MockAdapter::new("ethereum", 1));
        let usdc = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
        let weth = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
        let pool_addr = mock.compute_pool_address(usdc, weth, Some(500)).unwrap();

        let meta = PoolMetadata::v3(pool_addr.clone(), usdc.into(), weth.into(), 500);
        let registry = registry_of(std::slice::from_ref(&meta));
        let due = vec![alive(1, &pool_addr)];

        let engine = engine_with(mock, 200);
        let batches = engine.create_batches(1, &due, &registry);
        let results = engine.execute_batches(batches).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let data = results[0].data.as_ref().unwrap();
        assert!(data.sqrt_price_x96 > U256::ZERO);
    }

    /// Adapter whose aggregate always errors, for the batch-failure path.
    struct DownAdapter;

    #[async_trait]
    impl ChainAdapter for DownAdapter {
        fn chain_name(&self) -> &str {
            "ethereum"
        }
        fn chain_id(&self) -> u64 {
            1
        }
        fn provider_count(&self) -> usize {
            2
        }
        fn compute_pool_address(&self, _: &str, _: &str, _: Option<u32>) -> Option<String> {
            None
        }
        async fn read_pool_state(&self, pool: &str) -> Result<PoolProbe, AggregatorError> {
            Err(AggregatorError::PoolNotFound(pool.into()))
        }
        async fn aggregate(
            &self,
            _provider: usize,
            _calls: Vec<(Address, Bytes)>,
        ) -> Result<(u64, Vec<Option<Bytes>>), AggregatorError> {
            Err(AggregatorError::Rpc("provider down".into()))
        }
    }

    #[tokio::test]
    async fn failed_aggregate_fails_every_pool_in_batch() {
        let engine = engine_with(Arc::new(DownAdapter), 200);
        let metas = vec![v3(&addr(1)), v2(&addr(2))];
        let registry = registry_of(&metas);
        let due: Vec<AlivePool> = metas.iter().map(|m| alive(1, &m.address)).collect();

        let batches = engine.create_batches(1, &due, &registry);
        let results = engine.execute_batches(batches).await;
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(!r.success);
            assert_eq!(r.block_number, 0);
            assert!(r.data.is_none());
        }
    }

    #[tokio::test]
    async fn empty_subcall_fails_only_owner() {
        // the mock answers only for pools it derived itself; a stranger
        // pool in the same batch produces empty return data
        let mock = Arc::new(MockAdapter::new("ethereum", 1));
        let usdc = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
        let weth = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
        let known = mock.compute_pool_address(usdc, weth, Some(500)).unwrap();
        let stranger = addr(0x77);

        let metas = vec![
            PoolMetadata::v3(known.clone(), usdc.into(), weth.into(), 500),
            v3(&stranger),
        ];
        let registry = registry_of(&metas);
        let due: Vec<AlivePool> = metas.iter().map(|m| alive(1, &m.address)).collect();

        let engine = engine_with(mock, 200);
        let results = engine
            .execute_batches(engine.create_batches(1, &due, &registry))
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
    }
}
