pub mod evm;
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;

use crate::error::AggregatorError;
use crate::models::DexType;

/// Result of a single discovery probe against a candidate pool address.
#[derive(Debug, Clone)]
pub struct PoolProbe {
    pub token0: String,
    pub token1: String,
    pub dex_type: DexType,
    pub fee_tier: Option<u32>,
    pub sqrt_price_x96: U256,
    pub liquidity: U256,
    pub reserve0: Option<U256>,
    pub reserve1: Option<U256>,
    pub block_number: u64,
}

/// Capability for reading on-chain state, one implementation per chain.
///
/// The production implementation talks JSON-RPC through Multicall3; the
/// mock satisfies the same contract deterministically.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_name(&self) -> &str;
    fn chain_id(&self) -> u64;

    /// Number of RPC providers behind this adapter; the multicall engine
    /// spreads batches across them round-robin.
    fn provider_count(&self) -> usize;

    /// Deterministic pool address derivation: CREATE2 for Uniswap V3 when
    /// `fee_tier` is set, V2 pair derivation otherwise. `None` when either
    /// address fails to parse.
    fn compute_pool_address(
        &self,
        token_a: &str,
        token_b: &str,
        fee_tier: Option<u32>,
    ) -> Option<String>;

    /// Read one pool's full state. Used by discovery to confirm that a
    /// derived address actually holds a pool.
    async fn read_pool_state(&self, pool: &str) -> Result<PoolProbe, AggregatorError>;

    /// Multicall3 aggregate on the given provider index. Failed sub-calls
    /// surface as `None` entries; the outer result carries the block the
    /// batch executed at.
    async fn aggregate(
        &self,
        provider: usize,
        calls: Vec<(Address, Bytes)>,
    ) -> Result<(u64, Vec<Option<Bytes>>), AggregatorError>;
}

/// Adapters for all configured chains, addressable by case-insensitive
/// name or by chain id. Owned by the server and injected into the
/// scheduler, discovery, and snapshot service.
#[derive(Default)]
pub struct AdapterRegistry {
    by_name: HashMap<String, Arc<dyn ChainAdapter>>,
    by_id: HashMap<u64, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.by_name
            .insert(adapter.chain_name().to_lowercase(), adapter.clone());
        self.by_id.insert(adapter.chain_id(), adapter);
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn ChainAdapter>> {
        self.by_name.get(&name.to_lowercase()).cloned()
    }

    pub fn by_id(&self, chain_id: u64) -> Option<Arc<dyn ChainAdapter>> {
        self.by_id.get(&chain_id).cloned()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
