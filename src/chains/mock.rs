//! Deterministic in-process chain adapter. Used when a chain is configured
//! without RPC URLs and by the test suite; it satisfies the same contract
//! as the EVM adapter without any network I/O.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use dashmap::DashMap;

use super::evm::{IUniswapV2Pair, IUniswapV3Pool};
use super::{ChainAdapter, PoolProbe};
use crate::error::AggregatorError;
use crate::models::DexType;

// Fee tiers for which the mock pretends a pool exists. Other candidates
// probe as missing, so discovery exercises both outcomes.
const LIVE_FEE_TIERS: [Option<u32>; 3] = [Some(500), Some(3000), None];

pub struct MockAdapter {
    name: String,
    chain_id: u64,
    pools: DashMap<String, (Address, Address, Option<u32>)>,
    calls: AtomicU64,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            chain_id,
            pools: DashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    fn address_seed(addr: Address) -> u64 {
        let h = keccak256(addr.as_slice());
        u64::from_be_bytes(h[..8].try_into().unwrap())
    }

    /// Deterministic pool price, a little above or below 1.0.
    fn pool_price(addr: Address) -> f64 {
        0.95 + (Self::address_seed(addr) % 1000) as f64 / 10_000.0
    }

    fn sqrt_price_x96(addr: Address) -> U256 {
        let sp = Self::pool_price(addr).sqrt() * 2f64.powi(96);
        U256::from(sp as u128)
    }

    fn liquidity(addr: Address) -> U256 {
        U256::from(10u128.pow(18) + Self::address_seed(addr) as u128 % 10u128.pow(15))
    }

    fn reserves(addr: Address) -> (U256, U256) {
        let r0 = 10u128.pow(21);
        let r1 = (Self::pool_price(addr) * r0 as f64) as u128;
        (U256::from(r0), U256::from(r1))
    }

    /// The mock chain produces a new block every third aggregate call, so
    /// the block-aware skip path is exercised in local runs.
    fn current_block(&self) -> u64 {
        100 + self.calls.fetch_add(1, Ordering::SeqCst) / 3
    }

    fn encode_words(words: &[U256]) -> Bytes {
        let mut out = Vec::with_capacity(words.len() * 32);
        for w in words {
            out.extend_from_slice(&w.to_be_bytes::<32>());
        }
        Bytes::from(out)
    }

    fn answer(&self, target: Address, data: &[u8]) -> Option<Bytes> {
        let key = target.to_string().to_lowercase();
        let (t0, t1, fee) = *self.pools.get(&key)?;
        if data.len() < 4 {
            return None;
        }
        let selector: [u8; 4] = data[..4].try_into().ok()?;
        let is_v3 = fee.is_some();
        match selector {
            s if s == IUniswapV3Pool::slot0Call::SELECTOR && is_v3 => {
                let mut words = vec![U256::ZERO; 7];
                words[0] = Self::sqrt_price_x96(target);
                Some(Self::encode_words(&words))
            }
            s if s == IUniswapV3Pool::liquidityCall::SELECTOR && is_v3 => {
                Some(Self::encode_words(&[Self::liquidity(target)]))
            }
            s if s == IUniswapV2Pair::getReservesCall::SELECTOR && !is_v3 => {
                let (r0, r1) = Self::reserves(target);
                Some(Self::encode_words(&[r0, r1, U256::ZERO]))
            }
            s if s == IUniswapV3Pool::token0Call::SELECTOR => {
                Some(Self::encode_words(&[U256::from_be_slice(t0.as_slice())]))
            }
            s if s == IUniswapV3Pool::token1Call::SELECTOR => {
                Some(Self::encode_words(&[U256::from_be_slice(t1.as_slice())]))
            }
            s if s == IUniswapV3Pool::feeCall::SELECTOR && is_v3 => {
                Some(Self::encode_words(&[U256::from(fee.unwrap_or(0))]))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain_name(&self) -> &str {
        &self.name
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn provider_count(&self) -> usize {
        1
    }

    fn compute_pool_address(
        &self,
        token_a: &str,
        token_b: &str,
        fee_tier: Option<u32>,
    ) -> Option<String> {
        let a = Address::from_str(token_a.trim()).ok()?;
        let b = Address::from_str(token_b.trim()).ok()?;
        if a == b {
            return None;
        }
        let (t0, t1) = if a < b { (a, b) } else { (b, a) };
        let mut seed = Vec::with_capacity(8 + 40 + 4);
        seed.extend_from_slice(&self.chain_id.to_be_bytes());
        seed.extend_from_slice(t0.as_slice());
        seed.extend_from_slice(t1.as_slice());
        seed.extend_from_slice(&fee_tier.unwrap_or(0).to_be_bytes());
        let addr = Address::from_slice(&keccak256(&seed)[12..]);
        self.pools
            .insert(addr.to_string().to_lowercase(), (t0, t1, fee_tier));
        Some(addr.to_string())
    }

    async fn read_pool_state(&self, pool: &str) -> Result<PoolProbe, AggregatorError> {
        let key = pool.trim().to_lowercase();
        let (t0, t1, fee) = *self
            .pools
            .get(&key)
            .ok_or_else(|| AggregatorError::PoolNotFound(pool.to_string()))?;
        if !LIVE_FEE_TIERS.contains(&fee) {
            return Err(AggregatorError::PoolNotFound(pool.to_string()));
        }
        let addr = Address::from_str(&key)
            .map_err(|_| AggregatorError::InvalidAddress(pool.to_string()))?;
        let block = self.current_block();
        Ok(match fee {
            Some(fee) => PoolProbe {
                token0: t0.to_string(),
                token1: t1.to_string(),
                dex_type: DexType::V3,
                fee_tier: Some(fee),
                sqrt_price_x96: Self::sqrt_price_x96(addr),
                liquidity: Self::liquidity(addr),
                reserve0: None,
                reserve1: None,
                block_number: block,
            },
            None => {
                let (r0, r1) = Self::reserves(addr);
                PoolProbe {
                    token0: t0.to_string(),
                    token1: t1.to_string(),
                    dex_type: DexType::V2,
                    fee_tier: None,
                    sqrt_price_x96: U256::ZERO,
                    liquidity: U256::ZERO,
                    reserve0: Some(r0),
                    reserve1: Some(r1),
                    block_number: block,
                }
            }
        })
    }

    async fn aggregate(
        &self,
        _provider: usize,
        calls: Vec<(Address, Bytes)>,
    ) -> Result<(u64, Vec<Option<Bytes>>), AggregatorError> {
        let block = self.current_block();
        let data = calls
            .iter()
            .map(|(target, call_data)| self.answer(*target, call_data))
            .collect();
        Ok((block, data))
    }
}
