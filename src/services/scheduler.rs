use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::models::PoolStateSample;
use crate::pricing;
use crate::services::cache::StateCache;
use crate::services::controller::{AlivePool, PoolController};
use crate::services::multicall::{MulticallEngine, PoolReadResult};
use crate::services::storage::RegistryStore;

/// Periodic driver that keeps the state cache warm: every tick it gathers
/// due pools, batches them through the multicall engine per chain, and
/// feeds the results back into tiers and the cache.
///
/// Chains refresh independently and non-reentrantly: a chain still busy
/// from the previous tick is skipped, not queued.
pub struct PoolScheduler {
    controller: Arc<PoolController>,
    engine: Arc<MulticallEngine>,
    store: Arc<RegistryStore>,
    cache: Arc<StateCache>,
    period: Duration,
    started: AtomicBool,
    ticks: AtomicU64,
    chain_locks: DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
    chain_tasks: Mutex<JoinSet<()>>,
}

impl PoolScheduler {
    pub fn new(
        controller: Arc<PoolController>,
        engine: Arc<MulticallEngine>,
        store: Arc<RegistryStore>,
        cache: Arc<StateCache>,
        period: Duration,
    ) -> Self {
        Self {
            controller,
            engine,
            store,
            cache,
            period,
            started: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            chain_locks: DashMap::new(),
            chain_tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Start the tick loop. Idempotent: a second call returns `None` and
    /// changes nothing. The loop exits when `shutdown` flips, then lets
    /// in-flight chain refreshes drain for up to 10 s.
    pub fn start(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("scheduler already running, ignoring start");
            return None;
        }
        let this = self;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::tick(&this).await,
                    _ = shutdown.changed() => break,
                }
            }
            this.drain(Duration::from_secs(10)).await;
            tracing::info!("scheduler stopped");
        }))
    }

    async fn tick(this: &Arc<Self>) {
        this.ticks.fetch_add(1, Ordering::Relaxed);
        let due = this.controller.pools_due(Instant::now());
        if due.is_empty() {
            return;
        }

        let mut by_chain: BTreeMap<u64, Vec<AlivePool>> = BTreeMap::new();
        for pool in due {
            by_chain.entry(pool.chain_id).or_default().push(pool);
        }

        for (chain_id, pools) in by_chain {
            let lock = this.chain_locks.entry(chain_id).or_default().clone();
            let Ok(guard) = lock.try_lock_owned() else {
                tracing::debug!("chain {} still refreshing, skipping this tick", chain_id);
                continue;
            };
            let task_self = Arc::clone(this);
            let mut tasks = this.chain_tasks.lock().unwrap();
            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                let _guard = guard;
                task_self.refresh_chain(chain_id, pools).await;
            });
        }
    }

    async fn drain(&self, grace: Duration) {
        let mut tasks = std::mem::take(&mut *self.chain_tasks.lock().unwrap());
        let _ = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
    }

    /// One chain's refresh round: load the registry, batch, execute, and
    /// apply each result. Never propagates an error; the next tick retries.
    async fn refresh_chain(&self, chain_id: u64, due: Vec<AlivePool>) {
        let registry = self.store.load(chain_id).await;
        let batches = self.engine.create_batches(chain_id, &due, &registry);
        if batches.is_empty() {
            return;
        }
        let batch_count = batches.len();
        let results = self.engine.execute_batches(batches).await;
        let refreshed = results.iter().filter(|r| r.success).count();

        let last_blocks: HashMap<&str, u64> = due
            .iter()
            .map(|p| (p.address.as_str(), p.last_block_seen))
            .collect();
        for result in results {
            self.apply_result(chain_id, &last_blocks, result);
        }
        tracing::debug!(
            "chain {}: refreshed {}/{} pools in {} batches",
            chain_id,
            refreshed,
            due.len(),
            batch_count
        );
    }

    fn apply_result(
        &self,
        chain_id: u64,
        last_blocks: &HashMap<&str, u64>,
        result: PoolReadResult,
    ) {
        if !result.success {
            self.controller.record_failure(chain_id, &result.pool_address);
            return;
        }

        let last_block = last_blocks
            .get(result.pool_address.as_str())
            .copied()
            .unwrap_or(0);
        if result.block_number != 0 && result.block_number == last_block {
            // block-aware skip: the chain has not advanced, the sample we
            // hold is still current; no pricing, no tier movement
            self.controller
                .record_refresh(chain_id, &result.pool_address, None);
            return;
        }

        let Some(data) = result.data else {
            self.controller.record_failure(chain_id, &result.pool_address);
            return;
        };

        let price = pricing::tier_price_scalar(&data);
        if price > 0.0 {
            self.controller
                .update_tier(chain_id, &result.pool_address, price);
            self.controller
                .record_price(chain_id, &result.pool_address, price, result.block_number);
        } else {
            // empty pool: remember the block but leave the tier alone
            self.controller
                .record_refresh(chain_id, &result.pool_address, Some(result.block_number));
        }

        self.cache.insert(
            chain_id,
            PoolStateSample {
                pool_address: result.pool_address,
                data,
                block_number: result.block_number,
                observed_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{AdapterRegistry, ChainAdapter, PoolProbe};
    use crate::error::AggregatorError;
    use crate::models::{PoolMetadata, PoolRegistry};
    use crate::services::controller::{Tier, TierIntervals};
    use alloy_primitives::{Address, Bytes, U256};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;
    use tempfile::TempDir;

    /// Scriptable chain: fixed block and sqrt price, settable between
    /// refreshes. Answers slot0/liquidity for any target.
    struct ScriptedAdapter {
        block: AtomicU64,
        price: std::sync::Mutex<f64>,
        fail: AtomicBool,
    }

    impl ScriptedAdapter {
        fn new(block: u64, price: f64) -> Self {
            Self {
                block: AtomicU64::new(block),
                price: std::sync::Mutex::new(price),
                fail: AtomicBool::new(false),
            }
        }

        fn sqrt_price_word(price: f64) -> U256 {
            U256::from((price.sqrt() * 2f64.powi(96)) as u128)
        }

        fn encode_words(words: &[U256]) -> Bytes {
            let mut out = Vec::new();
            for w in words {
                out.extend_from_slice(&w.to_be_bytes::<32>());
            }
            Bytes::from(out)
        }
    }

    #[async_trait]
    impl ChainAdapter for ScriptedAdapter {
        fn chain_name(&self) -> &str {
            "ethereum"
        }
        fn chain_id(&self) -> u64 {
            1
        }
        fn provider_count(&self) -> usize {
            1
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
            calls: Vec<(Address, Bytes)>,
        ) -> Result<(u64, Vec<Option<Bytes>>), AggregatorError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AggregatorError::Rpc("scripted outage".into()));
            }
            let price = *self.price.lock().unwrap();
            let data = calls
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    if i % 2 == 0 {
                        // slot0
                        let mut words = vec![U256::ZERO; 7];
                        words[0] = Self::sqrt_price_word(price);
                        Some(Self::encode_words(&words))
                    } else {
                        // liquidity
                        Some(Self::encode_words(&[U256::from(1_000_000u64)]))
                    }
                })
                .collect();
            Ok((self.block.load(Ordering::SeqCst), data))
        }
    }

    struct Rig {
        scheduler: Arc<PoolScheduler>,
        controller: Arc<PoolController>,
        cache: Arc<StateCache>,
        adapter: Arc<ScriptedAdapter>,
        _dir: TempDir,
    }

    const POOL: &str = "0x00000000000000000000000000000000000000a1";

    async fn rig(block: u64, price: f64) -> Rig {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(block, price));
        let mut adapters = AdapterRegistry::default();
        adapters.register(adapter.clone());
        let adapters = Arc::new(adapters);

        let controller = Arc::new(PoolController::new(
            TierIntervals::default(),
            Duration::from_secs(5),
        ));
        let cache = Arc::new(StateCache::new());
        let store = Arc::new(RegistryStore::new(dir.path()));

        let meta = PoolMetadata::v3(POOL.into(), "0xa".into(), "0xb".into(), 3000);
        let mut registry = PoolRegistry::default();
        registry.insert_pool(meta.clone());
        store.save(1, &registry).await.unwrap();
        controller.track(1, &meta);

        let engine = Arc::new(MulticallEngine::new(adapters, 200));
        let scheduler = Arc::new(PoolScheduler::new(
            controller.clone(),
            engine,
            store,
            cache.clone(),
            Duration::from_secs(10),
        ));
        Rig {
            scheduler,
            controller,
            cache,
            adapter,
            _dir: dir,
        }
    }

    async fn refresh_once(r: &Rig) {
        let due = vec![r.controller.get(1, POOL).unwrap()];
        r.scheduler.refresh_chain(1, due).await;
    }

    #[tokio::test]
    async fn refresh_updates_cache_and_price() {
        let r = rig(100, 4.0).await;
        refresh_once(&r).await;

        let pool = r.controller.get(1, POOL).unwrap();
        assert_eq!(pool.last_block_seen, 100);
        assert!((pool.last_price - 4.0).abs() < 1e-6);
        let sample = r.cache.get(1, POOL).unwrap();
        assert_eq!(sample.block_number, 100);
    }

    #[tokio::test]
    async fn same_block_suppresses_recompute() {
        let r = rig(100, 4.0).await;
        refresh_once(&r).await;
        let first = r.controller.get(1, POOL).unwrap();

        // price moves wildly but the block did not advance: nothing sticks
        *r.adapter.price.lock().unwrap() = 8.0;
        refresh_once(&r).await;

        let second = r.controller.get(1, POOL).unwrap();
        assert_eq!(second.tier, first.tier);
        assert!((second.last_price - first.last_price).abs() < 1e-9);
        assert_eq!(second.last_block_seen, 100);
        assert!(second.next_refresh > first.next_refresh);
        // cache still holds the original observation
        let sample = r.cache.get(1, POOL).unwrap();
        assert!((pricing::tier_price_scalar(&sample.data) - 4.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn one_percent_move_across_blocks_promotes() {
        let r = rig(100, 100.0).await;
        refresh_once(&r).await;

        *r.adapter.price.lock().unwrap() = 101.0;
        r.adapter.block.store(101, Ordering::SeqCst);
        refresh_once(&r).await;

        let pool = r.controller.get(1, POOL).unwrap();
        assert_eq!(pool.tier, Tier::High);
        assert!(pool.next_refresh <= Instant::now() + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn outage_schedules_fast_retry_and_keeps_tier() {
        let r = rig(100, 4.0).await;
        refresh_once(&r).await;
        let before = r.controller.get(1, POOL).unwrap();

        r.adapter.fail.store(true, Ordering::SeqCst);
        r.adapter.block.store(101, Ordering::SeqCst);
        refresh_once(&r).await;

        let after = r.controller.get(1, POOL).unwrap();
        assert_eq!(after.tier, before.tier);
        assert!((after.last_price - before.last_price).abs() < 1e-9);
        assert!(after.next_refresh <= Instant::now() + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_price_pool_neither_crashes_nor_moves_tier() {
        let r = rig(100, 0.0).await;
        refresh_once(&r).await;

        let pool = r.controller.get(1, POOL).unwrap();
        assert_eq!(pool.tier, Tier::Normal);
        assert_eq!(pool.last_price, 0.0);
        assert_eq!(pool.last_block_seen, 100);
        // the observation still lands in the cache
        assert!(r.cache.get(1, POOL).is_some());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let r = rig(100, 4.0).await;
        let (_tx, rx) = watch::channel(false);
        let first = r.scheduler.clone().start(rx.clone());
        assert!(first.is_some());
        assert!(r.scheduler.clone().start(rx).is_none());
        first.unwrap().abort();
    }
}
