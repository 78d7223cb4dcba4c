use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinSet;

use crate::chains::{AdapterRegistry, ChainAdapter, PoolProbe};
use crate::error::AggregatorError;
use crate::models::{DexType, PoolMetadata, PoolStateData, PoolStateSample, Token};
use crate::services::cache::StateCache;
use crate::services::controller::PoolController;
use crate::services::storage::RegistryStore;
use crate::tokens;

/// V3 fee tiers probed per base token, in hundredths of a basis point.
const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

/// Fills registry gaps on demand: for a token with no pricing route, probe
/// the (base token x fee tier) product of derived pool addresses, verify
/// each candidate on-chain, and persist what sticks.
///
/// A per-(chain, token) attempt gate bounds probe load: once a token has
/// been attempted, it is not attempted again inside the retry window,
/// successful or not. The gate also serializes concurrent discovery of the
/// same token; callers for disjoint tokens proceed independently.
pub struct DiscoveryManager {
    adapters: Arc<AdapterRegistry>,
    store: Arc<RegistryStore>,
    controller: Arc<PoolController>,
    state_cache: Arc<StateCache>,
    attempts: DashMap<(u64, String), Instant>,
    retry_window: Duration,
    probe_delay: Duration,
    jobs: Mutex<JoinSet<()>>,
}

impl DiscoveryManager {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        store: Arc<RegistryStore>,
        controller: Arc<PoolController>,
        state_cache: Arc<StateCache>,
        retry_window: Duration,
        probe_delay: Duration,
    ) -> Self {
        Self {
            adapters,
            store,
            controller,
            state_cache,
            attempts: DashMap::new(),
            retry_window,
            probe_delay,
            jobs: Mutex::new(JoinSet::new()),
        }
    }

    /// Check-and-arm the attempt gate. Atomic per key: of two concurrent
    /// callers, exactly one wins the probe.
    fn arm_attempt(&self, chain_id: u64, token_key: &str) -> bool {
        match self.attempts.entry((chain_id, token_key.to_string())) {
            Entry::Occupied(mut e) => {
                if e.get().elapsed() < self.retry_window {
                    false
                } else {
                    e.insert(Instant::now());
                    true
                }
            }
            Entry::Vacant(v) => {
                v.insert(Instant::now());
                true
            }
        }
    }

    /// When this token was last attempted on this chain, if ever.
    pub fn attempted_at(&self, chain_id: u64, token: &str) -> Option<Instant> {
        self.attempts
            .get(&(chain_id, token.to_lowercase()))
            .map(|e| *e)
    }

    /// Discover pools for a batch of tokens. Returns the number of pools
    /// newly added to the registry.
    pub async fn discover_tokens(&self, chain_id: u64, targets: Vec<Token>) -> usize {
        let Some(adapter) = self.adapters.by_id(chain_id) else {
            tracing::warn!("discovery requested for unknown chain {}", chain_id);
            return 0;
        };
        let bases = tokens::base_tokens(chain_id);
        let mut total_found = 0;

        for target in targets {
            let key = target.key();
            if !self.arm_attempt(chain_id, &key) {
                tracing::debug!(
                    "discovery for {} on chain {} inside retry window, skipping",
                    target.symbol,
                    chain_id
                );
                continue;
            }

            let mut registry = self.store.load(chain_id).await;
            let mut found = 0;

            for base in &bases {
                if base.key() == key {
                    continue;
                }
                // the four V3 tiers, then the V2 pair
                let candidates = FEE_TIERS.iter().map(|f| Some(*f)).chain([None]);
                for fee in candidates {
                    let Some(addr) =
                        adapter.compute_pool_address(&target.address, &base.address, fee)
                    else {
                        continue;
                    };
                    if let Some(known) = registry.pool(&addr) {
                        // already in the registry from an earlier run; just
                        // make sure it is being refreshed
                        self.controller.track(chain_id, known);
                        continue;
                    }

                    match adapter.read_pool_state(&addr).await {
                        Ok(probe) => {
                            let meta = match (probe.dex_type, probe.fee_tier) {
                                (DexType::V3, Some(fee)) => PoolMetadata::v3(
                                    addr.clone(),
                                    probe.token0.clone(),
                                    probe.token1.clone(),
                                    fee,
                                ),
                                (DexType::V2, _) => PoolMetadata::v2(
                                    addr.clone(),
                                    probe.token0.clone(),
                                    probe.token1.clone(),
                                ),
                                (DexType::V3, None) => continue,
                            };
                            tracing::debug!(
                                "discovered {:?} pool {} for {}/{}",
                                meta.dex_type,
                                addr,
                                target.symbol,
                                base.symbol
                            );
                            registry.insert_pool(meta.clone());
                            self.controller.track(chain_id, &meta);
                            // the probe already read full state, so the pool
                            // is priceable before its first scheduled refresh
                            self.state_cache.insert(chain_id, Self::sample_from(&addr, probe));
                            found += 1;
                        }
                        Err(AggregatorError::PoolNotFound(_)) => {}
                        Err(e) => {
                            tracing::debug!("probe of {} failed: {}", addr, e);
                        }
                    }
                    tokio::time::sleep(self.probe_delay).await;
                }
            }

            if found > 0 {
                if let Err(e) = self.store.save(chain_id, &registry).await {
                    tracing::warn!("could not persist registry for chain {}: {}", chain_id, e);
                }
            }
            tracing::info!(
                "discovery for {} on chain {}: {} pools",
                target.symbol,
                chain_id,
                found
            );
            total_found += found;
        }
        total_found
    }

    /// Fire-and-forget discovery. The handle is retained so shutdown can
    /// cancel in-flight jobs instead of leaking them.
    pub fn spawn(self: Arc<Self>, chain_id: u64, targets: Vec<Token>) {
        if targets.is_empty() {
            return;
        }
        let this = Arc::clone(&self);
        let mut jobs = self.jobs.lock().unwrap();
        // reap anything already finished
        while jobs.try_join_next().is_some() {}
        jobs.spawn(async move {
            this.discover_tokens(chain_id, targets).await;
        });
    }

    pub fn shutdown(&self) {
        self.jobs.lock().unwrap().abort_all();
    }

    fn sample_from(address: &str, probe: PoolProbe) -> PoolStateSample {
        PoolStateSample {
            pool_address: address.to_string(),
            data: PoolStateData {
                sqrt_price_x96: probe.sqrt_price_x96,
                liquidity: probe.liquidity,
                reserve0: probe.reserve0,
                reserve1: probe.reserve1,
            },
            block_number: probe.block_number,
            observed_at: Instant::now(),
        }
    }
}
