use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{normalize_address, PoolMetadata};

/// Refresh-rate class of an alive pool, driven by recent price movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    High,
    Normal,
    Low,
}

impl Tier {
    /// One step toward `Low`; never skips a level.
    fn demoted(self) -> Tier {
        match self {
            Tier::High => Tier::Normal,
            Tier::Normal | Tier::Low => Tier::Low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierIntervals {
    pub high: Duration,
    pub normal: Duration,
    pub low: Duration,
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self {
            high: Duration::from_secs(5),
            normal: Duration::from_secs(10),
            low: Duration::from_secs(30),
        }
    }
}

impl TierIntervals {
    pub fn interval(&self, tier: Tier) -> Duration {
        match tier {
            Tier::High => self.high,
            Tier::Normal => self.normal,
            Tier::Low => self.low,
        }
    }
}

/// In-memory tracking state for one pool being kept fresh. Volatile;
/// rebuilt from the persisted registry after a restart.
#[derive(Debug, Clone)]
pub struct AlivePool {
    pub address: String,
    pub chain_id: u64,
    pub tier: Tier,
    pub next_refresh: Instant,
    pub last_block_seen: u64,
    pub last_price: f64,
    pub request_count: u64,
    pub last_request_time: Option<Instant>,
}

// Relative price deltas steering tier transitions.
const PROMOTE_DELTA: f64 = 0.005;
const DEMOTE_DELTA: f64 = 0.001;
const PRICE_EPSILON: f64 = 1e-12;

/// The alive set. A single mutex with short, I/O-free critical sections;
/// owned by the server and shared with the scheduler, discovery, and the
/// snapshot service.
pub struct PoolController {
    pools: Mutex<HashMap<(u64, String), AlivePool>>,
    intervals: TierIntervals,
    failure_retry: Duration,
}

impl PoolController {
    pub fn new(intervals: TierIntervals, failure_retry: Duration) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            intervals,
            failure_retry,
        }
    }

    /// Idempotent insertion. A pool already alive is left untouched,
    /// including its `next_refresh`.
    pub fn track(&self, chain_id: u64, meta: &PoolMetadata) {
        let key = (chain_id, meta.key());
        let mut pools = self.pools.lock().unwrap();
        pools.entry(key).or_insert_with(|| AlivePool {
            address: meta.key(),
            chain_id,
            tier: Tier::Normal,
            next_refresh: Instant::now() + self.intervals.normal,
            last_block_seen: 0,
            last_price: 0.0,
            request_count: 0,
            last_request_time: None,
        });
    }

    /// All pools whose refresh is due, sorted by (chain, lowercase address)
    /// so downstream batching is deterministic.
    pub fn pools_due(&self, now: Instant) -> Vec<AlivePool> {
        let pools = self.pools.lock().unwrap();
        let mut due: Vec<AlivePool> = pools
            .values()
            .filter(|p| p.next_refresh <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| (a.chain_id, &a.address).cmp(&(b.chain_id, &b.address)));
        due
    }

    /// Re-tier a pool from a fresh price observation and schedule its next
    /// refresh. `last_price` itself is updated separately by the scheduler
    /// via [`record_price`](Self::record_price).
    pub fn update_tier(&self, chain_id: u64, pool: &str, new_price: f64) -> Option<Tier> {
        let mut pools = self.pools.lock().unwrap();
        let p = pools.get_mut(&(chain_id, normalize_address(pool)))?;
        let delta = (new_price - p.last_price).abs() / p.last_price.max(PRICE_EPSILON);
        p.tier = if delta >= PROMOTE_DELTA {
            Tier::High
        } else if delta >= DEMOTE_DELTA {
            Tier::Normal
        } else {
            p.tier.demoted()
        };
        p.next_refresh = Instant::now() + self.intervals.interval(p.tier);
        Some(p.tier)
    }

    pub fn record_price(&self, chain_id: u64, pool: &str, price: f64, block: u64) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(p) = pools.get_mut(&(chain_id, normalize_address(pool))) {
            p.last_price = price;
            p.last_block_seen = block;
        }
    }

    /// Advance a pool past a refresh that produced no new price (block
    /// unchanged, or a pool reporting a zero price). Tier is untouched.
    pub fn record_refresh(&self, chain_id: u64, pool: &str, block: Option<u64>) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(p) = pools.get_mut(&(chain_id, normalize_address(pool))) {
            p.next_refresh = Instant::now() + self.intervals.interval(p.tier);
            if let Some(block) = block {
                p.last_block_seen = block;
            }
        }
    }

    /// Fast retry after a failed read; tier unchanged.
    pub fn record_failure(&self, chain_id: u64, pool: &str) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(p) = pools.get_mut(&(chain_id, normalize_address(pool))) {
            p.next_refresh = Instant::now() + self.failure_retry;
        }
    }

    /// Called when a snapshot request reads through this pool.
    pub fn mark_requested(&self, chain_id: u64, pool: &str) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(p) = pools.get_mut(&(chain_id, normalize_address(pool))) {
            p.request_count += 1;
            p.last_request_time = Some(Instant::now());
        }
    }

    pub fn get(&self, chain_id: u64, pool: &str) -> Option<AlivePool> {
        self.pools
            .lock()
            .unwrap()
            .get(&(chain_id, normalize_address(pool)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}
