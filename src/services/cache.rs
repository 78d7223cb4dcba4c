use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::{normalize_address, PoolStateSample, SnapshotEntry};

/// Last observed state per pool, keyed by `(chain_id, lowercase address)`.
///
/// Last-writer-wins and unbounded: the alive set is the working set and
/// there is no eviction path. Staleness is the consumer's call, not ours.
pub struct StateCache {
    samples: DashMap<(u64, String), PoolStateSample>,
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            samples: DashMap::new(),
        }
    }

    pub fn get(&self, chain_id: u64, pool: &str) -> Option<PoolStateSample> {
        self.samples
            .get(&(chain_id, normalize_address(pool)))
            .map(|e| e.clone())
    }

    pub fn insert(&self, chain_id: u64, sample: PoolStateSample) {
        let key = (chain_id, normalize_address(&sample.pool_address));
        self.samples.insert(key, sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

struct TimedEntry {
    entry: SnapshotEntry,
    inserted_at: Instant,
}

/// Assembled snapshot entries, keyed by `(chain, lowercase token)`, with a
/// short TTL so repeated page requests inside the freshness window skip
/// recomputation entirely.
pub struct EntryCache {
    cache: DashMap<(String, String), TimedEntry>,
    ttl: Duration,
}

impl EntryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, chain: &str, token: &str) -> Option<SnapshotEntry> {
        let key = (chain.to_lowercase(), normalize_address(token));
        if let Some(e) = self.cache.get(&key) {
            if e.inserted_at.elapsed() < self.ttl {
                return Some(e.entry.clone());
            }
            drop(e);
            self.cache.remove(&key);
        }
        None
    }

    pub fn set(&self, chain: &str, token: &str, entry: SnapshotEntry) {
        self.cache.insert(
            (chain.to_lowercase(), normalize_address(token)),
            TimedEntry {
                entry,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn cleanup(&self) {
        let now = Instant::now();
        self.cache
            .retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PoolStateData, SnapshotToken};
    use alloy_primitives::U256;

    fn sample(addr: &str, block: u64) -> PoolStateSample {
        PoolStateSample {
            pool_address: addr.to_string(),
            data: PoolStateData {
                sqrt_price_x96: U256::from(block),
                ..Default::default()
            },
            block_number: block,
            observed_at: Instant::now(),
        }
    }

    fn entry(symbol: &str) -> SnapshotEntry {
        SnapshotEntry {
            token: SnapshotToken {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                address: "0xToKeN".to_string(),
                decimals: 18,
                logo_uri: None,
            },
            price_usd: 1.0,
            liquidity_usd: 0.0,
            volume_usd: 0.0,
            market_cap_usd: 0.0,
        }
    }

    #[test]
    fn state_cache_is_last_writer_wins() {
        let cache = StateCache::new();
        cache.insert(1, sample("0xAbc", 10));
        cache.insert(1, sample("0xABC", 11));
        let got = cache.get(1, "0xabc").unwrap();
        assert_eq!(got.block_number, 11);
        assert_eq!(cache.len(), 1);
        // same address on another chain is a different key
        assert!(cache.get(137, "0xabc").is_none());
    }

    #[test]
    fn entry_cache_expires() {
        let cache = EntryCache::new(Duration::from_millis(0));
        cache.set("Ethereum", "0xToKeN", entry("WETH"));
        assert!(cache.get("ethereum", "0xtoken").is_none());

        let cache = EntryCache::new(Duration::from_secs(60));
        cache.set("ethereum", "0xtoken", entry("WETH"));
        assert_eq!(
            cache.get("ETHEREUM", "0xToKeN").unwrap().token.symbol,
            "WETH"
        );
    }

    #[test]
    fn cleanup_drops_expired_entries() {
        let cache = EntryCache::new(Duration::from_millis(0));
        cache.set("ethereum", "0xa", entry("A"));
        cache.set("ethereum", "0xb", entry("B"));
        cache.cleanup();
        assert_eq!(cache.len(), 0);
    }
}
