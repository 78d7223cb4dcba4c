use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration;

use serde::Deserialize;

use crate::services::TierIntervals;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub multicall: MulticallConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_chains")]
    pub chains: HashMap<String, ChainConfig>,
    /// Used by the auxiliary subgraph endpoints, not by the freshness core.
    #[serde(default)]
    pub the_graph_api_key: Option<String>,
    #[serde(default)]
    pub etherscan_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_tier_high_secs")]
    pub tier_high_secs: u64,
    #[serde(default = "default_tier_normal_secs")]
    pub tier_normal_secs: u64,
    #[serde(default = "default_tier_low_secs")]
    pub tier_low_secs: u64,
    #[serde(default = "default_failure_retry_secs")]
    pub failure_retry_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MulticallConfig {
    #[serde(default = "default_max_batch_weight")]
    pub max_batch_weight: u32,
    #[serde(default = "default_multicall_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_retry_window_secs")]
    pub retry_window_secs: u64,
    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Empty list selects the deterministic mock adapter.
    #[serde(default)]
    pub rpc_urls: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_period_secs() -> u64 {
    10
}
fn default_tier_high_secs() -> u64 {
    5
}
fn default_tier_normal_secs() -> u64 {
    10
}
fn default_tier_low_secs() -> u64 {
    30
}
fn default_failure_retry_secs() -> u64 {
    5
}
fn default_max_batch_weight() -> u32 {
    200
}
fn default_multicall_timeout_secs() -> u64 {
    8
}
fn default_retry_window_secs() -> u64 {
    300
}
fn default_probe_delay_ms() -> u64 {
    100
}
fn default_entry_ttl_secs() -> u64 {
    10
}
fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_chains() -> HashMap<String, ChainConfig> {
    let mut chains = HashMap::new();
    chains.insert(
        "ethereum".to_string(),
        ChainConfig {
            chain_id: 1,
            rpc_urls: Vec::new(),
        },
    );
    chains.insert(
        "polygon".to_string(),
        ChainConfig {
            chain_id: 137,
            rpc_urls: Vec::new(),
        },
    );
    chains
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            tier_high_secs: default_tier_high_secs(),
            tier_normal_secs: default_tier_normal_secs(),
            tier_low_secs: default_tier_low_secs(),
            failure_retry_secs: default_failure_retry_secs(),
        }
    }
}

impl Default for MulticallConfig {
    fn default() -> Self {
        Self {
            max_batch_weight: default_max_batch_weight(),
            timeout_secs: default_multicall_timeout_secs(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            retry_window_secs: default_retry_window_secs(),
            probe_delay_ms: default_probe_delay_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            multicall: MulticallConfig::default(),
            discovery: DiscoveryConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            chains: default_chains(),
            the_graph_api_key: None,
            etherscan_api_key: None,
        }
    }
}

impl Config {
    /// Read `config.toml` if present (defaults otherwise), then apply
    /// environment overrides. `.env` files are honored.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let mut config = match fs::read_to_string("config.toml") {
            Ok(content) => toml::from_str(&content)?,
            Err(_) => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// `ETHEREUM_RPC_URLS` / `POLYGON_RPC_URLS` (comma separated) override
    /// the per-chain provider lists from the file.
    fn apply_env(&mut self) {
        for (name, chain) in self.chains.iter_mut() {
            let var = format!("{}_RPC_URLS", name.to_uppercase());
            if let Ok(urls) = env::var(&var) {
                chain.rpc_urls = urls
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
        if let Ok(key) = env::var("THE_GRAPH_API_KEY") {
            self.the_graph_api_key = Some(key);
        }
        if let Ok(key) = env::var("ETHERSCAN_API_KEY") {
            self.etherscan_api_key = Some(key);
        }
    }

    pub fn tier_intervals(&self) -> TierIntervals {
        TierIntervals {
            high: Duration::from_secs(self.scheduler.tier_high_secs),
            normal: Duration::from_secs(self.scheduler.tier_normal_secs),
            low: Duration::from_secs(self.scheduler.tier_low_secs),
        }
    }

    pub fn scheduler_period(&self) -> Duration {
        Duration::from_secs(self.scheduler.period_secs)
    }

    pub fn failure_retry(&self) -> Duration {
        Duration::from_secs(self.scheduler.failure_retry_secs)
    }

    pub fn multicall_timeout(&self) -> Duration {
        Duration::from_secs(self.multicall.timeout_secs)
    }

    pub fn discovery_retry_window(&self) -> Duration {
        Duration::from_secs(self.discovery.retry_window_secs)
    }

    pub fn discovery_probe_delay(&self) -> Duration {
        Duration::from_millis(self.discovery.probe_delay_ms)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.entry_ttl_secs)
    }
}
