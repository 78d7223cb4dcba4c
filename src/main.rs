mod api;
mod chains;
mod config;
mod error;
mod models;
mod pricing;
mod services;
mod sources;
mod tokens;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chains::evm::{spec_for_chain, EvmAdapter};
use chains::mock::MockAdapter;
use chains::{AdapterRegistry, ChainAdapter};
use config::Config;
use services::{
    DiscoveryManager, EntryCache, MulticallEngine, PoolController, PoolScheduler, RegistryStore,
    SnapshotService, StateCache,
};
use sources::TokenCatalog;

const TOKEN_LIST_TIMEOUT: Duration = Duration::from_secs(15);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dex_aggregator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n🚀 DEX Price Aggregator starting...\n");

    let config = Config::load()?;
    tracing::info!("✓ Configuration loaded");
    if config.the_graph_api_key.is_some() {
        tracing::debug!("subgraph API key present (auxiliary endpoints only)");
    }
    if config.etherscan_api_key.is_some() {
        tracing::debug!("etherscan API key present (auxiliary endpoints only)");
    }

    // Chain adapters: real EVM adapters where RPC URLs are configured,
    // the deterministic mock otherwise
    let mut adapters = AdapterRegistry::default();
    for (name, chain) in &config.chains {
        let adapter: Arc<dyn ChainAdapter> = if chain.rpc_urls.is_empty() {
            tracing::warn!("no RPC urls for {}, using mock adapter", name);
            Arc::new(MockAdapter::new(name.clone(), chain.chain_id))
        } else {
            match spec_for_chain(chain.chain_id) {
                Some(spec) => Arc::new(EvmAdapter::new(
                    spec,
                    &chain.rpc_urls,
                    config.multicall_timeout(),
                )?),
                None => {
                    tracing::warn!(
                        "no factory constants for chain {} ({}), using mock adapter",
                        name,
                        chain.chain_id
                    );
                    Arc::new(MockAdapter::new(name.clone(), chain.chain_id))
                }
            }
        };
        tracing::info!(
            "✓ {} (chain {}) with {} provider(s)",
            adapter.chain_name(),
            adapter.chain_id(),
            adapter.provider_count()
        );
        adapters.register(adapter);
    }
    let adapters = Arc::new(adapters);
    let chain_ids = adapters.chain_ids();

    // Shared engine state, owned here and injected everywhere
    let store = Arc::new(RegistryStore::new(&config.storage.data_dir));
    let controller = Arc::new(PoolController::new(
        config.tier_intervals(),
        config.failure_retry(),
    ));
    let state_cache = Arc::new(StateCache::new());
    let entry_cache = Arc::new(EntryCache::new(config.entry_ttl()));
    let catalog = Arc::new(TokenCatalog::new(&chain_ids, TOKEN_LIST_TIMEOUT));
    let discovery = Arc::new(DiscoveryManager::new(
        adapters.clone(),
        store.clone(),
        controller.clone(),
        state_cache.clone(),
        config.discovery_retry_window(),
        config.discovery_probe_delay(),
    ));
    let engine = Arc::new(MulticallEngine::new(
        adapters.clone(),
        config.multicall.max_batch_weight,
    ));
    let scheduler = Arc::new(PoolScheduler::new(
        controller.clone(),
        engine,
        store.clone(),
        state_cache.clone(),
        config.scheduler_period(),
    ));
    let snapshots = Arc::new(SnapshotService::new(
        adapters.clone(),
        store.clone(),
        controller.clone(),
        state_cache.clone(),
        entry_cache.clone(),
        discovery.clone(),
        catalog.clone(),
    ));

    // Rebuild the alive set from the persisted registries; the first
    // scheduler cycle repopulates the cache
    for &chain_id in &chain_ids {
        let registry = store.load(chain_id).await;
        for meta in registry.pools.values() {
            controller.track(chain_id, meta);
        }
        if !registry.is_empty() {
            tracing::info!(
                "✓ chain {}: {} pools resumed from disk",
                chain_id,
                registry.pools.len()
            );
        }
    }

    // Remote token lists; failure degrades to the static lists
    println!("📡 Fetching remote token lists...");
    let catalog_task = catalog.clone();
    tokio::spawn(async move {
        catalog_task.refresh().await;
    });

    // Background: entry cache sweep
    let entry_cache_task = entry_cache.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            entry_cache_task.cleanup();
        }
    });

    // Background: pool scheduler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = scheduler.clone().start(shutdown_rx);
    tracing::info!(
        "✓ Scheduler running every {}s",
        config.scheduler.period_secs
    );

    // HTTP API
    let state = Arc::new(api::AppState {
        snapshots,
        controller: controller.clone(),
        state_cache: state_cache.clone(),
        entry_cache: entry_cache.clone(),
        catalog: catalog.clone(),
        scheduler: scheduler.clone(),
        chain_ids,
    });
    let app = api::create_rest_router(state).layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    println!("\n✓ Server ready on http://{}\n", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    // Orderly drain: cancel in-flight discovery, stop the scheduler and
    // give running ticks a grace window
    println!("\n⏳ Shutting down...");
    discovery.shutdown();
    shutdown_tx.send(true).ok();
    if let Some(handle) = scheduler_handle {
        tokio::time::timeout(SHUTDOWN_GRACE, handle).await.ok();
    }
    println!("✓ Bye");
    Ok(())
}
