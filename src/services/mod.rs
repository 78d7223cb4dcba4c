pub mod cache;
pub mod controller;
pub mod discovery;
pub mod multicall;
pub mod scheduler;
pub mod snapshot;
pub mod storage;

pub use cache::{EntryCache, StateCache};
pub use controller::{PoolController, Tier, TierIntervals};
pub use discovery::DiscoveryManager;
pub use multicall::MulticallEngine;
pub use scheduler::PoolScheduler;
pub use snapshot::SnapshotService;
pub use storage::RegistryStore;
