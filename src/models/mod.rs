pub mod pool;
pub mod snapshot;
pub mod token;

pub use pool::{
    normalize_address, DexType, PoolMetadata, PoolRegistry, PoolStateData, PoolStateSample,
    PricingRoute,
};
pub use snapshot::{ChainSnapshot, SnapshotEntry, SnapshotToken};
pub use token::Token;
