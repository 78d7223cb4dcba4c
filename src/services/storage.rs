use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::AggregatorError;
use crate::models::PoolRegistry;

/// Durable JSON-file registry, one `pools.json` per chain under
/// `<data_dir>/<chain_id>/`.
///
/// Writes go to a temporary sibling and are renamed into place, so a
/// concurrent reader never observes a half-written registry. Writers for
/// the same chain are serialized by an internal per-chain mutex.
pub struct RegistryStore {
    data_dir: PathBuf,
    write_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl RegistryStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).ok();
        Self {
            data_dir,
            write_locks: DashMap::new(),
        }
    }

    fn registry_path(&self, chain_id: u64) -> PathBuf {
        self.data_dir.join(chain_id.to_string()).join("pools.json")
    }

    fn lock_for(&self, chain_id: u64) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(chain_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the registry for a chain. Any failure (missing file, I/O,
    /// parse) degrades to an empty registry; discovery repopulates it.
    pub async fn load(&self, chain_id: u64) -> PoolRegistry {
        let path = self.registry_path(chain_id);
        match File::open(&path) {
            Ok(file) => {
                let reader = BufReader::new(file);
                match serde_json::from_reader(reader) {
                    Ok(registry) => registry,
                    Err(e) => {
                        tracing::warn!("corrupt registry at {}: {}", path.display(), e);
                        PoolRegistry::default()
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PoolRegistry::default(),
            Err(e) => {
                tracing::warn!("cannot read registry at {}: {}", path.display(), e);
                PoolRegistry::default()
            }
        }
    }

    /// Persist the registry for a chain atomically.
    pub async fn save(
        &self,
        chain_id: u64,
        registry: &PoolRegistry,
    ) -> Result<(), AggregatorError> {
        let lock = self.lock_for(chain_id);
        let _guard = lock.lock().await;

        let path = self.registry_path(chain_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, registry)?;
        }
        fs::rename(&tmp, &path)?;
        tracing::debug!(
            "saved registry for chain {} ({} pools)",
            chain_id,
            registry.pools.len()
        );
        Ok(())
    }
}
