use std::path::{Path, PathBuf};
use tokio::time::{self, Duration};
use tracing::{debug, warn};

use crate::config::{CommonConfig, StorageConfig};
use crate::proto::bigfs::NodeInfo;
use crate::util::dial_metadata;

#[derive(Clone, Debug, Default)]
pub struct StorageService {
    pub addr: String,      // Advertised address; doubles as the heartbeat identity
    pub data_dir: PathBuf, // Flat directory of chunk files, one file per chunk id
    pub config: StorageConfig,
    pub common: CommonConfig,
}

impl StorageService {
    pub fn new(addr: &str, data_dir: PathBuf, config: StorageConfig, common: CommonConfig) -> Self {
        Self {
            addr: addr.to_string(),
            data_dir,
            config,
            common,
        }
    }

    /// Path of a chunk in the local store. Ids are flat file names; anything
    /// that would escape the directory is rejected.
    pub(crate) fn chunk_path(&self, chunk_id: &str) -> Result<PathBuf, tonic::Status> {
        if chunk_id.is_empty()
            || chunk_id.contains('/')
            || chunk_id.contains('\\')
            || chunk_id.contains("..")
        {
            return Err(tonic::Status::invalid_argument(format!(
                "Invalid chunk id '{}'",
                chunk_id
            )));
        }
        Ok(self.data_dir.join(chunk_id))
    }

    /// Number of chunk files currently on disk. Best effort: a store or
    /// delete racing the scan just shows up in the next heartbeat.
    fn count_chunks(data_dir: &Path) -> u64 {
        match std::fs::read_dir(data_dir) {
            Ok(entries) => entries.filter_map(|entry| entry.ok()).count() as u64,
            Err(e) => {
                warn!("Failed to scan '{}': {}", data_dir.display(), e);
                0
            }
        }
    }

    /// Starts the heartbeat task: every tick, report this node's address and
    /// chunk count to the metadata server. The metadata server is redialed
    /// each tick; failures are swallowed and the next tick retries.
    pub fn start_heartbeat_loop(&self) {
        let addr = self.addr.clone();
        let data_dir = self.data_dir.clone();
        let metadata_addr = self.common.metadata_addr.clone();
        let interval = Duration::from_secs(self.common.heartbeat_interval);
        let deadline = Duration::from_secs(self.common.rpc_timeout);

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;

                let chunk_count = Self::count_chunks(&data_dir);
                let mut client = match dial_metadata(&metadata_addr, deadline).await {
                    Ok(client) => client,
                    Err(e) => {
                        debug!("[Heartbeat] Metadata server unreachable: {}", e);
                        continue;
                    }
                };

                let request = tonic::Request::new(NodeInfo {
                    address: addr.clone(),
                    chunk_count,
                });
                if let Err(e) = client.register_node(request).await {
                    debug!("[Heartbeat] Report to '{}' failed: {}", metadata_addr, e);
                }
            }
        });
    }
}
