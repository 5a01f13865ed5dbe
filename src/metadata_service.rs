// Internal state and background tasks of the MetadataService struct
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{self, Duration};
use tracing::warn;

use crate::config::{CommonConfig, MetadataConfig};
use crate::proto::bigfs::ChunkLocation;
use crate::util::epoch_secs;

/// Liveness and load of one storage node, as last reported by its heartbeat.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub address: String,
    pub last_seen: u64,
    pub chunk_count: u64,
}

/// Everything the metadata server knows. Both tables live behind one mutex so
/// every handler and the liveness sweep see a consistent snapshot of cluster
/// load.
#[derive(Debug, Default)]
pub struct ClusterState {
    pub nodes: HashMap<String, NodeStatus>, // Node address -> liveness and load
    pub files: HashMap<String, Vec<ChunkLocation>>, // File -> ordered chunk plan
}

#[derive(Debug, Default)]
pub struct MetadataService {
    pub state: Arc<Mutex<ClusterState>>,
    pub config: MetadataConfig,
    pub common: CommonConfig,
    plan_seq: AtomicU64,
}

impl MetadataService {
    pub fn new(config: MetadataConfig, common: CommonConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::default())),
            config,
            common,
            plan_seq: AtomicU64::new(0),
        }
    }

    /// Stamp for the chunk ids of one write plan. The monotonic suffix keeps
    /// rapid re-plans of the same file name from minting colliding ids.
    pub(crate) fn mint_plan_stamp(&self) -> String {
        let seq = self.plan_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", epoch_secs(), seq)
    }

    /// Starts the periodic sweep that evicts every node whose last heartbeat
    /// is older than the heartbeat timeout. Evicted nodes leave the placement
    /// pool immediately; plans still naming them fail over on the next read.
    pub fn start_liveness_sweep(self: &Arc<Self>) {
        let state = Arc::clone(&self.state);
        let timeout = self.common.heartbeat_timeout;

        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_secs(timeout));
            ticker.tick().await; // the first tick fires immediately, skip it
            loop {
                ticker.tick().await;

                let now = epoch_secs();
                let mut state = state.lock().await;
                let dead: Vec<String> = state
                    .nodes
                    .values()
                    .filter(|node| now.saturating_sub(node.last_seen) > timeout)
                    .map(|node| node.address.clone())
                    .collect();

                if dead.is_empty() {
                    continue;
                }

                warn!("[Sweep] Evicting dead nodes: {:?}", dead);
                for address in dead {
                    state.nodes.remove(&address);
                }
            }
        });
    }
}
