// Implements the gRPC server behavior defined in the Metadata trait
use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::metadata_service::{ClusterState, MetadataService, NodeStatus};
use crate::proto::bigfs::file_list_response::FileInfo;
use crate::proto::bigfs::metadata_server::Metadata;
use crate::proto::bigfs::{
    ChunkLocation, ChunkRequest, FileListResponse, FileLocationResponse, FileRequest, NodeInfo,
    PathRequest, RemoveFileResponse, SimpleResponse,
};
use crate::util::{dial_storage, epoch_secs};

#[tonic::async_trait]
impl Metadata for Arc<MetadataService> {
    async fn register_node(
        &self,
        request: Request<NodeInfo>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let NodeInfo {
            address,
            chunk_count,
        } = request.into_inner();

        let mut state = self.state.lock().await;
        debug!("[Heartbeat] {} ({} chunks)", address, chunk_count);
        state.nodes.insert(
            address.clone(),
            NodeStatus {
                address,
                last_seen: epoch_secs(),
                chunk_count,
            },
        );

        Ok(Response::new(SimpleResponse {
            success: true,
            message: String::new(),
        }))
    }

    async fn list_files(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<FileListResponse>, Status> {
        // The filter is accepted but unused: the namespace is flat.
        let _path = request.into_inner().path;

        let state = self.state.lock().await;
        let chunk_size = self.common.chunk_size;
        let files = state
            .files
            .iter()
            .map(|(filename, chunks)| FileInfo {
                filename: filename.clone(),
                // Approximation: only chunk count is recorded, not byte size
                size: if chunks.is_empty() {
                    0
                } else {
                    (chunks.len() as u64 - 1) * chunk_size + 1
                },
            })
            .collect();

        Ok(Response::new(FileListResponse { files }))
    }

    /// Plans placement for a new file.
    ///
    /// - Snapshots the live nodes and sorts them by reported load.
    /// - Assigns the `replication_factor` least-loaded nodes to each chunk,
    ///   rotating the pool so consecutive chunks land on different primaries.
    /// - Records the plan, overwriting any previous plan for the same name.
    async fn get_write_plan(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<FileLocationResponse>, Status> {
        let FileRequest { filename, size } = request.into_inner();
        let replication = self.common.replication_factor;
        let chunk_size = self.common.chunk_size;

        let mut state = self.state.lock().await;

        if state.nodes.len() < replication {
            return Err(Status::unavailable(format!(
                "Insufficient live nodes: need {}, have {}",
                replication,
                state.nodes.len()
            )));
        }

        // Sort ascending by load; ties break on address so the ordering is
        // deterministic within one call.
        let mut ordered: Vec<(u64, String)> = state
            .nodes
            .values()
            .map(|node| (node.chunk_count, node.address.clone()))
            .collect();
        ordered.sort();
        let mut candidates: Vec<String> = ordered.into_iter().map(|(_, addr)| addr).collect();

        let num_chunks = if size > 0 {
            (size + chunk_size - 1) / chunk_size
        } else {
            1
        };
        let stamp = self.mint_plan_stamp();
        info!(
            "[GetWritePlan] '{}': {} bytes over {} chunk(s)",
            filename, size, num_chunks
        );

        let mut plan = Vec::with_capacity(num_chunks as usize);
        for index in 0..num_chunks {
            if candidates.len() < replication {
                return Err(Status::internal("Allocation failure: candidate pool shrank"));
            }

            let chosen = &candidates[..replication];
            plan.push(ChunkLocation {
                chunk_index: index as u32,
                chunk_id: format!("{}_chunk{}_{}", filename, index, stamp),
                primary_node_id: chosen[0].clone(),
                replica_node_ids: chosen[1..].to_vec(),
            });

            // Rotate the pool so the next chunk gets a different primary
            candidates.rotate_left(1);
        }

        state.files.insert(filename, plan.clone());

        Ok(Response::new(FileLocationResponse {
            is_sharded: num_chunks > 1,
            locations: plan,
        }))
    }

    /// Looks up the stored plan for a file.
    ///
    /// A dead primary is replaced by the first live replica, in the stored
    /// plan itself, so later reads keep the promotion. A chunk with no live
    /// node at all fails the whole call.
    async fn get_file_location(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<FileLocationResponse>, Status> {
        let filename = request.into_inner().filename;

        let mut state = self.state.lock().await;
        let ClusterState { nodes, files } = &mut *state;
        let locations = files
            .get_mut(&filename)
            .ok_or_else(|| Status::not_found(format!("File '{}' not found", filename)))?;

        for loc in locations.iter_mut() {
            if nodes.contains_key(&loc.primary_node_id) {
                continue;
            }

            let promoted = loc
                .replica_node_ids
                .iter()
                .find(|replica| nodes.contains_key(*replica))
                .cloned();
            match promoted {
                Some(replica) => {
                    info!(
                        "[Failover] Chunk '{}': '{}' promoted to primary",
                        loc.chunk_id, replica
                    );
                    loc.primary_node_id = replica;
                }
                None => {
                    return Err(Status::unavailable(format!(
                        "No live node for chunk '{}'",
                        loc.chunk_id
                    )))
                }
            }
        }

        Ok(Response::new(FileLocationResponse {
            is_sharded: locations.len() > 1,
            locations: locations.clone(),
        }))
    }

    /// Deletes a file: fans RemoveChunk out to every live holder of each
    /// chunk, updates the cached node loads, then drops the plan entry.
    ///
    /// Dead nodes are skipped. A chunk counts as removed once any node
    /// confirms; a "not found" reply still confirms (the chunk is already
    /// gone there). The plan is dropped even when chunks fail.
    async fn remove_file(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<RemoveFileResponse>, Status> {
        let filename = request.into_inner().filename;
        let deadline = Duration::from_secs(self.common.rpc_timeout);

        let mut state = self.state.lock().await;
        let plan = state
            .files
            .get(&filename)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("File '{}' not found", filename)))?;
        info!("[RemoveFile] '{}': {} chunk(s)", filename, plan.len());

        let mut removed_chunks = Vec::new();
        let mut failed_chunks = Vec::new();

        for loc in &plan {
            let mut confirmed = false;
            let targets =
                std::iter::once(&loc.primary_node_id).chain(loc.replica_node_ids.iter());

            for address in targets {
                if !state.nodes.contains_key(address) {
                    debug!(
                        "[RemoveFile] Skipping dead node '{}' for chunk '{}'",
                        address, loc.chunk_id
                    );
                    continue;
                }

                let mut client = match dial_storage(address, deadline).await {
                    Ok(client) => client,
                    Err(e) => {
                        warn!(
                            "[RemoveFile] Could not reach '{}' for chunk '{}': {}",
                            address, loc.chunk_id, e
                        );
                        continue;
                    }
                };

                let chunk_request = tonic::Request::new(ChunkRequest {
                    chunk_id: loc.chunk_id.clone(),
                });
                match client.remove_chunk(chunk_request).await {
                    Ok(response) => {
                        // A "not found" reply still means the chunk is gone
                        // from that node; only a real deletion adjusts load.
                        confirmed = true;
                        if response.into_inner().success {
                            if let Some(node) = state.nodes.get_mut(address) {
                                node.chunk_count = node.chunk_count.saturating_sub(1);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "[RemoveFile] RemoveChunk on '{}' failed for '{}': {}",
                            address, loc.chunk_id, e
                        );
                    }
                }
            }

            if confirmed {
                removed_chunks.push(loc.chunk_id.clone());
            } else {
                failed_chunks.push(loc.chunk_id.clone());
            }
        }

        // The file leaves the namespace regardless of per-chunk outcomes
        state.files.remove(&filename);

        Ok(Response::new(RemoveFileResponse {
            success: true,
            message: format!("File '{}' removed", filename),
            removed_chunks,
            failed_chunks,
        }))
    }
}
