// Implements the gRPC server behavior defined in the Storage trait
use bytes::Bytes;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::proto::bigfs::storage_server::Storage;
use crate::proto::bigfs::{Chunk, ChunkRequest, SimpleResponse};
use crate::storage_service::StorageService;
use crate::util::dial_storage;

#[tonic::async_trait]
impl Storage for StorageService {
    /// Persists one chunk locally, then fans it out to the named replicas
    /// without waiting on them. Durability of the write equals durability on
    /// this node; replica failures are logged and swallowed.
    async fn store_chunk(
        &self,
        request: Request<Chunk>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let chunk = request.into_inner();
        let path = self.chunk_path(&chunk.chunk_id)?;
        let data = Bytes::from(chunk.data);

        debug!(
            "[StoreChunk] '{}' ({} bytes) -> {}",
            chunk.chunk_id,
            data.len(),
            path.display()
        );

        // Stage and rename so a crash mid-write never leaves a torn chunk.
        // Chunk ids may contain dots, so the suffix is appended, not swapped.
        let staged = self.data_dir.join(format!("{}.tmp", chunk.chunk_id));
        if let Err(e) = tokio::fs::write(&staged, &data).await {
            warn!("[StoreChunk] Write failed for '{}': {}", chunk.chunk_id, e);
            return Ok(Response::new(SimpleResponse {
                success: false,
                message: format!("Write failed: {}", e),
            }));
        }
        if let Err(e) = tokio::fs::rename(&staged, &path).await {
            warn!("[StoreChunk] Rename failed for '{}': {}", chunk.chunk_id, e);
            return Ok(Response::new(SimpleResponse {
                success: false,
                message: format!("Rename failed: {}", e),
            }));
        }

        let deadline = Duration::from_secs(self.common.replication_timeout);
        for replica in chunk.replica_node_ids {
            let chunk_id = chunk.chunk_id.clone();
            let data = data.clone();
            tokio::spawn(async move {
                if let Err(e) = replicate_chunk(&replica, &chunk_id, data, deadline).await {
                    warn!("[Replicate] '{}' to '{}' failed: {}", chunk_id, replica, e);
                }
            });
        }

        Ok(Response::new(SimpleResponse {
            success: true,
            message: String::new(),
        }))
    }

    async fn retrieve_chunk(
        &self,
        request: Request<ChunkRequest>,
    ) -> Result<Response<Chunk>, Status> {
        let chunk_id = request.into_inner().chunk_id;
        let path = self.chunk_path(&chunk_id)?;

        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Status::not_found(format!("Chunk '{}' not found", chunk_id))
            }
            _ => Status::internal(format!("Failed to read chunk '{}': {}", chunk_id, e)),
        })?;

        debug!("[RetrieveChunk] '{}' ({} bytes)", chunk_id, data.len());
        Ok(Response::new(Chunk {
            chunk_id,
            data,
            replica_node_ids: vec![],
        }))
    }

    async fn remove_chunk(
        &self,
        request: Request<ChunkRequest>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let chunk_id = request.into_inner().chunk_id;
        let path = self.chunk_path(&chunk_id)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("[RemoveChunk] '{}' removed", chunk_id);
                Ok(Response::new(SimpleResponse {
                    success: true,
                    message: "Chunk removed".to_string(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[RemoveChunk] '{}' not found", chunk_id);
                Ok(Response::new(SimpleResponse {
                    success: false,
                    message: "Chunk not found".to_string(),
                }))
            }
            Err(e) => Err(Status::internal(format!(
                "Failed to remove chunk '{}': {}",
                chunk_id, e
            ))),
        }
    }
}

/// Push one replica copy to a peer node. Replica writes carry an empty
/// replica list, so fan-out never cascades.
async fn replicate_chunk(
    addr: &str,
    chunk_id: &str,
    data: Bytes,
    deadline: Duration,
) -> Result<(), Status> {
    let mut client = dial_storage(addr, deadline).await?;
    let request = tonic::Request::new(Chunk {
        chunk_id: chunk_id.to_string(),
        data: data.to_vec(),
        replica_node_ids: vec![],
    });
    client.store_chunk(request).await?;
    Ok(())
}
