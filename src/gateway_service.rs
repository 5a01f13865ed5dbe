use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tonic::transport::Channel;
use tonic::{Status, Streaming};
use tracing::{debug, info};

use crate::config::{CommonConfig, GatewayConfig};
use crate::proto::bigfs::chunk_upload_request::Payload;
use crate::proto::bigfs::metadata_client::MetadataClient;
use crate::proto::bigfs::{Chunk, ChunkLocation, ChunkUploadRequest, FileRequest};
use crate::util::{dial_metadata, dial_storage};

/// The gateway holds no state between requests; each upload owns one unique
/// temp file under `config.temp_dir` for the duration of the call.
#[derive(Clone, Debug, Default)]
pub struct GatewayService {
    pub config: GatewayConfig,
    pub common: CommonConfig,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, common: CommonConfig) -> Self {
        Self { config, common }
    }

    pub(crate) fn rpc_deadline(&self) -> Duration {
        Duration::from_secs(self.common.rpc_timeout)
    }

    pub(crate) async fn dial_metadata(&self) -> Result<MetadataClient<Channel>, Status> {
        dial_metadata(&self.common.metadata_addr, self.rpc_deadline()).await
    }

    /// Drives one buffered upload end to end: spool the client stream to the
    /// temp file, ask for a write plan sized by the byte count, dispatch every
    /// chunk to its primary. Returns the number of chunks stored.
    pub(crate) async fn run_upload(
        &self,
        stream: &mut Streaming<ChunkUploadRequest>,
        remote_path: &str,
        temp_path: &Path,
    ) -> Result<usize, Status> {
        let total_bytes = self.buffer_upload(stream, temp_path).await?;
        info!("Buffered upload of '{}' ({} bytes)", remote_path, total_bytes);

        let mut metadata = self.dial_metadata().await?;
        let plan = metadata
            .get_write_plan(tonic::Request::new(FileRequest {
                filename: remote_path.to_string(),
                size: total_bytes,
            }))
            .await?
            .into_inner();
        if plan.locations.is_empty() {
            return Err(Status::internal(format!(
                "Empty write plan for '{}'",
                remote_path
            )));
        }

        self.dispatch_chunks(temp_path, total_bytes, &plan.locations)
            .await?;
        Ok(plan.locations.len())
    }

    /// Spools the remainder of an upload stream to `temp_path`, returning the
    /// total byte count.
    async fn buffer_upload(
        &self,
        stream: &mut Streaming<ChunkUploadRequest>,
        temp_path: &Path,
    ) -> Result<u64, Status> {
        let mut file = File::create(temp_path)
            .await
            .map_err(|e| Status::internal(format!("Failed to create temp file: {}", e)))?;

        let mut total: u64 = 0;
        while let Some(message) = stream.message().await? {
            match message.payload {
                Some(Payload::Data(data)) => {
                    total += data.len() as u64;
                    file.write_all(&data)
                        .await
                        .map_err(|e| Status::internal(format!("Failed to buffer upload: {}", e)))?;
                }
                Some(Payload::Metadata(_)) => {
                    return Err(Status::invalid_argument(
                        "Metadata may only lead the upload stream",
                    ));
                }
                None => return Err(Status::invalid_argument("Empty upload message")),
            }
        }

        file.flush()
            .await
            .map_err(|e| Status::internal(format!("Failed to flush temp file: {}", e)))?;
        Ok(total)
    }

    /// Cuts the buffered bytes into plan-sized chunks and pushes each one to
    /// its primary together with the replica list. Chunks go out in index
    /// order; the first failure aborts the whole upload.
    async fn dispatch_chunks(
        &self,
        temp_path: &Path,
        total_bytes: u64,
        locations: &[ChunkLocation],
    ) -> Result<(), Status> {
        let chunk_size = self.common.chunk_size;
        let mut file = File::open(temp_path)
            .await
            .map_err(|e| Status::internal(format!("Failed to reopen temp file: {}", e)))?;

        for loc in locations {
            let offset = loc.chunk_index as u64 * chunk_size;
            let len = total_bytes.saturating_sub(offset).min(chunk_size) as usize;
            let mut data = vec![0u8; len];
            file.read_exact(&mut data)
                .await
                .map_err(|e| Status::internal(format!("Failed to read temp file: {}", e)))?;

            // Dispatch failures abort the upload as internal errors, whatever
            // status the peer or the dial produced
            let mut client = dial_storage(&loc.primary_node_id, self.rpc_deadline())
                .await
                .map_err(|e| {
                    Status::internal(format!(
                        "Failed to dial '{}': {}",
                        loc.primary_node_id, e
                    ))
                })?;
            let response = client
                .store_chunk(tonic::Request::new(Chunk {
                    chunk_id: loc.chunk_id.clone(),
                    data,
                    replica_node_ids: loc.replica_node_ids.clone(),
                }))
                .await
                .map_err(|e| {
                    Status::internal(format!(
                        "Node '{}' unreachable for chunk '{}': {}",
                        loc.primary_node_id, loc.chunk_id, e
                    ))
                })?
                .into_inner();
            if !response.success {
                return Err(Status::internal(format!(
                    "Node '{}' failed to store chunk '{}': {}",
                    loc.primary_node_id, loc.chunk_id, response.message
                )));
            }

            debug!(
                "Dispatched chunk '{}' ({} bytes) to '{}'",
                loc.chunk_id, len, loc.primary_node_id
            );
        }

        Ok(())
    }
}
