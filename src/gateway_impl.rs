// Implements the gRPC server behavior defined in the Gateway trait
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, warn};

use crate::gateway_service::GatewayService;
use crate::proto::bigfs::chunk_upload_request::Payload;
use crate::proto::bigfs::gateway_server::Gateway;
use crate::proto::bigfs::{
    ChunkDownloadResponse, ChunkUploadRequest, FileListResponse, FileLocationResponse,
    FileRequest, PathRequest, SimpleResponse,
};
use crate::util::fetch_chunk;

#[tonic::async_trait]
impl Gateway for GatewayService {
    /// Receives a client upload stream. The first message must carry the file
    /// metadata; the rest is raw bytes, buffered to a per-request temp file
    /// before placement and dispatch. The temp file is removed on every exit
    /// path.
    async fn upload_file(
        &self,
        request: Request<Streaming<ChunkUploadRequest>>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let mut stream = request.into_inner();

        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("Empty upload stream"))?;
        let remote_path = match first.payload {
            Some(Payload::Metadata(meta)) => meta.remote_path,
            _ => {
                return Err(Status::invalid_argument(
                    "First upload message must carry file metadata",
                ))
            }
        };

        let temp_path = std::path::Path::new(&self.config.temp_dir)
            .join(format!("upload_{:016x}", rand::random::<u64>()));
        let result = self.run_upload(&mut stream, &remote_path, &temp_path).await;
        let _ = tokio::fs::remove_file(&temp_path).await;

        let chunks = result?;
        info!("Upload of '{}' complete ({} chunk(s))", remote_path, chunks);
        Ok(Response::new(SimpleResponse {
            success: true,
            message: format!("File '{}' stored in {} chunk(s).", remote_path, chunks),
        }))
    }

    type DownloadFileStream = ReceiverStream<Result<ChunkDownloadResponse, Status>>;

    /// Streams a file back chunk by chunk, in index order. Each chunk is
    /// fetched from its primary with fallback to replicas; if every node for
    /// some chunk fails, the stream fails.
    async fn download_file(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<Self::DownloadFileStream>, Status> {
        let filename = request.into_inner().filename;

        let mut metadata = self.dial_metadata().await?;
        let plan = metadata
            .get_file_location(Request::new(FileRequest {
                filename: filename.clone(),
                size: 0,
            }))
            .await?
            .into_inner();

        let deadline = self.rpc_deadline();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let last = plan.locations.len().saturating_sub(1);
            for (index, loc) in plan.locations.iter().enumerate() {
                match fetch_chunk(loc, deadline).await {
                    Ok(data) => {
                        let reply = ChunkDownloadResponse {
                            data,
                            is_final_chunk: index == last,
                        };
                        if tx.send(Ok(reply)).await.is_err() {
                            warn!("Download of '{}' dropped by client", filename);
                            return;
                        }
                    }
                    Err(status) => {
                        error!("Download of '{}' failed: {}", filename, status);
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    /// Hands the chunk map to clients that fetch straight from storage nodes.
    async fn get_download_map(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<FileLocationResponse>, Status> {
        let mut metadata = self.dial_metadata().await?;
        let response = metadata
            .get_file_location(Request::new(request.into_inner()))
            .await?;
        Ok(Response::new(response.into_inner()))
    }

    async fn list_files(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<FileListResponse>, Status> {
        let mut metadata = self.dial_metadata().await?;
        let response = metadata.list_files(Request::new(request.into_inner())).await?;
        Ok(Response::new(response.into_inner()))
    }

    async fn remove_file(
        &self,
        request: Request<FileRequest>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let filename = request.into_inner().filename;

        let mut metadata = self.dial_metadata().await?;
        let outcome = metadata
            .remove_file(Request::new(FileRequest {
                filename: filename.clone(),
                size: 0,
            }))
            .await;

        match outcome {
            Ok(response) => {
                let inner = response.into_inner();
                Ok(Response::new(SimpleResponse {
                    success: inner.success,
                    message: format!(
                        "{}: {} chunk(s) removed, {} failed",
                        inner.message,
                        inner.removed_chunks.len(),
                        inner.failed_chunks.len()
                    ),
                }))
            }
            Err(status) if status.code() == tonic::Code::NotFound => {
                Ok(Response::new(SimpleResponse {
                    success: false,
                    message: status.message().to_string(),
                }))
            }
            Err(status) => Err(status),
        }
    }
}
