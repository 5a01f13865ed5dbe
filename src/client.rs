// Thin client facade over the gateway, consumed by the interactive shell and
// the integration tests.
use futures::stream::{self, StreamExt};
use std::error::Error;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::config::CommonConfig;
use crate::proto::bigfs::chunk_upload_request::Payload;
use crate::proto::bigfs::file_list_response::FileInfo;
use crate::proto::bigfs::gateway_client::GatewayClient;
use crate::proto::bigfs::{
    ChunkUploadRequest, FileMetadata, FileRequest, PathRequest, SimpleResponse,
};
use crate::util::{fetch_chunk, parse_remote_path};

/// Upper bound on concurrent chunk fetches on the direct download path.
const DIRECT_FETCH_CONCURRENCY: usize = 10;

pub struct BigFsClient {
    gateway: GatewayClient<Channel>,
    common: CommonConfig,
}

impl BigFsClient {
    /// Connect to the gateway; fails fast when it is unreachable. No request
    /// deadline is set on this channel since whole-file transfers may
    /// legitimately outlast the inter-service RPC deadline.
    pub async fn connect(common: CommonConfig) -> Result<Self, Box<dyn Error>> {
        let channel = Endpoint::from_shared(format!("http://{}", common.gateway_addr))?
            .connect_timeout(Duration::from_secs(common.rpc_timeout))
            .connect()
            .await?;
        Ok(Self {
            gateway: GatewayClient::new(channel),
            common,
        })
    }

    /// Upload a local file under a remote name (`bfs://name` or plain).
    pub async fn copy_to(&mut self, local: &str, remote: &str) -> Result<(), Box<dyn Error>> {
        let remote_name = parse_remote_path(remote);
        let mut file = File::open(local).await?;
        let local_name = local.to_string();

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let metadata = ChunkUploadRequest {
                payload: Some(Payload::Metadata(FileMetadata {
                    remote_path: remote_name,
                })),
            };
            if tx.send(metadata).await.is_err() {
                return;
            }

            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = match file.read(&mut buf).await {
                    Ok(0) => break, // EOF
                    Ok(n) => n,
                    Err(e) => {
                        eprintln!("Failed to read '{}': {}", local_name, e);
                        break;
                    }
                };
                let message = ChunkUploadRequest {
                    payload: Some(Payload::Data(buf[..n].to_vec())),
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        let response = self
            .gateway
            .upload_file(Request::new(ReceiverStream::new(rx)))
            .await?
            .into_inner();
        if response.success {
            Ok(())
        } else {
            Err(response.message.into())
        }
    }

    /// Download a remote file to a local path via the gateway's chunk stream.
    pub async fn fetch_to(&mut self, remote: &str, local: &str) -> Result<(), Box<dyn Error>> {
        let filename = parse_remote_path(remote);
        let mut stream = self
            .gateway
            .download_file(Request::new(FileRequest { filename, size: 0 }))
            .await?
            .into_inner();

        let mut file = File::create(local).await?;
        while let Some(reply) = stream.message().await? {
            file.write_all(&reply.data).await?;
            if reply.is_final_chunk {
                break;
            }
        }
        file.flush().await?;
        Ok(())
    }

    /// Alternate download path: grab the chunk map from the gateway, then
    /// pull chunks straight from the storage nodes, up to ten at a time, and
    /// reassemble them in index order.
    pub async fn fetch_direct(&mut self, remote: &str, local: &str) -> Result<(), Box<dyn Error>> {
        let filename = parse_remote_path(remote);
        let map = self
            .gateway
            .get_download_map(Request::new(FileRequest { filename, size: 0 }))
            .await?
            .into_inner();

        let deadline = Duration::from_secs(self.common.rpc_timeout);
        let mut chunks = stream::iter(map.locations.into_iter().map(|loc| async move {
            let data = fetch_chunk(&loc, deadline).await?;
            Ok::<(u32, Vec<u8>), tonic::Status>((loc.chunk_index, data))
        }))
        .buffer_unordered(DIRECT_FETCH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        chunks.sort_by_key(|(index, _)| *index);

        let mut file = File::create(local).await?;
        for (_, data) in chunks {
            file.write_all(&data).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// List the known files, sorted by name.
    pub async fn list(&mut self, remote: &str) -> Result<Vec<FileInfo>, Box<dyn Error>> {
        let path = parse_remote_path(remote);
        let response = self
            .gateway
            .list_files(Request::new(PathRequest { path }))
            .await?
            .into_inner();

        let mut files = response.files;
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    /// Remove a remote file.
    pub async fn remove(&mut self, remote: &str) -> Result<SimpleResponse, Box<dyn Error>> {
        let filename = parse_remote_path(remote);
        let response = self
            .gateway
            .remove_file(Request::new(FileRequest { filename, size: 0 }))
            .await?;
        Ok(response.into_inner())
    }
}
