// Shared helpers: dialing with deadlines, chunk fetch with replica fallback,
// remote path parsing and logging setup.
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::CommonConfig;
use crate::proto::bigfs::metadata_client::MetadataClient;
use crate::proto::bigfs::storage_client::StorageClient;
use crate::proto::bigfs::{ChunkLocation, ChunkRequest};

/// Seconds since the UNIX epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn endpoint(addr: &str, deadline: Duration) -> Result<Endpoint, Status> {
    Endpoint::from_shared(format!("http://{}", addr))
        .map(|ep| ep.connect_timeout(deadline).timeout(deadline))
        .map_err(|e| Status::internal(format!("Invalid address '{}': {}", addr, e)))
}

/// Connect to a storage node with a per-call deadline applied to the channel.
pub async fn dial_storage(
    addr: &str,
    deadline: Duration,
) -> Result<StorageClient<Channel>, Status> {
    let channel = endpoint(addr, deadline)?
        .connect()
        .await
        .map_err(|e| Status::unavailable(format!("Failed to connect to '{}': {}", addr, e)))?;
    Ok(StorageClient::new(channel))
}

/// Connect to the metadata server with a per-call deadline.
pub async fn dial_metadata(
    addr: &str,
    deadline: Duration,
) -> Result<MetadataClient<Channel>, Status> {
    let channel = endpoint(addr, deadline)?
        .connect()
        .await
        .map_err(|e| Status::unavailable(format!("Failed to connect to '{}': {}", addr, e)))?;
    Ok(MetadataClient::new(channel))
}

/// Fetch one chunk, trying the primary first and then each replica in listed
/// order. Every attempt gets its own deadline; a timed-out or failed node just
/// moves the fetch on to the next candidate.
pub async fn fetch_chunk(loc: &ChunkLocation, deadline: Duration) -> Result<Vec<u8>, Status> {
    let candidates =
        std::iter::once(&loc.primary_node_id).chain(loc.replica_node_ids.iter());

    for addr in candidates {
        let mut client = match dial_storage(addr, deadline).await {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    "Chunk '{}': node '{}' unreachable: {}",
                    loc.chunk_id, addr, e
                );
                continue;
            }
        };

        let request = tonic::Request::new(ChunkRequest {
            chunk_id: loc.chunk_id.clone(),
        });
        match client.retrieve_chunk(request).await {
            Ok(response) => return Ok(response.into_inner().data),
            Err(e) => {
                warn!(
                    "Chunk '{}': retrieve from '{}' failed: {}",
                    loc.chunk_id, addr, e
                );
            }
        }
    }

    Err(Status::internal(format!(
        "All nodes failed for chunk '{}'",
        loc.chunk_id
    )))
}

/// Strip a `bfs://`-style scheme prefix and surrounding slashes from a remote
/// path, leaving the flat file name the cluster knows it by.
pub fn parse_remote_path(raw: &str) -> String {
    let without_scheme = match raw.split_once("://") {
        Some((_, rest)) => rest,
        None => raw,
    };
    without_scheme.trim_matches('/').to_string()
}

/// Initialize tracing from the common config. Returns the appender guard when
/// logging to a file; the caller must keep it alive for the process lifetime.
pub fn init_logging(common: &CommonConfig, log_path: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(common.log_level.clone()));

    if common.log_output == "file" {
        let appender = tracing_appender::rolling::daily(log_path, "bigfs.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::parse_remote_path;

    #[test]
    fn strips_scheme_and_slashes() {
        assert_eq!(parse_remote_path("bfs://report.pdf"), "report.pdf");
        assert_eq!(parse_remote_path("bfs:///report.pdf/"), "report.pdf");
        assert_eq!(parse_remote_path("report.pdf"), "report.pdf");
        assert_eq!(parse_remote_path("bfs:///"), "");
    }
}
