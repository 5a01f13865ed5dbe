// Placement, failover and bookkeeping behavior of the metadata server,
// exercised by calling the service handlers directly.
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tonic::{Code, Request};

use bigfs::config::{CommonConfig, MetadataConfig};
use bigfs::metadata_service::MetadataService;
use bigfs::proto::bigfs::metadata_server::Metadata;
use bigfs::proto::bigfs::{FileRequest, NodeInfo, PathRequest};

const MIB: u64 = 1024 * 1024;

fn test_common(heartbeat_timeout: u64) -> CommonConfig {
    CommonConfig {
        metadata_addr: "127.0.0.1:59051".to_string(),
        gateway_addr: "127.0.0.1:59050".to_string(),
        chunk_size: MIB,
        replication_factor: 3,
        heartbeat_interval: 1,
        heartbeat_timeout,
        rpc_timeout: 2,
        replication_timeout: 2,
        log_level: "warn".to_string(),
        log_output: "stdout".to_string(),
    }
}

fn service(heartbeat_timeout: u64) -> Arc<MetadataService> {
    Arc::new(MetadataService::new(
        MetadataConfig::default(),
        test_common(heartbeat_timeout),
    ))
}

async fn register(svc: &Arc<MetadataService>, address: &str, chunk_count: u64) {
    svc.register_node(Request::new(NodeInfo {
        address: address.to_string(),
        chunk_count,
    }))
    .await
    .unwrap();
}

async fn write_plan(
    svc: &Arc<MetadataService>,
    filename: &str,
    size: u64,
) -> Result<Vec<bigfs::proto::bigfs::ChunkLocation>, tonic::Status> {
    svc.get_write_plan(Request::new(FileRequest {
        filename: filename.to_string(),
        size,
    }))
    .await
    .map(|response| response.into_inner().locations)
}

#[tokio::test]
async fn least_loaded_nodes_become_primaries() {
    let svc = service(15);
    register(&svc, "10.0.0.1:7000", 0).await; // a
    register(&svc, "10.0.0.2:7000", 5).await; // b
    register(&svc, "10.0.0.3:7000", 2).await; // c

    let plan = write_plan(&svc, "video.bin", 3 * MIB).await.unwrap();
    let primaries: Vec<&str> = plan.iter().map(|l| l.primary_node_id.as_str()).collect();
    assert_eq!(
        primaries,
        vec!["10.0.0.1:7000", "10.0.0.3:7000", "10.0.0.2:7000"]
    );
}

#[tokio::test]
async fn rotation_spreads_primaries_across_the_pool() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1", "d:1"] {
        register(&svc, node, 0).await;
    }

    let plan = write_plan(&svc, "big.bin", 4 * MIB).await.unwrap();
    let primaries: Vec<&str> = plan.iter().map(|l| l.primary_node_id.as_str()).collect();
    assert_eq!(primaries, vec!["a:1", "b:1", "c:1", "d:1"]);
    for pair in primaries.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[tokio::test]
async fn plans_have_the_right_shape() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }

    for (size, expected_chunks) in [(0, 1), (1, 1), (MIB, 1), (MIB + 1, 2), (3 * MIB, 3)] {
        let plan = write_plan(&svc, "shape.bin", size).await.unwrap();
        assert_eq!(plan.len() as u64, expected_chunks, "size {}", size);
        for (index, loc) in plan.iter().enumerate() {
            assert_eq!(loc.chunk_index as usize, index);
            assert_eq!(loc.replica_node_ids.len(), 2);
            assert!(!loc.replica_node_ids.contains(&loc.primary_node_id));
        }
    }
}

#[tokio::test]
async fn replanning_never_reuses_chunk_ids() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }

    let first = write_plan(&svc, "twice.bin", 2 * MIB).await.unwrap();
    let second = write_plan(&svc, "twice.bin", 2 * MIB).await.unwrap();

    for loc in &second {
        assert!(first.iter().all(|old| old.chunk_id != loc.chunk_id));
    }

    // The second plan replaced the first
    let stored = svc
        .get_file_location(Request::new(FileRequest {
            filename: "twice.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stored.locations[0].chunk_id, second[0].chunk_id);
}

#[tokio::test]
async fn lookup_matches_the_plan() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }

    let plan = write_plan(&svc, "stable.bin", 2 * MIB).await.unwrap();
    let looked_up = svc
        .get_file_location(Request::new(FileRequest {
            filename: "stable.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap()
        .into_inner();

    assert!(looked_up.is_sharded);
    assert_eq!(looked_up.locations.len(), plan.len());
    for (a, b) in plan.iter().zip(looked_up.locations.iter()) {
        assert_eq!(a.chunk_index, b.chunk_index);
        assert_eq!(a.chunk_id, b.chunk_id);
    }
}

#[tokio::test]
async fn too_few_nodes_means_unavailable_and_no_plan() {
    let svc = service(15);
    register(&svc, "a:1", 0).await;
    register(&svc, "b:1", 0).await;

    let err = write_plan(&svc, "nope.bin", MIB).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);

    let err = svc
        .get_file_location(Request::new(FileRequest {
            filename: "nope.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn dead_primary_is_replaced_in_the_stored_plan() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }

    let plan = write_plan(&svc, "failover.bin", 1).await.unwrap();
    let primary = plan[0].primary_node_id.clone();
    let replicas = plan[0].replica_node_ids.clone();

    // Simulate the sweep evicting the primary
    svc.state.lock().await.nodes.remove(&primary);

    let looked_up = svc
        .get_file_location(Request::new(FileRequest {
            filename: "failover.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap()
        .into_inner();
    let promoted = looked_up.locations[0].primary_node_id.clone();
    assert_ne!(promoted, primary);
    assert!(replicas.contains(&promoted));

    // The promotion is persisted in the stored plan
    let stored = svc.state.lock().await.files.get("failover.bin").unwrap()[0]
        .primary_node_id
        .clone();
    assert_eq!(stored, promoted);
}

#[tokio::test]
async fn no_live_replica_fails_the_lookup() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }
    write_plan(&svc, "doomed.bin", 1).await.unwrap();

    svc.state.lock().await.nodes.clear();

    let err = svc
        .get_file_location(Request::new(FileRequest {
            filename: "doomed.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn stale_nodes_are_swept_out_of_the_pool() {
    let svc = service(1);
    svc.start_liveness_sweep();
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }

    // A plan right after registration sees all three nodes
    write_plan(&svc, "fresh.bin", 1).await.unwrap();

    // Without heartbeat refreshes every node ages out
    sleep(Duration::from_secs(3)).await;
    let err = write_plan(&svc, "late.bin", 1).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test]
async fn list_files_reports_the_chunk_count_approximation() {
    let svc = service(15);
    for node in ["a:1", "b:1", "c:1"] {
        register(&svc, node, 0).await;
    }
    write_plan(&svc, "three.bin", 3 * MIB).await.unwrap();
    write_plan(&svc, "tiny.bin", 0).await.unwrap();

    let listing = svc
        .list_files(Request::new(PathRequest {
            path: String::new(),
        }))
        .await
        .unwrap()
        .into_inner();

    let size_of = |name: &str| {
        listing
            .files
            .iter()
            .find(|f| f.filename == name)
            .unwrap()
            .size
    };
    assert_eq!(size_of("three.bin"), 2 * MIB + 1);
    assert_eq!(size_of("tiny.bin"), 1);
}

#[tokio::test]
async fn remove_file_drops_the_plan_even_when_every_chunk_fails() {
    let svc = service(15);
    // Registered but unreachable: every RemoveChunk RPC will fail
    for node in ["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:3"] {
        register(&svc, node, 4).await;
    }

    let plan = write_plan(&svc, "gone.bin", 2 * MIB).await.unwrap();
    let response = svc
        .remove_file(Request::new(FileRequest {
            filename: "gone.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap()
        .into_inner();

    assert!(response.success);
    assert!(response.removed_chunks.is_empty());
    assert_eq!(response.failed_chunks.len(), plan.len());

    // The file left the namespace regardless
    let err = svc
        .get_file_location(Request::new(FileRequest {
            filename: "gone.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let listing = svc
        .list_files(Request::new(PathRequest {
            path: String::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(listing.files.is_empty());
}

#[tokio::test]
async fn removing_an_unknown_file_is_not_found() {
    let svc = service(15);
    let err = svc
        .remove_file(Request::new(FileRequest {
            filename: "missing.bin".to_string(),
            size: 0,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}
