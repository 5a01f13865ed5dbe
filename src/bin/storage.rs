use clap::{Arg, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use tonic::transport::Server;

use bigfs::config::load_config;
use bigfs::proto::bigfs::storage_server::StorageServer;
use bigfs::storage_service::StorageService;
use bigfs::util::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let matches = Command::new("StorageNode")
        .version("1.0")
        .about("Starts a BigFS storage node")
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDR")
                .help("Advertised address of this node (e.g., 127.0.0.1:50061)")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("config.toml")
                .help("Path to the configuration file"),
        )
        .get_matches();

    let address = matches
        .get_one::<String>("address")
        .expect("Address is required");
    let addr: SocketAddr = address.parse().expect("Invalid address format");

    let config_path = matches.get_one::<String>("config").expect("has default");
    let config = load_config(config_path)?;

    let _guard = init_logging(&config.common, &config.storage.log_path);

    // One flat chunk directory per node, keyed by port
    let data_dir = PathBuf::from(format!("{}_{}", config.storage.data_prefix, addr.port()));
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }
    println!("Data directory verified: {}", data_dir.display());

    let service = StorageService::new(address, data_dir, config.storage, config.common);
    service.start_heartbeat_loop();

    println!("StorageNode '{}' running at {}", address, addr);
    Server::builder()
        .add_service(StorageServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
