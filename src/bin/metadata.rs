use clap::{Arg, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;

use bigfs::config::load_config;
use bigfs::metadata_service::MetadataService;
use bigfs::proto::bigfs::metadata_server::MetadataServer;
use bigfs::util::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let matches = Command::new("MetadataServer")
        .version("1.0")
        .about("Starts the BigFS metadata server")
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDR")
                .help("Overrides the listen address from config (e.g., 0.0.0.0:50051)"),
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

    let config_path = matches.get_one::<String>("config").expect("has default");
    let config = load_config(config_path)?;

    let listen = matches
        .get_one::<String>("address")
        .cloned()
        .unwrap_or_else(|| config.metadata.listen_addr.clone());
    let addr: SocketAddr = listen.parse()?;

    let _guard = init_logging(&config.common, &config.metadata.log_path);

    let service = Arc::new(MetadataService::new(config.metadata, config.common));
    service.start_liveness_sweep();

    println!("MetadataServer running at {}", addr);
    Server::builder()
        .add_service(MetadataServer::new(Arc::clone(&service)))
        .serve(addr)
        .await?;

    Ok(())
}
