use clap::{Arg, Command};
use std::net::SocketAddr;
use tonic::transport::Server;

use bigfs::config::load_config;
use bigfs::gateway_service::GatewayService;
use bigfs::proto::bigfs::gateway_server::GatewayServer;
use bigfs::util::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let matches = Command::new("GatewayServer")
        .version("1.0")
        .about("Starts the BigFS gateway server")
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDR")
                .help("Overrides the listen address from config (e.g., 0.0.0.0:50050)"),
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
        .unwrap_or_else(|| config.gateway.listen_addr.clone());
    let addr: SocketAddr = listen.parse()?;

    let _guard = init_logging(&config.common, &config.gateway.log_path);

    // Per-upload temp files live here for the duration of each request
    if !std::path::Path::new(&config.gateway.temp_dir).exists() {
        std::fs::create_dir_all(&config.gateway.temp_dir)?;
    }

    let service = GatewayService::new(config.gateway, config.common);

    println!("GatewayServer running at {}", addr);
    Server::builder()
        .add_service(GatewayServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
