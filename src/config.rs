use serde::Deserialize;
use std::fs;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub temp_dir: String, // Directory for per-upload temp files
    pub log_path: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct MetadataConfig {
    pub listen_addr: String,
    pub log_path: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageConfig {
    pub data_prefix: String, // Chunk directory is "<data_prefix>_<port>"
    pub log_path: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ClientConfig {
    pub log_path: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CommonConfig {
    pub metadata_addr: String,    // Address of the metadata server
    pub gateway_addr: String,     // Address of the gateway server
    pub chunk_size: u64,          // Chunk size in bytes
    pub replication_factor: usize, // Total copies of each chunk (primary + replicas)
    pub heartbeat_interval: u64,  // Storage heartbeat interval in seconds
    pub heartbeat_timeout: u64,   // Seconds without a heartbeat before a node is evicted
    pub rpc_timeout: u64,         // Per-call deadline for inter-service RPCs, seconds
    pub replication_timeout: u64, // Deadline for async replica writes, seconds
    pub log_level: String,        // Log level (e.g., "debug", "info", etc.)
    pub log_output: String,       // Log output (e.g., "stdout", "file")
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub metadata: MetadataConfig,
    pub storage: StorageConfig,
    pub client: ClientConfig,
    pub common: CommonConfig,
}

pub fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    // Read the config file
    let config_content = fs::read_to_string(path)?;
    // Parse the TOML content into the Config struct
    let config: Config = toml::from_str(&config_content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shipped_config() {
        let config = load_config("config.toml").unwrap();
        assert_eq!(config.common.chunk_size, 1024 * 1024);
        assert_eq!(config.common.replication_factor, 3);
        assert_eq!(config.common.heartbeat_timeout, 15);
        assert!(config.gateway.listen_addr.ends_with(":50050"));
        assert!(config.metadata.listen_addr.ends_with(":50051"));
    }
}
