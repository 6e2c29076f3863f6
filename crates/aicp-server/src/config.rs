//! On-disk server configuration: YAML or TOML, dispatched by file
//! extension, every field defaulted so a missing file section never
//! fails to parse.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub collection: CollectionConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: u64,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_records_per_file: default_max_records_per_file(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_batch: default_flush_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Path to the YAML/TOML file the configuration registry watches for
    /// the active `{target_host, target_port}` pair.
    #[serde(default = "default_proxy_config_path")]
    pub config_path: PathBuf,

    #[serde(default = "default_proxy_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_proxy_max_connections")]
    pub max_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: default_proxy_config_path(),
            timeout_secs: default_proxy_timeout_secs(),
            max_connections: default_proxy_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            collection: CollectionConfig::default(),
            proxy: ProxyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };
        Ok(config)
    }

    /// Environment variables take precedence over the file, matching
    /// `AICP_HOST`/`AICP_PORT`/`AICP_DATA_DIR`.
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("AICP_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("AICP_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            self.port = port;
        }
        if let Ok(val) = std::env::var("AICP_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("AICP_LOG_LEVEL") {
            self.logging.level = val;
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data/results")
}

fn default_max_records_per_file() -> u64 {
    1000
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_flush_batch() -> usize {
    10
}

fn default_proxy_config_path() -> PathBuf {
    PathBuf::from("/data/results/proxy_config.yaml")
}

fn default_proxy_timeout_secs() -> u64 {
    300
}

fn default_proxy_max_connections() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_configuration_options() {
        let config = ServerConfig::default();
        assert_eq!(config.collection.max_records_per_file, 1000);
        assert_eq!(config.collection.flush_interval_secs, 5);
        assert_eq!(config.collection.flush_batch, 10);
        assert_eq!(config.proxy.timeout_secs, 300);
        assert_eq!(config.proxy.max_connections, 500);
    }

    #[test]
    fn partial_yaml_fills_in_the_rest_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "host: \"127.0.0.1\"\nport: 9000\n").unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.collection.max_records_per_file, 1000);
    }

    #[test]
    fn toml_extension_is_parsed_as_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "host = \"10.0.0.1\"\nport = 7000\n").unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn env_override_takes_precedence_over_the_file() {
        std::env::set_var("AICP_PORT", "6543");
        let mut config = ServerConfig::default();
        config.merge_env();
        assert_eq!(config.port, 6543);
        std::env::remove_var("AICP_PORT");
    }
}
