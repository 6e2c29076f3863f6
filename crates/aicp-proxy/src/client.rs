//! HTTP client configuration for upstream dispatch.

use std::time::Duration;

use aicp_core::error::{Error, Result};
use reqwest::{Client, ClientBuilder};

/// Tunables for the upstream `reqwest::Client`. Long timeouts and an idle
/// connection ceiling matter here just as much as in any proxy that keeps
/// SSE connections open for minutes at a time.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 32,
        }
    }
}

/// Builds a client tuned for long-lived streaming responses: idle
/// connections are recycled before the upstream server closes them out
/// from under us, and automatic decompression is disabled so passthrough
/// mode really does forward the exact upstream bytes.
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .build()
        .map_err(|e| Error::Internal(format!("failed to build upstream HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_a_client() {
        let config = HttpClientConfig::default();
        assert!(create_client(&config).is_ok());
    }
}
