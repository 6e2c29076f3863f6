//! The performance-measurement proxy server binary: wires the proxy
//! forwarder (C6), the collection session manager (C5), and the
//! benchmark replayer (C7) behind one HTTP listener.
//!
//! Usage:
//! ```bash
//! aicp-server --config config.yaml
//! ```

mod catalog;
mod config;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use aicp_bench::BenchmarkRunner;
use aicp_collect::CollectionManager;
use aicp_config::FileConfigRegistry;
use aicp_core::task_catalog::TaskCatalog;
use catalog::JsonlTaskCatalog;
use clap::Parser;
use config::ServerConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// aicp-server: proxy-and-measure sidecar for LLM inference performance.
#[derive(Parser)]
#[command(name = "aicp-server")]
#[command(about = "Transparent proxy that measures LLM inference performance", long_about = None)]
struct Cli {
    /// Path to the server configuration file (YAML or TOML).
    #[arg(short, long, value_name = "FILE", env = "AICP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen host.
    #[arg(long, env = "AICP_HOST")]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long, env = "AICP_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(host = %config.host, port = config.port, "starting aicp-server");

    std::fs::create_dir_all(&config.data_dir)?;
    ensure_default_proxy_config(&config.proxy.config_path)?;

    let writer_config = aicp_storage::WriterConfig {
        max_per_file: config.collection.max_records_per_file,
        flush_batch: config.collection.flush_batch,
        flush_interval: std::time::Duration::from_secs(config.collection.flush_interval_secs),
    };

    let catalog: Arc<dyn TaskCatalog> = Arc::new(JsonlTaskCatalog::new(&config.data_dir).await?);
    let collection = CollectionManager::new(
        Arc::clone(&catalog),
        config.data_dir.join("collect"),
        writer_config,
    );
    let benchmark = BenchmarkRunner::new(catalog, config.data_dir.join("benchmark"), writer_config);

    let client = aicp_proxy::create_client(&aicp_proxy::HttpClientConfig {
        timeout_secs: config.proxy.timeout_secs,
        connect_timeout_secs: 10,
        pool_max_idle_per_host: config.proxy.max_connections,
    })?;

    let config_registry = Arc::new(FileConfigRegistry::new(&config.proxy.config_path).await?);

    let proxy_router = aicp_proxy::router(client, Arc::clone(&collection), config_registry);
    let api_router = routes::router(routes::ApiState {
        collection,
        benchmark,
    });

    let app = proxy_router.merge(api_router);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "aicp-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Writes a permissive placeholder proxy target if none exists yet, so a
/// first run doesn't immediately fail to bind the configuration registry.
/// Requests are refused with 503 until an operator points it somewhere
/// real (see `aicp_proxy::handler::proxy_all`).
fn ensure_default_proxy_config(path: &std::path::Path) -> std::io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    warn!(path = ?path, "no proxy target configured yet, writing a placeholder");
    std::fs::write(path, "target_host: \"127.0.0.1\"\ntarget_port: 8000\n")
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
