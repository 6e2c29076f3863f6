//! Configuration registry collaborator
//!
//! The forwarder consults a `ConfigRegistry` per request to learn which
//! upstream to dial. This crate only defines the trait; `aicp-config` ships
//! a file-backed implementation with hot reload.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;

/// The active proxy target, as yielded by the registry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProxyTarget {
    pub target_host: String,
    pub target_port: u16,
}

/// Notification that the registry's value changed.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: u32,
}

pub type ConfigChangeStream<'a> = BoxStream<'a, Result<ConfigChange>>;

/// Yields the active proxy target on demand and allows watching for changes.
///
/// Implementations:
/// - `FileConfigRegistry` (`aicp-config`): YAML/TOML file watched with `notify`.
#[async_trait]
pub trait ConfigRegistry: Send + Sync {
    /// Current `{target_host, target_port}` pair. Consulted per request.
    async fn current(&self) -> Result<ProxyTarget>;

    /// Stream of change notifications; implementations may return an
    /// always-empty stream if they don't support hot reload.
    async fn watch(&self) -> Result<ConfigChangeStream<'_>>;
}
