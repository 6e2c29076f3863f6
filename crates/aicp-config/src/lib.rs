//! File-backed implementation of the configuration-registry collaborator.
//!
//! Stores the active `{target_host, target_port}` pair in a YAML or TOML
//! file and watches it for changes with `notify`, so the proxy forwarder
//! can be repointed without a restart.

mod file_registry;

pub use file_registry::FileConfigRegistry;
