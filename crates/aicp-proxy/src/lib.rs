//! C6: the transparent proxy forwarder and its HTTP surface.
//!
//! - [`client`]: upstream `reqwest::Client` tuning.
//! - [`forward`]: the three response modes (passthrough, streaming with
//!   capture, reassembly) and the payload rewrite that selects between
//!   them.
//! - [`handler`]: `ANY /proxy/**` axum wiring.

pub mod client;
pub mod forward;
pub mod handler;

pub use client::{create_client, HttpClientConfig};
pub use forward::ProxyState;
pub use handler::{router, AppState};
