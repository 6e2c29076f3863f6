//! Axum wiring for `ANY /proxy/**`: resolves the active upstream target
//! from the configuration registry, decides whether metrics collection
//! is on (mirroring whether a collection session is currently active),
//! and delegates to [`forward`].

use std::sync::Arc;

use aicp_collect::CollectionManager;
use aicp_core::config_registry::ConfigRegistry;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use bytes::Bytes;
use reqwest::Client;
use serde_json::json;

use crate::forward::{forward, ProxyState};

#[derive(Clone)]
pub struct AppState {
    pub proxy: ProxyState,
    pub config: Arc<dyn ConfigRegistry>,
}

pub fn router(
    client: Client,
    collection: Arc<CollectionManager>,
    config: Arc<dyn ConfigRegistry>,
) -> Router {
    let state = AppState {
        proxy: ProxyState { client, collection },
        config,
    };
    Router::new()
        .route("/proxy/{*rest}", any(proxy_all))
        .with_state(state)
}

async fn proxy_all(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = match state.config.current().await {
        Ok(target) => target,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "proxy not configured, set target service first"})),
            )
                .into_response();
        }
    };

    let collect_metrics = state.proxy.collection.has_active().await;
    let path = format!("/{rest}");

    forward(
        &state.proxy,
        method,
        headers,
        body,
        &target.target_host,
        target.target_port,
        &path,
        collect_metrics,
    )
    .await
}
