use std::sync::Arc;

use aicp_collect::CollectionManager;
use aicp_core::error::Result;
use aicp_core::task_catalog::{TaskCatalog, TaskRecord, TaskType};
use aicp_proxy::forward::{forward, ProxyState};
use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use std::sync::Mutex as StdMutex;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NoopCatalog;

#[async_trait]
impl TaskCatalog for NoopCatalog {
    async fn next_collect_id(&self) -> Result<String> {
        Ok("collect_001".to_string())
    }
    async fn next_benchmark_id(&self) -> Result<String> {
        Ok("benchmark_001".to_string())
    }
    async fn create(&self, _record: TaskRecord) -> Result<()> {
        Ok(())
    }
    async fn update(
        &self,
        _id: &str,
        _mutate: Box<dyn FnOnce(&mut TaskRecord) + Send>,
    ) -> Result<()> {
        Ok(())
    }
    async fn get(&self, _id: &str) -> Result<Option<TaskRecord>> {
        Ok(None)
    }
    async fn list(&self, _task_type: Option<TaskType>) -> Result<Vec<TaskRecord>> {
        Ok(Vec::new())
    }
}

fn state(dir: &std::path::Path) -> ProxyState {
    let collection = CollectionManager::new(Arc::new(NoopCatalog), dir);
    ProxyState {
        client: reqwest::Client::new(),
        collection,
    }
}

#[tokio::test]
async fn passthrough_streams_raw_upstream_bytes() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(&b"{\"ok\":true}"[..], "application/json"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let uri = mock_server.uri();
    let url = uri.strip_prefix("http://").unwrap();
    let (host, port) = url.split_once(':').unwrap();

    let response = forward(
        &state,
        Method::POST,
        HeaderMap::new(),
        Bytes::from_static(b"not json, so metrics would be disabled anyway"),
        host,
        port.parse().unwrap(),
        "/v1/chat/completions",
        false,
    )
    .await;

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn streaming_with_capture_forwards_frames_and_records_stat() {
    let mock_server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let uri = mock_server.uri();
    let url = uri.strip_prefix("http://").unwrap();
    let (host, port) = url.split_once(':').unwrap();

    let body = Bytes::from_static(br#"{"model":"gpt-4","messages":[],"stream":true}"#);
    let response = forward(
        &state,
        Method::POST,
        HeaderMap::new(),
        body,
        host,
        port.parse().unwrap(),
        "/v1/chat/completions",
        true,
    )
    .await;

    assert_eq!(response.status(), 200);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("Hi"));
}

#[tokio::test]
async fn reassembly_returns_single_json_body() {
    let mock_server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"id\":\"srv-1\",\"model\":\"gpt-4\",\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let uri = mock_server.uri();
    let url = uri.strip_prefix("http://").unwrap();
    let (host, port) = url.split_once(':').unwrap();

    // original_stream = false -> force_conversion = true
    let body = Bytes::from_static(br#"{"model":"gpt-4","messages":[]}"#);
    let response = forward(
        &state,
        Method::POST,
        HeaderMap::new(),
        body,
        host,
        port.parse().unwrap(),
        "/v1/chat/completions",
        true,
    )
    .await;

    assert_eq!(response.status(), 200);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["object"], "chat.completion");
    assert_eq!(value["choices"][0]["message"]["content"], "Hello");
    assert_eq!(value["id"], "srv-1");
}
