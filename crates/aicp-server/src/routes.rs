//! `/api/collect/**` and `/api/benchmark/**`: the HTTP surface that wraps
//! C5 and C7 for standalone operation. `/proxy/**` is wired directly from
//! `aicp_proxy::router` in `main`; `/healthz` is a liveness probe.

use std::sync::Arc;

use aicp_bench::{BenchmarkRequest, BenchmarkRunner, BenchmarkStatus, ReplayMode};
use aicp_collect::{CollectionManager, StopCondition};
use aicp_core::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ApiState {
    pub collection: Arc<CollectionManager>,
    pub benchmark: Arc<BenchmarkRunner>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/collect/start", post(start_collect))
        .route("/api/collect/{id}/stop", post(stop_collect))
        .route("/api/collect/status", get(collect_status))
        .route("/api/benchmark/start", post(start_benchmark))
        .route("/api/benchmark/{id}/progress", get(benchmark_progress))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::SessionBusy(_) => StatusCode::CONFLICT,
        Error::WrongTask(_) | Error::TaskNotFound(_) => StatusCode::BAD_REQUEST,
        Error::InvalidRequest(_) | Error::ConfigNotFound => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

#[derive(Debug, Deserialize)]
struct StartCollectRequest {
    name: String,
    #[serde(default = "default_stop_type")]
    stop_type: String,
    #[serde(default = "default_stop_value")]
    stop_value: u64,
}

fn default_stop_type() -> String {
    "count".to_string()
}

fn default_stop_value() -> u64 {
    500
}

#[derive(Debug, Serialize)]
struct StartCollectResponse {
    task_id: String,
    data_dir: String,
}

async fn start_collect(State(state): State<ApiState>, Json(req): Json<StartCollectRequest>) -> Response {
    let stop_condition = match req.stop_type.as_str() {
        "time" => StopCondition::Time(req.stop_value),
        _ => StopCondition::Count(req.stop_value),
    };
    match state.collection.start(&req.name, stop_condition).await {
        Ok(started) => Json(StartCollectResponse {
            task_id: started.task_id,
            data_dir: started.data_dir.to_string_lossy().into_owned(),
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct StopCollectResponse {
    status: &'static str,
    task_id: String,
    record_count: u64,
}

async fn stop_collect(State(state): State<ApiState>, Path(task_id): Path<String>) -> Response {
    match state.collection.stop(&task_id).await {
        Ok(record_count) => Json(StopCollectResponse {
            status: "stopped",
            task_id,
            record_count,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct CollectStatusResponse {
    active: bool,
    task_id: Option<String>,
}

async fn collect_status(State(state): State<ApiState>) -> Json<CollectStatusResponse> {
    Json(CollectStatusResponse {
        active: state.collection.has_active().await,
        task_id: state.collection.active_task_id().await,
    })
}

#[derive(Debug, Deserialize)]
struct StartBenchmarkRequest {
    name: String,
    source_task_id: String,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default = "default_replay_mode")]
    replay_mode: String,
    target_host: String,
    target_port: u16,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
    #[serde(default = "default_timeout_s")]
    timeout_s: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_replay_mode() -> String {
    "sequential".to_string()
}

fn default_delay_ms() -> u64 {
    100
}

fn default_timeout_s() -> u64 {
    60
}

#[derive(Debug, Serialize)]
struct StartBenchmarkResponse {
    task_id: String,
    data_dir: String,
    total: usize,
}

async fn start_benchmark(State(state): State<ApiState>, Json(req): Json<StartBenchmarkRequest>) -> Response {
    let replay_mode = match req.replay_mode.as_str() {
        "concurrent" => ReplayMode::Concurrent,
        _ => ReplayMode::Sequential,
    };
    let result = state
        .benchmark
        .start(BenchmarkRequest {
            name: req.name,
            source_task_id: req.source_task_id,
            concurrency: req.concurrency,
            replay_mode,
            target_host: req.target_host,
            target_port: req.target_port,
            delay_ms: req.delay_ms,
            timeout_s: req.timeout_s,
        })
        .await;
    match result {
        Ok(started) => Json(StartBenchmarkResponse {
            task_id: started.task_id,
            data_dir: started.data_dir.to_string_lossy().into_owned(),
            total: started.total,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct BenchmarkProgressResponse {
    task_id: String,
    total: usize,
    completed: usize,
    status: &'static str,
    elapsed_s: f64,
}

async fn benchmark_progress(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Json<BenchmarkProgressResponse> {
    let progress = state.benchmark.progress(&task_id).await;
    let status = match progress.status {
        BenchmarkStatus::Running => "running",
        BenchmarkStatus::Completed => "completed",
        BenchmarkStatus::NotFound => "not_found",
    };
    Json(BenchmarkProgressResponse {
        task_id: progress.task_id,
        total: progress.total,
        completed: progress.completed,
        status,
        elapsed_s: progress.elapsed_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicp_core::task_catalog::{TaskCatalog, TaskRecord, TaskType};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex as StdMutex;
    use tower::ServiceExt;

    struct InMemoryCatalog {
        records: StdMutex<Vec<TaskRecord>>,
    }

    impl InMemoryCatalog {
        fn new() -> Self {
            Self {
                records: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskCatalog for InMemoryCatalog {
        async fn next_collect_id(&self) -> aicp_core::Result<String> {
            Ok("collect_001".to_string())
        }

        async fn next_benchmark_id(&self) -> aicp_core::Result<String> {
            Ok("benchmark_001".to_string())
        }

        async fn create(&self, record: TaskRecord) -> aicp_core::Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }

        async fn update(
            &self,
            id: &str,
            mutate: Box<dyn FnOnce(&mut TaskRecord) + Send>,
        ) -> aicp_core::Result<()> {
            let mut records = self.records.lock().unwrap();
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                mutate(record);
            }
            Ok(())
        }

        async fn get(&self, id: &str) -> aicp_core::Result<Option<TaskRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .cloned())
        }

        async fn list(&self, task_type: Option<TaskType>) -> aicp_core::Result<Vec<TaskRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| task_type.is_none_or(|t| r.task_type == t))
                .cloned()
                .collect())
        }
    }

    fn test_state(dir: &std::path::Path) -> ApiState {
        let catalog: Arc<dyn TaskCatalog> = Arc::new(InMemoryCatalog::new());
        let writer_config = aicp_storage::WriterConfig::default();
        ApiState {
            collection: CollectionManager::new(Arc::clone(&catalog), dir.join("collect"), writer_config),
            benchmark: BenchmarkRunner::new(catalog, dir.join("benchmark"), writer_config),
        }
    }

    #[tokio::test]
    async fn collect_status_reports_inactive_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/collect/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_collect_then_status_reports_active() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect/start")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"demo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status_response = app
            .oneshot(
                Request::builder()
                    .uri("/api/collect/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(status_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["active"], true);
    }

    #[tokio::test]
    async fn starting_a_second_collection_while_one_is_active_returns_409() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect/start")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"demo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect/start")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"demo2"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn benchmark_progress_for_an_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/benchmark/nope/progress")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "not_found");
    }
}
