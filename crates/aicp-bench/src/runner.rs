//! C7: the benchmark replayer. Unlike the collection session manager
//! (C5), several benchmark runs may be in flight at once; each gets its
//! own writer, its own progress entry, and its own detached runner task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aicp_core::error::{Error, Result};
use aicp_core::task_catalog::{TaskCatalog, TaskRecord, TaskStatus, TaskType};
use aicp_storage::{RotatingWriter, WriterConfig};
use futures::future::join_all;
use reqwest::Client;
use tokio::sync::{Mutex, Semaphore};

use crate::dataset::load_dataset;
use crate::replay::send_one;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct BenchmarkRequest {
    pub name: String,
    pub source_task_id: String,
    pub concurrency: usize,
    pub replay_mode: ReplayMode,
    pub target_host: String,
    pub target_port: u16,
    pub delay_ms: u64,
    pub timeout_s: u64,
}

pub struct StartedBenchmark {
    pub task_id: String,
    pub data_dir: PathBuf,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkStatus {
    Running,
    Completed,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct Progress {
    pub task_id: String,
    pub total: usize,
    pub completed: usize,
    pub status: BenchmarkStatus,
    pub elapsed_s: f64,
}

struct TaskProgress {
    total: usize,
    completed: AtomicUsize,
    status: Mutex<BenchmarkStatus>,
    start: Instant,
}

/// Owns the in-memory progress table and dispatches replay runs.
pub struct BenchmarkRunner {
    catalog: Arc<dyn TaskCatalog>,
    data_root: PathBuf,
    writer_config: WriterConfig,
    client: Client,
    progress: Mutex<HashMap<String, Arc<TaskProgress>>>,
}

impl BenchmarkRunner {
    pub fn new(
        catalog: Arc<dyn TaskCatalog>,
        data_root: impl Into<PathBuf>,
        writer_config: WriterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            data_root: data_root.into(),
            writer_config,
            client: Client::new(),
            progress: Mutex::new(HashMap::new()),
        })
    }

    pub async fn start(self: &Arc<Self>, request: BenchmarkRequest) -> Result<StartedBenchmark> {
        let source = self
            .catalog
            .get(&request.source_task_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(request.source_task_id.clone()))?;
        let records = load_dataset(&PathBuf::from(&source.data_dir))?;
        let total = records.len();

        let task_id = self.catalog.next_benchmark_id().await?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let data_dir = self.data_root.join(format!("{task_id}_{timestamp}"));

        let writer = RotatingWriter::new(&data_dir, self.writer_config)?;
        writer.start_periodic_flush();

        self.catalog
            .create(TaskRecord {
                id: task_id.clone(),
                name: request.name.clone(),
                task_type: TaskType::Benchmark,
                status: TaskStatus::Running,
                config: serde_json::to_string(&serde_json::json!({
                    "source_task_id": request.source_task_id,
                    "concurrency": request.concurrency,
                    "replay_mode": format!("{:?}", request.replay_mode),
                    "delay_ms": request.delay_ms,
                    "timeout_s": request.timeout_s,
                }))
                .unwrap_or_default(),
                data_dir: data_dir.to_string_lossy().into_owned(),
                target_host: Some(request.target_host.clone()),
                target_port: Some(request.target_port),
                record_count: 0,
                created_at: chrono::Utc::now(),
                completed_at: None,
            })
            .await?;

        let task_progress = Arc::new(TaskProgress {
            total,
            completed: AtomicUsize::new(0),
            status: Mutex::new(BenchmarkStatus::Running),
            start: Instant::now(),
        });
        self.progress
            .lock()
            .await
            .insert(task_id.clone(), Arc::clone(&task_progress));

        let runner = Arc::clone(self);
        let spawned_task_id = task_id.clone();
        tokio::spawn(async move {
            runner
                .run(spawned_task_id, records, request, writer, task_progress)
                .await;
        });

        Ok(StartedBenchmark {
            task_id,
            data_dir,
            total,
        })
    }

    async fn run(
        self: Arc<Self>,
        task_id: String,
        records: Vec<crate::dataset::QaRecord>,
        request: BenchmarkRequest,
        writer: Arc<RotatingWriter>,
        progress: Arc<TaskProgress>,
    ) {
        let url = format!(
            "http://{}:{}/v1/chat/completions",
            request.target_host, request.target_port
        );
        let timeout = Duration::from_secs(request.timeout_s);

        match request.replay_mode {
            ReplayMode::Sequential => {
                let delay = Duration::from_millis(request.delay_ms);
                for record in &records {
                    let stat = send_one(&self.client, &url, record, timeout).await;
                    if let Err(err) = writer.add_record(stat).await {
                        tracing::warn!(error = %err, "failed to record benchmark stat");
                    }
                    progress.completed.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                }
            }
            ReplayMode::Concurrent => {
                let semaphore = Arc::new(Semaphore::new(request.concurrency.max(1)));
                let client = self.client.clone();
                let futures = records.iter().map(|record| {
                    let semaphore = Arc::clone(&semaphore);
                    let client = client.clone();
                    let url = url.clone();
                    let writer = Arc::clone(&writer);
                    let progress = Arc::clone(&progress);
                    let record = record.clone();
                    async move {
                        let _permit = semaphore.acquire().await;
                        let stat = send_one(&client, &url, &record, timeout).await;
                        if let Err(err) = writer.add_record(stat).await {
                            tracing::warn!(error = %err, "failed to record benchmark stat");
                        }
                        progress.completed.fetch_add(1, Ordering::SeqCst);
                    }
                });
                join_all(futures).await;
            }
        }

        if let Err(err) = writer.finalize().await {
            tracing::warn!(error = %err, task_id = %task_id, "benchmark writer finalize failed");
        }
        let total_records = writer.total_records().await;

        *progress.status.lock().await = BenchmarkStatus::Completed;

        let update = self.catalog.update(
            &task_id,
            Box::new(move |record| {
                record.status = TaskStatus::Completed;
                record.completed_at = Some(chrono::Utc::now());
                record.record_count = total_records;
            }),
        );
        if let Err(err) = update.await {
            tracing::warn!(error = %err, task_id = %task_id, "failed to update benchmark task record");
        }
    }

    /// `completed` increments once per record after the writer has
    /// accepted it; unknown task ids report `NotFound` with zeros.
    pub async fn progress(&self, task_id: &str) -> Progress {
        let table = self.progress.lock().await;
        let Some(entry) = table.get(task_id) else {
            return Progress {
                task_id: task_id.to_string(),
                total: 0,
                completed: 0,
                status: BenchmarkStatus::NotFound,
                elapsed_s: 0.0,
            };
        };
        Progress {
            task_id: task_id.to_string(),
            total: entry.total,
            completed: entry.completed.load(Ordering::SeqCst),
            status: *entry.status.lock().await,
            elapsed_s: (entry.start.elapsed().as_secs_f64() * 10.0).round() / 10.0,
        }
    }
}
