//! C5: the collection session manager.
//!
//! Holds the process-wide singleton of at-most-one active capture
//! session, routing stats from the proxy forwarder into a dedicated
//! rotating writer and enforcing count- or time-based auto-stop.
//!
//! The active-session slot is process-scoped: exactly one
//! `CollectionManager` is expected to be constructed per server process,
//! matching the upstream system's own module-level singleton.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aicp_core::error::{Error, Result};
use aicp_core::stat::Stat;
use aicp_core::task_catalog::{TaskCatalog, TaskRecord, TaskStatus, TaskType};
use aicp_storage::{RotatingWriter, WriterConfig};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    Count(u64),
    Time(u64),
}

pub struct StartedSession {
    pub task_id: String,
    pub data_dir: PathBuf,
}

struct ActiveSession {
    task_id: String,
    writer: Arc<RotatingWriter>,
    stop_condition: StopCondition,
    time_stop_handle: Option<JoinHandle<()>>,
}

/// Routes performance stats into at most one active capture session.
pub struct CollectionManager {
    catalog: Arc<dyn TaskCatalog>,
    data_root: PathBuf,
    writer_config: WriterConfig,
    active: Mutex<Option<ActiveSession>>,
}

impl CollectionManager {
    pub fn new(
        catalog: Arc<dyn TaskCatalog>,
        data_root: impl Into<PathBuf>,
        writer_config: WriterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            data_root: data_root.into(),
            writer_config,
            active: Mutex::new(None),
        })
    }

    pub async fn has_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn active_task_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|s| s.task_id.clone())
    }

    /// Starts a new session. Fails with [`Error::SessionBusy`] if one is
    /// already running.
    pub async fn start(
        self: &Arc<Self>,
        name: &str,
        stop_condition: StopCondition,
    ) -> Result<StartedSession> {
        let mut guard = self.active.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Err(Error::SessionBusy(existing.task_id.clone()));
        }

        let task_id = self.catalog.next_collect_id().await?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let data_dir = self.data_root.join(format!("{task_id}_{timestamp}"));

        let writer = RotatingWriter::new(&data_dir, self.writer_config)?;
        writer.start_periodic_flush();

        self.catalog
            .create(TaskRecord {
                id: task_id.clone(),
                name: name.to_string(),
                task_type: TaskType::Collect,
                status: TaskStatus::Running,
                config: serde_json::to_string(&stop_condition_json(stop_condition))
                    .unwrap_or_default(),
                data_dir: data_dir.to_string_lossy().into_owned(),
                target_host: None,
                target_port: None,
                record_count: 0,
                created_at: chrono::Utc::now(),
                completed_at: None,
            })
            .await?;

        let time_stop_handle = match stop_condition {
            StopCondition::Time(seconds) => {
                let manager = Arc::clone(self);
                let task_id = task_id.clone();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    let _ = manager.stop(&task_id).await;
                }))
            }
            StopCondition::Count(_) => None,
        };

        *guard = Some(ActiveSession {
            task_id: task_id.clone(),
            writer,
            stop_condition,
            time_stop_handle,
        });

        tracing::info!(task_id = %task_id, "collection session started");
        Ok(StartedSession { task_id, data_dir })
    }

    /// Finalizes the active session and returns its total record count.
    /// Fails with [`Error::WrongTask`] if `task_id` isn't the active one,
    /// including when no session is active at all.
    pub async fn stop(&self, task_id: &str) -> Result<u64> {
        let session = {
            let mut guard = self.active.lock().await;
            match guard.as_ref() {
                Some(session) if session.task_id == task_id => guard.take().unwrap(),
                _ => return Err(Error::WrongTask(task_id.to_string())),
            }
        };

        if let Some(handle) = session.time_stop_handle {
            handle.abort();
        }
        session.writer.finalize().await?;
        let total = session.writer.total_records().await;

        let task_id = session.task_id;
        self.catalog
            .update(
                &task_id,
                Box::new(move |record| {
                    record.status = TaskStatus::Completed;
                    record.completed_at = Some(chrono::Utc::now());
                    record.record_count = total;
                }),
            )
            .await?;

        tracing::info!(task_id = %task_id, records = total, "collection session stopped");
        Ok(total)
    }

    /// Enqueues a stat into the active session's writer, silently
    /// dropping it when no session is active. Triggers an asynchronous
    /// auto-stop once a count-based threshold is reached, without
    /// holding the session lock across the stop call.
    pub async fn add_record(self: &Arc<Self>, stat: Stat) -> Result<()> {
        let (writer, task_id, stop_at) = {
            let guard = self.active.lock().await;
            let Some(session) = guard.as_ref() else {
                return Ok(());
            };
            let stop_at = match session.stop_condition {
                StopCondition::Count(limit) => Some(limit),
                StopCondition::Time(_) => None,
            };
            (Arc::clone(&session.writer), session.task_id.clone(), stop_at)
        };

        writer.add_record(stat).await?;

        if let Some(limit) = stop_at {
            if writer.total_records().await >= limit {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = manager.stop(&task_id).await;
                });
            }
        }
        Ok(())
    }
}

fn stop_condition_json(condition: StopCondition) -> serde_json::Value {
    match condition {
        StopCondition::Count(value) => {
            serde_json::json!({"stop_type": "count", "stop_value": value})
        }
        StopCondition::Time(value) => {
            serde_json::json!({"stop_type": "time", "stop_value": value})
        }
    }
}
