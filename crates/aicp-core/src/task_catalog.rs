//! Task catalog collaborator
//!
//! Persists metadata for collection and benchmark sessions, keyed by task
//! id. The core reads it to allocate the next `collect_NNN` id and to
//! reload a captured dataset for replay; it never depends on a particular
//! storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Collect,
    Benchmark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Opaque JSON-encoded configuration, mirroring the upstream catalog's
    /// `config` column.
    pub config: String,
    pub data_dir: String,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persists and enumerates `TaskRecord`s.
///
/// Implementations:
/// - an in-process JSON-lines catalog under `DATA_DIR` (default, ships in
///   this workspace for standalone runs).
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    /// Next `collect_NNN` id, computed by scanning persisted records of
    /// type `Collect` for the highest numeric suffix and adding one.
    async fn next_collect_id(&self) -> Result<String>;

    /// Next `benchmark_NNN` id, analogous to `next_collect_id`.
    async fn next_benchmark_id(&self) -> Result<String>;

    async fn create(&self, record: TaskRecord) -> Result<()>;

    /// Apply a partial update (status/record_count/completed_at) to an
    /// existing record.
    async fn update(&self, id: &str, mutate: Box<dyn FnOnce(&mut TaskRecord) + Send>)
    -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>>;

    async fn list(&self, task_type: Option<TaskType>) -> Result<Vec<TaskRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_record_serializes_type_and_status_lowercase() {
        let record = TaskRecord {
            id: "collect_001".to_string(),
            name: "demo".to_string(),
            task_type: TaskType::Collect,
            status: TaskStatus::Running,
            config: "{}".to_string(),
            data_dir: "/tmp/collect_001".to_string(),
            target_host: Some("127.0.0.1".to_string()),
            target_port: Some(8000),
            record_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "collect");
        assert_eq!(json["status"], "running");
    }
}
