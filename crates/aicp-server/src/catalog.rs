//! JSON-lines task catalog: the default `TaskCatalog` this workspace ships
//! so the system is runnable standalone, without a database collaborator.
//!
//! Holds every `TaskRecord` in memory behind a mutex and mirrors the whole
//! set to `DATA_DIR/tasks.jsonl` (one JSON object per line) on every
//! mutation. Task counts are small — one line per collection or benchmark
//! session, not per request — so a full rewrite per mutation is simpler
//! than an append-only log with compaction.

use std::path::{Path, PathBuf};

use aicp_core::error::Result;
use aicp_core::task_catalog::{TaskCatalog, TaskRecord, TaskType};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

pub struct JsonlTaskCatalog {
    path: PathBuf,
    records: Mutex<Vec<TaskRecord>>,
}

impl JsonlTaskCatalog {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let path = data_dir.join("tasks.jsonl");
        let records = Self::load(&path)?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn load(path: &Path) -> Result<Vec<TaskRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(path)?;
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(error = %err, "skipping malformed task catalog line"),
            }
        }
        Ok(records)
    }

    fn rewrite(&self, path: &Path, records: &[TaskRecord]) -> Result<()> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        std::fs::write(path, buf)?;
        Ok(())
    }

    fn next_id(records: &[TaskRecord], task_type: TaskType, prefix: &str) -> String {
        let max = records
            .iter()
            .filter(|r| r.task_type == task_type)
            .filter_map(|r| r.id.strip_prefix(prefix))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("{prefix}{:03}", max + 1)
    }
}

#[async_trait]
impl TaskCatalog for JsonlTaskCatalog {
    async fn next_collect_id(&self) -> Result<String> {
        let records = self.records.lock().await;
        Ok(Self::next_id(&records, TaskType::Collect, "collect_"))
    }

    async fn next_benchmark_id(&self) -> Result<String> {
        let records = self.records.lock().await;
        Ok(Self::next_id(&records, TaskType::Benchmark, "benchmark_"))
    }

    async fn create(&self, record: TaskRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.push(record);
        self.rewrite(&self.path, &records)
    }

    async fn update(
        &self,
        id: &str,
        mutate: Box<dyn FnOnce(&mut TaskRecord) + Send>,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            mutate(record);
        }
        self.rewrite(&self.path, &records)
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, task_type: Option<TaskType>) -> Result<Vec<TaskRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| task_type.is_none_or(|t| r.task_type == t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicp_core::task_catalog::TaskStatus;

    fn sample(id: &str, task_type: TaskType) -> TaskRecord {
        TaskRecord {
            id: id.to_string(),
            name: "demo".to_string(),
            task_type,
            status: TaskStatus::Running,
            config: "{}".to_string(),
            data_dir: "/tmp/demo".to_string(),
            target_host: None,
            target_port: None,
            record_count: 0,
            created_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn next_collect_id_increments_past_the_highest_existing_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonlTaskCatalog::new(dir.path()).await.unwrap();
        catalog
            .create(sample("collect_001", TaskType::Collect))
            .await
            .unwrap();
        catalog
            .create(sample("collect_003", TaskType::Collect))
            .await
            .unwrap();
        assert_eq!(catalog.next_collect_id().await.unwrap(), "collect_004");
    }

    #[tokio::test]
    async fn records_survive_a_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = JsonlTaskCatalog::new(dir.path()).await.unwrap();
            catalog
                .create(sample("benchmark_001", TaskType::Benchmark))
                .await
                .unwrap();
        }
        let reloaded = JsonlTaskCatalog::new(dir.path()).await.unwrap();
        let record = reloaded.get("benchmark_001").await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn update_mutates_the_matching_record_only() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonlTaskCatalog::new(dir.path()).await.unwrap();
        catalog
            .create(sample("collect_001", TaskType::Collect))
            .await
            .unwrap();
        catalog
            .update(
                "collect_001",
                Box::new(|r| {
                    r.status = TaskStatus::Completed;
                    r.record_count = 42;
                }),
            )
            .await
            .unwrap();
        let record = catalog.get("collect_001").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.record_count, 42);
    }

    #[tokio::test]
    async fn list_filters_by_task_type() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonlTaskCatalog::new(dir.path()).await.unwrap();
        catalog
            .create(sample("collect_001", TaskType::Collect))
            .await
            .unwrap();
        catalog
            .create(sample("benchmark_001", TaskType::Benchmark))
            .await
            .unwrap();
        let collects = catalog.list(Some(TaskType::Collect)).await.unwrap();
        assert_eq!(collects.len(), 1);
        assert_eq!(collects[0].id, "collect_001");
    }
}
