//! `RotatingWriter`: buffered append of [`Stat`] records to size-rotated
//! CSV shards, with a periodic background flush and a final summary pass.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aicp_core::error::Result;
use aicp_core::stat::{Stat, PERF_HEADERS, QA_HEADERS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::summary::build_summary;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Tunables for a single writer's lifetime. Mirrors the four knobs the
/// collection and benchmark sessions expose to their callers.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub max_per_file: u64,
    pub flush_batch: usize,
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_per_file: 1000,
            flush_batch: 10,
            flush_interval: Duration::from_secs(5),
        }
    }
}

struct Inner {
    buffer: Vec<Stat>,
    file_index: u64,
    file_record_count: u64,
    total_record_count: u64,
}

/// Appends [`Stat`] records to `performance_data_<k>.csv` /
/// `qa_pairs_<k>.csv` shards under `data_dir`, rotating to a new shard
/// index once the current one holds `max_per_file` rows. Flushes eagerly
/// every `flush_batch` buffered records and periodically on a timer;
/// `finalize` stops the timer, flushes the tail, and writes the summary.
pub struct RotatingWriter {
    data_dir: PathBuf,
    config: WriterConfig,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
    periodic_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    finalized: AtomicBool,
}

impl RotatingWriter {
    pub fn new(data_dir: impl Into<PathBuf>, config: WriterConfig) -> Result<Arc<Self>> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Arc::new(Self {
            data_dir,
            config,
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                file_index: 0,
                file_record_count: 0,
                total_record_count: 0,
            }),
            cancel: CancellationToken::new(),
            periodic_handle: std::sync::Mutex::new(None),
            finalized: AtomicBool::new(false),
        }))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn total_records(&self) -> u64 {
        self.inner.lock().await.total_record_count
    }

    /// Buffers one record, flushing immediately once the batch threshold
    /// is reached.
    pub async fn add_record(&self, stat: Stat) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.buffer.push(stat);
        if inner.buffer.len() >= self.config.flush_batch {
            self.flush_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Spawns the background task that flushes on `flush_interval` ticks.
    /// Idempotent with `finalize`: cancellation always stops it cleanly.
    pub fn start_periodic_flush(self: &Arc<Self>) {
        let writer = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(writer.config.flush_interval) => {
                        let mut inner = writer.inner.lock().await;
                        if let Err(err) = writer.flush_locked(&mut inner) {
                            tracing::error!(error = %err, "periodic flush failed");
                        }
                    }
                }
            }
        });
        *self.periodic_handle.lock().unwrap() = Some(handle);
    }

    /// Stops the periodic task, flushes whatever remains, and writes the
    /// summary artifacts. Safe to call more than once; only the first
    /// call does anything.
    pub async fn finalize(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let handle = self.periodic_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        {
            let mut inner = self.inner.lock().await;
            self.flush_locked(&mut inner)?;
            if inner.total_record_count == 0 {
                self.ensure_empty_shard()?;
            }
        }
        build_summary(&self.data_dir).await?;
        Ok(())
    }

    fn current_shard_paths(&self, index: u64) -> (PathBuf, PathBuf) {
        (
            self.data_dir.join(format!("performance_data_{index}.csv")),
            self.data_dir.join(format!("qa_pairs_{index}.csv")),
        )
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        if inner.file_record_count >= self.config.max_per_file {
            inner.file_index += 1;
            inner.file_record_count = 0;
        }
        let (perf_path, qa_path) = self.current_shard_paths(inner.file_index);

        let start_serial = inner.total_record_count + 1;
        let mut perf_writer = open_shard(&perf_path, &PERF_HEADERS)?;
        let mut qa_writer = open_shard(&qa_path, &QA_HEADERS)?;

        for (offset, stat) in inner.buffer.iter().enumerate() {
            let serial = start_serial + offset as u64;
            perf_writer.write_record(&[
                serial.to_string(),
                stat.request_id.clone(),
                stat.model.clone(),
                stat.arrival_time.clone(),
                stat.completion_time.clone(),
                stat.prompt_tokens.to_string(),
                stat.forward_cal_tokens.to_string(),
                stat.cached_tokens.to_string(),
                stat.completion_tokens.to_string(),
                stat.total_tokens.to_string(),
                stat.ttft_ms.to_string(),
                stat.tpot_ms.to_string(),
                stat.tps.to_string(),
                stat.e2e_latency_ms.to_string(),
                stat.chunk_count.to_string(),
            ])?;
            qa_writer.write_record(&[
                serial.to_string(),
                stat.request_id.clone(),
                stat.model.clone(),
                serde_json::to_string(&stat.messages)?,
                stat.response_content.clone(),
            ])?;
        }
        perf_writer.flush()?;
        qa_writer.flush()?;

        inner.file_record_count += inner.buffer.len() as u64;
        inner.total_record_count += inner.buffer.len() as u64;
        inner.buffer.clear();
        Ok(())
    }

    fn ensure_empty_shard(&self) -> Result<()> {
        let (perf_path, qa_path) = self.current_shard_paths(0);
        open_shard(&perf_path, &PERF_HEADERS)?.flush()?;
        open_shard(&qa_path, &QA_HEADERS)?.flush()?;
        Ok(())
    }
}

/// Opens a shard for appending, writing the UTF-8 BOM and header row only
/// if the file didn't already exist.
fn open_shard(path: &Path, headers: &[&str]) -> Result<csv::Writer<std::fs::File>> {
    let is_new = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if is_new {
        file.write_all(UTF8_BOM)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(headers)?;
    }
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stat(request_id: &str) -> Stat {
        Stat {
            request_id: request_id.to_string(),
            model: "gpt-4".to_string(),
            arrival_time: "2026-07-26 10:00:00".to_string(),
            completion_time: "2026-07-26 10:00:01".to_string(),
            prompt_tokens: 10,
            forward_cal_tokens: 0,
            cached_tokens: 0,
            completion_tokens: 5,
            total_tokens: 15,
            ttft_ms: 100.0,
            tpot_ms: 20.0,
            tps: 50.0,
            e2e_latency_ms: 200.0,
            chunk_count: 6,
            messages: serde_json::json!([{"role": "user", "content": "hi"}]),
            response_content: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn flush_batch_triggers_eager_flush() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(
            dir.path(),
            WriterConfig {
                max_per_file: 1000,
                flush_batch: 2,
                flush_interval: Duration::from_secs(3600),
            },
        )
        .unwrap();

        writer.add_record(sample_stat("a")).await.unwrap();
        assert!(!dir.path().join("performance_data_0.csv").exists());
        writer.add_record(sample_stat("b")).await.unwrap();
        assert!(dir.path().join("performance_data_0.csv").exists());
        assert_eq!(writer.total_records().await, 2);
    }

    #[tokio::test]
    async fn rotation_creates_new_shard_index() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(
            dir.path(),
            WriterConfig {
                max_per_file: 1,
                flush_batch: 1,
                flush_interval: Duration::from_secs(3600),
            },
        )
        .unwrap();

        writer.add_record(sample_stat("a")).await.unwrap();
        writer.add_record(sample_stat("b")).await.unwrap();
        assert!(dir.path().join("performance_data_0.csv").exists());
        assert!(dir.path().join("performance_data_1.csv").exists());
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(dir.path(), WriterConfig::default()).unwrap();
        writer.add_record(sample_stat("a")).await.unwrap();
        writer.finalize().await.unwrap();
        writer.finalize().await.unwrap();
        assert!(dir.path().join("performance_summary.json").exists());
    }

    #[tokio::test]
    async fn immediate_finalize_yields_header_only_shard_and_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(dir.path(), WriterConfig::default()).unwrap();
        writer.finalize().await.unwrap();

        let perf = std::fs::read_to_string(dir.path().join("performance_data_0.csv")).unwrap();
        assert!(perf.contains("request_id"));

        let summary =
            std::fs::read_to_string(dir.path().join("performance_summary.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed["total_requests"], 0);
    }

    #[tokio::test]
    async fn bom_written_once_per_shard() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::new(
            dir.path(),
            WriterConfig {
                max_per_file: 1000,
                flush_batch: 1,
                flush_interval: Duration::from_secs(3600),
            },
        )
        .unwrap();
        writer.add_record(sample_stat("a")).await.unwrap();
        writer.add_record(sample_stat("b")).await.unwrap();

        let bytes = std::fs::read(dir.path().join("performance_data_0.csv")).unwrap();
        assert_eq!(&bytes[..3], UTF8_BOM);
        let rest = &bytes[3..];
        assert_eq!(rest.iter().filter(|&&b| b == b'\xef').count(), 0);
    }
}
