//! Final summary pass: concatenates every `performance_data_*.csv` /
//! `qa_pairs_*.csv` shard in a data directory and writes
//! `performance_summary.json` / `qa_pairs.json`.

use std::path::{Path, PathBuf};

use aicp_core::error::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct MetricStats {
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct CachedTokenStats {
    pub avg: f64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub ttft_ms: MetricStats,
    pub tpot_ms: MetricStats,
    pub tps: MetricStats,
    pub e2e_latency_ms: MetricStats,
    pub prompt_tokens: MetricStats,
    pub completion_tokens: MetricStats,
    pub cached_tokens: CachedTokenStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_requests: u64,
    pub time_range: TimeRange,
    pub summary: MetricsSummary,
}

struct PerfRow {
    arrival_time: String,
    completion_time: String,
    prompt_tokens: f64,
    cached_tokens: f64,
    completion_tokens: f64,
    ttft_ms: f64,
    tpot_ms: f64,
    tps: f64,
    e2e_latency_ms: f64,
}

/// Reads every `performance_data_*.csv` and `qa_pairs_*.csv` shard in
/// `data_dir`, in shard-index order, and writes the two consolidated
/// summary artifacts next to them.
pub async fn build_summary(data_dir: &Path) -> Result<()> {
    let perf_shards = shard_paths(data_dir, "performance_data_")?;
    let rows = read_perf_rows(&perf_shards)?;

    let time_range = match (rows.first(), rows.last()) {
        (Some(first), Some(last)) => TimeRange {
            start: first.arrival_time.clone(),
            end: last.completion_time.clone(),
        },
        _ => TimeRange {
            start: String::new(),
            end: String::new(),
        },
    };

    let summary = Summary {
        total_requests: rows.len() as u64,
        time_range,
        summary: MetricsSummary {
            ttft_ms: column_stats(rows.iter().map(|r| r.ttft_ms)),
            tpot_ms: column_stats(rows.iter().map(|r| r.tpot_ms)),
            tps: column_stats(rows.iter().map(|r| r.tps)),
            e2e_latency_ms: column_stats(rows.iter().map(|r| r.e2e_latency_ms)),
            prompt_tokens: column_stats(rows.iter().map(|r| r.prompt_tokens)),
            completion_tokens: column_stats(rows.iter().map(|r| r.completion_tokens)),
            cached_tokens: cached_token_stats(rows.iter().map(|r| r.cached_tokens)),
        },
    };

    let summary_path = data_dir.join("performance_summary.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;

    let qa_shards = shard_paths(data_dir, "qa_pairs_")?;
    let qa_rows = read_qa_rows(&qa_shards)?;
    let qa_path = data_dir.join("qa_pairs.json");
    std::fs::write(&qa_path, serde_json::to_string_pretty(&qa_rows)?)?;

    Ok(())
}

/// Lists shard files matching `<prefix><index>.csv` under `dir`, sorted by
/// the numeric shard index rather than lexical filename order.
fn shard_paths(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name.strip_prefix(prefix) {
            if let Some(index_str) = rest.strip_suffix(".csv") {
                if let Ok(index) = index_str.parse::<u64>() {
                    found.push((index, entry.path()));
                }
            }
        }
    }
    found.sort_by_key(|(index, _)| *index);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Reads a shard's bytes and strips the leading UTF-8 BOM, if present, so
/// the CSV reader doesn't see it as part of the first header field.
fn read_without_bom(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)?;
    if let Some(rest) = bytes.strip_prefix(b"\xef\xbb\xbf") {
        Ok(rest.to_vec())
    } else {
        Ok(bytes)
    }
}

fn read_perf_rows(paths: &[PathBuf]) -> Result<Vec<PerfRow>> {
    let mut rows = Vec::new();
    for path in paths {
        let bytes = read_without_bom(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes.as_slice());
        for record in reader.records() {
            let record = record?;
            rows.push(PerfRow {
                arrival_time: record.get(3).unwrap_or_default().to_string(),
                completion_time: record.get(4).unwrap_or_default().to_string(),
                prompt_tokens: parse_f64(record.get(5)),
                cached_tokens: parse_f64(record.get(7)),
                completion_tokens: parse_f64(record.get(8)),
                ttft_ms: parse_f64(record.get(10)),
                tpot_ms: parse_f64(record.get(11)),
                tps: parse_f64(record.get(12)),
                e2e_latency_ms: parse_f64(record.get(13)),
            });
        }
    }
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
struct QaRow {
    #[serde(rename = "序号")]
    seq: u64,
    request_id: String,
    model: String,
    messages: serde_json::Value,
    response_content: String,
}

fn read_qa_rows(paths: &[PathBuf]) -> Result<Vec<QaRow>> {
    let mut rows = Vec::new();
    for path in paths {
        let bytes = read_without_bom(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes.as_slice());
        for record in reader.records() {
            let record = record?;
            let messages_text = record.get(3).unwrap_or_default();
            let messages = serde_json::from_str(messages_text)
                .unwrap_or_else(|_| serde_json::Value::String(messages_text.to_string()));
            rows.push(QaRow {
                seq: record.get(0).and_then(|v| v.parse().ok()).unwrap_or(0),
                request_id: record.get(1).unwrap_or_default().to_string(),
                model: record.get(2).unwrap_or_default().to_string(),
                messages,
                response_content: record.get(4).unwrap_or_default().to_string(),
            });
        }
    }
    Ok(rows)
}

fn parse_f64(field: Option<&str>) -> f64 {
    field.and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

fn column_stats(values: impl Iterator<Item = f64>) -> MetricStats {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return MetricStats::default();
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let sum: f64 = sorted.iter().sum();
    MetricStats {
        avg: round2(sum / sorted.len() as f64),
        p50: round2(quantile(&sorted, 0.50)),
        p90: round2(quantile(&sorted, 0.90)),
        p99: round2(quantile(&sorted, 0.99)),
        min: round2(sorted[0]),
        max: round2(sorted[sorted.len() - 1]),
    }
}

fn cached_token_stats(values: impl Iterator<Item = f64>) -> CachedTokenStats {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return CachedTokenStats::default();
    }
    let sum: f64 = values.iter().sum();
    CachedTokenStats {
        avg: round2(sum / values.len() as f64),
        total: sum.round() as u64,
    }
}

/// Linear-interpolation quantile over an already-sorted slice, matching
/// the default method used when concatenating shards for the summary.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_matches_linear_interpolation() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.5), 2.5);
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn column_stats_on_empty_input_is_all_zero() {
        let stats = column_stats(std::iter::empty());
        assert_eq!(stats.avg, 0.0);
        assert_eq!(stats.p50, 0.0);
        assert_eq!(stats.max, 0.0);
    }

    #[test]
    fn column_stats_computes_avg_min_max() {
        let stats = column_stats(vec![10.0, 20.0, 30.0].into_iter());
        assert_eq!(stats.avg, 20.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
    }

    #[tokio::test]
    async fn build_summary_on_empty_dir_writes_zero_total() {
        let dir = tempfile::tempdir().unwrap();
        build_summary(dir.path()).await.unwrap();
        let summary =
            std::fs::read_to_string(dir.path().join("performance_summary.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed["total_requests"], 0);
        let qa = std::fs::read_to_string(dir.path().join("qa_pairs.json")).unwrap();
        assert_eq!(qa.trim(), "[]");
    }
}
