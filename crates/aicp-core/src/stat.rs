//! The per-request performance record produced by the metrics aggregator
//! and consumed by the rotating writer.

use serde::{Deserialize, Serialize};

/// One fully-formed measurement of a proxied or replayed request.
///
/// A `Stat` is the atomic unit handed from the metrics aggregator (C3) to
/// the collection session manager (C5) or benchmark replayer (C7), and
/// from there to a rotating writer (C4), which reshapes it into the fixed
/// CSV column order on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stat {
    pub request_id: String,
    pub model: String,
    pub arrival_time: String,
    pub completion_time: String,
    pub prompt_tokens: u64,
    /// Reserved column, always 0 in this system.
    pub forward_cal_tokens: u64,
    pub cached_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub ttft_ms: f64,
    pub tpot_ms: f64,
    pub tps: f64,
    pub e2e_latency_ms: f64,
    pub chunk_count: u64,
    /// Verbatim request messages, preserved for replay.
    pub messages: serde_json::Value,
    /// Concatenation of observed content deltas.
    pub response_content: String,
}

/// Fixed column order for `performance_data_<k>.csv`. Never change.
pub const PERF_HEADERS: [&str; 15] = [
    "序号",
    "request_id",
    "model",
    "arrival_time",
    "completion_time",
    "prompt_tokens",
    "forward_cal_tokens",
    "cached_tokens",
    "completion_tokens",
    "total_tokens",
    "ttft_ms",
    "tpot_ms",
    "tps",
    "e2e_latency_ms",
    "chunk_count",
];

/// Fixed column order for `qa_pairs_<k>.csv`. Never change.
pub const QA_HEADERS: [&str; 5] = ["序号", "request_id", "model", "messages", "response_content"];
