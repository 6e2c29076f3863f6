//! Loads the QA dataset a benchmark run replays, from a prior collection
//! session's data directory: `qa_pairs.json` if the session ever
//! finalized, otherwise its `qa_pairs_*.csv` shards concatenated.

use std::path::Path;

use aicp_core::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct QaRecord {
    pub model: Option<String>,
    pub messages: Value,
}

#[derive(Debug, Deserialize)]
struct RawJsonRecord {
    model: Option<String>,
    messages: Value,
}

pub fn load_dataset(source_dir: &Path) -> Result<Vec<QaRecord>> {
    let json_path = source_dir.join("qa_pairs.json");
    if json_path.exists() {
        let text = std::fs::read_to_string(&json_path)?;
        let raw: Vec<RawJsonRecord> = serde_json::from_str(&text)?;
        return Ok(raw.into_iter().map(|r| QaRecord {
            model: r.model,
            messages: normalize_messages(r.messages),
        }).collect());
    }

    let mut shard_paths: Vec<_> = std::fs::read_dir(source_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("qa_pairs_") && n.ends_with(".csv"))
        })
        .collect();
    shard_paths.sort();

    if shard_paths.is_empty() {
        return Err(Error::InvalidRequest(
            "no QA data in source task".to_string(),
        ));
    }

    let mut records = Vec::new();
    for path in shard_paths {
        let bytes = std::fs::read(&path)?;
        let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(&bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);
        for record in reader.records() {
            let record = record?;
            let model = record.get(2).filter(|v| !v.is_empty()).map(str::to_string);
            let messages_field = record.get(3).unwrap_or_default();
            records.push(QaRecord {
                model,
                messages: normalize_messages_str(messages_field),
            });
        }
    }
    Ok(records)
}

/// A `messages` field may already be a JSON array, or it may be a
/// JSON-encoded string (as stored in a CSV shard); a non-JSON string
/// becomes a single user message, matching the replay source's own
/// tolerance for hand-authored datasets.
fn normalize_messages(value: Value) -> Value {
    match value {
        Value::String(text) => normalize_messages_str(&text),
        other => other,
    }
}

fn normalize_messages_str(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| {
        serde_json::json!([{"role": "user", "content": text}])
    })
}
