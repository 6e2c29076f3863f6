//! Pluggable analysis engine registry
//!
//! Stubbed out per the design notes: the core depends only on the
//! `AnalysisEngine` trait and never requires any engine to be registered.
//! A future iteration may ship a concrete engine that reads a summary and
//! a record set and proposes `Suggestion`s (e.g. "decode throughput is in
//! the bottom decile, check for contention on the KV cache").

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::stat::Stat;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionCategory {
    Prefill,
    Decode,
    Cache,
    LatencyTail,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: SuggestionCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    #[serde(default)]
    pub metrics_evidence: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub engine_name: String,
    pub engine_version: String,
    pub task_id: String,
    pub suggestions: Vec<Suggestion>,
    pub summary: String,
    pub raw_data: Option<serde_json::Value>,
}

/// A plugin that turns a task's summary and records into suggestions.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    async fn analyze(
        &self,
        task_id: &str,
        summary: &serde_json::Value,
        records: &[Stat],
    ) -> Result<AnalysisResult>;
}

/// Registry and executor for analysis engine plugins. Starts empty; no
/// core logic depends on any engine being registered.
#[derive(Default)]
pub struct AnalysisEngineManager {
    engines: RwLock<HashMap<String, Box<dyn AnalysisEngine>>>,
}

impl AnalysisEngineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, engine: Box<dyn AnalysisEngine>) {
        let mut engines = self.engines.write().await;
        engines.insert(engine.name().to_string(), engine);
    }

    pub async fn unregister(&self, name: &str) {
        self.engines.write().await.remove(name);
    }

    pub async fn list_engines(&self) -> Vec<String> {
        self.engines.read().await.keys().cloned().collect()
    }

    pub async fn analyze(
        &self,
        task_id: &str,
        summary: &serde_json::Value,
        records: &[Stat],
        engine_name: Option<&str>,
    ) -> Result<Vec<AnalysisResult>> {
        let engines = self.engines.read().await;
        let targets: Vec<&Box<dyn AnalysisEngine>> = match engine_name {
            Some(name) => engines.get(name).into_iter().collect(),
            None => engines.values().collect(),
        };

        let mut results = Vec::with_capacity(targets.len());
        for engine in targets {
            results.push(engine.analyze(task_id, summary, records).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_returns_no_results() {
        let manager = AnalysisEngineManager::new();
        let results = manager
            .analyze("collect_001", &serde_json::json!({}), &[], None)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(manager.list_engines().await.is_empty());
    }
}
