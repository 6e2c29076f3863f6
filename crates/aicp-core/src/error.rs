//! Error types shared across the proxy/collection/benchmark pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("upstream dispatch failed: {0}")]
    UpstreamDispatchError(String),

    #[error("upstream read failed mid-stream: {0}")]
    UpstreamReadError(String),

    #[error("upstream request timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("malformed SSE frame: {0}")]
    MalformedSSEFrame(String),

    #[error("malformed data line: {0}")]
    MalformedDataLine(String),

    #[error("request payload could not be rewritten for metrics collection")]
    PayloadRewriteFailure,

    #[error("a collection session is already active: {0}")]
    SessionBusy(String),

    #[error("task id {0} is not the active session")]
    WrongTask(String),

    #[error("filesystem write failed: {0}")]
    FilesystemWriteError(#[from] std::io::Error),

    #[error("summary generation failed: {0}")]
    SummaryGenerationError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("configuration not found")]
    ConfigNotFound,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
