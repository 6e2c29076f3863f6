//! C7: the benchmark replayer.
//!
//! - [`dataset`]: loads the QA pairs a prior collection session captured.
//! - [`replay`]: sends one replayed request and folds its response into
//!   a `Stat`.
//! - [`runner`]: dispatches a replay run (sequential or concurrency-bounded),
//!   tracks progress, and persists results through a `RotatingWriter`.

pub mod dataset;
pub mod replay;
pub mod runner;

pub use dataset::{load_dataset, QaRecord};
pub use runner::{
    BenchmarkRequest, BenchmarkRunner, BenchmarkStatus, Progress, ReplayMode, StartedBenchmark,
};
