//! C4: the rotating writer.
//!
//! Buffered, mutex-guarded append to CSV shards with periodic flush,
//! size-based rotation, and a final JSON summary. One `RotatingWriter` is
//! created per collection or benchmark session.

mod summary;
mod writer;

pub use summary::{MetricStats, Summary};
pub use writer::{RotatingWriter, WriterConfig};
