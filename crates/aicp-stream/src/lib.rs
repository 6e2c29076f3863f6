//! The SSE-aware forwarding pipeline's byte-to-metrics stages.
//!
//! - [`frame_reader`]: C1, byte stream to complete SSE frames.
//! - [`decoder`]: C2, a frame's `data:` lines to model events.
//! - [`aggregator`]: C3, events folded into a per-request `Stat`.

pub mod aggregator;
pub mod decoder;
pub mod frame_reader;

pub use aggregator::MetricsAggregator;
pub use decoder::{decode_frame, ChunkEvent};
pub use frame_reader::{read_frames, FrameReader};
