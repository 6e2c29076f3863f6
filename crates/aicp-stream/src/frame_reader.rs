//! C1: stateful byte-stream -> sequence of complete SSE frames
//!
//! Frames are delimited by a blank line (`\n\n`), matching the manual
//! `\n\n`-boundary scan the upstream forwarder performs on raw chunks
//! rather than a strict SSE parser — this tolerates servers that omit the
//! terminal blank line or append a usage-only trailing chunk.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

use aicp_core::{Error, Result};

const DELIMITER: &[u8] = b"\n\n";

/// Holds the carry buffer between arrivals of upstream bytes.
#[derive(Debug, Default)]
pub struct FrameReader {
    carry: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly arrived bytes and drain as many complete frames as the
    /// carry buffer now contains, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.carry) {
            let boundary = pos + DELIMITER.len();
            let frame = self.carry.split_to(boundary).freeze();
            frames.push(frame);
        }
        frames
    }

    /// Called once at end-of-stream. Returns the residual carry, if any,
    /// as a best-effort trailing frame.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.carry.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.carry).freeze())
        }
    }

    /// Discard the carry without emitting it, used when the underlying
    /// source errors mid-stream.
    pub fn discard(&mut self) {
        self.carry.clear();
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

struct ReadState<S> {
    source: S,
    reader: FrameReader,
    pending: VecDeque<Bytes>,
    done: bool,
}

/// Wrap an upstream byte stream (e.g. `reqwest::Response::bytes_stream`)
/// into a stream of complete SSE frames.
///
/// Frames are emitted in arrival order; their concatenation equals the
/// full byte stream. On a source error the carry is discarded and a
/// single `UpstreamReadError` is emitted before the stream ends.
pub fn read_frames<S, E>(source: S) -> impl Stream<Item = Result<Bytes>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let state = ReadState {
        source,
        reader: FrameReader::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }
            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.reader.push(&chunk);
                    state.pending.extend(frames);
                    continue;
                }
                Some(Err(err)) => {
                    state.done = true;
                    state.reader.discard();
                    return Some((Err(Error::UpstreamReadError(err.to_string())), state));
                }
                None => {
                    state.done = true;
                    if let Some(trailing) = state.reader.finish() {
                        state.pending.push_back(trailing);
                        continue;
                    }
                    return None;
                }
            }
        }
    })
}
