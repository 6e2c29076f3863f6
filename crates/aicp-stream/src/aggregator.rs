//! C3: fold decoder events into a per-request `Stat` record
//!
//! One aggregator is created per proxied or replayed request, seeded at
//! arrival, fed every decoded line until the stream ends, then consumed
//! into a `Stat` using the formulae from the data model.

use std::time::Instant;

use chrono::{DateTime, Local};
use serde_json::Value;

use aicp_core::Stat;

use crate::decoder::ChunkEvent;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct MetricsAggregator {
    request_id: String,
    model: String,
    messages: Value,
    arrival_instant: Instant,
    arrival_datetime: DateTime<Local>,
    arrival_time: String,
    first_token_instant: Option<Instant>,
    response_parts: String,
    chunk_count: u64,
    usage_data: Option<Value>,
    finish_reason: String,
    server_id: Option<String>,
}

impl MetricsAggregator {
    /// Seed the accumulator at request arrival. `model` is the
    /// request-payload value; it is overwritten by a later `ModelTag`.
    pub fn new(request_id: String, model: String, messages: Value) -> Self {
        let arrival_datetime = Local::now();
        Self {
            request_id,
            model,
            messages,
            arrival_instant: Instant::now(),
            arrival_datetime,
            arrival_time: arrival_datetime.format(TIME_FORMAT).to_string(),
            first_token_instant: None,
            response_parts: String::new(),
            chunk_count: 0,
            usage_data: None,
            finish_reason: "stop".to_string(),
            server_id: None,
        }
    }

    /// Fold the events decoded from one `data:` line. `chunk_count`
    /// increments once per successfully decoded line, regardless of how
    /// many events it yielded.
    pub fn record_line(&mut self, events: &[ChunkEvent]) {
        self.chunk_count += 1;
        for event in events {
            match event {
                ChunkEvent::ContentDelta(text) => {
                    if self.first_token_instant.is_none() {
                        self.first_token_instant = Some(Instant::now());
                    }
                    self.response_parts.push_str(text);
                }
                ChunkEvent::UsageReport(usage) => {
                    self.usage_data = Some(usage.clone());
                }
                ChunkEvent::ModelTag(model) => {
                    self.model = model.clone();
                }
                ChunkEvent::FinishReason(reason) => {
                    self.finish_reason = reason.clone();
                }
                ChunkEvent::ServerId(id) => {
                    if self.server_id.is_none() {
                        self.server_id = Some(id.clone());
                    }
                }
            }
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    pub fn finish_reason(&self) -> &str {
        &self.finish_reason
    }

    pub fn usage_data(&self) -> Option<&Value> {
        self.usage_data.as_ref()
    }

    pub fn response_content(&self) -> &str {
        &self.response_parts
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Consume the accumulator into a finished `Stat`. The caller supplies
    /// `completion_instant` so that timeout paths can pass the timeout
    /// instant instead of `Instant::now()`; `completion_time` is stamped
    /// as that instant's wall-clock equivalent, derived from the request's
    /// arrival time plus the elapsed monotonic duration, rather than a
    /// fresh `Local::now()` call.
    pub fn finish(self, completion_instant: Instant) -> Stat {
        let elapsed = completion_instant.saturating_duration_since(self.arrival_instant);
        let completion_time = (self.arrival_datetime
            + chrono::Duration::from_std(elapsed).unwrap_or_default())
        .format(TIME_FORMAT)
        .to_string();

        let ttft_ms = match self.first_token_instant {
            Some(first) => first.duration_since(self.arrival_instant).as_secs_f64() * 1000.0,
            None => 0.0,
        };
        let e2e_latency_ms =
            completion_instant.duration_since(self.arrival_instant).as_secs_f64() * 1000.0;

        let prompt_tokens = token_field(&self.usage_data, "prompt_tokens");
        let completion_tokens = token_field(&self.usage_data, "completion_tokens");
        let total_tokens = token_field(&self.usage_data, "total_tokens");
        let cached_tokens = cached_tokens(&self.usage_data);

        let output_count = if completion_tokens > 0 {
            completion_tokens
        } else {
            self.chunk_count.saturating_sub(1)
        };
        let decode_seconds = match self.first_token_instant {
            Some(first) => completion_instant.duration_since(first).as_secs_f64(),
            None => 0.0,
        };

        let tpot_ms = if output_count > 0 && decode_seconds > 0.0 {
            decode_seconds * 1000.0 / output_count as f64
        } else {
            0.0
        };
        let tps = if decode_seconds > 0.0 {
            output_count as f64 / decode_seconds
        } else {
            0.0
        };

        Stat {
            request_id: self.request_id,
            model: self.model,
            arrival_time: self.arrival_time,
            completion_time,
            prompt_tokens,
            forward_cal_tokens: 0,
            cached_tokens,
            completion_tokens,
            total_tokens,
            ttft_ms: round2(ttft_ms),
            tpot_ms: round2(tpot_ms),
            tps: round2(tps),
            e2e_latency_ms: round2(e2e_latency_ms),
            chunk_count: self.chunk_count,
            messages: self.messages,
            response_content: self.response_parts,
        }
    }
}

fn token_field(usage: &Option<Value>, field: &str) -> u64 {
    usage
        .as_ref()
        .and_then(|u| u.get(field))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn cached_tokens(usage: &Option<Value>) -> u64 {
    let Some(usage) = usage else {
        return 0;
    };
    usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(Value::as_u64)
        .or_else(|| usage.get("num_cached_tokens").and_then(Value::as_u64))
        .unwrap_or(0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
