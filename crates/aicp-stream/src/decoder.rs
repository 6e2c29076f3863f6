//! C2: decode a frame's `data:` lines into model events
//!
//! Malformed lines are silently skipped — a single non-conforming event
//! must never abort a running inference (see the error handling design).

use serde_json::Value;

const DATA_PREFIX: &str = "data: ";

/// One decoded signal extracted from a `data:` line's JSON body.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    ContentDelta(String),
    UsageReport(Value),
    ModelTag(String),
    FinishReason(String),
    ServerId(String),
}

/// Decode a single complete SSE frame (bytes ending in `\n\n`, or a
/// best-effort trailing fragment) into zero or more events, one group per
/// `data:` line within the frame.
pub fn decode_frame(frame: &[u8]) -> Vec<Vec<ChunkEvent>> {
    let text = String::from_utf8_lossy(frame);
    text.lines().filter_map(decode_line).collect()
}

fn decode_line(line: &str) -> Option<Vec<ChunkEvent>> {
    let line = line.trim_end_matches('\r');
    if !line.starts_with(DATA_PREFIX) {
        return None;
    }
    let body = line[DATA_PREFIX.len()..].trim();
    if body.is_empty() || body == "[DONE]" {
        return None;
    }

    let value: Value = serde_json::from_str(body).ok()?;
    Some(events_from_value(&value))
}

fn events_from_value(value: &Value) -> Vec<ChunkEvent> {
    let mut events = Vec::new();

    if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
        events.push(ChunkEvent::UsageReport(usage.clone()));
    }
    if let Some(model) = value.get("model").and_then(Value::as_str) {
        events.push(ChunkEvent::ModelTag(model.to_string()));
    }
    if let Some(id) = value.get("id").and_then(Value::as_str) {
        events.push(ChunkEvent::ServerId(id.to_string()));
    }

    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        if let Some(content) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
        {
            if !content.is_empty() {
                events.push(ChunkEvent::ContentDelta(content.to_string()));
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            events.push(ChunkEvent::FinishReason(reason.to_string()));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_content_delta() {
        let frame = b"data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n";
        let groups = decode_frame(frame);
        assert_eq!(groups, vec![vec![ChunkEvent::ContentDelta("A".into())]]);
    }

    #[test]
    fn decodes_usage_only_chunk() {
        let frame = b"data: {\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":1}}\n\n";
        let groups = decode_frame(frame);
        assert_eq!(groups.len(), 1);
        assert!(matches!(groups[0][0], ChunkEvent::UsageReport(_)));
    }

    #[test]
    fn skips_done_and_empty_lines() {
        let frame = b"data: [DONE]\n\n";
        assert!(decode_frame(frame).is_empty());
        assert!(decode_frame(b"data: \n\n").is_empty());
    }

    #[test]
    fn skips_malformed_json_silently() {
        let frame = b"data: not-json\n\n";
        assert!(decode_frame(frame).is_empty());
    }

    #[test]
    fn empty_content_delta_is_not_emitted() {
        let frame = b"data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n";
        let groups = decode_frame(frame);
        assert!(groups.is_empty() || groups[0].is_empty());
    }

    #[test]
    fn ignores_non_data_lines() {
        let frame = b"event: ping\ndata: {\"model\":\"gpt-x\"}\n\n";
        let groups = decode_frame(frame);
        assert_eq!(groups, vec![vec![ChunkEvent::ModelTag("gpt-x".into())]]);
    }
}
