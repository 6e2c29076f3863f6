//! Sends one replayed request and folds its response into a `Stat`,
//! exactly as the proxy forwarder does, but without a client to stream
//! back to. A dispatch or mid-stream failure still yields a (mostly
//! zero) stat rather than aborting the run — isolation between records
//! is the point of this module.

use std::time::{Duration, Instant};

use aicp_core::stat::Stat;
use aicp_stream::{decode_frame, read_frames, MetricsAggregator};
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;

use crate::dataset::QaRecord;

pub async fn send_one(client: &Client, url: &str, record: &QaRecord, timeout: Duration) -> Stat {
    let request_id = uuid::Uuid::new_v4().to_string();
    let model = record.model.clone().unwrap_or_else(|| "default".to_string());
    let messages = record.messages.clone();
    let mut aggregator = MetricsAggregator::new(request_id, model.clone(), messages.clone());

    let payload = json!({
        "model": model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });

    if let Ok(response) = client.post(url).timeout(timeout).json(&payload).send().await {
        let byte_stream = response.bytes_stream().boxed();
        let mut frames = Box::pin(read_frames(byte_stream));
        while let Some(frame_result) = frames.next().await {
            match frame_result {
                Ok(frame) => {
                    for line_events in decode_frame(&frame) {
                        aggregator.record_line(&line_events);
                    }
                }
                Err(_) => break,
            }
        }
    }

    aggregator.finish(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_one_records_content_and_usage() {
        let mock_server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":1}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let record = QaRecord {
            model: Some("gpt-4".to_string()),
            messages: serde_json::json!([{"role": "user", "content": "hi"}]),
        };
        let client = Client::new();
        let stat = send_one(&client, &mock_server.uri(), &record, Duration::from_secs(5)).await;
        assert_eq!(stat.response_content, "Hi");
        assert_eq!(stat.prompt_tokens, 2);
    }

    #[tokio::test]
    async fn send_one_against_unreachable_host_yields_zeroed_stat() {
        let record = QaRecord {
            model: Some("gpt-4".to_string()),
            messages: serde_json::json!([]),
        };
        let client = Client::new();
        let stat = send_one(
            &client,
            "http://127.0.0.1:1",
            &record,
            Duration::from_millis(200),
        )
        .await;
        assert_eq!(stat.chunk_count, 0);
        assert_eq!(stat.response_content, "");
    }
}
