//! C6: the proxy forwarder.
//!
//! `forward` is the sole entry point: sanitizes headers, optionally
//! rewrites the payload to force SSE streaming for metrics collection,
//! dispatches upstream, and picks one of three response modes depending
//! on whether metrics collection was requested and whether the client's
//! own request was already streaming.

use std::sync::Arc;
use std::time::Instant;

use aicp_collect::CollectionManager;
use aicp_core::error::Error;
use aicp_stream::{decode_frame, read_frames, MetricsAggregator};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};

const HOP_BY_HOP: &[&str] = &["host", "content-length", "transfer-encoding"];

#[derive(Clone)]
pub struct ProxyState {
    pub client: Client,
    pub collection: Arc<CollectionManager>,
}

/// Drops hop-by-hop headers the upstream dispatch recomputes itself;
/// forwards everything else verbatim.
fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

struct PayloadRewrite {
    body: Bytes,
    model: String,
    messages: Value,
    original_include_usage: bool,
    force_conversion: bool,
}

/// Forces `stream: true` and `stream_options.include_usage: true` on a
/// JSON object body, recording what the caller originally asked for.
/// Returns `None` (metrics collection disabled for this request) if the
/// body doesn't parse as a JSON object.
fn rewrite_payload(body: &Bytes) -> Option<PayloadRewrite> {
    let mut value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object_mut()?;

    let original_stream = object.get("stream").and_then(Value::as_bool).unwrap_or(false);
    object.insert("stream".to_string(), json!(true));

    if !object.get("stream_options").is_some_and(Value::is_object) {
        object.insert("stream_options".to_string(), json!({}));
    }
    let stream_options = object
        .get_mut("stream_options")
        .and_then(Value::as_object_mut)
        .expect("just ensured stream_options is an object");
    let original_include_usage = stream_options
        .get("include_usage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    stream_options.insert("include_usage".to_string(), json!(true));

    let model = object
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let messages = object.get("messages").cloned().unwrap_or_else(|| json!([]));

    let rewritten = serde_json::to_vec(&value).ok()?;
    Some(PayloadRewrite {
        body: Bytes::from(rewritten),
        model,
        messages,
        original_include_usage,
        force_conversion: !original_stream,
    })
}

/// Forwards one client request to `target_host:target_port` + `path`.
/// `collect_metrics` selects between plain passthrough and one of the two
/// metrics-collecting response modes.
pub async fn forward(
    state: &ProxyState,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
    target_host: &str,
    target_port: u16,
    path: &str,
    collect_metrics: bool,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let arrival_epoch = chrono::Utc::now().timestamp();

    let mut fwd_headers = sanitize_headers(&headers);
    let mut dispatch_body = body.clone();
    let mut collection_meta = None;

    if collect_metrics {
        match rewrite_payload(&body) {
            Some(rewrite) => {
                dispatch_body = rewrite.body;
                collection_meta = Some((
                    rewrite.model,
                    rewrite.messages,
                    rewrite.original_include_usage,
                    rewrite.force_conversion,
                ));
            }
            None => {
                // Body isn't a rewritable JSON object: fall back to plain
                // passthrough for this request.
            }
        }
    }
    fwd_headers.insert(
        HeaderName::from_static("content-length"),
        HeaderValue::from_str(&dispatch_body.len().to_string()).unwrap(),
    );

    let url = format!("http://{target_host}:{target_port}{path}");
    let upstream = state
        .client
        .request(method.clone(), &url)
        .headers(fwd_headers)
        .body(dispatch_body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(err) => {
            let message = Error::UpstreamDispatchError(err.to_string()).to_string();
            return (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({"error": message})),
            )
                .into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let Some((model, messages, original_include_usage, force_conversion)) = collection_meta else {
        return passthrough(upstream, status, &content_type);
    };

    let byte_stream = upstream.bytes_stream().boxed();
    let aggregator = MetricsAggregator::new(request_id.clone(), model, messages);

    if force_conversion {
        reassemble(
            byte_stream,
            aggregator,
            state.collection.clone(),
            status,
            request_id,
            arrival_epoch,
            original_include_usage,
        )
        .await
    } else {
        stream_with_capture(byte_stream, aggregator, state.collection.clone(), status)
    }
}

fn passthrough(
    upstream: reqwest::Response,
    status: StatusCode,
    content_type: &str,
) -> Response {
    let body = Body::from_stream(upstream.bytes_stream());
    Response::builder()
        .status(status)
        .header(reqwest::header::CONTENT_TYPE.as_str(), content_type)
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

type BoxedByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Streaming-with-capture: each complete frame is handed to the client as
/// soon as C1 emits it, while C2/C3 fold it into the aggregator on the
/// same task. The stat is recorded once the upstream stream ends, after
/// the client response has already been fully served.
fn stream_with_capture(
    byte_stream: BoxedByteStream,
    mut aggregator: MetricsAggregator,
    collection: Arc<CollectionManager>,
    status: StatusCode,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Error>>(16);

    tokio::spawn(async move {
        let mut frames = Box::pin(read_frames(byte_stream));
        while let Some(frame_result) = frames.next().await {
            match frame_result {
                Ok(frame) => {
                    for line_events in decode_frame(&frame) {
                        aggregator.record_line(&line_events);
                    }
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
        let stat = aggregator.finish(Instant::now());
        if let Err(err) = collection.add_record(stat).await {
            tracing::warn!(error = %err, "failed to record streaming stat");
        }
    });

    let body = Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));

    Response::builder()
        .status(status)
        .header(reqwest::header::CONTENT_TYPE.as_str(), "text/event-stream")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Reassembly: the whole upstream stream is consumed before anything is
/// returned to the client, which then receives a single non-streaming
/// chat-completion body.
#[allow(clippy::too_many_arguments)]
async fn reassemble(
    byte_stream: BoxedByteStream,
    mut aggregator: MetricsAggregator,
    collection: Arc<CollectionManager>,
    status: StatusCode,
    request_id: String,
    arrival_epoch: i64,
    original_include_usage: bool,
) -> Response {
    let mut frames = Box::pin(read_frames(byte_stream));
    while let Some(frame_result) = frames.next().await {
        match frame_result {
            Ok(frame) => {
                for line_events in decode_frame(&frame) {
                    aggregator.record_line(&line_events);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "upstream read failed during reassembly");
                break;
            }
        }
    }

    let server_id = aggregator.server_id().map(str::to_string);
    let finish_reason = aggregator.finish_reason().to_string();
    let model = aggregator.model().to_string();
    let usage = aggregator.usage_data().cloned();
    let content = aggregator.response_content().to_string();

    let stat = aggregator.finish(Instant::now());
    if let Err(err) = collection.add_record(stat).await {
        tracing::warn!(error = %err, "failed to record reassembled stat");
    }

    let mut body = json!({
        "id": server_id.unwrap_or(request_id),
        "object": "chat.completion",
        "created": arrival_epoch,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason,
        }],
    });
    if original_include_usage {
        if let Some(usage) = usage {
            body["usage"] = usage;
        }
    }

    (status, axum::Json(body)).into_response()
}
