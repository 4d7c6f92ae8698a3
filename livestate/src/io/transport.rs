//! Transport abstraction for live telemetry.
//!
//! The [`Transport`] trait decouples the channel's retry and fallback logic
//! from the wire. [`HttpTransport`] speaks SSE for the live stream and plain
//! JSON for status polls; tests use a scripted transport that hands out
//! predetermined streams and snapshots without touching the network.

use std::future::Future;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::ACCEPT;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

/// Transient transport failures. The channel retries, then falls back to
/// polling; none of these reach the user except as a phase change.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("connect {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("status poll failed: {0}")]
    Poll(String),
    #[error("undecodable payload: {0}")]
    Decode(String),
}

/// Raw JSON records from a live stream, in arrival order.
pub type EventStream = BoxStream<'static, Result<Value, ChannelError>>;

pub trait Transport: Send + Sync + 'static {
    /// Open the live stream for one execution.
    fn open_stream(
        &self,
        execution_id: &str,
    ) -> impl Future<Output = Result<EventStream, ChannelError>> + Send;

    /// Fetch one status snapshot for an execution.
    fn fetch_status(
        &self,
        execution_id: &str,
    ) -> impl Future<Output = Result<Value, ChannelError>> + Send;
}

/// HTTP transport: `GET {base}/executions/{id}/events` as `text/event-stream`
/// and `GET {base}/executions/{id}/status` as JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, execution_id: &str, leaf: &str) -> String {
        format!("{}/executions/{}/{}", self.base_url, execution_id, leaf)
    }
}

impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn open_stream(&self, execution_id: &str) -> Result<EventStream, ChannelError> {
        let url = self.url(execution_id, "events");
        let connect_error = |reason: String| ChannelError::Connect {
            url: url.clone(),
            reason,
        };
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| connect_error(err.to_string()))?
            .error_for_status()
            .map_err(|err| connect_error(err.to_string()))?;
        debug!(url = %url, "event stream open");

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for payload in decoder.push(&chunk) {
                            yield decode_payload(&payload);
                        }
                    }
                    Err(err) => {
                        yield Err(ChannelError::Stream(err.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    #[instrument(skip(self))]
    async fn fetch_status(&self, execution_id: &str) -> Result<Value, ChannelError> {
        let url = self.url(execution_id, "status");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ChannelError::Poll(err.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|err| ChannelError::Decode(err.to_string()))
    }
}

fn decode_payload(payload: &str) -> Result<Value, ChannelError> {
    serde_json::from_str(payload)
        .map_err(|err| ChannelError::Decode(format!("{}: {}", err, payload)))
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Collects `data:` lines until a blank line ends the event, then yields the
/// joined payload. Comments (`:`) and other fields (`event:`, `id:`, `retry:`)
/// are ignored. Chunk boundaries may fall anywhere, including inside a
/// multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one chunk; returns the payloads of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_data_lines_until_blank_line() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(b": ping\nevent: telemetry\ndata: {\"a\":\ndata: 1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":\n1}".to_string()]);
        assert_eq!(decode_payload(&payloads[0]), Ok(serde_json::json!({"a": 1})));
    }

    /// Frames split across chunks (even mid-character) decode once complete.
    #[test]
    fn decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        let frame = "data: {\"message\":\"café\"}\r\n\r\n".as_bytes();
        let split = frame.len() - 7;
        assert!(decoder.push(&frame[..split]).is_empty());
        let payloads = decoder.push(&frame[split..]);
        assert_eq!(payloads, vec!["{\"message\":\"café\"}".to_string()]);
    }

    #[test]
    fn decode_reports_invalid_json() {
        assert!(matches!(decode_payload("not json"), Err(ChannelError::Decode(_))));
    }

    #[test]
    fn http_urls_are_scoped_to_execution() {
        let transport = HttpTransport::new("http://localhost:8000/api/");
        assert_eq!(
            transport.url("exec-1", "events"),
            "http://localhost:8000/api/executions/exec-1/events"
        );
    }
}
