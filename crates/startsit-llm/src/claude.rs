// Claude grading backend using reqwest-eventsource.
//
// Sends the grading prompt to the Anthropic Messages API with `stream: true`,
// accumulates the text deltas from the Server-Sent Events, and parses the
// completed text into a `GradeResult`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::Value;
use startsit_core::UpstreamError;
use tracing::{debug, warn};

use crate::client::{classify_status, classify_transport, GradePrompt, GradeResult, Grader};
use crate::parse::parse_grade_response;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const SERVICE: &str = "claude";

// ---------------------------------------------------------------------------
// ClaudeGrader
// ---------------------------------------------------------------------------

/// Claude API streaming grader.
pub struct ClaudeGrader {
    http: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
    timeout: Duration,
}

impl ClaudeGrader {
    /// Create a new grader with the given API key, model identifier and
    /// per-call timeout.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            api_url: ANTHROPIC_API_URL.to_string(),
            timeout,
        }
    }

    /// Point the grader at a different Messages endpoint.
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = url;
        self
    }

    /// Send a message to the Claude API and collect the streamed text.
    ///
    /// Returns when `message_stop` arrives, the stream ends, or an error
    /// occurs. A stream that ends without any text is an invalid response.
    pub async fn stream_message(
        &self,
        system: &str,
        user_content: &str,
        max_tokens: u32,
    ) -> Result<String, UpstreamError> {
        if self.api_key.is_empty() {
            return Err(UpstreamError::rejected(SERVICE, "API key not configured"));
        }

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "stream": true,
            "system": system,
            "messages": [{ "role": "user", "content": user_content }]
        });

        let request = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let mut es = request.eventsource().map_err(|e| {
            UpstreamError::rejected(SERVICE, format!("failed to create event source: {e}"))
        })?;

        let mut full_text = String::new();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    let event_type = msg.event.as_str();
                    let data = &msg.data;

                    match event_type {
                        "content_block_delta" => {
                            if let Some(text) = parse_delta_text(data) {
                                full_text.push_str(&text);
                            }
                        }
                        "message_stop" => {
                            debug!(chars = full_text.len(), "message_stop");
                            es.close();
                            return Ok(full_text);
                        }
                        "error" => {
                            es.close();
                            return Err(parse_stream_error(data));
                        }
                        _ => {
                            debug!(event_type, "ignoring SSE event");
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    es.close();
                    return Err(classify_stream_error(&err, self.timeout));
                }
            }
        }

        if full_text.is_empty() {
            Err(UpstreamError::invalid_response(
                SERVICE,
                "stream ended without any content",
            ))
        } else {
            Ok(full_text)
        }
    }
}

#[async_trait]
impl Grader for ClaudeGrader {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn grade(&self, prompt: &GradePrompt) -> Result<GradeResult, UpstreamError> {
        let text = tokio::time::timeout(
            self.timeout,
            self.stream_message(&prompt.system, &prompt.user, prompt.max_tokens),
        )
        .await
        .map_err(|_| UpstreamError::timeout(SERVICE, self.timeout))??;

        parse_grade_response(&text)
            .map_err(|reason| UpstreamError::invalid_response(SERVICE, reason))
    }
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// Extract `delta.text` from a `content_block_delta` event's JSON.
pub(crate) fn parse_delta_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

/// Map an in-stream `error` event. `overloaded_error` and `api_error` are
/// transient; anything else is a rejection.
fn parse_stream_error(data: &str) -> UpstreamError {
    let parsed: Option<(String, String)> = serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            let kind = err.get("type")?.as_str()?.to_string();
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some((kind, message))
        });

    match parsed {
        Some((kind, message)) if kind == "overloaded_error" || kind == "api_error" => {
            UpstreamError::unavailable(SERVICE, format!("{kind}: {message}"))
        }
        Some((kind, message)) => UpstreamError::rejected(SERVICE, format!("{kind}: {message}")),
        None => UpstreamError::invalid_response(SERVICE, "unparseable error event"),
    }
}

/// Map an SSE transport or protocol error onto the upstream taxonomy.
fn classify_stream_error(err: &reqwest_eventsource::Error, timeout: Duration) -> UpstreamError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            classify_status(SERVICE, *status)
        }
        reqwest_eventsource::Error::Transport(e) => classify_transport(SERVICE, e, timeout),
        reqwest_eventsource::Error::InvalidContentType(_, _) => {
            UpstreamError::invalid_response(SERVICE, "response was not an event stream")
        }
        other => UpstreamError::unavailable(SERVICE, format!("stream error: {other}")),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use startsit_core::model::Grade;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // -- SSE JSON parsing tests --

    #[test]
    fn parse_content_block_delta_text() {
        let data = r#"{
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "GRADE: B" }
        }"#;
        assert_eq!(parse_delta_text(data), Some("GRADE: B".to_string()));
        assert_eq!(parse_delta_text(r#"{ "type": "content_block_delta" }"#), None);
    }

    #[test]
    fn overloaded_stream_error_is_retryable() {
        let data = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(parse_stream_error(data).is_retryable());

        let data = r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#;
        let err = parse_stream_error(data);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("invalid_request_error"));
    }

    #[tokio::test]
    async fn empty_api_key_is_rejected() {
        let grader = ClaudeGrader::new(String::new(), "model".into(), Duration::from_secs(5));
        let err = grader.stream_message("s", "u", 100).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { .. }));
    }

    // -- Integration-style tests with a mock TCP server --

    /// Serve a single raw HTTP response to the first connection.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        (format!("http://{addr}/v1/messages"), task)
    }

    fn prompt() -> GradePrompt {
        GradePrompt {
            system: "You grade fantasy matchups.".into(),
            user: "Grade this player.".into(),
            max_tokens: 200,
        }
    }

    #[tokio::test]
    async fn mock_sse_server_full_flow() {
        let (url, server) = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/event-stream\r\n",
            "Cache-Control: no-cache\r\n",
            "\r\n",
            "event: message_start\r\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":15}}}\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"GRADE: A-\\nCONFIDENCE: 80\\n\"}}\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"REASONING: Soft secondary.\"}}\r\n",
            "\r\n",
            "event: message_delta\r\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":12}}\r\n",
            "\r\n",
            "event: message_stop\r\n",
            "data: {\"type\":\"message_stop\"}\r\n",
            "\r\n",
        ))
        .await;

        let grader = ClaudeGrader::new("sk-ant-test".into(), "test".into(), Duration::from_secs(5))
            .with_api_url(url);
        let result = grader.grade(&prompt()).await.unwrap();

        assert_eq!(result.grade, Grade::AMinus);
        assert_eq!(result.confidence, 80);
        assert_eq!(result.reasoning, "Soft secondary.");

        let _ = server.await;
    }

    #[tokio::test]
    async fn mock_sse_server_unauthorized_is_rejected() {
        let (url, server) = serve_once(concat!(
            "HTTP/1.1 401 Unauthorized\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 2\r\n",
            "\r\n",
            "{}",
        ))
        .await;

        let grader = ClaudeGrader::new("sk-ant-bad".into(), "test".into(), Duration::from_secs(5))
            .with_api_url(url);
        let err = grader.grade(&prompt()).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Rejected { .. }), "got {err:?}");
        assert!(err.to_string().contains("401"));

        let _ = server.await;
    }

    #[tokio::test]
    async fn mock_sse_server_overloaded_is_unavailable() {
        let (url, server) = serve_once(concat!(
            "HTTP/1.1 529 Site Overloaded\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 2\r\n",
            "\r\n",
            "{}",
        ))
        .await;

        let grader = ClaudeGrader::new("sk-ant-test".into(), "test".into(), Duration::from_secs(5))
            .with_api_url(url);
        let err = grader.grade(&prompt()).await.unwrap_err();

        assert!(err.is_retryable(), "got {err:?}");

        let _ = server.await;
    }

    #[tokio::test]
    async fn unparseable_completion_is_invalid_response() {
        let (url, server) = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/event-stream\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"I cannot say.\"}}\r\n",
            "\r\n",
            "event: message_stop\r\n",
            "data: {\"type\":\"message_stop\"}\r\n",
            "\r\n",
        ))
        .await;

        let grader = ClaudeGrader::new("sk-ant-test".into(), "test".into(), Duration::from_secs(5))
            .with_api_url(url);
        let err = grader.grade(&prompt()).await.unwrap_err();

        assert!(matches!(err, UpstreamError::InvalidResponse { .. }), "got {err:?}");

        let _ = server.await;
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let timeout = Duration::from_millis(200);
        let grader = ClaudeGrader::new("sk-ant-test".into(), "test".into(), timeout)
            .with_api_url(format!("http://{addr}/v1/messages"));
        let err = grader.grade(&prompt()).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Timeout { .. }), "got {err:?}");
        server.abort();
    }
}
