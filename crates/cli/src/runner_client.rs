//! HTTP implementation of the agent-runner client.
//!
//! Talks to the external runner's REST API for sessions and messages, and
//! consumes its `/events` SSE stream with automatic reconnection. Every
//! transport or decoding failure collapses into a [`ClientError`]; the
//! core treats them all as recoverable step failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use baton_core::client::{AgentClient, ClientError};
use baton_protocol::EventFrame;

pub struct HttpAgentClient {
    base_url: String,
    http: reqwest::Client,
    stop: Notify,
    stopped: AtomicBool,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    output: String,
}

#[derive(Deserialize)]
struct AbortResponse {
    #[serde(default)]
    aborted: bool,
}

impl HttpAgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// One upstream SSE connection: read frames until the stream ends or
    /// streaming is stopped. Returns whether a stop was requested.
    async fn consume_stream(&self, frames: &mpsc::Sender<EventFrame>) -> Result<bool, ClientError> {
        // Register for the stop signal before connecting so one raised at
        // any point during this attempt terminates it.
        let notified = self.stop.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let request = self
            .http
            .get(self.url("/events"))
            .header("accept", "text/event-stream")
            .send();
        let response = tokio::select! {
            () = notified.as_mut() => return Ok(true),
            result = request => result.map_err(transport_error)?,
        };

        if !response.status().is_success() {
            return Err(ClientError::with_status(
                format!("event stream returned {}", response.status()),
                response.status().as_u16(),
            ));
        }

        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();

        loop {
            tokio::select! {
                () = notified.as_mut() => return Ok(true),
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for frame in parser.feed(&bytes) {
                            if frames.send(frame).await.is_err() {
                                // Receiver gone: the broker is shutting down.
                                return Ok(true);
                            }
                        }
                    }
                    Some(Err(error)) => return Err(transport_error(error)),
                    None => return Ok(false),
                },
            }
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn create_session(&self, title: Option<&str>) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/sessions"))
            .json(&json!({ "title": title }))
            .send()
            .await
            .map_err(transport_error)?;

        let session: SessionResponse = expect_json(response).await?;
        Ok(session.id)
    }

    async fn send_message(
        &self,
        session_id: &str,
        prompt: &str,
        agent_id: &str,
        model: Option<&str>,
    ) -> Result<String, ClientError> {
        // No client-side timeout here: the step deadline lives in the core.
        let response = self
            .http
            .post(self.url(&format!("/sessions/{session_id}/messages")))
            .json(&json!({
                "prompt": prompt,
                "agent": agent_id,
                "model": model,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let message: MessageResponse = expect_json(response).await?;
        Ok(message.output)
    }

    async fn abort_session(&self, session_id: &str) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/sessions/{session_id}/abort")))
            .send()
            .await
            .map_err(transport_error)?;

        let abort: AbortResponse = expect_json(response).await?;
        Ok(abort.aborted)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/sessions/{session_id}")))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(ClientError::with_status(
                format!("session delete returned {}", response.status()),
                response.status().as_u16(),
            ));
        }
        Ok(())
    }

    async fn stream_events(
        &self,
        frames: mpsc::Sender<EventFrame>,
        reconnect_delay: Duration,
    ) -> Result<(), ClientError> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.consume_stream(&frames).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("event stream ended; reconnecting"),
                Err(error) => warn!(%error, "event stream failed; reconnecting"),
            }

            tokio::select! {
                () = self.stop.notified() => return Ok(()),
                () = tokio::time::sleep(reconnect_delay) => {}
            }
        }
    }

    fn stop_streaming(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }
}

fn transport_error(error: reqwest::Error) -> ClientError {
    match error.status() {
        Some(status) => ClientError::with_status(error.to_string(), status.as_u16()),
        None => ClientError::new(error.to_string()),
    }
}

async fn expect_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::with_status(
            format!("agent runner returned {status}: {body}"),
            status.as_u16(),
        ));
    }

    response
        .json()
        .await
        .map_err(|error| ClientError::new(format!("malformed runner response: {error}")))
}

/// Incremental parser for the `event:`/`data:` lines of an SSE body.
#[derive(Default)]
struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed a chunk; returns every frame completed by it.
    fn feed(&mut self, bytes: &[u8]) -> Vec<EventFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
            // Comment and id lines are ignored.
        }
        frames
    }

    fn dispatch(&mut self) -> Option<EventFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }

        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        let raw = std::mem::take(&mut self.data).join("\n");
        let data = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
        Some(EventFrame::new(event, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_parser_handles_split_chunks() {
        let mut parser = SseParser::default();

        let mut frames = parser.feed(b"event: session_update\nda");
        assert!(frames.is_empty());

        frames.extend(parser.feed(b"ta: {\"x\": 1}\n\n"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "session_update");
        assert_eq!(frames[0].data["x"], 1);
    }

    #[test]
    fn test_sse_parser_defaults_event_name() {
        let mut parser = SseParser::default();
        let frames = parser.feed(b"data: {\"ok\": true}\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_sse_parser_keeps_non_json_data_as_string() {
        let mut parser = SseParser::default();
        let frames = parser.feed(b"event: note\ndata: plain words\n\n");
        assert_eq!(
            frames[0].data,
            serde_json::Value::String("plain words".to_string())
        );
    }

    #[test]
    fn test_sse_parser_ignores_comments_and_blank_keepalives() {
        let mut parser = SseParser::default();
        let frames = parser.feed(b": keepalive\n\n\n");
        assert!(frames.is_empty());
    }
}
