//! Agent-runner client abstraction.
//!
//! The core never talks to the external agent runner directly; it goes
//! through this trait. The server binary provides the HTTP implementation,
//! tests use the scripted [`mock`] adapter.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use baton_protocol::EventFrame;

/// Failure reported by the agent runner or its transport.
///
/// Every client failure (connection errors, non-2xx responses, malformed
/// JSON) collapses into this one shape. The runner treats all of them as a
/// recoverable step failure, never as a process-fatal condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("agent runner error: {message}")]
pub struct ClientError {
    pub message: String,
    pub status_code: Option<u16>,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

/// Interface to the external agent runner.
///
/// `send_message` blocks until the agent finishes; the returned text is the
/// handoff source. Cancellation (dropping the future) must leave the client
/// usable, and an in-flight session can always be aborted out-of-band via
/// `abort_session`.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Start a new agent session.
    async fn create_session(&self, title: Option<&str>) -> Result<String, ClientError>;

    /// Send a prompt and wait for the agent's complete reply.
    async fn send_message(
        &self,
        session_id: &str,
        prompt: &str,
        agent_id: &str,
        model: Option<&str>,
    ) -> Result<String, ClientError>;

    /// Best-effort interrupt of a session's current work.
    ///
    /// Returns whether the runner acknowledged the abort.
    async fn abort_session(&self, session_id: &str) -> Result<bool, ClientError>;

    /// Best-effort session cleanup.
    async fn delete_session(&self, session_id: &str) -> Result<(), ClientError>;

    /// Consume the runner's event stream, forwarding each frame into
    /// `frames` until [`stop_streaming`](AgentClient::stop_streaming) is
    /// called. On transport errors the implementation reconnects after
    /// `reconnect_delay`.
    async fn stream_events(
        &self,
        frames: mpsc::Sender<EventFrame>,
        reconnect_delay: Duration,
    ) -> Result<(), ClientError>;

    /// Terminate an active [`stream_events`](AgentClient::stream_events) call.
    fn stop_streaming(&self);
}
