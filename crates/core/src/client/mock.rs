//! Scripted in-memory agent client for deterministic testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use baton_protocol::EventFrame;

use crate::client::{AgentClient, ClientError};

/// What the scripted client should do for one `send_message` call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Return this text as the agent's output.
    Reply(String),

    /// Fail the call with a client error.
    Fail(String),

    /// Never return; exercises the step-timeout path.
    Hang,
}

/// One recorded `send_message` call.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub session_id: String,
    pub prompt: String,
    pub agent_id: String,
    pub model: Option<String>,
}

/// An [`AgentClient`] whose behavior is scripted per call.
///
/// Responses are consumed in order; running out of script is itself an
/// error so a test never silently loops. All calls are recorded for
/// assertion.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    sent: Mutex<Vec<SentMessage>>,
    created: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    stream_frames: Mutex<Vec<EventFrame>>,
    stop: Notify,
    stopped: AtomicBool,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            stream_frames: Mutex::new(Vec::new()),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Script the next `send_message` call to return `output`.
    pub fn with_reply(self, output: &str) -> Self {
        self.push(ScriptedResponse::Reply(output.to_string()));
        self
    }

    /// Script the next `send_message` call to fail.
    pub fn with_failure(self, message: &str) -> Self {
        self.push(ScriptedResponse::Fail(message.to_string()));
        self
    }

    /// Script the next `send_message` call to hang forever.
    pub fn with_hang(self) -> Self {
        self.push(ScriptedResponse::Hang);
        self
    }

    /// Frames emitted once event streaming starts.
    pub fn with_stream_frames(self, frames: Vec<EventFrame>) -> Self {
        *lock(&self.stream_frames) = frames;
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        lock(&self.responses).push_back(response);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn created_sessions(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    pub fn aborted_sessions(&self) -> Vec<String> {
        lock(&self.aborted).clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock helper; the mutex is never poisoned because no holder panics.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn create_session(&self, _title: Option<&str>) -> Result<String, ClientError> {
        let session_id = Uuid::new_v4().to_string();
        lock(&self.created).push(session_id.clone());
        Ok(session_id)
    }

    async fn send_message(
        &self,
        session_id: &str,
        prompt: &str,
        agent_id: &str,
        model: Option<&str>,
    ) -> Result<String, ClientError> {
        lock(&self.sent).push(SentMessage {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            agent_id: agent_id.to_string(),
            model: model.map(str::to_string),
        });

        let response = lock(&self.responses).pop_front();
        match response {
            Some(ScriptedResponse::Reply(output)) => Ok(output),
            Some(ScriptedResponse::Fail(message)) => Err(ClientError::new(message)),
            Some(ScriptedResponse::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending future completed")
            }
            None => Err(ClientError::new("no scripted response left")),
        }
    }

    async fn abort_session(&self, session_id: &str) -> Result<bool, ClientError> {
        lock(&self.aborted).push(session_id.to_string());
        Ok(true)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        lock(&self.deleted).push(session_id.to_string());
        Ok(())
    }

    async fn stream_events(
        &self,
        frames: mpsc::Sender<EventFrame>,
        _reconnect_delay: Duration,
    ) -> Result<(), ClientError> {
        // Register for the stop signal before doing anything, so a stop
        // arriving mid-delivery is never missed.
        let notified = self.stop.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let queued = lock(&self.stream_frames).clone();
        for frame in queued {
            if frames.send(frame).await.is_err() {
                return Ok(());
            }
        }

        if !self.stopped.load(Ordering::SeqCst) {
            notified.await;
        }
        Ok(())
    }

    fn stop_streaming(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_are_consumed_in_order() {
        let client = ScriptedClient::new().with_reply("first").with_reply("second");

        let session = client.create_session(Some("t")).await.unwrap();
        let a = client
            .send_message(&session, "p1", "dev", None)
            .await
            .unwrap();
        let b = client
            .send_message(&session, "p2", "dev", Some("opus"))
            .await
            .unwrap();

        assert_eq!(a, "first");
        assert_eq!(b, "second");

        let sent = client.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].prompt, "p1");
        assert_eq!(sent[1].model.as_deref(), Some("opus"));
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let client = ScriptedClient::new();
        let err = client
            .send_message("s", "p", "dev", None)
            .await
            .unwrap_err();
        assert!(err.message.contains("no scripted response"));
    }

    #[tokio::test]
    async fn test_stream_delivers_frames_then_waits_for_stop() {
        let client = std::sync::Arc::new(ScriptedClient::new().with_stream_frames(vec![
            EventFrame::new("tick", serde_json::json!(1)),
            EventFrame::new("tock", serde_json::json!(2)),
        ]));

        let (tx, mut rx) = mpsc::channel(8);
        let streaming = {
            let client = client.clone();
            tokio::spawn(async move { client.stream_events(tx, Duration::from_secs(1)).await })
        };

        assert_eq!(rx.recv().await.unwrap().event, "tick");
        assert_eq!(rx.recv().await.unwrap().event, "tock");

        client.stop_streaming();
        streaming.await.unwrap().unwrap();
    }
}
