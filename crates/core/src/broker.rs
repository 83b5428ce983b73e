//! Event fan-out: one upstream agent-runner stream, many subscribers.
//!
//! The broker holds the single upstream connection (via the agent client)
//! and mirrors every frame into per-subscriber bounded inboxes. A slow
//! subscriber only ever loses its own frames; the upstream task never
//! blocks on an inbox. The orchestrator's own audit events are published
//! through the same fan-out so subscribers see one merged stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use baton_protocol::EventFrame;

use crate::client::AgentClient;

/// What a subscriber receives: serialized frames, then a final stop marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerMessage {
    /// One `{event, data}` envelope, serialized to JSON.
    Frame(String),

    /// The broker is shutting down; no further frames will arrive.
    Stop,
}

/// A subscriber's inbox handle. Dropping it unsubscribes implicitly on the
/// next fan-out; calling [`EventBroker::unsubscribe`] removes it eagerly.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<BrokerMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the inbox is closed.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }
}

/// Fan-out broker over the agent runner's event stream.
pub struct EventBroker {
    client: Arc<dyn AgentClient>,
    subscribers: Arc<Mutex<HashMap<u64, mpsc::Sender<BrokerMessage>>>>,
    next_id: AtomicU64,
    inbox_capacity: usize,
    reconnect_delay: Duration,
    upstream: Mutex<Option<JoinHandle<()>>>,
}

impl EventBroker {
    pub fn new(
        client: Arc<dyn AgentClient>,
        inbox_capacity: usize,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            client,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            inbox_capacity,
            reconnect_delay,
            upstream: Mutex::new(None),
        }
    }

    /// Add a subscriber inbox. Cheap; any number may exist concurrently.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).insert(id, tx);
        debug!(subscriber = id, "event subscriber added");
        Subscription { id, rx }
    }

    /// Remove a subscriber inbox; idempotent.
    pub fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers).remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Deliver one frame to every inbox.
    ///
    /// The frame is serialized once. A full inbox drops the frame for that
    /// subscriber only, with a warning; a closed inbox is pruned.
    pub fn publish(&self, frame: &EventFrame) {
        fan_out(&self.subscribers, frame);
    }

    /// Open the upstream consumer.
    ///
    /// Frames flow even with zero subscribers, so backpressure never
    /// reaches the agent runner. Calling `start` twice is a no-op.
    pub fn start(&self) {
        let mut upstream = lock_handle(&self.upstream);
        if upstream.is_some() {
            return;
        }

        let client = Arc::clone(&self.client);
        let subscribers = Arc::clone(&self.subscribers);
        let delay = self.reconnect_delay;

        *upstream = Some(tokio::spawn(async move {
            let (frames_tx, mut frames_rx) = mpsc::channel::<EventFrame>(64);

            let consumer =
                tokio::spawn(async move { client.stream_events(frames_tx, delay).await });

            while let Some(frame) = frames_rx.recv().await {
                fan_out(&subscribers, &frame);
            }

            match consumer.await {
                Ok(Ok(())) => debug!("upstream event stream closed"),
                Ok(Err(error)) => warn!(%error, "upstream event stream failed"),
                Err(error) => warn!(%error, "upstream consumer panicked"),
            }
        }));
    }

    /// Stop sentinel to every inbox, stop the upstream consumer, and join
    /// the background task.
    pub async fn stop(&self) {
        for (_, tx) in lock(&self.subscribers).drain() {
            let _ = tx.try_send(BrokerMessage::Stop);
        }

        self.client.stop_streaming();

        let handle = lock_handle(&self.upstream).take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn!(%error, "upstream task ended abnormally");
                }
            }
        }
    }
}

/// Serialize once and try-send to every inbox; see [`EventBroker::publish`].
fn fan_out(subscribers: &Mutex<HashMap<u64, mpsc::Sender<BrokerMessage>>>, frame: &EventFrame) {
    let serialized = match serde_json::to_string(frame) {
        Ok(serialized) => serialized,
        Err(error) => {
            warn!(%error, "dropping unserializable event frame");
            return;
        }
    };

    let mut subscribers = lock(subscribers);
    subscribers.retain(|id, tx| {
        match tx.try_send(BrokerMessage::Frame(serialized.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = id, event = %frame.event, "subscriber inbox full; dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}

fn lock<'a>(
    subscribers: &'a Mutex<HashMap<u64, mpsc::Sender<BrokerMessage>>>,
) -> std::sync::MutexGuard<'a, HashMap<u64, mpsc::Sender<BrokerMessage>>> {
    match subscribers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_handle(
    upstream: &Mutex<Option<JoinHandle<()>>>,
) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    match upstream.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
