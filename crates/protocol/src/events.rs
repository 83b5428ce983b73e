//! The envelope for events fanned out to stream subscribers.

use serde::{Deserialize, Serialize};

/// One frame of the event stream: the upstream agent-runner events and the
/// orchestrator's own audit events both travel in this shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventFrame {
    /// Event type, e.g. `step_started` or an upstream runner type.
    pub event: String,

    /// Event payload, forwarded verbatim.
    pub data: serde_json::Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_serializes_as_envelope() {
        let frame = EventFrame::new("step_started", json!({"pipeline_id": 7}));
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"event\":\"step_started\""));
        assert!(text.contains("\"pipeline_id\":7"));
    }
}
