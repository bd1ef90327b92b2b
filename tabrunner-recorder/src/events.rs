use serde::{Deserialize, Serialize};
use tabrunner::ElementHandle;

/// A user interaction observed on the page while recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InteractionEvent {
    Click {
        target: ElementHandle,
    },
    /// A committed value change on a form control
    Change {
        target: ElementHandle,
        value: String,
    },
    /// Page scroll position after the scroll step
    Scroll {
        x: f64,
        y: f64,
    },
    KeyPress {
        target: ElementHandle,
        key: String,
    },
}

impl InteractionEvent {
    pub fn target(&self) -> Option<ElementHandle> {
        match self {
            InteractionEvent::Click { target }
            | InteractionEvent::Change { target, .. }
            | InteractionEvent::KeyPress { target, .. } => Some(*target),
            InteractionEvent::Scroll { .. } => None,
        }
    }
}

/// An [`InteractionEvent`] stamped with the host clock, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEvent {
    pub at_ms: u64,
    pub event: InteractionEvent,
}

impl TimedEvent {
    pub fn new(at_ms: u64, event: InteractionEvent) -> Self {
        Self { at_ms, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event: TimedEvent = serde_json::from_value(json!({
            "atMs": 1200,
            "event": { "kind": "keyPress", "target": 4, "key": "Enter" }
        }))
        .unwrap();
        assert_eq!(event.at_ms, 1200);
        assert_eq!(event.event.target(), Some(ElementHandle(4)));
    }
}
