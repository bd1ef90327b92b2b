//! Control protocol between the agent and its host UI.
//!
//! Requests are JSON objects tagged by `type`; every request gets exactly one
//! JSON response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabrunner::{Command, ElementHandle};
use tabrunner_recorder::{InteractionEvent, PickMode};

use crate::downloads::DownloadRecord;
use crate::error::AgentError;

pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    GetStatus,
    Connect,
    Disconnect,
    SetApiUrl {
        url: String,
    },
    RefreshToken,
    StartRecording,
    StopRecording,
    GetRecordingStatus,
    RecordAction {
        command: Command,
    },
    GetExecutionStatus,
    PauseAutomation,
    ResumeAutomation,
    AbortAutomation,
    GetQueue,
    ClearQueue,
    GetDownloads,
    /// Copy a locator for `element` and, while recording, log the pick.
    PickSelector {
        element: ElementHandle,
        #[serde(default)]
        mode: PickMode,
    },
    /// A raw page interaction for the recorder.
    RecordInteraction {
        event: InteractionEvent,
    },
    DownloadCompleted {
        download: DownloadRecord,
    },
    #[serde(other)]
    Unknown,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::GetStatus => "GET_STATUS",
            ControlRequest::Connect => "CONNECT",
            ControlRequest::Disconnect => "DISCONNECT",
            ControlRequest::SetApiUrl { .. } => "SET_API_URL",
            ControlRequest::RefreshToken => "REFRESH_TOKEN",
            ControlRequest::StartRecording => "START_RECORDING",
            ControlRequest::StopRecording => "STOP_RECORDING",
            ControlRequest::GetRecordingStatus => "GET_RECORDING_STATUS",
            ControlRequest::RecordAction { .. } => "RECORD_ACTION",
            ControlRequest::GetExecutionStatus => "GET_EXECUTION_STATUS",
            ControlRequest::PauseAutomation => "PAUSE_AUTOMATION",
            ControlRequest::ResumeAutomation => "RESUME_AUTOMATION",
            ControlRequest::AbortAutomation => "ABORT_AUTOMATION",
            ControlRequest::GetQueue => "GET_QUEUE",
            ControlRequest::ClearQueue => "CLEAR_QUEUE",
            ControlRequest::GetDownloads => "GET_DOWNLOADS",
            ControlRequest::PickSelector { .. } => "PICK_SELECTOR",
            ControlRequest::RecordInteraction { .. } => "RECORD_INTERACTION",
            ControlRequest::DownloadCompleted { .. } => "DOWNLOAD_COMPLETED",
            ControlRequest::Unknown => "UNKNOWN",
        }
    }
}

pub fn success() -> Value {
    json!({ "success": true })
}

pub fn failure(error: &AgentError) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "code": error.code(),
    })
}

pub fn unknown() -> Value {
    json!({ "error": UNKNOWN_MESSAGE_TYPE })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabrunner::Action;

    #[test]
    fn test_request_wire_format() {
        let request: ControlRequest =
            serde_json::from_value(json!({ "type": "SET_API_URL", "url": "http://x" })).unwrap();
        assert_eq!(
            request,
            ControlRequest::SetApiUrl {
                url: "http://x".into()
            }
        );

        let request: ControlRequest = serde_json::from_value(json!({
            "type": "RECORD_ACTION",
            "command": { "action": "click", "selector": "#a" }
        }))
        .unwrap();
        match request {
            ControlRequest::RecordAction { command } => assert_eq!(command.action, Action::Click),
            other => panic!("unexpected {other:?}"),
        }

        let request: ControlRequest =
            serde_json::from_value(json!({ "type": "PICK_SELECTOR", "element": 4 })).unwrap();
        assert_eq!(
            request,
            ControlRequest::PickSelector {
                element: ElementHandle(4),
                mode: PickMode::Css
            }
        );
    }

    #[test]
    fn test_unrecognized_type_maps_to_unknown() {
        let request: ControlRequest =
            serde_json::from_value(json!({ "type": "OPEN_POPUP" })).unwrap();
        assert_eq!(request, ControlRequest::Unknown);
        assert_eq!(unknown()["error"], UNKNOWN_MESSAGE_TYPE);
    }
}
