use tabrunner::AutomationError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("Recorder is not active")]
    NotRecording,

    #[error(transparent)]
    Automation(#[from] AutomationError),
}

impl RecorderError {
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::Automation(e) => e.code(),
        }
    }
}
