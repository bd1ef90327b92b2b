use tabrunner::AutomationError;
use tabrunner_recorder::RecorderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("State store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Automation(e) => e.code(),
            AgentError::Recorder(e) => e.code(),
            AgentError::Store(_) | AgentError::Io(_) => "STORE_ERROR",
            AgentError::Json(_) => "INVALID_ARGUMENT",
        }
    }
}
