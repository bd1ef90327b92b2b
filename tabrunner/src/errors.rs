use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Blocked: {0}")]
    Blocked(String),

    #[error("Restricted context: {0}")]
    Restricted(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),
}

impl AutomationError {
    /// Stable machine-readable code reported next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            AutomationError::ElementNotFound(_) => "ELEMENT_NOT_FOUND",
            AutomationError::Timeout(_) => "TIMEOUT",
            AutomationError::Aborted(_) => "ABORTED",
            AutomationError::Blocked(_) => "BLOCKED",
            AutomationError::Restricted(_) => "RESTRICTED",
            AutomationError::NetworkError(_) => "NETWORK_ERROR",
            AutomationError::RegistrationFailed(_) => "REGISTRATION_FAILED",
            AutomationError::EvaluationError(_) => "EVALUATION_ERROR",
            AutomationError::UnknownAction(_) => "UNKNOWN_ACTION",
            AutomationError::InvalidLocator(_) => "INVALID_LOCATOR",
            AutomationError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AutomationError::PlatformError(_) => "PLATFORM_ERROR",
        }
    }

    /// Inverse of [`AutomationError::code`], used when errors cross a wire.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "ELEMENT_NOT_FOUND" => AutomationError::ElementNotFound(message),
            "TIMEOUT" => AutomationError::Timeout(message),
            "ABORTED" => AutomationError::Aborted(message),
            "BLOCKED" => AutomationError::Blocked(message),
            "RESTRICTED" => AutomationError::Restricted(message),
            "NETWORK_ERROR" => AutomationError::NetworkError(message),
            "REGISTRATION_FAILED" => AutomationError::RegistrationFailed(message),
            "EVALUATION_ERROR" => AutomationError::EvaluationError(message),
            "UNKNOWN_ACTION" => AutomationError::UnknownAction(message),
            "INVALID_LOCATOR" => AutomationError::InvalidLocator(message),
            "INVALID_ARGUMENT" => AutomationError::InvalidArgument(message),
            _ => AutomationError::PlatformError(message),
        }
    }
}
