//! Client side of the command source HTTP API.
//!
//! | Call | Request |
//! |---|---|
//! | register | `POST /register {token, userAgent, timestamp}` |
//! | deregister | `DELETE /extensions/{token}` |
//! | next command | `GET /commands/{token}` → `{command?}` |
//! | report | `POST /result {token, commandId, success, result?, error?}` |
//! | queue | `GET /extensions` → `{extensions: [{token, queueSize, queuePreview}]}` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tabrunner::{AutomationError, Command, CommandOutcome};
use tracing::{debug, instrument, warn};

pub const DEFAULT_API_URL: &str = "http://localhost:5295/api/v1/browser";

/// Pending work for this agent's token as seen by the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    #[serde(default)]
    pub queue_size: usize,
    #[serde(default)]
    pub queue_preview: Vec<Value>,
}

/// One dequeued command. The source has already removed it from the queue,
/// so even one that fails to decode must be answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Command(Command),
    Malformed {
        id: Option<String>,
        error: AutomationError,
    },
}

impl Delivery {
    pub fn decode(raw: Value) -> Self {
        match serde_json::from_value::<Command>(raw.clone()) {
            Ok(command) => Delivery::Command(command),
            Err(e) => Delivery::Malformed {
                id: raw.get("id").and_then(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                error: AutomationError::InvalidArgument(format!("malformed command: {e}")),
            },
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Delivery::Command(command) => command.id.as_deref(),
            Delivery::Malformed { id, .. } => id.as_deref(),
        }
    }
}

/// Where commands come from and where their results go.
#[async_trait]
pub trait CommandSource: Send + Sync {
    async fn register(&self, token: &str) -> Result<(), AutomationError>;

    async fn deregister(&self, token: &str) -> Result<(), AutomationError>;

    /// The next queued command, `None` when the queue is empty.
    async fn next_command(&self, token: &str) -> Result<Option<Delivery>, AutomationError>;

    async fn report_result(
        &self,
        token: &str,
        command_id: Option<&str>,
        outcome: &CommandOutcome,
    ) -> Result<(), AutomationError>;

    async fn queue(&self, token: &str) -> Result<QueueInfo, AutomationError>;

    /// Points subsequent calls at a different base URL.
    fn set_base_url(&self, _url: &str) {}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    token: &'a str,
    user_agent: &'a str,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultRequest<'a> {
    token: &'a str,
    command_id: Option<&'a str>,
    #[serde(flatten)]
    outcome: &'a CommandOutcome,
}

#[derive(Debug, Deserialize)]
struct NextCommandResponse {
    #[serde(default)]
    command: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ExtensionsResponse {
    #[serde(default)]
    extensions: Vec<ExtensionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionEntry {
    token: String,
    #[serde(flatten)]
    queue: QueueInfo,
}

pub struct HttpCommandSource {
    client: reqwest::Client,
    base_url: RwLock<String>,
    user_agent: String,
}

impl HttpCommandSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AutomationError> {
        let user_agent = format!("tabrunner-agent/{}", env!("CARGO_PKG_VERSION"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.clone())
            .build()
            .map_err(|e| AutomationError::NetworkError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: RwLock::new(trim_base(base_url.into())),
            user_agent,
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .map(|url| url.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn network(context: &str, e: reqwest::Error) -> AutomationError {
    AutomationError::NetworkError(format!("{context}: {e}"))
}

#[async_trait]
impl CommandSource for HttpCommandSource {
    #[instrument(skip(self))]
    async fn register(&self, token: &str) -> Result<(), AutomationError> {
        let body = RegisterRequest {
            token,
            user_agent: &self.user_agent,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let response = self
            .client
            .post(self.endpoint("/register"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AutomationError::RegistrationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AutomationError::RegistrationFailed(format!(
                "{status}: {text}"
            )));
        }
        debug!("registered with command source");
        Ok(())
    }

    async fn deregister(&self, token: &str) -> Result<(), AutomationError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("/extensions/{token}")))
            .send()
            .await
            .map_err(|e| network("deregister", e))?;
        if !response.status().is_success() {
            return Err(AutomationError::NetworkError(format!(
                "deregister: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn next_command(&self, token: &str) -> Result<Option<Delivery>, AutomationError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/commands/{token}")))
            .send()
            .await
            .map_err(|e| network("poll", e))?;
        if !response.status().is_success() {
            return Err(AutomationError::NetworkError(format!(
                "poll: {}",
                response.status()
            )));
        }
        let body: NextCommandResponse = response.json().await.map_err(|e| network("poll", e))?;
        match body.command {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => Ok(Some(Delivery::decode(raw))),
        }
    }

    async fn report_result(
        &self,
        token: &str,
        command_id: Option<&str>,
        outcome: &CommandOutcome,
    ) -> Result<(), AutomationError> {
        let body = ResultRequest {
            token,
            command_id,
            outcome,
        };
        let response = self
            .client
            .post(self.endpoint("/result"))
            .json(&body)
            .send()
            .await
            .map_err(|e| network("report", e))?;
        if !response.status().is_success() {
            warn!(status = %response.status(), ?command_id, "result rejected by command source");
        }
        Ok(())
    }

    async fn queue(&self, token: &str) -> Result<QueueInfo, AutomationError> {
        let body: ExtensionsResponse = self
            .client
            .get(self.endpoint("/extensions"))
            .send()
            .await
            .map_err(|e| network("queue", e))?
            .error_for_status()
            .map_err(|e| network("queue", e))?
            .json()
            .await
            .map_err(|e| network("queue", e))?;
        Ok(body
            .extensions
            .into_iter()
            .find(|entry| entry.token == token)
            .map(|entry| entry.queue)
            .unwrap_or_default())
    }

    fn set_base_url(&self, url: &str) {
        let mut base = self.base_url.write().unwrap_or_else(|e| e.into_inner());
        *base = trim_base(url.to_string());
    }
}
