//! Control loop for tabrunner
//!
//! Polls a command source for queued [`tabrunner::Command`]s, drains the queue
//! through a [`tabrunner::Executor`], reports every outcome, and answers the
//! host UI's control messages (connection, pause/abort, recording, queue
//! inspection, downloads).

pub mod agent;
pub mod api;
pub mod config;
pub mod downloads;
pub mod error;
pub mod logging;
pub mod messages;
pub mod session;
pub mod store;

pub use agent::{Agent, AgentStatus, ExecutionSnapshot, Phase};
pub use api::{CommandSource, Delivery, HttpCommandSource, QueueInfo, DEFAULT_API_URL};
pub use config::{AgentConfig, Args};
pub use downloads::{DownloadRecord, DownloadTracker, DOWNLOAD_HISTORY_CAPACITY};
pub use error::AgentError;
pub use messages::ControlRequest;
pub use session::Session;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
