use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tabrunner::bridge::DEFAULT_BRIDGE_ADDR;
use tabrunner::ExecutorConfig;
use tabrunner_recorder::RecorderConfig;

use crate::api::DEFAULT_API_URL;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub api_url: String,
    pub poll_interval_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub history_capacity: usize,
    /// How long a queue reset waits for the in-flight command to report.
    pub reset_grace_ms: u64,
    pub navigation_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub state_file: PathBuf,
    pub bridge_addr: String,
    pub recorder: RecorderConfig,
    /// Set when `api_url` came from the command line; a persisted url is
    /// then ignored on startup.
    #[serde(skip)]
    pub api_url_pinned: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval_ms: 1000,
            keep_alive_interval_ms: 30_000,
            history_capacity: 20,
            reset_grace_ms: 2000,
            navigation_timeout_ms: 30_000,
            request_timeout_ms: 10_000,
            state_file: default_state_file(),
            bridge_addr: DEFAULT_BRIDGE_ADDR.to_string(),
            recorder: RecorderConfig::default(),
            api_url_pinned: false,
        }
    }
}

pub fn default_state_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabrunner")
        .join("state.json")
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms.max(1))
    }

    pub fn reset_grace(&self) -> Duration {
        Duration::from_millis(self.reset_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            ..ExecutorConfig::default()
        }
    }

    /// Defaults overridden by whatever the command line set.
    pub fn from_args(args: &Args) -> Self {
        let mut config = Self::default();
        if let Some(url) = &args.api_url {
            config.api_url = url.clone();
            config.api_url_pinned = true;
        }
        if let Some(ms) = args.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(path) = &args.state_file {
            config.state_file = path.clone();
        }
        if let Some(addr) = &args.bridge_addr {
            config.bridge_addr = addr.clone();
        }
        if let Some(capacity) = args.history_capacity {
            config.history_capacity = capacity;
        }
        if let Some(ms) = args.wait_threshold_ms {
            config.recorder.wait_threshold_ms = ms;
        }
        config
    }
}

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "tabrunner agent - runs remotely queued browser commands against a connected tab"
)]
pub struct Args {
    /// Base URL of the command source API
    #[arg(long, env = "TABRUNNER_API_URL")]
    pub api_url: Option<String>,

    /// Interval between queue polls in milliseconds
    #[arg(long, env = "TABRUNNER_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Where session state is persisted
    #[arg(long, env = "TABRUNNER_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Address the browser-side content script connects to
    #[arg(long, env = "TABRUNNER_BRIDGE_ADDR")]
    pub bridge_addr: Option<String>,

    /// Number of execution records kept for status reporting
    #[arg(long, env = "TABRUNNER_HISTORY_CAPACITY")]
    pub history_capacity: Option<usize>,

    /// Minimum gap between recorded actions that produces a wait command
    #[arg(long, env = "TABRUNNER_WAIT_THRESHOLD_MS")]
    pub wait_threshold_ms: Option<u64>,

    /// Connect to the command source immediately
    #[arg(long)]
    pub connect: bool,

    /// Discard the persisted token and generate a new one
    #[arg(long)]
    pub refresh_token: bool,

    /// Keep state in memory only
    #[arg(long)]
    pub ephemeral: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_defaults() {
        let args = Args::parse_from([
            "tabrunner-agent",
            "--api-url",
            "http://queue.test/api",
            "--history-capacity",
            "50",
            "--wait-threshold-ms",
            "300",
            "--connect",
        ]);
        let config = AgentConfig::from_args(&args);
        assert_eq!(config.api_url, "http://queue.test/api");
        assert!(config.api_url_pinned);
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.recorder.wait_threshold_ms, 300);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(args.connect);
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(30));
        assert!(!config.api_url_pinned);
        assert!(config.state_file.ends_with("tabrunner/state.json"));
    }
}
