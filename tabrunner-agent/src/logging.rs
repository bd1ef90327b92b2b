use anyhow::Result;
use std::env;
use std::path::PathBuf;
use tracing::{warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_NAME: &str = "tabrunner-agent.log";

fn log_level() -> Level {
    env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO)
}

pub fn log_dir() -> PathBuf {
    if let Ok(custom_dir) = env::var("TABRUNNER_LOG_DIR") {
        return PathBuf::from(custom_dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabrunner")
        .join("logs")
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap_or_else(|_| level.into()))
        .add_directive("tungstenite=warn".parse().unwrap_or_else(|_| level.into()))
}

/// Stderr plus a daily rolling file under [`log_dir`]. Stdout is left alone;
/// it carries control message responses.
pub fn init_logging() -> Result<()> {
    use tracing_appender::rolling;

    let level = log_level();
    let log_dir = log_dir();

    let file_layer = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(rolling::daily(&log_dir, LOG_FILE_NAME))
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter(level)),
        ),
        Err(e) => {
            eprintln!("Failed to create log directory {}: {e}", log_dir.display());
            None
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(filter(level)),
        )
        .with(file_layer)
        .try_init()?;

    if !log_dir.exists() {
        warn!(dir = %log_dir.display(), "file logging disabled");
    }
    Ok(())
}
