use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::sync::Arc;
use tabrunner::BridgeTarget;
use tabrunner_agent::logging::init_logging;
use tabrunner_agent::{
    messages, Agent, AgentConfig, AgentError, Args, HttpCommandSource, JsonFileStore,
    KeyValueStore, MemoryStore,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;

    let config = AgentConfig::from_args(&args);
    info!("Starting tabrunner agent {}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn KeyValueStore> = if args.ephemeral {
        info!("Using in-memory state store");
        Arc::new(MemoryStore::new())
    } else {
        let store = JsonFileStore::open(&config.state_file)
            .await
            .with_context(|| format!("opening state file {}", config.state_file.display()))?;
        info!("State file: {}", store.path().display());
        Arc::new(store)
    };

    let bridge = BridgeTarget::bind(&config.bridge_addr)
        .await
        .with_context(|| format!("binding page bridge on {}", config.bridge_addr))?;
    info!("Waiting for the page bridge on ws://{}", bridge.local_addr());

    let source = HttpCommandSource::new(config.api_url.clone(), config.request_timeout())?;
    let agent = Agent::new(config, Arc::new(bridge), Arc::new(source), store);

    agent.init().await?;
    if args.refresh_token {
        agent.refresh_token().await?;
    }
    if args.connect {
        if let Err(e) = agent.connect().await {
            error!("Initial connect failed: {e}");
        }
    }

    // Control messages arrive as newline-delimited JSON on stdin.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Control input closed, running until interrupted");
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Value>(&line) {
                    Ok(request) => agent.handle_json(request).await,
                    Err(e) => messages::failure(&AgentError::Json(e)),
                };
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
        }
    }

    agent.shutdown();
    Ok(())
}
