//! The control loop.
//!
//! One [`Agent`] owns the session, the pause flag, the execution history, the
//! recorder and the download log behind a single lock. Commands are fetched
//! and executed strictly one at a time; the poller only decides *when* a
//! drain starts.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tabrunner::{
    AbortSignal, Action, AutomationError, Command, CommandOutcome, Document, ExecutionHistory,
    ExecutionRecord, Executor, InFlight, Target, Ticket, CHECKPOINT_INTERVAL,
};
use tabrunner_recorder::{pick, InteractionEvent, MacroRecorder, PickMode, TimedEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{CommandSource, Delivery, QueueInfo};
use crate::config::AgentConfig;
use crate::downloads::{DownloadRecord, DownloadTracker};
use crate::error::AgentError;
use crate::messages::{self, ControlRequest};
use crate::session::{generate_token, Session};
use crate::store::{
    KeyValueStore, KEY_API_URL, KEY_DOWNLOAD_HISTORY, KEY_IS_CONNECTED, KEY_TOKEN,
};

/// Observable state of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Disconnected,
    Connecting,
    Polling,
    Executing,
    Paused,
    Aborting,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub history: Vec<ExecutionRecord>,
    pub current: Option<InFlight>,
    pub is_paused: bool,
    pub is_executing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub is_connected: bool,
    pub token: String,
    pub api_url: String,
    pub phase: Phase,
    pub is_paused: bool,
    pub is_recording: bool,
}

struct AgentState {
    session: Session,
    connecting: bool,
    paused: bool,
    history: ExecutionHistory,
    recorder: MacroRecorder,
    downloads: DownloadTracker,
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: AgentConfig,
    source: Arc<dyn CommandSource>,
    store: Arc<dyn KeyValueStore>,
    executor: Executor,
    abort: AbortSignal,
    state: Mutex<AgentState>,
    poller: std::sync::Mutex<Option<Poller>>,
    /// Serializes drains so two ticks never execute concurrently.
    drain_lock: Mutex<()>,
    clock: Instant,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }
}

enum Dispatch {
    Run(Ticket),
    /// Rejected before reaching the executor; history is left untouched.
    Reject(AutomationError),
}

#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        target: Arc<dyn Target>,
        source: Arc<dyn CommandSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let abort = AbortSignal::new();
        let executor =
            Executor::new(target, abort.clone()).with_config(config.executor_config());
        let state = AgentState {
            session: Session::new(config.api_url.clone()),
            connecting: false,
            paused: false,
            history: ExecutionHistory::new(config.history_capacity),
            recorder: MacroRecorder::new(config.recorder.clone()),
            downloads: DownloadTracker::default(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                store,
                executor,
                abort,
                state: Mutex::new(state),
                poller: std::sync::Mutex::new(None),
                drain_lock: Mutex::new(()),
                clock: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.inner.abort
    }

    /// Restores persisted session state and reconnects if the previous run
    /// was connected.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), AgentError> {
        let store = &self.inner.store;

        let token = match store.get(KEY_TOKEN).await? {
            Some(Value::String(token)) if !token.is_empty() => token,
            _ => {
                let token = generate_token();
                store.set(KEY_TOKEN, json!(token)).await?;
                info!(%token, "generated new session token");
                token
            }
        };

        let persisted_url = match store.get(KEY_API_URL).await? {
            Some(Value::String(url)) if !self.inner.config.api_url_pinned => Some(url),
            _ => None,
        };

        let downloads = match store.get(KEY_DOWNLOAD_HISTORY).await? {
            Some(value) => serde_json::from_value::<Vec<DownloadRecord>>(value)
                .unwrap_or_else(|e| {
                    warn!("discarding unreadable download history: {e}");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let was_connected = matches!(store.get(KEY_IS_CONNECTED).await?, Some(Value::Bool(true)));

        let api_url = {
            let mut state = self.inner.state.lock().await;
            state.session.token = token;
            if let Some(url) = persisted_url {
                state.session.api_url = url;
            }
            state.downloads = DownloadTracker::from_records(downloads);
            state.session.api_url.clone()
        };
        self.inner.source.set_base_url(&api_url);
        info!(%api_url, was_connected, "agent initialized");

        if was_connected {
            if let Err(e) = self.connect().await {
                warn!("reconnect on startup failed: {e}");
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), AgentError> {
        let token = {
            let mut state = self.inner.state.lock().await;
            if state.session.connected {
                return Ok(());
            }
            if state.connecting {
                return Err(
                    AutomationError::Blocked("a connection attempt is in progress".into()).into(),
                );
            }
            state.connecting = true;
            state.session.token.clone()
        };

        let registered = self.inner.source.register(&token).await;

        {
            let mut state = self.inner.state.lock().await;
            state.connecting = false;
            if let Err(e) = registered {
                warn!(%token, "registration failed: {e}");
                return Err(e.into());
            }
            state.session.connected = true;
        }

        self.inner.store.set(KEY_IS_CONNECTED, json!(true)).await?;
        self.start_polling();
        info!(%token, "connected to command source");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<(), AgentError> {
        self.stop_polling();
        let (token, was_connected) = {
            let mut state = self.inner.state.lock().await;
            let was_connected = std::mem::replace(&mut state.session.connected, false);
            (state.session.token.clone(), was_connected)
        };

        if was_connected {
            if let Err(e) = self.inner.source.deregister(&token).await {
                warn!(%token, "deregistration failed, ignoring: {e}");
            }
        }
        self.inner.store.set(KEY_IS_CONNECTED, json!(false)).await?;
        info!(%token, "disconnected");
        Ok(())
    }

    pub async fn set_api_url(&self, url: &str) -> Result<(), AgentError> {
        url::Url::parse(url)
            .map_err(|e| AutomationError::InvalidArgument(format!("api url {url:?}: {e}")))?;
        let url = url.trim_end_matches('/').to_string();
        self.inner.state.lock().await.session.api_url = url.clone();
        self.inner.source.set_base_url(&url);
        self.inner.store.set(KEY_API_URL, json!(url)).await?;
        info!(%url, "api url updated");
        Ok(())
    }

    /// Replaces the session token. An active registration is not renewed.
    pub async fn refresh_token(&self) -> Result<String, AgentError> {
        let token = generate_token();
        self.inner.state.lock().await.session.token = token.clone();
        self.inner.store.set(KEY_TOKEN, json!(token)).await?;
        info!(%token, "session token refreshed");
        Ok(token)
    }

    pub async fn pause(&self) {
        self.inner.state.lock().await.paused = true;
        info!("automation paused");
    }

    pub async fn resume(&self) {
        self.inner.abort.reset();
        self.inner.state.lock().await.paused = false;
        info!("automation resumed");
    }

    pub fn abort(&self) {
        self.inner.abort.abort();
        warn!("automation abort requested");
    }

    /// Stops whatever is running, flushes the remote queue by re-registering,
    /// and leaves the loop idle. Falls back to a full disconnect when the
    /// re-registration is refused.
    #[instrument(skip(self))]
    pub async fn clear_queue_and_reset(&self) -> Result<(), AgentError> {
        self.inner.abort.abort();
        self.inner.state.lock().await.paused = true;

        let deadline = Instant::now() + self.inner.config.reset_grace();
        while self.inner.state.lock().await.history.is_executing() {
            if Instant::now() >= deadline {
                warn!("in-flight command did not finish within the reset grace period");
                break;
            }
            tokio::time::sleep(CHECKPOINT_INTERVAL).await;
        }

        let (token, connected) = {
            let state = self.inner.state.lock().await;
            (state.session.token.clone(), state.session.connected)
        };

        let mut outcome = Ok(());
        if connected {
            if let Err(e) = self.inner.source.deregister(&token).await {
                warn!(%token, "deregistration during reset failed: {e}");
            }
            if let Err(e) = self.inner.source.register(&token).await {
                error!(%token, "re-registration failed, disconnecting: {e}");
                outcome = Err(AgentError::from(e));
                if let Err(e) = self.disconnect().await {
                    error!(%token, "disconnect after failed re-registration: {e}");
                    outcome = Err(e);
                }
            }
        }

        {
            let mut state = self.inner.state.lock().await;
            state.history.clear();
            state.paused = false;
        }
        self.inner.abort.reset();
        if outcome.is_ok() {
            info!("queue cleared and execution state reset");
        }
        outcome
    }

    pub async fn phase(&self) -> Phase {
        let state = self.inner.state.lock().await;
        if !state.session.connected {
            if state.connecting {
                Phase::Connecting
            } else {
                Phase::Disconnected
            }
        } else if self.inner.abort.is_aborted() {
            Phase::Aborting
        } else if state.paused {
            Phase::Paused
        } else if state.history.is_executing() {
            Phase::Executing
        } else {
            Phase::Polling
        }
    }

    pub async fn status(&self) -> AgentStatus {
        let phase = self.phase().await;
        let state = self.inner.state.lock().await;
        AgentStatus {
            is_connected: state.session.connected,
            token: state.session.token.clone(),
            api_url: state.session.api_url.clone(),
            phase,
            is_paused: state.paused,
            is_recording: state.recorder.is_active(),
        }
    }

    pub async fn execution_status(&self) -> ExecutionSnapshot {
        let state = self.inner.state.lock().await;
        ExecutionSnapshot {
            history: state.history.last(state.history.capacity()),
            current: state.history.current().cloned(),
            is_paused: state.paused,
            is_executing: state.history.is_executing(),
        }
    }

    pub async fn queue(&self) -> Result<QueueInfo, AgentError> {
        let token = self.inner.state.lock().await.session.token.clone();
        Ok(self.inner.source.queue(&token).await?)
    }

    /// Fetches and executes commands until the source runs dry, the loop is
    /// paused or aborted, or a fetch fails. Returns how many were handled.
    pub async fn tick(&self) -> usize {
        let _drain = self.inner.drain_lock.lock().await;
        let mut handled = 0;

        loop {
            let token = {
                let state = self.inner.state.lock().await;
                if !state.session.connected || state.paused || self.inner.abort.is_aborted() {
                    break;
                }
                state.session.token.clone()
            };

            let command = match self.inner.source.next_command(&token).await {
                Ok(Some(Delivery::Command(command))) => command,
                Ok(Some(Delivery::Malformed { id, error })) => {
                    warn!(?id, "undecodable command: {error}");
                    self.report(&token, id.as_deref(), &CommandOutcome::failed(&error))
                        .await;
                    handled += 1;
                    continue;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("failed to fetch next command: {e}");
                    break;
                }
            };

            let outcome = self.run(&token, &command).await;
            handled += 1;
            if outcome.is_aborted() {
                break;
            }
        }

        if handled > 0 {
            debug!(handled, "queue drained");
        }
        handled
    }

    #[instrument(skip(self, token, command), fields(action = %command.action, id = ?command.id))]
    async fn run(&self, token: &str, command: &Command) -> CommandOutcome {
        let dispatch = {
            let mut state = self.inner.state.lock().await;
            if state.recorder.is_active() {
                Dispatch::Reject(AutomationError::Blocked(
                    "a recording session is active".into(),
                ))
            } else if let Action::Unknown(name) = &command.action {
                Dispatch::Reject(AutomationError::UnknownAction(name.clone()))
            } else {
                Dispatch::Run(state.history.begin(command))
            }
        };

        match dispatch {
            Dispatch::Reject(e) => {
                warn!("command rejected: {e}");
                let outcome = CommandOutcome::failed(&e);
                self.report(token, command.id.as_deref(), &outcome).await;
                outcome
            }
            Dispatch::Run(ticket) => {
                let outcome = self.inner.executor.execute(command).await;
                self.report(token, command.id.as_deref(), &outcome).await;
                self.inner.state.lock().await.history.finish(ticket, &outcome);
                outcome
            }
        }
    }

    async fn report(&self, token: &str, command_id: Option<&str>, outcome: &CommandOutcome) {
        if let Err(e) = self
            .inner
            .source
            .report_result(token, command_id, outcome)
            .await
        {
            error!(id = ?command_id, "failed to report result: {e}");
        }
    }

    fn start_polling(&self) {
        let mut poller = self.inner.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(Arc::downgrade(&self.inner), cancel.clone()));
        *poller = Some(Poller { cancel, handle });
        debug!("poller started");
    }

    fn stop_polling(&self) {
        let poller = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(poller) = poller {
            poller.cancel.cancel();
            debug!("poller stopped");
        }
    }

    /// Stops the poller without touching the persisted connection intent.
    pub fn shutdown(&self) {
        self.stop_polling();
    }

    pub async fn start_recording(&self) -> Result<(), AgentError> {
        let mut state = self.inner.state.lock().await;
        if state.history.is_executing() {
            return Err(AutomationError::Blocked("a command is executing".into()).into());
        }
        state.recorder.start();
        info!("recording started");
        Ok(())
    }

    pub async fn stop_recording(&self) -> Vec<Command> {
        let commands = self.inner.state.lock().await.recorder.stop();
        info!(count = commands.len(), "recording stopped");
        commands
    }

    pub async fn record_action(&self, command: Command) -> Result<usize, AgentError> {
        let now = self.inner.now_ms();
        let mut state = self.inner.state.lock().await;
        state.recorder.record_command(command, now)?;
        Ok(state.recorder.commands().len())
    }

    /// Feeds a page interaction to the recorder, resolving its target against
    /// a fresh snapshot of the page.
    pub async fn record_interaction(&self, event: InteractionEvent) -> Result<usize, AgentError> {
        if !self.inner.state.lock().await.recorder.is_active() {
            return Err(tabrunner_recorder::RecorderError::NotRecording.into());
        }
        let markup = self.inner.executor.target().snapshot().await?;
        let is_scroll = matches!(event, InteractionEvent::Scroll { .. });
        let timed = TimedEvent::new(self.inner.now_ms(), event);

        let count = {
            let mut state = self.inner.state.lock().await;
            let doc = Document::parse(&markup);
            state.recorder.record_event(&doc, &timed)?;
            state.recorder.commands().len()
        };

        if is_scroll {
            self.schedule_scroll_flush();
        }
        Ok(count)
    }

    fn schedule_scroll_flush(&self) {
        let weak = Arc::downgrade(&self.inner);
        let delay = Duration::from_millis(self.inner.config.recorder.scroll_debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let now = inner.now_ms();
                if inner.state.lock().await.recorder.poll(now) {
                    debug!("debounced scroll recorded");
                }
            }
        });
    }

    /// Generates a locator for `element`, copies it to the clipboard and,
    /// while recording, appends an `inspect` command for it.
    pub async fn pick_selector(
        &self,
        element: tabrunner::ElementHandle,
        mode: PickMode,
    ) -> Result<tabrunner_recorder::PickedSelector, AgentError> {
        let target = self.inner.executor.target();
        let markup = target.snapshot().await?;
        let picked = {
            let state = self.inner.state.lock().await;
            let doc = Document::parse(&markup);
            pick(state.recorder.engine(), &doc, element, mode)?
        };

        target.clipboard_write(&picked.chosen.value).await?;

        let now = self.inner.now_ms();
        let mut state = self.inner.state.lock().await;
        if state.recorder.is_active() {
            state.recorder.record_command(picked.inspect_command(), now)?;
        }
        info!(mode = mode.as_str(), locator = %picked.chosen, "selector picked");
        Ok(picked)
    }

    pub async fn download_completed(&self, download: DownloadRecord) -> Result<(), AgentError> {
        let records = {
            let mut state = self.inner.state.lock().await;
            state.downloads.push(download);
            state.downloads.records()
        };
        self.inner
            .store
            .set(KEY_DOWNLOAD_HISTORY, serde_json::to_value(records)?)
            .await
    }

    pub async fn downloads(&self) -> Vec<DownloadRecord> {
        self.inner.state.lock().await.downloads.records()
    }

    /// Answers one control message.
    #[instrument(skip(self, request), fields(request = request.name()))]
    pub async fn handle(&self, request: ControlRequest) -> Value {
        match request {
            ControlRequest::GetStatus => to_json(self.status().await),
            ControlRequest::Connect => respond(self.connect().await),
            ControlRequest::Disconnect => respond(self.disconnect().await),
            ControlRequest::SetApiUrl { url } => respond(self.set_api_url(&url).await),
            ControlRequest::RefreshToken => match self.refresh_token().await {
                Ok(token) => json!({ "success": true, "token": token }),
                Err(e) => messages::failure(&e),
            },
            ControlRequest::StartRecording => respond(self.start_recording().await),
            ControlRequest::StopRecording => {
                json!({ "success": true, "commands": self.stop_recording().await })
            }
            ControlRequest::GetRecordingStatus => {
                let state = self.inner.state.lock().await;
                json!({
                    "isRecording": state.recorder.is_active(),
                    "commands": state.recorder.commands(),
                })
            }
            ControlRequest::RecordAction { command } => match self.record_action(command).await {
                Ok(count) => json!({ "success": true, "count": count }),
                Err(e) => messages::failure(&e),
            },
            ControlRequest::GetExecutionStatus => to_json(self.execution_status().await),
            ControlRequest::PauseAutomation => {
                self.pause().await;
                messages::success()
            }
            ControlRequest::ResumeAutomation => {
                self.resume().await;
                messages::success()
            }
            ControlRequest::AbortAutomation => {
                self.abort();
                messages::success()
            }
            ControlRequest::GetQueue => match self.queue().await {
                Ok(queue) => to_json(queue),
                Err(e) => messages::failure(&e),
            },
            ControlRequest::ClearQueue => respond(self.clear_queue_and_reset().await),
            ControlRequest::GetDownloads => json!({ "downloads": self.downloads().await }),
            ControlRequest::PickSelector { element, mode } => {
                match self.pick_selector(element, mode).await {
                    Ok(picked) => json!({ "success": true, "selector": picked }),
                    Err(e) => messages::failure(&e),
                }
            }
            ControlRequest::RecordInteraction { event } => {
                match self.record_interaction(event).await {
                    Ok(count) => json!({ "success": true, "count": count }),
                    Err(e) => messages::failure(&e),
                }
            }
            ControlRequest::DownloadCompleted { download } => {
                respond(self.download_completed(download).await)
            }
            ControlRequest::Unknown => messages::unknown(),
        }
    }

    pub async fn handle_json(&self, request: Value) -> Value {
        match serde_json::from_value::<ControlRequest>(request) {
            Ok(request) => self.handle(request).await,
            Err(e) => messages::failure(&AgentError::Json(e)),
        }
    }
}

fn respond(result: Result<(), AgentError>) -> Value {
    match result {
        Ok(()) => messages::success(),
        Err(e) => messages::failure(&e),
    }
}

fn to_json(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| messages::failure(&AgentError::Json(e)))
}

async fn poll_loop(inner: Weak<Inner>, cancel: CancellationToken) {
    let Some((poll_every, keep_alive_every)) = inner.upgrade().map(|inner| {
        (
            inner.config.poll_interval(),
            inner.config.keep_alive_interval(),
        )
    }) else {
        return;
    };

    let mut poll = tokio::time::interval(poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut keep_alive =
        tokio::time::interval_at(Instant::now() + keep_alive_every, keep_alive_every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                Agent { inner }.tick().await;
            }
            _ = keep_alive.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let token = inner.state.lock().await.session.token.clone();
                info!(%token, "keep-alive ping");
            }
        }
    }
    debug!("poll loop exited");
}
