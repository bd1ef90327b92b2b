#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use serde_json::Value;
use tabrunner::{AutomationError, Command, CommandOutcome, InMemoryTarget, Target};
use tabrunner_agent::{
    Agent, AgentConfig, AgentError, CommandSource, Delivery, KeyValueStore, MemoryStore,
    QueueInfo,
};
use tokio::time::Instant;

pub const PAGE: &str = r#"<html><head><title>Orders</title></head><body>
<form id="search">
  <input name="q">
  <button type="submit" id="go">Search</button>
</form>
<button id="refresh">Refresh</button>
<ul id="orders"><li class="order">A-1</li><li class="order">A-2</li></ul>
</body></html>"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct Reported {
    pub command_id: Option<String>,
    pub outcome: CommandOutcome,
    pub at: Instant,
}

/// In-process command source: a queue the test fills and a log of every
/// reported result.
#[derive(Default)]
pub struct ScriptedSource {
    queue: Mutex<VecDeque<Value>>,
    results: Mutex<Vec<Reported>>,
    fail_register: AtomicBool,
    fail_deregister: AtomicBool,
    registrations: AtomicUsize,
    deregistrations: AtomicUsize,
    fetches: AtomicUsize,
    base_url: Mutex<Option<String>>,
}

impl ScriptedSource {
    pub fn push(&self, command: Command) {
        self.push_raw(serde_json::to_value(command).unwrap());
    }

    /// Queues a command exactly as it would arrive on the wire.
    pub fn push_raw(&self, command: Value) {
        self.queue.lock().unwrap().push_back(command);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn results(&self) -> Vec<Reported> {
        self.results.lock().unwrap().clone()
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deregister(&self, fail: bool) {
        self.fail_deregister.store(fail, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn deregistrations(&self) -> usize {
        self.deregistrations.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn base_url(&self) -> Option<String> {
        self.base_url.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandSource for ScriptedSource {
    async fn register(&self, _token: &str) -> Result<(), AutomationError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(AutomationError::RegistrationFailed("503: unavailable".into()));
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deregister(&self, _token: &str) -> Result<(), AutomationError> {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(AutomationError::NetworkError("connection refused".into()));
        }
        // Re-registration starts from an empty queue.
        self.queue.lock().unwrap().clear();
        Ok(())
    }

    async fn next_command(&self, _token: &str) -> Result<Option<Delivery>, AutomationError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.queue.lock().unwrap().pop_front().map(Delivery::decode))
    }

    async fn report_result(
        &self,
        _token: &str,
        command_id: Option<&str>,
        outcome: &CommandOutcome,
    ) -> Result<(), AutomationError> {
        self.results.lock().unwrap().push(Reported {
            command_id: command_id.map(str::to_string),
            outcome: outcome.clone(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn queue(&self, _token: &str) -> Result<QueueInfo, AutomationError> {
        let queue = self.queue.lock().unwrap();
        Ok(QueueInfo {
            queue_size: queue.len(),
            queue_preview: queue.iter().take(5).cloned().collect(),
        })
    }

    fn set_base_url(&self, url: &str) {
        *self.base_url.lock().unwrap() = Some(url.to_string());
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AgentError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AgentError::Store("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AgentError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), AgentError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), AgentError> {
        self.check()?;
        self.inner.remove(key).await
    }
}

pub struct Harness {
    pub agent: Agent,
    pub target: Arc<InMemoryTarget>,
    pub source: Arc<ScriptedSource>,
    pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
    harness_with(AgentConfig::default(), Arc::new(MemoryStore::new()))
}

pub fn harness_with(config: AgentConfig, store: Arc<MemoryStore>) -> Harness {
    let (agent, target, source) = agent_on(config, store.clone());
    Harness {
        agent,
        target,
        source,
        store,
    }
}

/// An agent over the standard page and a fresh scripted source, persisting into `store`.
pub fn agent_on(
    config: AgentConfig,
    store: Arc<dyn KeyValueStore>,
) -> (Agent, Arc<InMemoryTarget>, Arc<ScriptedSource>) {
    init_tracing();
    let target = Arc::new(InMemoryTarget::new("https://shop.test/orders", PAGE));
    let source = Arc::new(ScriptedSource::default());
    let agent = Agent::new(
        config,
        target.clone() as Arc<dyn Target>,
        source.clone() as Arc<dyn CommandSource>,
        store,
    );
    (agent, target, source)
}
