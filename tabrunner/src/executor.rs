//! Command execution against a [`Target`].
//!
//! [`Executor::execute`] never fails: every capability error, missing
//! parameter and cancellation is folded into a [`CommandOutcome`]. The
//! cooperative [`AbortSignal`] is checked on entry and every
//! [`CHECKPOINT_INTERVAL`] while waiting.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::command::{Action, Command, CommandOutcome};
use crate::document::{Document, ElementHandle};
use crate::errors::AutomationError;
use crate::locator::Locator;
use crate::target::{EventKind, Target};

/// Upper bound on how long an abort can go unnoticed during a wait.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_millis(100);

pub const LOOP_INDEX_ATTRIBUTE: &str = "data-loop-index";

/// Cooperative cancellation flag shared between the control loop and the executor.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), AutomationError> {
        if self.is_aborted() {
            Err(AutomationError::Aborted(
                "execution aborted by request".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` in slices of at most [`CHECKPOINT_INTERVAL`],
    /// returning `Aborted` at the first slice boundary after an abort.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AutomationError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(CHECKPOINT_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Resolves once the flag is set, observed at checkpoint granularity.
    pub async fn wait_aborted(&self) {
        while !self.is_aborted() {
            tokio::time::sleep(CHECKPOINT_INTERVAL).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub navigation_timeout: Duration,
    pub element_wait_timeout: Duration,
    pub element_poll_interval: Duration,
    /// Default pause for a `wait` inside a `loop`
    pub loop_wait: Duration,
    pub scroll_settle_min: Duration,
    pub scroll_settle_max: Duration,
    pub random_scroll_count: (u32, u32),
    pub random_scroll_distance: (f64, f64),
    pub random_scroll_delay_ms: (u64, u64),
    /// Characters of text kept in the default `getElements` projection
    pub text_preview_len: usize,
    /// URL prefixes of privileged pages that refuse page-touching commands
    pub restricted_prefixes: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            element_wait_timeout: Duration::from_millis(5000),
            element_poll_interval: Duration::from_millis(100),
            loop_wait: Duration::from_millis(500),
            scroll_settle_min: Duration::from_millis(300),
            scroll_settle_max: Duration::from_millis(1500),
            random_scroll_count: (2, 5),
            random_scroll_distance: (200.0, 800.0),
            random_scroll_delay_ms: (500, 2000),
            text_preview_len: 100,
            restricted_prefixes: [
                "chrome://",
                "chrome-extension://",
                "edge://",
                "about:",
                "moz-extension://",
                "view-source:",
                "devtools://",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ExecutorConfig {
    pub fn is_restricted(&self, url: &str) -> bool {
        self.restricted_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }

    /// Delay after a scroll of `distance` pixels: half a millisecond per
    /// pixel, clamped to the configured settle window.
    pub fn scroll_settle(&self, distance: f64) -> Duration {
        let ms = (distance.abs() / 2.0) as u64;
        Duration::from_millis(ms).clamp(self.scroll_settle_min, self.scroll_settle_max)
    }
}

pub struct Executor {
    target: Arc<dyn Target>,
    abort: AbortSignal,
    config: ExecutorConfig,
    rng: Mutex<StdRng>,
}

impl Executor {
    pub fn new(target: Arc<dyn Target>, abort: AbortSignal) -> Self {
        Self {
            target,
            abort,
            config: ExecutorConfig::default(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Makes `random_scroll` reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn target(&self) -> &Arc<dyn Target> {
        &self.target
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[instrument(skip(self, command), fields(action = %command.action, id = ?command.id))]
    pub async fn execute(&self, command: &Command) -> CommandOutcome {
        let started = Instant::now();
        let outcome = CommandOutcome::from(self.dispatch(command).await);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if outcome.success {
            debug!(elapsed_ms, "command succeeded");
        } else {
            warn!(
                elapsed_ms,
                error = outcome.error.as_deref().unwrap_or_default(),
                "command failed"
            );
        }
        outcome
    }

    fn dispatch<'a>(
        &'a self,
        command: &'a Command,
    ) -> BoxFuture<'a, Result<CommandOutcome, AutomationError>> {
        Box::pin(async move {
            self.abort.check()?;
            if let Action::Unknown(name) = &command.action {
                return Err(AutomationError::UnknownAction(name.clone()));
            }
            command.validate()?;
            if command.touches_page() {
                self.ensure_unrestricted().await?;
            }

            match &command.action {
                Action::Click => self.click(command).await,
                Action::Type => self.type_text(command).await,
                Action::GetText => self.get_text(command).await,
                Action::GetAttribute => self.get_attribute(command).await,
                Action::Evaluate => self.evaluate(command).await,
                Action::Scroll => self.scroll(command).await,
                Action::RandomScroll => self.random_scroll(command).await,
                Action::Wait => self.wait(command).await,
                Action::Focus => self.focus(command).await,
                Action::Hover => self.hover(command).await,
                Action::GetElements => self.get_elements(command).await,
                Action::Loop => self.run_loop(command).await,
                Action::Navigate => self.navigate(command).await,
                Action::Screenshot => self.screenshot(command).await,
                Action::PressKey => self.press_key(command).await,
                Action::Inspect => self.inspect(command).await,
                Action::Unknown(name) => Err(AutomationError::UnknownAction(name.clone())),
            }
        })
    }

    async fn ensure_unrestricted(&self) -> Result<(), AutomationError> {
        let url = self.target.current_url().await?;
        if self.config.is_restricted(&url) {
            return Err(AutomationError::Restricted(format!(
                "cannot run on privileged page {url}"
            )));
        }
        Ok(())
    }

    async fn find(&self, command: &Command) -> Result<ElementHandle, AutomationError> {
        let locator = command.required_locator()?;
        self.target
            .query(&locator)
            .await?
            .ok_or_else(|| AutomationError::ElementNotFound(locator.to_string()))
    }

    async fn click(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let el = self.find(command).await?;
        self.target.click(el).await?;
        Ok(CommandOutcome::ok("Clicked"))
    }

    async fn type_text(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let el = self.find(command).await?;
        let text = command.params.text.as_deref().unwrap_or_default();
        self.target.dispatch_event(Some(el), EventKind::Focus).await?;
        self.target.set_value(el, text).await?;
        self.target.dispatch_event(Some(el), EventKind::Input).await?;
        self.target.dispatch_event(Some(el), EventKind::Change).await?;
        Ok(CommandOutcome::ok("Typed"))
    }

    async fn get_text(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let el = self.find(command).await?;
        Ok(CommandOutcome::ok(self.target.text(el).await?))
    }

    async fn get_attribute(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let name = required_param(command.params.attribute.as_deref(), "attribute")?;
        let el = self.find(command).await?;
        let value = self.target.attribute(el, name).await?;
        Ok(CommandOutcome::ok(value.map_or(Value::Null, Value::String)))
    }

    async fn evaluate(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let script = command
            .params
            .script
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AutomationError::InvalidArgument("No script provided".to_string()))?;
        match self.target.evaluate(script).await {
            Ok(result) => Ok(CommandOutcome::ok(result)),
            Err(AutomationError::EvaluationError(msg)) => Err(AutomationError::EvaluationError(msg)),
            Err(other) => Err(AutomationError::EvaluationError(other.to_string())),
        }
    }

    async fn scroll(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let x = command.params.x.unwrap_or(0.0);
        let y = command.params.y.unwrap_or(0.0);
        let (cx, cy) = self.target.scroll_position().await?;
        let distance = (x - cx).abs() + (y - cy).abs();

        self.target.scroll_to(x, y).await?;
        self.abort.sleep(self.config.scroll_settle(distance)).await?;

        let (fx, fy) = self.target.scroll_position().await?;
        Ok(CommandOutcome::ok(format!("Scrolled to {fx}, {fy}")))
    }

    /// Draws the whole scroll plan up front so the rng lock is never held across an await.
    fn random_scroll_plan(&self, command: &Command) -> Vec<(f64, Duration)> {
        let p = &command.params;
        let (min_n, max_n) = ordered(
            p.min_scrolls.unwrap_or(self.config.random_scroll_count.0),
            p.max_scrolls.unwrap_or(self.config.random_scroll_count.1),
        );
        let (min_d, max_d) = ordered_f64(
            p.min_distance.unwrap_or(self.config.random_scroll_distance.0),
            p.max_distance.unwrap_or(self.config.random_scroll_distance.1),
        );
        let (min_ms, max_ms) = ordered(
            p.min_delay.unwrap_or(self.config.random_scroll_delay_ms.0),
            p.max_delay.unwrap_or(self.config.random_scroll_delay_ms.1),
        );

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let count = rng.gen_range(min_n..=max_n);
        (0..count)
            .map(|_| {
                let distance = rng.gen_range(min_d..=max_d);
                // mostly downward, with the occasional glance back up
                let delta = if rng.gen_bool(0.15) { -distance } else { distance };
                let delay = Duration::from_millis(rng.gen_range(min_ms..=max_ms));
                (delta, delay)
            })
            .collect()
    }

    async fn random_scroll(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let plan = self.random_scroll_plan(command);
        let total = plan.len();
        for (i, (delta, delay)) in plan.into_iter().enumerate() {
            self.abort.check()?;
            let (x, y) = self.target.scroll_position().await?;
            let next_y = (y + delta).max(0.0);
            self.target.scroll_to(x, next_y).await?;
            self.abort
                .sleep(self.config.scroll_settle(next_y - y))
                .await?;
            if i + 1 < total {
                self.abort.sleep(delay).await?;
            }
        }
        let (_, final_y) = self.target.scroll_position().await?;
        Ok(CommandOutcome::ok(json!({ "scrolls": total, "finalY": final_y })))
    }

    async fn wait(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        if let Some(locator) = command.locator() {
            let timeout = command
                .params
                .timeout
                .map(Duration::from_millis)
                .unwrap_or(self.config.element_wait_timeout);
            self.wait_for_element(&locator, timeout).await?;
            return Ok(CommandOutcome::ok("Element found"));
        }

        let ms = command
            .params
            .duration
            .or(command.params.timeout)
            .ok_or_else(|| {
                AutomationError::InvalidArgument(
                    "wait needs a selector or a duration".to_string(),
                )
            })?;
        self.abort.sleep(Duration::from_millis(ms)).await?;
        Ok(CommandOutcome::ok(format!("Waited {ms}ms")))
    }

    async fn wait_for_element(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementHandle, AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.abort.check()?;
            if let Some(el) = self.target.query(locator).await? {
                return Ok(el);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AutomationError::Timeout(format!(
                    "waiting for element {locator}"
                )));
            }
            self.abort
                .sleep(self.config.element_poll_interval.min(deadline - now))
                .await?;
        }
    }

    async fn focus(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let el = self.find(command).await?;
        self.target.dispatch_event(Some(el), EventKind::Focus).await?;
        Ok(CommandOutcome::ok("Focused"))
    }

    async fn hover(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let el = self.find(command).await?;
        self.target
            .dispatch_event(Some(el), EventKind::MouseOver)
            .await?;
        Ok(CommandOutcome::ok("Hovered"))
    }

    async fn get_elements(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let locator = command.required_locator()?;
        let elements = self.target.query_all(&locator).await?;
        let markup = self.target.snapshot().await?;
        let base_url = self.target.current_url().await?;

        let rows = project_elements(
            &markup,
            &elements,
            command.params.attributes.as_deref().unwrap_or_default(),
            &base_url,
            self.config.text_preview_len,
        )?;
        Ok(CommandOutcome::ok_with_count(Value::Array(rows), elements.len()))
    }

    async fn run_loop(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let locator = command.required_locator()?;
        let elements = self.target.query_all(&locator).await?;
        if elements.is_empty() {
            return Err(AutomationError::ElementNotFound(format!(
                "No elements found for {locator}"
            )));
        }

        for (i, el) in elements.iter().enumerate() {
            self.target
                .set_attribute(*el, LOOP_INDEX_ATTRIBUTE, Some(&i.to_string()))
                .await?;
        }

        let inner = command.params.commands.as_deref().unwrap_or_default();
        let result = self.loop_body(&elements, inner).await;

        for el in &elements {
            if let Err(e) = self.target.set_attribute(*el, LOOP_INDEX_ATTRIBUTE, None).await {
                debug!(element = el.0, error = %e, "failed to clear loop index");
            }
        }

        let rows = result?;
        Ok(CommandOutcome::ok_with_count(Value::Array(rows), elements.len()))
    }

    async fn loop_body(
        &self,
        elements: &[ElementHandle],
        inner: &[Command],
    ) -> Result<Vec<Value>, AutomationError> {
        let mut rows = Vec::with_capacity(elements.len());
        for (i, el) in elements.iter().enumerate() {
            let mut results = Vec::with_capacity(inner.len());
            for sub in inner {
                self.abort.check()?;
                let outcome = self.loop_step(*el, i, sub).await;
                results.push(serde_json::to_value(&outcome).unwrap_or(Value::Null));
            }
            rows.push(json!({ "elementIndex": i, "results": results }));
        }
        Ok(rows)
    }

    /// Runs `sub` against the loop element `el`. Element-scoped actions use the
    /// element directly; anything else is dispatched normally, defaulting its
    /// locator to the element's loop index.
    async fn loop_step(&self, el: ElementHandle, index: usize, sub: &Command) -> CommandOutcome {
        let result = match &sub.action {
            Action::Click => self
                .target
                .click(el)
                .await
                .map(|_| CommandOutcome::ok("Clicked")),
            Action::GetText => self.target.text(el).await.map(CommandOutcome::ok),
            Action::GetAttribute => {
                match required_param(sub.params.attribute.as_deref(), "attribute") {
                    Ok(name) => self
                        .target
                        .attribute(el, name)
                        .await
                        .map(|v| CommandOutcome::ok(v.map_or(Value::Null, Value::String))),
                    Err(e) => Err(e),
                }
            }
            Action::Wait => {
                let pause = sub
                    .params
                    .duration
                    .or(sub.params.timeout)
                    .map(Duration::from_millis)
                    .unwrap_or(self.config.loop_wait);
                self.abort
                    .sleep(pause)
                    .await
                    .map(|_| CommandOutcome::ok("Waited"))
            }
            _ => {
                let mut scoped = sub.clone();
                if scoped.locator().is_none() && scoped.action.requires_locator() {
                    scoped = scoped.with_locator(Locator::css(format!(
                        "[{LOOP_INDEX_ATTRIBUTE}=\"{index}\"]"
                    )));
                }
                self.dispatch(&scoped).await
            }
        };
        CommandOutcome::from(result)
    }

    async fn navigate(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let raw = required_param(command.params.url.as_deref(), "url")?;
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => {
                let current = self.target.current_url().await?;
                Url::parse(&current)
                    .and_then(|base| base.join(raw))
                    .map_err(|e| AutomationError::InvalidArgument(format!("bad url '{raw}': {e}")))?
            }
        };

        let loaded = tokio::select! {
            loaded = self.target.navigate_and_await(url.as_str(), self.config.navigation_timeout) => loaded?,
            _ = self.abort.wait_aborted() => {
                return Err(AutomationError::Aborted(format!("navigation to {url} aborted")));
            }
        };
        if !loaded {
            warn!(%url, "load completion not observed before timeout, continuing");
        }
        Ok(CommandOutcome::ok(json!({ "url": url.as_str(), "loaded": loaded })))
    }

    async fn screenshot(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let png = self.target.capture_visible_region().await?;
        let base64 = STANDARD.encode(&png);
        let data_url = format!("data:image/png;base64,{base64}");
        match &command.params.save_to {
            Some(save_to) => Ok(CommandOutcome::ok(json!({
                "dataUrl": data_url,
                "base64": base64,
                "saveTo": save_to,
            }))),
            None => Ok(CommandOutcome::ok(data_url)),
        }
    }

    async fn press_key(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let key = required_param(command.params.key.as_deref(), "key")?.to_string();
        let el = match command.locator() {
            Some(_) => Some(self.find(command).await?),
            None => None,
        };
        self.target
            .dispatch_event(el, EventKind::KeyDown { key: key.clone() })
            .await?;
        self.target
            .dispatch_event(el, EventKind::KeyUp { key: key.clone() })
            .await?;
        Ok(CommandOutcome::ok(format!("Pressed {key}")))
    }

    async fn inspect(&self, command: &Command) -> Result<CommandOutcome, AutomationError> {
        let el = self.find(command).await?;
        let markup = self.target.snapshot().await?;
        let tag_name = {
            let doc = Document::parse(&markup);
            doc.tag(el).to_uppercase()
        };
        let text = self.target.text(el).await?;
        Ok(CommandOutcome::ok(json!({
            "tagName": tag_name,
            "text": truncate(text.trim(), self.config.text_preview_len),
            "selector": command.selector,
        })))
    }
}

fn required_param<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, AutomationError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AutomationError::InvalidArgument(format!("missing parameter '{name}'")))
}

fn ordered<T: PartialOrd>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn ordered_f64(a: f64, b: f64) -> (f64, f64) {
    ordered(a.max(0.0), b.max(0.0))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn absolutize(base: &str, value: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(value))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Rows for `getElements`. Without `attributes` each row is the default
/// projection (`index`, `tagName`, `text`, `id`, `className`).
fn project_elements(
    markup: &str,
    elements: &[ElementHandle],
    attributes: &[String],
    base_url: &str,
    preview_len: usize,
) -> Result<Vec<Value>, AutomationError> {
    let doc = Document::parse(markup);
    let mut rows = Vec::with_capacity(elements.len());

    for (index, el) in elements.iter().copied().enumerate() {
        if !doc.contains(el) {
            return Err(AutomationError::ElementNotFound(format!(
                "element {} vanished from the page",
                el.0
            )));
        }
        let mut row = Map::new();
        row.insert("index".into(), json!(index));

        if attributes.is_empty() {
            row.insert("tagName".into(), json!(doc.tag(el).to_uppercase()));
            row.insert("text".into(), json!(truncate(&doc.text(el), preview_len)));
            row.insert("id".into(), json!(doc.attr(el, "id").unwrap_or_default()));
            row.insert(
                "className".into(),
                json!(doc.attr(el, "class").unwrap_or_default()),
            );
            rows.push(Value::Object(row));
            continue;
        }

        for attr in attributes {
            let value = match attr.as_str() {
                "text" | "innerText" | "textContent" => json!(doc.text(el)),
                "innerHTML" => json!(doc.inner_html(el)?),
                "outerHTML" => json!(doc.outer_html(el)?),
                "href" | "src" => doc
                    .attr(el, attr)
                    .map_or(Value::Null, |v| json!(absolutize(base_url, v))),
                other => doc.attr(el, other).map_or(Value::Null, |v| json!(v)),
            };
            row.insert(attr.clone(), value);
        }
        rows.push(Value::Object(row));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_settle_is_clamped() {
        let config = ExecutorConfig::default();
        assert_eq!(config.scroll_settle(0.0), Duration::from_millis(300));
        assert_eq!(config.scroll_settle(1000.0), Duration::from_millis(500));
        assert_eq!(config.scroll_settle(10_000.0), Duration::from_millis(1500));
    }

    #[test]
    fn test_restricted_prefixes() {
        let config = ExecutorConfig::default();
        assert!(config.is_restricted("chrome://settings"));
        assert!(config.is_restricted("chrome-extension://abc/popup.html"));
        assert!(!config.is_restricted("https://example.com/chrome://"));
    }

    #[test]
    fn test_projection_resolves_relative_urls() {
        let markup = r#"<html><body><a id="x" class="c" href="/docs">Docs</a></body></html>"#;
        let doc = Document::parse(markup);
        let a = doc.handles().find(|h| doc.tag(*h) == "a").unwrap();

        let rows = project_elements(
            markup,
            &[a],
            &["href".to_string(), "missing".to_string()],
            "https://example.com/start/",
            100,
        )
        .unwrap();
        assert_eq!(rows[0]["href"], "https://example.com/docs");
        assert_eq!(rows[0]["missing"], Value::Null);

        let default = project_elements(markup, &[a], &[], "https://example.com/", 2).unwrap();
        assert_eq!(default[0]["tagName"], "A");
        assert_eq!(default[0]["text"], "Do");
        assert_eq!(default[0]["className"], "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abortable_sleep_stops_at_next_checkpoint() {
        let signal = AbortSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.abort();
        });
        let started = Instant::now();
        let result = signal.sleep(Duration::from_millis(5000)).await;
        assert!(matches!(result, Err(AutomationError::Aborted(_))));
        assert!(started.elapsed() <= Duration::from_millis(350));
    }
}
