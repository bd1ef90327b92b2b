//! In-process [`Target`] backed by static HTML.
//!
//! Used wherever a real browser is not available: selector, executor, recorder
//! and control-loop tests all drive this target and assert on the
//! [`TargetEvent`] log it keeps.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::document::{Document, ElementHandle};
use crate::errors::AutomationError;
use crate::locator::Locator;
use crate::selector::SelectorEngine;
use crate::target::{EventKind, Target};

pub const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

/// 1x1 transparent PNG returned by [`InMemoryTarget::capture_visible_region`].
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Everything the target was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetEvent {
    Click(ElementHandle),
    SetValue {
        element: ElementHandle,
        value: String,
    },
    SetAttribute {
        element: ElementHandle,
        name: String,
        value: Option<String>,
    },
    Dispatch {
        element: Option<ElementHandle>,
        event: EventKind,
    },
    ScrollTo {
        x: f64,
        y: f64,
    },
    Navigate(String),
    Evaluate(String),
    Capture,
    ClipboardWrite(String),
}

type Evaluator = Box<dyn Fn(&str) -> Result<String, AutomationError> + Send + Sync>;

struct PageState {
    url: String,
    source: String,
    overrides: BTreeMap<(ElementHandle, String), Option<String>>,
    values: HashMap<ElementHandle, String>,
    scroll: (f64, f64),
    events: Vec<TargetEvent>,
    clipboard: Option<String>,
}

impl PageState {
    fn load(&mut self, url: String, source: String) {
        self.url = url;
        self.source = source;
        self.overrides.clear();
        self.values.clear();
        self.scroll = (0.0, 0.0);
    }

    fn markup(&self) -> String {
        if self.overrides.is_empty() {
            self.source.clone()
        } else {
            Document::parse(&self.source).to_html_with(&self.overrides)
        }
    }

    fn document(&self) -> Document {
        Document::parse(&self.markup())
    }
}

pub struct InMemoryTarget {
    state: Mutex<PageState>,
    pages: Mutex<HashMap<String, String>>,
    engine: SelectorEngine,
    load_delay: Duration,
    evaluator: Option<Evaluator>,
}

impl InMemoryTarget {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.into(),
                source: html.into(),
                overrides: BTreeMap::new(),
                values: HashMap::new(),
                scroll: (0.0, 0.0),
                events: Vec::new(),
                clipboard: None,
            }),
            pages: Mutex::new(HashMap::new()),
            engine: SelectorEngine::default(),
            load_delay: Duration::ZERO,
            evaluator: None,
        }
    }

    /// Registers the markup served when navigating to `url`.
    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.lock_pages().insert(url.into(), html.into());
        self
    }

    /// Time a navigation takes to report load completion.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_engine(mut self, engine: SelectorEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Replaces the built-in expression evaluator.
    pub fn with_evaluator<F>(mut self, evaluator: F) -> Self
    where
        F: Fn(&str) -> Result<String, AutomationError> + Send + Sync + 'static,
    {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pages(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Swaps the current page without recording a navigation.
    pub fn set_html(&self, html: impl Into<String>) {
        let mut state = self.lock();
        let url = state.url.clone();
        state.load(url, html.into());
    }

    pub fn events(&self) -> Vec<TargetEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn clicks(&self) -> Vec<ElementHandle> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                TargetEvent::Click(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    pub fn value(&self, element: ElementHandle) -> Option<String> {
        self.lock().values.get(&element).cloned()
    }

    pub fn clipboard(&self) -> Option<String> {
        self.lock().clipboard.clone()
    }

    /// Synchronous lookup for assertions; `None` for unresolvable locators.
    pub fn find(&self, locator: impl Into<Locator>) -> Option<ElementHandle> {
        let doc = self.lock().document();
        self.engine.resolve(&doc, &locator.into()).ok().flatten()
    }

    fn record(&self, event: TargetEvent) {
        self.lock().events.push(event);
    }

    fn with_element<T>(
        &self,
        element: ElementHandle,
        f: impl FnOnce(&Document, &PageState) -> Result<T, AutomationError>,
    ) -> Result<T, AutomationError> {
        let state = self.lock();
        let doc = state.document();
        if !doc.contains(element) {
            return Err(AutomationError::ElementNotFound(format!(
                "element {} is not in the current page",
                element.0
            )));
        }
        f(&doc, &state)
    }

    fn builtin_evaluate(&self, expression: &str) -> Result<String, AutomationError> {
        let expr = expression.trim().trim_end_matches(';').trim();
        let state = self.lock();
        match expr {
            "document.title" => Ok(state.document().title().unwrap_or_default()),
            "location.href" | "window.location.href" | "document.URL" => Ok(state.url.clone()),
            "true" | "false" | "null" | "undefined" => Ok(expr.to_string()),
            _ if is_quoted(expr) => Ok(expr[1..expr.len() - 1].to_string()),
            _ => match expr.parse::<f64>() {
                Ok(n) if n.fract() == 0.0 && n.is_finite() => Ok(format!("{}", n as i64)),
                Ok(n) => Ok(n.to_string()),
                Err(_) => Err(AutomationError::EvaluationError(format!(
                    "cannot evaluate '{expr}'"
                ))),
            },
        }
    }
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')))
}

#[async_trait]
impl Target for InMemoryTarget {
    async fn current_url(&self) -> Result<String, AutomationError> {
        Ok(self.lock().url.clone())
    }

    async fn snapshot(&self) -> Result<String, AutomationError> {
        Ok(self.lock().markup())
    }

    async fn query(&self, locator: &Locator) -> Result<Option<ElementHandle>, AutomationError> {
        let doc = self.lock().document();
        self.engine.resolve(&doc, locator)
    }

    async fn query_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, AutomationError> {
        let doc = self.lock().document();
        self.engine.resolve_all(&doc, locator)
    }

    async fn click(&self, element: ElementHandle) -> Result<(), AutomationError> {
        self.with_element(element, |_, _| Ok(()))?;
        self.record(TargetEvent::Click(element));
        Ok(())
    }

    async fn set_value(&self, element: ElementHandle, value: &str) -> Result<(), AutomationError> {
        self.with_element(element, |_, _| Ok(()))?;
        let mut state = self.lock();
        state.values.insert(element, value.to_string());
        state.events.push(TargetEvent::SetValue {
            element,
            value: value.to_string(),
        });
        Ok(())
    }

    async fn set_attribute(
        &self,
        element: ElementHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), AutomationError> {
        self.with_element(element, |_, _| Ok(()))?;
        let mut state = self.lock();
        state
            .overrides
            .insert((element, name.to_lowercase()), value.map(str::to_string));
        state.events.push(TargetEvent::SetAttribute {
            element,
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        Ok(())
    }

    async fn dispatch_event(
        &self,
        element: Option<ElementHandle>,
        event: EventKind,
    ) -> Result<(), AutomationError> {
        if let Some(element) = element {
            self.with_element(element, |_, _| Ok(()))?;
        }
        self.record(TargetEvent::Dispatch { element, event });
        Ok(())
    }

    async fn text(&self, element: ElementHandle) -> Result<String, AutomationError> {
        self.with_element(element, |doc, _| Ok(doc.text(element)))
    }

    async fn attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, AutomationError> {
        self.with_element(element, |doc, state| {
            if name.eq_ignore_ascii_case("value") {
                if let Some(value) = state.values.get(&element) {
                    return Ok(Some(value.clone()));
                }
            }
            Ok(doc.attr(element, name).map(str::to_string))
        })
    }

    async fn inner_html(&self, element: ElementHandle) -> Result<String, AutomationError> {
        self.with_element(element, |doc, _| doc.inner_html(element))
    }

    async fn outer_html(&self, element: ElementHandle) -> Result<String, AutomationError> {
        self.with_element(element, |doc, _| doc.outer_html(element))
    }

    async fn scroll_position(&self) -> Result<(f64, f64), AutomationError> {
        Ok(self.lock().scroll)
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        let mut state = self.lock();
        state.scroll = (x.max(0.0), y.max(0.0));
        state.events.push(TargetEvent::ScrollTo { x, y });
        Ok(())
    }

    async fn capture_visible_region(&self) -> Result<Vec<u8>, AutomationError> {
        self.record(TargetEvent::Capture);
        Ok(PLACEHOLDER_PNG.to_vec())
    }

    async fn navigate_and_await(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<bool, AutomationError> {
        let html = self
            .lock_pages()
            .get(url)
            .cloned()
            .unwrap_or_else(|| BLANK_PAGE.to_string());
        {
            let mut state = self.lock();
            state.events.push(TargetEvent::Navigate(url.to_string()));
            state.load(url.to_string(), html);
        }
        debug!(url, delay_ms = self.load_delay.as_millis() as u64, "in-memory navigation");

        if self.load_delay > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        Ok(true)
    }

    async fn evaluate(&self, expression: &str) -> Result<String, AutomationError> {
        self.record(TargetEvent::Evaluate(expression.to_string()));
        match &self.evaluator {
            Some(evaluator) => evaluator(expression),
            None => self.builtin_evaluate(expression),
        }
    }

    async fn clipboard_write(&self, text: &str) -> Result<(), AutomationError> {
        let mut state = self.lock();
        state.clipboard = Some(text.to_string());
        state.events.push(TargetEvent::ClipboardWrite(text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Inbox</title></head><body>
        <ul><li>a</li><li>b</li></ul><input id="q"></body></html>"#;

    #[tokio::test]
    async fn test_set_attribute_keeps_handles_stable() {
        let target = InMemoryTarget::new("https://example.com/", PAGE);
        let items = target.query_all(&Locator::css("li")).await.unwrap();
        target
            .set_attribute(items[1], "data-loop-index", Some("1"))
            .await
            .unwrap();
        let tagged = target
            .query(&Locator::css("[data-loop-index=\"1\"]"))
            .await
            .unwrap();
        assert_eq!(tagged, Some(items[1]));
        assert_eq!(target.query_all(&Locator::css("li")).await.unwrap(), items);

        target
            .set_attribute(items[1], "data-loop-index", None)
            .await
            .unwrap();
        assert!(!target.snapshot().await.unwrap().contains("data-loop-index"));
    }

    #[tokio::test]
    async fn test_builtin_evaluate() {
        let target = InMemoryTarget::new("https://example.com/", PAGE);
        assert_eq!(target.evaluate("document.title").await.unwrap(), "Inbox");
        assert_eq!(
            target.evaluate("location.href").await.unwrap(),
            "https://example.com/"
        );
        assert_eq!(target.evaluate("'hi'").await.unwrap(), "hi");
        assert_eq!(target.evaluate("42").await.unwrap(), "42");
        assert!(matches!(
            target.evaluate("window.open()").await,
            Err(AutomationError::EvaluationError(_))
        ));
    }

    #[tokio::test]
    async fn test_set_value_shows_through_value_attribute() {
        let target = InMemoryTarget::new("https://example.com/", PAGE);
        let input = target.find("#q").unwrap();
        target.set_value(input, "rust").await.unwrap();
        assert_eq!(
            target.attribute(input, "value").await.unwrap().as_deref(),
            Some("rust")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_times_out_when_load_is_slow() {
        let target = InMemoryTarget::new("about:blank", BLANK_PAGE)
            .with_page("https://slow.test/", PAGE)
            .with_load_delay(Duration::from_secs(60));
        let loaded = target
            .navigate_and_await("https://slow.test/", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!loaded);
        assert_eq!(target.current_url().await.unwrap(), "https://slow.test/");
    }
}
