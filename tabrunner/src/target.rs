use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::document::ElementHandle;
use crate::errors::AutomationError;
use crate::locator::Locator;

/// Synthetic events the executor asks a target to fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventKind {
    Input,
    Change,
    Focus,
    MouseOver,
    KeyDown { key: String },
    KeyUp { key: String },
}

/// The capability surface of a live page.
///
/// Elements are exchanged as [`ElementHandle`]s, valid for the markup returned
/// by the most recent [`Target::snapshot`].
#[async_trait]
pub trait Target: Send + Sync {
    async fn current_url(&self) -> Result<String, AutomationError>;

    /// Serialized markup of the current page. Parse it with
    /// [`Document::parse`](crate::document::Document::parse);
    /// the parsed document must not be held across an await point.
    async fn snapshot(&self) -> Result<String, AutomationError>;

    async fn query(&self, locator: &Locator) -> Result<Option<ElementHandle>, AutomationError>;

    async fn query_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, AutomationError>;

    async fn click(&self, element: ElementHandle) -> Result<(), AutomationError>;

    async fn set_value(&self, element: ElementHandle, value: &str) -> Result<(), AutomationError>;

    /// Sets (`Some`) or removes (`None`) an attribute without invalidating handles.
    async fn set_attribute(
        &self,
        element: ElementHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), AutomationError>;

    /// Fires `event` on `element`, or on the document when `element` is `None`.
    async fn dispatch_event(
        &self,
        element: Option<ElementHandle>,
        event: EventKind,
    ) -> Result<(), AutomationError>;

    async fn text(&self, element: ElementHandle) -> Result<String, AutomationError>;

    async fn attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, AutomationError>;

    async fn inner_html(&self, element: ElementHandle) -> Result<String, AutomationError>;

    async fn outer_html(&self, element: ElementHandle) -> Result<String, AutomationError>;

    async fn scroll_position(&self) -> Result<(f64, f64), AutomationError>;

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    /// PNG bytes of the visible viewport.
    async fn capture_visible_region(&self) -> Result<Vec<u8>, AutomationError>;

    /// Starts navigation and waits up to `timeout` for load completion.
    /// Returns whether completion was observed before the timeout.
    async fn navigate_and_await(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<bool, AutomationError>;

    /// Evaluates an opaque expression and stringifies its result.
    async fn evaluate(&self, expression: &str) -> Result<String, AutomationError>;

    async fn clipboard_write(&self, text: &str) -> Result<(), AutomationError>;
}
