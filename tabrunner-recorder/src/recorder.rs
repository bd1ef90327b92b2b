//! Synthesizes replayable [`Command`]s from observed interaction.
//!
//! The recorder is a plain state machine: the caller feeds it timestamped
//! events together with a snapshot of the page they happened on, and drives
//! the scroll debounce with [`MacroRecorder::poll`]. Nothing here awaits, so a
//! parsed [`Document`] never has to cross a suspension point.

use serde::{Deserialize, Serialize};
use tabrunner::{Action, Command, CommandParams, Document, ElementHandle, SelectorEngine};
use tracing::{debug, info};

use crate::error::RecorderError;
use crate::events::{InteractionEvent, TimedEvent};

pub const SUBMIT_DESCRIPTION: &str = "Submit form (Enter)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Gaps between recorded actions longer than this become explicit waits
    pub wait_threshold_ms: u64,
    /// Quiet period after the last scroll before it is recorded
    pub scroll_debounce_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            wait_threshold_ms: 100,
            scroll_debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingScroll {
    x: f64,
    y: f64,
    at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MacroRecorder {
    config: RecorderConfig,
    engine: SelectorEngine,
    active: bool,
    buffer: Vec<Command>,
    last_action_ms: Option<u64>,
    pending_scroll: Option<PendingScroll>,
}

impl Default for MacroRecorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl MacroRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            engine: SelectorEngine::default(),
            active: false,
            buffer: Vec::new(),
            last_action_ms: None,
            pending_scroll: None,
        }
    }

    pub fn with_engine(mut self, engine: SelectorEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn engine(&self) -> &SelectorEngine {
        &self.engine
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Commands recorded by the current (or most recent) session.
    pub fn commands(&self) -> &[Command] {
        &self.buffer
    }

    /// Begins a new session, discarding the previous buffer.
    pub fn start(&mut self) {
        self.buffer.clear();
        self.last_action_ms = None;
        self.pending_scroll = None;
        self.active = true;
        info!("recording started");
    }

    /// Ends the session, flushing any debounced scroll, and returns the buffer.
    pub fn stop(&mut self) -> Vec<Command> {
        if self.active {
            self.flush_scroll();
            self.active = false;
            info!(commands = self.buffer.len(), "recording stopped");
        }
        self.buffer.clone()
    }

    /// Feeds one observed event. Returns how many commands were appended,
    /// counting inserted waits and a flushed scroll.
    pub fn record_event(
        &mut self,
        doc: &Document,
        event: &TimedEvent,
    ) -> Result<usize, RecorderError> {
        if !self.active {
            return Err(RecorderError::NotRecording);
        }
        let before = self.buffer.len();

        if let InteractionEvent::Scroll { x, y } = event.event {
            self.pending_scroll = Some(PendingScroll {
                x,
                y,
                at_ms: event.at_ms,
            });
            return Ok(0);
        }

        // Keep the recorded order faithful to what happened on the page.
        self.flush_scroll();
        if let Some(command) = self.synthesize(doc, &event.event)? {
            self.append(command, event.at_ms);
        }
        Ok(self.buffer.len() - before)
    }

    /// Appends an externally built command, e.g. a picked selector or an
    /// action reported by the host.
    pub fn record_command(&mut self, command: Command, at_ms: u64) -> Result<(), RecorderError> {
        if !self.active {
            return Err(RecorderError::NotRecording);
        }
        self.flush_scroll();
        self.append(command, at_ms);
        Ok(())
    }

    /// Records the pending scroll once its quiet period has elapsed at `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.pending_scroll {
            Some(p) if now_ms.saturating_sub(p.at_ms) >= self.config.scroll_debounce_ms => {
                self.flush_scroll();
                true
            }
            _ => false,
        }
    }

    /// When the pending scroll will be due, if there is one.
    pub fn scroll_deadline(&self) -> Option<u64> {
        self.pending_scroll
            .map(|p| p.at_ms + self.config.scroll_debounce_ms)
    }

    fn flush_scroll(&mut self) {
        if let Some(p) = self.pending_scroll.take() {
            debug!(x = p.x, y = p.y, "recording debounced scroll");
            let scroll = Command::new(Action::Scroll).with_params(CommandParams {
                x: Some(p.x),
                y: Some(p.y),
                ..Default::default()
            });
            self.append(scroll, p.at_ms);
        }
    }

    fn append(&mut self, command: Command, at_ms: u64) {
        if let Some(last) = self.last_action_ms {
            let gap = at_ms.saturating_sub(last);
            if gap > self.config.wait_threshold_ms {
                self.buffer.push(wait_command(gap));
            }
        }
        self.last_action_ms = Some(at_ms);
        debug!(action = %command.action, "recorded command");
        self.buffer.push(command);
    }

    fn synthesize(
        &self,
        doc: &Document,
        event: &InteractionEvent,
    ) -> Result<Option<Command>, RecorderError> {
        let command = match event {
            InteractionEvent::Click { target } => {
                Command::new(Action::Click).with_locator(self.engine.generate(doc, *target)?)
            }
            InteractionEvent::Change { target, value } => Command::new(Action::Type)
                .with_locator(self.engine.generate(doc, *target)?)
                .with_params(CommandParams {
                    text: Some(value.clone()),
                    ..Default::default()
                }),
            InteractionEvent::KeyPress { target, key } if key == "Enter" => {
                match submit_control(doc, *target) {
                    Some(submit) => Command::new(Action::Click)
                        .with_locator(self.engine.generate(doc, submit)?)
                        .with_description(SUBMIT_DESCRIPTION),
                    None => Command::new(Action::PressKey)
                        .with_locator(self.engine.generate(doc, *target)?)
                        .with_params(CommandParams {
                            key: Some(key.clone()),
                            ..Default::default()
                        }),
                }
            }
            // Other keys surface as value changes.
            InteractionEvent::KeyPress { .. } | InteractionEvent::Scroll { .. } => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn wait_command(gap_ms: u64) -> Command {
    let description = if gap_ms < 1000 {
        format!("Wait {gap_ms}ms")
    } else {
        format!("Wait {}s", (gap_ms + 500) / 1000)
    };
    Command::new(Action::Wait)
        .with_params(CommandParams {
            duration: Some(gap_ms),
            ..Default::default()
        })
        .with_description(description)
}

/// The control an Enter key press inside a form would activate: an explicit
/// submit control, else the form's first button.
pub fn submit_control(doc: &Document, target: ElementHandle) -> Option<ElementHandle> {
    let form = std::iter::once(target)
        .chain(doc.ancestors(target))
        .find(|h| doc.tag(*h) == "form")?;
    let controls = doc.descendants(form);

    let is_submit = |h: &ElementHandle| {
        matches!(doc.tag(*h), "button" | "input")
            && doc
                .attr(*h, "type")
                .is_some_and(|t| t.eq_ignore_ascii_case("submit"))
    };
    controls
        .iter()
        .copied()
        .find(is_submit)
        .or_else(|| controls.iter().copied().find(|h| doc.tag(*h) == "button"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_descriptions() {
        assert_eq!(wait_command(250).description.as_deref(), Some("Wait 250ms"));
        assert_eq!(wait_command(2600).description.as_deref(), Some("Wait 3s"));
        assert_eq!(wait_command(2600).params.duration, Some(2600));
    }

    #[test]
    fn test_submit_control_prefers_explicit_submit() {
        let doc = Document::parse(
            r#"<html><body><form><input id="q"><button>Clear</button><input type="submit" value="Go"></form></body></html>"#,
        );
        let q = doc.handles().find(|h| doc.attr(*h, "id") == Some("q")).unwrap();
        let submit = submit_control(&doc, q).unwrap();
        assert_eq!(doc.attr(submit, "value"), Some("Go"));
    }

    #[test]
    fn test_no_submit_control_outside_forms() {
        let doc = Document::parse(r#"<html><body><input id="q"><button>Go</button></body></html>"#);
        let q = doc.handles().find(|h| doc.attr(*h, "id") == Some("q")).unwrap();
        assert_eq!(submit_control(&doc, q), None);
    }
}
