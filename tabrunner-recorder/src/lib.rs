//! Macro recorder for tabrunner
//!
//! Observes page interaction (clicks, committed values, scrolls, Enter in
//! forms) and synthesizes the same [`tabrunner::Command`]s the control loop
//! executes, with implicit waits reproducing the pacing of the session.

pub mod error;
pub mod events;
pub mod picker;
pub mod recorder;

pub use error::RecorderError;
pub use events::{InteractionEvent, TimedEvent};
pub use picker::{pick, PickMode, PickedSelector};
pub use recorder::{submit_control, MacroRecorder, RecorderConfig, SUBMIT_DESCRIPTION};
