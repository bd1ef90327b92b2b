//! Remote-controlled page automation
//!
//! This crate holds the pieces that do not depend on where commands come from:
//! locators and the selector engine that resolves and generates them, the
//! capability interface a live page exposes, the command model and the
//! executor that maps commands onto that interface, and the bounded execution
//! history the control loop reports from.

pub mod bridge;
pub mod command;
pub mod document;
pub mod errors;
pub mod executor;
pub mod history;
pub mod locator;
pub mod memory;
pub mod selector;
pub mod target;

pub use bridge::BridgeTarget;
pub use command::{Action, Command, CommandOutcome, CommandParams};
pub use document::{Document, ElementHandle};
pub use errors::AutomationError;
pub use executor::{AbortSignal, Executor, ExecutorConfig, CHECKPOINT_INTERVAL};
pub use history::{ExecutionHistory, ExecutionRecord, ExecutionStatus, InFlight, Ticket};
pub use locator::{Locator, LocatorType};
pub use memory::{InMemoryTarget, TargetEvent};
pub use selector::{HeuristicTokenFilter, SelectorEngine, TokenFilter};
pub use target::{EventKind, Target};
