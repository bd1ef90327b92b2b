use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;

use crate::command::{Command, CommandOutcome};

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// A finished command. Fields are fixed once the record is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    command_id: Option<String>,
    action: String,
    description: String,
    status: ExecutionStatus,
    elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// The command currently being executed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlight {
    pub command_id: Option<String>,
    pub action: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
    #[serde(skip)]
    ticket: u64,
}

/// Identifies one `begin`/`finish` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Bounded FIFO log of finished commands plus the in-flight pointer.
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    records: VecDeque<ExecutionRecord>,
    current: Option<InFlight>,
    next_ticket: u64,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
            current: None,
            next_ticket: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Marks `command` as in flight.
    pub fn begin(&mut self, command: &Command) -> Ticket {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.current = Some(InFlight {
            command_id: command.id.clone(),
            action: command.action.to_string(),
            description: command.label(),
            started_at: Utc::now(),
            started: Instant::now(),
            ticket,
        });
        Ticket(ticket)
    }

    /// Appends the record for `ticket` and clears the in-flight pointer.
    ///
    /// Returns `false` for a stale ticket (already finished, or superseded by
    /// `clear`), in which case nothing changes.
    pub fn finish(&mut self, ticket: Ticket, outcome: &CommandOutcome) -> bool {
        let Some(current) = self.current.take_if(|c| c.ticket == ticket.0) else {
            return false;
        };

        let record = ExecutionRecord {
            command_id: current.command_id,
            action: current.action,
            description: current.description,
            status: if outcome.success {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Error
            },
            elapsed_ms: current.started.elapsed().as_millis() as u64,
            error: outcome.error.clone(),
            finished_at: Utc::now(),
        };
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        true
    }

    pub fn current(&self) -> Option<&InFlight> {
        self.current.as_ref()
    }

    pub fn is_executing(&self) -> bool {
        self.current.is_some()
    }

    /// The most recent `k` records, oldest first.
    pub fn last(&self, k: usize) -> Vec<ExecutionRecord> {
        let skip = self.records.len().saturating_sub(k);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    /// Drops every record and the in-flight pointer. Outstanding tickets become stale.
    pub fn clear(&mut self) {
        self.records.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AutomationError;

    fn cmd(id: usize) -> Command {
        Command::new("wait").with_id(id.to_string())
    }

    #[test]
    fn test_oldest_records_are_evicted_first() {
        let mut history = ExecutionHistory::new(5);
        for i in 0..10 {
            let ticket = history.begin(&cmd(i));
            history.finish(ticket, &CommandOutcome::ok("done"));
        }
        assert_eq!(history.len(), 5);
        let ids: Vec<_> = history
            .records()
            .map(|r| r.command_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["5", "6", "7", "8", "9"]);
        assert_eq!(history.last(2)[1].command_id(), Some("9"));
    }

    #[test]
    fn test_in_flight_pointer_is_cleared_exactly_once() {
        let mut history = ExecutionHistory::default();
        let ticket = history.begin(&cmd(1));
        assert!(history.is_executing());
        let failed = CommandOutcome::failed(&AutomationError::Aborted("stop".into()));
        assert!(history.finish(ticket, &failed));
        assert!(!history.is_executing());
        assert!(!history.finish(ticket, &failed));
        assert_eq!(history.len(), 1);
        assert_eq!(history.last(1)[0].status(), ExecutionStatus::Error);
    }

    #[test]
    fn test_clear_makes_outstanding_tickets_stale() {
        let mut history = ExecutionHistory::default();
        let ticket = history.begin(&cmd(1));
        history.clear();
        assert!(!history.finish(ticket, &CommandOutcome::ok("late")));
        assert!(history.is_empty());
        assert!(history.current().is_none());
    }
}
