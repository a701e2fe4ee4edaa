//! Event bus for run observability.
//!
//! Session lifecycle events flow through this channel so callers outside the
//! core (CLI, HTTP layer) can watch fan-out progress and see which sessions
//! were dropped from the final report.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Lifecycle events for one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An interview session started for the persona at `index`.
    SessionStarted {
        timestamp: u64,
        index: usize,
        persona: String,
    },
    /// An interview session finished.
    SessionFinished {
        timestamp: u64,
        index: usize,
        persona: String,
        outcome: SessionOutcome,
        duration_ms: u64,
    },
    /// Section condensation finished for the persona at `index`.
    SectionFinished {
        timestamp: u64,
        index: usize,
        outcome: SessionOutcome,
    },
}

/// Outcome of a session or section unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Success,
    Failure { reason: String },
}

/// Cloneable sender half of the event bus. Emission never blocks and never
/// fails the run; a closed receiver only logs a warning.
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventCollector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit_session_started(&self, index: usize, persona: &str) {
        self.emit(Event::SessionStarted {
            timestamp: current_timestamp(),
            index,
            persona: persona.to_string(),
        });
    }

    pub fn emit_session_finished(
        &self,
        index: usize,
        persona: &str,
        outcome: SessionOutcome,
        duration_ms: u64,
    ) {
        self.emit(Event::SessionFinished {
            timestamp: current_timestamp(),
            index,
            persona: persona.to_string(),
            outcome,
            duration_ms,
        });
    }

    pub fn emit_section_finished(&self, index: usize, outcome: SessionOutcome) {
        self.emit(Event::SectionFinished {
            timestamp: current_timestamp(),
            index,
            outcome,
        });
    }

    fn emit(&self, event: Event) {
        if let Err(err) = self.sender.send(event) {
            tracing::warn!(error = %err, "event receiver dropped, discarding event");
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new().0
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
