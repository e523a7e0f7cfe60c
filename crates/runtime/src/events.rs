//! Lifecycle events emitted by the parallel-loop steps.
//!
//! Events are fire-and-forget and purely observational: a sink must never
//! block the caller and nothing in the scheduler depends on delivery.

use std::fmt;
use std::sync::Mutex;

use lanes_core::{Value, Variables};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The loop expression was bound into work items (round 1 only).
    SplitBranches,
    BranchStart,
    BranchEnd,
    /// Output binding of the finalized loop started.
    JoinBranchesStart,
    /// Navigation of the finalized loop resolved.
    JoinBranchesEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SplitBranches => "SPLIT_BRANCHES",
            EventKind::BranchStart => "BRANCH_START",
            EventKind::BranchEnd => "BRANCH_END",
            EventKind::JoinBranchesStart => "JOIN_BRANCHES_START",
            EventKind::JoinBranchesEnd => "JOIN_BRANCHES_END",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageEvent {
    pub kind: EventKind,
    pub description: String,
    pub step: String,
    /// Execution path the event was emitted at.
    pub path: String,
    pub payload: Variables,
}

impl LanguageEvent {
    pub fn new(kind: EventKind, description: &str, step: &str, path: String) -> Self {
        Self {
            kind,
            description: description.to_string(),
            step: step.to_string(),
            path,
            payload: Variables::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LanguageEvent);
}

/// Forwards events to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LanguageEvent) {
        info!(
            kind = %event.kind,
            step = %event.step,
            path = %event.path,
            "{}",
            event.description
        );
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LanguageEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LanguageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<LanguageEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: LanguageEvent) {
        // A poisoned log only loses observability data.
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
