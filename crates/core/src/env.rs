//! Per-flow (or per-branch) run environment.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::context::{Context, Variables};
use crate::path::ExecutionPath;
use crate::step::StepId;
use crate::value::Value;

/// Session objects keyed by name, one map per frame.
pub type SessionMap = BTreeMap<String, Value>;

/// Outputs and result label handed from a finished step to its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValues {
    pub outputs: Variables,
    pub result: String,
}

impl ReturnValues {
    pub fn new(outputs: Variables, result: impl Into<String>) -> Self {
        Self {
            outputs,
            result: result.into(),
        }
    }
}

/// Everything a flow instance or branch instance carries between steps.
///
/// Exactly one `RunEnvironment` exists per flow instance or branch. A
/// branch environment is a `clone()` of its parent followed by
/// [`reset_stacks`](Self::reset_stacks): it keeps the execution path,
/// system properties and cost metric but none of the parent's frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunEnvironment {
    #[serde(default)]
    context_stack: Vec<Context>,
    #[serde(default)]
    call_arguments: Variables,
    #[serde(default)]
    session_stack: Vec<SessionMap>,
    #[serde(default)]
    execution_path: ExecutionPath,
    #[serde(default)]
    next_step: Option<StepId>,
    #[serde(default)]
    return_values: Option<ReturnValues>,
    #[serde(default)]
    system_properties: Variables,
    /// Cumulative cost metric (ROI) of this execution.
    #[serde(default)]
    total_roi: Decimal,
    /// Step-level error marker left by the engine for the current step.
    #[serde(default)]
    step_error: Option<String>,
}

impl RunEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_properties(system_properties: Variables) -> Self {
        Self {
            system_properties,
            ..Self::default()
        }
    }

    // ── Context stack ─────────────────────────────────────────────────────────

    pub fn push_context(&mut self, context: Context) {
        self.context_stack.push(context);
    }

    pub fn pop_context(&mut self) -> Option<Context> {
        self.context_stack.pop()
    }

    pub fn peek_context(&self) -> Option<&Context> {
        self.context_stack.last()
    }

    pub fn peek_context_mut(&mut self) -> Option<&mut Context> {
        self.context_stack.last_mut()
    }

    pub fn context_depth(&self) -> usize {
        self.context_stack.len()
    }

    /// Replace the call arguments and push `context`, the way a step enters
    /// a new frame.
    pub fn enter_frame(&mut self, context: Context, call_arguments: Variables) {
        self.call_arguments = call_arguments;
        self.context_stack.push(context);
    }

    pub fn call_arguments(&self) -> &Variables {
        &self.call_arguments
    }

    // ── Session stack ─────────────────────────────────────────────────────────

    pub fn push_sessions_map(&mut self, sessions: SessionMap) {
        self.session_stack.push(sessions);
    }

    pub fn pop_sessions_map(&mut self) -> Option<SessionMap> {
        self.session_stack.pop()
    }

    pub fn session_depth(&self) -> usize {
        self.session_stack.len()
    }

    /// Drop every frame: contexts, call arguments and session maps.
    pub fn reset_stacks(&mut self) {
        self.context_stack.clear();
        self.call_arguments.clear();
        self.session_stack.clear();
    }

    // ── Position and navigation ───────────────────────────────────────────────

    pub fn execution_path(&self) -> &ExecutionPath {
        &self.execution_path
    }

    pub fn execution_path_mut(&mut self) -> &mut ExecutionPath {
        &mut self.execution_path
    }

    pub fn put_next_step(&mut self, step: StepId) {
        self.next_step = Some(step);
    }

    pub fn next_step(&self) -> Option<StepId> {
        self.next_step
    }

    pub fn put_return_values(&mut self, return_values: ReturnValues) {
        self.return_values = Some(return_values);
    }

    pub fn return_values(&self) -> Option<&ReturnValues> {
        self.return_values.as_ref()
    }

    pub fn take_return_values(&mut self) -> Option<ReturnValues> {
        self.return_values.take()
    }

    // ── Properties, cost metric, error marker ─────────────────────────────────

    pub fn system_properties(&self) -> &Variables {
        &self.system_properties
    }

    pub fn total_roi(&self) -> Decimal {
        self.total_roi
    }

    pub fn set_total_roi(&mut self, roi: Decimal) {
        self.total_roi = roi;
    }

    pub fn add_roi(&mut self, delta: Decimal) {
        self.total_roi += delta;
    }

    pub fn set_step_error(&mut self, message: impl Into<String>) {
        self.step_error = Some(message.into());
    }

    pub fn step_error(&self) -> Option<&str> {
        self.step_error.as_deref()
    }

    pub fn clear_step_error(&mut self) -> Option<String> {
        self.step_error.take()
    }
}
