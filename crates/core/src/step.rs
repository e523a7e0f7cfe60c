//! Compiled parallel-loop step definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Result label of a successful step or branch.
pub const SUCCESS_RESULT: &str = "SUCCESS";
/// Result label of a failed step or branch.
pub const FAILURE_RESULT: &str = "FAILURE";

/// Address of an execution step in the compiled step graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u64);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one parallel-loop instance inside one flow execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopId(String);

impl LoopId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate outcome of a loop, and the per-branch outcome tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoopResult {
    Success,
    Failure,
}

impl LoopResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopResult::Success => SUCCESS_RESULT,
            LoopResult::Failure => FAILURE_RESULT,
        }
    }
}

impl fmt::Display for LoopResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `parallel_loop` statement attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum ParallelLoopStatement {
    /// `for x in <expression>`
    List {
        var_name: String,
        expression: String,
        #[serde(default)]
        throttle: Option<String>,
    },
    /// `for k, v in <expression>`
    Map {
        key_name: String,
        value_name: String,
        expression: String,
        #[serde(default)]
        throttle: Option<String>,
    },
}

impl ParallelLoopStatement {
    pub fn expression(&self) -> &str {
        match self {
            ParallelLoopStatement::List { expression, .. }
            | ParallelLoopStatement::Map { expression, .. } => expression,
        }
    }

    pub fn throttle_expression(&self) -> Option<&str> {
        match self {
            ParallelLoopStatement::List { throttle, .. }
            | ParallelLoopStatement::Map { throttle, .. } => throttle.as_deref(),
        }
    }

    /// Variable names the statement binds in each branch.
    pub fn loop_variables(&self) -> Vec<&str> {
        match self {
            ParallelLoopStatement::List { var_name, .. } => vec![var_name.as_str()],
            ParallelLoopStatement::Map {
                key_name,
                value_name,
                ..
            } => vec![key_name.as_str(), value_name.as_str()],
        }
    }
}

/// One unit of loop input handed to a single branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItem {
    Single(Value),
    Pair(Value, Value),
}

impl WorkItem {
    /// Flattened form used in event payloads: a pair becomes `[key, value]`.
    pub fn to_value(&self) -> Value {
        match self {
            WorkItem::Single(v) => v.clone(),
            WorkItem::Pair(k, v) => Value::List(vec![k.clone(), v.clone()]),
        }
    }
}

/// Where a step result leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultNavigation {
    pub next_step: StepId,
    /// Result label reported instead of the computed one (flow-end targets).
    #[serde(default)]
    pub preset_result: Option<String>,
}

/// A publish declaration: `name` bound from `expression` (or from the
/// variable of the same name when no expression is given).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    #[serde(default)]
    pub expression: Option<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: Some(expression.into()),
        }
    }

    pub fn expression(&self) -> &str {
        self.expression.as_deref().unwrap_or(&self.name)
    }
}

/// A flow step annotated with a parallel-loop statement, with the addresses
/// of its three execution steps (dispatch, branch body entry, join).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelLoopStep {
    pub name: String,
    pub statement: ParallelLoopStatement,
    #[serde(default)]
    pub publish: Vec<Output>,
    pub navigation: BTreeMap<String, ResultNavigation>,
    pub dispatch_step: StepId,
    pub branch_begin_step: StepId,
    pub join_step: StepId,
}
