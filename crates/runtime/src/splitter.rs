//! Binding a loop statement into work items and a throttle.

use std::num::NonZeroUsize;

use lanes_core::{Context, ParallelLoopStatement, RunEnvironment, Value, WorkItem};
use tracing::debug;

use crate::bindings::{ContextView, ExpressionEvaluator};
use crate::config::SchedulerConfig;
use crate::error::LoopError;
use crate::events::{EventKind, EventSink, LanguageEvent};

/// A resolved loop: every work item in order, plus the admission limit
/// (`None` = unbounded).
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub items: Vec<WorkItem>,
    pub throttle: Option<NonZeroUsize>,
}

pub struct LoopSplitter<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
    config: &'a SchedulerConfig,
    events: &'a dyn EventSink,
}

impl<'a> LoopSplitter<'a> {
    pub fn new(
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a SchedulerConfig,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            evaluator,
            config,
            events,
        }
    }

    /// Evaluate the source and throttle expressions against the flow
    /// context and emit the split event.
    pub fn split(
        &self,
        step: &str,
        statement: &ParallelLoopStatement,
        context: &Context,
        env: &RunEnvironment,
    ) -> Result<Split, LoopError> {
        validate_statement(statement)?;
        let view = ContextView::of(context);
        let props = env.system_properties();

        let items = match statement {
            ParallelLoopStatement::List { expression, .. } => self
                .evaluator
                .evaluate_iterable(expression, &view, props)?
                .into_iter()
                .map(WorkItem::Single)
                .collect::<Vec<_>>(),
            ParallelLoopStatement::Map { expression, .. } => {
                match self.evaluator.evaluate_scalar(expression, &view, props)? {
                    Value::Map(entries) => entries
                        .into_iter()
                        .map(|(key, value)| WorkItem::Pair(Value::Text(key), value))
                        .collect(),
                    other => {
                        return Err(LoopError::malformed(format!(
                            "map loop over '{}' needs a Map, got {}",
                            expression,
                            other.type_name()
                        )))
                    }
                }
            }
        };
        if items.is_empty() {
            return Err(LoopError::malformed(format!(
                "loop expression '{}' produced no items",
                statement.expression()
            )));
        }

        let bound = match statement.throttle_expression() {
            Some(expression) => Some(self.bind_throttle(expression, &view, env)?),
            None => None,
        };
        let throttle = self.config.effective_throttle(bound);
        debug!(step, items = items.len(), throttle = ?throttle, "loop split");

        self.events.emit(
            LanguageEvent::new(
                EventKind::SplitBranches,
                "parallel loop expression bound",
                step,
                env.execution_path().current_path(),
            )
            .with(
                "split_items",
                Value::List(items.iter().map(WorkItem::to_value).collect()),
            ),
        );

        Ok(Split { items, throttle })
    }

    fn bind_throttle(
        &self,
        expression: &str,
        view: &ContextView<'_>,
        env: &RunEnvironment,
    ) -> Result<NonZeroUsize, LoopError> {
        let value = self
            .evaluator
            .evaluate_scalar(expression, view, env.system_properties())?;
        let parsed = match &value {
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            other => other.as_i64(),
        };
        parsed
            .and_then(|n| usize::try_from(n).ok())
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                LoopError::malformed(format!(
                    "throttle '{}' must be a positive integer, got {}",
                    expression, value
                ))
            })
    }
}

fn validate_statement(statement: &ParallelLoopStatement) -> Result<(), LoopError> {
    let names = statement.loop_variables();
    if names.iter().any(|name| name.trim().is_empty()) {
        return Err(LoopError::malformed("loop variable name is empty"));
    }
    if let [key, value] = names.as_slice() {
        if key == value {
            return Err(LoopError::malformed(format!(
                "map loop binds '{}' as both key and value",
                key
            )));
        }
    }
    if statement.expression().trim().is_empty() {
        return Err(LoopError::malformed("loop expression is empty"));
    }
    Ok(())
}
