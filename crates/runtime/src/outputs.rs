use lanes_core::{Context, Output, Value, Variables};

use crate::bindings::{ContextView, ExpressionEvaluator};
use crate::error::BindingError;

/// Binds a finalized loop's publish declarations.
///
/// Publish expressions see exactly two scopes: the collected branch results
/// under the branches-context key, and the globals of the pre-loop flow
/// context. Ordinary flow variables are not visible.
pub struct OutputBinder<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
    branches_context_key: &'a str,
}

impl<'a> OutputBinder<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator, branches_context_key: &'a str) -> Self {
        Self {
            evaluator,
            branches_context_key,
        }
    }

    pub fn bind(
        &self,
        publish: &[Output],
        flow_context: &Context,
        branches: &[Variables],
        system_properties: &Variables,
    ) -> Result<Variables, BindingError> {
        let collected = Value::List(branches.iter().cloned().map(Value::Map).collect());
        let scope: Variables = [(self.branches_context_key.to_string(), collected)]
            .into_iter()
            .collect();
        let view = ContextView::new(&scope, flow_context.magic_variables());
        self.evaluator.bind_publish(publish, &view, system_properties)
    }
}
