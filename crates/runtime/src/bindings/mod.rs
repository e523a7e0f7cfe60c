//! Expression binding contract.
//!
//! The scheduler never interprets loop, throttle or publish expressions
//! itself; it hands them to an [`ExpressionEvaluator`] together with a
//! read-only view of the variables in scope.

mod path_eval;

pub use path_eval::PathEvaluator;

use lanes_core::{Context, Output, Value, Variables};

use crate::error::BindingError;

/// Read-only pair of scopes an expression is evaluated against: ordinary
/// variables first, then globals.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    variables: &'a Variables,
    globals: &'a Variables,
}

impl<'a> ContextView<'a> {
    pub fn new(variables: &'a Variables, globals: &'a Variables) -> Self {
        Self { variables, globals }
    }

    pub fn of(context: &'a Context) -> Self {
        Self::new(context.variables(), context.magic_variables())
    }

    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.variables
            .get(name)
            .or_else(|| self.globals.get(name))
    }
}

pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate a loop source expression into the sequence to split.
    fn evaluate_iterable(
        &self,
        expression: &str,
        view: &ContextView<'_>,
        system_properties: &Variables,
    ) -> Result<Vec<Value>, BindingError>;

    fn evaluate_scalar(
        &self,
        expression: &str,
        view: &ContextView<'_>,
        system_properties: &Variables,
    ) -> Result<Value, BindingError>;

    /// Bind every publish declaration, in order.
    fn bind_publish(
        &self,
        outputs: &[Output],
        view: &ContextView<'_>,
        system_properties: &Variables,
    ) -> Result<Variables, BindingError>;
}
