use std::fmt;

use lanes_core::RunEnvironment;
use rust_decimal::Decimal;

/// Engine-assigned identity of a registered branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId(pub u64);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A branch waiting to be executed, as registered by the dispatcher.
#[derive(Debug, Clone)]
pub struct RegisteredBranch {
    pub branch_id: BranchId,
    pub env: RunEnvironment,
    pub start_step: lanes_core::StepId,
}

/// What a branch body hands back when it stops.
#[derive(Debug, Clone)]
pub struct BranchCompletion {
    /// Final environment of the branch; its top context holds the branch
    /// variables and its return values carry the branch result.
    pub env: RunEnvironment,
    /// Set when the branch body raised instead of finishing.
    pub exception: Option<String>,
}

impl BranchCompletion {
    pub fn finished(env: RunEnvironment) -> Self {
        Self {
            env,
            exception: None,
        }
    }

    pub fn raised(env: RunEnvironment, exception: impl Into<String>) -> Self {
        Self {
            env,
            exception: Some(exception.into()),
        }
    }
}

/// Completion report delivered to the join step.
#[derive(Debug, Clone)]
pub struct BranchReport {
    pub branch_id: BranchId,
    pub env: RunEnvironment,
    pub exception: Option<String>,
    /// Cumulative cost metric reported by the branch (includes whatever
    /// it inherited from its parent).
    pub cost: Decimal,
}

impl BranchReport {
    pub fn from_completion(branch_id: BranchId, completion: BranchCompletion) -> Self {
        let cost = completion.env.total_roi();
        Self {
            branch_id,
            env: completion.env,
            exception: completion.exception,
            cost,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.exception.as_deref().is_some_and(|e| !e.is_empty())
    }
}
