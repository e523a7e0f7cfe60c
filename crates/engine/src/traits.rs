use lanes_core::{LoopId, RunEnvironment, StepId};

use crate::error::EngineError;
use crate::report::{BranchCompletion, BranchId, BranchReport};

/// The execution engine a parallel loop hands its branches to.
///
/// The scheduler never runs branch bodies itself. It registers one forked
/// environment per work item, and later drains completion reports.
///
/// ## Remaining-branch counter
///
/// `remaining_branches` returns `None` until `establish_split` has been
/// called for the loop, then `Some(total - delivered)`, where `delivered`
/// counts reports already handed out by `drain_finished_branches`. A loop
/// is on its last iteration only when the counter is established and zero.
///
/// ## Delivery
///
/// Every branch completion must be delivered to exactly one
/// `drain_finished_branches` call for its loop.
///
/// ## Release
///
/// Once the loop has finalized, `release_loop` drops everything the engine
/// holds for it. The counter goes back to `None` and the same `LoopId` can
/// be split again, e.g. when navigation routes a flow back into the loop.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` so the same engine can serve many
/// flow instances while branch bodies run on other threads.
pub trait ExecutionEngine: Send + Sync {
    /// Record the total number of branches the loop will register.
    fn establish_split(&self, loop_id: &LoopId, total: usize) -> Result<(), EngineError>;

    /// Queue a branch environment to start at `start_step`.
    fn register_branch(
        &self,
        loop_id: &LoopId,
        env: RunEnvironment,
        start_step: StepId,
    ) -> Result<BranchId, EngineError>;

    /// Hand out every report finished since the previous drain, in
    /// completion order.
    fn drain_finished_branches(&self, loop_id: &LoopId) -> Result<Vec<BranchReport>, EngineError>;

    /// Branches of this loop whose reports have not been drained yet.
    fn remaining_branches(&self, loop_id: &LoopId) -> Option<usize>;

    /// Forget the loop's split size, counters and any undelivered reports.
    fn release_loop(&self, loop_id: &LoopId) -> Result<(), EngineError>;
}

/// Body executed for each registered branch.
pub trait BranchBody: Send + Sync + 'static {
    fn run(&self, branch_id: BranchId, env: RunEnvironment) -> BranchCompletion;
}

impl<F> BranchBody for F
where
    F: Fn(BranchId, RunEnvironment) -> BranchCompletion + Send + Sync + 'static,
{
    fn run(&self, branch_id: BranchId, env: RunEnvironment) -> BranchCompletion {
        self(branch_id, env)
    }
}
