//! Async driver that runs a parallel loop to completion on the in-memory
//! engine.

use std::sync::Arc;

use lanes_core::{ParallelLoopStep, RunEnvironment, StepId, Variables};
use lanes_engine::{BranchBody, InMemoryEngine};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::error::{LoopError, StepError};
use crate::join::JoinOutcome;
use crate::round::RoundState;
use crate::ParallelLoopScheduler;

/// Final state of a loop run by [`LoopDriver`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSummary {
    pub step: String,
    pub result: String,
    pub next_step: StepId,
    pub outputs: Variables,
    /// Batch size of every round, in release order.
    pub rounds: Vec<usize>,
    pub total_roi: Decimal,
    /// Parent execution path after the loop finished.
    pub execution_path: String,
}

pub struct LoopDriver<'a> {
    scheduler: &'a ParallelLoopScheduler,
    engine: &'a InMemoryEngine,
}

impl<'a> LoopDriver<'a> {
    pub fn new(scheduler: &'a ParallelLoopScheduler, engine: &'a InMemoryEngine) -> Self {
        Self { scheduler, engine }
    }

    /// Alternate dispatch, branch execution and join until the loop
    /// finalizes.
    pub async fn run(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
        body: Arc<dyn BranchBody>,
    ) -> Result<LoopSummary, StepError> {
        loop {
            self.scheduler.dispatch(self.engine, step, env, round)?;
            let ran = self
                .engine
                .run_registered(round.loop_id(), Arc::clone(&body))
                .await
                .map_err(|e| StepError::new(&step.name, e.into()))?;

            match self.scheduler.join(self.engine, step, env, round)? {
                JoinOutcome::Finalized {
                    result,
                    next_step,
                    outputs,
                } => {
                    return Ok(LoopSummary {
                        step: step.name.clone(),
                        result,
                        next_step,
                        outputs,
                        rounds: round.rounds().to_vec(),
                        total_roi: env.total_roi(),
                        execution_path: env.execution_path().current_path(),
                    })
                }
                JoinOutcome::AwaitMoreBranches { drained, .. } => {
                    debug!(step = %step.name, ran, drained, "round complete");
                    if ran == 0 && drained == 0 {
                        let remaining = round.pending() + round.in_flight();
                        return Err(StepError::new(
                            &step.name,
                            LoopError::Stalled { remaining },
                        ));
                    }
                }
            }
        }
    }
}
