//! Releasing a batch of branches.

use lanes_core::{
    Context, ParallelLoopStatement, ParallelLoopStep, RunEnvironment, SessionMap, WorkItem,
};
use lanes_engine::ExecutionEngine;
use serde::Serialize;
use tracing::{debug, info};

use crate::bindings::ExpressionEvaluator;
use crate::config::SchedulerConfig;
use crate::error::LoopError;
use crate::events::{EventKind, EventSink, LanguageEvent};
use crate::round::{LoopPhase, RoundState};
use crate::splitter::LoopSplitter;

/// What one dispatch call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Branches registered with the engine by this call.
    pub released: usize,
    /// Work items still waiting for a later round.
    pub queued: usize,
}

pub struct BranchDispatcher<'a> {
    config: &'a SchedulerConfig,
    evaluator: &'a dyn ExpressionEvaluator,
    events: &'a dyn EventSink,
    engine: &'a dyn ExecutionEngine,
}

impl<'a> BranchDispatcher<'a> {
    pub fn new(
        config: &'a SchedulerConfig,
        evaluator: &'a dyn ExpressionEvaluator,
        events: &'a dyn EventSink,
        engine: &'a dyn ExecutionEngine,
    ) -> Self {
        Self {
            config,
            evaluator,
            events,
            engine,
        }
    }

    /// Fork the next batch of branches off the flow context on top of `env`.
    ///
    /// The flow context is popped for the duration of the call and pushed
    /// back before returning, on success and on error.
    pub fn dispatch(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
    ) -> Result<DispatchReport, LoopError> {
        if round.phase == LoopPhase::Finalized {
            return Err(LoopError::AlreadyFinalized {
                loop_id: round.loop_id().to_string(),
            });
        }
        let context = env.pop_context().ok_or(LoopError::MissingFlowContext)?;
        let released = self.release(step, env, round, &context);
        env.push_context(context);

        let report = released?;
        env.put_next_step(step.join_step);
        Ok(report)
    }

    fn release(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
        context: &Context,
    ) -> Result<DispatchReport, LoopError> {
        round.enter();

        if round.phase == LoopPhase::Unstarted {
            let split = LoopSplitter::new(self.evaluator, self.config, self.events).split(
                &step.name,
                &step.statement,
                context,
                env,
            )?;
            self.engine.establish_split(round.loop_id(), split.items.len())?;
            round.start(split, env.total_roi());
            env.execution_path_mut().down();
        }

        if round.in_flight > 0 || round.pending.is_empty() {
            debug!(
                step = %step.name,
                in_flight = round.in_flight,
                queued = round.pending.len(),
                "no branches released"
            );
            return Ok(DispatchReport {
                released: 0,
                queued: round.pending.len(),
            });
        }

        let batch = round.take_batch();
        info!(
            step = %step.name,
            round = round.rounds.len(),
            released = batch.len(),
            queued = round.pending.len(),
            "releasing branches"
        );
        let released = batch.len();
        for item in batch {
            self.fork_branch(step, env, round, context, item)?;
        }

        Ok(DispatchReport {
            released,
            queued: round.pending.len(),
        })
    }

    fn fork_branch(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
        context: &Context,
        item: WorkItem,
    ) -> Result<(), LoopError> {
        let mut branch_context = context.clone();
        bind_work_item(&mut branch_context, &step.statement, &item)?;

        // Reported at the loop-level sibling slot the branch is about to enter.
        self.events.emit(
            LanguageEvent::new(
                EventKind::BranchStart,
                "parallel loop branch created",
                &step.name,
                env.execution_path().current_path(),
            )
            .with("split_item", item.to_value()),
        );
        env.execution_path_mut().down();

        let mut branch_env = env.clone();
        branch_env.reset_stacks();
        branch_env.push_sessions_map(SessionMap::new());
        branch_env.set_total_roi(round.roi_baseline);
        branch_env.take_return_values();
        branch_env.clear_step_error();
        branch_env.put_next_step(step.branch_begin_step);
        branch_env.push_context(branch_context);

        let branch_id =
            self.engine
                .register_branch(round.loop_id(), branch_env, step.branch_begin_step)?;
        round.in_flight += 1;
        debug!(
            step = %step.name,
            branch = %branch_id,
            path = %env.execution_path(),
            "branch forked"
        );

        let path = env.execution_path_mut();
        path.up();
        path.forward();
        Ok(())
    }
}

fn bind_work_item(
    context: &mut Context,
    statement: &ParallelLoopStatement,
    item: &WorkItem,
) -> Result<(), LoopError> {
    match (statement, item) {
        (ParallelLoopStatement::List { var_name, .. }, WorkItem::Single(value)) => {
            context.put_variable(var_name.as_str(), value.clone());
        }
        (
            ParallelLoopStatement::Map {
                key_name,
                value_name,
                ..
            },
            WorkItem::Pair(key, value),
        ) => {
            context.put_variable(key_name.as_str(), key.clone());
            context.put_variable(value_name.as_str(), value.clone());
        }
        (_, item) => {
            return Err(LoopError::malformed(format!(
                "work item {} does not fit the loop statement",
                item.to_value()
            )))
        }
    }
    Ok(())
}
