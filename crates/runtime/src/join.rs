//! Collecting finished branches and finalizing the loop.

use lanes_core::{
    Context, ParallelLoopStep, ReturnValues, RunEnvironment, StepId, Value, Variables,
};
use lanes_engine::{BranchReport, ExecutionEngine};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bindings::ExpressionEvaluator;
use crate::config::SchedulerConfig;
use crate::error::LoopError;
use crate::events::{EventKind, EventSink, LanguageEvent};
use crate::navigation::NavigationResolver;
use crate::outputs::OutputBinder;
use crate::round::{aggregate_outcome, LoopPhase, RoundState};

/// Result of one join call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// Branches are still outstanding; control goes back to `redispatch`
    /// to release the next batch.
    AwaitMoreBranches { redispatch: StepId, drained: usize },
    /// Every branch was collected and the loop produced its step result.
    Finalized {
        result: String,
        next_step: StepId,
        outputs: Variables,
    },
}

impl JoinOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, JoinOutcome::Finalized { .. })
    }

    /// The step control moves to.
    pub fn next_step(&self) -> StepId {
        match self {
            JoinOutcome::AwaitMoreBranches { redispatch, .. } => *redispatch,
            JoinOutcome::Finalized { next_step, .. } => *next_step,
        }
    }
}

pub struct JoinAggregator<'a> {
    config: &'a SchedulerConfig,
    evaluator: &'a dyn ExpressionEvaluator,
    events: &'a dyn EventSink,
    engine: &'a dyn ExecutionEngine,
}

impl<'a> JoinAggregator<'a> {
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

    pub fn join(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
    ) -> Result<JoinOutcome, LoopError> {
        if round.phase == LoopPhase::Finalized {
            return Err(LoopError::AlreadyFinalized {
                loop_id: round.loop_id().to_string(),
            });
        }
        round.leave().ok_or(LoopError::NoParallelismRecorded)?;

        let reports = self.engine.drain_finished_branches(round.loop_id())?;
        let drained = reports.len();
        round.in_flight = round.in_flight.saturating_sub(drained);
        for report in reports {
            self.collect(step, env, round, report)?;
        }

        let remaining = self.engine.remaining_branches(round.loop_id());
        let outcome = if remaining == Some(0) {
            self.finalize(step, env, round)?
        } else {
            // Branch failures surface only when the loop finalizes.
            env.clear_step_error();
            env.put_next_step(step.dispatch_step);
            debug!(
                step = %step.name,
                drained,
                remaining = ?remaining,
                in_flight = round.in_flight,
                "awaiting more branches"
            );
            JoinOutcome::AwaitMoreBranches {
                redispatch: step.dispatch_step,
                drained,
            }
        };

        env.execution_path_mut().forward();
        Ok(outcome)
    }

    fn collect(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
        report: BranchReport,
    ) -> Result<(), LoopError> {
        if report.is_exception() {
            warn!(
                step = %step.name,
                branch = %report.branch_id,
                exception = report.exception.as_deref().unwrap_or_default(),
                "branch raised; its results are discarded"
            );
            round.branch_failed = true;
            return Ok(());
        }

        let branch = report.branch_id.to_string();
        let context = report
            .env
            .peek_context()
            .ok_or_else(|| LoopError::MissingBranchContext {
                branch: branch.clone(),
            })?;
        let branch_result = report
            .env
            .return_values()
            .map(|rv| rv.result.clone())
            .ok_or_else(|| LoopError::MissingBranchResult {
                branch: branch.clone(),
            })?;

        let mut result = context.variables().clone();
        result.insert(
            self.config.branch_result_key.clone(),
            Value::text(branch_result.as_str()),
        );
        round.branches.push(result);
        env.add_roi(report.cost - round.roi_baseline);

        self.events.emit(
            LanguageEvent::new(
                EventKind::BranchEnd,
                "parallel loop branch ended",
                &step.name,
                report.env.execution_path().current_path(),
            )
            .with("branch_id", Value::text(branch))
            .with("branch_result", Value::text(branch_result)),
        );
        Ok(())
    }

    fn finalize(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
    ) -> Result<JoinOutcome, LoopError> {
        let branch_failed = round.branch_failed;
        let rounds = round.rounds.len();
        let branches = round.finish();
        env.execution_path_mut().up();
        self.engine.release_loop(round.loop_id())?;

        if branch_failed {
            return Err(LoopError::BranchException);
        }

        let context = env.pop_context().ok_or(LoopError::MissingFlowContext)?;
        let concluded = self.conclude(step, env, &context, &branches);
        env.push_context(context);
        let outcome = concluded?;

        info!(
            step = %step.name,
            branches = branches.len(),
            rounds,
            next = %outcome.next_step(),
            "parallel loop finalized"
        );
        Ok(outcome)
    }

    fn conclude(
        &self,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        context: &Context,
        branches: &[Variables],
    ) -> Result<JoinOutcome, LoopError> {
        let path = env.execution_path().current_path();
        self.events.emit(
            LanguageEvent::new(
                EventKind::JoinBranchesStart,
                "parallel loop output binding started",
                &step.name,
                path.clone(),
            )
            .with(
                "publish",
                Value::List(step.publish.iter().map(|o| Value::text(o.name.as_str())).collect()),
            )
            .with(
                "navigation",
                Value::List(step.navigation.keys().map(|k| Value::text(k.as_str())).collect()),
            ),
        );

        let outputs = OutputBinder::new(self.evaluator, &self.config.branches_context_key).bind(
            &step.publish,
            context,
            branches,
            env.system_properties(),
        )?;
        let outcome = aggregate_outcome(branches, false, &self.config.branch_result_key);
        let transition = NavigationResolver::resolve(&step.navigation, outcome)?;

        self.events.emit(
            LanguageEvent::new(
                EventKind::JoinBranchesEnd,
                "parallel loop output binding finished",
                &step.name,
                path,
            )
            .with("outputs", Value::Map(outputs.clone()))
            .with("result", Value::text(transition.result.as_str()))
            .with("next_step", step_value(transition.next_step)),
        );

        env.put_return_values(ReturnValues::new(outputs.clone(), transition.result.as_str()));
        env.put_next_step(transition.next_step);

        Ok(JoinOutcome::Finalized {
            result: transition.result,
            next_step: transition.next_step,
            outputs,
        })
    }
}

fn step_value(step: StepId) -> Value {
    i64::try_from(step.0)
        .map(Value::Int)
        .unwrap_or_else(|_| Value::text(step.to_string()))
}
