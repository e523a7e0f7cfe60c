//! Throttled split/join scheduling for parallel-loop steps.
//!
//! A parallel loop runs as two execution steps. The dispatch step binds the
//! loop (first call only), forks one isolated [`RunEnvironment`] per work
//! item of the next batch and registers them with the engine. The join step
//! drains finished branches and either sends control back to dispatch or
//! finalizes the loop: publish outputs are bound, the aggregate result is
//! computed, and navigation picks the next step.
//!
//! ```text
//! dispatch ──► engine runs branches ──► join ──► AwaitMoreBranches ─┐
//!    ▲                                    │                         │
//!    └────────────────────────────────────┼─────────────────────────┘
//!                                         └────► Finalized
//! ```

pub mod bindings;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod events;
pub mod join;
pub mod navigation;
pub mod outputs;
pub mod round;
pub mod splitter;

use std::sync::Arc;

use lanes_core::{ParallelLoopStep, RunEnvironment};
use lanes_engine::ExecutionEngine;
use tracing::error;

pub use bindings::{ContextView, ExpressionEvaluator, PathEvaluator};
pub use config::{ConfigError, SchedulerConfig, BRANCHES_CONTEXT_KEY, BRANCH_RESULT_KEY};
pub use dispatch::{BranchDispatcher, DispatchReport};
pub use driver::{LoopDriver, LoopSummary};
pub use error::{BindingError, LoopError, StepError};
pub use events::{EventKind, EventSink, LanguageEvent, RecordingEventSink, TracingEventSink};
pub use join::{JoinAggregator, JoinOutcome};
pub use navigation::{NavigationResolver, Transition};
pub use outputs::OutputBinder;
pub use round::{aggregate_outcome, batch_size, plan_rounds, LoopPhase, RoundState};
pub use splitter::{LoopSplitter, Split};

/// Entry point for the dispatch and join steps of parallel loops.
///
/// Holds no per-loop state: everything a loop instance carries between
/// calls lives in its [`RoundState`].
pub struct ParallelLoopScheduler {
    config: SchedulerConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    events: Arc<dyn EventSink>,
}

impl ParallelLoopScheduler {
    pub fn new(
        config: SchedulerConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            evaluator,
            events,
        }
    }

    /// Scheduler with the default config, [`PathEvaluator`] and
    /// [`TracingEventSink`].
    pub fn with_defaults() -> Self {
        Self::new(
            SchedulerConfig::default(),
            Arc::new(PathEvaluator::new()),
            Arc::new(TracingEventSink),
        )
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run the dispatch step: release the next batch of branches.
    pub fn dispatch(
        &self,
        engine: &dyn ExecutionEngine,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
    ) -> Result<DispatchReport, StepError> {
        BranchDispatcher::new(
            &self.config,
            self.evaluator.as_ref(),
            self.events.as_ref(),
            engine,
        )
        .dispatch(step, env, round)
        .map_err(|source| fatal(step, "dispatch", source))
    }

    /// Run the join step: collect finished branches, then redirect or
    /// finalize.
    pub fn join(
        &self,
        engine: &dyn ExecutionEngine,
        step: &ParallelLoopStep,
        env: &mut RunEnvironment,
        round: &mut RoundState,
    ) -> Result<JoinOutcome, StepError> {
        JoinAggregator::new(
            &self.config,
            self.evaluator.as_ref(),
            self.events.as_ref(),
            engine,
        )
        .join(step, env, round)
        .map_err(|source| fatal(step, "join", source))
    }
}

fn fatal(step: &ParallelLoopStep, phase: &str, source: LoopError) -> StepError {
    error!(step = %step.name, phase, error = %source, "parallel loop step failed");
    StepError::new(&step.name, source)
}
