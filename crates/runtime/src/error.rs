use lanes_engine::EngineError;

/// Failure reported by an expression evaluator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingError {
    /// The expression text could not be parsed.
    #[error("cannot parse expression '{expression}': {message}")]
    Syntax { expression: String, message: String },

    /// A variable referenced by the expression is not bound.
    #[error("unbound variable '{name}' in expression '{expression}'")]
    UnboundVariable { name: String, expression: String },

    /// The value has the wrong shape for the requested operation.
    #[error("expression '{expression}': {message}")]
    Type { expression: String, message: String },
}

/// Fatal conditions of a parallel-loop step.
///
/// These are flow-author or programming errors. They are raised
/// immediately, never retried, and surface wrapped in a [`StepError`].
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The loop statement or the data it produced cannot be split.
    #[error("malformed parallel loop: {message}")]
    MalformedLoop { message: String },

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The run environment had no flow context to fork from or restore.
    #[error("no flow context on the run environment stack")]
    MissingFlowContext,

    /// A successful branch report carried no context.
    #[error("branch {branch} reported no context")]
    MissingBranchContext { branch: String },

    /// A successful branch report carried no result.
    #[error("branch {branch} finished without a result")]
    MissingBranchResult { branch: String },

    /// Join was called before any dispatch recorded a parallelism level.
    #[error("parallelism level was never recorded; join called before dispatch")]
    NoParallelismRecorded,

    /// Dispatch or join was called on a finalized loop.
    #[error("parallel loop {loop_id} is already finalized")]
    AlreadyFinalized { loop_id: String },

    /// The step navigation has no entry for the aggregate result.
    #[error("no matching navigation for the parallel loop result: {result}")]
    MissingNavigation { result: String },

    /// At least one branch raised; surfaced only when the loop finalizes.
    #[error("exception occurred during lane execution")]
    BranchException,

    /// The driver found no branch in flight, none queued, and the engine
    /// still reporting outstanding branches.
    #[error("parallel loop stalled with {remaining} branches outstanding")]
    Stalled { remaining: usize },
}

impl LoopError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        LoopError::MalformedLoop {
            message: message.into(),
        }
    }
}

/// A fatal loop error tagged with the step it happened in.
#[derive(Debug, thiserror::Error)]
#[error("error running '{step}': {source}")]
pub struct StepError {
    pub step: String,
    #[source]
    pub source: LoopError,
}

impl StepError {
    pub fn new(step: impl Into<String>, source: LoopError) -> Self {
        Self {
            step: step.into(),
            source,
        }
    }
}
