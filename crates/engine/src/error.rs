use lanes_core::LoopId;

/// All errors that can be returned by an `ExecutionEngine` implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The split size for this loop was already established.
    #[error("split size already established for loop {loop_id}")]
    SplitAlreadyEstablished { loop_id: LoopId },

    /// A branch was registered before the loop's split size was established.
    #[error("loop {loop_id} has no established split size")]
    SplitNotEstablished { loop_id: LoopId },

    /// More branches were registered than the established split size allows.
    #[error("loop {loop_id} already registered all {total} branches")]
    TooManyBranches { loop_id: LoopId, total: usize },

    /// A completion arrived for a branch the engine is not running.
    #[error("unknown branch {branch_id} in loop {loop_id}")]
    UnknownBranch { loop_id: LoopId, branch_id: u64 },

    /// A backend-specific failure (lock poisoning, transport, etc.).
    #[error("engine backend error: {0}")]
    Backend(String),
}
