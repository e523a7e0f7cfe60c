//! Lanes core data model -- the state a flow instance carries into a
//! parallel loop and the isolated copies handed to each branch.
//!
//! Every type here owns its storage. Forking a branch is a plain `clone()`;
//! no branch can observe another branch's mutations.

pub mod context;
pub mod env;
pub mod path;
pub mod step;
pub mod value;

pub use context::{Context, Variables};
pub use env::{ReturnValues, RunEnvironment, SessionMap};
pub use path::ExecutionPath;
pub use step::{
    LoopId, LoopResult, Output, ParallelLoopStatement, ParallelLoopStep, ResultNavigation,
    StepId, WorkItem, FAILURE_RESULT, SUCCESS_RESULT,
};
pub use value::Value;
