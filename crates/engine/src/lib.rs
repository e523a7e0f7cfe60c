mod error;
mod memory;
mod report;
mod traits;

pub mod conformance;

pub use error::EngineError;
pub use memory::InMemoryEngine;
pub use report::{BranchCompletion, BranchId, BranchReport, RegisteredBranch};
pub use traits::{BranchBody, ExecutionEngine};
