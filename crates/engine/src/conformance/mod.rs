//! Conformance test suite for `ExecutionEngine` implementations.
//!
//! This module provides a backend-agnostic test suite that any engine
//! can run to verify it honours the contract the parallel-loop scheduler
//! relies on:
//!
//! - **Remaining counter**: not established before the split, then counts
//!   down only as reports are drained
//! - **Delivery**: each completion is delivered to exactly one drain call
//! - **Isolation**: loops never see each other's branches or counters
//! - **Release**: a released loop reports `None` and can be split again
//!
//! # Usage
//!
//! ```ignore
//! use lanes_engine::conformance::run_conformance_suite;
//!
//! #[test]
//! fn my_engine_conformance() {
//!     let report = run_conformance_suite(MyEngine::new);
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod delivery;
mod isolation;
mod remaining;

use std::fmt;

use lanes_core::{Context, LoopId, ReturnValues, RunEnvironment, StepId, Value, Variables};
use rust_decimal::Decimal;

use crate::report::{BranchCompletion, BranchId};
use crate::{EngineError, ExecutionEngine, InMemoryEngine};

/// Hook the suite uses to make registered branches finish synchronously.
pub trait ConformanceHarness: ExecutionEngine {
    /// Run every registered-but-unstarted branch of the loop through `body`
    /// and record the completions. Returns how many branches ran.
    fn finish_registered(
        &self,
        loop_id: &LoopId,
        body: &dyn Fn(BranchId, RunEnvironment) -> BranchCompletion,
    ) -> Result<usize, EngineError>;
}

impl ConformanceHarness for InMemoryEngine {
    fn finish_registered(
        &self,
        loop_id: &LoopId,
        body: &dyn Fn(BranchId, RunEnvironment) -> BranchCompletion,
    ) -> Result<usize, EngineError> {
        let branches = self.take_registered(loop_id)?;
        let count = branches.len();
        for branch in branches {
            let completion = body(branch.branch_id, branch.env);
            self.complete_branch(loop_id, branch.branch_id, completion)?;
        }
        Ok(count)
    }
}

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "remaining", "delivery").
    pub category: String,
    /// Test name (e.g. "remaining_not_established_before_split").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Outcome of running the suite against one engine.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ConformanceReport {
    /// Failed checks of one contract area (`remaining`, `delivery`, ...).
    pub fn failures_in<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a TestResult> {
        self.results
            .iter()
            .filter(move |r| !r.passed && r.category == category)
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "engine contract: {} of {} checks hold",
            self.passed, self.total
        )?;
        let mut categories: Vec<&str> =
            self.results.iter().map(|r| r.category.as_str()).collect();
        categories.dedup();
        for category in categories {
            let failures: Vec<&TestResult> = self.failures_in(category).collect();
            if failures.is_empty() {
                continue;
            }
            writeln!(f, "  {} contract broken:", category)?;
            for r in failures {
                writeln!(
                    f,
                    "    {}: {}",
                    r.name,
                    r.message.as_deref().unwrap_or("no detail")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against an engine.
///
/// The `factory` function is called once per test to create a fresh,
/// empty engine, ensuring test isolation.
pub fn run_conformance_suite<E, F>(factory: F) -> ConformanceReport
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let mut results = Vec::new();

    results.extend(remaining::run_remaining_tests(&factory));
    results.extend(delivery::run_delivery_tests(&factory));
    results.extend(isolation::run_isolation_tests(&factory));

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const BRANCH_START: StepId = StepId(3);

fn loop_id(name: &str) -> LoopId {
    LoopId::new(format!("conformance/{}", name))
}

/// A branch environment whose top context binds `item = n`.
fn branch_env(n: i64) -> RunEnvironment {
    let mut env = RunEnvironment::new();
    env.push_context(Context::new(
        [("item".to_string(), Value::Int(n))].into_iter().collect(),
    ));
    env
}

/// Register `count` branches after establishing the split.
fn register_all<E: ExecutionEngine>(engine: &E, id: &LoopId, count: usize) -> Result<(), String> {
    engine
        .establish_split(id, count)
        .map_err(|e| format!("loop {}: establish_split failed: {}", id, e))?;
    for n in 0..count {
        engine
            .register_branch(id, branch_env(n as i64), BRANCH_START)
            .map_err(|e| format!("loop {}: register_branch {} failed: {}", id, n, e))?;
    }
    Ok(())
}

fn succeed(_id: BranchId, mut env: RunEnvironment) -> BranchCompletion {
    env.add_roi(Decimal::ONE);
    env.put_return_values(ReturnValues::new(Variables::new(), lanes_core::SUCCESS_RESULT));
    BranchCompletion::finished(env)
}

fn expect_remaining<E: ExecutionEngine>(
    engine: &E,
    id: &LoopId,
    expected: Option<usize>,
) -> Result<(), String> {
    let actual = engine.remaining_branches(id);
    if actual != expected {
        return Err(format!(
            "loop {}: remaining_branches expected {:?}, got {:?}",
            id, expected, actual
        ));
    }
    Ok(())
}
