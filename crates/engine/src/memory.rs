//! In-process execution engine.
//!
//! Registered branches wait in a per-loop queue until
//! [`InMemoryEngine::run_registered`] executes them concurrently on the
//! tokio blocking pool. Completions are collected in the order branches
//! finish, which is generally not the order they were registered in.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lanes_core::{LoopId, RunEnvironment, StepId};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::report::{BranchCompletion, BranchId, BranchReport, RegisteredBranch};
use crate::traits::{BranchBody, ExecutionEngine};

#[derive(Debug, Default)]
struct LoopLedger {
    total: Option<usize>,
    registered: usize,
    queued: Vec<RegisteredBranch>,
    running: BTreeSet<BranchId>,
    finished: Vec<BranchReport>,
    delivered: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    loops: Mutex<HashMap<LoopId, LoopLedger>>,
    next_branch: AtomicU64,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_ledger<T>(
        &self,
        loop_id: &LoopId,
        f: impl FnOnce(&mut LoopLedger) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut loops = self
            .loops
            .lock()
            .map_err(|e| EngineError::Backend(format!("engine state poisoned: {}", e)))?;
        f(loops.entry(loop_id.clone()).or_default())
    }

    /// Read the loop's ledger without creating one.
    fn read_ledger<T>(
        &self,
        loop_id: &LoopId,
        f: impl FnOnce(Option<&LoopLedger>) -> T,
    ) -> Option<T> {
        let loops = self.loops.lock().ok()?;
        Some(f(loops.get(loop_id)))
    }

    /// Number of loops the engine currently holds state for.
    pub fn tracked_loops(&self) -> usize {
        self.loops.lock().map(|loops| loops.len()).unwrap_or(0)
    }

    /// Move every queued branch of the loop to the running set and return them.
    pub fn take_registered(&self, loop_id: &LoopId) -> Result<Vec<RegisteredBranch>, EngineError> {
        self.with_ledger(loop_id, |ledger| {
            let branches = std::mem::take(&mut ledger.queued);
            ledger
                .running
                .extend(branches.iter().map(|b| b.branch_id));
            Ok(branches)
        })
    }

    /// Record the completion of a running branch.
    pub fn complete_branch(
        &self,
        loop_id: &LoopId,
        branch_id: BranchId,
        completion: BranchCompletion,
    ) -> Result<(), EngineError> {
        self.with_ledger(loop_id, |ledger| {
            if !ledger.running.remove(&branch_id) {
                return Err(EngineError::UnknownBranch {
                    loop_id: loop_id.clone(),
                    branch_id: branch_id.0,
                });
            }
            if let Some(exception) = &completion.exception {
                warn!(loop_id = %loop_id, branch = %branch_id, %exception, "branch raised");
            }
            ledger
                .finished
                .push(BranchReport::from_completion(branch_id, completion));
            Ok(())
        })
    }

    /// Branches registered or running but not yet completed.
    pub fn in_flight(&self, loop_id: &LoopId) -> usize {
        self.read_ledger(loop_id, |ledger| {
            ledger.map_or(0, |l| l.queued.len() + l.running.len())
        })
        .unwrap_or(0)
    }

    /// Execute every queued branch of the loop concurrently and record
    /// their completions. A body that panics is reported as an exception.
    ///
    /// Returns the number of branches executed.
    pub async fn run_registered(
        &self,
        loop_id: &LoopId,
        body: Arc<dyn BranchBody>,
    ) -> Result<usize, EngineError> {
        let branches = self.take_registered(loop_id)?;
        let count = branches.len();
        let mut tasks = JoinSet::new();

        for branch in branches {
            let body = Arc::clone(&body);
            tasks.spawn_blocking(move || {
                let RegisteredBranch { branch_id, env, .. } = branch;
                let fallback = env.clone();
                let completion = panic::catch_unwind(AssertUnwindSafe(|| body.run(branch_id, env)))
                    .unwrap_or_else(|payload| {
                        BranchCompletion::raised(fallback, panic_message(payload.as_ref()))
                    });
                (branch_id, completion)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (branch_id, completion) = joined
                .map_err(|e| EngineError::Backend(format!("branch task failed: {}", e)))?;
            self.complete_branch(loop_id, branch_id, completion)?;
        }

        Ok(count)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "branch body panicked".to_string()
    }
}

impl ExecutionEngine for InMemoryEngine {
    fn establish_split(&self, loop_id: &LoopId, total: usize) -> Result<(), EngineError> {
        self.with_ledger(loop_id, |ledger| {
            if ledger.total.is_some() {
                return Err(EngineError::SplitAlreadyEstablished {
                    loop_id: loop_id.clone(),
                });
            }
            ledger.total = Some(total);
            Ok(())
        })
    }

    fn register_branch(
        &self,
        loop_id: &LoopId,
        env: RunEnvironment,
        start_step: StepId,
    ) -> Result<BranchId, EngineError> {
        let branch_id = BranchId(self.next_branch.fetch_add(1, Ordering::Relaxed));
        self.with_ledger(loop_id, |ledger| {
            let total = ledger.total.ok_or_else(|| EngineError::SplitNotEstablished {
                loop_id: loop_id.clone(),
            })?;
            if ledger.registered >= total {
                return Err(EngineError::TooManyBranches {
                    loop_id: loop_id.clone(),
                    total,
                });
            }
            ledger.registered += 1;
            debug!(
                loop_id = %loop_id,
                branch = %branch_id,
                path = %env.execution_path(),
                start = %start_step,
                "branch registered"
            );
            ledger.queued.push(RegisteredBranch {
                branch_id,
                env,
                start_step,
            });
            Ok(branch_id)
        })
    }

    fn drain_finished_branches(&self, loop_id: &LoopId) -> Result<Vec<BranchReport>, EngineError> {
        self.with_ledger(loop_id, |ledger| {
            let reports = std::mem::take(&mut ledger.finished);
            ledger.delivered += reports.len();
            debug!(loop_id = %loop_id, drained = reports.len(), "finished branches drained");
            Ok(reports)
        })
    }

    fn remaining_branches(&self, loop_id: &LoopId) -> Option<usize> {
        self.read_ledger(loop_id, |ledger| {
            let ledger = ledger?;
            ledger
                .total
                .map(|total| total.saturating_sub(ledger.delivered))
        })
        .flatten()
    }

    fn release_loop(&self, loop_id: &LoopId) -> Result<(), EngineError> {
        let mut loops = self
            .loops
            .lock()
            .map_err(|e| EngineError::Backend(format!("engine state poisoned: {}", e)))?;
        if let Some(ledger) = loops.remove(loop_id) {
            let undelivered = ledger.finished.len() + ledger.queued.len() + ledger.running.len();
            if undelivered > 0 {
                warn!(loop_id = %loop_id, undelivered, "loop released with branches outstanding");
            }
            debug!(loop_id = %loop_id, "loop released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanes_core::{Context, ReturnValues, Variables};

    fn loop_id() -> LoopId {
        LoopId::new("exec-1/deploy")
    }

    #[test]
    fn register_requires_established_split() {
        let engine = InMemoryEngine::new();
        let err = engine
            .register_branch(&loop_id(), RunEnvironment::new(), StepId(3))
            .unwrap_err();
        assert!(matches!(err, EngineError::SplitNotEstablished { .. }));
    }

    #[test]
    fn register_rejects_more_than_total() {
        let engine = InMemoryEngine::new();
        engine.establish_split(&loop_id(), 1).unwrap();
        engine
            .register_branch(&loop_id(), RunEnvironment::new(), StepId(3))
            .unwrap();
        let err = engine
            .register_branch(&loop_id(), RunEnvironment::new(), StepId(3))
            .unwrap_err();
        assert!(matches!(err, EngineError::TooManyBranches { total: 1, .. }));
    }

    #[test]
    fn completing_unknown_branch_fails() {
        let engine = InMemoryEngine::new();
        let err = engine
            .complete_branch(
                &loop_id(),
                BranchId(42),
                BranchCompletion::finished(RunEnvironment::new()),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownBranch { branch_id: 42, .. }));
    }

    #[tokio::test]
    async fn run_registered_reports_every_branch() {
        let engine = InMemoryEngine::new();
        let id = loop_id();
        engine.establish_split(&id, 3).unwrap();
        for i in 0..3 {
            let mut env = RunEnvironment::new();
            env.push_context(Context::new(
                [("n".to_string(), lanes_core::Value::Int(i))]
                    .into_iter()
                    .collect(),
            ));
            engine.register_branch(&id, env, StepId(3)).unwrap();
        }

        let body = |_id: BranchId, mut env: RunEnvironment| {
            env.put_return_values(ReturnValues::new(Variables::new(), "SUCCESS"));
            BranchCompletion::finished(env)
        };
        let ran = engine.run_registered(&id, Arc::new(body)).await.unwrap();
        assert_eq!(ran, 3);
        assert_eq!(engine.in_flight(&id), 0);

        let reports = engine.drain_finished_branches(&id).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| !r.is_exception()));
        assert_eq!(engine.remaining_branches(&id), Some(0));
    }

    #[tokio::test]
    async fn panicking_body_becomes_exception_report() {
        let engine = InMemoryEngine::new();
        let id = loop_id();
        engine.establish_split(&id, 1).unwrap();
        engine
            .register_branch(&id, RunEnvironment::new(), StepId(3))
            .unwrap();

        let body = |_id: BranchId, _env: RunEnvironment| -> BranchCompletion {
            panic!("lane exploded");
        };
        engine.run_registered(&id, Arc::new(body)).await.unwrap();

        let reports = engine.drain_finished_branches(&id).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].exception.as_deref(), Some("lane exploded"));
    }

    #[test]
    fn released_loop_can_be_split_again() {
        let engine = InMemoryEngine::new();
        let id = loop_id();
        engine.establish_split(&id, 1).unwrap();
        assert_eq!(engine.tracked_loops(), 1);

        engine.release_loop(&id).unwrap();
        assert_eq!(engine.remaining_branches(&id), None);
        assert_eq!(engine.tracked_loops(), 0);
        engine.establish_split(&id, 2).unwrap();
        assert_eq!(engine.remaining_branches(&id), Some(2));
    }

    #[test]
    fn queries_do_not_create_ledgers() {
        let engine = InMemoryEngine::new();
        assert_eq!(engine.remaining_branches(&loop_id()), None);
        assert_eq!(engine.in_flight(&loop_id()), 0);
        assert_eq!(engine.tracked_loops(), 0);
    }
}
