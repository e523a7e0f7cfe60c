//! Cross-round bookkeeping for one parallel-loop instance.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use lanes_core::{LoopId, LoopResult, Value, Variables, WorkItem, FAILURE_RESULT};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::splitter::Split;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// No dispatch has run yet; the next one splits the loop.
    Unstarted,
    Active,
    /// Terminal. Any further dispatch or join is fatal.
    Finalized,
}

/// State carried between the dispatch and join calls of one loop instance.
///
/// Owned by the caller and threaded through every call; branch bodies never
/// see it.
#[derive(Debug, Clone)]
pub struct RoundState {
    loop_id: LoopId,
    pub(crate) phase: LoopPhase,
    pub(crate) pending: VecDeque<WorkItem>,
    pub(crate) throttle: Option<NonZeroUsize>,
    pub(crate) total: usize,
    /// Result maps of successful branches, in completion order.
    pub(crate) branches: Vec<Variables>,
    pub(crate) roi_baseline: Decimal,
    pub(crate) branch_failed: bool,
    pub(crate) parallelism_level: Option<u32>,
    /// Dispatched branches whose reports have not been drained.
    pub(crate) in_flight: usize,
    /// Batch size of every released round, in order.
    pub(crate) rounds: Vec<usize>,
}

impl RoundState {
    pub fn new(loop_id: LoopId) -> Self {
        Self {
            loop_id,
            phase: LoopPhase::Unstarted,
            pending: VecDeque::new(),
            throttle: None,
            total: 0,
            branches: Vec::new(),
            roi_baseline: Decimal::ZERO,
            branch_failed: false,
            parallelism_level: None,
            in_flight: 0,
            rounds: Vec::new(),
        }
    }

    pub fn loop_id(&self) -> &LoopId {
        &self.loop_id
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == LoopPhase::Finalized
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn throttle(&self) -> Option<NonZeroUsize> {
        self.throttle
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn branches(&self) -> &[Variables] {
        &self.branches
    }

    pub fn roi_baseline(&self) -> Decimal {
        self.roi_baseline
    }

    pub fn branch_failed(&self) -> bool {
        self.branch_failed
    }

    pub fn parallelism_level(&self) -> Option<u32> {
        self.parallelism_level
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn rounds(&self) -> &[usize] {
        &self.rounds
    }

    pub(crate) fn enter(&mut self) {
        self.parallelism_level = Some(self.parallelism_level.map_or(1, |level| level + 1));
    }

    /// Decrement the parallelism level, flooring at zero. `None` means no
    /// dispatch ever ran.
    pub(crate) fn leave(&mut self) -> Option<u32> {
        let level = self.parallelism_level?.saturating_sub(1);
        self.parallelism_level = Some(level);
        Some(level)
    }

    pub(crate) fn start(&mut self, split: Split, roi_baseline: Decimal) {
        self.total = split.items.len();
        self.pending = split.items.into();
        self.throttle = split.throttle;
        self.roi_baseline = roi_baseline;
        self.phase = LoopPhase::Active;
    }

    /// Remove the next batch from the queue and record its size.
    pub(crate) fn take_batch(&mut self) -> Vec<WorkItem> {
        let size = batch_size(self.pending.len(), self.throttle);
        self.rounds.push(size);
        self.pending.drain(..size).collect()
    }

    /// Clear the bookkeeping and hand out the accumulated branch results.
    pub(crate) fn finish(&mut self) -> Vec<Variables> {
        self.phase = LoopPhase::Finalized;
        self.pending.clear();
        self.throttle = None;
        self.total = 0;
        self.roi_baseline = Decimal::ZERO;
        self.in_flight = 0;
        std::mem::take(&mut self.branches)
    }
}

/// Size of the next batch given `pending` items and the throttle.
///
/// The first round absorbs the remainder so that every later round releases
/// exactly `throttle` branches.
pub fn batch_size(pending: usize, throttle: Option<NonZeroUsize>) -> usize {
    match throttle {
        None => pending,
        Some(_) if pending == 0 => 0,
        Some(t) => match pending % t.get() {
            0 => t.get(),
            remainder => remainder,
        },
    }
}

/// Every batch size the loop will release for `items` work items.
pub fn plan_rounds(items: usize, throttle: Option<NonZeroUsize>) -> Vec<usize> {
    let mut plan = Vec::new();
    let mut left = items;
    while left > 0 {
        let size = batch_size(left, throttle);
        plan.push(size);
        left -= size;
    }
    plan
}

/// `Failure` if any branch raised or any collected result is tagged
/// `FAILURE` under `result_key`.
pub fn aggregate_outcome(branches: &[Variables], branch_failed: bool, result_key: &str) -> LoopResult {
    let failed_result = Value::text(FAILURE_RESULT);
    if branch_failed
        || branches
            .iter()
            .any(|branch| branch.get(result_key) == Some(&failed_result))
    {
        LoopResult::Failure
    } else {
        LoopResult::Success
    }
}
