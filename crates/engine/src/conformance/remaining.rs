use super::{
    expect_remaining, loop_id, register_all, succeed, ConformanceHarness, TestResult,
};

pub(super) fn run_remaining_tests<E, F>(factory: &F) -> Vec<TestResult>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    vec![
        TestResult::from_result(
            "remaining",
            "remaining_not_established_before_split",
            remaining_not_established_before_split(factory),
        ),
        TestResult::from_result(
            "remaining",
            "remaining_equals_total_after_split",
            remaining_equals_total_after_split(factory),
        ),
        TestResult::from_result(
            "remaining",
            "undrained_completions_do_not_count",
            undrained_completions_do_not_count(factory),
        ),
        TestResult::from_result(
            "remaining",
            "remaining_counts_down_per_drain",
            remaining_counts_down_per_drain(factory),
        ),
        TestResult::from_result(
            "remaining",
            "release_resets_counter",
            release_resets_counter(factory),
        ),
        TestResult::from_result(
            "remaining",
            "released_loop_accepts_new_split",
            released_loop_accepts_new_split(factory),
        ),
    ]
}

fn remaining_not_established_before_split<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    expect_remaining(&engine, &loop_id("fresh"), None)
}

fn remaining_equals_total_after_split<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("split");
    engine
        .establish_split(&id, 5)
        .map_err(|e| format!("establish_split failed: {}", e))?;
    expect_remaining(&engine, &id, Some(5))
}

fn undrained_completions_do_not_count<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("undrained");
    register_all(&engine, &id, 3)?;
    engine
        .finish_registered(&id, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;
    expect_remaining(&engine, &id, Some(3))
}

fn remaining_counts_down_per_drain<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("countdown");
    register_all(&engine, &id, 2)?;
    engine
        .finish_registered(&id, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;
    let drained = engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("drain failed: {}", e))?;
    if drained.len() != 2 {
        return Err(format!("expected 2 reports, got {}", drained.len()));
    }
    expect_remaining(&engine, &id, Some(0))
}

fn release_resets_counter<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("release");
    register_all(&engine, &id, 2)?;
    engine
        .finish_registered(&id, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;
    engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("drain failed: {}", e))?;
    engine
        .release_loop(&id)
        .map_err(|e| format!("release_loop failed: {}", e))?;
    expect_remaining(&engine, &id, None)
}

fn released_loop_accepts_new_split<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("revisit");
    register_all(&engine, &id, 1)?;
    engine
        .release_loop(&id)
        .map_err(|e| format!("release_loop failed: {}", e))?;
    register_all(&engine, &id, 3)?;
    expect_remaining(&engine, &id, Some(3))
}
