use super::{
    expect_remaining, loop_id, register_all, succeed, ConformanceHarness, TestResult,
};

pub(super) fn run_isolation_tests<E, F>(factory: &F) -> Vec<TestResult>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    vec![
        TestResult::from_result(
            "isolation",
            "loops_keep_separate_counters",
            loops_keep_separate_counters(factory),
        ),
        TestResult::from_result(
            "isolation",
            "drain_returns_only_own_loop",
            drain_returns_only_own_loop(factory),
        ),
    ]
}

fn loops_keep_separate_counters<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let a = loop_id("a");
    let b = loop_id("b");
    register_all(&engine, &a, 2)?;
    register_all(&engine, &b, 3)?;
    engine
        .finish_registered(&a, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;
    engine
        .drain_finished_branches(&a)
        .map_err(|e| format!("drain failed: {}", e))?;

    expect_remaining(&engine, &a, Some(0))?;
    expect_remaining(&engine, &b, Some(3))
}

fn drain_returns_only_own_loop<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let a = loop_id("own-a");
    let b = loop_id("own-b");
    register_all(&engine, &a, 1)?;
    register_all(&engine, &b, 1)?;
    engine
        .finish_registered(&b, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;

    let from_a = engine
        .drain_finished_branches(&a)
        .map_err(|e| format!("drain failed: {}", e))?;
    if !from_a.is_empty() {
        return Err(format!(
            "loop a drained {} reports that belong to loop b",
            from_a.len()
        ));
    }
    let from_b = engine
        .drain_finished_branches(&b)
        .map_err(|e| format!("drain failed: {}", e))?;
    if from_b.len() != 1 {
        return Err(format!("loop b: expected 1 report, got {}", from_b.len()));
    }
    Ok(())
}
