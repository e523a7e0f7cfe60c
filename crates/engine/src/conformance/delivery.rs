use lanes_core::Value;
use rust_decimal::Decimal;

use super::{loop_id, register_all, succeed, ConformanceHarness, TestResult};
use crate::report::BranchCompletion;

pub(super) fn run_delivery_tests<E, F>(factory: &F) -> Vec<TestResult>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    vec![
        TestResult::from_result(
            "delivery",
            "each_report_delivered_once",
            each_report_delivered_once(factory),
        ),
        TestResult::from_result(
            "delivery",
            "report_carries_branch_environment",
            report_carries_branch_environment(factory),
        ),
        TestResult::from_result(
            "delivery",
            "exception_reports_are_delivered",
            exception_reports_are_delivered(factory),
        ),
        TestResult::from_result(
            "delivery",
            "cost_is_read_from_branch_environment",
            cost_is_read_from_branch_environment(factory),
        ),
    ]
}

fn each_report_delivered_once<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("once");
    register_all(&engine, &id, 4)?;
    engine
        .finish_registered(&id, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;

    let first = engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("first drain failed: {}", e))?;
    let second = engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("second drain failed: {}", e))?;

    if first.len() != 4 {
        return Err(format!("first drain: expected 4 reports, got {}", first.len()));
    }
    if !second.is_empty() {
        return Err(format!(
            "second drain: expected no reports, got {}",
            second.len()
        ));
    }
    let mut ids: Vec<_> = first.iter().map(|r| r.branch_id).collect();
    ids.sort();
    ids.dedup();
    if ids.len() != 4 {
        return Err("a branch was reported more than once".to_string());
    }
    Ok(())
}

fn report_carries_branch_environment<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("env");
    register_all(&engine, &id, 1)?;
    engine
        .finish_registered(&id, &|branch_id, mut env| {
            if let Some(ctx) = env.peek_context_mut() {
                ctx.put_variable("seen", Value::Bool(true));
            }
            succeed(branch_id, env)
        })
        .map_err(|e| format!("finish_registered failed: {}", e))?;

    let reports = engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("drain failed: {}", e))?;
    let report = reports.first().ok_or("expected one report")?;
    let ctx = report
        .env
        .peek_context()
        .ok_or("report environment has no context")?;
    if ctx.get_variable("seen") != Some(&Value::Bool(true)) {
        return Err("branch mutation missing from reported context".to_string());
    }
    if ctx.get_variable("item") != Some(&Value::Int(0)) {
        return Err("loop variable missing from reported context".to_string());
    }
    if report.env.return_values().is_none() {
        return Err("report environment lost its return values".to_string());
    }
    Ok(())
}

fn exception_reports_are_delivered<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("exception");
    register_all(&engine, &id, 2)?;
    engine
        .finish_registered(&id, &|branch_id, env| {
            let first = env
                .peek_context()
                .and_then(|ctx| ctx.get_variable("item"))
                == Some(&Value::Int(0));
            if first {
                BranchCompletion::raised(env, "boom")
            } else {
                succeed(branch_id, env)
            }
        })
        .map_err(|e| format!("finish_registered failed: {}", e))?;

    let reports = engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("drain failed: {}", e))?;
    if reports.len() != 2 {
        return Err(format!("expected 2 reports, got {}", reports.len()));
    }
    if reports.iter().filter(|r| r.is_exception()).count() != 1 {
        return Err("expected exactly one exception report".to_string());
    }
    Ok(())
}

fn cost_is_read_from_branch_environment<E, F>(factory: &F) -> Result<(), String>
where
    E: ConformanceHarness,
    F: Fn() -> E,
{
    let engine = factory();
    let id = loop_id("cost");
    register_all(&engine, &id, 1)?;
    engine
        .finish_registered(&id, &succeed)
        .map_err(|e| format!("finish_registered failed: {}", e))?;
    let reports = engine
        .drain_finished_branches(&id)
        .map_err(|e| format!("drain failed: {}", e))?;
    let report = reports.first().ok_or("expected one report")?;
    if report.cost != Decimal::ONE {
        return Err(format!("expected cost 1, got {}", report.cost));
    }
    Ok(())
}
