//! Step-level behaviour of dispatch and join, with branch completion driven
//! by hand through the in-memory engine.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use lanes_core::{
    Context, LoopId, Output, ParallelLoopStatement, ParallelLoopStep, ResultNavigation,
    ReturnValues, RunEnvironment, StepId, Value, Variables,
};
use lanes_engine::{BranchCompletion, ExecutionEngine, InMemoryEngine, RegisteredBranch};
use lanes_runtime::{
    EventKind, JoinOutcome, LoopError, LoopPhase, ParallelLoopScheduler, PathEvaluator,
    RecordingEventSink, RoundState, SchedulerConfig,
};
use rust_decimal::Decimal;
use serde_json::json;

const DISPATCH: StepId = StepId(1);
const BRANCH_BEGIN: StepId = StepId(2);
const JOIN: StepId = StepId(5);
const ON_SUCCESS: StepId = StepId(10);
const ON_FAILURE: StepId = StepId(11);

fn navigation() -> BTreeMap<String, ResultNavigation> {
    BTreeMap::from([
        (
            "SUCCESS".to_string(),
            ResultNavigation {
                next_step: ON_SUCCESS,
                preset_result: None,
            },
        ),
        (
            "FAILURE".to_string(),
            ResultNavigation {
                next_step: ON_FAILURE,
                preset_result: None,
            },
        ),
    ])
}

fn loop_step(expression: &str, throttle: Option<&str>) -> ParallelLoopStep {
    ParallelLoopStep {
        name: "deploy".to_string(),
        statement: ParallelLoopStatement::List {
            var_name: "x".to_string(),
            expression: expression.to_string(),
            throttle: throttle.map(str::to_string),
        },
        publish: vec![
            Output::new("seen", "branches_context[*].x"),
            Output::new("count", "len(branches_context)"),
        ],
        navigation: navigation(),
        dispatch_step: DISPATCH,
        branch_begin_step: BRANCH_BEGIN,
        join_step: JOIN,
    }
}

fn flow_env(variables: serde_json::Value) -> RunEnvironment {
    let vars = match Value::from_json(&variables) {
        Value::Map(vars) => vars,
        _ => panic!("flow variables must be an object"),
    };
    let mut env = RunEnvironment::new();
    env.push_context(Context::with_magic_variables(
        vars,
        [("region".to_string(), Value::text("eu"))]
            .into_iter()
            .collect(),
    ));
    env
}

fn scheduler() -> (ParallelLoopScheduler, Arc<RecordingEventSink>) {
    let events = Arc::new(RecordingEventSink::new());
    let scheduler = ParallelLoopScheduler::new(
        SchedulerConfig::default(),
        Arc::new(PathEvaluator::new()),
        events.clone(),
    );
    (scheduler, events)
}

fn item_of(env: &RunEnvironment) -> Value {
    env.peek_context()
        .and_then(|ctx| ctx.get_variable("x"))
        .cloned()
        .unwrap_or_default()
}

fn succeed(mut env: RunEnvironment) -> BranchCompletion {
    env.put_return_values(ReturnValues::new(Variables::new(), "SUCCESS"));
    BranchCompletion::finished(env)
}

/// Complete every registered branch of the loop, in registration order.
fn finish_all(
    engine: &InMemoryEngine,
    loop_id: &LoopId,
    body: impl Fn(RunEnvironment) -> BranchCompletion,
) -> Vec<String> {
    let branches = engine.take_registered(loop_id).unwrap();
    let mut paths = Vec::new();
    for RegisteredBranch { branch_id, env, .. } in branches {
        paths.push(env.execution_path().current_path());
        engine
            .complete_branch(loop_id, branch_id, body(env))
            .unwrap();
    }
    paths
}

#[test]
fn ten_items_throttle_three_release_one_then_threes() {
    let (scheduler, events) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("3"));
    let mut env = flow_env(json!({"items": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]}));
    let mut round = RoundState::new(LoopId::new("run-1/deploy"));

    let mut released = Vec::new();
    let outcome = loop {
        let report = scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
        assert_eq!(env.next_step(), Some(JOIN));
        released.push(report.released);
        finish_all(&engine, round.loop_id(), succeed);
        let outcome = scheduler.join(&engine, &step, &mut env, &mut round).unwrap();
        if outcome.is_finalized() {
            break outcome;
        }
        assert_eq!(outcome.next_step(), DISPATCH);
    };

    assert_eq!(released, vec![1, 3, 3, 3]);
    assert_eq!(round.rounds(), &[1, 3, 3, 3]);
    assert_eq!(round.phase(), LoopPhase::Finalized);
    match outcome {
        JoinOutcome::Finalized {
            result,
            next_step,
            outputs,
        } => {
            assert_eq!(result, "SUCCESS");
            assert_eq!(next_step, ON_SUCCESS);
            assert_eq!(outputs.get("count"), Some(&Value::Int(10)));
        }
        other => panic!("expected finalized loop, got {:?}", other),
    }
    assert_eq!(events.of_kind(EventKind::SplitBranches).len(), 1);
    assert_eq!(events.of_kind(EventKind::BranchStart).len(), 10);
    assert_eq!(events.of_kind(EventKind::BranchEnd).len(), 10);
    assert_eq!(events.of_kind(EventKind::JoinBranchesStart).len(), 1);
    assert_eq!(events.of_kind(EventKind::JoinBranchesEnd).len(), 1);
}

#[test]
fn branches_are_isolated_from_parent_and_siblings() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", None);
    let mut env = flow_env(json!({"items": ["a", "b", "c"], "shared": {"n": 1}}));
    let parent_before = env.peek_context().cloned().unwrap();
    let mut round = RoundState::new(LoopId::new("iso"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    let mut branches = engine.take_registered(round.loop_id()).unwrap();
    assert_eq!(branches.len(), 3);

    branches[0]
        .env
        .peek_context_mut()
        .unwrap()
        .put_variable("shared", Value::text("mutated"));

    assert_eq!(env.peek_context(), Some(&parent_before));
    assert_eq!(env.peek_context().unwrap().get_variable("x"), None);
    for sibling in &branches[1..] {
        let ctx = sibling.env.peek_context().unwrap();
        assert_eq!(ctx.get_variable("shared"), parent_before.get_variable("shared"));
    }
    let items: Vec<_> = branches.iter().map(|b| item_of(&b.env)).collect();
    assert_eq!(items, vec![Value::text("a"), Value::text("b"), Value::text("c")]);

    for branch in &branches {
        assert_eq!(branch.env.context_depth(), 1);
        assert_eq!(branch.env.session_depth(), 1);
        assert_eq!(branch.start_step, BRANCH_BEGIN);
        assert_eq!(branch.env.next_step(), Some(BRANCH_BEGIN));
        assert!(branch.env.return_values().is_none());
        // Globals travel with the forked context.
        assert_eq!(
            branch.env.peek_context().unwrap().lookup("region"),
            Some(&Value::text("eu"))
        );
    }
}

#[test]
fn branch_paths_are_distinct_and_parent_path_is_restored() {
    let (scheduler, events) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("2"));
    let mut env = flow_env(json!({"items": [1, 2, 3, 4]}));
    let mut round = RoundState::new(LoopId::new("paths"));

    let mut paths = Vec::new();
    loop {
        scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
        paths.extend(finish_all(&engine, round.loop_id(), succeed));
        if scheduler
            .join(&engine, &step, &mut env, &mut round)
            .unwrap()
            .is_finalized()
        {
            break;
        }
    }

    assert_eq!(paths, vec!["0.0.0", "0.1.0", "0.3.0", "0.4.0"]);
    // Branch start is reported at the loop-level slot, one level above the branch.
    let starts: Vec<String> = events
        .of_kind(EventKind::BranchStart)
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(starts, vec!["0.0", "0.1", "0.3", "0.4"]);
    let unique: HashSet<_> = paths.iter().collect();
    assert_eq!(unique.len(), paths.len());
    // Back at the parent level, one sibling past the loop.
    assert_eq!(env.execution_path().current_path(), "1");
}

#[test]
fn roi_grows_by_branch_deltas_across_rounds() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("2"));
    let mut env = flow_env(json!({"items": [1, 2, 3, 4]}));
    env.set_total_roi(Decimal::from(10));
    let mut round = RoundState::new(LoopId::new("roi"));

    loop {
        scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
        finish_all(&engine, round.loop_id(), |mut branch| {
            assert_eq!(branch.total_roi(), Decimal::from(10));
            let cost = item_of(&branch).as_i64().unwrap();
            branch.add_roi(Decimal::from(cost));
            succeed(branch)
        });
        if scheduler
            .join(&engine, &step, &mut env, &mut round)
            .unwrap()
            .is_finalized()
        {
            break;
        }
    }

    assert_eq!(env.total_roi(), Decimal::from(20));
    // Finalize clears the baseline along with the rest of the bookkeeping.
    assert_eq!(round.roi_baseline(), Decimal::ZERO);
    assert_eq!(round.total(), 0);
}

#[test]
fn raising_branch_is_dropped_and_surfaces_only_at_finalize() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("2"));
    let mut env = flow_env(json!({"items": [0, 1, 2, 3]}));
    let mut round = RoundState::new(LoopId::new("raise"));

    let raise_zero = |branch: RunEnvironment| {
        if item_of(&branch) == Value::Int(0) {
            BranchCompletion::raised(branch, "connection refused")
        } else {
            succeed(branch)
        }
    };

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), raise_zero);
    let outcome = scheduler.join(&engine, &step, &mut env, &mut round).unwrap();
    assert!(!outcome.is_finalized());
    assert!(round.branch_failed());
    assert_eq!(round.branches().len(), 1);
    assert_eq!(round.branches()[0].get("x"), Some(&Value::Int(1)));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), raise_zero);
    let err = scheduler
        .join(&engine, &step, &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::BranchException));
    assert_eq!(
        err.to_string(),
        "error running 'deploy': exception occurred during lane execution"
    );
    assert!(round.is_finalized());
    assert!(round.branches().is_empty());
    assert_eq!(engine.remaining_branches(round.loop_id()), None);
}

#[test]
fn failure_result_routes_to_failure_navigation() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", None);
    let mut env = flow_env(json!({"items": ["a", "b"]}));
    let flow_before = env.peek_context().cloned().unwrap();
    let mut round = RoundState::new(LoopId::new("fail"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), |mut branch| {
        let result = if item_of(&branch) == Value::text("b") {
            "FAILURE"
        } else {
            "SUCCESS"
        };
        branch.put_return_values(ReturnValues::new(Variables::new(), result));
        BranchCompletion::finished(branch)
    });
    let outcome = scheduler.join(&engine, &step, &mut env, &mut round).unwrap();

    assert_eq!(outcome.next_step(), ON_FAILURE);
    assert_eq!(env.next_step(), Some(ON_FAILURE));
    let rv = env.return_values().unwrap();
    assert_eq!(rv.result, "FAILURE");
    assert_eq!(
        rv.outputs.get("seen"),
        Some(&Value::List(vec![Value::text("a"), Value::text("b")]))
    );
    // Published values go to the return values, not the flow context.
    assert_eq!(env.peek_context(), Some(&flow_before));
    assert_eq!(env.context_depth(), 1);
}

#[test]
fn join_with_branches_outstanding_only_redirects() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("1"));
    let mut env = flow_env(json!({"items": [1, 2, 3]}));
    let mut round = RoundState::new(LoopId::new("reentry"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), succeed);
    env.set_step_error("stale");
    let first = scheduler.join(&engine, &step, &mut env, &mut round).unwrap();
    assert_eq!(
        first,
        JoinOutcome::AwaitMoreBranches {
            redispatch: DISPATCH,
            drained: 1
        }
    );
    assert_eq!(env.step_error(), None);
    assert_eq!(env.next_step(), Some(DISPATCH));

    let collected = round.branches().to_vec();
    let second = scheduler.join(&engine, &step, &mut env, &mut round).unwrap();
    assert_eq!(
        second,
        JoinOutcome::AwaitMoreBranches {
            redispatch: DISPATCH,
            drained: 0
        }
    );
    assert_eq!(round.branches(), collected.as_slice());
    assert_eq!(round.pending(), 2);
}

#[test]
fn dispatch_holds_while_branches_are_in_flight() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("2"));
    let mut env = flow_env(json!({"items": [1, 2, 3, 4]}));
    let mut round = RoundState::new(LoopId::new("ceiling"));

    let first = scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    assert_eq!((first.released, first.queued), (2, 2));
    let again = scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    assert_eq!((again.released, again.queued), (0, 2));
    assert_eq!(round.in_flight(), 2);
    assert_eq!(engine.in_flight(round.loop_id()), 2);
}

#[test]
fn map_loop_binds_key_and_value() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let mut step = loop_step("servers", None);
    step.statement = ParallelLoopStatement::Map {
        key_name: "name".to_string(),
        value_name: "port".to_string(),
        expression: "servers".to_string(),
        throttle: None,
    };
    step.publish = vec![Output::new("names", "branches_context[*].name")];
    let mut env = flow_env(json!({"servers": {"web": 80, "api": 8080}}));
    let mut round = RoundState::new(LoopId::new("map"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    let branches = engine.take_registered(round.loop_id()).unwrap();
    let ctx = branches[0].env.peek_context().unwrap();
    assert_eq!(ctx.get_variable("name"), Some(&Value::text("api")));
    assert_eq!(ctx.get_variable("port"), Some(&Value::Int(8080)));
    for RegisteredBranch { branch_id, env, .. } in branches {
        engine
            .complete_branch(round.loop_id(), branch_id, succeed(env))
            .unwrap();
    }

    scheduler.join(&engine, &step, &mut env, &mut round).unwrap();
    assert_eq!(
        env.return_values().unwrap().outputs.get("names"),
        Some(&Value::List(vec![Value::text("api"), Value::text("web")]))
    );
}

#[test]
fn join_before_any_dispatch_is_fatal() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let mut env = flow_env(json!({"items": [1]}));
    let mut round = RoundState::new(LoopId::new("early"));
    let err = scheduler
        .join(&engine, &loop_step("items", None), &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::NoParallelismRecorded));
}

#[test]
fn finalized_loop_rejects_further_calls() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", None);
    let mut env = flow_env(json!({"items": [1]}));
    let mut round = RoundState::new(LoopId::new("done"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), succeed);
    assert!(scheduler
        .join(&engine, &step, &mut env, &mut round)
        .unwrap()
        .is_finalized());

    let err = scheduler
        .join(&engine, &step, &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::AlreadyFinalized { .. }));
    let err = scheduler
        .dispatch(&engine, &step, &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::AlreadyFinalized { .. }));
}

#[test]
fn empty_split_is_fatal_and_restores_flow_context() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let mut env = flow_env(json!({"items": []}));
    let mut round = RoundState::new(LoopId::new("empty"));
    let err = scheduler
        .dispatch(&engine, &loop_step("items", None), &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::MalformedLoop { .. }));
    assert!(err.to_string().starts_with("error running 'deploy': "));
    assert_eq!(env.context_depth(), 1);
}

#[test]
fn missing_navigation_is_fatal() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let mut step = loop_step("items", None);
    step.navigation.remove("FAILURE");
    let mut env = flow_env(json!({"items": [1]}));
    let mut round = RoundState::new(LoopId::new("nav"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), |mut branch| {
        branch.put_return_values(ReturnValues::new(Variables::new(), "FAILURE"));
        BranchCompletion::finished(branch)
    });
    let err = scheduler
        .join(&engine, &step, &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::MissingNavigation { ref result } if result == "FAILURE"));
    assert_eq!(env.context_depth(), 1);
}

#[test]
fn branch_without_result_is_fatal() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", None);
    let mut env = flow_env(json!({"items": [1]}));
    let mut round = RoundState::new(LoopId::new("no-result"));

    scheduler.dispatch(&engine, &step, &mut env, &mut round).unwrap();
    finish_all(&engine, round.loop_id(), BranchCompletion::finished);
    let err = scheduler
        .join(&engine, &step, &mut env, &mut round)
        .unwrap_err();
    assert!(matches!(err.source, LoopError::MissingBranchResult { .. }));
}

/// Drive one visit of the loop to its finalized outcome.
fn run_to_completion(
    scheduler: &ParallelLoopScheduler,
    engine: &InMemoryEngine,
    step: &ParallelLoopStep,
    env: &mut RunEnvironment,
    round: &mut RoundState,
) -> JoinOutcome {
    loop {
        scheduler.dispatch(engine, step, env, round).unwrap();
        finish_all(engine, round.loop_id(), succeed);
        let outcome = scheduler.join(engine, step, env, round).unwrap();
        if outcome.is_finalized() {
            return outcome;
        }
    }
}

#[test]
fn loop_step_can_be_visited_again_after_finalize() {
    let (scheduler, _) = scheduler();
    let engine = InMemoryEngine::new();
    let step = loop_step("items", Some("1"));
    let mut env = flow_env(json!({"items": ["a", "b"]}));
    let loop_id = LoopId::new("run-1/deploy");

    let mut first = RoundState::new(loop_id.clone());
    let outcome = run_to_completion(&scheduler, &engine, &step, &mut env, &mut first);
    assert_eq!(outcome.next_step(), ON_SUCCESS);
    assert_eq!(engine.remaining_branches(&loop_id), None);
    assert_eq!(engine.tracked_loops(), 0);

    // Navigation routed the flow back into the same loop step.
    let mut second = RoundState::new(loop_id.clone());
    let outcome = run_to_completion(&scheduler, &engine, &step, &mut env, &mut second);
    assert_eq!(second.rounds(), &[1, 1]);
    match outcome {
        JoinOutcome::Finalized { outputs, .. } => {
            assert_eq!(outputs.get("count"), Some(&Value::Int(2)));
        }
        other => panic!("expected finalized loop, got {:?}", other),
    }
    assert_eq!(engine.tracked_loops(), 0);
}
