use std::path::Path;
use std::process;
use std::sync::Arc;

use lanes_core::LoopId;
use lanes_engine::InMemoryEngine;
use lanes_runtime::{
    LoopDriver, LoopSummary, ParallelLoopScheduler, PathEvaluator, RecordingEventSink,
    RoundState, SchedulerConfig,
};
use tracing::debug;

use crate::fixture::Fixture;
use crate::{report_error, OutputFormat};

pub(crate) fn cmd_simulate(
    fixture_path: &Path,
    config_path: Option<&Path>,
    show_events: bool,
    output: OutputFormat,
    quiet: bool,
) {
    let fixture_str = std::fs::read_to_string(fixture_path).unwrap_or_else(|_| {
        let msg = format!("error: fixture file not found: {}", fixture_path.display());
        exit_with(&msg, output, quiet)
    });
    let fixture: Fixture = serde_json::from_str(&fixture_str).unwrap_or_else(|e| {
        let msg = format!("error: invalid fixture {}: {}", fixture_path.display(), e);
        exit_with(&msg, output, quiet)
    });

    let config = match config_path {
        Some(path) => SchedulerConfig::load_from(path)
            .unwrap_or_else(|e| exit_with(&format!("error: {}", e), output, quiet)),
        None => SchedulerConfig::default(),
    };
    let mut env = fixture
        .environment()
        .unwrap_or_else(|e| exit_with(&format!("error: {}", e), output, quiet));
    let body = fixture
        .body()
        .unwrap_or_else(|e| exit_with(&format!("error: {}", e), output, quiet));
    debug!(step = %fixture.step.name, scripts = fixture.bodies.len(), "fixture loaded");

    let events = Arc::new(RecordingEventSink::new());
    let scheduler =
        ParallelLoopScheduler::new(config, Arc::new(PathEvaluator::new()), events.clone());
    let engine = InMemoryEngine::new();
    let mut round = RoundState::new(LoopId::new(format!("simulate/{}", fixture.step.name)));

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        let msg = format!("error: failed to start runtime: {}", e);
        exit_with(&msg, output, quiet)
    });
    let result = runtime.block_on(LoopDriver::new(&scheduler, &engine).run(
        &fixture.step,
        &mut env,
        &mut round,
        Arc::new(body),
    ));

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => exit_with(&format!("error: {}", e), output, quiet),
    };

    let recorded = if show_events {
        events.events()
    } else {
        Vec::new()
    };
    match output {
        OutputFormat::Json => {
            let mut json = serde_json::json!({ "summary": summary });
            if show_events {
                json["events"] = serde_json::json!(recorded);
            }
            println!("{}", json);
        }
        OutputFormat::Text => {
            print_summary(&summary, quiet);
            if show_events {
                println!("events:");
                for event in &recorded {
                    println!("  {:<20} {:<8} {}", event.kind, event.path, event.description);
                }
            }
        }
    }
}

fn exit_with(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

fn print_summary(summary: &LoopSummary, quiet: bool) {
    println!(
        "{}: {} -> step {}",
        summary.step, summary.result, summary.next_step
    );
    if quiet {
        return;
    }
    let rounds: Vec<String> = summary.rounds.iter().map(|r| r.to_string()).collect();
    println!("rounds: {}", rounds.join(", "));
    println!("roi: {}", summary.total_roi);
    if !summary.outputs.is_empty() {
        println!("outputs:");
        for (name, value) in &summary.outputs {
            println!("  {} = {}", name, value);
        }
    }
}
