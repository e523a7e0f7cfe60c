//! Runs the engine conformance suite against the in-memory engine.

use lanes_engine::conformance::run_conformance_suite;
use lanes_engine::InMemoryEngine;

#[test]
fn in_memory_engine_passes_conformance() {
    let report = run_conformance_suite(InMemoryEngine::new);
    assert_eq!(report.failed, 0, "{report}");
    assert_eq!(report.total, 12);
}
