use chunkflow_engine::memory::{MemorySink, SyntheticSource};
use chunkflow_engine::simulation::{Simulation, SimulationOptions, build_simulation};
use chunkflow_engine::step::RUN_STATE_PARAMETER;
use chunkflow_engine::{ChunkPlanner, ConfigurationError, PassExecutor, RunState, Step, StepStatus, parse_pipeline_file};
use chunkflow_types::{ChunkStrategyKind, Coordinate, PipelineDefinition, WriteMode};
use serde_json::{Value, json};

fn nightly_pipeline() -> PipelineDefinition {
    parse_pipeline_file(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/nightly_pipeline.yaml")).expect("load pipeline fixture")
}

fn run_simulation(strategy: ChunkStrategyKind) -> (Simulation, RunState, chunkflow_engine::RunReport) {
    let mut simulation = build_simulation(&nightly_pipeline(), SimulationOptions::default()).expect("build simulation");
    let mut planner = ChunkPlanner::new(&simulation.steps, strategy).expect("plan");
    let mut run_state = RunState::new();
    let report = PassExecutor::new()
        .run(&mut simulation.steps, &mut planner, &mut run_state)
        .expect("run");
    (simulation, run_state, report)
}

#[test]
fn round_robin_run_writes_every_row_once() {
    let (simulation, run_state, report) = run_simulation(ChunkStrategyKind::RoundRobin);

    assert_eq!(report.pass_count(), 3);
    assert_eq!(simulation.sinks["orders-archive"].lock().expect("lock").row_count(), 7);
    assert_eq!(simulation.sinks["customers-archive"].lock().expect("lock").row_count(), 4);

    let last = report.passes.last().expect("last pass");
    assert_eq!(last.outcome("orders").and_then(|outcome| outcome.coordinate), Some(Coordinate::rows(6, 1)));
    assert_eq!(last.outcome("customers").map(|outcome| outcome.status), Some(StepStatus::Skipped));
    assert_eq!(last.outcome("customers-archive").map(|outcome| outcome.status), Some(StepStatus::Skipped));
    assert_eq!(run_state.dataset("regions").expect("regions").row_count(), 1);
}

#[test]
fn balanced_run_writes_every_row_once() {
    let (simulation, _, report) = run_simulation(ChunkStrategyKind::Balanced);

    assert_eq!(report.pass_count(), 3 * 2 * 2);
    let orders = simulation.sinks["orders-archive"].lock().expect("lock");
    let written: Vec<u64> = orders.column("row").expect("row column").into_iter().filter_map(Value::as_u64).collect();
    assert_eq!(written, (0..7).collect::<Vec<_>>());
    assert_eq!(simulation.sinks["customers-archive"].lock().expect("lock").row_count(), 4);
}

#[test]
fn non_append_sink_fails_before_any_pass() {
    let sink = MemorySink::new().with_mode(WriteMode::Overwrite);
    let destination = sink.destination();
    let steps = vec![
        Step::source("orders", SyntheticSource::new("orders", 10).with_chunk_size(Some(5)))
            .build()
            .expect("source"),
        Step::sink("snapshot", "orders", sink).build().expect("sink"),
    ];

    let error = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect_err("overwrite sink under chunking");
    assert_eq!(
        error,
        ConfigurationError::SinkNotAppend {
            step_id: "snapshot".into(),
            mode: WriteMode::Overwrite
        }
    );
    assert!(destination.lock().expect("lock").is_empty());
}

fn observer(id: &str, record_as: &'static str) -> Step {
    Step::builder(id, move |call| {
        let state = call.run_state()?;
        let seen = state.variable("stamp").cloned().unwrap_or(Value::Null);
        let mut history = state.variable(record_as).cloned().unwrap_or_else(|| json!([]));
        if let Some(entries) = history.as_array_mut() {
            entries.push(seen);
        }
        state.insert_variable(record_as, history);
        Ok(Vec::new())
    })
    .parameter(RUN_STATE_PARAMETER)
    .build()
    .expect("observer")
}

#[test]
fn mutations_are_visible_to_later_steps_only() {
    let mut stamp = 0;
    let mut steps = vec![
        Step::source("orders", SyntheticSource::new("orders", 4).with_chunk_size(Some(2)))
            .build()
            .expect("source"),
        observer("early", "early_saw"),
        Step::builder("writer", move |_call| {
            stamp += 1;
            Ok(vec![json!(stamp).into()])
        })
        .output("stamp")
        .build()
        .expect("writer"),
        observer("late", "late_saw"),
    ];
    let mut planner = ChunkPlanner::new(&steps, ChunkStrategyKind::RoundRobin).expect("plan");
    let mut run_state = RunState::new();
    PassExecutor::new().run(&mut steps, &mut planner, &mut run_state).expect("run");

    assert_eq!(run_state.variable("early_saw"), Some(&json!([null, 1])));
    assert_eq!(run_state.variable("late_saw"), Some(&json!([1, 2])));
}

#[test]
fn plan_lists_identical_schedule_on_replan() {
    let simulation = build_simulation(&nightly_pipeline(), SimulationOptions::default()).expect("build simulation");
    for strategy in [ChunkStrategyKind::RoundRobin, ChunkStrategyKind::Balanced] {
        let planner = ChunkPlanner::new(&simulation.steps, strategy).expect("plan");
        assert_eq!(&planner.replan().expect("replan"), planner.pending_queue());
        assert_eq!(planner.chunked_steps().collect::<Vec<_>>(), vec!["orders", "customers", "regions"]);
    }
}
