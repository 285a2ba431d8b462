//! Integration tests for per-node failure containment

mod common;

use common::frame_timestamps;
use common::nodes::{tick_log, Failing, Intermittent, Recorder, TickLog};
use framepipe::config::ExecutionOptions;
use framepipe::pipeline::{NodeOptions, ParamValue, TickState};
use framepipe::{
    Context, CycleOutcome, GraphBuilder, NodeBehavior, NodeDescriptor, NodeId, NodeRegistry,
    Pipeline, PipelineConfig, PipelineEvent,
};

/// source -> middle -> observer, with the observer also reading the
/// source directly on its optional `aux` input.
fn bypass_pipeline(
    middle: impl Fn() -> Box<dyn NodeBehavior> + Send + Sync + 'static,
) -> (Pipeline, TickLog) {
    let log = tick_log();
    let observer_log = log.clone();
    let mut registry = NodeRegistry::with_builtins();
    registry.register("Middle", move |_, _| Ok(middle()));
    registry.register("Observer", move |_, _| {
        Ok(Box::new(Recorder::new(observer_log.clone())) as Box<dyn NodeBehavior>)
    });

    let mut config = PipelineConfig::new("bypass")
        .with_node(NodeDescriptor::new("FrameSource", 1, "source"))
        .with_node(NodeDescriptor::new("Middle", 2, "middle").input("in", 1, "out"))
        .with_node(
            NodeDescriptor::new("Observer", 3, "observer")
                .input("in", 2, "out")
                .input("aux", 1, "out"),
        );
    config.options = ExecutionOptions {
        real_time: false,
        max_cycles: Some(10),
        ..ExecutionOptions::default()
    };
    let pipeline = Pipeline::from_config(&config, &registry).unwrap();
    (pipeline, log)
}

#[test]
fn test_failing_node_does_not_starve_dependents() {
    let (mut pipeline, log) =
        bypass_pipeline(|| Box::new(Failing { panic: false }) as Box<dyn NodeBehavior>);
    let handle = pipeline.handle();
    let events = handle.events();

    let stats = pipeline.run().unwrap();
    assert_eq!(stats.cycles, 10);

    let middle = stats.node("middle").unwrap();
    assert_eq!(middle.recovered, 10);
    assert_eq!(middle.completed, 0);

    // The observer ran every cycle and saw every fresh source frame.
    let log = log.lock();
    let cycles: Vec<u64> = log.iter().map(|t| t.0).collect();
    assert_eq!(cycles, (1..=10).collect::<Vec<_>>());
    let aux: Vec<u64> = log.iter().filter_map(|t| t.2).collect();
    assert_eq!(aux, frame_timestamps(30.0, 10));

    let snapshot = handle.status();
    let middle = snapshot.node("middle").unwrap();
    assert_eq!(middle.last_state, TickState::Recovered);
    assert_eq!(middle.last_error.as_deref(), Some("always fails"));
    assert!(!middle.has_recovered);

    let recovered = events
        .try_iter()
        .filter(|e| matches!(e, PipelineEvent::NodeRecovered { node, .. } if *node == NodeId(2)))
        .count();
    assert_eq!(recovered, 10);
}

#[test]
fn test_panicking_node_is_contained() {
    let (mut pipeline, log) =
        bypass_pipeline(|| Box::new(Failing { panic: true }) as Box<dyn NodeBehavior>);
    let stats = pipeline.run().unwrap();

    assert_eq!(stats.cycles, 10);
    assert_eq!(stats.node("middle").unwrap().recovered, 10);
    assert_eq!(log.lock().len(), 10);

    let status = pipeline.status();
    let error = status.node("middle").unwrap().last_error.clone().unwrap();
    assert!(error.contains("panicked"), "{}", error);
    assert!(error.contains("exploded at cycle 10"), "{}", error);

    // The node lock survives the panic: commands still work.
    let handle = pipeline.handle();
    assert!(handle
        .send_command_by_name("middle", "status", ParamValue::Bool(true))
        .is_ok());
}

#[test]
fn test_recovery_is_flagged_after_success() {
    let (mut pipeline, _log) = bypass_pipeline(|| {
        Box::new(Intermittent {
            fail_on: vec![2, 3],
        }) as Box<dyn NodeBehavior>
    });
    let stats = pipeline.run().unwrap();

    let middle = stats.node("middle").unwrap();
    assert_eq!(middle.recovered, 2);
    assert_eq!(middle.completed, 8);

    let status = pipeline.status();
    let middle = status.node("middle").unwrap();
    assert_eq!(middle.last_state, TickState::Completed);
    assert!(middle.has_recovered);
    assert_eq!(middle.last_error.as_deref(), Some("glitch at 3"));
}

#[test]
fn test_unconnected_required_input_recovers_each_tick() {
    let mut builder = GraphBuilder::new(Context::default());
    builder
        .add_node_with(
            NodeId(1),
            "orphan",
            Box::new(Recorder::new(tick_log())),
            NodeOptions {
                auto_process: true,
                ..NodeOptions::default()
            },
        )
        .unwrap();
    let graph = builder.finalize().unwrap();
    let pipeline = Pipeline::new(
        "orphan",
        graph,
        ExecutionOptions {
            real_time: false,
            ..ExecutionOptions::default()
        },
    );

    for expected in 1..=5 {
        assert_eq!(pipeline.run_cycle().unwrap(), CycleOutcome::Completed(expected));
    }
    assert!(pipeline.is_running());
    let stats = pipeline.statistics();
    let orphan = stats.node("orphan").unwrap();
    assert_eq!(orphan.recovered, 5);

    let status = pipeline.status();
    let error = status.node("orphan").unwrap().last_error.clone().unwrap();
    assert!(error.contains("not connected"), "{}", error);
}

#[test]
fn test_event_subscribers_keep_latest_recoveries() {
    let (pipeline, _log) =
        bypass_pipeline(|| Box::new(Failing { panic: false }) as Box<dyn NodeBehavior>);
    let handle = pipeline.handle();
    let first = handle.events();
    let second = handle.events();

    for _ in 0..400 {
        pipeline.run_cycle().unwrap();
    }

    let recovered_cycles = |rx: &crossbeam_channel::Receiver<PipelineEvent>| -> Vec<u64> {
        rx.try_iter()
            .filter_map(|e| match e {
                PipelineEvent::NodeRecovered { node, cycle, .. } if node == NodeId(2) => {
                    Some(cycle)
                }
                _ => None,
            })
            .collect()
    };
    let expected: Vec<u64> = (145..=400).collect();
    assert_eq!(recovered_cycles(&first), expected);
    assert_eq!(recovered_cycles(&second), expected);
}
