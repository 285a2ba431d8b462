//! Integration tests for graph construction and master resolution

mod common;

use common::nodes::{tick_log, Recorder};
use framepipe::pipeline::{Graph, NodeBehavior, PipelineError};
use framepipe::{GraphBuilder, NodeDescriptor, NodeId, NodeRegistry, PipelineConfig};
use proptest::prelude::*;

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();
    registry.register("Recorder", |_, _| {
        Ok(Box::new(Recorder::new(tick_log())) as Box<dyn NodeBehavior>)
    });
    registry
}

fn build(config: &PipelineConfig) -> Result<Graph, PipelineError> {
    GraphBuilder::from_config(config, &registry())
}

#[test]
fn test_diamond_masters_follow_primary_inputs() {
    // camera -> left -> merge(in)
    //        -> right -> merge(aux)
    let config = PipelineConfig::new("diamond")
        .with_node(NodeDescriptor::new("Recorder", 4, "merge").input("in", 2, "out").input("aux", 3, "out"))
        .with_node(NodeDescriptor::new("Threshold", 3, "right").input("in", 1, "out"))
        .with_node(NodeDescriptor::new("Threshold", 2, "left").input("in", 1, "out"))
        .with_node(NodeDescriptor::new("FrameSource", 1, "camera"));
    let graph = build(&config).unwrap();

    assert_eq!(graph.roots(), vec![NodeId(1)]);
    assert_eq!(graph.master_of(NodeId(1)), None);
    assert_eq!(graph.master_of(NodeId(2)), Some(NodeId(1)));
    assert_eq!(graph.master_of(NodeId(3)), Some(NodeId(1)));
    assert_eq!(graph.master_of(NodeId(4)), Some(NodeId(2)));
    assert_eq!(graph.primary_input_of(NodeId(4)).as_deref(), Some("in"));

    let mut below_camera = graph.dependents_of(NodeId(1));
    below_camera.sort();
    assert_eq!(below_camera, vec![NodeId(2), NodeId(3)]);
    assert!(graph.dependents_of(NodeId(3)).is_empty());
}

#[test]
fn test_primary_override_moves_master() {
    let config = PipelineConfig::new("override")
        .with_node(NodeDescriptor::new("FrameSource", 1, "camera"))
        .with_node(NodeDescriptor::new("Threshold", 2, "left").input("in", 1, "out"))
        .with_node(NodeDescriptor::new("Threshold", 3, "right").input("in", 1, "out"))
        .with_node(
            NodeDescriptor::new("Recorder", 4, "merge")
                .input("in", 2, "out")
                .input("aux", 3, "out")
                .primary("aux"),
        );
    let graph = build(&config).unwrap();
    assert_eq!(graph.master_of(NodeId(4)), Some(NodeId(3)));
    assert_eq!(graph.primary_input_of(NodeId(4)).as_deref(), Some("aux"));
}

#[test]
fn test_two_node_loop_is_rejected() {
    let config = PipelineConfig::new("loop")
        .with_node(NodeDescriptor::new("FrameSource", 1, "camera"))
        .with_node(NodeDescriptor::new("Recorder", 2, "a").input("in", 3, "out").input("aux", 1, "out"))
        .with_node(NodeDescriptor::new("Recorder", 3, "b").input("in", 2, "out"));

    match build(&config) {
        Err(PipelineError::UnresolvableGraph { unresolved }) => {
            assert_eq!(unresolved, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected UnresolvableGraph, got {:?}", other.map(|g| g.len())),
    }
}

#[test]
fn test_graph_without_self_driven_root_is_rejected() {
    let mut builder = GraphBuilder::new(Default::default());
    builder
        .add_node(NodeId(1), "lonely", Box::new(Recorder::new(tick_log())))
        .unwrap();
    let err = builder.finalize().unwrap_err();
    assert!(matches!(err, PipelineError::UnresolvableGraph { .. }));
    assert!(err.is_configuration_error());
}

#[test]
fn test_auto_process_node_becomes_root() {
    let config = PipelineConfig::new("auto")
        .with_node(NodeDescriptor::new("FrameSource", 1, "camera"))
        .with_node(
            NodeDescriptor::new("Recorder", 2, "watcher")
                .input("in", 1, "out")
                .auto_process(Some(5.0)),
        );
    let graph = build(&config).unwrap();
    assert!(graph.is_self_driven(NodeId(2)));
    assert_eq!(graph.master_of(NodeId(2)), None);
    assert_eq!(graph.roots().len(), 2);
}

#[test]
fn test_kind_mismatch_rejected_at_connect() {
    let config = PipelineConfig::new("kinds")
        .with_node(NodeDescriptor::new("FrameSource", 1, "camera"))
        .with_node(NodeDescriptor::new("Threshold", 2, "filter").input("in", 1, "out"))
        .with_node(NodeDescriptor::new("StateSink", 3, "sink").input("in", 2, "out"))
        .with_node(NodeDescriptor::new("Threshold", 4, "bad").input("in", 3, "state"));
    assert!(matches!(
        build(&config),
        Err(PipelineError::KindMismatch { .. })
    ));
}

#[test]
fn test_unknown_source_node_rejected() {
    let config = PipelineConfig::new("dangling")
        .with_node(NodeDescriptor::new("FrameSource", 1, "camera"))
        .with_node(NodeDescriptor::new("Threshold", 2, "filter").input("in", 9, "out"));
    assert!(matches!(build(&config), Err(PipelineError::UnknownNode(_))));
}

/// A random DAG: node 0 is the source, node `i` reads `in` from an earlier
/// node and optionally `aux` from another earlier node.
fn dag_config(edges: &[(usize, Option<usize>)], order: &[usize]) -> PipelineConfig {
    let mut descriptors = vec![NodeDescriptor::new("FrameSource", 1, "n0")];
    for (i, (primary, aux)) in edges.iter().enumerate() {
        let id = i as u32 + 2;
        let mut desc = NodeDescriptor::new("Recorder", id, format!("n{}", i + 1))
            .input("in", *primary as u32 + 1, "out");
        if let Some(aux) = aux {
            desc = desc.input("aux", *aux as u32 + 1, "out");
        }
        descriptors.push(desc);
    }
    let mut config = PipelineConfig::new("dag");
    for &i in order {
        config = config.with_node(descriptors[i].clone());
    }
    config
}

fn dag_strategy() -> impl Strategy<Value = (Vec<(usize, Option<usize>)>, Vec<usize>)> {
    (1usize..10)
        .prop_flat_map(|n| {
            let edges: Vec<_> = (1..=n)
                .map(|i| (0..i, proptest::option::of(0..i)))
                .collect();
            (edges, Just((0..=n).collect::<Vec<_>>()).prop_shuffle())
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_masters_independent_of_config_order((edges, order) in dag_strategy()) {
        let sorted: Vec<usize> = (0..=edges.len()).collect();
        let reference = build(&dag_config(&edges, &sorted)).unwrap();
        let shuffled = build(&dag_config(&edges, &order)).unwrap();

        for i in 0..=edges.len() {
            let id = NodeId(i as u32 + 1);
            prop_assert_eq!(reference.master_of(id), shuffled.master_of(id));

            let mut a = reference.dependents_of(id);
            let mut b = shuffled.dependents_of(id);
            a.sort();
            b.sort();
            prop_assert_eq!(a, b);
        }
        // Every non-source node hangs below the node feeding its `in`.
        for (i, (primary, _)) in edges.iter().enumerate() {
            prop_assert_eq!(
                shuffled.master_of(NodeId(i as u32 + 2)),
                Some(NodeId(*primary as u32 + 1))
            );
        }
    }
}
